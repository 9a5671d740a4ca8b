//! Thread-local storage layout across all discovered modules.
//!
//! Every module gets a disjoint slice of one flat, process-wide block.
//! Offsets are handed out monotonically at registration time, interleaved
//! with dependency discovery; the block itself is reserved once, after the
//! graph is complete, and never resized.

use core::ptr::NonNull;

/// Running-offset assignment of per-module TLS slices.
#[derive(Default)]
pub(crate) struct TlsLayout {
    next_offset: usize,
}

impl TlsLayout {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Assigns the next slice and returns its offset. A zero-sized module
    /// shares its offset with the following one.
    pub(crate) fn assign(&mut self, size: usize) -> usize {
        let offset = self.next_offset;
        self.next_offset += size;
        offset
    }

    /// Total bytes assigned so far.
    #[inline]
    pub(crate) fn total(&self) -> usize {
        self.next_offset
    }
}

/// The reserved process-wide TLS block.
pub struct TlsBlock {
    pub(crate) base: NonNull<u8>,
    pub(crate) len: usize,
}

impl TlsBlock {
    /// Start of the block.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Size of the block in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::TlsLayout;

    #[test]
    fn offsets_are_contiguous() {
        let mut layout = TlsLayout::new();
        assert_eq!(layout.assign(16), 0);
        assert_eq!(layout.assign(32), 16);
        assert_eq!(layout.assign(8), 48);
        assert_eq!(layout.total(), 56);
    }

    #[test]
    fn zero_sized_modules_share_offsets() {
        let mut layout = TlsLayout::new();
        assert_eq!(layout.assign(0), 0);
        assert_eq!(layout.assign(16), 0);
        assert_eq!(layout.assign(0), 16);
        assert_eq!(layout.total(), 16);
    }

    #[test]
    fn empty_layout_reserves_nothing() {
        let layout = TlsLayout::new();
        assert_eq!(layout.total(), 0);
    }
}
