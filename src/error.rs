use alloc::borrow::Cow;
use core::fmt;

/// Errors produced while bringing up a process image.
///
/// None of these are recovered from: a half-linked program cannot safely run,
/// so the bootstrap path treats every variant as fatal and terminates the
/// process after reporting it.
#[derive(Debug)]
pub enum Error {
    /// The loader's own image is unusable (missing ELF magic or dynamic
    /// segment). Occurs before diagnostics are possible.
    Bootstrap {
        /// Error message
        msg: Cow<'static, str>,
    },
    /// A library file could not be found, opened or read.
    Io {
        /// Error message
        msg: Cow<'static, str>,
    },
    /// A memory mapping or protection operation failed.
    Mmap {
        /// Error message
        msg: Cow<'static, str>,
    },
    /// An image is malformed or lacks a required structure.
    Format {
        /// Error message
        msg: Cow<'static, str>,
    },
    /// Symbol resolution or relocation failed.
    Link {
        /// Error message
        msg: Cow<'static, str>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Bootstrap { msg } => write!(f, "bootstrap error: {}", msg),
            Error::Io { msg } => write!(f, "io error: {}", msg),
            Error::Mmap { msg } => write!(f, "mmap error: {}", msg),
            Error::Format { msg } => write!(f, "format error: {}", msg),
            Error::Link { msg } => write!(f, "link error: {}", msg),
        }
    }
}

impl core::error::Error for Error {}

#[cold]
#[inline(never)]
pub(crate) fn bootstrap_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Bootstrap { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn map_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Mmap { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn format_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Format { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn link_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Link { msg: msg.into() }
}

/// Builds a [`Error::Link`] describing a failed relocation record.
#[cold]
#[inline(never)]
pub(crate) fn reloc_error(rela: &crate::elf::ElfRela, msg: &str, name: &str) -> Error {
    Error::Link {
        msg: alloc::format!(
            "[{}] {} at offset 0x{:x}: {}",
            name,
            crate::arch::rel_type_to_str(rela.r_type()),
            rela.r_offset,
            msg
        )
        .into(),
    }
}
