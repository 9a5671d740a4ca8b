//! Owned memory mappings and segment loading.
//!
//! [`ElfSegments`] owns one mapped region and is the only way the link
//! engine touches module memory: every relocation write is an offset into
//! the region and is bounds-checked, so a malformed record cannot escape the
//! mapping it belongs to.

use crate::{
    Result,
    elf::ElfPhdr,
    format_error,
    input::ImageSource,
    link_error,
    os::{MapFlags, Mmap, ProtFlags},
};
use alloc::format;
use core::ffi::c_void;
use elf::abi::{PF_R, PF_W, PF_X, PT_LOAD};

pub(crate) const PAGE_SIZE: usize = 0x1000;

#[inline]
pub(crate) fn roundup(x: usize, align: usize) -> usize {
    (x + align - 1) & !(align - 1)
}

#[inline]
pub(crate) fn rounddown(x: usize, align: usize) -> usize {
    x & !(align - 1)
}

/// Convert program header flags to memory protection flags.
pub(crate) fn phdr_prot(p_flags: u32) -> ProtFlags {
    let mut prot = ProtFlags::PROT_NONE;
    if p_flags & PF_R != 0 {
        prot |= ProtFlags::PROT_READ;
    }
    if p_flags & PF_W != 0 {
        prot |= ProtFlags::PROT_WRITE;
    }
    if p_flags & PF_X != 0 {
        prot |= ProtFlags::PROT_EXEC;
    }
    prot
}

/// An owned, mapped memory region belonging to one module.
///
/// Offsets handed to the accessors are relative to [`base`](Self::base),
/// which matches the virtual addresses the image was laid out with.
pub struct ElfSegments {
    memory: *mut c_void,
    /// Distance between `memory` and the module's logical base address.
    offset: usize,
    len: usize,
    munmap: unsafe fn(*mut c_void, usize) -> Result<()>,
}

impl Drop for ElfSegments {
    fn drop(&mut self) {
        let _ = unsafe { (self.munmap)(self.memory, self.len) };
    }
}

impl ElfSegments {
    pub(crate) fn new(
        memory: *mut c_void,
        len: usize,
        munmap: unsafe fn(*mut c_void, usize) -> Result<()>,
    ) -> Self {
        Self {
            memory,
            offset: 0,
            len,
            munmap,
        }
    }

    /// Base address the image's virtual addresses are relative to.
    #[inline]
    pub fn base(&self) -> usize {
        self.memory as usize - self.offset
    }

    /// Length of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Translates a base-relative offset into a mapped address, refusing
    /// anything that leaves the region.
    fn check(&self, offset: usize, size: usize) -> Result<usize> {
        let addr = self.base().wrapping_add(offset);
        let begin = self.memory as usize;
        if addr < begin || addr.wrapping_add(size) > begin + self.len {
            return Err(link_error(format!(
                "offset 0x{:x} (+{}) is outside the mapped region of {} bytes",
                offset, size, self.len
            )));
        }
        Ok(addr)
    }

    /// Bounds-checked write used by the relocation engine.
    pub(crate) fn write<T>(&self, offset: usize, value: T) -> Result<()> {
        let addr = self.check(offset, size_of::<T>())?;
        unsafe { (addr as *mut T).write_unaligned(value) };
        Ok(())
    }

    /// Bounds-checked typed view into the region. ELF lays its tables out
    /// naturally aligned, which the caller relies on.
    pub(crate) fn get_slice<T>(&self, offset: usize, count: usize) -> Result<&[T]> {
        let addr = self.check(offset, count * size_of::<T>())?;
        Ok(unsafe { core::slice::from_raw_parts(addr as *const T, count) })
    }

}

/// Maps the whole image for inspection during the mapping phase.
///
/// With a file descriptor this is a private read-only mapping; otherwise the
/// bytes are copied into an anonymous region.
pub(crate) fn map_file_view<M: Mmap>(
    source: &mut (impl ImageSource + ?Sized),
) -> Result<ElfSegments> {
    let file_len = source.len()?;
    if file_len == 0 {
        return Err(format_error("image is empty"));
    }
    let len = roundup(file_len, PAGE_SIZE);
    let memory = match source.as_fd() {
        Some(fd) => {
            let mut need_copy = false;
            let ptr = unsafe {
                M::mmap(
                    None,
                    len,
                    ProtFlags::PROT_READ,
                    MapFlags::MAP_PRIVATE,
                    0,
                    Some(fd),
                    &mut need_copy,
                )
            }?;
            debug_assert!(!need_copy);
            ptr
        }
        None => {
            let ptr = unsafe {
                M::mmap_anonymous(
                    0,
                    len,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_PRIVATE,
                )
            }?;
            let buf = unsafe { core::slice::from_raw_parts_mut(ptr.cast::<u8>(), file_len) };
            source.read(buf, 0)?;
            ptr
        }
    };
    Ok(ElfSegments::new(memory, len, M::munmap))
}

/// Extent of the loadable segments: lowest and highest page-rounded vaddr.
fn load_extent(phdrs: &[ElfPhdr]) -> Result<(usize, usize)> {
    let mut min = usize::MAX;
    let mut max = 0usize;
    for phdr in phdrs {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        min = min.min(rounddown(phdr.p_vaddr as usize, PAGE_SIZE));
        max = max.max(roundup((phdr.p_vaddr + phdr.p_memsz) as usize, PAGE_SIZE));
    }
    if min >= max {
        return Err(format_error("image has no loadable segments"));
    }
    Ok((min, max))
}

/// Maps a module's loadable segments into a freshly reserved span.
///
/// Segments stay writable so relocations can be applied; call
/// [`finalize_protections`] afterwards to drop down to the protections the
/// image declares.
pub(crate) fn map_segments<M: Mmap>(
    source: &mut (impl ImageSource + ?Sized),
    phdrs: &[ElfPhdr],
) -> Result<ElfSegments> {
    let (min, max) = load_extent(phdrs)?;
    let total = max - min;
    let fd = source.as_fd();
    let reserved = unsafe { M::mmap_reserve(None, total, fd.is_some()) }? as usize;

    for phdr in phdrs {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        let vaddr = phdr.p_vaddr as usize;
        let filesz = phdr.p_filesz as usize;
        let memsz = phdr.p_memsz as usize;
        // Address of the segment's first byte inside the reservation.
        let seg_addr = reserved + (vaddr - min);
        let prot = phdr_prot(phdr.p_flags) | ProtFlags::PROT_WRITE;

        match fd {
            Some(fd) => {
                if filesz > 0 {
                    let map_addr = rounddown(seg_addr, PAGE_SIZE);
                    let map_off = rounddown(phdr.p_offset as usize, PAGE_SIZE);
                    let map_len = roundup(phdr.p_offset as usize + filesz, PAGE_SIZE) - map_off;
                    let mut need_copy = false;
                    unsafe {
                        M::mmap(
                            Some(map_addr),
                            map_len,
                            prot,
                            MapFlags::MAP_PRIVATE | MapFlags::MAP_FIXED,
                            map_off,
                            Some(fd),
                            &mut need_copy,
                        )
                    }?;
                    debug_assert!(!need_copy);
                }
                if memsz > filesz {
                    // Zero the slop after the file bytes, then back the rest
                    // of the segment with anonymous pages.
                    let zero_start = seg_addr + filesz;
                    let zero_end = roundup(zero_start, PAGE_SIZE).min(seg_addr + memsz);
                    if filesz > 0 && zero_end > zero_start {
                        unsafe {
                            core::ptr::write_bytes(
                                zero_start as *mut u8,
                                0,
                                zero_end - zero_start,
                            )
                        };
                    }
                    let anon_start = roundup(zero_start, PAGE_SIZE);
                    let anon_end = roundup(seg_addr + memsz, PAGE_SIZE);
                    if anon_end > anon_start {
                        unsafe {
                            M::mmap_anonymous(
                                anon_start,
                                anon_end - anon_start,
                                prot,
                                MapFlags::MAP_PRIVATE | MapFlags::MAP_FIXED,
                            )
                        }?;
                    }
                }
            }
            None => {
                // The reservation is already zeroed and writable.
                if filesz > 0 {
                    let buf =
                        unsafe { core::slice::from_raw_parts_mut(seg_addr as *mut u8, filesz) };
                    source.read(buf, phdr.p_offset as usize)?;
                }
            }
        }
    }

    let mut segments = ElfSegments::new(reserved as *mut c_void, total, M::munmap);
    segments.offset = min;
    Ok(segments)
}

/// Applies the protections the image declares, ending the writable window
/// relocation needed.
pub(crate) fn finalize_protections<M: Mmap>(
    segments: &ElfSegments,
    phdrs: &[ElfPhdr],
) -> Result<()> {
    for phdr in phdrs {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        let start = rounddown(segments.base() + phdr.p_vaddr as usize, PAGE_SIZE);
        let end = roundup(
            segments.base() + (phdr.p_vaddr + phdr.p_memsz) as usize,
            PAGE_SIZE,
        );
        unsafe { M::mprotect(start as *mut c_void, end - start, phdr_prot(phdr.p_flags)) }?;
    }
    Ok(())
}
