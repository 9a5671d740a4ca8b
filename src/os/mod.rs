//! Operating system and environment abstractions.
//!
//! Memory mapping and protection primitives (the [`Mmap`] trait) and the
//! process-level hooks the loader must drive itself before any runtime
//! exists (the [`Runtime`] trait). The unix backend is the default; kernels
//! and bare-metal environments supply their own implementations.

use crate::Result;
use bitflags::bitflags;
use core::ffi::{c_int, c_void};
use core::ptr::NonNull;

bitflags! {
    #[derive(Clone, Copy, Debug, Default)]
    /// Memory protection flags for controlling access permissions.
    ///
    /// These flags determine what operations can be performed on a mapped
    /// memory region. They can be combined using bitwise OR operations.
    pub struct ProtFlags: c_int {
        /// No access allowed. Useful for reserving address space.
        const PROT_NONE = 0;

        /// Allow reading from the memory region.
        const PROT_READ = 1;

        /// Allow writing to the memory region.
        const PROT_WRITE = 2;

        /// Allow executing code in the memory region.
        const PROT_EXEC = 4;
    }
}

bitflags! {
    #[derive(Clone, Copy)]
    /// Memory mapping configuration flags.
    pub struct MapFlags: c_int {
        /// Create a private copy-on-write mapping.
        const MAP_PRIVATE = 2;

        /// Place the mapping at exactly the specified address.
        const MAP_FIXED = 16;

        /// Create an anonymous mapping not backed by any file.
        const MAP_ANONYMOUS = 32;
    }
}

/// Low-level memory mapping primitives.
pub trait Mmap {
    /// Maps `len` bytes with the given protections.
    ///
    /// When `fd` is `None` the implementation may be unable to map directly
    /// from the source; it then sets `need_copy` and returns `addr`, and the
    /// caller copies the bytes itself.
    ///
    /// # Safety
    /// `addr`, `len` and `offset` must describe a mapping the process may
    /// legally create.
    unsafe fn mmap(
        addr: Option<usize>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
        offset: usize,
        fd: Option<isize>,
        need_copy: &mut bool,
    ) -> Result<*mut c_void>;

    /// Maps `len` zero-filled bytes not backed by any file.
    ///
    /// # Safety
    /// `addr` and `len` must describe a mapping the process may legally
    /// create.
    unsafe fn mmap_anonymous(
        addr: usize,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> Result<*mut c_void>;

    /// Unmaps a previously mapped region.
    ///
    /// # Safety
    /// `addr` and `len` must describe a live mapping; nothing may reference
    /// it afterwards.
    unsafe fn munmap(addr: *mut c_void, len: usize) -> Result<()>;

    /// Changes the protection of a mapped region.
    ///
    /// # Safety
    /// `addr` and `len` must describe a live mapping.
    unsafe fn mprotect(addr: *mut c_void, len: usize, prot: ProtFlags) -> Result<()>;

    /// Reserves a span of address space for an image. When `use_file` is
    /// set the span is inaccessible until the caller maps segments over it;
    /// otherwise it is readable and writable so the caller can copy bytes in.
    ///
    /// # Safety
    /// `len` must be page aligned.
    unsafe fn mmap_reserve(addr: Option<usize>, len: usize, use_file: bool)
    -> Result<*mut c_void>;
}

/// Process runtime hooks the loader drives itself.
///
/// The loader is handed control before any runtime exists, so the pieces the
/// program start sequence normally provides are reached through this trait.
pub trait Runtime {
    /// Prepares the minimal runtime (heap and friends) before the loader
    /// touches any allocating code path.
    ///
    /// # Safety
    /// Must be called exactly once, before any allocation, after
    /// self-relocation.
    unsafe fn init_runtime();

    /// Reserves the process-wide thread-local storage block.
    ///
    /// Called at most once, after the dependency graph is complete; the
    /// block is never resized.
    ///
    /// # Safety
    /// `len` must be non-zero.
    unsafe fn reserve_tls(len: usize) -> Result<NonNull<u8>>;

    /// Terminates the process.
    fn exit(status: i32) -> !;
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub(crate) use unix::RawFile;
        pub use unix::{DefaultMmap, DefaultRuntime};
    } else {
        compile_error!("rtld currently requires a unix-like host for its default backend");
    }
}
