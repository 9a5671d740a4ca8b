use crate::{
    Result,
    input::ImageSource,
    io_error, map_error,
    os::{MapFlags, Mmap, ProtFlags, Runtime},
};
use alloc::{
    ffi::CString,
    format,
    string::{String, ToString},
};
use core::{ffi::c_void, ptr::NonNull, str::FromStr};
use libc::{O_RDONLY, SEEK_SET, mmap, mprotect, munmap};

/// An implementation of the [`Mmap`] trait over libc.
pub struct DefaultMmap;

impl Mmap for DefaultMmap {
    unsafe fn mmap(
        addr: Option<usize>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
        offset: usize,
        fd: Option<isize>,
        need_copy: &mut bool,
    ) -> Result<*mut c_void> {
        let ptr = if let Some(fd) = fd {
            unsafe {
                mmap(
                    addr.unwrap_or(0) as _,
                    len,
                    prot.bits(),
                    flags.bits(),
                    fd as i32,
                    offset as _,
                )
            }
        } else {
            *need_copy = true;
            addr.unwrap() as _
        };
        if core::ptr::eq(ptr, libc::MAP_FAILED) {
            return Err(map_error("mmap failed"));
        }
        Ok(ptr)
    }

    unsafe fn mmap_anonymous(
        addr: usize,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> Result<*mut c_void> {
        let ptr = unsafe {
            mmap(
                addr as _,
                len,
                prot.bits(),
                flags.union(MapFlags::MAP_ANONYMOUS).bits(),
                -1,
                0,
            )
        };
        if core::ptr::eq(ptr, libc::MAP_FAILED) {
            return Err(map_error("mmap anonymous failed"));
        }
        Ok(ptr)
    }

    unsafe fn munmap(addr: *mut c_void, len: usize) -> Result<()> {
        let res = unsafe { munmap(addr, len) };
        if res != 0 {
            return Err(map_error("munmap failed"));
        }
        Ok(())
    }

    unsafe fn mprotect(addr: *mut c_void, len: usize, prot: ProtFlags) -> Result<()> {
        let res = unsafe { mprotect(addr, len, prot.bits()) };
        if res != 0 {
            return Err(map_error("mprotect failed"));
        }
        Ok(())
    }

    unsafe fn mmap_reserve(
        addr: Option<usize>,
        len: usize,
        use_file: bool,
    ) -> Result<*mut c_void> {
        let flags = MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS;
        let prot = if use_file {
            ProtFlags::PROT_NONE
        } else {
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        };
        let ptr = unsafe { mmap(addr.unwrap_or(0) as _, len, prot.bits(), flags.bits(), -1, 0) };
        if core::ptr::eq(ptr, libc::MAP_FAILED) {
            return Err(map_error("mmap reserve failed"));
        }
        Ok(ptr)
    }
}

/// Default [`Runtime`] for hosted unix targets.
pub struct DefaultRuntime;

impl Runtime for DefaultRuntime {
    /// On a hosted unix target the C runtime brings itself up, so nothing
    /// is required here. Kernels embedding the crate hook their own
    /// [`Runtime`] and initialize their heap in this call.
    unsafe fn init_runtime() {}

    unsafe fn reserve_tls(len: usize) -> Result<NonNull<u8>> {
        debug_assert!(len != 0);
        let ptr = unsafe {
            DefaultMmap::mmap_anonymous(
                0,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }?;
        NonNull::new(ptr.cast()).ok_or_else(|| map_error("tls reservation returned null"))
    }

    fn exit(status: i32) -> ! {
        unsafe { libc::_exit(status) }
    }
}

pub(crate) struct RawFile {
    name: String,
    fd: isize,
}

impl Drop for RawFile {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd as i32) };
    }
}

impl RawFile {
    pub(crate) fn from_path(path: &str) -> Result<Self> {
        let name = CString::from_str(path).map_err(|_| io_error("path contains a nul byte"))?;
        let fd = unsafe { libc::open(name.as_ptr(), O_RDONLY) };
        if fd == -1 {
            return Err(io_error(format!("open failed: {}", path)));
        }
        Ok(Self {
            name: path.to_string(),
            fd: fd as isize,
        })
    }

    pub(crate) fn from_owned_fd(name: &str, raw_fd: i32) -> Self {
        Self {
            name: name.to_string(),
            fd: raw_fd as isize,
        }
    }

    pub(crate) fn file_size(&self) -> Result<usize> {
        let mut stat: libc::stat = unsafe { core::mem::zeroed() };
        let res = unsafe { libc::fstat(self.fd as i32, &mut stat) };
        if res != 0 {
            return Err(io_error(format!("fstat failed: {}", self.name)));
        }
        Ok(stat.st_size as usize)
    }
}

fn lseek(fd: i32, offset: usize) -> Result<()> {
    let off = unsafe { libc::lseek(fd, offset as _, SEEK_SET) };
    if off == -1 || off as usize != offset {
        return Err(io_error("lseek failed"));
    }
    Ok(())
}

fn read_exact(fd: i32, mut bytes: &mut [u8]) -> Result<()> {
    while !bytes.is_empty() {
        let ptr = bytes.as_mut_ptr() as *mut libc::c_void;
        let result = unsafe { libc::read(fd, ptr, bytes.len()) };
        if result < 0 {
            return Err(io_error("read error"));
        } else if result == 0 {
            // EOF before the buffer was filled
            return Err(io_error("failed to fill buffer"));
        }
        bytes = &mut bytes[result as usize..];
    }
    Ok(())
}

impl ImageSource for RawFile {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        lseek(self.fd as i32, offset)?;
        read_exact(self.fd as i32, buf)
    }

    fn as_fd(&self) -> Option<isize> {
        Some(self.fd)
    }

    fn len(&mut self) -> Result<usize> {
        self.file_size()
    }
}
