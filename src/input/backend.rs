use super::{ImageSource, LibraryProvider};
use crate::{Result, io_error, os::RawFile};
use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    vec::Vec,
};
use hashbrown::HashMap;

/// Directory shared libraries are resolved from, by basename only.
pub const LIBRARY_DIR: &str = "/usr/lib";

/// An image backed by a file on the filesystem.
pub struct LibraryFile {
    inner: RawFile,
}

impl LibraryFile {
    /// Opens the file at `path`.
    pub fn from_path(path: &str) -> Result<Self> {
        #[cfg(feature = "log")]
        log::debug!("Opening library file: {}", path);
        Ok(LibraryFile {
            inner: RawFile::from_path(path)?,
        })
    }

    /// Wraps an already-open file descriptor, e.g. the main program image
    /// inherited from the kernel.
    ///
    /// # Safety
    /// `raw_fd` must be valid and exclusively owned by this object.
    pub unsafe fn from_owned_fd(name: &str, raw_fd: i32) -> Self {
        LibraryFile {
            inner: RawFile::from_owned_fd(name, raw_fd),
        }
    }
}

impl ImageSource for LibraryFile {
    fn file_name(&self) -> &str {
        self.inner.file_name()
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        self.inner.read(buf, offset)
    }

    fn as_fd(&self) -> Option<isize> {
        self.inner.as_fd()
    }

    fn len(&mut self) -> Result<usize> {
        self.inner.file_size()
    }
}

/// An image held in memory.
#[derive(Debug)]
pub struct MemoryImage {
    name: String,
    bytes: Vec<u8>,
}

impl MemoryImage {
    /// Creates a new memory-backed image from owned bytes.
    pub fn new(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            bytes,
        }
    }
}

impl ImageSource for MemoryImage {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        if offset + buf.len() > self.bytes.len() {
            return Err(io_error("read offset out of bounds"));
        }
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn as_fd(&self) -> Option<isize> {
        None
    }

    fn len(&mut self) -> Result<usize> {
        Ok(self.bytes.len())
    }
}

/// Opens libraries from the fixed system directory.
pub struct SystemLibraries {
    dir: &'static str,
}

impl SystemLibraries {
    /// Uses `dir` instead of [`LIBRARY_DIR`].
    pub fn new(dir: &'static str) -> Self {
        Self { dir }
    }
}

impl Default for SystemLibraries {
    fn default() -> Self {
        Self { dir: LIBRARY_DIR }
    }
}

impl LibraryProvider for SystemLibraries {
    fn open(&mut self, name: &str) -> Result<Box<dyn ImageSource>> {
        let file = LibraryFile::from_path(&format!("{}/{}", self.dir, name))?;
        Ok(Box::new(file))
    }
}

/// An in-memory library set, for tests and embedded images.
#[derive(Default)]
pub struct MemoryLibraries {
    libs: HashMap<String, Vec<u8>>,
}

impl MemoryLibraries {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a library image.
    pub fn insert(&mut self, name: &str, bytes: Vec<u8>) {
        self.libs.insert(name.to_string(), bytes);
    }
}

impl LibraryProvider for MemoryLibraries {
    fn open(&mut self, name: &str) -> Result<Box<dyn ImageSource>> {
        let bytes = self
            .libs
            .get(name)
            .cloned()
            .ok_or_else(|| io_error(format!("library not found: {}", name)))?;
        Ok(Box::new(MemoryImage::new(name, bytes)))
    }
}
