//! Per-library state on both sides of the load phase.
//!
//! A library exists first as a [`ModuleDescriptor`] while the dependency
//! graph is discovered, then as a [`LinkedObject`] once every one of its
//! relocations has been applied. Descriptors are transient; linked objects
//! live for the rest of the process.

use crate::{image::ImageFile, input::ImageSource, segment::ElfSegments};
use alloc::{boxed::Box, string::String};
use elf::abi::STT_TLS;
use hashbrown::HashMap;

/// Mapping-phase state for one library.
///
/// Holds the backing file and a read-only view of the raw image. Its only
/// purpose is to drive dependency discovery and relocation; every descriptor
/// is dropped in bulk once all modules are linked, releasing the inspection
/// mappings and file handles.
pub struct ModuleDescriptor {
    pub(crate) name: String,
    pub(crate) source: Box<dyn ImageSource>,
    pub(crate) file_size: usize,
    pub(crate) image: ImageFile,
    pub(crate) tls_offset: usize,
    pub(crate) tls_size: usize,
}

impl ModuleDescriptor {
    /// Name the library was registered under.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the backing file in bytes.
    #[inline]
    pub fn file_size(&self) -> usize {
        self.file_size
    }

    /// Offset of this module's slice in the process TLS block.
    #[inline]
    pub fn tls_offset(&self) -> usize {
        self.tls_offset
    }

    /// Bytes of thread-local storage this module requires. May be zero.
    #[inline]
    pub fn tls_size(&self) -> usize {
        self.tls_size
    }

    /// Needed-library names from the image's dynamic section.
    #[inline]
    pub fn needed(&self) -> &[String] {
        self.image.needed_libs()
    }

    /// The raw image view.
    #[inline]
    pub fn image(&self) -> &ImageFile {
        &self.image
    }
}

/// Exported symbol metadata retained after linking.
#[derive(Clone, Copy, Debug)]
pub struct ExportedSymbol {
    /// `st_value` of the defining symbol: relative to the module base, or to
    /// the module's TLS slice for thread-local symbols.
    pub value: usize,
    /// Size of the symbol in bytes.
    pub size: usize,
    /// Raw symbol type (`STT_*`).
    pub sym_type: u8,
}

/// A fully linked library.
///
/// Owns its relocated mapping for the remainder of process execution; other
/// modules' relocations point into it.
pub struct LinkedObject {
    pub(crate) name: String,
    pub(crate) segments: ElfSegments,
    pub(crate) entry: usize,
    pub(crate) tls_offset: usize,
    pub(crate) tls_size: usize,
    pub(crate) exports: HashMap<String, ExportedSymbol>,
}

impl LinkedObject {
    /// Name the library was registered under.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base load address.
    #[inline]
    pub fn base(&self) -> usize {
        self.segments.base()
    }

    /// Absolute entry point. Meaningful only for the main program.
    #[inline]
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// Offset of this module's slice in the process TLS block.
    #[inline]
    pub fn tls_offset(&self) -> usize {
        self.tls_offset
    }

    /// Bytes of thread-local storage this module occupies.
    #[inline]
    pub fn tls_size(&self) -> usize {
        self.tls_size
    }

    /// Looks up an exported symbol by name.
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<&ExportedSymbol> {
        self.exports.get(name)
    }

    /// Absolute address of a non-TLS exported symbol.
    pub fn symbol_address(&self, name: &str) -> Option<usize> {
        self.lookup(name)
            .filter(|sym| sym.sym_type != STT_TLS)
            .map(|sym| self.base() + sym.value)
    }
}
