//! Orchestration of the mapping phase: discovery, registration and TLS
//! layout. The load phase (segment mapping and relocation) lives in the
//! link engine, implemented on the same type.

use crate::{
    Result,
    image::ImageFile,
    input::{ImageSource, LibraryProvider, SystemLibraries},
    link_error,
    module::ModuleDescriptor,
    os::{DefaultMmap, DefaultRuntime, Mmap, Runtime},
    registry::Registry,
    tls::{TlsBlock, TlsLayout},
};
use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::marker::PhantomData;

/// Derive the bare library name from a path by stripping directory
/// components.
pub(crate) fn library_basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// The dynamic loader's mutable state, threaded through every bootstrap
/// phase instead of living in ambient globals.
///
/// Generic over the memory-mapping backend `M`, the process runtime `R`
/// and the library provider `P`, so kernels and tests can substitute their
/// own environments.
pub struct Loader<M = DefaultMmap, R = DefaultRuntime, P = SystemLibraries>
where
    M: Mmap,
    R: Runtime,
    P: LibraryProvider,
{
    registry: Registry,
    tls: TlsLayout,
    tls_block: Option<TlsBlock>,
    provider: P,
    _marker: PhantomData<(M, R)>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(SystemLibraries::default())
    }
}

impl<M, R, P> Loader<M, R, P>
where
    M: Mmap,
    R: Runtime,
    P: LibraryProvider,
{
    /// Creates a loader resolving libraries through `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            registry: Registry::new(),
            tls: TlsLayout::new(),
            tls_block: None,
            provider,
            _marker: PhantomData,
        }
    }

    /// The module registry.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub(crate) fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Total thread-local storage assigned across all registered modules.
    #[inline]
    pub fn total_tls_size(&self) -> usize {
        self.tls.total()
    }

    /// The reserved TLS block, once [`allocate_tls`](Self::allocate_tls)
    /// has run with a non-zero total.
    #[inline]
    pub fn tls_block(&self) -> Option<&TlsBlock> {
        self.tls_block.as_ref()
    }

    /// Registers `name` with a freshly mapped image view and assigns its
    /// TLS slice. This is the mapping-phase half of a library's life.
    pub fn map_library(&mut self, name: &str, mut source: Box<dyn ImageSource>) -> Result<()> {
        let file_size = source.len()?;
        #[cfg(feature = "log")]
        log::debug!("Mapping library: {} ({} bytes)", name, file_size);

        let image = ImageFile::open::<M>(&mut *source)?;
        let tls_size = image.tls_info().map(|tls| tls.memsz).unwrap_or(0);
        let tls_offset = self.tls.assign(tls_size);

        #[cfg(feature = "log")]
        if !image.needed_libs().is_empty() {
            log::debug!("[{}] needed libraries: {:?}", name, image.needed_libs());
        }

        self.registry.register(ModuleDescriptor {
            name: name.to_string(),
            source,
            file_size,
            image,
            tls_offset,
            tls_size,
        });
        Ok(())
    }

    /// Depth-first discovery over needed-library edges, starting from the
    /// already-registered module `name`.
    ///
    /// A name already present in the registry is not revisited, which also
    /// terminates dependency cycles. Traversal order decides only which
    /// modules end up registered, never symbol precedence.
    pub fn resolve_dependencies(&mut self, name: &str) -> Result<()> {
        let needed: Vec<String> = self
            .registry
            .get(name)?
            .needed()
            .iter()
            .map(|needed| library_basename(needed).to_string())
            .collect();
        for lib in needed {
            if self.registry.contains(&lib) {
                continue;
            }
            let source = self.provider.open(&lib)?;
            self.map_library(&lib, source)?;
            self.resolve_dependencies(&lib)?;
        }
        Ok(())
    }

    /// Reserves the single contiguous TLS block sized by the sum of every
    /// registered module's requirement. A zero total reserves nothing.
    pub fn allocate_tls(&mut self) -> Result<()> {
        let total: usize = self.registry.descriptors().map(|d| d.tls_size()).sum();
        debug_assert_eq!(total, self.tls.total());

        #[cfg(feature = "log")]
        for desc in self.registry.descriptors() {
            log::debug!(
                "[{}] tls size: {}, tls offset: {}",
                desc.name(),
                desc.tls_size(),
                desc.tls_offset()
            );
        }

        if total == 0 {
            return Ok(());
        }
        let base = unsafe { R::reserve_tls(total) }?;
        #[cfg(feature = "log")]
        log::debug!("Reserved TLS block: {} bytes at {:p}", total, base);
        self.tls_block = Some(TlsBlock { base, len: total });
        Ok(())
    }

    /// Absolute entry point of a linked module: the image-declared entry
    /// plus its load base.
    pub fn entry_point(&self, name: &str) -> Result<usize> {
        self.registry
            .get_loaded(name)
            .map(|obj| obj.entry())
            .ok_or_else(|| link_error(format!("{} has not been linked", name)))
    }
}
