//! The link engine.
//!
//! Turns mapped-but-unlinked images into executable modules: for each
//! module, in dependency-first order, it maps the loadable segments,
//! applies every relocation record, resolves undefined symbols through the
//! registry's global lookup and publishes the result. A module becomes
//! visible to lookups only once fully relocated, so it can satisfy symbols
//! only for modules linked after it.

use crate::{
    Result,
    arch::{REL_GOT, REL_JUMP_SLOT, REL_NONE, REL_RELATIVE, REL_SYMBOLIC, REL_TPOFF},
    elf::ElfRela,
    input::LibraryProvider,
    loader::{Loader, library_basename},
    module::{ExportedSymbol, LinkedObject, ModuleDescriptor},
    os::{Mmap, Runtime},
    reloc_error,
    segment::{ElfSegments, finalize_protections, map_segments},
};
use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use elf::abi::{STB_GLOBAL, STB_WEAK, STT_TLS};
use hashbrown::HashMap;

impl<M, R, P> Loader<M, R, P>
where
    M: Mmap,
    R: Runtime,
    P: LibraryProvider,
{
    /// Links `name` and everything it needs, dependencies before
    /// dependents. Re-invoking on an already-linked name is a no-op.
    pub fn link_modules(&mut self, name: &str) -> Result<()> {
        let mut in_flight = Vec::new();
        self.load_module(name, &mut in_flight)
    }

    fn load_module(&mut self, name: &str, in_flight: &mut Vec<String>) -> Result<()> {
        if self.registry().is_loaded(name) {
            return Ok(());
        }
        if in_flight.iter().any(|pending| pending == name) {
            // Dependency cycle: a caller further up the recursion owns this
            // module and will publish it.
            return Ok(());
        }
        in_flight.push(name.to_string());

        let needed: Vec<String> = self
            .registry()
            .get(name)?
            .needed()
            .iter()
            .map(|needed| library_basename(needed).to_string())
            .collect();
        for dep in needed {
            if !self.registry().is_loaded(&dep) {
                self.load_module(&dep, in_flight)?;
            }
        }

        let object = self.link_one(name)?;
        self.registry_mut().promote(object);
        in_flight.pop();
        Ok(())
    }

    /// Maps, relocates and seals one module.
    fn link_one(&mut self, name: &str) -> Result<LinkedObject> {
        #[cfg(feature = "log")]
        log::info!("Linking {}", name);

        let desc = self.registry_mut().get_mut(name)?;
        let phdrs = desc.image.phdrs().to_vec();
        let segments = map_segments::<M>(&mut *desc.source, &phdrs)?;

        let total_tls = self.total_tls_size();
        let desc = self.registry().get(name)?;
        self.apply_relocations(desc, &segments, total_tls)?;
        let exports = build_exports(desc)?;
        finalize_protections::<M>(&segments, &phdrs)?;

        let entry = segments.base().wrapping_add(desc.image.entry());
        #[cfg(feature = "log")]
        log::debug!(
            "[{}] linked at 0x{:x}..0x{:x}",
            name,
            segments.base(),
            segments.base() + segments.len()
        );

        Ok(LinkedObject {
            name: name.to_string(),
            segments,
            entry,
            tls_offset: desc.tls_offset,
            tls_size: desc.tls_size,
            exports,
        })
    }

    fn apply_relocations(
        &self,
        desc: &ModuleDescriptor,
        segments: &ElfSegments,
        total_tls: usize,
    ) -> Result<()> {
        let dynrel = desc.image.relas()?;
        let pltrel = desc.image.plt_relas()?;
        #[cfg(feature = "log")]
        log::debug!(
            "[{}] applying {} relocations",
            desc.name(),
            dynrel.len() + pltrel.len()
        );
        for rela in dynrel.iter().chain(pltrel.iter()) {
            self.apply_one(desc, segments, rela, total_tls)?;
        }
        Ok(())
    }

    fn apply_one(
        &self,
        desc: &ModuleDescriptor,
        segments: &ElfSegments,
        rela: &ElfRela,
        total_tls: usize,
    ) -> Result<()> {
        /*
            Relocation formula components:
            A = addend of the relocation record
            B = base address the module was loaded at
            S = value of the symbol named by the record
        */
        let base = segments.base();
        let offset = rela.r_offset as usize;
        match rela.r_type() {
            REL_NONE => {}
            REL_RELATIVE => {
                // B + A
                segments.write(offset, base.wrapping_add_signed(rela.r_addend as isize))?;
            }
            REL_GOT | REL_SYMBOLIC => {
                // S + A
                let symbol = self.resolve_symbol(desc, segments, rela)?;
                segments.write(offset, symbol.wrapping_add_signed(rela.r_addend as isize))?;
            }
            REL_JUMP_SLOT => {
                // S, bound eagerly: there is no lazy resolution pass.
                let symbol = self.resolve_symbol(desc, segments, rela)?;
                segments.write(offset, symbol)?;
            }
            REL_TPOFF => {
                let (sym, sym_name) = desc.image.symbol(rela.r_symbol())?;
                let (module_tls_offset, value) = if sym.is_undefined() {
                    let (obj, export) =
                        self.registry().lookup_symbol(sym_name).ok_or_else(|| {
                            reloc_error(rela, "unresolved thread-local symbol", desc.name())
                        })?;
                    if export.sym_type != STT_TLS {
                        return Err(reloc_error(rela, "symbol is not thread-local", desc.name()));
                    }
                    (obj.tls_offset(), export.value)
                } else {
                    (desc.tls_offset, sym.st_value as usize)
                };
                // The thread pointer sits at the end of the block, so
                // offsets from it are negative.
                let patched = (module_tls_offset + value)
                    .wrapping_add_signed(rela.r_addend as isize)
                    .wrapping_sub(total_tls);
                segments.write(offset, patched)?;
            }
            _ => return Err(reloc_error(rela, "unsupported relocation", desc.name())),
        }
        Ok(())
    }

    /// Resolves the symbol a record names.
    ///
    /// The global lookup runs first and scans loaded objects in the order
    /// they finished linking; first match wins. A symbol the module itself
    /// defines binds locally when no loaded object exports it. A symbol
    /// found nowhere is fatal, weak or not.
    fn resolve_symbol(
        &self,
        desc: &ModuleDescriptor,
        segments: &ElfSegments,
        rela: &ElfRela,
    ) -> Result<usize> {
        let (sym, sym_name) = desc.image.symbol(rela.r_symbol())?;
        if let Some((obj, export)) = self.registry().lookup_symbol(sym_name) {
            if export.sym_type != STT_TLS {
                return Ok(obj.base() + export.value);
            }
        }
        if !sym.is_undefined() {
            return Ok(segments.base() + sym.st_value as usize);
        }
        Err(reloc_error(
            rela,
            &alloc::format!("undefined symbol: {}", sym_name),
            desc.name(),
        ))
    }
}

/// Collects the module's defined global (and weak) symbols into the export
/// table other modules resolve against.
fn build_exports(desc: &ModuleDescriptor) -> Result<HashMap<String, ExportedSymbol>> {
    let mut exports = HashMap::new();
    // Index 0 is the reserved null symbol.
    for idx in 1..desc.image.sym_count() {
        let (sym, name) = desc.image.symbol(idx)?;
        if sym.is_undefined() || name.is_empty() {
            continue;
        }
        let bind = sym.st_bind();
        if bind != STB_GLOBAL && bind != STB_WEAK {
            continue;
        }
        exports.entry(name.to_string()).or_insert(ExportedSymbol {
            value: sym.st_value as usize,
            size: sym.st_size as usize,
            sym_type: sym.st_type(),
        });
    }
    Ok(exports)
}
