//! Read-only structural view of one ELF image.
//!
//! The loader consumes images through this narrow surface: program headers,
//! the dynamic section's needed-library list, relocation records and the
//! dynamic symbol table. Full binary-format parsing (hash lookup, section
//! headers, versioning) is deliberately not done here; the view decodes
//! exactly what linking requires and nothing more.

use crate::{
    Result,
    elf::{ElfDyn, ElfHeader, ElfPhdr, ElfRela, ElfSymbol, EHDR_SIZE, PHDR_SIZE},
    format_error,
    input::ImageSource,
    os::Mmap,
    segment::{ElfSegments, map_file_view},
};
use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use elf::abi::{
    DT_HASH, DT_JMPREL, DT_NEEDED, DT_NULL, DT_PLTRELSZ, DT_RELA, DT_RELASZ, DT_STRSZ, DT_STRTAB,
    DT_SYMTAB, PT_DYNAMIC, PT_LOAD, PT_TLS,
};

/// TLS requirements of one image, taken from its `PT_TLS` header.
#[derive(Clone, Copy, Debug, Default)]
pub struct TlsInfo {
    /// Virtual address of the initialization template.
    pub vaddr: usize,
    /// Size of the initialized part of the block.
    pub filesz: usize,
    /// Total size of the block in memory.
    pub memsz: usize,
    /// Alignment requirement of the block.
    pub align: usize,
}

/// File offsets of the dynamic-section tables.
#[derive(Default)]
struct DynamicTables {
    needed: Vec<String>,
    /// `.rela.dyn`: (file offset, record count).
    rela: Option<(usize, usize)>,
    /// `.rela.plt`: (file offset, record count).
    pltrel: Option<(usize, usize)>,
    symtab: usize,
    strtab: usize,
    strsz: usize,
    sym_count: usize,
}

/// A raw image mapped for inspection.
///
/// The backing whole-file mapping lives exactly as long as the view; the
/// loadable segments proper are mapped separately by the link engine.
pub struct ImageFile {
    view: ElfSegments,
    entry: usize,
    phdrs: Vec<ElfPhdr>,
    tls: Option<TlsInfo>,
    dynamic: DynamicTables,
}

impl ImageFile {
    /// Maps the whole image and decodes the structures the loader needs.
    pub(crate) fn open<M: Mmap>(source: &mut (impl ImageSource + ?Sized)) -> Result<Self> {
        let mut ehdr_buf = [0u8; EHDR_SIZE];
        source.read(&mut ehdr_buf, 0)?;
        let ehdr = ElfHeader::new(&ehdr_buf)?.clone();
        if !ehdr.is_executable() {
            return Err(format_error("not an executable or shared object"));
        }
        if ehdr.e_phentsize() != PHDR_SIZE {
            return Err(format_error("unexpected program header entry size"));
        }

        let view = map_file_view::<M>(source)?;
        let phdrs: Vec<ElfPhdr> = view
            .get_slice::<ElfPhdr>(ehdr.e_phoff(), ehdr.e_phnum())?
            .to_vec();

        let mut tls = None;
        let mut dyn_phdr = None;
        for phdr in &phdrs {
            match phdr.p_type {
                PT_TLS => {
                    tls = Some(TlsInfo {
                        vaddr: phdr.p_vaddr as usize,
                        filesz: phdr.p_filesz as usize,
                        memsz: phdr.p_memsz as usize,
                        align: phdr.p_align as usize,
                    });
                }
                PT_DYNAMIC => dyn_phdr = Some(*phdr),
                _ => {}
            }
        }
        let dyn_phdr = dyn_phdr.ok_or_else(|| format_error("image has no dynamic segment"))?;
        let dynamic = parse_dynamic(&view, &phdrs, &dyn_phdr)?;

        Ok(Self {
            view,
            entry: ehdr.e_entry as usize,
            phdrs,
            tls,
            dynamic,
        })
    }

    /// Entry point as declared by the image, relative to its base.
    #[inline]
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// Program headers of the image.
    #[inline]
    pub fn phdrs(&self) -> &[ElfPhdr] {
        &self.phdrs
    }

    /// TLS requirements, if the image has a `PT_TLS` segment.
    #[inline]
    pub fn tls_info(&self) -> Option<TlsInfo> {
        self.tls
    }

    /// Needed-library names recorded in the dynamic section, as written
    /// (possibly with directory components).
    #[inline]
    pub fn needed_libs(&self) -> &[String] {
        &self.dynamic.needed
    }

    /// Relocation records from `.rela.dyn`.
    pub(crate) fn relas(&self) -> Result<&[ElfRela]> {
        match self.dynamic.rela {
            Some((off, count)) => self.view.get_slice::<ElfRela>(off, count),
            None => Ok(&[]),
        }
    }

    /// Relocation records from `.rela.plt`.
    pub(crate) fn plt_relas(&self) -> Result<&[ElfRela]> {
        match self.dynamic.pltrel {
            Some((off, count)) => self.view.get_slice::<ElfRela>(off, count),
            None => Ok(&[]),
        }
    }

    /// Number of entries in the dynamic symbol table.
    #[inline]
    pub(crate) fn sym_count(&self) -> usize {
        self.dynamic.sym_count
    }

    /// Symbol record and name at `idx`.
    pub(crate) fn symbol(&self, idx: usize) -> Result<(&ElfSymbol, &str)> {
        if idx >= self.dynamic.sym_count {
            return Err(format_error(format!("symbol index {} out of range", idx)));
        }
        let sym = &self
            .view
            .get_slice::<ElfSymbol>(self.dynamic.symtab + idx * size_of::<ElfSymbol>(), 1)?[0];
        let name = self.read_str(self.dynamic.strtab + sym.st_name as usize)?;
        Ok((sym, name))
    }

    /// NUL-terminated string at `off` in the mapped file.
    fn read_str(&self, off: usize) -> Result<&str> {
        let total = self.view.len();
        if self.dynamic.strsz != 0 && off >= self.dynamic.strtab + self.dynamic.strsz {
            return Err(format_error("string offset out of range"));
        }
        if off >= total {
            return Err(format_error("string offset out of range"));
        }
        let bytes = self.view.get_slice::<u8>(off, total - off)?;
        let end = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| format_error("unterminated string"))?;
        core::str::from_utf8(&bytes[..end])
            .map_err(|_| format_error("invalid utf-8 in string table"))
    }
}

/// Translates a virtual address to a file offset through the loadable
/// segments.
fn vaddr_to_offset(phdrs: &[ElfPhdr], vaddr: usize) -> Result<usize> {
    for phdr in phdrs {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        let start = phdr.p_vaddr as usize;
        let end = start + phdr.p_filesz as usize;
        if vaddr >= start && vaddr < end {
            return Ok(vaddr - start + phdr.p_offset as usize);
        }
    }
    Err(format_error(format!(
        "virtual address 0x{:x} is outside every loadable segment",
        vaddr
    )))
}

fn parse_dynamic(
    view: &ElfSegments,
    phdrs: &[ElfPhdr],
    dyn_phdr: &ElfPhdr,
) -> Result<DynamicTables> {
    let count = dyn_phdr.p_filesz as usize / size_of::<ElfDyn>();
    let entries = view.get_slice::<ElfDyn>(dyn_phdr.p_offset as usize, count)?;

    let mut needed_offsets = Vec::new();
    let mut rela_vaddr = None;
    let mut rela_size = 0usize;
    let mut jmprel_vaddr = None;
    let mut pltrel_size = 0usize;
    let mut symtab_vaddr = None;
    let mut strtab_vaddr = None;
    let mut strsz = 0usize;
    let mut hash_vaddr = None;

    for entry in entries {
        match entry.d_tag {
            DT_NULL => break,
            DT_NEEDED => needed_offsets.push(entry.d_un as usize),
            DT_RELA => rela_vaddr = Some(entry.d_un as usize),
            DT_RELASZ => rela_size = entry.d_un as usize,
            DT_JMPREL => jmprel_vaddr = Some(entry.d_un as usize),
            DT_PLTRELSZ => pltrel_size = entry.d_un as usize,
            DT_SYMTAB => symtab_vaddr = Some(entry.d_un as usize),
            DT_STRTAB => strtab_vaddr = Some(entry.d_un as usize),
            DT_STRSZ => strsz = entry.d_un as usize,
            DT_HASH => hash_vaddr = Some(entry.d_un as usize),
            _ => {}
        }
    }

    let symtab_vaddr =
        symtab_vaddr.ok_or_else(|| format_error("dynamic section has no symbol table"))?;
    let strtab_vaddr =
        strtab_vaddr.ok_or_else(|| format_error("dynamic section has no string table"))?;
    let symtab = vaddr_to_offset(phdrs, symtab_vaddr)?;
    let strtab = vaddr_to_offset(phdrs, strtab_vaddr)?;

    let rela = match rela_vaddr {
        Some(vaddr) => {
            let off = vaddr_to_offset(phdrs, vaddr)?;
            Some((off, rela_size / size_of::<ElfRela>()))
        }
        None => None,
    };
    let pltrel = match jmprel_vaddr {
        Some(vaddr) => {
            let off = vaddr_to_offset(phdrs, vaddr)?;
            Some((off, pltrel_size / size_of::<ElfRela>()))
        }
        None => None,
    };

    // The dynamic section does not record the symbol count directly; the
    // hash table's nchain carries it. Images without DT_HASH fall back to
    // the symtab-to-strtab distance.
    let sym_count = match hash_vaddr {
        Some(vaddr) => {
            let off = vaddr_to_offset(phdrs, vaddr)?;
            let words = view.get_slice::<u32>(off, 2)?;
            words[1] as usize
        }
        None if strtab > symtab => (strtab - symtab) / size_of::<ElfSymbol>(),
        None => return Err(format_error("cannot size the dynamic symbol table")),
    };
    // Fail now rather than on first lookup if the table escapes the file.
    view.get_slice::<ElfSymbol>(symtab, sym_count)?;

    let mut needed = Vec::with_capacity(needed_offsets.len());
    for name_off in needed_offsets {
        let off = strtab + name_off;
        if strsz != 0 && name_off >= strsz {
            return Err(format_error("needed-library name outside string table"));
        }
        let total = view.len();
        let bytes = view.get_slice::<u8>(off, total - off)?;
        let end = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| format_error("unterminated needed-library name"))?;
        let name = core::str::from_utf8(&bytes[..end])
            .map_err(|_| format_error("invalid utf-8 in needed-library name"))?;
        needed.push(name.to_string());
    }

    Ok(DynamicTables {
        needed,
        rela,
        pltrel,
        symtab,
        strtab,
        strsz,
        sym_count,
    })
}
