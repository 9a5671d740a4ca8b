//! Generates minimal ELF64 shared objects in memory for loader tests.
//!
//! The emitted image keeps everything inside a single read-write `PT_LOAD`
//! with `p_vaddr == p_offset`, so virtual addresses equal file offsets:
//!
//! ```text
//! ehdr | phdrs | .dynamic | .hash | .dynsym | .dynstr | .rela.dyn | data | tls
//! ```
//!
//! Every relocation record gets its own eight-byte patch slot in the data
//! area; the slot addresses come back in [`FixtureOutput::reloc_offsets`]
//! so tests can assert on the patched memory after linking.

use std::collections::HashMap;

/// ELF machine number of the host architecture.
#[cfg(target_arch = "x86_64")]
pub const EM_HOST: u16 = 62;
#[cfg(target_arch = "aarch64")]
pub const EM_HOST: u16 = 183;
#[cfg(target_arch = "riscv64")]
pub const EM_HOST: u16 = 243;

const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;
const DYN_SIZE: u64 = 16;
const SYM_SIZE: u64 = 24;
const RELA_SIZE: u64 = 24;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_TLS: u32 = 7;
const PF_R: u32 = 4;
const PF_W: u32 = 2;

const DT_NEEDED: i64 = 1;
const DT_HASH: i64 = 4;
const DT_STRTAB: i64 = 5;
const DT_SYMTAB: i64 = 6;
const DT_RELA: i64 = 7;
const DT_RELASZ: i64 = 8;
const DT_RELAENT: i64 = 9;
const DT_STRSZ: i64 = 10;
const DT_SYMENT: i64 = 11;

const STB_GLOBAL: u8 = 1;
const STT_OBJECT: u8 = 1;
const STT_TLS: u8 = 6;

fn align8(x: u64) -> u64 {
    (x + 7) & !7
}

#[derive(Clone)]
enum SymKind {
    Object { data: Vec<u8> },
    Tls { offset: u64, size: u64 },
    Undefined,
    UndefinedTls,
}

/// A symbol to place in the fixture's dynamic symbol table.
#[derive(Clone)]
pub struct SymbolDesc {
    name: String,
    kind: SymKind,
}

impl SymbolDesc {
    /// A defined global data symbol whose payload lands in the data area.
    pub fn global_object(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            kind: SymKind::Object {
                data: data.to_vec(),
            },
        }
    }

    /// A defined thread-local symbol at `offset` within the module's TLS
    /// block.
    pub fn global_tls(name: &str, offset: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: SymKind::Tls { offset, size },
        }
    }

    /// An undefined reference to be satisfied by some other module.
    pub fn undefined(name: &str) -> Self {
        Self {
            name: name.into(),
            kind: SymKind::Undefined,
        }
    }

    /// An undefined thread-local reference.
    pub fn undefined_tls(name: &str) -> Self {
        Self {
            name: name.into(),
            kind: SymKind::UndefinedTls,
        }
    }
}

/// A relocation record to emit, patching a dedicated slot in the data area.
#[derive(Clone)]
pub struct RelocEntry {
    name: Option<String>,
    r_type: u32,
    addend: i64,
}

impl RelocEntry {
    /// A record with no symbol (e.g. a relative relocation).
    pub fn new(r_type: u32) -> Self {
        Self {
            name: None,
            r_type,
            addend: 0,
        }
    }

    /// A record referencing the named symbol.
    pub fn with_name(name: &str, r_type: u32) -> Self {
        Self {
            name: Some(name.into()),
            r_type,
            addend: 0,
        }
    }

    /// Sets the record's addend. For relative relocations the same value is
    /// also stored at the patch slot, the way link editors emit them.
    pub fn addend(mut self, addend: i64) -> Self {
        self.addend = addend;
        self
    }
}

/// Builder for one shared-object fixture.
#[derive(Default)]
pub struct DylibWriter {
    needed: Vec<String>,
    symbols: Vec<SymbolDesc>,
    relocs: Vec<RelocEntry>,
    tls_memsz: u64,
    tls_template: Vec<u8>,
    entry_data_offset: Option<u64>,
}

/// The generated image plus the addresses tests assert against.
pub struct FixtureOutput {
    /// The raw ELF image.
    pub data: Vec<u8>,
    /// Virtual address of each relocation's patch slot, in insertion order.
    pub reloc_offsets: Vec<u64>,
    /// Virtual address of each defined data symbol's payload.
    pub symbol_vaddrs: HashMap<String, u64>,
    /// The `e_entry` value written into the header.
    pub entry: u64,
}

impl DylibWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a DT_NEEDED dependency.
    pub fn needed(mut self, name: &str) -> Self {
        self.needed.push(name.into());
        self
    }

    pub fn symbol(mut self, symbol: SymbolDesc) -> Self {
        self.symbols.push(symbol);
        self
    }

    pub fn reloc(mut self, reloc: RelocEntry) -> Self {
        self.relocs.push(reloc);
        self
    }

    /// Gives the image a PT_TLS segment of `memsz` bytes initialized from
    /// `template`.
    pub fn tls(mut self, memsz: u64, template: &[u8]) -> Self {
        self.tls_memsz = memsz;
        self.tls_template = template.to_vec();
        self
    }

    /// Sets `e_entry` to the given offset within the data area.
    pub fn entry(mut self, data_offset: u64) -> Self {
        self.entry_data_offset = Some(data_offset);
        self
    }

    pub fn write(self) -> FixtureOutput {
        let has_tls = self.tls_memsz > 0 || !self.tls_template.is_empty();
        let phnum: u64 = if has_tls { 3 } else { 2 };
        let phdrs_off = EHDR_SIZE;
        let dyn_off = align8(phdrs_off + phnum * PHDR_SIZE);
        // NEEDED*, HASH, SYMTAB, SYMENT, STRTAB, STRSZ, the RELA triple
        // (omitted when there are no records, as link editors do) and NULL.
        let rela_dyn: u64 = if self.relocs.is_empty() { 0 } else { 3 };
        let n_dyn = self.needed.len() as u64 + 6 + rela_dyn;
        let hash_off = dyn_off + n_dyn * DYN_SIZE;

        let nsyms = self.symbols.len() as u64 + 1;
        let hash_size = (3 + nsyms) * 4;
        let sym_off = align8(hash_off + hash_size);
        let str_off = sym_off + nsyms * SYM_SIZE;

        // String table: index zero is the empty string.
        let mut strtab = vec![0u8];
        let intern = |strtab: &mut Vec<u8>, s: &str| -> u64 {
            let off = strtab.len() as u64;
            strtab.extend_from_slice(s.as_bytes());
            strtab.push(0);
            off
        };
        let sym_name_offs: Vec<u64> = self
            .symbols
            .iter()
            .map(|s| intern(&mut strtab, &s.name))
            .collect();
        let needed_offs: Vec<u64> = self
            .needed
            .iter()
            .map(|n| intern(&mut strtab, n))
            .collect();
        let strsz = strtab.len() as u64;

        let rela_off = align8(str_off + strsz);
        let relasz = self.relocs.len() as u64 * RELA_SIZE;
        let data_off = align8(rela_off + relasz);

        // Data area: one slot per relocation, then the symbol payloads.
        let mut cursor = data_off + self.relocs.len() as u64 * 8;
        let mut payload_vaddrs = Vec::new();
        for sym in &self.symbols {
            if let SymKind::Object { data } = &sym.kind {
                cursor = align8(cursor);
                payload_vaddrs.push(Some(cursor));
                cursor += data.len() as u64;
            } else {
                payload_vaddrs.push(None);
            }
        }
        let tls_off = align8(cursor);
        let file_len = tls_off + self.tls_template.len() as u64;

        let entry = self
            .entry_data_offset
            .map(|off| data_off + off)
            .unwrap_or(0);

        let mut buf = vec![0u8; file_len as usize];
        let put16 = |buf: &mut [u8], off: u64, v: u16| {
            buf[off as usize..off as usize + 2].copy_from_slice(&v.to_le_bytes())
        };
        let put32 = |buf: &mut [u8], off: u64, v: u32| {
            buf[off as usize..off as usize + 4].copy_from_slice(&v.to_le_bytes())
        };
        let put64 = |buf: &mut [u8], off: u64, v: u64| {
            buf[off as usize..off as usize + 8].copy_from_slice(&v.to_le_bytes())
        };

        // ELF header
        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 2; // ELFCLASS64
        buf[5] = 1; // little endian
        buf[6] = 1; // EV_CURRENT
        put16(&mut buf, 16, 3); // ET_DYN
        put16(&mut buf, 18, EM_HOST);
        put32(&mut buf, 20, 1); // e_version
        put64(&mut buf, 24, entry);
        put64(&mut buf, 32, phdrs_off); // e_phoff
        put16(&mut buf, 52, EHDR_SIZE as u16); // e_ehsize
        put16(&mut buf, 54, PHDR_SIZE as u16); // e_phentsize
        put16(&mut buf, 56, phnum as u16);

        // Program headers
        let phdr = |buf: &mut [u8],
                        idx: u64,
                        p_type: u32,
                        flags: u32,
                        off: u64,
                        filesz: u64,
                        memsz: u64,
                        align: u64| {
            let p = phdrs_off + idx * PHDR_SIZE;
            put32(buf, p, p_type);
            put32(buf, p + 4, flags);
            put64(buf, p + 8, off); // p_offset
            put64(buf, p + 16, off); // p_vaddr
            put64(buf, p + 24, off); // p_paddr
            put64(buf, p + 32, filesz);
            put64(buf, p + 40, memsz);
            put64(buf, p + 48, align);
        };
        phdr(&mut buf, 0, PT_LOAD, PF_R | PF_W, 0, file_len, file_len, 0x1000);
        phdr(
            &mut buf,
            1,
            PT_DYNAMIC,
            PF_R,
            dyn_off,
            n_dyn * DYN_SIZE,
            n_dyn * DYN_SIZE,
            8,
        );
        if has_tls {
            let p = phdrs_off + 2 * PHDR_SIZE;
            put32(&mut buf, p, PT_TLS);
            put32(&mut buf, p + 4, PF_R);
            put64(&mut buf, p + 8, tls_off);
            put64(&mut buf, p + 16, tls_off);
            put64(&mut buf, p + 24, tls_off);
            put64(&mut buf, p + 32, self.tls_template.len() as u64);
            put64(&mut buf, p + 40, self.tls_memsz.max(self.tls_template.len() as u64));
            put64(&mut buf, p + 48, 8);
        }

        // Dynamic section
        let mut dyn_idx = 0u64;
        let mut dyn_entry = |buf: &mut [u8], tag: i64, val: u64| {
            let p = dyn_off + dyn_idx * DYN_SIZE;
            put64(buf, p, tag as u64);
            put64(buf, p + 8, val);
            dyn_idx += 1;
        };
        for off in &needed_offs {
            dyn_entry(&mut buf, DT_NEEDED, *off);
        }
        dyn_entry(&mut buf, DT_HASH, hash_off);
        dyn_entry(&mut buf, DT_SYMTAB, sym_off);
        dyn_entry(&mut buf, DT_SYMENT, SYM_SIZE);
        dyn_entry(&mut buf, DT_STRTAB, str_off);
        dyn_entry(&mut buf, DT_STRSZ, strsz);
        if !self.relocs.is_empty() {
            dyn_entry(&mut buf, DT_RELA, rela_off);
            dyn_entry(&mut buf, DT_RELASZ, relasz);
            dyn_entry(&mut buf, DT_RELAENT, RELA_SIZE);
        }
        dyn_entry(&mut buf, 0, 0); // DT_NULL

        // Hash table: one bucket, nchain carries the symbol count.
        put32(&mut buf, hash_off, 1);
        put32(&mut buf, hash_off + 4, nsyms as u32);

        // Symbol table (index 0 stays the null symbol)
        let mut symbol_vaddrs = HashMap::new();
        for (i, sym) in self.symbols.iter().enumerate() {
            let p = sym_off + (i as u64 + 1) * SYM_SIZE;
            put32(&mut buf, p, sym_name_offs[i] as u32); // st_name
            let (info, shndx, value, size) = match &sym.kind {
                SymKind::Object { data } => {
                    let vaddr = payload_vaddrs[i].unwrap();
                    symbol_vaddrs.insert(sym.name.clone(), vaddr);
                    (
                        (STB_GLOBAL << 4) | STT_OBJECT,
                        1u16,
                        vaddr,
                        data.len() as u64,
                    )
                }
                SymKind::Tls { offset, size } => {
                    ((STB_GLOBAL << 4) | STT_TLS, 1u16, *offset, *size)
                }
                SymKind::Undefined => ((STB_GLOBAL << 4), 0u16, 0, 0),
                SymKind::UndefinedTls => (((STB_GLOBAL << 4) | STT_TLS), 0u16, 0, 0),
            };
            buf[p as usize + 4] = info;
            put16(&mut buf, p + 6, shndx);
            put64(&mut buf, p + 8, value);
            put64(&mut buf, p + 16, size);
        }

        // String table
        buf[str_off as usize..str_off as usize + strtab.len()].copy_from_slice(&strtab);

        // Relocations and their patch slots
        let mut reloc_offsets = Vec::new();
        for (i, reloc) in self.relocs.iter().enumerate() {
            let slot = data_off + i as u64 * 8;
            reloc_offsets.push(slot);
            let sym_idx = reloc
                .name
                .as_ref()
                .map(|name| {
                    self.symbols
                        .iter()
                        .position(|s| &s.name == name)
                        .expect("relocation references an undeclared symbol")
                        as u64
                        + 1
                })
                .unwrap_or(0);
            let p = rela_off + i as u64 * RELA_SIZE;
            put64(&mut buf, p, slot); // r_offset
            put64(&mut buf, p + 8, (sym_idx << 32) | reloc.r_type as u64);
            put64(&mut buf, p + 16, reloc.addend as u64);
            // Link editors store the addend of relative records in place.
            if reloc.name.is_none() {
                put64(&mut buf, slot, reloc.addend as u64);
            }
        }

        // Symbol payloads
        for (sym, vaddr) in self.symbols.iter().zip(&payload_vaddrs) {
            if let (SymKind::Object { data }, Some(vaddr)) = (&sym.kind, vaddr) {
                buf[*vaddr as usize..*vaddr as usize + data.len()].copy_from_slice(data);
            }
        }

        // TLS template
        buf[tls_off as usize..tls_off as usize + self.tls_template.len()]
            .copy_from_slice(&self.tls_template);

        FixtureOutput {
            data: buf,
            reloc_offsets,
            symbol_vaddrs,
            entry,
        }
    }
}
