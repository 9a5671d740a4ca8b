use elf::abi::{ELFCLASS64, SHN_UNDEF};

/// Size in bytes of the ELF file header.
pub(crate) const EHDR_SIZE: usize = size_of::<ElfEhdr>();
/// Size in bytes of one program header entry.
pub(crate) const PHDR_SIZE: usize = size_of::<ElfPhdr>();
/// Expected ELF class for this loader (64-bit only).
pub(crate) const E_CLASS: u8 = ELFCLASS64;

/// ELF file header.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ElfEhdr {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// Program header entry.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ElfPhdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// Dynamic section entry.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ElfDyn {
    pub d_tag: i64,
    pub d_un: u64,
}

/// Relocation record with explicit addend.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ElfRela {
    pub r_offset: u64,
    pub r_info: u64,
    pub r_addend: i64,
}

impl ElfRela {
    /// Relocation type encoded in the low half of `r_info`.
    #[inline]
    pub fn r_type(&self) -> u32 {
        (self.r_info & 0xffff_ffff) as u32
    }

    /// Symbol table index encoded in the high half of `r_info`.
    #[inline]
    pub fn r_symbol(&self) -> usize {
        (self.r_info >> 32) as usize
    }
}

/// Dynamic symbol table entry.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ElfSymbol {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl ElfSymbol {
    /// Symbol binding (`STB_*`).
    #[inline]
    pub fn st_bind(&self) -> u8 {
        self.st_info >> 4
    }

    /// Symbol type (`STT_*`).
    #[inline]
    pub fn st_type(&self) -> u8 {
        self.st_info & 0xf
    }

    /// Whether the symbol is a reference without a definition in this image.
    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.st_shndx == SHN_UNDEF
    }
}
