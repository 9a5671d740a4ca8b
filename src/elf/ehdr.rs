//! ELF header parsing and validation
//!
//! Validates that an image is something this loader can handle at all:
//! right magic, right class, right version, right machine.

use crate::{
    Result,
    arch::EM_ARCH,
    elf::{E_CLASS, EHDR_SIZE, ElfEhdr},
    format_error,
};
use alloc::format;
use core::ops::Deref;
use elf::abi::{EI_CLASS, EI_VERSION, ELFMAGIC, ET_DYN, ET_EXEC, EV_CURRENT};

/// A wrapper around the ELF header structure
///
/// Provides validated access to header fields; an [`ElfHeader`] only comes
/// into existence for images that pass [`validate`](ElfHeader::validate).
#[repr(transparent)]
#[derive(Clone)]
pub struct ElfHeader {
    ehdr: ElfEhdr,
}

impl Deref for ElfHeader {
    type Target = ElfEhdr;

    fn deref(&self) -> &Self::Target {
        &self.ehdr
    }
}

impl ElfHeader {
    /// Creates a new `ElfHeader` from raw data, validating it for the target
    /// architecture.
    ///
    /// # Errors
    /// Returns an error if the data does not represent a loadable ELF header.
    pub(crate) fn new(data: &[u8]) -> Result<&Self> {
        debug_assert!(data.len() >= EHDR_SIZE);
        let ehdr: &ElfHeader = unsafe { &*(data.as_ptr().cast()) };
        ehdr.validate()?;
        Ok(ehdr)
    }

    /// Returns `true` if the ELF file is a dynamic library (shared object).
    #[inline]
    pub fn is_dylib(&self) -> bool {
        self.ehdr.e_type == ET_DYN
    }

    /// Returns `true` if the ELF file can be executed (a fixed-address
    /// executable or a position-independent one).
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.ehdr.e_type == ET_EXEC || self.ehdr.e_type == ET_DYN
    }

    /// Validates the ELF header magic, class, version, and architecture.
    pub fn validate(&self) -> Result<()> {
        if self.e_ident[0..4] != ELFMAGIC {
            return Err(format_error("invalid ELF magic"));
        }

        if self.e_ident[EI_CLASS] != E_CLASS {
            return Err(format_error(format!(
                "file class mismatch: expected {}, found {}",
                E_CLASS, self.e_ident[EI_CLASS]
            )));
        }

        if self.e_ident[EI_VERSION] != EV_CURRENT {
            return Err(format_error("invalid ELF version"));
        }

        if self.e_machine != EM_ARCH {
            return Err(format_error(format!(
                "file arch mismatch: expected {}, found {}",
                machine_to_str(EM_ARCH),
                machine_to_str(self.e_machine),
            )));
        }

        Ok(())
    }

    /// Returns the number of program headers.
    #[inline]
    pub fn e_phnum(&self) -> usize {
        self.ehdr.e_phnum as usize
    }

    /// Returns the size of each program header entry.
    #[inline]
    pub fn e_phentsize(&self) -> usize {
        self.ehdr.e_phentsize as usize
    }

    /// Returns the file offset of the program header table.
    #[inline]
    pub fn e_phoff(&self) -> usize {
        self.ehdr.e_phoff as usize
    }
}

fn machine_to_str(machine: u16) -> &'static str {
    match machine {
        elf::abi::EM_X86_64 => "x86_64",
        elf::abi::EM_AARCH64 => "AArch64",
        elf::abi::EM_RISCV => "RISC-V",
        _ => "unknown",
    }
}
