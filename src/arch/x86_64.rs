//! x86_64 relocation types consumed by the link engine.

use elf::abi::*;

/// The ELF machine type for x86_64.
pub const EM_ARCH: u16 = EM_X86_64;

/// No-op relocation.
pub const REL_NONE: u32 = R_X86_64_NONE;
/// Relative relocation type - add base address to the stored offset.
pub const REL_RELATIVE: u32 = R_X86_64_RELATIVE;
/// GOT entry relocation type - set GOT entry to symbol address.
pub const REL_GOT: u32 = R_X86_64_GLOB_DAT;
/// Symbolic relocation type - set to absolute symbol address.
pub const REL_SYMBOLIC: u32 = R_X86_64_64;
/// Jump slot relocation type - bind a PLT slot to its symbol address.
pub const REL_JUMP_SLOT: u32 = R_X86_64_JUMP_SLOT;
/// TLS TPOFF relocation type - offset relative to the thread pointer.
pub const REL_TPOFF: u32 = R_X86_64_TPOFF64;

/// Map x86_64 relocation types to human readable names
pub(crate) fn rel_type_to_str(r_type: u32) -> &'static str {
    match r_type {
        R_X86_64_NONE => "R_X86_64_NONE",
        R_X86_64_64 => "R_X86_64_64",
        R_X86_64_GLOB_DAT => "R_X86_64_GLOB_DAT",
        R_X86_64_JUMP_SLOT => "R_X86_64_JUMP_SLOT",
        R_X86_64_RELATIVE => "R_X86_64_RELATIVE",
        R_X86_64_COPY => "R_X86_64_COPY",
        R_X86_64_IRELATIVE => "R_X86_64_IRELATIVE",
        R_X86_64_TPOFF64 => "R_X86_64_TPOFF64",
        R_X86_64_DTPMOD64 => "R_X86_64_DTPMOD64",
        R_X86_64_DTPOFF64 => "R_X86_64_DTPOFF64",
        _ => "UNKNOWN",
    }
}
