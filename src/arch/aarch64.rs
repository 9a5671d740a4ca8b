//! AArch64 relocation types consumed by the link engine.

use elf::abi::*;

/// The ELF machine type for AArch64.
pub const EM_ARCH: u16 = EM_AARCH64;

/// No-op relocation.
pub const REL_NONE: u32 = R_AARCH64_NONE;
/// Relative relocation type - add base address to the stored offset.
pub const REL_RELATIVE: u32 = R_AARCH64_RELATIVE;
/// GOT entry relocation type - set GOT entry to symbol address.
pub const REL_GOT: u32 = R_AARCH64_GLOB_DAT;
/// Symbolic relocation type - set to absolute symbol address.
pub const REL_SYMBOLIC: u32 = R_AARCH64_ABS64;
/// Jump slot relocation type - bind a PLT slot to its symbol address.
pub const REL_JUMP_SLOT: u32 = R_AARCH64_JUMP_SLOT;
/// TLS TPOFF relocation type - offset relative to the thread pointer.
pub const REL_TPOFF: u32 = 1030; // R_AARCH64_TLS_TPREL64

/// Map AArch64 relocation types to human readable names
pub(crate) fn rel_type_to_str(r_type: u32) -> &'static str {
    match r_type {
        R_AARCH64_NONE => "R_AARCH64_NONE",
        R_AARCH64_ABS64 => "R_AARCH64_ABS64",
        R_AARCH64_GLOB_DAT => "R_AARCH64_GLOB_DAT",
        R_AARCH64_JUMP_SLOT => "R_AARCH64_JUMP_SLOT",
        R_AARCH64_RELATIVE => "R_AARCH64_RELATIVE",
        1030 => "R_AARCH64_TLS_TPREL64",
        _ => "UNKNOWN",
    }
}
