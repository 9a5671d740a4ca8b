//! RISC-V 64-bit relocation types consumed by the link engine.

use elf::abi::*;

/// The ELF machine type for RISC-V.
pub const EM_ARCH: u16 = EM_RISCV;

/// No-op relocation.
pub const REL_NONE: u32 = R_RISCV_NONE;
/// Relative relocation type - add base address to the stored offset.
pub const REL_RELATIVE: u32 = R_RISCV_RELATIVE;
/// GOT entry relocation type - set GOT entry to symbol address.
pub const REL_GOT: u32 = R_RISCV_64;
/// Symbolic relocation type - set to absolute symbol address.
pub const REL_SYMBOLIC: u32 = R_RISCV_64;
/// Jump slot relocation type - bind a PLT slot to its symbol address.
pub const REL_JUMP_SLOT: u32 = R_RISCV_JUMP_SLOT;
/// TLS TPOFF relocation type - offset relative to the thread pointer.
pub const REL_TPOFF: u32 = R_RISCV_TLS_TPREL64;

/// Map RISC-V relocation types to human readable names
pub(crate) fn rel_type_to_str(r_type: u32) -> &'static str {
    match r_type {
        R_RISCV_NONE => "R_RISCV_NONE",
        R_RISCV_64 => "R_RISCV_64",
        R_RISCV_RELATIVE => "R_RISCV_RELATIVE",
        R_RISCV_JUMP_SLOT => "R_RISCV_JUMP_SLOT",
        R_RISCV_TLS_TPREL64 => "R_RISCV_TLS_TPREL64",
        R_RISCV_COPY => "R_RISCV_COPY",
        R_RISCV_IRELATIVE => "R_RISCV_IRELATIVE",
        _ => "UNKNOWN",
    }
}
