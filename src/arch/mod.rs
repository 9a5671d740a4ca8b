//! Architecture-specific relocation constants.
//!
//! Each supported target exposes the same set of `REL_*` names so that the
//! link engine can dispatch on generic relocation kinds instead of raw
//! per-architecture type numbers.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use aarch64::*;
    } else if #[cfg(target_arch = "riscv64")] {
        mod riscv64;
        pub use riscv64::*;
    }
}
