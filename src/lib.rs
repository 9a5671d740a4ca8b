//! # rtld
//!
//! **rtld** is a runtime dynamic loader. Handed a process image by the kernel
//! after `exec`, it fixes up its own position-independent code, discovers the
//! shared libraries the program depends on, lays thread-local storage out
//! across all of them, maps and relocates every module, and finally jumps to
//! the program's real entry point.
//!
//! It runs with no runtime support available yet: there is no heap, no
//! initialized stdio and no environment until the loader bootstraps those
//! itself. The crate is therefore `no_std` and keeps its earliest code paths
//! allocation-free.
//!
//! ## Core pieces
//!
//! * **Self-relocation**: the loader patches its own relative relocations
//!   before touching any global state ([`selfreloc`]).
//! * **Dependency discovery**: a depth-first walk over needed-library edges
//!   that tolerates cycles ([`Loader::resolve_dependencies`]).
//! * **TLS layout**: every module gets a disjoint slice of one contiguous
//!   thread-local block ([`tls`]).
//! * **Linking**: segments are mapped, relocations applied and symbols
//!   resolved through a global first-match lookup ([`Loader::link_modules`]).
//!
//! ## Quick start
//!
//! ```no_run
//! use rtld::{Loader, input::{MemoryImage, MemoryLibraries}};
//! use rtld::os::{DefaultMmap, DefaultRuntime};
//!
//! fn main() -> rtld::Result<()> {
//!     let mut libs = MemoryLibraries::new();
//!     libs.insert("libm.so", std::fs::read("target/libm.so").unwrap());
//!
//!     let mut loader = Loader::<DefaultMmap, DefaultRuntime, _>::new(libs);
//!     let main = std::fs::read("target/app").unwrap();
//!     loader.map_library("main", Box::new(MemoryImage::new("main", main)))?;
//!     loader.resolve_dependencies("main")?;
//!     loader.allocate_tls()?;
//!     loader.link_modules("main")?;
//!     let entry = loader.entry_point("main")?;
//!     let _ = entry;
//!     Ok(())
//! }
//! ```
//!
//! When built as an actual loader binary, the platform startup shim calls
//! [`loader_entry`] with the kernel-provided `argc`/`argv`/`envp` and never
//! returns.
#![no_std]
#![warn(
    clippy::unnecessary_wraps,
    clippy::unnecessary_lazy_evaluations,
    clippy::collapsible_if,
    clippy::cast_lossless,
    clippy::explicit_iter_loop,
    clippy::manual_assert,
    clippy::needless_question_mark,
    clippy::redundant_clone,
    clippy::redundant_else
)]
#![allow(clippy::len_without_is_empty)]
extern crate alloc;

/// Compile-time check for supported architectures
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "riscv64",
)))]
compile_error!(
    "Unsupported target architecture. Supported architectures: x86_64, aarch64, riscv64"
);

pub mod arch;
pub mod auxv;
mod bootstrap;
pub mod elf;
mod error;
pub mod image;
pub mod input;
mod link;
mod loader;
pub mod module;
pub mod os;
mod registry;
mod segment;
pub mod selfreloc;
pub mod tls;

pub(crate) use error::*;

pub use bootstrap::{Bootstrap, EntryFn, MAIN_PROGRAM, Phase, loader_entry};
pub use error::Error;
pub use loader::Loader;
pub use registry::Registry;

/// A type alias for `Result`s returned by `rtld` functions.
///
/// This is a convenience alias that eliminates the need to repeatedly specify
/// the `Error` type in function signatures.
pub type Result<T> = core::result::Result<T, Error>;
