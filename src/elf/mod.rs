//! Raw ELF data structures shared by the image view and the link engine.
//!
//! Only the 64-bit structures the loader actually consumes are defined here:
//! the file header, program headers, dynamic entries, RELA relocation records
//! and dynamic symbols. Everything else in the format is out of scope.

mod defs;
mod ehdr;

pub(crate) use defs::*;

pub use defs::{ElfDyn, ElfPhdr, ElfRela, ElfSymbol};
pub use ehdr::ElfHeader;
