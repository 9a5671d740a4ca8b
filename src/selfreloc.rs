//! Self-relocation of the loader's own image.
//!
//! The loader is position independent, so its globals that hold absolute
//! addresses (vtables and the like) are wrong until its own relative
//! relocations are applied. This must happen before any such global is
//! touched, which means nothing here may allocate or rely on crate state:
//! the routine works purely from the raw bytes at `base`.

use crate::{
    Result,
    arch::REL_RELATIVE,
    bootstrap_error,
    elf::{ElfDyn, ElfEhdr, ElfPhdr, ElfRela},
};
use elf::abi::{DT_NULL, DT_RELA, DT_RELASZ, ELFMAGIC, PT_DYNAMIC};

/// Load address assumed for the loader's own image when the kernel does not
/// report one in the auxiliary vector. The loader binary must be linked at
/// this base for the fallback to hold; platforms that supply `AT_BASE`
/// never reach it.
pub const FALLBACK_LOAD_BASE: usize = 0x0800_0000;

/// Applies the relative relocations of the image mapped at `base`.
///
/// Scans the program headers at `base` for the dynamic segment, walks its
/// `DT_RELA` table and patches every relative record with
/// `base + addend`. A missing dynamic segment is fatal: the loader cannot
/// run un-relocated.
///
/// # Safety
/// `base` must be the address of a mapped, well-formed ELF image whose
/// relative relocation targets are writable. Passing the loader's own load
/// address fixes up the loader itself.
pub unsafe fn relocate_self(base: usize) -> Result<()> {
    let ehdr = unsafe { &*(base as *const ElfEhdr) };
    if ehdr.e_ident[0..4] != ELFMAGIC {
        return Err(bootstrap_error("loader image has no ELF magic"));
    }

    let phdrs = unsafe {
        core::slice::from_raw_parts(
            (base + ehdr.e_phoff as usize) as *const ElfPhdr,
            ehdr.e_phnum as usize,
        )
    };
    let mut dynamic_addr = None;
    for phdr in phdrs {
        if phdr.p_type == PT_DYNAMIC {
            dynamic_addr = Some(base + phdr.p_vaddr as usize);
        }
    }
    let Some(dynamic_addr) = dynamic_addr else {
        return Err(bootstrap_error("loader image has no dynamic segment"));
    };

    let mut rela_addr = 0usize;
    let mut rela_size = 0usize;
    let mut cursor = dynamic_addr as *const ElfDyn;
    loop {
        let entry = unsafe { &*cursor };
        match entry.d_tag {
            DT_NULL => break,
            DT_RELA => rela_addr = base + entry.d_un as usize,
            DT_RELASZ => rela_size = entry.d_un as usize,
            _ => {}
        }
        cursor = unsafe { cursor.add(1) };
    }
    if rela_addr == 0 || rela_size == 0 {
        // Nothing to patch.
        return Ok(());
    }

    let relas = unsafe {
        core::slice::from_raw_parts(
            rela_addr as *const ElfRela,
            rela_size / size_of::<ElfRela>(),
        )
    };
    for rela in relas {
        if rela.r_type() != REL_RELATIVE {
            continue;
        }
        let target = (base + rela.r_offset as usize) as *mut usize;
        unsafe { target.write_unaligned(base.wrapping_add_signed(rela.r_addend as isize)) };
    }
    Ok(())
}
