use gen_elf::{DylibWriter, RelocEntry, SymbolDesc};
use rtld::{
    Error,
    arch::{REL_GOT, REL_RELATIVE},
    os::{DefaultMmap, MapFlags, Mmap, ProtFlags},
    selfreloc::relocate_self,
};

/// Copies an image into a fresh writable mapping and returns its address,
/// standing in for the kernel having mapped the loader at that base.
fn map_image(bytes: &[u8]) -> usize {
    let len = (bytes.len() + 0xfff) & !0xfff;
    let ptr = unsafe {
        DefaultMmap::mmap_anonymous(
            0,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE,
        )
    }
    .unwrap();
    unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast(), bytes.len()) };
    ptr as usize
}

#[test]
fn relative_records_are_patched_with_base() {
    let image = DylibWriter::new()
        .symbol(SymbolDesc::global_object("self_sym", &[0u8; 8]))
        .reloc(RelocEntry::new(REL_RELATIVE).addend(0x1111))
        .reloc(RelocEntry::new(REL_RELATIVE).addend(0x2222))
        .reloc(RelocEntry::with_name("self_sym", REL_GOT))
        .write();

    let base = map_image(&image.data);
    unsafe { relocate_self(base) }.unwrap();

    let slot = |idx: usize| unsafe {
        ((base + image.reloc_offsets[idx] as usize) as *const usize).read_unaligned()
    };
    // Patched value is the stored offset plus the load base.
    assert_eq!(slot(0), base + 0x1111);
    assert_eq!(slot(1), base + 0x2222);
    // Only records of the self-relocating kind are touched.
    assert_eq!(slot(2), 0);
}

#[test]
fn image_without_elf_magic_is_fatal() {
    let bytes = vec![0u8; 0x1000];
    let base = map_image(&bytes);
    let err = unsafe { relocate_self(base) }.unwrap_err();
    assert!(matches!(err, Error::Bootstrap { .. }), "got {:?}", err);
}

#[test]
fn image_without_dynamic_segment_is_fatal() {
    let mut image = DylibWriter::new()
        .reloc(RelocEntry::new(REL_RELATIVE).addend(0x10))
        .write()
        .data;
    // Drop every program header; the dynamic segment vanishes with them.
    image[56..58].copy_from_slice(&0u16.to_le_bytes());
    let base = map_image(&image);
    let err = unsafe { relocate_self(base) }.unwrap_err();
    assert!(matches!(err, Error::Bootstrap { .. }), "got {:?}", err);
}
