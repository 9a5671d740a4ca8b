use gen_elf::{DylibWriter, RelocEntry, SymbolDesc};
use rtld::{
    Error, Loader,
    arch::{REL_GOT, REL_JUMP_SLOT, REL_RELATIVE, REL_TPOFF},
    input::{MemoryImage, MemoryLibraries},
    os::{DefaultMmap, DefaultRuntime},
};

type TestLoader = Loader<DefaultMmap, DefaultRuntime, MemoryLibraries>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn empty_dylib(needed: &[&str]) -> Vec<u8> {
    let mut writer = DylibWriter::new();
    for name in needed {
        writer = writer.needed(name);
    }
    writer.write().data
}

fn loader_with(libs: &[(&str, Vec<u8>)]) -> TestLoader {
    let mut provider = MemoryLibraries::new();
    for (name, bytes) in libs {
        provider.insert(name, bytes.clone());
    }
    Loader::new(provider)
}

fn map_root(loader: &mut TestLoader, name: &str, bytes: Vec<u8>) {
    loader
        .map_library(name, Box::new(MemoryImage::new(name, bytes)))
        .expect("failed to map root module");
}

unsafe fn read_slot(base: usize, slot: u64) -> usize {
    unsafe { ((base + slot as usize) as *const usize).read_unaligned() }
}

#[test]
fn diamond_dependency_is_registered_and_linked_once() {
    init_logger();
    // liba -> {libb, libc}, libb -> libd, libc -> libd. One of the edges
    // carries a directory prefix to exercise basename derivation.
    let liba = empty_dylib(&["/usr/lib/libb.so", "libc.so"]);
    let libb = empty_dylib(&["libd.so"]);
    let libc = empty_dylib(&["libd.so"]);
    let libd = empty_dylib(&[]);

    let mut loader = loader_with(&[
        ("libb.so", libb),
        ("libc.so", libc),
        ("libd.so", libd),
    ]);
    map_root(&mut loader, "liba.so", liba);
    loader.resolve_dependencies("liba.so").unwrap();

    assert_eq!(loader.registry().descriptors().count(), 4);
    for name in ["liba.so", "libb.so", "libc.so", "libd.so"] {
        assert!(loader.registry().contains(name), "{} missing", name);
    }

    loader.link_modules("liba.so").unwrap();
    let loaded = loader.registry().loaded();
    assert_eq!(loaded.len(), 4);
    // Dependencies first: libd can satisfy symbols for everyone after it.
    assert_eq!(loaded[0].name(), "libd.so");
    assert_eq!(loaded[3].name(), "liba.so");

    // Re-invoking on an already-linked name is a no-op.
    loader.link_modules("liba.so").unwrap();
    assert_eq!(loader.registry().loaded().len(), 4);
}

#[test]
fn dependency_cycle_terminates() {
    init_logger();
    let liba = empty_dylib(&["libb.so"]);
    let libb = empty_dylib(&["liba.so"]);

    let mut loader = loader_with(&[("libb.so", libb)]);
    map_root(&mut loader, "liba.so", liba);
    loader.resolve_dependencies("liba.so").unwrap();
    assert_eq!(loader.registry().descriptors().count(), 2);

    loader.link_modules("liba.so").unwrap();
    assert_eq!(loader.registry().loaded().len(), 2);
}

#[test]
fn tls_offsets_are_contiguous_and_disjoint() {
    init_logger();
    let liba = DylibWriter::new()
        .needed("libb.so")
        .tls(16, &[])
        .write()
        .data;
    let libb = DylibWriter::new()
        .needed("libc.so")
        .tls(32, &[])
        .write()
        .data;
    let libc = empty_dylib(&["libd.so"]); // no TLS requirement
    let libd = DylibWriter::new().tls(8, &[]).write().data;

    let mut loader = loader_with(&[
        ("libb.so", libb),
        ("libc.so", libc),
        ("libd.so", libd),
    ]);
    map_root(&mut loader, "liba.so", liba);
    loader.resolve_dependencies("liba.so").unwrap();

    let registry = loader.registry();
    let offset = |name: &str| registry.get(name).unwrap().tls_offset();
    let size = |name: &str| registry.get(name).unwrap().tls_size();
    assert_eq!((offset("liba.so"), size("liba.so")), (0, 16));
    assert_eq!((offset("libb.so"), size("libb.so")), (16, 32));
    assert_eq!((offset("libc.so"), size("libc.so")), (48, 0));
    assert_eq!((offset("libd.so"), size("libd.so")), (48, 8));
    assert_eq!(loader.total_tls_size(), 56);

    loader.allocate_tls().unwrap();
    assert_eq!(loader.tls_block().unwrap().len(), 56);
}

#[test]
fn zero_tls_total_reserves_no_block() {
    init_logger();
    let mut loader = loader_with(&[]);
    map_root(&mut loader, "main", empty_dylib(&[]));
    loader.resolve_dependencies("main").unwrap();
    loader.allocate_tls().unwrap();
    assert_eq!(loader.total_tls_size(), 0);
    assert!(loader.tls_block().is_none());
}

#[test]
fn first_loaded_module_wins_symbol_lookup() {
    init_logger();
    let libb = DylibWriter::new()
        .symbol(SymbolDesc::global_object("shared_sym", &[1u8; 8]))
        .write()
        .data;
    let libc = DylibWriter::new()
        .symbol(SymbolDesc::global_object("shared_sym", &[2u8; 8]))
        .write()
        .data;
    let main = DylibWriter::new()
        .needed("libb.so")
        .needed("libc.so")
        .symbol(SymbolDesc::undefined("shared_sym"))
        .reloc(RelocEntry::with_name("shared_sym", REL_GOT))
        .write();

    let mut loader = loader_with(&[("libb.so", libb), ("libc.so", libc)]);
    map_root(&mut loader, "main", main.data);
    loader.resolve_dependencies("main").unwrap();
    loader.allocate_tls().unwrap();
    loader.link_modules("main").unwrap();

    let registry = loader.registry();
    let libb_addr = registry
        .get_loaded("libb.so")
        .unwrap()
        .symbol_address("shared_sym")
        .unwrap();
    let libc_addr = registry
        .get_loaded("libc.so")
        .unwrap()
        .symbol_address("shared_sym")
        .unwrap();
    assert_ne!(libb_addr, libc_addr);

    let main_obj = registry.get_loaded("main").unwrap();
    let bound = unsafe { read_slot(main_obj.base(), main.reloc_offsets[0]) };
    // libb finished linking first, so its definition wins.
    assert_eq!(bound, libb_addr);
}

#[test]
fn relative_relocation_adds_base_to_stored_value() {
    init_logger();
    let main = DylibWriter::new()
        .reloc(RelocEntry::new(REL_RELATIVE).addend(0x1234))
        .reloc(RelocEntry::new(REL_RELATIVE).addend(0x8_0000))
        .write();

    let mut loader = loader_with(&[]);
    map_root(&mut loader, "main", main.data);
    loader.resolve_dependencies("main").unwrap();
    loader.allocate_tls().unwrap();
    loader.link_modules("main").unwrap();

    let obj = loader.registry().get_loaded("main").unwrap();
    let base = obj.base();
    assert_eq!(unsafe { read_slot(base, main.reloc_offsets[0]) }, base + 0x1234);
    assert_eq!(
        unsafe { read_slot(base, main.reloc_offsets[1]) },
        base + 0x8_0000
    );
}

#[test]
fn jump_slot_binds_eagerly_to_dependency_export() {
    init_logger();
    let libx = DylibWriter::new()
        .symbol(SymbolDesc::global_object("ext_func", &[0x90u8; 16]))
        .write();
    let main = DylibWriter::new()
        .needed("libx.so")
        .symbol(SymbolDesc::undefined("ext_func"))
        .reloc(RelocEntry::with_name("ext_func", REL_JUMP_SLOT))
        .write();

    let mut loader = loader_with(&[("libx.so", libx.data)]);
    map_root(&mut loader, "main", main.data);
    loader.resolve_dependencies("main").unwrap();
    loader.allocate_tls().unwrap();
    loader.link_modules("main").unwrap();

    let registry = loader.registry();
    let expected = registry
        .get_loaded("libx.so")
        .unwrap()
        .symbol_address("ext_func")
        .unwrap();
    let main_obj = registry.get_loaded("main").unwrap();
    assert_eq!(
        unsafe { read_slot(main_obj.base(), main.reloc_offsets[0]) },
        expected
    );
}

#[test]
fn module_defined_symbol_binds_locally() {
    init_logger();
    let main = DylibWriter::new()
        .symbol(SymbolDesc::global_object("own_sym", &[7u8; 8]))
        .reloc(RelocEntry::with_name("own_sym", REL_GOT))
        .write();

    let mut loader = loader_with(&[]);
    map_root(&mut loader, "main", main.data);
    loader.resolve_dependencies("main").unwrap();
    loader.allocate_tls().unwrap();
    loader.link_modules("main").unwrap();

    let obj = loader.registry().get_loaded("main").unwrap();
    let expected = obj.base() + main.symbol_vaddrs["own_sym"] as usize;
    assert_eq!(
        unsafe { read_slot(obj.base(), main.reloc_offsets[0]) },
        expected
    );
}

#[test]
fn tpoff_relocation_is_thread_pointer_relative() {
    init_logger();
    let libx = DylibWriter::new()
        .tls(16, &[0xAA, 0xBB, 0xCC, 0xDD])
        .symbol(SymbolDesc::global_tls("tvar", 4, 4))
        .write()
        .data;
    let main = DylibWriter::new()
        .needed("libx.so")
        .symbol(SymbolDesc::undefined_tls("tvar"))
        .reloc(RelocEntry::with_name("tvar", REL_TPOFF))
        .write();

    let mut loader = loader_with(&[("libx.so", libx)]);
    map_root(&mut loader, "main", main.data);
    loader.resolve_dependencies("main").unwrap();
    loader.allocate_tls().unwrap();
    loader.link_modules("main").unwrap();

    // main holds no TLS, libx's slice starts at offset 0 of a 16-byte
    // block; the thread pointer sits at the end of the block, so the
    // variable at slice offset 4 lives 12 bytes below it.
    let expected = 4usize.wrapping_sub(16);
    let obj = loader.registry().get_loaded("main").unwrap();
    assert_eq!(
        unsafe { read_slot(obj.base(), main.reloc_offsets[0]) },
        expected
    );
}

#[test]
fn unresolved_symbol_aborts_linking() {
    init_logger();
    let libx = empty_dylib(&[]);
    let main = DylibWriter::new()
        .needed("libx.so")
        .symbol(SymbolDesc::undefined("missing_sym"))
        .reloc(RelocEntry::with_name("missing_sym", REL_GOT))
        .write();

    let mut loader = loader_with(&[("libx.so", libx)]);
    map_root(&mut loader, "main", main.data);
    loader.resolve_dependencies("main").unwrap();
    loader.allocate_tls().unwrap();

    let err = loader.link_modules("main").unwrap_err();
    assert!(matches!(err, Error::Link { .. }), "got {:?}", err);
    // The dependency was linked before the failure, nothing after it.
    assert_eq!(loader.registry().loaded().len(), 1);
    assert!(!loader.registry().is_loaded("main"));
}

#[test]
fn missing_library_is_fatal() {
    init_logger();
    let main = empty_dylib(&["libnowhere.so"]);
    let mut loader = loader_with(&[]);
    map_root(&mut loader, "main", main);
    let err = loader.resolve_dependencies("main").unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "got {:?}", err);
}

#[test]
fn end_to_end_main_with_tls_library() {
    init_logger();
    let libx = DylibWriter::new().tls(16, &[]).write().data;
    let main = DylibWriter::new()
        .needed("libx.so")
        .symbol(SymbolDesc::global_object("start", &[0x90u8; 8]))
        .entry(0)
        .write();

    let mut loader = loader_with(&[("libx.so", libx)]);
    map_root(&mut loader, "main", main.data);
    loader.resolve_dependencies("main").unwrap();

    // Registry contains exactly the main program and its library.
    assert_eq!(loader.registry().descriptors().count(), 2);
    assert!(loader.registry().contains("main"));
    assert!(loader.registry().contains("libx.so"));

    loader.allocate_tls().unwrap();
    assert_eq!(loader.total_tls_size(), 16);
    assert_eq!(loader.registry().get("libx.so").unwrap().tls_offset(), 0);
    assert_eq!(loader.tls_block().unwrap().len(), 16);

    loader.link_modules("main").unwrap();
    let loaded = loader.registry().loaded();
    assert_eq!(loaded.len(), 2);
    // The library is linked before the program that needs it.
    assert_eq!(loaded[0].name(), "libx.so");
    assert_eq!(loaded[1].name(), "main");

    // Entry point resolves to the declared entry plus the load base.
    let main_obj = loader.registry().get_loaded("main").unwrap();
    assert_eq!(
        loader.entry_point("main").unwrap(),
        main_obj.base() + main.entry as usize
    );
}
