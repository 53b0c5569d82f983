//! Stub cache: lookup, regeneration, ahead-of-time generation and placement

use std::sync::Arc;

use osprey_vm_gc::{AllocationSpace, Heap, HeapConfig, Permission, StdPageAllocator};
use osprey_vm_ir::StackCheckKind;
use osprey_vm_jit::stubs::ahead_of_time_stubs;
use osprey_vm_jit::{
    CodeStub, CodeStubKey, ElementAddressStub, FieldRepresentation, LoadFieldStub, Major,
    StackCheckStub, StoreFieldStub, StubCache, StubCacheConfig, StubError,
};

fn heap_with(config: HeapConfig) -> (Arc<StdPageAllocator>, Heap) {
    let pages = Arc::new(StdPageAllocator::new());
    let heap = Heap::with_page_allocator(config, pages.clone());
    (pages, heap)
}

#[test]
fn test_equal_keys_share_code() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let mut cache = StubCache::new(StubCacheConfig::default());

    let first = cache
        .get_code(&mut heap, &StoreFieldStub::new(8, FieldRepresentation::Tagged, true))
        .expect("generated");
    let second = cache
        .get_code(&mut heap, &StoreFieldStub::new(8, FieldRepresentation::Tagged, true))
        .expect("cached");
    assert_eq!(first.address, second.address);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().stubs_generated, 1);
    assert_eq!(cache.stats().cache_hits, 1);
}

#[test]
fn test_distinct_keys_get_distinct_code() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let mut cache = StubCache::new(StubCacheConfig::default());
    let stubs: Vec<Box<dyn CodeStub>> = vec![
        Box::new(StoreFieldStub::new(8, FieldRepresentation::Tagged, true)),
        Box::new(StoreFieldStub::new(8, FieldRepresentation::Tagged, false)),
        Box::new(LoadFieldStub::new(8, FieldRepresentation::Tagged)),
        Box::new(ElementAddressStub::new(2, 16)),
    ];

    let codes: Vec<_> = stubs
        .iter()
        .map(|stub| cache.get_code(&mut heap, stub.as_ref()).expect("generated"))
        .collect();
    for (i, a) in codes.iter().enumerate() {
        for b in &codes[i + 1..] {
            assert_ne!(a.key, b.key);
            assert!(!a.contains(b.address));
            assert!(!b.contains(a.address));
        }
    }
    assert_eq!(cache.len(), stubs.len());
    assert_eq!(
        cache.stats().total_code_bytes,
        codes.iter().map(|code| code.size).sum::<usize>()
    );
}

#[test]
fn test_lookup_by_key_rebuilds_the_stub() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let mut cache = StubCache::new(StubCacheConfig::default());
    let stub = ElementAddressStub::new(3, 24);

    let by_key = cache
        .get_code_by_key(&mut heap, stub.key())
        .expect("generated from key");
    let by_stub = cache.get_code(&mut heap, &stub).expect("cached");
    assert_eq!(by_key, by_stub);
    assert_eq!(cache.stats().stubs_generated, 1);
}

#[test]
fn test_lookup_by_bad_key_fails() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let mut cache = StubCache::new(StubCacheConfig::default());

    let unknown = CodeStubKey::from_raw(0xFF);
    assert_eq!(
        cache.get_code_by_key(&mut heap, unknown),
        Err(StubError::UnknownMajorKey(0xFF))
    );

    let bad_minor = CodeStubKey::new(Major::StackCheck, 9);
    assert_eq!(
        cache.get_code_by_key(&mut heap, bad_minor),
        Err(StubError::InvalidMinorKey {
            major: "StackCheckStub",
            minor: 9,
        })
    );
    assert!(cache.is_empty());
}

#[test]
fn test_deleted_stub_is_regenerated() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let mut cache = StubCache::new(StubCacheConfig::default());
    let stub = StackCheckStub::new(StackCheckKind::JsFunctionEntry);

    let first = cache.get_code(&mut heap, &stub).expect("generated");
    assert!(cache.delete_stub_from_cache_for_testing(&stub).is_some());
    assert!(cache.delete_stub_from_cache_for_testing(&stub).is_none());

    let second = cache.get_code(&mut heap, &stub).expect("regenerated");
    assert_ne!(first.address, second.address);
    assert_eq!(
        StubCache::disassemble(&heap, &first).expect("old code"),
        StubCache::disassemble(&heap, &second).expect("new code")
    );
}

#[test]
fn test_ahead_of_time_generation() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let config = StubCacheConfig {
        generate_ahead_of_time: true,
        ..StubCacheConfig::default()
    };
    let mut cache = StubCache::with_heap(config, &mut heap).expect("ahead-of-time stubs");

    let expected = ahead_of_time_stubs();
    assert_eq!(cache.len(), expected.len());
    assert_eq!(cache.stats().stubs_generated, expected.len());
    for stub in &expected {
        assert!(cache.find(stub.key()).is_some(), "{} missing", stub.key());
    }

    cache
        .get_code(&mut heap, &LoadFieldStub::new(16, FieldRepresentation::Tagged))
        .expect("cached");
    assert_eq!(cache.stats().cache_hits, 1);
    assert_eq!(cache.stats().stubs_generated, expected.len());
}

#[test]
fn test_lazy_cache_starts_empty() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let cache = StubCache::with_heap(StubCacheConfig::default(), &mut heap).expect("cache");
    assert!(cache.is_empty());
    assert_eq!(heap.committed_memory(), 0);
}

#[test]
fn test_placed_code_is_executable_and_readable_back() {
    let (pages, mut heap) = heap_with(HeapConfig::default());
    let mut cache = StubCache::new(StubCacheConfig::default());
    let stub = LoadFieldStub::new(24, FieldRepresentation::Word64);

    let code = cache.get_code(&mut heap, &stub).expect("generated");
    assert_eq!(pages.permission_at(code.address), Some(Permission::ReadExecute));

    let chunk = heap.chunk_from_address(code.address).expect("code page");
    assert_eq!(chunk.owner(), AllocationSpace::Code);
    assert_eq!(chunk.write_unprotect_counter(), 0);
    assert!(chunk
        .code_object_registry()
        .expect("registry")
        .contains(code.address));

    let decoded = StubCache::disassemble(&heap, &code).expect("decoded");
    assert_eq!(decoded.key, stub.key());
    assert_eq!(decoded.instructions.len(), code.instruction_count);
}

#[test]
fn test_full_code_space_fails_placement() {
    let config = HeapConfig {
        max_code_space_bytes: 0,
        ..HeapConfig::default()
    };
    let (_, mut heap) = heap_with(config);
    let mut cache = StubCache::new(StubCacheConfig::default());

    let result = cache.get_code(&mut heap, &LoadFieldStub::new(0, FieldRepresentation::Tagged));
    assert!(matches!(
        result,
        Err(StubError::PlacementFailed {
            space: AllocationSpace::Code,
            ..
        })
    ));
    assert!(cache.is_empty());
    assert_eq!(cache.stats().stubs_generated, 0);
}
