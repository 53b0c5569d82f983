//! Heap-level allocation, retry, modification scopes and the write barrier

use std::sync::Arc;

use osprey_vm_gc::globals::MAX_REGULAR_HEAP_OBJECT_SIZE;
use osprey_vm_gc::{
    AllocationResult, AllocationSpace, ChunkFlags, CodePageMemoryModificationScope,
    CodeSpaceMemoryModificationScope, Heap, HeapConfig, PAGE_SIZE, Permission, RememberedSetType,
    Space, StdPageAllocator,
};

fn heap_with(config: HeapConfig) -> (Arc<StdPageAllocator>, Heap) {
    let pages = Arc::new(StdPageAllocator::new());
    let heap = Heap::with_page_allocator(config, pages.clone());
    (pages, heap)
}

fn allocate(heap: &mut Heap, size: usize, space: AllocationSpace) -> usize {
    heap.allocate_raw(size, space)
        .to_address()
        .unwrap_or_else(|| panic!("allocation of {size} bytes in {space} failed"))
}

#[test]
fn test_allocation_lands_in_requested_space() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    for space in [
        AllocationSpace::New,
        AllocationSpace::Old,
        AllocationSpace::Map,
        AllocationSpace::ReadOnly,
    ] {
        let object = allocate(&mut heap, 32, space);
        let chunk = heap.chunk_from_address(object).expect("owning chunk");
        assert_eq!(chunk.owner(), space);
        assert!(chunk.contains(object));
        assert!(heap.paged_space(space).expect("paged space").contains(object));
    }
    let young = allocate(&mut heap, 32, AllocationSpace::New);
    assert!(heap.chunk_from_address(young).expect("chunk").in_young_generation());
    let read_only = allocate(&mut heap, 32, AllocationSpace::ReadOnly);
    let chunk = heap.chunk_from_address(read_only).expect("chunk");
    assert!(chunk.in_read_only_space());
    assert!(chunk.marking_bitmap().expect("bitmap").is_set(0));
}

#[test]
fn test_objects_above_regular_size_go_to_large_object_space() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let object = allocate(&mut heap, MAX_REGULAR_HEAP_OBJECT_SIZE + 1, AllocationSpace::Old);
    let lo = heap
        .large_object_space(AllocationSpace::LargeObject)
        .expect("lo space");
    assert_eq!(lo.object_count(), 1);
    assert!(lo.contains(object));
    assert!(heap.chunk_from_address(object).expect("chunk").is_large_page());

    let base = heap.chunk_from_address(object).expect("chunk").address();
    assert!(heap.release_page(base));
    assert_eq!(
        heap.large_object_space(AllocationSpace::LargeObject)
            .expect("lo space")
            .object_count(),
        0
    );
}

#[test]
fn test_full_space_asks_for_retry() {
    let config = HeapConfig {
        max_old_space_bytes: PAGE_SIZE,
        ..HeapConfig::default()
    };
    let (_, mut heap) = heap_with(config);
    allocate(&mut heap, MAX_REGULAR_HEAP_OBJECT_SIZE, AllocationSpace::Old);
    let result = heap.allocate_raw(MAX_REGULAR_HEAP_OBJECT_SIZE, AllocationSpace::Old);
    assert_eq!(result, AllocationResult::Retry(AllocationSpace::Old));
    // Releasing pooled memory does not lift a space limit.
    assert!(heap
        .allocate_raw_with_retry(MAX_REGULAR_HEAP_OBJECT_SIZE, AllocationSpace::Old)
        .is_retry());
}

#[test]
fn test_retry_succeeds_after_pooled_memory_is_released() {
    let config = HeapConfig {
        max_reserved_bytes: 2 * PAGE_SIZE,
        chunk_pool_size: 4,
        ..HeapConfig::default()
    };
    let (pages, mut heap) = heap_with(config);
    let map_object = allocate(&mut heap, 64, AllocationSpace::Map);
    allocate(&mut heap, MAX_REGULAR_HEAP_OBJECT_SIZE, AllocationSpace::Old);
    assert_eq!(pages.allocation_count(), 2);

    let map_page = heap.chunk_from_address(map_object).expect("map page").address();
    assert!(heap.release_page(map_page));
    assert_eq!(heap.memory_allocator().queued_chunk_count(), 1);

    let result = heap.allocate_raw(MAX_REGULAR_HEAP_OBJECT_SIZE, AllocationSpace::Old);
    assert!(result.is_retry());
    let result = heap.allocate_raw_with_retry(MAX_REGULAR_HEAP_OBJECT_SIZE, AllocationSpace::Old);
    let object = result.to_address().expect("allocation after retry");
    assert_eq!(heap.memory_allocator().queued_chunk_count(), 0);
    assert_eq!(heap.memory_allocator().pooled_chunk_count(), 0);
    assert_eq!(heap.paged_space(AllocationSpace::Old).expect("old").page_count(), 2);
    assert!(heap.paged_space(AllocationSpace::Old).expect("old").contains(object));
}

#[test]
fn test_code_space_modification_scope_unprotects_code() {
    let (pages, mut heap) = heap_with(HeapConfig::default());
    let code = {
        let mut scope = CodeSpaceMemoryModificationScope::new(&mut heap);
        let code = allocate(&mut scope, 64, AllocationSpace::Code);
        assert_eq!(pages.permission_at(code), Some(Permission::ReadWrite));
        scope.write_code(code, &[0xC3; 16]).expect("write code");
        code
    };

    let chunk = heap.chunk_from_address(code).expect("code page");
    assert_eq!(chunk.write_unprotect_counter(), 0);
    assert_eq!(pages.permission_at(code), Some(Permission::ReadExecute));
    assert_eq!(chunk.read_bytes(code, 16), vec![0xC3; 16]);
    let registry = chunk.code_object_registry().expect("registry");
    assert!(registry.contains(code));
    assert_eq!(registry.get_code_object_start_from_inner_address(code + 8), code);

    {
        let mut scope = CodeSpaceMemoryModificationScope::new(&mut heap);
        assert_eq!(pages.permission_at(code), Some(Permission::ReadWrite));
        scope.write_code(code + 16, &[0x90]).expect("write code");
    }
    assert_eq!(pages.permission_at(code), Some(Permission::ReadExecute));
}

#[test]
fn test_jitless_code_is_readable_only() {
    let config = HeapConfig {
        jitless: true,
        ..HeapConfig::default()
    };
    let (pages, mut heap) = heap_with(config);
    let code = {
        let mut scope = CodeSpaceMemoryModificationScope::new(&mut heap);
        allocate(&mut scope, 64, AllocationSpace::Code)
    };
    assert_eq!(pages.permission_at(code), Some(Permission::Read));
}

#[test]
#[should_panic(expected = "outside a modification scope")]
fn test_code_write_without_scope_panics() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let code = allocate(&mut heap, 64, AllocationSpace::Code);
    let _ = heap.write_code(code, &[0]);
}

#[test]
fn test_code_page_modification_scope() {
    let (pages, mut heap) = heap_with(HeapConfig::default());
    let code = allocate(&mut heap, 64, AllocationSpace::Code);
    {
        let chunk = heap.chunk_from_address_mut(code).expect("code page");
        let mut scope = CodePageMemoryModificationScope::new(chunk);
        assert_eq!(scope.write_unprotect_counter(), 1);
        scope.write_bytes(code, &[1, 2, 3]);
    }
    assert_eq!(pages.permission_at(code), Some(Permission::ReadExecute));
    let chunk = heap.chunk_from_address(code).expect("code page");
    assert_eq!(chunk.read_bytes(code, 3), vec![1, 2, 3]);

    let data = allocate(&mut heap, 64, AllocationSpace::Old);
    let chunk = heap.chunk_from_address_mut(data).expect("data page");
    let mut scope = CodePageMemoryModificationScope::new(chunk);
    scope.write_bytes(data, &[7]);
}

#[test]
fn test_old_to_new_barrier() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let host = allocate(&mut heap, 64, AllocationSpace::Old);
    let young = allocate(&mut heap, 64, AllocationSpace::New);
    let old = allocate(&mut heap, 64, AllocationSpace::Old);

    let slot = host + 8;
    assert_eq!(heap.record_write(slot, young), Some(RememberedSetType::OldToNew));
    assert_eq!(heap.record_write(slot, old), None);
    assert_eq!(heap.record_write(young + 8, young), None);

    let chunk = heap.chunk_from_address(host).expect("host page");
    let set = chunk.slot_set(RememberedSetType::OldToNew).expect("slot set");
    assert!(set.contains(slot - chunk.address()));
    assert!(chunk.slot_set(RememberedSetType::OldToOld).is_none());
}

#[test]
fn test_old_to_old_barrier_while_compacting() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let host = allocate(&mut heap, 64, AllocationSpace::Old);
    let target = allocate(&mut heap, 64, AllocationSpace::Map);
    let target_page = heap.chunk_from_address(target).expect("map page").address();

    assert!(!heap.mark_evacuation_candidate(target_page));
    heap.start_marking(true);
    assert!(heap.mark_evacuation_candidate(target_page));
    let chunk = heap.chunk_from_address(target).expect("map page");
    assert!(chunk.is_flag_set(ChunkFlags::INCREMENTAL_MARKING));
    assert!(chunk.should_skip_evacuation_slot_recording());

    assert_eq!(
        heap.record_write(host + 16, target),
        Some(RememberedSetType::OldToOld)
    );
    // A candidate host does not record slots pointing out of itself.
    assert_eq!(heap.record_write(target + 8, target), None);

    heap.finish_marking();
    let chunk = heap.chunk_from_address(target).expect("map page");
    assert!(!chunk.is_evacuation_candidate());
    assert!(!chunk.is_flag_set(ChunkFlags::INCREMENTAL_MARKING));
    assert_eq!(heap.record_write(host + 16, target), None);
}

#[test]
fn test_invalidate_recorded_slots_follows_compaction() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    let object = allocate(&mut heap, 128, AllocationSpace::Old);
    assert!(heap.invalidate_recorded_slots(object, 128));
    let chunk = heap.chunk_from_address(object).expect("page");
    assert!(chunk.registered_object_with_invalidated_slots(RememberedSetType::OldToNew, object));
    assert!(!chunk.registered_object_with_invalidated_slots(RememberedSetType::OldToOld, object));

    heap.start_marking(true);
    let other = allocate(&mut heap, 128, AllocationSpace::Old);
    assert!(heap.invalidate_recorded_slots(other, 128));
    let chunk = heap.chunk_from_address(other).expect("page");
    assert!(chunk.registered_object_with_invalidated_slots(RememberedSetType::OldToOld, other));

    let young = allocate(&mut heap, 64, AllocationSpace::New);
    assert!(heap.invalidate_recorded_slots(young, 64));
    let chunk = heap.chunk_from_address(young).expect("page");
    assert!(!chunk.registered_object_with_invalidated_slots(RememberedSetType::OldToNew, young));
}

#[test]
fn test_committed_memory_tracks_pages() {
    let (_, mut heap) = heap_with(HeapConfig::default());
    assert_eq!(heap.committed_memory(), 0);
    allocate(&mut heap, 64, AllocationSpace::Old);
    allocate(&mut heap, 64, AllocationSpace::Map);
    assert_eq!(heap.committed_memory(), 2 * PAGE_SIZE);
    assert_eq!(heap.memory_allocator().size(), 2 * PAGE_SIZE);
    let old = heap.paged_space(AllocationSpace::Old).expect("old");
    assert_eq!(old.committed_memory(), PAGE_SIZE);
    assert_eq!(old.size_of_objects(), 64);
}
