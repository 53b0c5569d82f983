//! Memory chunks
//!
//! A [`MemoryChunk`] describes one aligned region reserved from the page
//! allocator: where its object area lies, which space owns it, the flags
//! the write barrier reads, and the side tables the collector keeps per
//! chunk (mark bitmaps, remembered sets, free lists).
//!
//! ## Code pages
//!
//! Executable chunks are write protected. Writers bracket their writes
//! with [`MemoryChunk::set_read_and_writable`] and one of
//! [`MemoryChunk::set_read_and_executable`] / [`MemoryChunk::set_readable`].
//! The brackets nest through a counter kept under a mutex; only the
//! outermost pair changes page permissions.
//!
//! ## Remembered sets
//!
//! Slot sets are allocated lazily by whichever GC thread records the
//! first slot. Racing threads each allocate, one publishes with a
//! compare-and-swap and the others free their copy. Releasing any side
//! table needs `&mut self`.

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering, fence};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::array_buffer_tracker::LocalArrayBufferTracker;
use crate::bitmap::Bitmap;
use crate::code_object_registry::CodeObjectRegistry;
use crate::flags::{AtomicChunkFlags, ChunkFlags};
use crate::free_list::FreeListCategories;
use crate::globals::{
    Address, AllocationSpace, Executability, ExternalBackingStoreType, FREE_SPACE_HEADER_SIZE,
    RememberedSetType, round_down, round_up,
};
use crate::invalidated_slots::InvalidatedSlots;
use crate::layout::MemoryChunkLayout;
use crate::lazy_box::LazyBox;
use crate::page_allocator::{Permission, VirtualMemory};
use crate::slot_set::{PossiblyEmptyBuckets, SlotSet};
use crate::typed_slot_set::TypedSlotSet;

/// Heap state a chunk needs to pick code page permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeProtection {
    /// Keep code pages non-writable outside modification scopes
    pub write_protect_code_memory: bool,
    /// Generated code is never executed
    pub jitless: bool,
    /// Number of open code-space modification scopes
    pub modification_scope_depth: usize,
}

impl CodeProtection {
    /// Permission of code pages outside modification scopes
    pub const fn default_code_permission(&self) -> Permission {
        if self.jitless {
            Permission::Read
        } else {
            Permission::ReadExecute
        }
    }

    /// Permission of code pages when write protection is off
    pub const fn default_writable_code_permission(&self) -> Permission {
        if self.jitless {
            Permission::ReadWrite
        } else {
            Permission::ReadWriteExecute
        }
    }
}

/// One reserved, aligned heap region and its collector bookkeeping
pub struct MemoryChunk {
    reservation: VirtualMemory,
    layout: MemoryChunkLayout,
    address: Address,
    size: usize,
    area_start: Address,
    area_end: Address,
    owner: AllocationSpace,
    executable: Executability,
    protection: CodeProtection,
    flags: AtomicChunkFlags,

    /// Serializes multi-set updates of the invalidated-slot tables
    mutex: Option<Box<Mutex<()>>>,
    /// Guards the write-unprotect counter together with the syscalls it drives
    page_protection_change_mutex: Option<Box<Mutex<usize>>>,

    slot_sets: [LazyBox<SlotSet>; 2],
    sweeping_slot_set: LazyBox<SlotSet>,
    typed_slot_sets: [LazyBox<TypedSlotSet>; 2],
    invalidated_slots: [Mutex<Option<InvalidatedSlots>>; 2],
    slot_set_race_losses: AtomicUsize,

    marking_bitmap: Option<Box<Bitmap>>,
    young_generation_bitmap: Option<Box<Bitmap>>,
    code_object_registry: Option<Box<CodeObjectRegistry>>,
    possibly_empty_buckets: Option<Box<PossiblyEmptyBuckets>>,
    local_tracker: Option<Box<LocalArrayBufferTracker>>,
    categories: Option<Box<FreeListCategories>>,

    live_bytes: CachePadded<AtomicIsize>,
    allocated_bytes: AtomicUsize,
    wasted_memory: AtomicUsize,
    /// Offset of the highest address ever handed out
    high_water_mark: CachePadded<AtomicUsize>,
    external_backing_store_bytes: [AtomicUsize; 2],
}

impl MemoryChunk {
    /// Take over a reserved region and set up empty bookkeeping.
    ///
    /// The region must already carry the permissions the allocator lays
    /// out for the chunk kind. Executable chunks either join the open
    /// code-space modification scopes or, without write protection, get
    /// their object area made writable and executable right here.
    pub(crate) fn initialize(
        reservation: VirtualMemory,
        area_start: Address,
        area_end: Address,
        executable: Executability,
        owner: AllocationSpace,
        protection: CodeProtection,
    ) -> Box<Self> {
        let address = reservation.address();
        let size = reservation.size();
        debug_assert!(reservation.in_vm(area_start, area_end - area_start));
        let layout = MemoryChunkLayout::new(reservation.page_allocator().commit_page_size());

        let mut chunk = Box::new(Self {
            reservation,
            layout,
            address,
            size,
            area_start,
            area_end,
            owner,
            executable,
            protection,
            flags: AtomicChunkFlags::default(),
            mutex: Some(Box::new(Mutex::new(()))),
            page_protection_change_mutex: Some(Box::new(Mutex::new(0))),
            slot_sets: [LazyBox::new(), LazyBox::new()],
            sweeping_slot_set: LazyBox::new(),
            typed_slot_sets: [LazyBox::new(), LazyBox::new()],
            invalidated_slots: [Mutex::new(None), Mutex::new(None)],
            slot_set_race_losses: AtomicUsize::new(0),
            marking_bitmap: Some(Box::new(Bitmap::new())),
            young_generation_bitmap: None,
            code_object_registry: None,
            possibly_empty_buckets: Some(Box::new(PossiblyEmptyBuckets::new())),
            local_tracker: None,
            categories: None,
            live_bytes: CachePadded::new(AtomicIsize::new(0)),
            allocated_bytes: AtomicUsize::new(area_end - area_start),
            wasted_memory: AtomicUsize::new(0),
            high_water_mark: CachePadded::new(AtomicUsize::new(area_start - address)),
            external_backing_store_bytes: [AtomicUsize::new(0), AtomicUsize::new(0)],
        });

        if owner == AllocationSpace::ReadOnly {
            if let Some(bitmap) = &chunk.marking_bitmap {
                bitmap.mark_all_bits();
            }
            chunk.flags.set(ChunkFlags::READ_ONLY_HEAP);
        }

        if owner.is_large_object() {
            chunk.flags.set(ChunkFlags::LARGE_PAGE);
        } else {
            chunk.categories = Some(Box::new(FreeListCategories::new()));
        }

        if executable == Executability::Executable {
            chunk.flags.set(ChunkFlags::IS_EXECUTABLE);
            if protection.write_protect_code_memory {
                *chunk.page_protection_change_mutex_mut() = protection.modification_scope_depth;
            } else {
                let (start, len) = chunk.code_area();
                let ok = chunk.reservation.set_permissions(
                    start,
                    len,
                    protection.default_writable_code_permission(),
                );
                assert!(ok, "failed to set permissions of code chunk {address:#x}");
            }
        }

        if owner == AllocationSpace::Code {
            chunk.code_object_registry = Some(Box::new(CodeObjectRegistry::new()));
        }

        chunk.initialization_memory_fence();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "osprey::gc",
            space = %owner,
            address = format_args!("{address:#x}"),
            size,
            area = area_end - area_start,
            "chunk initialized"
        );

        chunk
    }

    /// Order every initializing store before the chunk address is
    /// published to other threads.
    #[inline]
    pub fn initialization_memory_fence(&self) {
        fence(Ordering::SeqCst);
    }

    /// Give the region back, dropping all bookkeeping
    pub(crate) fn into_reservation(self: Box<Self>) -> VirtualMemory {
        let MemoryChunk { reservation, .. } = *self;
        reservation
    }

    pub(crate) fn reservation_mut(&mut self) -> &mut VirtualMemory {
        &mut self.reservation
    }

    // ==================== Geometry ====================

    /// Chunk base address
    #[inline]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Reserved size
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// First object byte
    #[inline]
    pub fn area_start(&self) -> Address {
        self.area_start
    }

    /// One past the last object byte
    #[inline]
    pub fn area_end(&self) -> Address {
        self.area_end
    }

    /// Object area size
    #[inline]
    pub fn area_size(&self) -> usize {
        self.area_end - self.area_start
    }

    /// Whether `address` lies inside the object area
    #[inline]
    pub fn contains(&self, address: Address) -> bool {
        address >= self.area_start && address < self.area_end
    }

    /// Owning space
    #[inline]
    pub fn owner(&self) -> AllocationSpace {
        self.owner
    }

    /// Executability requested at allocation
    #[inline]
    pub fn executability(&self) -> Executability {
        self.executable
    }

    /// Layout the chunk was carved with
    #[inline]
    pub fn layout(&self) -> MemoryChunkLayout {
        self.layout
    }

    /// Slot-set buckets needed to cover the chunk
    #[inline]
    pub fn buckets(&self) -> usize {
        SlotSet::buckets_for_size(self.size)
    }

    /// Executable object area, rounded to whole commit pages
    fn code_area(&self) -> (Address, usize) {
        debug_assert_eq!(
            self.area_start - self.address,
            self.layout.object_start_offset_in_code_page()
        );
        (
            self.area_start,
            round_up(self.area_size(), self.layout.commit_page_size()),
        )
    }

    // ==================== Flags ====================

    /// Current flag word
    #[inline]
    pub fn flags(&self) -> ChunkFlags {
        self.flags.get()
    }

    /// Whether all of `flags` are set
    #[inline]
    pub fn is_flag_set(&self, flags: ChunkFlags) -> bool {
        self.flags.is_set(flags)
    }

    /// Set `flags`
    #[inline]
    pub fn set_flag(&self, flags: ChunkFlags) {
        self.flags.set(flags);
    }

    /// Clear `flags`
    #[inline]
    pub fn clear_flag(&self, flags: ChunkFlags) {
        self.flags.clear(flags);
    }

    /// Whether the chunk may hold code
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.is_flag_set(ChunkFlags::IS_EXECUTABLE)
    }

    /// Whether the chunk is a single-object chunk
    #[inline]
    pub fn is_large_page(&self) -> bool {
        self.is_flag_set(ChunkFlags::LARGE_PAGE)
    }

    /// Whether the chunk belongs to the read-only heap
    #[inline]
    pub fn in_read_only_space(&self) -> bool {
        self.is_flag_set(ChunkFlags::READ_ONLY_HEAP)
    }

    /// Whether the chunk is a from- or to-space page
    #[inline]
    pub fn in_young_generation(&self) -> bool {
        self.flags().intersects(ChunkFlags::IN_YOUNG_GENERATION)
    }

    /// Whether the compactor is evacuating this chunk
    #[inline]
    pub fn is_evacuation_candidate(&self) -> bool {
        self.is_flag_set(ChunkFlags::EVACUATION_CANDIDATE)
    }

    /// Whether old-to-old slots pointing out of this chunk need no recording
    pub fn should_skip_evacuation_slot_recording(&self) -> bool {
        let flags = self.flags();
        flags.intersects(ChunkFlags::SKIP_EVACUATION_SLOTS_RECORDING)
            && !flags.contains(ChunkFlags::COMPACTION_WAS_ABORTED)
    }

    /// Barrier flags of an old-generation chunk for the current phase
    pub fn set_old_generation_page_flags(&self, is_marking: bool) {
        let mask = ChunkFlags::POINTERS_TO_HERE_ARE_INTERESTING
            | ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING
            | ChunkFlags::INCREMENTAL_MARKING;
        let flags = if is_marking {
            mask
        } else {
            ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING
        };
        self.flags.set_masked(flags, mask);
    }

    /// Barrier flags of a young-generation chunk for the current phase
    pub fn set_young_generation_page_flags(&self, is_marking: bool) {
        let mask = ChunkFlags::POINTERS_TO_HERE_ARE_INTERESTING
            | ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING
            | ChunkFlags::INCREMENTAL_MARKING;
        let flags = if is_marking {
            mask
        } else {
            ChunkFlags::POINTERS_TO_HERE_ARE_INTERESTING
        };
        self.flags.set_masked(flags, mask);
    }

    // ==================== Code page protection ====================

    fn page_protection_change_mutex(&self) -> &Mutex<usize> {
        self.page_protection_change_mutex
            .as_deref()
            .expect("page protection mutex used after release")
    }

    fn page_protection_change_mutex_mut(&mut self) -> &mut usize {
        self.page_protection_change_mutex
            .as_deref_mut()
            .expect("page protection mutex used after release")
            .get_mut()
    }

    /// Open a write window on the code area.
    ///
    /// Only the first of nested calls changes page permissions.
    pub fn set_read_and_writable(&self) {
        debug_assert!(self.is_executable());
        debug_assert!(self.owner.is_code());
        let mut counter = self.page_protection_change_mutex().lock();
        *counter += 1;
        if *counter == 1 {
            let (start, len) = self.code_area();
            let ok = self
                .reservation
                .set_permissions(start, len, Permission::ReadWrite);
            assert!(ok, "failed to make code chunk {:#x} writable", self.address);

            #[cfg(feature = "gc_logging")]
            tracing::debug!(
                target: "osprey::gc",
                address = format_args!("{:#x}", self.address),
                "code chunk writable"
            );
        }
    }

    /// Close a write window, leaving the code area readable
    pub fn set_readable(&self) {
        self.decrement_write_unprotect_counter_and_maybe_set_permissions(Permission::Read);
    }

    /// Close a write window, leaving the code area executable
    pub fn set_read_and_executable(&self) {
        self.decrement_write_unprotect_counter_and_maybe_set_permissions(Permission::ReadExecute);
    }

    /// Close a write window with the heap's default code permission
    pub fn set_default_code_permissions(&self) {
        self.decrement_write_unprotect_counter_and_maybe_set_permissions(
            self.protection.default_code_permission(),
        );
    }

    /// Drop one level of write unprotection.
    ///
    /// The last level applies `permission`. Decrementing a zero counter
    /// does nothing: a page added to code space while a modification scope
    /// is open starts with the scope depth and may see one extra close.
    pub fn decrement_write_unprotect_counter_and_maybe_set_permissions(
        &self,
        permission: Permission,
    ) {
        debug_assert!(matches!(
            permission,
            Permission::Read | Permission::ReadExecute
        ));
        debug_assert!(self.is_executable());
        debug_assert!(self.owner.is_code());
        let mut counter = self.page_protection_change_mutex().lock();
        if *counter == 0 {
            return;
        }
        *counter -= 1;
        if *counter == 0 {
            let (start, len) = self.code_area();
            let ok = self.reservation.set_permissions(start, len, permission);
            assert!(
                ok,
                "failed to set {permission:?} on code chunk {:#x}",
                self.address
            );

            #[cfg(feature = "gc_logging")]
            tracing::debug!(
                target: "osprey::gc",
                address = format_args!("{:#x}", self.address),
                ?permission,
                "code chunk protected"
            );
        }
    }

    /// Current nesting depth of write windows
    pub fn write_unprotect_counter(&self) -> usize {
        *self.page_protection_change_mutex().lock()
    }

    /// Protection policy the chunk was initialized with
    #[inline]
    pub fn code_protection(&self) -> CodeProtection {
        self.protection
    }

    /// Copy `bytes` into the object area at `address`.
    ///
    /// Panics when the range leaves the object area, or when a
    /// write-protected code chunk has no open write window.
    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) {
        assert!(
            address >= self.area_start && address + bytes.len() <= self.area_end,
            "write {address:#x}+{} outside object area",
            bytes.len()
        );
        if self.is_executable() && self.protection.write_protect_code_memory {
            assert!(
                self.write_unprotect_counter() > 0,
                "code chunk {:#x} written outside a modification scope",
                self.address
            );
        }
        // SAFETY: the range lies inside the committed object area, which is
        // writable, and &mut self excludes concurrent readers
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
        }
    }

    /// Copy `len` bytes out of the object area at `address`
    pub fn read_bytes(&self, address: Address, len: usize) -> Vec<u8> {
        assert!(
            address >= self.area_start && address + len <= self.area_end,
            "read {address:#x}+{len} outside object area"
        );
        let mut out = vec![0; len];
        // SAFETY: the object area is committed and readable in every
        // protection state
        unsafe {
            std::ptr::copy_nonoverlapping(address as *const u8, out.as_mut_ptr(), len);
        }
        out
    }

    // ==================== Accounting ====================

    /// Memory actually backed by physical pages
    pub fn committed_physical_memory(&self) -> usize {
        if !self.reservation.page_allocator().has_lazy_commits()
            || self.owner == AllocationSpace::LargeObject
        {
            return self.size;
        }
        self.high_water_mark()
    }

    /// Highest offset ever allocated up to
    #[inline]
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark.load(Ordering::Relaxed)
    }

    /// Raise the high-water mark to cover `mark`
    pub fn update_high_water_mark(&self, mark: Address) {
        if mark == 0 {
            return;
        }
        debug_assert!(mark > self.address && mark <= self.address + self.size);
        let offset = mark - self.address;
        self.high_water_mark.fetch_max(offset, Ordering::Relaxed);
    }

    /// Bytes of live objects found by marking
    #[inline]
    pub fn live_bytes(&self) -> isize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Add marked bytes
    #[inline]
    pub fn increment_live_bytes(&self, by: isize) {
        self.live_bytes.fetch_add(by, Ordering::Relaxed);
    }

    /// Forget marking results
    #[inline]
    pub fn reset_live_bytes(&self) {
        self.live_bytes.store(0, Ordering::Relaxed);
    }

    /// Object area bytes not on a free list
    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Account for bytes taken off a free list
    #[inline]
    pub fn increase_allocated_bytes(&self, bytes: usize) {
        self.allocated_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Account for bytes given back to a free list
    #[inline]
    pub fn decrease_allocated_bytes(&self, bytes: usize) {
        debug_assert!(bytes <= self.allocated_bytes());
        self.allocated_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Free bytes too small to reuse
    #[inline]
    pub fn wasted_memory(&self) -> usize {
        self.wasted_memory.load(Ordering::Relaxed)
    }

    /// Record bytes lost to fragmentation
    #[inline]
    pub fn add_wasted_memory(&self, bytes: usize) {
        self.wasted_memory.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Off-heap bytes of the given kind attributed to this chunk
    #[inline]
    pub fn external_backing_store_bytes(&self, kind: ExternalBackingStoreType) -> usize {
        self.external_backing_store_bytes[kind.index()].load(Ordering::Relaxed)
    }

    /// Attribute off-heap bytes to this chunk
    pub fn increment_external_backing_store_bytes(
        &self,
        kind: ExternalBackingStoreType,
        bytes: usize,
    ) {
        self.external_backing_store_bytes[kind.index()].fetch_add(bytes, Ordering::Relaxed);
    }

    /// Detach off-heap bytes from this chunk
    pub fn decrement_external_backing_store_bytes(
        &self,
        kind: ExternalBackingStoreType,
        bytes: usize,
    ) {
        self.external_backing_store_bytes[kind.index()].fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Range of whole commit pages inside a free block, after its header.
    /// Empty when the block is too small.
    pub fn compute_discard_memory_area(&self, address: Address, size: usize) -> (Address, usize) {
        let page_size = self.layout.commit_page_size();
        if size < page_size + FREE_SPACE_HEADER_SIZE {
            return (0, 0);
        }
        let start = round_up(address + FREE_SPACE_HEADER_SIZE, page_size);
        let end = round_down(address + size, page_size);
        if start >= end {
            return (0, 0);
        }
        (start, end - start)
    }

    /// Return the physical pages of a free block to the OS
    pub fn discard_unused_memory(&self, address: Address, size: usize) {
        let (start, len) = self.compute_discard_memory_area(address, size);
        if len == 0 {
            return;
        }
        let ok = self.reservation.discard_system_pages(start, len);
        assert!(ok, "failed to discard {len} bytes at {start:#x}");
    }

    // ==================== Slot sets ====================

    /// Recorded slots of the given kind, if the set exists
    #[inline]
    pub fn slot_set(&self, ty: RememberedSetType) -> Option<&SlotSet> {
        self.slot_sets[ty.index()].get()
    }

    /// Allocate the slot set of the given kind, racing other threads.
    ///
    /// Always builds a fresh set. If another thread published first, the
    /// fresh set is freed and the published one returned.
    pub fn allocate_slot_set(&self, ty: RememberedSetType) -> &SlotSet {
        self.publish_slot_set(&self.slot_sets[ty.index()])
    }

    /// Existing slot set of the given kind, allocating it if needed
    pub fn get_or_allocate_slot_set(&self, ty: RememberedSetType) -> &SlotSet {
        match self.slot_set(ty) {
            Some(set) => set,
            None => self.allocate_slot_set(ty),
        }
    }

    /// Free the slot set of the given kind
    pub fn release_slot_set(&mut self, ty: RememberedSetType) {
        drop(self.slot_sets[ty.index()].take());
    }

    /// Old-to-new slots recorded while the sweeper runs
    #[inline]
    pub fn sweeping_slot_set(&self) -> Option<&SlotSet> {
        self.sweeping_slot_set.get()
    }

    /// Allocate the sweeping slot set, racing other threads
    pub fn allocate_sweeping_slot_set(&self) -> &SlotSet {
        self.publish_slot_set(&self.sweeping_slot_set)
    }

    /// Free the sweeping slot set
    pub fn release_sweeping_slot_set(&mut self) {
        drop(self.sweeping_slot_set.take());
    }

    fn publish_slot_set<'a>(&self, cell: &'a LazyBox<SlotSet>) -> &'a SlotSet {
        let buckets = self.buckets();
        let (set, won) = cell.get_or_allocate(|| SlotSet::new(buckets), Ordering::AcqRel);
        if !won {
            self.slot_set_race_losses.fetch_add(1, Ordering::Relaxed);

            #[cfg(feature = "gc_logging")]
            tracing::debug!(
                target: "osprey::gc",
                address = format_args!("{:#x}", self.address),
                "slot set allocation lost race"
            );
        }
        set
    }

    /// Slot-set allocations that lost the publishing race and were freed
    pub fn slot_set_race_losses(&self) -> usize {
        self.slot_set_race_losses.load(Ordering::Relaxed)
    }

    /// Recorded typed slots of the given kind, if the set exists
    #[inline]
    pub fn typed_slot_set(&self, ty: RememberedSetType) -> Option<&TypedSlotSet> {
        self.typed_slot_sets[ty.index()].get()
    }

    /// Allocate the typed slot set of the given kind, racing other threads
    pub fn allocate_typed_slot_set(&self, ty: RememberedSetType) -> &TypedSlotSet {
        let (set, won) =
            self.typed_slot_sets[ty.index()].get_or_allocate(TypedSlotSet::new, Ordering::Release);
        if !won {
            self.slot_set_race_losses.fetch_add(1, Ordering::Relaxed);
        }
        set
    }

    /// Free the typed slot set of the given kind
    pub fn release_typed_slot_set(&mut self, ty: RememberedSetType) {
        drop(self.typed_slot_sets[ty.index()].take());
    }

    // ==================== Invalidated slots ====================

    fn page_mutex(&self) -> &Mutex<()> {
        self.mutex.as_deref().expect("page mutex used after release")
    }

    /// Create an empty invalidated-slot table of the given kind
    pub fn allocate_invalidated_slots(&self, ty: RememberedSetType) {
        self.invalidated_slots[ty.index()]
            .lock()
            .get_or_insert_with(InvalidatedSlots::new);
    }

    /// Free the invalidated-slot table of the given kind
    pub fn release_invalidated_slots(&mut self, ty: RememberedSetType) {
        *self.invalidated_slots[ty.index()].get_mut() = None;
    }

    /// Mark the slots inside `object` as untrustworthy for one remembered
    /// set.
    ///
    /// Skipped for old-to-new when the chunk is young, and for old-to-old
    /// when the chunk does not record evacuation slots.
    pub fn register_object_with_invalidated_slots(
        &self,
        ty: RememberedSetType,
        object: Address,
        size: usize,
    ) {
        let skip = match ty {
            RememberedSetType::OldToNew => self.in_young_generation(),
            RememberedSetType::OldToOld => self.should_skip_evacuation_slot_recording(),
        };
        if skip {
            return;
        }
        debug_assert!(self.contains(object));
        self.invalidated_slots[ty.index()]
            .lock()
            .get_or_insert_with(InvalidatedSlots::new)
            .insert(object, size);
    }

    /// Whether `object` is registered in the given table
    pub fn registered_object_with_invalidated_slots(
        &self,
        ty: RememberedSetType,
        object: Address,
    ) -> bool {
        self.invalidated_slots[ty.index()]
            .lock()
            .as_ref()
            .is_some_and(|slots| slots.contains(object))
    }

    /// Register `object` in the old-to-new table, and in the old-to-old
    /// table too while compacting
    pub fn invalidate_recorded_slots(&self, object: Address, size: usize, is_compacting: bool) {
        let _guard = self.page_mutex().lock();
        if is_compacting {
            self.register_object_with_invalidated_slots(RememberedSetType::OldToOld, object, size);
        }
        self.register_object_with_invalidated_slots(RememberedSetType::OldToNew, object, size);
    }

    /// Re-key a registered object after left-trimming moved its start
    /// forward. Returns `false` when `old_start` was not registered or
    /// `new_start` lies before it.
    pub fn move_object_with_invalidated_slots(
        &self,
        ty: RememberedSetType,
        old_start: Address,
        new_start: Address,
    ) -> bool {
        let Some(moved) = new_start.checked_sub(old_start) else {
            return false;
        };
        let _guard = self.page_mutex().lock();
        let mut slots = self.invalidated_slots[ty.index()].lock();
        let Some(table) = slots.as_mut() else {
            return false;
        };
        match table.remove(old_start) {
            Some(size) => {
                table.insert(new_start, size.saturating_sub(moved));
                true
            }
            None => false,
        }
    }

    /// Run `f` on the invalidated-slot table of the given kind
    pub fn with_invalidated_slots<R>(
        &self,
        ty: RememberedSetType,
        f: impl FnOnce(Option<&InvalidatedSlots>) -> R,
    ) -> R {
        f(self.invalidated_slots[ty.index()].lock().as_ref())
    }

    // ==================== Side tables ====================

    /// Mark bits for the full collector; `None` after final release
    #[inline]
    pub fn marking_bitmap(&self) -> Option<&Bitmap> {
        self.marking_bitmap.as_deref()
    }

    /// Mark bits for the young-generation collector
    #[inline]
    pub fn young_generation_bitmap(&self) -> Option<&Bitmap> {
        self.young_generation_bitmap.as_deref()
    }

    /// Create the young-generation mark bits
    pub fn allocate_young_generation_bitmap(&mut self) {
        self.young_generation_bitmap
            .get_or_insert_with(|| Box::new(Bitmap::new()));
    }

    /// Free the young-generation mark bits
    pub fn release_young_generation_bitmap(&mut self) {
        self.young_generation_bitmap = None;
    }

    /// Code object starts; present on code-space chunks
    #[inline]
    pub fn code_object_registry(&self) -> Option<&CodeObjectRegistry> {
        self.code_object_registry.as_deref()
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn code_object_registry_mut(&mut self) -> Option<&mut CodeObjectRegistry> {
        self.code_object_registry.as_deref_mut()
    }

    /// Buckets flagged for freeing after remembered-set iteration
    #[inline]
    pub fn possibly_empty_buckets_mut(&mut self) -> Option<&mut PossiblyEmptyBuckets> {
        self.possibly_empty_buckets.as_deref_mut()
    }

    /// Free empty old-to-new buckets flagged during iteration. Returns
    /// `true` when the set ended up empty and was released.
    pub fn free_possibly_empty_old_to_new_buckets(&mut self) -> bool {
        let index = RememberedSetType::OldToNew.index();
        let (Some(set), Some(possibly_empty)) = (
            self.slot_sets[index].get_mut(),
            self.possibly_empty_buckets.as_deref_mut(),
        ) else {
            return false;
        };
        if set.check_possibly_empty_buckets(possibly_empty) {
            self.release_slot_set(RememberedSetType::OldToNew);
            return true;
        }
        false
    }

    /// Array buffers attributed to this page
    #[inline]
    pub fn local_tracker(&self) -> Option<&LocalArrayBufferTracker> {
        self.local_tracker.as_deref()
    }

    /// Track an array buffer on this page, creating the tracker if needed
    pub fn track_array_buffer(&mut self, buffer: Address, length: usize) {
        self.local_tracker
            .get_or_insert_with(|| Box::new(LocalArrayBufferTracker::new()))
            .add(buffer, length);
        self.increment_external_backing_store_bytes(ExternalBackingStoreType::ArrayBuffer, length);
    }

    /// Stop tracking an array buffer on this page
    pub fn untrack_array_buffer(&mut self, buffer: Address) {
        let Some(length) = self
            .local_tracker
            .as_deref_mut()
            .and_then(|t| t.remove(buffer))
        else {
            return;
        };
        self.decrement_external_backing_store_bytes(ExternalBackingStoreType::ArrayBuffer, length);
    }

    /// Free the array-buffer tracker
    pub fn release_local_tracker(&mut self) {
        self.local_tracker = None;
    }

    /// Free-list categories; absent on large pages
    #[inline]
    pub fn free_list_categories(&self) -> Option<&FreeListCategories> {
        self.categories.as_deref()
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn free_list_categories_mut(&mut self) -> Option<&mut FreeListCategories> {
        self.categories.as_deref_mut()
    }

    // ==================== Release ====================

    /// Free everything a chunk about to be reused does not need. The
    /// marking bitmap survives.
    pub fn release_allocated_memory_needed_for_writable_chunk(&mut self) {
        self.mutex = None;
        self.page_protection_change_mutex = None;
        self.code_object_registry = None;
        self.possibly_empty_buckets = None;

        self.release_slot_set(RememberedSetType::OldToNew);
        self.release_sweeping_slot_set();
        self.release_slot_set(RememberedSetType::OldToOld);
        self.release_typed_slot_set(RememberedSetType::OldToNew);
        self.release_typed_slot_set(RememberedSetType::OldToOld);
        self.release_invalidated_slots(RememberedSetType::OldToNew);
        self.release_invalidated_slots(RememberedSetType::OldToOld);

        self.release_local_tracker();
        self.release_young_generation_bitmap();
        if !self.is_large_page() {
            self.categories = None;
        }
    }

    /// Free every side table, including the marking bitmap
    pub fn release_all_allocated_memory(&mut self) {
        self.release_allocated_memory_needed_for_writable_chunk();
        self.marking_bitmap = None;
    }

    /// Whether the page mutexes are gone
    pub fn mutexes_released(&self) -> bool {
        self.mutex.is_none() && self.page_protection_change_mutex.is_none()
    }
}

impl std::fmt::Debug for MemoryChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChunk")
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &self.size)
            .field("owner", &self.owner)
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::PAGE_SIZE;
    use crate::page_allocator::{PageAllocator, StdPageAllocator};
    use std::sync::Arc;

    fn data_chunk(owner: AllocationSpace) -> Box<MemoryChunk> {
        let allocator: Arc<dyn PageAllocator> = Arc::new(StdPageAllocator::new());
        let layout = MemoryChunkLayout::new(allocator.commit_page_size());
        let reservation =
            VirtualMemory::reserve(allocator, PAGE_SIZE, PAGE_SIZE, Permission::ReadWrite)
                .expect("reserve");
        let base = reservation.address();
        MemoryChunk::initialize(
            reservation,
            base + layout.object_start_offset_in_data_page(),
            base + PAGE_SIZE,
            Executability::NotExecutable,
            owner,
            CodeProtection::default(),
        )
    }

    #[test]
    fn test_initialize_defaults() {
        let chunk = data_chunk(AllocationSpace::Old);
        assert_eq!(chunk.live_bytes(), 0);
        assert_eq!(chunk.allocated_bytes(), chunk.area_size());
        assert_eq!(chunk.high_water_mark(), chunk.area_start() - chunk.address());
        assert!(chunk.slot_set(RememberedSetType::OldToNew).is_none());
        assert!(chunk.typed_slot_set(RememberedSetType::OldToOld).is_none());
        assert!(chunk.marking_bitmap().is_some_and(Bitmap::is_clean));
        assert!(chunk.free_list_categories().is_some());
        assert!(chunk.code_object_registry().is_none());
        assert!(!chunk.is_executable());
    }

    #[test]
    fn test_read_only_chunk_is_fully_marked() {
        let chunk = data_chunk(AllocationSpace::ReadOnly);
        assert!(chunk.in_read_only_space());
        let bitmap = chunk.marking_bitmap().expect("bitmap");
        assert_eq!(bitmap.count(), PAGE_SIZE / crate::globals::TAGGED_SIZE);
    }

    #[test]
    fn test_page_flag_transitions() {
        let chunk = data_chunk(AllocationSpace::Old);
        chunk.set_old_generation_page_flags(true);
        assert!(chunk.is_flag_set(
            ChunkFlags::POINTERS_TO_HERE_ARE_INTERESTING
                | ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING
                | ChunkFlags::INCREMENTAL_MARKING
        ));
        chunk.set_old_generation_page_flags(false);
        assert!(!chunk.is_flag_set(ChunkFlags::POINTERS_TO_HERE_ARE_INTERESTING));
        assert!(chunk.is_flag_set(ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING));
        assert!(!chunk.is_flag_set(ChunkFlags::INCREMENTAL_MARKING));

        let young = data_chunk(AllocationSpace::New);
        young.set_young_generation_page_flags(false);
        assert!(young.is_flag_set(ChunkFlags::POINTERS_TO_HERE_ARE_INTERESTING));
        assert!(!young.is_flag_set(ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING));
        young.set_young_generation_page_flags(true);
        assert!(young.is_flag_set(
            ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING | ChunkFlags::INCREMENTAL_MARKING
        ));
    }

    #[test]
    fn test_skip_evacuation_slot_recording() {
        let chunk = data_chunk(AllocationSpace::Old);
        assert!(!chunk.should_skip_evacuation_slot_recording());
        chunk.set_flag(ChunkFlags::EVACUATION_CANDIDATE);
        assert!(chunk.should_skip_evacuation_slot_recording());
        chunk.set_flag(ChunkFlags::COMPACTION_WAS_ABORTED);
        assert!(!chunk.should_skip_evacuation_slot_recording());
    }

    #[test]
    fn test_high_water_mark_only_grows() {
        let chunk = data_chunk(AllocationSpace::Old);
        let start = chunk.area_start();
        chunk.update_high_water_mark(start + 0x1000);
        chunk.update_high_water_mark(start + 0x800);
        assert_eq!(chunk.high_water_mark(), start + 0x1000 - chunk.address());
    }

    #[test]
    fn test_discard_area_skips_header_and_partial_pages() {
        let chunk = data_chunk(AllocationSpace::Old);
        let base = chunk.address();
        assert_eq!(chunk.compute_discard_memory_area(base + 0x1000, 0x1000), (0, 0));
        assert_eq!(
            chunk.compute_discard_memory_area(base + 0x1000, 0x3000),
            (base + 0x2000, 0x2000)
        );
        assert_eq!(
            chunk.compute_discard_memory_area(base + 0x1010, 0x1100),
            (0, 0)
        );
        chunk.discard_unused_memory(base + 0x1000, 0x3000);
    }

    #[test]
    fn test_invalidated_slots_registration() {
        let chunk = data_chunk(AllocationSpace::Old);
        let object = chunk.area_start() + 0x40;
        chunk.invalidate_recorded_slots(object, 0x20, false);
        assert!(chunk.registered_object_with_invalidated_slots(RememberedSetType::OldToNew, object));
        assert!(!chunk.registered_object_with_invalidated_slots(RememberedSetType::OldToOld, object));

        chunk.invalidate_recorded_slots(object, 0x20, true);
        assert!(chunk.registered_object_with_invalidated_slots(RememberedSetType::OldToOld, object));

        assert!(chunk.move_object_with_invalidated_slots(
            RememberedSetType::OldToOld,
            object,
            object + 0x10
        ));
        chunk.with_invalidated_slots(RememberedSetType::OldToOld, |slots| {
            let slots = slots.expect("allocated");
            assert_eq!(slots.object_containing(object + 0x18), Some((object + 0x10, 0x10)));
        });
    }

    #[test]
    fn test_invalidated_object_cannot_move_backwards() {
        let chunk = data_chunk(AllocationSpace::Old);
        let object = chunk.area_start() + 0x40;
        chunk.invalidate_recorded_slots(object, 0x20, false);

        assert!(!chunk.move_object_with_invalidated_slots(
            RememberedSetType::OldToNew,
            object,
            object - 0x10
        ));
        assert!(chunk.registered_object_with_invalidated_slots(RememberedSetType::OldToNew, object));
        assert!(!chunk.registered_object_with_invalidated_slots(
            RememberedSetType::OldToNew,
            object - 0x10
        ));
    }

    #[test]
    fn test_young_chunk_skips_old_to_new_invalidation() {
        let chunk = data_chunk(AllocationSpace::New);
        chunk.set_flag(ChunkFlags::TO_PAGE);
        let object = chunk.area_start();
        chunk.register_object_with_invalidated_slots(RememberedSetType::OldToNew, object, 16);
        assert!(!chunk.registered_object_with_invalidated_slots(RememberedSetType::OldToNew, object));
        chunk.with_invalidated_slots(RememberedSetType::OldToNew, |slots| {
            assert!(slots.is_none());
        });
    }

    #[test]
    fn test_array_buffer_accounting() {
        let mut chunk = data_chunk(AllocationSpace::Old);
        let buffer = chunk.area_start();
        chunk.track_array_buffer(buffer, 4096);
        assert_eq!(
            chunk.external_backing_store_bytes(ExternalBackingStoreType::ArrayBuffer),
            4096
        );
        chunk.untrack_array_buffer(buffer);
        assert_eq!(
            chunk.external_backing_store_bytes(ExternalBackingStoreType::ArrayBuffer),
            0
        );
        assert!(chunk.local_tracker().is_some_and(LocalArrayBufferTracker::is_empty));
    }

    #[test]
    fn test_free_possibly_empty_buckets_releases_set() {
        let mut chunk = data_chunk(AllocationSpace::Old);
        let offset = chunk.area_start() - chunk.address();
        chunk
            .allocate_slot_set(RememberedSetType::OldToNew)
            .insert(offset);
        let set = chunk.slot_set(RememberedSetType::OldToNew).expect("set");
        let mut flagged = PossiblyEmptyBuckets::new();
        set.iterate_and_track_empty_buckets(
            |_| crate::slot_set::SlotCallbackResult::RemoveSlot,
            &mut flagged,
        );
        *chunk.possibly_empty_buckets_mut().expect("buckets") = flagged;
        assert!(chunk.free_possibly_empty_old_to_new_buckets());
        assert!(chunk.slot_set(RememberedSetType::OldToNew).is_none());
    }
}
