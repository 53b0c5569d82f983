//! Heap: the spaces, their shared allocator and code write protection

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::barrier;
use crate::error::{GcError, Result};
use crate::flags::ChunkFlags;
use crate::globals::{Address, AllocationSpace, MAX_REGULAR_HEAP_OBJECT_SIZE, PAGE_SIZE, RememberedSetType};
use crate::memory_allocator::{FreeMode, MemoryAllocator};
use crate::memory_chunk::{CodeProtection, MemoryChunk};
use crate::page_allocator::{PageAllocator, default_page_allocator};
use crate::spaces::{AllocationResult, LargeObjectSpace, PagedSpace, Space};

/// Heap configuration
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Pages of the young generation (default: 1MB)
    pub new_space_bytes: usize,
    /// Old space limit (default: 64MB)
    pub max_old_space_bytes: usize,
    /// Code space limit (default: 16MB)
    pub max_code_space_bytes: usize,
    /// Map space limit (default: 8MB)
    pub max_map_space_bytes: usize,
    /// Read-only space limit (default: 1MB)
    pub read_only_space_bytes: usize,
    /// Limit of each large-object space (default: 64MB)
    pub max_large_object_space_bytes: usize,
    /// Upper bound on reserved virtual memory (default: 256MB)
    pub max_reserved_bytes: usize,
    /// Keep code pages non-writable outside modification scopes
    pub write_protect_code_memory: bool,
    /// No executable memory at all
    pub jitless: bool,
    /// Released data pages kept for reuse
    pub chunk_pool_size: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            new_space_bytes: 1024 * 1024,                // 1MB
            max_old_space_bytes: 64 * 1024 * 1024,       // 64MB
            max_code_space_bytes: 16 * 1024 * 1024,      // 16MB
            max_map_space_bytes: 8 * 1024 * 1024,        // 8MB
            read_only_space_bytes: 1024 * 1024,          // 1MB
            max_large_object_space_bytes: 64 * 1024 * 1024, // 64MB
            max_reserved_bytes: 256 * 1024 * 1024,       // 256MB
            write_protect_code_memory: true,
            jitless: false,
            chunk_pool_size: 8,
        }
    }
}

/// All spaces of one isolate
pub struct Heap {
    config: HeapConfig,
    allocator: Arc<MemoryAllocator>,
    read_only_space: PagedSpace,
    new_space: PagedSpace,
    old_space: PagedSpace,
    code_space: PagedSpace,
    map_space: PagedSpace,
    lo_space: LargeObjectSpace,
    code_lo_space: LargeObjectSpace,
    new_lo_space: LargeObjectSpace,
    code_space_memory_modification_scope_depth: usize,
    is_marking: bool,
    is_compacting: bool,
}

impl Heap {
    /// Heap on the platform page allocator
    pub fn new(config: HeapConfig) -> Self {
        Self::with_page_allocator(config, default_page_allocator())
    }

    /// Heap reserving its chunks through `page_allocator`
    pub fn with_page_allocator(config: HeapConfig, page_allocator: Arc<dyn PageAllocator>) -> Self {
        let allocator = Arc::new(MemoryAllocator::new(
            page_allocator,
            config.max_reserved_bytes,
            config.chunk_pool_size,
        ));
        let paged = |space, capacity| PagedSpace::new(space, allocator.clone(), capacity);
        let large = |space| {
            LargeObjectSpace::new(space, allocator.clone(), config.max_large_object_space_bytes)
        };
        Self {
            read_only_space: paged(AllocationSpace::ReadOnly, config.read_only_space_bytes),
            new_space: paged(AllocationSpace::New, config.new_space_bytes),
            old_space: paged(AllocationSpace::Old, config.max_old_space_bytes),
            code_space: paged(AllocationSpace::Code, config.max_code_space_bytes),
            map_space: paged(AllocationSpace::Map, config.max_map_space_bytes),
            lo_space: large(AllocationSpace::LargeObject),
            code_lo_space: large(AllocationSpace::CodeLargeObject),
            new_lo_space: large(AllocationSpace::NewLargeObject),
            allocator,
            config,
            code_space_memory_modification_scope_depth: 0,
            is_marking: false,
            is_compacting: false,
        }
    }

    /// Configuration the heap was built with
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Shared chunk allocator
    pub fn memory_allocator(&self) -> &Arc<MemoryAllocator> {
        &self.allocator
    }

    /// Protection policy handed to newly allocated chunks
    pub fn code_protection(&self) -> CodeProtection {
        CodeProtection {
            write_protect_code_memory: self.config.write_protect_code_memory,
            jitless: self.config.jitless,
            modification_scope_depth: self.code_space_memory_modification_scope_depth,
        }
    }

    /// Depth of open code-space modification scopes
    pub fn code_space_memory_modification_scope_depth(&self) -> usize {
        self.code_space_memory_modification_scope_depth
    }

    // ==================== Spaces ====================

    /// Paged space by identity
    pub fn paged_space(&self, space: AllocationSpace) -> Option<&PagedSpace> {
        match space {
            AllocationSpace::ReadOnly => Some(&self.read_only_space),
            AllocationSpace::New => Some(&self.new_space),
            AllocationSpace::Old => Some(&self.old_space),
            AllocationSpace::Code => Some(&self.code_space),
            AllocationSpace::Map => Some(&self.map_space),
            _ => None,
        }
    }

    /// Mutable paged space by identity
    pub fn paged_space_mut(&mut self, space: AllocationSpace) -> Option<&mut PagedSpace> {
        match space {
            AllocationSpace::ReadOnly => Some(&mut self.read_only_space),
            AllocationSpace::New => Some(&mut self.new_space),
            AllocationSpace::Old => Some(&mut self.old_space),
            AllocationSpace::Code => Some(&mut self.code_space),
            AllocationSpace::Map => Some(&mut self.map_space),
            _ => None,
        }
    }

    /// Large-object space by identity
    pub fn large_object_space(&self, space: AllocationSpace) -> Option<&LargeObjectSpace> {
        match space {
            AllocationSpace::LargeObject => Some(&self.lo_space),
            AllocationSpace::CodeLargeObject => Some(&self.code_lo_space),
            AllocationSpace::NewLargeObject => Some(&self.new_lo_space),
            _ => None,
        }
    }

    /// Mutable large-object space by identity
    pub fn large_object_space_mut(&mut self, space: AllocationSpace) -> Option<&mut LargeObjectSpace> {
        match space {
            AllocationSpace::LargeObject => Some(&mut self.lo_space),
            AllocationSpace::CodeLargeObject => Some(&mut self.code_lo_space),
            AllocationSpace::NewLargeObject => Some(&mut self.new_lo_space),
            _ => None,
        }
    }

    /// Every space, paged ones first
    pub fn spaces(&self) -> impl Iterator<Item = &dyn Space> {
        [
            &self.read_only_space as &dyn Space,
            &self.new_space,
            &self.old_space,
            &self.code_space,
            &self.map_space,
            &self.lo_space,
            &self.code_lo_space,
            &self.new_lo_space,
        ]
        .into_iter()
    }

    /// Bytes reserved by all chunks in use
    pub fn committed_memory(&self) -> usize {
        self.spaces().map(|s| s.committed_memory()).sum()
    }

    // ==================== Allocation ====================

    fn target_space(&self, size: usize, space: AllocationSpace) -> AllocationSpace {
        if space.is_large_object() {
            return space;
        }
        let max_regular = if space.is_code() {
            self.allocator.layout().allocatable_memory_in_code_page()
        } else {
            MAX_REGULAR_HEAP_OBJECT_SIZE
        };
        if size <= max_regular {
            return space;
        }
        match space {
            AllocationSpace::New => AllocationSpace::NewLargeObject,
            AllocationSpace::Code => AllocationSpace::CodeLargeObject,
            _ => AllocationSpace::LargeObject,
        }
    }

    /// Allocate `size` bytes in `space`, or its large-object space when
    /// the object does not fit on a regular page.
    pub fn allocate_raw(&mut self, size: usize, space: AllocationSpace) -> AllocationResult {
        let protection = self.code_protection();
        let result = match self.target_space(size, space) {
            AllocationSpace::ReadOnly => self.read_only_space.allocate_raw(size, protection),
            AllocationSpace::New => self.new_space.allocate_raw(size, protection),
            AllocationSpace::Old => self.old_space.allocate_raw(size, protection),
            AllocationSpace::Code => self.code_space.allocate_raw(size, protection),
            AllocationSpace::Map => self.map_space.allocate_raw(size, protection),
            AllocationSpace::LargeObject => self.lo_space.allocate_raw(size, protection),
            AllocationSpace::CodeLargeObject => self.code_lo_space.allocate_raw(size, protection),
            AllocationSpace::NewLargeObject => self.new_lo_space.allocate_raw(size, protection),
        };

        #[cfg(feature = "gc_logging")]
        if let AllocationResult::Retry(retry) = result {
            tracing::debug!(target: "osprey::gc", space = %retry, size, "allocation needs retry");
        }

        result
    }

    /// Allocate, and on `Retry` hand queued and pooled chunks back to the
    /// OS and try exactly once more.
    pub fn allocate_raw_with_retry(&mut self, size: usize, space: AllocationSpace) -> AllocationResult {
        let result = self.allocate_raw(size, space);
        if !result.is_retry() {
            return result;
        }
        let _unmapped = self.allocator.unmap_queued_chunks();
        let _released = self.allocator.release_pooled_chunks();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "osprey::gc",
            unmapped = _unmapped,
            released = _released,
            "released memory before retrying allocation"
        );

        self.allocate_raw(size, space)
    }

    /// Unlink the chunk starting at `base` from its space. Regular data
    /// pages go to the chunk pool, everything else is queued for unmapping.
    pub fn release_page(&mut self, base: Address) -> bool {
        let Some(owner) = self.find_chunk_base(base).map(|(owner, _)| owner) else {
            return false;
        };
        if let Some(space) = self.large_object_space_mut(owner) {
            let object = space.find_chunk(base).map(|c| c.area_start());
            return object.is_some_and(|object| space.free_object(object));
        }
        let mode = if owner.is_code() {
            FreeMode::PreFreeAndQueue
        } else {
            FreeMode::Pooled
        };
        self.paged_space_mut(owner)
            .is_some_and(|space| space.release_page_with_mode(base, mode))
    }

    // ==================== Chunk lookup ====================

    /// Chunk whose reservation contains `address`
    pub fn chunk_from_address(&self, address: Address) -> Option<&MemoryChunk> {
        self.spaces()
            .flat_map(|space| space.chunks())
            .find(|chunk| chunk.address() <= address && address < chunk.address() + chunk.size())
            .map(|chunk| &**chunk)
    }

    fn find_chunk_base(&self, address: Address) -> Option<(AllocationSpace, Address)> {
        self.chunk_from_address(address)
            .map(|chunk| (chunk.owner(), chunk.address()))
    }

    /// Mutable chunk whose reservation contains `address`
    pub fn chunk_from_address_mut(&mut self, address: Address) -> Option<&mut MemoryChunk> {
        let (owner, base) = self.find_chunk_base(address)?;
        debug_assert!(base % PAGE_SIZE == 0);
        if owner.is_large_object() {
            self.large_object_space_mut(owner)?.find_chunk_mut(base)
        } else {
            self.paged_space_mut(owner)?.find_chunk_mut(base)
        }
    }

    /// Copy `bytes` into the heap at `address`.
    ///
    /// Writes into write-protected code need an open modification scope.
    pub fn write_code(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let chunk = self
            .chunk_from_address_mut(address)
            .ok_or(GcError::NotInHeap { address })?;
        chunk.write_bytes(address, bytes);
        Ok(())
    }

    // ==================== Marking and barrier ====================

    /// Turn marking barriers on for every chunk
    pub fn start_marking(&mut self, is_compacting: bool) {
        self.is_marking = true;
        self.is_compacting = is_compacting;
        self.set_marking(true);
    }

    /// Turn marking barriers off and clear evacuation candidates
    pub fn finish_marking(&mut self) {
        self.is_marking = false;
        self.is_compacting = false;
        self.set_marking(false);
        for space in self.spaces() {
            for chunk in space.chunks() {
                chunk.clear_flag(ChunkFlags::EVACUATION_CANDIDATE);
            }
        }
    }

    fn set_marking(&mut self, is_marking: bool) {
        for space in [
            &mut self.read_only_space,
            &mut self.new_space,
            &mut self.old_space,
            &mut self.code_space,
            &mut self.map_space,
        ] {
            space.set_marking(is_marking);
        }
        for space in [&mut self.lo_space, &mut self.code_lo_space, &mut self.new_lo_space] {
            space.set_marking(is_marking);
        }
    }

    /// Whether marking barriers are on
    pub fn is_marking(&self) -> bool {
        self.is_marking
    }

    /// Whether the current cycle evacuates candidates
    pub fn is_compacting(&self) -> bool {
        self.is_compacting
    }

    /// Select the chunk at `base` for evacuation. Only old-generation
    /// chunks of a compacting cycle qualify.
    pub fn mark_evacuation_candidate(&self, base: Address) -> bool {
        let Some(chunk) = self.chunk_from_address(base) else {
            return false;
        };
        if !self.is_compacting
            || chunk.in_young_generation()
            || chunk.in_read_only_space()
            || chunk.is_flag_set(ChunkFlags::NEVER_EVACUATE)
        {
            return false;
        }
        chunk.set_flag(ChunkFlags::EVACUATION_CANDIDATE);
        true
    }

    /// Write barrier for storing a pointer to `value` into `slot`
    pub fn record_write(&self, slot: Address, value: Address) -> Option<RememberedSetType> {
        let host = self.chunk_from_address(slot)?;
        let value = self.chunk_from_address(value)?;
        barrier::record_write(host, slot, value)
    }

    /// Forget recorded slots inside `object` until it is rescanned
    pub fn invalidate_recorded_slots(&self, object: Address, size: usize) -> bool {
        match self.chunk_from_address(object) {
            Some(chunk) => {
                chunk.invalidate_recorded_slots(object, size, self.is_compacting);
                true
            }
            None => false,
        }
    }

    fn code_spaces(&self) -> [&dyn Space; 2] {
        [&self.code_space, &self.code_lo_space]
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("committed", &self.committed_memory())
            .field("allocator", &self.allocator)
            .field("is_marking", &self.is_marking)
            .finish()
    }
}

/// Makes every code chunk writable while alive.
///
/// Scopes nest; chunks added while a scope is open start writable and are
/// protected again when the outermost scope closes.
pub struct CodeSpaceMemoryModificationScope<'a> {
    heap: &'a mut Heap,
}

impl<'a> CodeSpaceMemoryModificationScope<'a> {
    /// Open a scope on `heap`
    pub fn new(heap: &'a mut Heap) -> Self {
        if heap.config.write_protect_code_memory {
            heap.code_space_memory_modification_scope_depth += 1;
            for space in heap.code_spaces() {
                space.set_read_and_writable();
            }
        }
        Self { heap }
    }
}

impl Deref for CodeSpaceMemoryModificationScope<'_> {
    type Target = Heap;

    fn deref(&self) -> &Heap {
        self.heap
    }
}

impl DerefMut for CodeSpaceMemoryModificationScope<'_> {
    fn deref_mut(&mut self) -> &mut Heap {
        self.heap
    }
}

impl Drop for CodeSpaceMemoryModificationScope<'_> {
    fn drop(&mut self) {
        if self.heap.config.write_protect_code_memory {
            self.heap.code_space_memory_modification_scope_depth -= 1;
            for space in self.heap.code_spaces() {
                space.set_default_code_permissions();
            }
        }
    }
}

/// Makes one code chunk writable while alive
pub struct CodePageMemoryModificationScope<'c> {
    chunk: &'c mut MemoryChunk,
    active: bool,
}

impl<'c> CodePageMemoryModificationScope<'c> {
    /// Open a scope on `chunk`; data chunks and unprotected code chunks
    /// are left alone.
    pub fn new(chunk: &'c mut MemoryChunk) -> Self {
        let active = chunk.is_executable() && chunk.code_protection().write_protect_code_memory;
        if active {
            chunk.set_read_and_writable();
        }
        Self { chunk, active }
    }
}

impl Deref for CodePageMemoryModificationScope<'_> {
    type Target = MemoryChunk;

    fn deref(&self) -> &MemoryChunk {
        self.chunk
    }
}

impl DerefMut for CodePageMemoryModificationScope<'_> {
    fn deref_mut(&mut self) -> &mut MemoryChunk {
        self.chunk
    }
}

impl Drop for CodePageMemoryModificationScope<'_> {
    fn drop(&mut self) {
        if self.active {
            self.chunk.set_default_code_permissions();
        }
    }
}
