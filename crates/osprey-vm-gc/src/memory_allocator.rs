//! Chunk reservation and release
//!
//! The allocator turns page-allocator reservations into initialized
//! [`MemoryChunk`]s and takes them back in one of three [`FreeMode`]s:
//!
//! - **Full**: release every side table and unmap immediately
//! - **PreFreeAndQueue**: drop the chunk from the accounting now, unmap on
//!   the next [`MemoryAllocator::unmap_queued_chunks`]
//! - **Pooled**: like the queued mode, but the unmapper keeps the region
//!   (with its marking bitmap) in a pool for the next data page

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{GcError, Result};
use crate::flags::ChunkFlags;
use crate::globals::{AllocationSpace, Executability, PAGE_SIZE};
use crate::layout::MemoryChunkLayout;
use crate::memory_chunk::{CodeProtection, MemoryChunk};
use crate::page_allocator::{PageAllocator, Permission, VirtualMemory};

/// How a chunk is handed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeMode {
    /// Release and unmap now
    Full,
    /// Unaccount now, unmap later
    PreFreeAndQueue,
    /// Unaccount now, keep the region for reuse
    Pooled,
}

/// Reserves, initializes and frees memory chunks
pub struct MemoryAllocator {
    page_allocator: Arc<dyn PageAllocator>,
    layout: MemoryChunkLayout,
    /// Upper bound on reserved bytes, pooled and queued chunks included
    capacity: usize,
    max_pool_size: usize,
    /// Bytes of chunks in use
    size: AtomicUsize,
    size_executable: AtomicUsize,
    /// Bytes of live reservations
    reserved: AtomicUsize,
    pool: Mutex<Vec<Box<MemoryChunk>>>,
    queued: Mutex<Vec<Box<MemoryChunk>>>,
}

impl MemoryAllocator {
    /// Allocator reserving at most `capacity` bytes and pooling at most
    /// `max_pool_size` chunks
    pub fn new(page_allocator: Arc<dyn PageAllocator>, capacity: usize, max_pool_size: usize) -> Self {
        let layout = MemoryChunkLayout::new(page_allocator.commit_page_size());
        Self {
            page_allocator,
            layout,
            capacity,
            max_pool_size,
            size: AtomicUsize::new(0),
            size_executable: AtomicUsize::new(0),
            reserved: AtomicUsize::new(0),
            pool: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
        }
    }

    /// Layout of chunks handed out
    #[inline]
    pub fn layout(&self) -> MemoryChunkLayout {
        self.layout
    }

    /// Backing page allocator
    #[inline]
    pub fn page_allocator(&self) -> &Arc<dyn PageAllocator> {
        &self.page_allocator
    }

    /// Bytes of chunks in use
    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Bytes of executable chunks in use
    #[inline]
    pub fn size_executable(&self) -> usize {
        self.size_executable.load(Ordering::Relaxed)
    }

    /// Bytes of live reservations, including pooled and queued chunks
    #[inline]
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }

    /// Reservation limit
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks waiting in the pool
    pub fn pooled_chunk_count(&self) -> usize {
        self.pool.lock().len()
    }

    /// Chunks waiting to be unmapped or pooled
    pub fn queued_chunk_count(&self) -> usize {
        self.queued.lock().len()
    }

    /// Allocate a regular page for `owner`, reusing a pooled region for
    /// data pages when one is available.
    pub fn allocate_page(
        &self,
        owner: AllocationSpace,
        executable: Executability,
        protection: CodeProtection,
    ) -> Result<Box<MemoryChunk>> {
        debug_assert!(!owner.is_large_object());
        let area_size = self.layout.allocatable_memory_in_memory_chunk(owner);
        if executable == Executability::NotExecutable {
            let pooled = self.pool.lock().pop();
            if let Some(pooled) = pooled {
                return Ok(self.reuse_pooled(pooled, owner, area_size, protection));
            }
        }
        self.allocate_chunk(area_size, executable, owner, protection)
    }

    fn reuse_pooled(
        &self,
        pooled: Box<MemoryChunk>,
        owner: AllocationSpace,
        area_size: usize,
        protection: CodeProtection,
    ) -> Box<MemoryChunk> {
        debug_assert!(pooled.is_flag_set(ChunkFlags::POOLED));
        let reservation = pooled.into_reservation();
        let area_start = reservation.address() + self.layout.object_start_offset_in_data_page();
        let chunk_size = reservation.size();
        let chunk = MemoryChunk::initialize(
            reservation,
            area_start,
            area_start + area_size,
            Executability::NotExecutable,
            owner,
            protection,
        );
        self.size.fetch_add(chunk_size, Ordering::Relaxed);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "osprey::gc",
            space = %owner,
            address = format_args!("{:#x}", chunk.address()),
            "reused pooled chunk"
        );

        chunk
    }

    /// Reserve and initialize a chunk with `area_size` object bytes.
    ///
    /// Executable chunks get guard pages around the object area. With
    /// code write protection on, the object area starts out writable when
    /// a code-space modification scope is open and protected otherwise.
    pub fn allocate_chunk(
        &self,
        area_size: usize,
        executable: Executability,
        owner: AllocationSpace,
        protection: CodeProtection,
    ) -> Result<Box<MemoryChunk>> {
        if !owner.is_large_object() {
            let max = self.layout.allocatable_memory_in_memory_chunk(owner);
            if area_size > max {
                return Err(GcError::ChunkTooLarge {
                    space: owner,
                    requested: area_size,
                    max,
                });
            }
        }
        let chunk_size = self.layout.chunk_size_for_area(owner, area_size);
        if !self.try_reserve_capacity(chunk_size) {
            return Err(GcError::ReservationFailed {
                space: owner,
                size: chunk_size,
            });
        }

        let Some(reservation) = VirtualMemory::reserve(
            self.page_allocator.clone(),
            chunk_size,
            PAGE_SIZE,
            Permission::ReadWrite,
        ) else {
            self.reserved.fetch_sub(chunk_size, Ordering::Relaxed);
            return Err(GcError::ReservationFailed {
                space: owner,
                size: chunk_size,
            });
        };

        let base = reservation.address();
        let area_start = base + self.layout.object_start_offset_in_memory_chunk(owner);
        let area_end = area_start + area_size;
        if executable == Executability::Executable {
            self.commit_executable_layout(&reservation, area_start, area_size, protection);
        }

        let chunk = MemoryChunk::initialize(
            reservation,
            area_start,
            area_end,
            executable,
            owner,
            protection,
        );
        self.size.fetch_add(chunk_size, Ordering::Relaxed);
        if executable == Executability::Executable {
            self.size_executable.fetch_add(chunk_size, Ordering::Relaxed);
        }
        Ok(chunk)
    }

    fn try_reserve_capacity(&self, bytes: usize) -> bool {
        self.reserved
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |reserved| {
                reserved
                    .checked_add(bytes)
                    .filter(|&total| total <= self.capacity)
            })
            .is_ok()
    }

    fn commit_executable_layout(
        &self,
        reservation: &VirtualMemory,
        area_start: usize,
        area_size: usize,
        protection: CodeProtection,
    ) {
        let base = reservation.address();
        let guard = self.layout.code_page_guard_size();
        let pre_guard = base + self.layout.code_page_guard_start_offset();
        let post_guard = base + reservation.size() - guard;
        let area_len = post_guard - area_start;
        debug_assert!(area_len >= area_size);

        let area_permission =
            if protection.write_protect_code_memory && protection.modification_scope_depth == 0 {
                protection.default_code_permission()
            } else {
                Permission::ReadWrite
            };
        let ok = reservation.set_permissions(pre_guard, guard, Permission::NoAccess)
            && reservation.set_permissions(area_start, area_len, area_permission)
            && reservation.set_permissions(post_guard, guard, Permission::NoAccess);
        assert!(ok, "failed to lay out executable chunk {base:#x}");
    }

    /// Hand a chunk back
    pub fn free(&self, mut chunk: Box<MemoryChunk>, mode: FreeMode) {
        match mode {
            FreeMode::Full => {
                self.pre_free_memory(&chunk);
                self.perform_free_memory(chunk);
            }
            FreeMode::PreFreeAndQueue => {
                self.pre_free_memory(&chunk);
                self.queued.lock().push(chunk);
            }
            FreeMode::Pooled => {
                assert_eq!(chunk.size(), PAGE_SIZE, "only regular pages are pooled");
                assert!(!chunk.is_executable(), "code pages are never pooled");
                chunk.set_flag(ChunkFlags::POOLED);
                self.pre_free_memory(&chunk);
                self.queued.lock().push(chunk);
            }
        }
    }

    fn pre_free_memory(&self, chunk: &MemoryChunk) {
        debug_assert!(!chunk.is_flag_set(ChunkFlags::PRE_FREED));
        self.size.fetch_sub(chunk.size(), Ordering::Relaxed);
        if chunk.is_executable() {
            self.size_executable
                .fetch_sub(chunk.size(), Ordering::Relaxed);
        }
        chunk.set_flag(ChunkFlags::PRE_FREED);
    }

    fn perform_free_memory(&self, mut chunk: Box<MemoryChunk>) {
        let size = chunk.size();
        chunk.release_all_allocated_memory();
        let freed = chunk.reservation_mut().release();
        assert!(freed, "failed to unmap chunk {:#x}", chunk.address());
        self.reserved.fetch_sub(size, Ordering::Relaxed);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "osprey::gc",
            space = %chunk.owner(),
            address = format_args!("{:#x}", chunk.address()),
            size,
            "chunk unmapped"
        );
    }

    /// Unmap queued chunks, moving pooled ones into the pool. Returns the
    /// number of chunks processed.
    pub fn unmap_queued_chunks(&self) -> usize {
        let queued = std::mem::take(&mut *self.queued.lock());
        let count = queued.len();
        for mut chunk in queued {
            if chunk.is_flag_set(ChunkFlags::POOLED) {
                chunk.release_allocated_memory_needed_for_writable_chunk();
                let mut pool = self.pool.lock();
                if pool.len() < self.max_pool_size {
                    pool.push(chunk);
                    continue;
                }
            }
            self.perform_free_memory(chunk);
        }
        count
    }

    /// Unmap every pooled chunk. Returns the number released.
    pub fn release_pooled_chunks(&self) -> usize {
        let pooled = std::mem::take(&mut *self.pool.lock());
        let count = pooled.len();
        for chunk in pooled {
            self.perform_free_memory(chunk);
        }
        count
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        self.unmap_queued_chunks();
        self.release_pooled_chunks();
    }
}

impl std::fmt::Debug for MemoryAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("size", &self.size())
            .field("reserved", &self.reserved())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_allocator::StdPageAllocator;

    fn allocator(capacity: usize) -> (Arc<StdPageAllocator>, MemoryAllocator) {
        let pages = Arc::new(StdPageAllocator::new());
        let allocator = MemoryAllocator::new(pages.clone(), capacity, 2);
        (pages, allocator)
    }

    #[test]
    fn test_capacity_is_enforced() {
        let (_, allocator) = allocator(PAGE_SIZE);
        let page = allocator
            .allocate_page(AllocationSpace::Old, Executability::NotExecutable, CodeProtection::default())
            .expect("first page");
        let err = allocator
            .allocate_page(AllocationSpace::Old, Executability::NotExecutable, CodeProtection::default())
            .expect_err("over capacity");
        assert!(matches!(err, GcError::ReservationFailed { .. }));
        allocator.free(page, FreeMode::Full);
        assert_eq!(allocator.reserved(), 0);
        assert_eq!(allocator.size(), 0);
    }

    #[test]
    fn test_regular_page_rejects_oversized_area() {
        let (_, allocator) = allocator(4 * PAGE_SIZE);
        let err = allocator
            .allocate_chunk(
                PAGE_SIZE,
                Executability::NotExecutable,
                AllocationSpace::Old,
                CodeProtection::default(),
            )
            .expect_err("too large");
        assert!(matches!(err, GcError::ChunkTooLarge { .. }));
    }

    #[test]
    fn test_queued_free_unmaps_later() {
        let (pages, allocator) = allocator(4 * PAGE_SIZE);
        let page = allocator
            .allocate_page(AllocationSpace::Old, Executability::NotExecutable, CodeProtection::default())
            .expect("page");
        allocator.free(page, FreeMode::PreFreeAndQueue);
        assert_eq!(allocator.size(), 0);
        assert_eq!(allocator.reserved(), PAGE_SIZE);
        assert_eq!(pages.allocation_count(), 1);
        assert_eq!(allocator.unmap_queued_chunks(), 1);
        assert_eq!(pages.allocation_count(), 0);
        assert_eq!(allocator.reserved(), 0);
    }

    #[test]
    fn test_pooled_chunk_is_reused() {
        let (pages, allocator) = allocator(4 * PAGE_SIZE);
        let page = allocator
            .allocate_page(AllocationSpace::New, Executability::NotExecutable, CodeProtection::default())
            .expect("page");
        let address = page.address();
        allocator.free(page, FreeMode::Pooled);
        allocator.unmap_queued_chunks();
        assert_eq!(allocator.pooled_chunk_count(), 1);

        let reused = allocator
            .allocate_page(AllocationSpace::Old, Executability::NotExecutable, CodeProtection::default())
            .expect("reused");
        assert_eq!(reused.address(), address);
        assert!(!reused.is_flag_set(ChunkFlags::POOLED));
        assert!(!reused.mutexes_released());
        assert_eq!(pages.allocation_count(), 1);
        assert_eq!(allocator.size(), PAGE_SIZE);
    }

    #[test]
    fn test_executable_chunk_has_guard_pages() {
        let (pages, allocator) = allocator(4 * PAGE_SIZE);
        let protection = CodeProtection {
            write_protect_code_memory: true,
            jitless: false,
            modification_scope_depth: 0,
        };
        let chunk = allocator
            .allocate_page(AllocationSpace::Code, Executability::Executable, protection)
            .expect("code page");
        let layout = allocator.layout();
        let base = chunk.address();
        assert_eq!(pages.permission_at(base), Some(Permission::ReadWrite));
        assert_eq!(
            pages.permission_at(base + layout.code_page_guard_start_offset()),
            Some(Permission::NoAccess)
        );
        assert_eq!(
            pages.permission_at(chunk.area_start()),
            Some(Permission::ReadExecute)
        );
        assert_eq!(
            pages.permission_at(base + PAGE_SIZE - 1),
            Some(Permission::NoAccess)
        );
        assert_eq!(allocator.size_executable(), PAGE_SIZE);
        assert!(chunk.code_object_registry().is_some());
        allocator.free(chunk, FreeMode::Full);
        assert_eq!(allocator.size_executable(), 0);
    }
}
