//! Paged and large-object spaces
//!
//! A [`PagedSpace`] bump-allocates inside a linear allocation area carved
//! from a page's free list and grows by one page at a time. A
//! [`LargeObjectSpace`] gives every object its own chunk.
//!
//! Neither blocks or fails hard when full: allocation returns
//! [`AllocationResult::Retry`] and the caller decides how to make room.

use std::sync::Arc;

use crate::globals::{
    Address, AllocationSpace, Executability, PAGE_SIZE, TAGGED_SIZE, round_up,
};
use crate::flags::ChunkFlags;
use crate::memory_allocator::{FreeMode, MemoryAllocator};
use crate::memory_chunk::{CodeProtection, MemoryChunk};

/// Outcome of a raw allocation
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationResult {
    /// Start of the new object
    Object(Address),
    /// The space is full; make room and try again
    Retry(AllocationSpace),
}

impl AllocationResult {
    /// Whether the allocation has to be retried
    #[inline]
    pub fn is_retry(self) -> bool {
        matches!(self, AllocationResult::Retry(_))
    }

    /// Object address on success
    #[inline]
    pub fn to_address(self) -> Option<Address> {
        match self {
            AllocationResult::Object(address) => Some(address),
            AllocationResult::Retry(_) => None,
        }
    }

    /// Space that asked for a retry
    #[inline]
    pub fn retry_space(self) -> Option<AllocationSpace> {
        match self {
            AllocationResult::Retry(space) => Some(space),
            AllocationResult::Object(_) => None,
        }
    }
}

/// Operations common to all spaces
pub trait Space {
    /// Which space this is
    fn identity(&self) -> AllocationSpace;

    /// Chunks owned by the space
    fn chunks(&self) -> &[Box<MemoryChunk>];

    /// Bytes reserved by the space's chunks
    fn committed_memory(&self) -> usize {
        self.chunks().iter().map(|c| c.size()).sum()
    }

    /// Physical memory backing the space's chunks
    fn committed_physical_memory(&self) -> usize {
        self.chunks()
            .iter()
            .map(|c| c.committed_physical_memory())
            .sum()
    }

    /// Chunk starting at `base`
    fn find_chunk(&self, base: Address) -> Option<&MemoryChunk> {
        self.chunks()
            .iter()
            .find(|c| c.address() == base)
            .map(|c| &**c)
    }

    /// Whether `address` lies in one of the space's object areas
    fn contains(&self, address: Address) -> bool {
        self.chunks().iter().any(|c| c.contains(address))
    }

    /// Set barrier flags on every chunk for the current phase
    fn set_page_flags(&self, is_marking: bool) {
        let young = self.identity().is_young();
        for chunk in self.chunks() {
            if young {
                chunk.set_young_generation_page_flags(is_marking);
            } else {
                chunk.set_old_generation_page_flags(is_marking);
            }
        }
    }

    /// Open a write window on every code chunk
    fn set_read_and_writable(&self) {
        for chunk in self.chunks() {
            chunk.set_read_and_writable();
        }
    }

    /// Close a write window on every code chunk, leaving it readable
    fn set_readable(&self) {
        for chunk in self.chunks() {
            chunk.set_readable();
        }
    }

    /// Close a write window on every code chunk, leaving it executable
    fn set_read_and_executable(&self) {
        for chunk in self.chunks() {
            chunk.set_read_and_executable();
        }
    }

    /// Close a write window on every code chunk with the default permission
    fn set_default_code_permissions(&self) {
        for chunk in self.chunks() {
            chunk.set_default_code_permissions();
        }
    }
}

fn executability_of(space: AllocationSpace) -> Executability {
    if space.is_code() {
        Executability::Executable
    } else {
        Executability::NotExecutable
    }
}

/// Linear allocation area on one page
#[derive(Debug, Clone, Copy, Default)]
struct LinearAllocationArea {
    page: usize,
    top: Address,
    limit: Address,
}

/// Space made of regular pages
pub struct PagedSpace {
    identity: AllocationSpace,
    allocator: Arc<MemoryAllocator>,
    pages: Vec<Box<MemoryChunk>>,
    max_capacity: usize,
    lab: Option<LinearAllocationArea>,
    is_marking: bool,
}

impl PagedSpace {
    /// Empty space growing to at most `max_capacity` bytes of pages
    pub fn new(identity: AllocationSpace, allocator: Arc<MemoryAllocator>, max_capacity: usize) -> Self {
        assert!(!identity.is_large_object(), "{identity} is not a paged space");
        Self {
            identity,
            allocator,
            pages: Vec::new(),
            max_capacity,
            lab: None,
            is_marking: false,
        }
    }

    /// Number of pages
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Largest total page size the space grows to
    #[inline]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Bytes left on free lists and in the linear allocation area
    pub fn available(&self) -> usize {
        let free: usize = self
            .pages
            .iter()
            .filter_map(|p| p.free_list_categories())
            .map(|c| c.available())
            .sum();
        free + self.lab.map_or(0, |lab| lab.limit - lab.top)
    }

    /// Bytes handed out to objects
    pub fn size_of_objects(&self) -> usize {
        let allocated: usize = self.pages.iter().map(|p| p.allocated_bytes()).sum();
        allocated - self.lab.map_or(0, |lab| lab.limit - lab.top)
    }

    /// Allocate `size` bytes, rounded up to the tagged size
    pub fn allocate_raw(&mut self, size: usize, protection: CodeProtection) -> AllocationResult {
        let size = round_up(size.max(TAGGED_SIZE), TAGGED_SIZE);
        assert!(
            size <= self.allocator.layout().allocatable_memory_in_memory_chunk(self.identity),
            "{size} bytes do not fit on a {} page",
            self.identity
        );

        if let Some(address) = self.bump(size) {
            return AllocationResult::Object(address);
        }
        self.retire_lab();
        let refilled = self.refill_from_free_lists(size)
            || (self.expand(protection) && self.refill_from_free_lists(size));
        match refilled.then(|| self.bump(size)).flatten() {
            Some(address) => AllocationResult::Object(address),
            None => AllocationResult::Retry(self.identity),
        }
    }

    fn bump(&mut self, size: usize) -> Option<Address> {
        let lab = self.lab.as_mut()?;
        if lab.limit - lab.top < size {
            return None;
        }
        let address = lab.top;
        lab.top += size;
        let page = &mut self.pages[lab.page];
        page.update_high_water_mark(lab.top);
        if let Some(registry) = page.code_object_registry_mut() {
            registry.register_newly_allocated_code_object(address);
        }
        Some(address)
    }

    fn retire_lab(&mut self) {
        let Some(lab) = self.lab.take() else {
            return;
        };
        self.free_on_page(lab.page, lab.top, lab.limit - lab.top);
    }

    fn free_on_page(&mut self, page: usize, address: Address, size: usize) {
        if size == 0 {
            return;
        }
        let page = &mut self.pages[page];
        page.decrease_allocated_bytes(size);
        let wasted = page
            .free_list_categories_mut()
            .map_or(size, |categories| categories.free(address, size));
        page.add_wasted_memory(wasted);
    }

    fn refill_from_free_lists(&mut self, size: usize) -> bool {
        for (index, page) in self.pages.iter_mut().enumerate() {
            let Some(block) = page
                .free_list_categories_mut()
                .and_then(|categories| categories.allocate(size))
            else {
                continue;
            };
            page.increase_allocated_bytes(block.size);
            self.lab = Some(LinearAllocationArea {
                page: index,
                top: block.address,
                limit: block.end(),
            });
            return true;
        }
        false
    }

    fn expand(&mut self, protection: CodeProtection) -> bool {
        if self.committed_memory() + PAGE_SIZE > self.max_capacity {
            return false;
        }
        let page = match self.allocator.allocate_page(
            self.identity,
            executability_of(self.identity),
            protection,
        ) {
            Ok(page) => page,
            Err(_err) => {
                #[cfg(feature = "gc_logging")]
                tracing::debug!(target: "osprey::gc", space = %self.identity, error = %_err, "expansion failed");
                return false;
            }
        };
        self.initialize_page(&page);
        self.pages.push(page);
        let index = self.pages.len() - 1;
        let (start, size) = (self.pages[index].area_start(), self.pages[index].area_size());
        self.free_on_page(index, start, size);
        true
    }

    fn initialize_page(&self, page: &MemoryChunk) {
        if self.identity.is_young() {
            page.set_flag(ChunkFlags::TO_PAGE);
            page.set_young_generation_page_flags(self.is_marking);
        } else {
            page.set_old_generation_page_flags(self.is_marking);
        }
    }

    /// Remember the marking phase so new pages get matching flags
    pub fn set_marking(&mut self, is_marking: bool) {
        self.is_marking = is_marking;
        self.set_page_flags(is_marking);
    }

    /// Mutable access to the page starting at `base`
    pub fn find_chunk_mut(&mut self, base: Address) -> Option<&mut MemoryChunk> {
        self.pages
            .iter_mut()
            .find(|p| p.address() == base)
            .map(|p| &mut **p)
    }

    /// Unlink the page starting at `base` and queue it for unmapping
    pub fn release_page(&mut self, base: Address) -> bool {
        self.release_page_with_mode(base, FreeMode::PreFreeAndQueue)
    }

    /// Unlink the page starting at `base` and free it with `mode`
    pub fn release_page_with_mode(&mut self, base: Address, mode: FreeMode) -> bool {
        let Some(index) = self.pages.iter().position(|p| p.address() == base) else {
            return false;
        };
        if let Some(lab) = self.lab {
            if lab.page == index {
                self.lab = None;
            } else if lab.page > index {
                self.lab = Some(LinearAllocationArea {
                    page: lab.page - 1,
                    ..lab
                });
            }
        }
        let page = self.pages.remove(index);
        self.allocator.free(page, mode);
        true
    }

    /// Release every page with `mode`
    pub fn tear_down(&mut self, mode: FreeMode) {
        self.lab = None;
        for page in self.pages.drain(..) {
            self.allocator.free(page, mode);
        }
    }
}

impl Space for PagedSpace {
    fn identity(&self) -> AllocationSpace {
        self.identity
    }

    fn chunks(&self) -> &[Box<MemoryChunk>] {
        &self.pages
    }
}

impl Drop for PagedSpace {
    fn drop(&mut self) {
        self.tear_down(FreeMode::Full);
    }
}

/// Space giving each object its own chunk
pub struct LargeObjectSpace {
    identity: AllocationSpace,
    allocator: Arc<MemoryAllocator>,
    pages: Vec<Box<MemoryChunk>>,
    max_capacity: usize,
    size_of_objects: usize,
    is_marking: bool,
}

impl LargeObjectSpace {
    /// Empty space growing to at most `max_capacity` bytes of chunks
    pub fn new(identity: AllocationSpace, allocator: Arc<MemoryAllocator>, max_capacity: usize) -> Self {
        assert!(identity.is_large_object(), "{identity} is not a large-object space");
        Self {
            identity,
            allocator,
            pages: Vec::new(),
            max_capacity,
            size_of_objects: 0,
            is_marking: false,
        }
    }

    /// Number of objects (one per chunk)
    #[inline]
    pub fn object_count(&self) -> usize {
        self.pages.len()
    }

    /// Bytes of live large objects
    #[inline]
    pub fn size_of_objects(&self) -> usize {
        self.size_of_objects
    }

    /// Allocate a chunk holding one object of `size` bytes
    pub fn allocate_raw(&mut self, size: usize, protection: CodeProtection) -> AllocationResult {
        let size = round_up(size.max(TAGGED_SIZE), TAGGED_SIZE);
        let chunk_size = self
            .allocator
            .layout()
            .chunk_size_for_area(self.identity, size);
        if self.committed_memory() + chunk_size > self.max_capacity {
            return AllocationResult::Retry(self.identity);
        }
        let Ok(page) = self.allocator.allocate_chunk(
            size,
            executability_of(self.identity),
            self.identity,
            protection,
        ) else {
            return AllocationResult::Retry(self.identity);
        };
        if self.identity.is_young() {
            page.set_flag(ChunkFlags::TO_PAGE);
            page.set_young_generation_page_flags(self.is_marking);
        } else {
            page.set_old_generation_page_flags(self.is_marking);
        }
        let address = page.area_start();
        page.update_high_water_mark(page.area_end());
        self.size_of_objects += size;
        self.pages.push(page);
        AllocationResult::Object(address)
    }

    /// Remember the marking phase so new chunks get matching flags
    pub fn set_marking(&mut self, is_marking: bool) {
        self.is_marking = is_marking;
        self.set_page_flags(is_marking);
    }

    /// Mutable access to the chunk starting at `base`
    pub fn find_chunk_mut(&mut self, base: Address) -> Option<&mut MemoryChunk> {
        self.pages
            .iter_mut()
            .find(|p| p.address() == base)
            .map(|p| &mut **p)
    }

    /// Free the object starting at `object` together with its chunk
    pub fn free_object(&mut self, object: Address) -> bool {
        let Some(index) = self.pages.iter().position(|p| p.area_start() == object) else {
            return false;
        };
        let page = self.pages.remove(index);
        self.size_of_objects -= page.area_size();
        self.allocator.free(page, FreeMode::PreFreeAndQueue);
        true
    }
}

impl Space for LargeObjectSpace {
    fn identity(&self) -> AllocationSpace {
        self.identity
    }

    fn chunks(&self) -> &[Box<MemoryChunk>] {
        &self.pages
    }
}

impl Drop for LargeObjectSpace {
    fn drop(&mut self) {
        for page in self.pages.drain(..) {
            self.allocator.free(page, FreeMode::Full);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::MAX_REGULAR_HEAP_OBJECT_SIZE;
    use crate::page_allocator::StdPageAllocator;

    fn allocator(capacity: usize) -> Arc<MemoryAllocator> {
        Arc::new(MemoryAllocator::new(
            Arc::new(StdPageAllocator::new()),
            capacity,
            4,
        ))
    }

    #[test]
    fn test_bump_allocation_is_contiguous() {
        let mut space = PagedSpace::new(AllocationSpace::Old, allocator(8 * PAGE_SIZE), 8 * PAGE_SIZE);
        let a = space
            .allocate_raw(24, CodeProtection::default())
            .to_address()
            .expect("a");
        let b = space
            .allocate_raw(10, CodeProtection::default())
            .to_address()
            .expect("b");
        assert_eq!(b, a + 24);
        assert_eq!(space.page_count(), 1);
        assert_eq!(space.size_of_objects(), 40);
        assert!(space.contains(a));
        let page = space.find_chunk(space.chunks()[0].address()).expect("page");
        assert!(page.is_flag_set(ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING));
    }

    #[test]
    fn test_space_retries_at_capacity() {
        let mut space = PagedSpace::new(AllocationSpace::Old, allocator(8 * PAGE_SIZE), PAGE_SIZE);
        let object = MAX_REGULAR_HEAP_OBJECT_SIZE;
        assert!(!space.allocate_raw(object, CodeProtection::default()).is_retry());
        let result = space.allocate_raw(object, CodeProtection::default());
        assert_eq!(result, AllocationResult::Retry(AllocationSpace::Old));
        assert_eq!(result.retry_space(), Some(AllocationSpace::Old));
    }

    #[test]
    fn test_released_page_frees_lab() {
        let mut space = PagedSpace::new(AllocationSpace::Map, allocator(8 * PAGE_SIZE), 8 * PAGE_SIZE);
        let object = space
            .allocate_raw(64, CodeProtection::default())
            .to_address()
            .expect("object");
        let base = space.chunks()[0].address();
        assert!(space.release_page(base));
        assert!(!space.contains(object));
        assert_eq!(space.available(), 0);
        let again = space.allocate_raw(64, CodeProtection::default());
        assert!(!again.is_retry());
    }

    #[test]
    fn test_large_object_gets_own_chunk() {
        let mut space = LargeObjectSpace::new(
            AllocationSpace::LargeObject,
            allocator(8 * PAGE_SIZE),
            8 * PAGE_SIZE,
        );
        let size = PAGE_SIZE + 8;
        let object = space
            .allocate_raw(size, CodeProtection::default())
            .to_address()
            .expect("large object");
        let chunk = &space.chunks()[0];
        assert_eq!(chunk.area_start(), object);
        assert!(chunk.is_large_page());
        assert!(chunk.free_list_categories().is_none());
        assert_eq!(space.size_of_objects(), size);
        assert!(space.free_object(object));
        assert_eq!(space.object_count(), 0);
    }
}
