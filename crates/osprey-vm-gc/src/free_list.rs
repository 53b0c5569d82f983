//! Per-page free lists
//!
//! Free blocks are bucketed into size categories so allocation can start
//! searching at the first category whose blocks are large enough.

use crate::globals::{Address, FREE_SPACE_HEADER_SIZE};

/// Upper bound (inclusive) of each category's block size
const CATEGORY_LIMITS: [usize; 6] = [48, 96, 256, 2048, 16 * 1024, usize::MAX];

/// A free block on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// Start of the block
    pub address: Address,
    /// Size in bytes
    pub size: usize,
}

impl FreeBlock {
    /// First byte past the block
    #[inline]
    pub fn end(&self) -> Address {
        self.address + self.size
    }
}

/// Free-list categories of one page
#[derive(Debug, Default)]
pub struct FreeListCategories {
    categories: [Vec<FreeBlock>; CATEGORY_LIMITS.len()],
    available: usize,
}

impl FreeListCategories {
    /// No free blocks
    pub fn new() -> Self {
        Self::default()
    }

    fn category_for(size: usize) -> usize {
        CATEGORY_LIMITS
            .iter()
            .position(|&limit| size <= limit)
            .unwrap_or(CATEGORY_LIMITS.len() - 1)
    }

    /// Add a free block. Blocks too small to carry a free-space header
    /// are wasted; the wasted byte count is returned.
    pub fn free(&mut self, address: Address, size: usize) -> usize {
        if size < FREE_SPACE_HEADER_SIZE {
            return size;
        }
        self.categories[Self::category_for(size)].push(FreeBlock { address, size });
        self.available += size;
        0
    }

    /// Take a block of at least `size` bytes
    pub fn allocate(&mut self, size: usize) -> Option<FreeBlock> {
        let first = Self::category_for(size);
        for category in &mut self.categories[first..] {
            if let Some(i) = category.iter().position(|b| b.size >= size) {
                let block = category.swap_remove(i);
                self.available -= block.size;
                return Some(block);
            }
        }
        None
    }

    /// Bytes held by free blocks
    #[inline]
    pub fn available(&self) -> usize {
        self.available
    }

    /// Whether no block is available
    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Drop every block
    pub fn reset(&mut self) {
        for category in &mut self.categories {
            category.clear();
        }
        self.available = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_searches_larger_categories() {
        let mut free_list = FreeListCategories::new();
        assert_eq!(free_list.free(0x1000, 8), 8);
        assert_eq!(free_list.free(0x2000, 64), 0);
        assert_eq!(free_list.free(0x3000, 4096), 0);
        assert_eq!(free_list.available(), 4160);

        let block = free_list.allocate(100).expect("block");
        assert_eq!(block.address, 0x3000);
        assert_eq!(block.end(), 0x4000);
        assert!(free_list.allocate(100).is_none());
        assert_eq!(free_list.allocate(60).map(|b| b.address), Some(0x2000));
        assert!(free_list.is_empty());
    }
}
