//! Mark bitmap
//!
//! One bit per tagged word of a regular page. Large chunks only ever
//! mark their first object, which starts inside the first page.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::globals::{PAGE_SIZE, TAGGED_SIZE};

const BITS_PER_CELL: usize = 64;

/// Number of cells covering one page
pub const BITMAP_CELLS: usize = PAGE_SIZE / TAGGED_SIZE / BITS_PER_CELL;

/// Concurrent mark bits for one chunk
pub struct Bitmap {
    cells: Box<[AtomicU64]>,
}

impl Bitmap {
    /// All bits clear
    pub fn new() -> Self {
        Self {
            cells: (0..BITMAP_CELLS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Bit index of a byte offset from the chunk start
    #[inline]
    pub const fn index_of(offset: usize) -> usize {
        offset / TAGGED_SIZE
    }

    #[inline]
    fn locate(index: usize) -> (usize, u64) {
        assert!(index < BITMAP_CELLS * BITS_PER_CELL, "bit {index} out of range");
        (index / BITS_PER_CELL, 1u64 << (index % BITS_PER_CELL))
    }

    /// Set a bit. Returns `true` if this call flipped it.
    pub fn set(&self, index: usize) -> bool {
        let (cell, mask) = Self::locate(index);
        self.cells[cell].fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    /// Clear a bit. Returns `true` if this call flipped it.
    pub fn clear(&self, index: usize) -> bool {
        let (cell, mask) = Self::locate(index);
        self.cells[cell].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    /// Whether a bit is set
    pub fn is_set(&self, index: usize) -> bool {
        let (cell, mask) = Self::locate(index);
        self.cells[cell].load(Ordering::Acquire) & mask != 0
    }

    /// Set every bit
    pub fn mark_all_bits(&self) {
        for cell in self.cells.iter() {
            cell.store(u64::MAX, Ordering::Relaxed);
        }
    }

    /// Clear every bit
    pub fn clear_all(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Whether no bit is set
    pub fn is_clean(&self) -> bool {
        self.cells.iter().all(|c| c.load(Ordering::Relaxed) == 0)
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap").field("set", &self.count()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_and_count() {
        let bitmap = Bitmap::new();
        assert!(bitmap.is_clean());
        assert!(bitmap.set(Bitmap::index_of(64)));
        assert!(!bitmap.set(Bitmap::index_of(64)));
        assert!(bitmap.is_set(8));
        assert_eq!(bitmap.count(), 1);
        assert!(bitmap.clear(8));
        assert!(!bitmap.clear(8));
        assert!(bitmap.is_clean());
    }

    #[test]
    fn test_mark_all() {
        let bitmap = Bitmap::new();
        bitmap.mark_all_bits();
        assert_eq!(bitmap.count(), PAGE_SIZE / TAGGED_SIZE);
        bitmap.clear_all();
        assert!(bitmap.is_clean());
    }
}
