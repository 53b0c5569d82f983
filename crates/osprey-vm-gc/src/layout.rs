//! Chunk layout
//!
//! A data chunk is `[header | objects]`. A code chunk puts a guard page
//! between the header and the objects and another one at the very end:
//!
//! ```text
//! | header | guard | objects ............ | guard |
//! ^ base   ^ code_page_guard_start_offset  ^ object_end_offset_in_code_page
//! ```
//!
//! All offsets depend on the platform's commit page size, so the layout is
//! a small value built from it.

use crate::globals::{AllocationSpace, MEMORY_CHUNK_HEADER_SIZE, PAGE_SIZE, TAGGED_SIZE, round_up};

/// Offsets of the object area inside a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryChunkLayout {
    commit_page_size: usize,
}

impl MemoryChunkLayout {
    /// Layout for the given commit page size
    pub const fn new(commit_page_size: usize) -> Self {
        assert!(commit_page_size.is_power_of_two());
        assert!(commit_page_size * 4 <= PAGE_SIZE);
        Self { commit_page_size }
    }

    /// Commit page size the layout was built for
    #[inline]
    pub const fn commit_page_size(&self) -> usize {
        self.commit_page_size
    }

    /// Start of the leading guard page of a code chunk
    #[inline]
    pub const fn code_page_guard_start_offset(&self) -> usize {
        round_up(MEMORY_CHUNK_HEADER_SIZE, self.commit_page_size)
    }

    /// Size of each guard region
    #[inline]
    pub const fn code_page_guard_size(&self) -> usize {
        self.commit_page_size
    }

    /// First object byte of a code chunk
    #[inline]
    pub const fn object_start_offset_in_code_page(&self) -> usize {
        self.code_page_guard_start_offset() + self.code_page_guard_size()
    }

    /// One past the last object byte of a regular code page
    #[inline]
    pub const fn object_end_offset_in_code_page(&self) -> usize {
        PAGE_SIZE - self.commit_page_size
    }

    /// Object bytes of a regular code page
    #[inline]
    pub const fn allocatable_memory_in_code_page(&self) -> usize {
        self.object_end_offset_in_code_page() - self.object_start_offset_in_code_page()
    }

    /// First object byte of a data chunk
    #[inline]
    pub const fn object_start_offset_in_data_page(&self) -> usize {
        round_up(MEMORY_CHUNK_HEADER_SIZE, TAGGED_SIZE)
    }

    /// Object bytes of a regular data page
    #[inline]
    pub const fn allocatable_memory_in_data_page(&self) -> usize {
        PAGE_SIZE - self.object_start_offset_in_data_page()
    }

    /// First object byte of a chunk owned by `space`
    pub const fn object_start_offset_in_memory_chunk(&self, space: AllocationSpace) -> usize {
        if space.is_code() {
            self.object_start_offset_in_code_page()
        } else {
            self.object_start_offset_in_data_page()
        }
    }

    /// Object bytes of a regular page owned by `space`
    pub const fn allocatable_memory_in_memory_chunk(&self, space: AllocationSpace) -> usize {
        if space.is_code() {
            self.allocatable_memory_in_code_page()
        } else {
            self.allocatable_memory_in_data_page()
        }
    }

    /// Reservation size for a chunk with `area_size` object bytes
    pub const fn chunk_size_for_area(&self, space: AllocationSpace, area_size: usize) -> usize {
        if space.is_code() {
            round_up(
                self.object_start_offset_in_code_page() + area_size,
                self.commit_page_size,
            ) + self.code_page_guard_size()
        } else {
            round_up(
                self.object_start_offset_in_data_page() + area_size,
                self.commit_page_size,
            )
        }
    }
}
