//! # Osprey VM Heap
//!
//! Page-based heap memory: chunks, remembered sets and the spaces built
//! on top of them.
//!
//! ## Design
//!
//! - **Chunks**: aligned reservations with a header of side tables (mark
//!   bits, slot sets, invalidated slots, free lists) allocated on demand
//! - **Code pages**: W^X through a nesting write-unprotect counter; only
//!   the 0 to 1 and 1 to 0 edges touch page permissions
//! - **Remembered sets**: allocated lock-free by racing threads, the
//!   loser's set is freed
//! - **Allocation**: bump pointer over free-list blocks; a full space
//!   answers [`AllocationResult::Retry`] instead of blocking

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod array_buffer_tracker;
pub mod barrier;
pub mod bitmap;
pub mod code_object_registry;
pub mod error;
pub mod flags;
pub mod free_list;
pub mod globals;
pub mod heap;
pub mod invalidated_slots;
pub mod layout;
pub mod lazy_box;
pub mod memory_allocator;
pub mod memory_chunk;
pub mod page_allocator;
pub mod slot_set;
pub mod spaces;
pub mod typed_slot_set;

pub use error::{GcError, Result};
pub use flags::ChunkFlags;
pub use globals::{
    Address, AllocationSpace, Executability, ExternalBackingStoreType, PAGE_SIZE,
    RememberedSetType,
};
pub use heap::{CodePageMemoryModificationScope, CodeSpaceMemoryModificationScope, Heap, HeapConfig};
pub use layout::MemoryChunkLayout;
pub use memory_allocator::{FreeMode, MemoryAllocator};
pub use memory_chunk::{CodeProtection, MemoryChunk};
#[cfg(unix)]
pub use page_allocator::OsPageAllocator;
pub use page_allocator::{
    PageAllocator, Permission, StdPageAllocator, VirtualMemory, default_page_allocator,
};
pub use slot_set::{SlotCallbackResult, SlotSet};
pub use spaces::{AllocationResult, LargeObjectSpace, PagedSpace, Space};
pub use typed_slot_set::{SlotType, TypedSlotSet};
