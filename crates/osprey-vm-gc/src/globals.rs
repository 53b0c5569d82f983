//! Heap-wide constants and small shared enums

use std::fmt;

/// Raw address inside a reserved region
pub type Address = usize;

/// Size of a tagged heap slot
pub const TAGGED_SIZE: usize = 8;

/// log2 of [`PAGE_SIZE`]
pub const PAGE_SIZE_BITS: usize = 18;

/// Size and alignment of a regular heap page (256KB)
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;

/// Bytes reserved at the start of every chunk for its header
pub const MEMORY_CHUNK_HEADER_SIZE: usize = 256;

/// Objects larger than this go to a large-object space
pub const MAX_REGULAR_HEAP_OBJECT_SIZE: usize = PAGE_SIZE / 2;

/// Header of a free block: map, size and next pointer
pub const FREE_SPACE_HEADER_SIZE: usize = 3 * TAGGED_SIZE;

/// Round `value` up to a multiple of `alignment` (a power of two)
#[inline]
pub const fn round_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Round `value` down to a multiple of `alignment` (a power of two)
#[inline]
pub const fn round_down(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Whether `value` is a multiple of `alignment` (a power of two)
#[inline]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    value & (alignment - 1) == 0
}

/// Space that owns a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AllocationSpace {
    /// Immortal, never swept
    ReadOnly,
    /// Young generation
    New,
    /// Old generation
    Old,
    /// Executable code
    Code,
    /// Maps (hidden classes)
    Map,
    /// Old-generation objects too big for a regular page
    LargeObject,
    /// Code objects too big for a regular page
    CodeLargeObject,
    /// Young-generation objects too big for a regular page
    NewLargeObject,
}

impl AllocationSpace {
    /// Every space, in heap iteration order
    pub const ALL: [AllocationSpace; 8] = [
        AllocationSpace::ReadOnly,
        AllocationSpace::New,
        AllocationSpace::Old,
        AllocationSpace::Code,
        AllocationSpace::Map,
        AllocationSpace::LargeObject,
        AllocationSpace::CodeLargeObject,
        AllocationSpace::NewLargeObject,
    ];

    /// Whether objects in this space are executable code
    #[inline]
    pub const fn is_code(self) -> bool {
        matches!(self, AllocationSpace::Code | AllocationSpace::CodeLargeObject)
    }

    /// Whether this space holds one object per chunk
    #[inline]
    pub const fn is_large_object(self) -> bool {
        matches!(
            self,
            AllocationSpace::LargeObject
                | AllocationSpace::CodeLargeObject
                | AllocationSpace::NewLargeObject
        )
    }

    /// Whether this space belongs to the young generation
    #[inline]
    pub const fn is_young(self) -> bool {
        matches!(self, AllocationSpace::New | AllocationSpace::NewLargeObject)
    }

    /// Short name used in logs and errors
    pub const fn name(self) -> &'static str {
        match self {
            AllocationSpace::ReadOnly => "read_only_space",
            AllocationSpace::New => "new_space",
            AllocationSpace::Old => "old_space",
            AllocationSpace::Code => "code_space",
            AllocationSpace::Map => "map_space",
            AllocationSpace::LargeObject => "large_object_space",
            AllocationSpace::CodeLargeObject => "code_large_object_space",
            AllocationSpace::NewLargeObject => "new_large_object_space",
        }
    }
}

impl fmt::Display for AllocationSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a chunk's object area may hold machine code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Executability {
    /// Data only
    NotExecutable,
    /// Code, laid out with guard pages
    Executable,
}

/// Which remembered set a slot is recorded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RememberedSetType {
    /// Old-generation slots pointing into the young generation
    OldToNew,
    /// Slots pointing into evacuation candidates
    OldToOld,
}

impl RememberedSetType {
    #[inline]
    pub(crate) const fn index(self) -> usize {
        match self {
            RememberedSetType::OldToNew => 0,
            RememberedSetType::OldToOld => 1,
        }
    }
}

/// Kinds of off-heap memory attributed to a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalBackingStoreType {
    /// Array buffer backing stores
    ArrayBuffer,
    /// External string payloads
    ExternalString,
}

impl ExternalBackingStoreType {
    #[inline]
    pub(crate) const fn index(self) -> usize {
        match self {
            ExternalBackingStoreType::ArrayBuffer => 0,
            ExternalBackingStoreType::ExternalString => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding() {
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_down(4097, 4096), 4096);
        assert!(is_aligned(PAGE_SIZE * 3, PAGE_SIZE));
        assert!(!is_aligned(PAGE_SIZE + 8, PAGE_SIZE));
    }

    #[test]
    fn test_space_predicates() {
        assert!(AllocationSpace::CodeLargeObject.is_code());
        assert!(AllocationSpace::CodeLargeObject.is_large_object());
        assert!(AllocationSpace::NewLargeObject.is_young());
        assert!(!AllocationSpace::Old.is_young());
        assert_eq!(AllocationSpace::Code.to_string(), "code_space");
    }
}
