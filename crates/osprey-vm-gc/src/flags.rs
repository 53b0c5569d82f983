//! Per-chunk flag word
//!
//! The write barrier reads these bits on every store, so they live in a
//! single atomic word that the collector flips per collection phase.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU32, Ordering};

/// Set of chunk flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChunkFlags(u32);

impl ChunkFlags {
    /// No flags
    pub const NONE: Self = Self(0);
    /// Object area may hold machine code
    pub const IS_EXECUTABLE: Self = Self(1 << 0);
    /// Stores of pointers into this chunk must be recorded
    pub const POINTERS_TO_HERE_ARE_INTERESTING: Self = Self(1 << 1);
    /// Stores of pointers out of this chunk must be recorded
    pub const POINTERS_FROM_HERE_ARE_INTERESTING: Self = Self(1 << 2);
    /// Young-generation from-space page
    pub const FROM_PAGE: Self = Self(1 << 3);
    /// Young-generation to-space page
    pub const TO_PAGE: Self = Self(1 << 4);
    /// Chunk holds a single large object
    pub const LARGE_PAGE: Self = Self(1 << 5);
    /// Chunk is being evacuated by the compactor
    pub const EVACUATION_CANDIDATE: Self = Self(1 << 6);
    /// Chunk must never be selected for evacuation
    pub const NEVER_EVACUATE: Self = Self(1 << 7);
    /// Page promoted wholesale from new to old space
    pub const PAGE_NEW_OLD_PROMOTION: Self = Self(1 << 8);
    /// Page promoted wholesale within new space
    pub const PAGE_NEW_NEW_PROMOTION: Self = Self(1 << 9);
    /// Compaction of this chunk started and gave up
    pub const COMPACTION_WAS_ABORTED: Self = Self(1 << 10);
    /// Linear allocation must skip this chunk
    pub const NEVER_ALLOCATE_ON_PAGE: Self = Self(1 << 11);
    /// Chunk is queued for unmapping
    pub const PRE_FREED: Self = Self(1 << 12);
    /// Chunk memory sits in the allocator's pool
    pub const POOLED: Self = Self(1 << 13);
    /// Incremental marking is running
    pub const INCREMENTAL_MARKING: Self = Self(1 << 14);
    /// Chunk belongs to the read-only heap
    pub const READ_ONLY_HEAP: Self = Self(1 << 15);

    /// Both young-generation page kinds
    pub const IN_YOUNG_GENERATION: Self = Self(Self::FROM_PAGE.0 | Self::TO_PAGE.0);
    /// Flags that make evacuation slot recording pointless
    pub const SKIP_EVACUATION_SLOTS_RECORDING: Self =
        Self(Self::EVACUATION_CANDIDATE.0 | Self::IN_YOUNG_GENERATION.0);

    /// Raw bits
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Union of two sets
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `self` without the bits of `other`
    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for ChunkFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ChunkFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for ChunkFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkFlags({:#06x})", self.0)
    }
}

/// Atomically updated [`ChunkFlags`]
#[derive(Debug, Default)]
pub struct AtomicChunkFlags(AtomicU32);

impl AtomicChunkFlags {
    /// Start from `flags`
    pub const fn new(flags: ChunkFlags) -> Self {
        Self(AtomicU32::new(flags.0))
    }

    /// Current flags
    #[inline]
    pub fn get(&self) -> ChunkFlags {
        ChunkFlags(self.0.load(Ordering::Acquire))
    }

    /// Whether every bit of `flags` is set
    #[inline]
    pub fn is_set(&self, flags: ChunkFlags) -> bool {
        self.get().contains(flags)
    }

    /// Set `flags`
    #[inline]
    pub fn set(&self, flags: ChunkFlags) {
        self.0.fetch_or(flags.0, Ordering::AcqRel);
    }

    /// Clear `flags`
    #[inline]
    pub fn clear(&self, flags: ChunkFlags) {
        self.0.fetch_and(!flags.0, Ordering::AcqRel);
    }

    /// Replace the bits selected by `mask` with those of `flags`
    pub fn set_masked(&self, flags: ChunkFlags, mask: ChunkFlags) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                Some((old & !mask.0) | (flags.0 & mask.0))
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_update_keeps_other_bits() {
        let flags = AtomicChunkFlags::new(ChunkFlags::IS_EXECUTABLE | ChunkFlags::TO_PAGE);
        flags.set_masked(
            ChunkFlags::FROM_PAGE,
            ChunkFlags::FROM_PAGE | ChunkFlags::TO_PAGE,
        );
        let now = flags.get();
        assert!(now.contains(ChunkFlags::IS_EXECUTABLE | ChunkFlags::FROM_PAGE));
        assert!(!now.contains(ChunkFlags::TO_PAGE));
        assert!(now.intersects(ChunkFlags::IN_YOUNG_GENERATION));
    }

    #[test]
    fn test_set_and_clear() {
        let flags = AtomicChunkFlags::default();
        flags.set(ChunkFlags::EVACUATION_CANDIDATE);
        assert!(flags.is_set(ChunkFlags::EVACUATION_CANDIDATE));
        flags.clear(ChunkFlags::EVACUATION_CANDIDATE);
        assert_eq!(flags.get(), ChunkFlags::NONE);
    }
}
