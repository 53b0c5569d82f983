//! Remembered-set slot sets
//!
//! A [`SlotSet`] records tagged slots of one chunk by their byte offset
//! from the chunk start. The set is split into buckets of
//! [`SLOTS_PER_BUCKET`] slots that are only allocated once a slot inside
//! them is inserted, so sparse sets stay cheap.
//!
//! Insertions and removals are lock-free. Freeing buckets requires
//! exclusive access.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::globals::TAGGED_SIZE;
use crate::lazy_box::LazyBox;

const BITS_PER_CELL: usize = 32;
const CELLS_PER_BUCKET: usize = 32;

/// Slots covered by one bucket
pub const SLOTS_PER_BUCKET: usize = BITS_PER_CELL * CELLS_PER_BUCKET;

/// Chunk bytes covered by one bucket
pub const BYTES_PER_BUCKET: usize = SLOTS_PER_BUCKET * TAGGED_SIZE;

/// Verdict of a slot visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotCallbackResult {
    /// Keep the slot recorded
    KeepSlot,
    /// Drop the slot from the set
    RemoveSlot,
}

struct Bucket {
    cells: [AtomicU32; CELLS_PER_BUCKET],
}

impl Bucket {
    fn new() -> Self {
        Self {
            cells: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    fn is_empty(&self) -> bool {
        self.cells.iter().all(|c| c.load(Ordering::Relaxed) == 0)
    }
}

#[inline]
fn locate(offset: usize) -> (usize, usize, u32) {
    debug_assert_eq!(offset % TAGGED_SIZE, 0, "unaligned slot offset {offset:#x}");
    let slot = offset / TAGGED_SIZE;
    let bucket = slot / SLOTS_PER_BUCKET;
    let in_bucket = slot % SLOTS_PER_BUCKET;
    (bucket, in_bucket / BITS_PER_CELL, 1u32 << (in_bucket % BITS_PER_CELL))
}

/// Set of recorded slot offsets within one chunk
pub struct SlotSet {
    buckets: Box<[LazyBox<Bucket>]>,
}

impl SlotSet {
    /// Empty set with `buckets` buckets
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: (0..buckets).map(|_| LazyBox::new()).collect(),
        }
    }

    /// Buckets needed to cover a chunk of `size` bytes
    #[inline]
    pub const fn buckets_for_size(size: usize) -> usize {
        size.div_ceil(BYTES_PER_BUCKET)
    }

    /// Number of buckets (allocated or not)
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of buckets currently allocated
    pub fn allocated_bucket_count(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_some()).count()
    }

    /// Record the slot at `offset`
    pub fn insert(&self, offset: usize) {
        let (bucket, cell, mask) = locate(offset);
        let bucket = match self.buckets[bucket].get() {
            Some(b) => b,
            None => self.buckets[bucket].get_or_allocate(Bucket::new, Ordering::AcqRel).0,
        };
        let cell = &bucket.cells[cell];
        if cell.load(Ordering::Relaxed) & mask == 0 {
            cell.fetch_or(mask, Ordering::AcqRel);
        }
    }

    /// Whether the slot at `offset` is recorded
    pub fn contains(&self, offset: usize) -> bool {
        let (bucket, cell, mask) = locate(offset);
        self.buckets[bucket]
            .get()
            .is_some_and(|b| b.cells[cell].load(Ordering::Acquire) & mask != 0)
    }

    /// Forget the slot at `offset`
    pub fn remove(&self, offset: usize) {
        let (bucket, cell, mask) = locate(offset);
        if let Some(b) = self.buckets[bucket].get() {
            b.cells[cell].fetch_and(!mask, Ordering::AcqRel);
        }
    }

    /// Forget every slot in `[start, end)`
    pub fn remove_range(&self, start: usize, end: usize) {
        let mut offset = start;
        while offset < end {
            let (bucket, cell, _) = locate(offset);
            let Some(b) = self.buckets[bucket].get() else {
                // Skip to the next bucket boundary.
                offset = (bucket + 1) * BYTES_PER_BUCKET;
                continue;
            };
            let first_bit = (offset / TAGGED_SIZE) % BITS_PER_CELL;
            let cell_end = offset + (BITS_PER_CELL - first_bit) * TAGGED_SIZE;
            let last_bit = if end < cell_end {
                (end / TAGGED_SIZE) % BITS_PER_CELL
            } else {
                BITS_PER_CELL
            };
            let width = last_bit - first_bit;
            let mask = if width == BITS_PER_CELL {
                u32::MAX
            } else {
                ((1u32 << width) - 1) << first_bit
            };
            b.cells[cell].fetch_and(!mask, Ordering::AcqRel);
            offset = cell_end;
        }
    }

    /// Visit every recorded offset; slots answered with
    /// [`SlotCallbackResult::RemoveSlot`] are dropped. Returns the number of
    /// slots kept.
    pub fn iterate(&self, mut visit: impl FnMut(usize) -> SlotCallbackResult) -> usize {
        self.buckets
            .iter()
            .enumerate()
            .map(|(index, bucket)| Self::iterate_bucket(index, bucket, &mut visit))
            .sum()
    }

    /// Like [`iterate`](Self::iterate), additionally flagging buckets
    /// that ended up with no slots so
    /// [`check_possibly_empty_buckets`](Self::check_possibly_empty_buckets)
    /// can free them later.
    pub fn iterate_and_track_empty_buckets(
        &self,
        mut visit: impl FnMut(usize) -> SlotCallbackResult,
        possibly_empty: &mut PossiblyEmptyBuckets,
    ) -> usize {
        let mut kept = 0;
        for (index, bucket) in self.buckets.iter().enumerate() {
            let in_bucket = Self::iterate_bucket(index, bucket, &mut visit);
            if in_bucket == 0 && bucket.is_some() {
                possibly_empty.insert(index);
            }
            kept += in_bucket;
        }
        kept
    }

    fn iterate_bucket(
        index: usize,
        bucket: &LazyBox<Bucket>,
        visit: &mut impl FnMut(usize) -> SlotCallbackResult,
    ) -> usize {
        let Some(bucket) = bucket.get() else {
            return 0;
        };
        let mut kept = 0;
        for (cell_index, cell) in bucket.cells.iter().enumerate() {
            let mut bits = cell.load(Ordering::Acquire);
            let mut remove = 0u32;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                let slot = index * SLOTS_PER_BUCKET + cell_index * BITS_PER_CELL + bit;
                match visit(slot * TAGGED_SIZE) {
                    SlotCallbackResult::KeepSlot => kept += 1,
                    SlotCallbackResult::RemoveSlot => remove |= 1 << bit,
                }
            }
            if remove != 0 {
                cell.fetch_and(!remove, Ordering::AcqRel);
            }
        }
        kept
    }

    /// Free flagged buckets that are still empty. Returns `true` when the
    /// whole set is empty afterwards.
    pub fn check_possibly_empty_buckets(
        &mut self,
        possibly_empty: &mut PossiblyEmptyBuckets,
    ) -> bool {
        let mut empty = true;
        for (index, bucket) in self.buckets.iter_mut().enumerate() {
            let Some(bucket_is_empty) = bucket.get_mut().map(|b| b.is_empty()) else {
                continue;
            };
            if possibly_empty.contains(index) && bucket_is_empty {
                drop(bucket.take());
            } else {
                empty = false;
            }
        }
        possibly_empty.release();
        empty
    }

    /// Free every bucket without slots. Returns `true` when no bucket
    /// remains.
    pub fn free_empty_buckets(&mut self) -> bool {
        let mut empty = true;
        for bucket in self.buckets.iter_mut() {
            match bucket.get_mut().map(|b| b.is_empty()) {
                Some(true) => drop(bucket.take()),
                Some(false) => empty = false,
                None => {}
            }
        }
        empty
    }

    /// Whether no slot is recorded
    pub fn is_empty(&self) -> bool {
        self.buckets
            .iter()
            .all(|b| b.get().is_none_or(Bucket::is_empty))
    }
}

impl std::fmt::Debug for SlotSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotSet")
            .field("buckets", &self.bucket_count())
            .field("allocated", &self.allocated_bucket_count())
            .finish()
    }
}

/// Bucket indices that may have become empty during iteration
#[derive(Debug, Default, Clone)]
pub struct PossiblyEmptyBuckets {
    bits: Vec<u64>,
}

impl PossiblyEmptyBuckets {
    /// No bucket flagged
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag bucket `index`
    pub fn insert(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1 << (index % 64);
    }

    /// Whether bucket `index` is flagged
    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|w| w & (1 << (index % 64)) != 0)
    }

    /// Whether nothing is flagged
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// Clear all flags and drop the backing storage
    pub fn release(&mut self) {
        self.bits = Vec::new();
    }
}
