//! Objects whose recorded slots can no longer be trusted
//!
//! When an object changes shape in place (for example it is trimmed), the
//! remembered-set entries inside it may point at what is now raw data. The
//! object is registered here and its slots are re-derived from the
//! object's current layout the next time the set is processed.

use std::collections::BTreeMap;

use crate::globals::Address;

/// Invalidated objects of one chunk, keyed by start address
#[derive(Debug, Default, Clone)]
pub struct InvalidatedSlots {
    objects: BTreeMap<Address, usize>,
}

impl InvalidatedSlots {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `object` with its size before the in-place change.
    /// Re-registration keeps the larger size.
    pub fn insert(&mut self, object: Address, size: usize) {
        let entry = self.objects.entry(object).or_insert(size);
        *entry = (*entry).max(size);
    }

    /// Whether `object` is registered
    pub fn contains(&self, object: Address) -> bool {
        self.objects.contains_key(&object)
    }

    /// Unregister `object`, returning its recorded size
    pub fn remove(&mut self, object: Address) -> Option<usize> {
        self.objects.remove(&object)
    }

    /// Registered object covering `slot`, with its recorded size
    pub fn object_containing(&self, slot: Address) -> Option<(Address, usize)> {
        self.objects
            .range(..=slot)
            .next_back()
            .filter(|&(&start, &size)| slot < start + size)
            .map(|(&start, &size)| (start, size))
    }

    /// Number of registered objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Registered objects in address order
    pub fn iter(&self) -> impl Iterator<Item = (Address, usize)> + '_ {
        self.objects.iter().map(|(&a, &s)| (a, s))
    }
}
