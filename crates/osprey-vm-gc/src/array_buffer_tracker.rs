//! Array buffers whose backing stores are attributed to a page

use rustc_hash::FxHashMap;

use crate::globals::Address;

/// Array buffers living on one page and the size of their backing stores
#[derive(Debug, Default)]
pub struct LocalArrayBufferTracker {
    buffers: FxHashMap<Address, usize>,
    retained: usize,
}

impl LocalArrayBufferTracker {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `buffer` with a backing store of `length` bytes
    pub fn add(&mut self, buffer: Address, length: usize) {
        if let Some(old) = self.buffers.insert(buffer, length) {
            self.retained -= old;
        }
        self.retained += length;
    }

    /// Stop tracking `buffer`, returning its backing store size
    pub fn remove(&mut self, buffer: Address) -> Option<usize> {
        let length = self.buffers.remove(&buffer)?;
        self.retained -= length;
        Some(length)
    }

    /// Whether `buffer` is tracked
    pub fn contains(&self, buffer: Address) -> bool {
        self.buffers.contains_key(&buffer)
    }

    /// Forget buffers `is_live` rejects; returns the freed backing bytes
    pub fn free_dead(&mut self, mut is_live: impl FnMut(Address) -> bool) -> usize {
        let mut freed = 0;
        self.buffers.retain(|&buffer, &mut length| {
            let live = is_live(buffer);
            if !live {
                freed += length;
            }
            live
        });
        self.retained -= freed;
        freed
    }

    /// Backing store bytes of all tracked buffers
    #[inline]
    pub fn retained_bytes(&self) -> usize {
        self.retained
    }

    /// Whether no buffer is tracked
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_dead_buffers() {
        let mut tracker = LocalArrayBufferTracker::new();
        tracker.add(0x100, 64);
        tracker.add(0x200, 128);
        tracker.add(0x100, 32);
        assert_eq!(tracker.retained_bytes(), 160);
        assert_eq!(tracker.free_dead(|b| b == 0x200), 32);
        assert!(!tracker.contains(0x100));
        assert_eq!(tracker.remove(0x200), Some(128));
        assert!(tracker.is_empty());
    }
}
