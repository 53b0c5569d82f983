//! Lock-free lazily allocated box
//!
//! GC workers race to materialize per-chunk side tables the first time
//! they find a slot to record. Each racer allocates optimistically and
//! tries to publish with a compare-and-swap; losers free their copy and
//! use the published one.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// An `Option<Box<T>>` that can be filled through a shared reference
pub struct LazyBox<T> {
    ptr: AtomicPtr<T>,
}

impl<T> LazyBox<T> {
    /// Empty box
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Published value, if any
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: a non-null pointer was published by get_or_allocate and
        // stays valid until take or drop, both of which need &mut self
        unsafe { self.ptr.load(Ordering::Acquire).as_ref() }
    }

    /// Whether a value is published
    #[inline]
    pub fn is_some(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }

    /// Allocate with `make` and publish unless another thread got there
    /// first.
    ///
    /// Always allocates. Returns the published value and whether this
    /// call's allocation won; a losing allocation is dropped before
    /// returning.
    pub fn get_or_allocate(&self, make: impl FnOnce() -> T, success: Ordering) -> (&T, bool) {
        let fresh = Box::into_raw(Box::new(make()));
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), fresh, success, Ordering::Acquire)
        {
            // SAFETY: we just published fresh
            Ok(_) => (unsafe { &*fresh }, true),
            Err(winner) => {
                // SAFETY: fresh was never shared
                drop(unsafe { Box::from_raw(fresh) });
                // SAFETY: winner is a published, live allocation
                (unsafe { &*winner }, false)
            }
        }
    }

    /// Remove the value. Exclusive access rules out concurrent readers.
    pub fn take(&mut self) -> Option<Box<T>> {
        let old = std::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        if old.is_null() {
            None
        } else {
            // SAFETY: old was created by Box::into_raw and is unpublished now
            Some(unsafe { Box::from_raw(old) })
        }
    }

    /// Mutable access through exclusive ownership
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: &mut self excludes every other reference
        unsafe { self.ptr.get_mut().as_mut() }
    }
}

impl<T> Default for LazyBox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LazyBox<T> {
    fn drop(&mut self) {
        drop(self.take());
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for LazyBox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LazyBox").field(&self.get()).finish()
    }
}

// SAFETY: the box owns its T; sharing it hands out &T across threads and
// moving it moves the T
unsafe impl<T: Send> Send for LazyBox<T> {}
// SAFETY: get_or_allocate may drop a T built on another thread, and get
// shares &T, so both bounds are required
unsafe impl<T: Send + Sync> Sync for LazyBox<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    struct Counted {
        drops: Arc<AtomicUsize>,
        id: usize,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_take_and_drop_free_value() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut cell = LazyBox::new();
        assert!(cell.get().is_none());
        let (_, won) = cell.get_or_allocate(
            || Counted {
                drops: drops.clone(),
                id: 1,
            },
            Ordering::AcqRel,
        );
        assert!(won);
        assert!(cell.take().is_some());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(cell.take().is_none());
    }

    #[test]
    fn test_concurrent_allocation_keeps_one_value() {
        const THREADS: usize = 4;
        let drops = Arc::new(AtomicUsize::new(0));
        let cell = LazyBox::new();
        let barrier = Barrier::new(THREADS);

        let results: Vec<(usize, bool)> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|id| {
                    let cell = &cell;
                    let barrier = &barrier;
                    let drops = drops.clone();
                    s.spawn(move || {
                        barrier.wait();
                        let (value, won) =
                            cell.get_or_allocate(|| Counted { drops, id }, Ordering::AcqRel);
                        (value.id, won)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread panicked"))
                .collect()
        });

        let winner = cell.get().expect("published").id;
        assert!(results.iter().all(|&(id, _)| id == winner));
        assert_eq!(results.iter().filter(|&&(_, won)| won).count(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), THREADS - 1);
        drop(cell);
        assert_eq!(drops.load(Ordering::SeqCst), THREADS);
    }
}
