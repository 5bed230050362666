use crossbeam_epoch::{self as epoch, Atomic, Owned};
use std::sync::atomic::Ordering;

/// Rcu publishes an immutable value to wait-free readers.
///
/// Readers pin the current epoch, load the published pointer, and read
/// without ever blocking a writer. Writers install a replacement with an
/// atomic swap or compare-and-swap and retire the previous value to the
/// epoch reclaimer, which frees it only once every reader that could
/// have observed it has unpinned.
///
/// Readers may observe a value that is slightly stale relative to a
/// concurrent writer; each observed value is always internally
/// consistent. Callers that need read-your-writes must use a locked
/// path instead.
#[derive(Debug)]
pub struct Rcu<T> {
    inner: Atomic<T>,
}

impl<T> Rcu<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Atomic::new(value),
        }
    }

    /// Read the currently-published value. The reference is valid only
    /// within the closure, while the calling thread's epoch is pinned.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = epoch::pin();
        let shared = self.inner.load(Ordering::Acquire, &guard);
        // Safety: the cell is never null (a value is installed at
        // construction and every publish installs another), and a retired
        // value is destroyed only after all pinned readers have exited.
        f(unsafe { shared.deref() })
    }

    /// Publish |value|, retiring the previous one.
    pub fn store(&self, value: T) {
        let guard = epoch::pin();
        let prev = self.inner.swap(Owned::new(value), Ordering::AcqRel, &guard);
        // Safety: `prev` is unlinked; no reader arriving after the swap
        // can observe it, so it's safe to defer its destruction.
        unsafe { guard.defer_destroy(prev) };
    }

    /// Publish `f(current)`. On contention with another writer the
    /// update is recomputed from the freshly-observed base state.
    pub fn update(&self, mut f: impl FnMut(&T) -> T) {
        let guard = epoch::pin();
        let mut current = self.inner.load(Ordering::Acquire, &guard);
        loop {
            // Safety: as in `read`; `current` is published and protected.
            let next = Owned::new(f(unsafe { current.deref() }));

            match self.inner.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(prev) => {
                    // Safety: as in `store`.
                    unsafe { guard.defer_destroy(prev) };
                    return;
                }
                Err(err) => current = err.current,
            }
        }
    }
}

impl<T> Drop for Rcu<T> {
    fn drop(&mut self) {
        // Safety: &mut self proves there are no concurrent readers or
        // writers, so the published value can be reclaimed directly.
        unsafe {
            let shared = self.inner.load(Ordering::Relaxed, epoch::unprotected());
            drop(shared.into_owned());
        }
    }
}
