//! Spinning raw locks.
//!
//! The default raw locks in [`blocking`](crate::blocking) put a contended
//! thread to sleep until the lock is released. The raw locks in this module
//! *spin* instead: they poll the lock's state in a loop, with an exponential
//! [`Backoff`], until it changes. This costs CPU time while waiting, but avoids
//! a round trip through the OS scheduler, which can be worth it for critical
//! sections that only last a handful of instructions.
//!
//! This module provides the following APIs:
//!
//! - [`Spinlock`]: a [mutual exclusion] spinlock, which implements the
//!       [`RawMutex`] trait.
//! - [`RwSpinlock`]: a [reader-writer] spinlock, which implements the
//!       [`RawRwLock`] trait.
//!
//! Both are used by passing them to [`Mutex::with_raw_mutex`] or
//! [`RwLock::with_raw_rwlock`]:
//!
//! ```
//! use guarded_sync::{blocking::RwLock, spin::RwSpinlock};
//!
//! let lock = RwLock::with_raw_rwlock(vec![1, 2, 3], RwSpinlock::new());
//! lock.write().push(4);
//! assert_eq!(lock.read().len(), 4);
//! ```
//!
//! [mutual exclusion]: https://en.wikipedia.org/wiki/Mutual_exclusion
//! [reader-writer]: https://en.wikipedia.org/wiki/Readers%E2%80%93writer_lock
//! [`Mutex::with_raw_mutex`]: crate::blocking::Mutex::with_raw_mutex
//! [`RwLock::with_raw_rwlock`]: crate::blocking::RwLock::with_raw_rwlock
use crate::{
    blocking::{RawMutex, RawRwLock},
    loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering::*},
    util::{fmt, Backoff},
};

/// A spinlock-based [`RawMutex`] implementation.
///
/// This mutex will spin with an exponential backoff while waiting for the lock
/// to become available.
///
/// # Fairness
///
/// This is *not* a fair mutex.
///
/// # Loom-specific behavior
///
/// When `cfg(loom)` is enabled, this mutex will use Loom's simulated atomics
/// and spin loop hints.
#[derive(Debug)]
pub struct Spinlock {
    locked: AtomicBool,
}

/// A spinlock-based [`RawRwLock`] implementation.
///
/// # Fairness
///
/// Readers can't starve a writer. When a writer finds the lock held, it sets a
/// *pending* flag, and no new shared locks are granted while the flag is set.
/// Once the readers already holding the lock release it, the writer acquires
/// it and clears the flag. Beyond that, the order in which contending threads
/// acquire the lock is unspecified.
pub struct RwSpinlock {
    state: AtomicUsize,
}

// === impl Spinlock ===

impl Spinlock {
    loom_const_fn! {
        /// Returns a new `Spinlock`, in the unlocked state.
        #[must_use]
        pub fn new() -> Self {
            Self { locked: AtomicBool::new(false) }
        }
    }

    #[inline]
    #[must_use]
    fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawMutex for Spinlock {
    type GuardMarker = ();

    #[cfg_attr(test, track_caller)]
    fn lock(&self) {
        let mut boff = Backoff::default();
        while test_dbg!(self
            .locked
            .compare_exchange(false, true, Acquire, Acquire)
            .is_err())
        {
            while test_dbg!(self.is_locked()) {
                boff.spin();
            }
        }
    }

    #[cfg_attr(test, track_caller)]
    #[inline]
    fn try_lock(&self) -> bool {
        test_dbg!(self
            .locked
            .compare_exchange(false, true, Acquire, Acquire)
            .is_ok())
    }

    #[cfg_attr(test, track_caller)]
    #[inline]
    unsafe fn unlock(&self) {
        let _was_locked = test_dbg!(self.locked.swap(false, Release));
        debug_assert!(_was_locked, "tried to unlock a Spinlock that was not locked");
    }

    #[inline]
    fn is_locked(&self) -> bool {
        Spinlock::is_locked(self)
    }
}

// === impl RwSpinlock ===

const UNLOCKED: usize = 0;
const WRITER: usize = 1 << 0;
const PENDING: usize = 1 << 1;
const READER: usize = 1 << 2;
const READER_SHIFT: u32 = READER.trailing_zeros();

impl RwSpinlock {
    loom_const_fn! {
        /// Returns a new `RwSpinlock`, in the unlocked state.
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: AtomicUsize::new(UNLOCKED),
            }
        }
    }

    /// Returns the number of readers currently holding the lock.
    ///
    /// # Note
    ///
    /// This method is not synchronized with other lock operations, and its
    /// value may become out of date as soon as it is read. It is intended only
    /// for debugging purposes or for use as a heuristic.
    #[inline]
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.state.load(Relaxed) >> READER_SHIFT
    }

    /// Returns `true` if a writer is waiting for the readers currently holding
    /// the lock to release it.
    #[inline]
    #[must_use]
    pub fn has_pending_writer(&self) -> bool {
        self.state.load(Relaxed) & PENDING != 0
    }
}

impl Default for RwSpinlock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawRwLock for RwSpinlock {
    type GuardMarker = ();

    #[cfg_attr(test, track_caller)]
    fn lock_shared(&self) {
        let mut boff = Backoff::new();
        while !self.try_lock_shared() {
            boff.spin();
        }
    }

    #[cfg_attr(test, track_caller)]
    fn try_lock_shared(&self) -> bool {
        let mut state = self.state.load(Relaxed);
        loop {
            // Don't admit new readers while a writer holds the lock or is
            // waiting for it.
            if test_dbg!(state & (WRITER | PENDING)) != 0 {
                return false;
            }

            // Ensure we don't overflow the reader count and clobber the lock's
            // state.
            assert!(
                state < usize::MAX - (READER * 2),
                "read lock counter overflow! this is very bad"
            );

            match test_dbg!(self
                .state
                .compare_exchange_weak(state, state + READER, Acquire, Relaxed))
            {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
    }

    #[cfg_attr(test, track_caller)]
    #[inline]
    unsafe fn unlock_shared(&self) {
        let _val = test_dbg!(self.state.fetch_sub(READER, Release));
        debug_assert!(
            _val >= READER && _val & WRITER == 0,
            "tried to release a shared lock on a RwSpinlock that was not read locked"
        );
    }

    #[cfg_attr(test, track_caller)]
    fn lock_exclusive(&self) {
        let mut backoff = Backoff::new();
        let mut state = self.state.load(Relaxed);
        loop {
            if state & !PENDING == UNLOCKED {
                // Nobody holds the lock. Take it, clearing our pending flag
                // (or another writer's, which will set it again).
                match test_dbg!(self
                    .state
                    .compare_exchange_weak(state, WRITER, Acquire, Relaxed))
                {
                    Ok(_) => return,
                    Err(actual) => {
                        state = actual;
                        continue;
                    }
                }
            }

            if state & PENDING == 0 {
                trace!(
                    target: "guarded_sync::spin",
                    rwlock = ?fmt::ptr(self),
                    readers = state >> READER_SHIFT,
                    writer = state & WRITER != 0,
                    "RwSpinlock::lock_exclusive: contended, blocking new readers"
                );
                test_dbg!(self.state.fetch_or(PENDING, Relaxed));
            }

            backoff.spin();
            state = self.state.load(Relaxed);
        }
    }

    #[cfg_attr(test, track_caller)]
    fn try_lock_exclusive(&self) -> bool {
        let mut state = self.state.load(Relaxed);
        loop {
            if test_dbg!(state & !PENDING) != UNLOCKED {
                return false;
            }

            // This can't use `compare_exchange_weak`: the pending bit is the
            // only part of the state that may change under us here, so a
            // failure must be retried, not reported.
            match test_dbg!(self
                .state
                .compare_exchange(state, WRITER, Acquire, Relaxed))
            {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
    }

    #[cfg_attr(test, track_caller)]
    #[inline]
    unsafe fn unlock_exclusive(&self) {
        // Leave the pending bit alone: a writer may have set it while we held
        // the lock.
        let _val = test_dbg!(self.state.fetch_and(!WRITER, Release));
        debug_assert!(
            _val & WRITER != 0,
            "tried to release an exclusive lock on a RwSpinlock that was not write locked"
        );
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.load(Relaxed) & !PENDING != UNLOCKED
    }

    #[inline]
    fn is_locked_exclusive(&self) -> bool {
        self.state.load(Relaxed) & WRITER != 0
    }
}

impl fmt::Debug for RwSpinlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Unpack a single load of the state, rather than calling
        // `reader_count` and `is_locked_exclusive`, so the fields shown come
        // from one moment in time.
        let state = self.state.load(Relaxed);
        f.debug_struct("RwSpinlock")
            .field("readers", &(state >> READER_SHIFT))
            .field("writer", &(state & WRITER != 0))
            .field("pending", &(state & PENDING != 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blocking::{Mutex, RwLock},
        loom::{self, sync::Arc, thread},
    };

    #[test]
    fn spinlock_excludes() {
        loom::model(|| {
            let lock = Spinlock::new();
            assert!(lock.try_lock());
            assert!(!lock.try_lock());
            unsafe { lock.unlock() };
            assert!(!RawMutex::is_locked(&lock));
        });
    }

    #[test]
    fn spin_mutex_counts() {
        const THREADS: usize = if cfg!(loom) { 2 } else { 8 };
        loom::model(|| {
            let mutex = Arc::new(Mutex::with_raw_mutex(0usize, Spinlock::new()));
            let threads = (0..THREADS)
                .map(|_| {
                    let mutex = mutex.clone();
                    thread::spawn(move || *mutex.lock() += 1)
                })
                .collect::<Vec<_>>();
            for thread in threads {
                thread.join().unwrap();
            }
            assert_eq!(*mutex.lock(), THREADS);
        });
    }

    #[test]
    fn rw_spinlock_read_write() {
        loom::model(|| {
            let lock = Arc::new(RwLock::with_raw_rwlock(0usize, RwSpinlock::new()));
            let writer = thread::spawn({
                let lock = lock.clone();
                move || {
                    *lock.write() += 1;
                }
            });

            {
                let guard = lock.read();
                assert!(*guard <= 1);
            }

            writer.join().unwrap();
            assert_eq!(*lock.read(), 1);
            assert!(!lock.is_locked());
        });
    }

    #[test]
    fn pending_writer_blocks_new_readers() {
        loom::model(|| {
            let lock = Arc::new(RwSpinlock::new());
            lock.lock_shared();

            let writer = thread::spawn({
                let lock = lock.clone();
                move || {
                    lock.lock_exclusive();
                    unsafe { lock.unlock_exclusive() };
                }
            });

            while !lock.has_pending_writer() {
                thread::yield_now();
            }
            assert!(!lock.try_lock_shared(), "readers must queue behind a pending writer");
            assert_eq!(lock.reader_count(), 1);

            unsafe { lock.unlock_shared() };
            writer.join().unwrap();

            assert!(lock.try_lock_shared());
            unsafe { lock.unlock_shared() };
        });
    }

    #[test]
    fn try_lock_exclusive_ignores_pending() {
        loom::model(|| {
            let lock = RwSpinlock::new();
            lock.state.store(PENDING, Relaxed);
            assert!(!lock.is_locked());
            assert!(lock.try_lock_exclusive());
            assert!(lock.is_locked_exclusive());
            unsafe { lock.unlock_exclusive() };
            assert!(!lock.is_locked());
        });
    }

    #[test]
    fn debug_snapshot() {
        loom::model(|| {
            let lock = RwSpinlock::new();
            lock.lock_shared();
            lock.lock_shared();
            let dbg = format!("{lock:?}");
            assert!(dbg.contains("readers: 2"), "{dbg}");
            assert!(dbg.contains("writer: false"), "{dbg}");
            unsafe {
                lock.unlock_shared();
                lock.unlock_shared();
            }
        });
    }
}
