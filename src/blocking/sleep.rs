use super::{RawMutex, RawRwLock};
use crate::{
    loom::sync::{Condvar, Mutex as StateLock, MutexGuard as StateGuard},
    util::fmt,
};
use std::sync::PoisonError;

/// A [`RawMutex`] that puts contended threads to sleep.
///
/// This is the default `Lock` type parameter of [`Mutex`](super::Mutex).
/// Unlike a [`Spinlock`](crate::spin::Spinlock), a thread that finds the
/// `SleepMutex` locked does not burn CPU time waiting for it: it blocks on
/// an OS condition variable until the holder unlocks.
///
/// The lock's state is a single flag, which is protected by a
/// [`std::sync::Mutex`] that is only ever held for the few instructions it
/// takes to test and update it. Because the flag is what's locked, not the OS
/// mutex, a `SleepMutex` may be locked in one function and unlocked in
/// another, which is what the [`Condvar`](crate::Condvar) needs.
///
/// # Fairness
///
/// This is *not* a fair mutex. A thread that calls [`lock`](RawMutex::lock)
/// just as the mutex is released may acquire it ahead of threads which were
/// already sleeping.
///
/// # Misuse
///
/// Unlocking a `SleepMutex` which is not locked panics.
pub struct SleepMutex {
    locked: StateLock<bool>,
    unlocked: Condvar,
}

/// A [`RawRwLock`] that puts contended threads to sleep.
///
/// This is the default `Lock` type parameter of [`RwLock`](super::RwLock).
///
/// # Fairness
///
/// A `SleepRwLock` prefers writers. As soon as a thread is waiting for the
/// exclusive lock, no new shared locks are granted (including by
/// [`try_lock_shared`](RawRwLock::try_lock_shared)). The readers currently
/// holding the lock drain, and then the writer proceeds. Readers which arrived
/// while the writer was waiting are admitted together once no writers are
/// waiting.
///
/// This means that a writer can never be locked out by a steady stream of
/// readers. It also means that a thread which already holds a shared lock
/// must not try to acquire a second one: if a writer arrives in between, the
/// second acquisition waits for the writer, and the writer waits for the
/// first.
///
/// # Misuse
///
/// Releasing a lock which is not held panics.
pub struct SleepRwLock {
    state: StateLock<RwState>,
    readable: Condvar,
    writable: Condvar,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct RwState {
    readers: usize,
    writer: bool,
    writers_waiting: usize,
}

// === impl SleepMutex ===

impl SleepMutex {
    loom_const_fn! {
        /// Returns a new `SleepMutex`, in the unlocked state.
        #[must_use]
        pub fn new() -> Self {
            Self {
                locked: StateLock::new(false),
                unlocked: Condvar::new(),
            }
        }
    }

    fn state(&self) -> StateGuard<'_, bool> {
        // Nothing panics while the state lock is held except misuse
        // assertions, which leave the flag as it was.
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

unsafe impl RawMutex for SleepMutex {
    type GuardMarker = ();

    #[cfg_attr(test, track_caller)]
    fn lock(&self) {
        let mut locked = self.state();
        if *locked {
            trace!(
                target: "guarded_sync::blocking",
                mutex = ?fmt::ptr(self),
                "SleepMutex::lock: contended, sleeping..."
            );
            while *locked {
                locked = self
                    .unlocked
                    .wait(locked)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            trace!(
                target: "guarded_sync::blocking",
                mutex = ?fmt::ptr(self),
                "SleepMutex::lock: woken"
            );
        }
        *locked = true;
    }

    #[cfg_attr(test, track_caller)]
    fn try_lock(&self) -> bool {
        let mut locked = self.state();
        if test_dbg!(*locked) {
            return false;
        }
        *locked = true;
        true
    }

    #[cfg_attr(test, track_caller)]
    unsafe fn unlock(&self) {
        let mut locked = self.state();
        assert!(*locked, "tried to unlock a SleepMutex that was not locked");
        *locked = false;
        drop(locked);
        self.unlocked.notify_one();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        *self.state()
    }
}

impl Default for SleepMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SleepMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepMutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

// === impl SleepRwLock ===

impl SleepRwLock {
    loom_const_fn! {
        /// Returns a new `SleepRwLock`, in the unlocked state.
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: StateLock::new(RwState {
                    readers: 0,
                    writer: false,
                    writers_waiting: 0,
                }),
                readable: Condvar::new(),
                writable: Condvar::new(),
            }
        }
    }

    /// Returns the number of readers currently holding the lock.
    pub(crate) fn reader_count(&self) -> usize {
        self.state().readers
    }

    fn state(&self) -> StateGuard<'_, RwState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RwState {
    fn admits_readers(&self) -> bool {
        !self.writer && self.writers_waiting == 0
    }

    fn admits_writer(&self) -> bool {
        !self.writer && self.readers == 0
    }

    fn add_reader(&mut self) {
        assert!(
            self.readers < usize::MAX,
            "read lock counter overflow! this is very bad"
        );
        self.readers += 1;
    }
}

unsafe impl RawRwLock for SleepRwLock {
    type GuardMarker = ();

    #[cfg_attr(test, track_caller)]
    fn lock_shared(&self) {
        let mut state = self.state();
        if !state.admits_readers() {
            trace!(
                target: "guarded_sync::blocking",
                rwlock = ?fmt::ptr(self),
                writer = state.writer,
                writers_waiting = state.writers_waiting,
                "SleepRwLock::lock_shared: waiting for writers..."
            );
            while !state.admits_readers() {
                state = self
                    .readable
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        state.add_reader();
    }

    #[cfg_attr(test, track_caller)]
    fn try_lock_shared(&self) -> bool {
        let mut state = self.state();
        if !test_dbg!(state.admits_readers()) {
            return false;
        }
        state.add_reader();
        true
    }

    #[cfg_attr(test, track_caller)]
    unsafe fn unlock_shared(&self) {
        let mut state = self.state();
        assert!(
            state.readers > 0 && !state.writer,
            "tried to release a shared lock on a SleepRwLock that was not read locked"
        );
        state.readers -= 1;
        let wake_writer = state.readers == 0 && state.writers_waiting > 0;
        drop(state);

        if wake_writer {
            self.writable.notify_one();
        }
    }

    #[cfg_attr(test, track_caller)]
    fn lock_exclusive(&self) {
        let mut state = self.state();
        if !state.admits_writer() {
            trace!(
                target: "guarded_sync::blocking",
                rwlock = ?fmt::ptr(self),
                readers = state.readers,
                writer = state.writer,
                "SleepRwLock::lock_exclusive: waiting..."
            );
            // Registering as a waiting writer stops new readers from being
            // admitted, so the current ones will eventually drain.
            state.writers_waiting += 1;
            while !state.admits_writer() {
                state = self
                    .writable
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.writers_waiting -= 1;
        }
        state.writer = true;
    }

    #[cfg_attr(test, track_caller)]
    fn try_lock_exclusive(&self) -> bool {
        let mut state = self.state();
        if !test_dbg!(state.admits_writer()) {
            return false;
        }
        state.writer = true;
        true
    }

    #[cfg_attr(test, track_caller)]
    unsafe fn unlock_exclusive(&self) {
        let mut state = self.state();
        assert!(
            state.writer,
            "tried to release an exclusive lock on a SleepRwLock that was not write locked"
        );
        state.writer = false;
        let wake_writer = state.writers_waiting > 0;
        drop(state);

        if wake_writer {
            self.writable.notify_one();
        } else {
            self.readable.notify_all();
        }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        let state = self.state();
        state.writer || state.readers > 0
    }

    #[inline]
    fn is_locked_exclusive(&self) -> bool {
        self.state().writer
    }
}

impl Default for SleepRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SleepRwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Snapshot the whole state under one lock, so that the reader count
        // and writer flag shown are ones the lock was actually in at once.
        let RwState {
            readers,
            writer,
            writers_waiting,
        } = *self.state();
        f.debug_struct("SleepRwLock")
            .field("readers", &readers)
            .field("writer", &writer)
            .field("writers_waiting", &writers_waiting)
            .finish()
    }
}
