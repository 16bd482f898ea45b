//! A predicate-driven [condition variable].
//!
//! See the [`Condvar`] type's documentation for details.
//!
//! [condition variable]: https://en.wikipedia.org/wiki/Monitor_(synchronization)#Condition_variables
use crate::{
    blocking::{Exclusive, MutexGuard, RawMutex, RawRwLock, RwLockWriteGuard},
    loom::sync::{Condvar as WakeList, Mutex as StateLock, MutexGuard as StateGuard},
    util::fmt,
};
use std::{
    sync::PoisonError,
    time::{Duration, Instant},
};

/// A condition variable which waits on the locks in this crate.
///
/// A `Condvar` lets threads wait for some condition on state guarded by a
/// [`Mutex`](crate::Mutex) (or the write side of an [`RwLock`](crate::RwLock))
/// to become true. Every wait takes a *predicate*, which is evaluated with the
/// lock held. A wait only returns once the predicate is `true` (or, for the
/// timed waits, once the deadline has passed), so spurious wakeups are
/// invisible to callers.
///
/// Whenever a wait returns, the lock is held again.
///
/// # Examples
///
/// ```
/// use guarded_sync::{Condvar, Mutex};
/// use std::{sync::Arc, thread};
///
/// let pair = Arc::new((Mutex::new(false), Condvar::new()));
///
/// let pair2 = pair.clone();
/// thread::spawn(move || {
///     let (started, cvar) = &*pair2;
///     *started.lock() = true;
///     cvar.notify_one();
/// });
///
/// let (started, cvar) = &*pair;
/// let mut guard = started.lock();
/// cvar.wait(&mut guard, |started| *started);
/// assert!(*guard);
/// ```
///
/// # Implementation notes
///
/// Each `Condvar` keeps an *epoch* counter, which every notification
/// advances. A waiting thread reads the epoch *before* it releases the user's
/// lock, and then sleeps only for as long as the epoch is unchanged. A
/// notification sent after the waiter released the lock but before it went to
/// sleep is therefore never lost.
pub struct Condvar {
    epoch: StateLock<u64>,
    wakeups: WakeList,
}

impl Condvar {
    loom_const_fn! {
        /// Returns a new `Condvar` with no waiters.
        #[must_use]
        pub fn new() -> Self {
            Self {
                epoch: StateLock::new(0),
                wakeups: WakeList::new(),
            }
        }
    }

    /// Blocks until `pred` returns `true`.
    ///
    /// The predicate is evaluated with the mutex locked, first before
    /// blocking at all, and then again every time the thread wakes up. While
    /// the thread is blocked, the mutex is unlocked.
    #[cfg_attr(test, track_caller)]
    pub fn wait<T, Lock: RawMutex>(
        &self,
        guard: &mut MutexGuard<'_, T, Lock>,
        mut pred: impl FnMut(&mut T) -> bool,
    ) {
        let mutex = MutexGuard::mutex(guard);
        unsafe {
            // Safety: the guard proves that the mutex is locked, and borrowing
            // it mutably for the duration of the wait means that nothing else
            // in this context can touch the data while `pred` has it.
            self.wait_raw(mutex.raw(), || pred(&mut *mutex.data_ptr()))
        }
    }

    /// Blocks until `pred` returns `true` or `timeout` has elapsed.
    ///
    /// Returns `true` if the predicate was satisfied, or `false` if the wait
    /// timed out. Either way, the mutex is locked again when this returns.
    ///
    /// If `timeout` is so long that the deadline can't be represented as an
    /// [`Instant`], this waits without a deadline.
    #[cfg_attr(test, track_caller)]
    pub fn wait_for<T, Lock: RawMutex>(
        &self,
        guard: &mut MutexGuard<'_, T, Lock>,
        timeout: Duration,
        mut pred: impl FnMut(&mut T) -> bool,
    ) -> bool {
        let mutex = MutexGuard::mutex(guard);
        unsafe {
            // Safety: see `wait`.
            self.wait_for_raw(mutex.raw(), timeout, || pred(&mut *mutex.data_ptr()))
        }
    }

    /// Blocks until `pred` returns `true` or `deadline` has passed.
    ///
    /// Returns `true` if the predicate was satisfied, or `false` if the
    /// deadline passed first. The predicate is evaluated one last time after
    /// the deadline, so a condition which became true just as the wait timed
    /// out is still reported as `true`.
    #[cfg_attr(test, track_caller)]
    pub fn wait_until<T, Lock: RawMutex>(
        &self,
        guard: &mut MutexGuard<'_, T, Lock>,
        deadline: Instant,
        mut pred: impl FnMut(&mut T) -> bool,
    ) -> bool {
        let mutex = MutexGuard::mutex(guard);
        unsafe {
            // Safety: see `wait`.
            self.wait_until_raw(mutex.raw(), deadline, || pred(&mut *mutex.data_ptr()))
        }
    }

    /// Like [`wait`](Self::wait), but waits on an [`RwLock`](crate::RwLock)'s
    /// write lock.
    #[cfg_attr(test, track_caller)]
    pub fn wait_write<T, Lock: RawRwLock>(
        &self,
        guard: &mut RwLockWriteGuard<'_, T, Lock>,
        mut pred: impl FnMut(&mut T) -> bool,
    ) {
        let rwlock = RwLockWriteGuard::rwlock(guard);
        let lock = Exclusive::new(rwlock.raw());
        unsafe {
            // Safety: the guard proves that the exclusive lock is held.
            self.wait_raw(&lock, || pred(&mut *rwlock.data_ptr()))
        }
    }

    /// Like [`wait_for`](Self::wait_for), but waits on an
    /// [`RwLock`](crate::RwLock)'s write lock.
    #[cfg_attr(test, track_caller)]
    pub fn wait_write_for<T, Lock: RawRwLock>(
        &self,
        guard: &mut RwLockWriteGuard<'_, T, Lock>,
        timeout: Duration,
        mut pred: impl FnMut(&mut T) -> bool,
    ) -> bool {
        let rwlock = RwLockWriteGuard::rwlock(guard);
        let lock = Exclusive::new(rwlock.raw());
        unsafe {
            // Safety: the guard proves that the exclusive lock is held.
            self.wait_for_raw(&lock, timeout, || pred(&mut *rwlock.data_ptr()))
        }
    }

    /// Like [`wait_until`](Self::wait_until), but waits on an
    /// [`RwLock`](crate::RwLock)'s write lock.
    #[cfg_attr(test, track_caller)]
    pub fn wait_write_until<T, Lock: RawRwLock>(
        &self,
        guard: &mut RwLockWriteGuard<'_, T, Lock>,
        deadline: Instant,
        mut pred: impl FnMut(&mut T) -> bool,
    ) -> bool {
        let rwlock = RwLockWriteGuard::rwlock(guard);
        let lock = Exclusive::new(rwlock.raw());
        unsafe {
            // Safety: the guard proves that the exclusive lock is held.
            self.wait_until_raw(&lock, deadline, || pred(&mut *rwlock.data_ptr()))
        }
    }

    /// Blocks until `pred` returns `true`, unlocking `lock` while blocked.
    ///
    /// This is the bare form of [`wait`](Self::wait), for use with a raw lock
    /// which is not tied to a guard (for example, a [`Mutex`](crate::Mutex)
    /// whose guard was [leaked](crate::MutexGuard::leak)).
    ///
    /// # Safety
    ///
    /// `lock` must be locked by the current context. It is unlocked while the
    /// thread sleeps and locked again before `pred` is called, so it is still
    /// locked when this returns.
    ///
    /// In debug builds, this asserts that `lock` is locked.
    #[cfg_attr(test, track_caller)]
    pub unsafe fn wait_raw<L>(&self, lock: &L, mut pred: impl FnMut() -> bool)
    where
        L: RawMutex + ?Sized,
    {
        debug_assert!(
            lock.is_locked(),
            "Condvar::wait_raw called without holding the lock"
        );
        while !pred() {
            self.sleep(lock, None);
        }
    }

    /// Blocks until `pred` returns `true` or `timeout` has elapsed, unlocking
    /// `lock` while blocked.
    ///
    /// This is the bare form of [`wait_for`](Self::wait_for).
    ///
    /// # Safety
    ///
    /// The same as [`wait_raw`](Self::wait_raw).
    #[cfg_attr(test, track_caller)]
    pub unsafe fn wait_for_raw<L>(
        &self,
        lock: &L,
        timeout: Duration,
        pred: impl FnMut() -> bool,
    ) -> bool
    where
        L: RawMutex + ?Sized,
    {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until_raw(lock, deadline, pred),
            None => {
                debug!(
                    target: "guarded_sync::condvar",
                    condvar = ?fmt::ptr(self),
                    ?timeout,
                    "Condvar::wait_for: deadline overflows, waiting without one"
                );
                self.wait_raw(lock, pred);
                true
            }
        }
    }

    /// Blocks until `pred` returns `true` or `deadline` has passed, unlocking
    /// `lock` while blocked.
    ///
    /// This is the bare form of [`wait_until`](Self::wait_until).
    ///
    /// # Safety
    ///
    /// The same as [`wait_raw`](Self::wait_raw).
    #[cfg_attr(test, track_caller)]
    pub unsafe fn wait_until_raw<L>(
        &self,
        lock: &L,
        deadline: Instant,
        mut pred: impl FnMut() -> bool,
    ) -> bool
    where
        L: RawMutex + ?Sized,
    {
        debug_assert!(
            lock.is_locked(),
            "Condvar::wait_until_raw called without holding the lock"
        );
        loop {
            if pred() {
                return true;
            }
            if Instant::now() >= deadline {
                trace!(
                    target: "guarded_sync::condvar",
                    condvar = ?fmt::ptr(self),
                    "Condvar::wait_until: timed out"
                );
                return false;
            }
            self.sleep(lock, Some(deadline));
        }
    }

    /// Wakes up one thread blocked on this condvar, if there are any.
    ///
    /// The woken thread re-evaluates its predicate, and goes back to sleep if
    /// it is still `false`.
    pub fn notify_one(&self) {
        self.advance();
        trace!(
            target: "guarded_sync::condvar",
            condvar = ?fmt::ptr(self),
            "Condvar::notify_one"
        );
        self.wakeups.notify_one();
    }

    /// Wakes up every thread blocked on this condvar.
    pub fn notify_all(&self) {
        self.advance();
        trace!(
            target: "guarded_sync::condvar",
            condvar = ?fmt::ptr(self),
            "Condvar::notify_all"
        );
        self.wakeups.notify_all();
    }

    fn state(&self) -> StateGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self) {
        let mut epoch = self.state();
        *epoch = epoch.wrapping_add(1);
    }

    /// Unlocks `lock`, sleeps until notified (or until `deadline`), and then
    /// locks `lock` again.
    ///
    /// This may return spuriously.
    #[cfg_attr(test, track_caller)]
    unsafe fn sleep<L>(&self, lock: &L, deadline: Option<Instant>)
    where
        L: RawMutex + ?Sized,
    {
        // Read the epoch *before* releasing the user's lock: a notifier must
        // take the user's lock to change the condition, so it can only bump
        // the epoch after this point.
        let mut epoch = self.state();
        let seen = *epoch;
        lock.unlock();

        test_debug!(
            condvar = ?fmt::ptr(self),
            epoch = seen,
            ?deadline,
            "Condvar: sleeping..."
        );

        while *epoch == seen {
            epoch = match deadline {
                None => self
                    .wakeups
                    .wait(epoch)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (epoch, _) = self
                        .wakeups
                        .wait_timeout(epoch, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    epoch
                }
            };
        }

        test_debug!(
            condvar = ?fmt::ptr(self),
            epoch = *epoch,
            "Condvar: woken"
        );

        // Release the epoch lock before re-acquiring the user's lock, so that
        // a notifier holding the user's lock is never waited on while we hold
        // ours.
        drop(epoch);
        lock.lock();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("epoch", &*self.state())
            .finish()
    }
}
