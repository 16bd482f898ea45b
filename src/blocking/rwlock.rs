use super::{RawMutex, RawRwLock, SleepRwLock};
use crate::{loom::cell::UnsafeCell, spin::RwSpinlock, util::fmt};
use core::{
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

/// A blocking [readers-writer lock].
///
/// This type of lock allows a number of readers or at most one writer at any
/// point in time. The write portion of this lock typically allows modification
/// of the underlying data (exclusive access) and the read portion of this lock
/// typically allows for read-only access (shared access).
///
/// In comparison, a [`Mutex`](super::Mutex) does not distinguish between
/// readers or writers that acquire the lock, therefore blocking any threads
/// waiting for the lock to become available. An `RwLock` will allow any number
/// of readers to acquire the lock as long as a writer is not holding the lock.
///
/// # Guarded state
///
/// A read guard only hands out shared references, so the guarded data can't
/// be written through one:
///
/// ```compile_fail
/// use guarded_sync::RwLock;
///
/// let lock = RwLock::new(0);
/// let guard = lock.read();
/// *guard = 1; // error: cannot assign to data in dereference of `RwLockReadGuard`
/// ```
///
/// ```
/// use guarded_sync::RwLock;
///
/// let lock = RwLock::new(0);
/// *lock.write() = 1;
///
/// let r1 = lock.read();
/// let r2 = lock.read();
/// assert_eq!(*r1 + *r2, 2);
/// ```
///
/// # Fairness
///
/// With the default [`SleepRwLock`], this lock prefers writers: once a writer
/// is waiting, new readers wait behind it. See the [`SleepRwLock`]
/// documentation for details.
///
/// [readers-writer lock]: https://en.wikipedia.org/wiki/Readers%E2%80%93writer_lock
pub struct RwLock<T, Lock = SleepRwLock> {
    lock: Lock,
    data: UnsafeCell<T>,
}

/// An RAII implementation of a "scoped read lock" of a [`RwLock`]. When this
/// structure is dropped (falls out of scope), the lock will be unlocked.
///
/// The data protected by the [`RwLock`] can be immutably accessed through this
/// guard via its [`Deref`] implementation.
///
/// This structure is created by the [`read`] and [`try_read`] methods on
/// [`RwLock`].
///
/// [`read`]: RwLock::read
/// [`try_read`]: RwLock::try_read
#[must_use = "if unused, the `RwLock` will immediately unlock"]
pub struct RwLockReadGuard<'a, T, Lock: RawRwLock = SleepRwLock> {
    rwlock: &'a RwLock<T, Lock>,
    _marker: PhantomData<(&'a T, Lock::GuardMarker)>,
}

/// An RAII implementation of a "scoped write lock" of a [`RwLock`]. When this
/// structure is dropped (falls out of scope), the lock will be unlocked.
///
/// The data protected by the [`RwLock`] can be mutably accessed through this
/// guard via its [`Deref`] and [`DerefMut`] implementations.
///
/// This structure is created by the [`write`] and [`try_write`] methods on
/// [`RwLock`].
///
/// [`write`]: RwLock::write
/// [`try_write`]: RwLock::try_write
#[must_use = "if unused, the `RwLock` will immediately unlock"]
pub struct RwLockWriteGuard<'a, T, Lock: RawRwLock = SleepRwLock> {
    rwlock: &'a RwLock<T, Lock>,
    _marker: PhantomData<(&'a mut T, Lock::GuardMarker)>,
}

/// Adapts the exclusive side of a [`RawRwLock`] into a [`RawMutex`].
///
/// This lets code written against [`RawMutex`] (such as the
/// [`Condvar`](crate::Condvar)'s bare wait functions) wait while holding an
/// `RwLock`'s write lock.
///
/// ```
/// use guarded_sync::blocking::{Exclusive, RawMutex, RawRwLock, SleepRwLock};
///
/// let rwlock = SleepRwLock::new();
/// let exclusive = Exclusive::new(&rwlock);
///
/// exclusive.lock();
/// assert!(rwlock.is_locked_exclusive());
/// unsafe { exclusive.unlock() };
/// assert!(!rwlock.is_locked());
/// ```
#[derive(Debug)]
pub struct Exclusive<'a, L: ?Sized> {
    lock: &'a L,
}

// === impl RwLock ===

impl<T> RwLock<T> {
    loom_const_fn! {
        /// Creates a new, unlocked `RwLock<T>` protecting the provided `data`.
        ///
        /// # Examples
        ///
        /// ```
        /// use guarded_sync::RwLock;
        ///
        /// let lock = RwLock::new(5);
        /// # drop(lock);
        /// ```
        #[must_use]
        pub fn new(data: T) -> Self {
            Self {
                lock: SleepRwLock::new(),
                data: UnsafeCell::new(data),
            }
        }
    }

    /// Returns the current number of readers holding a read lock.
    ///
    /// # Note
    ///
    /// This method is not synchronized with attempts to increment the reader
    /// count, and its value may become out of date as soon as it is read. This
    /// is **not** intended to be used for synchronization purposes! It is
    /// intended only for debugging purposes or for use as a heuristic.
    #[inline]
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.lock.reader_count()
    }
}

impl<T> RwLock<T, RwSpinlock> {
    /// Returns the current number of readers holding a read lock.
    ///
    /// Like the sleeping lock's `reader_count`, this is an unsynchronized
    /// snapshot, intended only for debugging or as a heuristic.
    #[inline]
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.lock.reader_count()
    }
}

impl<T, Lock> RwLock<T, Lock> {
    loom_const_fn! {
        /// Creates a new, unlocked `RwLock<T>` protecting the provided `data`,
        /// using `lock` as the raw readers-writer lock implementation.
        #[must_use]
        pub fn with_raw_rwlock(data: T, lock: Lock) -> Self {
            Self {
                lock,
                data: UnsafeCell::new(data),
            }
        }
    }
}

impl<T, Lock: RawRwLock> RwLock<T, Lock> {
    fn read_guard(&self) -> RwLockReadGuard<'_, T, Lock> {
        RwLockReadGuard {
            rwlock: self,
            _marker: PhantomData,
        }
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, T, Lock> {
        RwLockWriteGuard {
            rwlock: self,
            _marker: PhantomData,
        }
    }

    /// Locks this `RwLock` for shared read access, blocking the current thread
    /// until it can be acquired.
    ///
    /// The calling thread will be blocked until there are no more writers
    /// which hold the lock. There may be other readers currently inside the
    /// lock when this method returns.
    ///
    /// Returns an RAII guard which will release this thread's shared access
    /// once it is dropped.
    #[cfg_attr(test, track_caller)]
    pub fn read(&self) -> RwLockReadGuard<'_, T, Lock> {
        self.lock.lock_shared();
        self.read_guard()
    }

    /// Attempts to acquire this `RwLock` for shared read access, without
    /// blocking.
    ///
    /// If the access could not be granted at this time, this method returns
    /// [`None`], and the lock's state is unchanged. Otherwise, [`Some`]`(`[`RwLockReadGuard`]`)`
    /// is returned.
    #[cfg_attr(test, track_caller)]
    #[must_use]
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T, Lock>> {
        if self.lock.try_lock_shared() {
            Some(self.read_guard())
        } else {
            None
        }
    }

    /// Locks this `RwLock` for exclusive write access, blocking the current
    /// thread until write access can be acquired.
    ///
    /// This function will not return while other writers or readers currently
    /// have access to the lock.
    ///
    /// Returns an RAII guard which will drop the write access of this `RwLock`
    /// when dropped.
    #[cfg_attr(test, track_caller)]
    pub fn write(&self) -> RwLockWriteGuard<'_, T, Lock> {
        self.lock.lock_exclusive();
        self.write_guard()
    }

    /// Attempts to acquire this `RwLock` for exclusive write access, without
    /// blocking.
    ///
    /// If the access could not be granted at this time, this method returns
    /// [`None`], and the lock's state is unchanged. Otherwise, [`Some`]`(`[`RwLockWriteGuard`]`)`
    /// is returned.
    #[cfg_attr(test, track_caller)]
    #[must_use]
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T, Lock>> {
        if self.lock.try_lock_exclusive() {
            Some(self.write_guard())
        } else {
            None
        }
    }

    /// Returns `true` if there is currently a writer holding a write lock.
    ///
    /// # Note
    ///
    /// This method is not synchronized its value may become out of date as
    /// soon as it is read. This is **not** intended to be used for
    /// synchronization purposes! It is intended only for debugging purposes or
    /// for use as a heuristic.
    #[inline]
    #[must_use]
    pub fn has_writer(&self) -> bool {
        self.lock.is_locked_exclusive()
    }

    /// Returns `true` if this `RwLock` is currently locked for reading or
    /// writing.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Returns the underlying raw readers-writer lock.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &Lock {
        &self.lock
    }

    /// Returns a raw pointer to the guarded data.
    ///
    /// Reading through the pointer is only sound while the lock is held in
    /// the current context. Writing through it is only sound while the
    /// exclusive lock is held.
    #[inline]
    #[must_use]
    pub fn data_ptr(&self) -> *mut T {
        self.data.with_mut(|data| data)
    }

    /// Forcibly releases a shared lock.
    ///
    /// # Safety
    ///
    /// The current context must hold a shared lock whose guard was
    /// [leaked](RwLockReadGuard::leak), and must not use the reference obtained
    /// from that guard afterwards.
    #[cfg_attr(test, track_caller)]
    pub unsafe fn force_unlock_read(&self) {
        self.lock.unlock_shared()
    }

    /// Forcibly releases the exclusive lock.
    ///
    /// # Safety
    ///
    /// The current context must hold the exclusive lock, its guard must have
    /// been [leaked](RwLockWriteGuard::leak), and the reference obtained from
    /// that guard must not be used afterwards.
    #[cfg_attr(test, track_caller)]
    pub unsafe fn force_unlock_write(&self) {
        self.lock.unlock_exclusive()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `RwLock` mutably, no actual locking needs to
    /// take place -- the mutable borrow statically guarantees no locks exist.
    ///
    /// # Examples
    ///
    /// ```
    /// let mut lock = guarded_sync::RwLock::new(0);
    /// *lock.get_mut() = 10;
    /// assert_eq!(*lock.read(), 10);
    /// ```
    pub fn get_mut(&mut self) -> &mut T {
        unsafe {
            // Safety: since this call borrows the `RwLock` mutably, no actual
            // locking needs to take place -- the mutable borrow statically
            // guarantees no locks exist.
            self.data.with_mut(|data| &mut *data)
        }
    }

    /// Consumes this `RwLock`, returning the guarded data.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default, Lock: Default> Default for RwLock<T, Lock> {
    /// Creates a new `RwLock<T>`, with the `Default` value for T.
    fn default() -> RwLock<T, Lock> {
        RwLock {
            data: UnsafeCell::new(Default::default()),
            lock: Default::default(),
        }
    }
}

impl<T> From<T> for RwLock<T> {
    /// Creates a new instance of an `RwLock<T>` which is unlocked.
    /// This is equivalent to [`RwLock::<T>::new`].
    fn from(t: T) -> Self {
        RwLock::new(t)
    }
}

impl<T, Lock> fmt::Debug for RwLock<T, Lock>
where
    T: fmt::Debug,
    Lock: fmt::Debug + RawRwLock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock")
            .field("data", &fmt::opt(&self.try_read()).or_else("<locked>"))
            .field("lock", &self.lock)
            .finish()
    }
}

unsafe impl<T: Send, Lock: Send> Send for RwLock<T, Lock> {}
unsafe impl<T: Send + Sync, Lock: Sync> Sync for RwLock<T, Lock> {}

// === impl RwLockReadGuard ===

impl<'a, T, Lock: RawRwLock> RwLockReadGuard<'a, T, Lock> {
    /// Returns the [`RwLock`] this guard has read locked.
    #[inline]
    #[must_use]
    pub fn rwlock(this: &Self) -> &'a RwLock<T, Lock> {
        this.rwlock
    }

    /// Consumes the guard *without* releasing the shared lock, returning a
    /// reference to the data.
    ///
    /// The shared lock stays held until [`RwLock::force_unlock_read`] is
    /// called.
    pub fn leak(this: Self) -> &'a T {
        let this = ManuallyDrop::new(this);
        let rwlock = this.rwlock;
        unsafe {
            // Safety: the shared lock is held, and will stay held, since the
            // guard will never be dropped.
            rwlock.data.with(|data| &*data)
        }
    }
}

impl<T, Lock: RawRwLock> Deref for RwLockReadGuard<'_, T, Lock> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe {
            // Safety: we are holding a read lock, so it is okay to dereference
            // the data pointer immutably.
            self.rwlock.data.with(|data| &*data)
        }
    }
}

impl<T, R: ?Sized, Lock> AsRef<R> for RwLockReadGuard<'_, T, Lock>
where
    T: AsRef<R>,
    Lock: RawRwLock,
{
    #[inline]
    fn as_ref(&self) -> &R {
        self.deref().as_ref()
    }
}

impl<T, Lock: RawRwLock> Drop for RwLockReadGuard<'_, T, Lock> {
    #[inline]
    #[cfg_attr(test, track_caller)]
    fn drop(&mut self) {
        unsafe { self.rwlock.lock.unlock_shared() }
    }
}

impl<T, Lock> fmt::Debug for RwLockReadGuard<'_, T, Lock>
where
    T: fmt::Debug,
    Lock: RawRwLock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

impl<T, Lock> fmt::Display for RwLockReadGuard<'_, T, Lock>
where
    T: fmt::Display,
    Lock: RawRwLock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

// === impl RwLockWriteGuard ===

impl<'a, T, Lock: RawRwLock> RwLockWriteGuard<'a, T, Lock> {
    /// Returns the [`RwLock`] this guard has write locked.
    #[inline]
    #[must_use]
    pub fn rwlock(this: &Self) -> &'a RwLock<T, Lock> {
        this.rwlock
    }

    /// Consumes the guard *without* releasing the exclusive lock, returning a
    /// mutable reference to the data.
    ///
    /// The exclusive lock stays held until [`RwLock::force_unlock_write`] is
    /// called.
    pub fn leak(this: Self) -> &'a mut T {
        let this = ManuallyDrop::new(this);
        let rwlock = this.rwlock;
        unsafe {
            // Safety: the exclusive lock is held, and will stay held, since
            // the guard will never be dropped.
            rwlock.data.with_mut(|data| &mut *data)
        }
    }
}

impl<T, Lock: RawRwLock> Deref for RwLockWriteGuard<'_, T, Lock> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe {
            // Safety: we are holding the lock, so it is okay to dereference the
            // data pointer.
            self.rwlock.data.with(|data| &*data)
        }
    }
}

impl<T, Lock: RawRwLock> DerefMut for RwLockWriteGuard<'_, T, Lock> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe {
            // Safety: we are holding the exclusive lock, and the guard is
            // borrowed mutably.
            self.rwlock.data.with_mut(|data| &mut *data)
        }
    }
}

impl<T, R: ?Sized, Lock> AsRef<R> for RwLockWriteGuard<'_, T, Lock>
where
    T: AsRef<R>,
    Lock: RawRwLock,
{
    #[inline]
    fn as_ref(&self) -> &R {
        self.deref().as_ref()
    }
}

impl<T, R: ?Sized, Lock> AsMut<R> for RwLockWriteGuard<'_, T, Lock>
where
    T: AsMut<R>,
    Lock: RawRwLock,
{
    #[inline]
    fn as_mut(&mut self) -> &mut R {
        self.deref_mut().as_mut()
    }
}

impl<T, Lock: RawRwLock> Drop for RwLockWriteGuard<'_, T, Lock> {
    #[inline]
    #[cfg_attr(test, track_caller)]
    fn drop(&mut self) {
        unsafe { self.rwlock.lock.unlock_exclusive() }
    }
}

impl<T, Lock> fmt::Debug for RwLockWriteGuard<'_, T, Lock>
where
    T: fmt::Debug,
    Lock: RawRwLock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

impl<T, Lock> fmt::Display for RwLockWriteGuard<'_, T, Lock>
where
    T: fmt::Display,
    Lock: RawRwLock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

// === impl Exclusive ===

impl<'a, L: RawRwLock + ?Sized> Exclusive<'a, L> {
    /// Returns a [`RawMutex`] which locks and unlocks `lock` exclusively.
    #[inline]
    #[must_use]
    pub const fn new(lock: &'a L) -> Self {
        Self { lock }
    }
}

impl<L: ?Sized> Clone for Exclusive<'_, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L: ?Sized> Copy for Exclusive<'_, L> {}

unsafe impl<L: RawRwLock + ?Sized> RawMutex for Exclusive<'_, L> {
    type GuardMarker = L::GuardMarker;

    #[inline]
    fn lock(&self) {
        self.lock.lock_exclusive()
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.lock.try_lock_exclusive()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.lock.unlock_exclusive()
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.lock.is_locked_exclusive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::{self, sync::Arc, thread};
    use crate::util::test::assert_send_sync;

    #[test]
    fn rwlock_is_send_sync() {
        assert_send_sync::<RwLock<usize>>();
        assert_send_sync::<RwLock<usize, RwSpinlock>>();
        assert_send_sync::<RwLockReadGuard<'static, usize>>();
        assert_send_sync::<RwLockWriteGuard<'static, usize>>();
    }

    #[test]
    fn write() {
        const WRITERS: usize = 2;

        loom::model(|| {
            let lock = Arc::new(RwLock::<usize>::new(0));
            let threads = (0..WRITERS)
                .map(|_| {
                    let lock = lock.clone();
                    thread::spawn(writer(lock))
                })
                .collect::<Vec<_>>();

            for thread in threads {
                thread.join().expect("writer thread mustn't panic");
            }

            let guard = lock.read();
            assert_eq!(*guard, WRITERS, "final state must equal number of writers");
        });
    }

    #[test]
    fn read_write() {
        // this hits loom's preemption bound with 2 writer threads.
        const WRITERS: usize = if cfg!(loom) { 1 } else { 2 };

        loom::model(|| {
            let lock = Arc::new(RwLock::<usize>::new(0));
            let w_threads = (0..WRITERS)
                .map(|_| {
                    let lock = lock.clone();
                    thread::spawn(writer(lock))
                })
                .collect::<Vec<_>>();

            {
                let guard = lock.read();
                assert!(*guard <= WRITERS, "readers see a whole number of writes");
            }

            for thread in w_threads {
                thread.join().expect("writer thread mustn't panic")
            }

            let guard = lock.read();
            assert_eq!(*guard, WRITERS, "final state must equal number of writers");
        });
    }

    #[test]
    fn concurrent_readers() {
        loom::model(|| {
            let lock = RwLock::new(1);
            let r1 = lock.read();
            let r2 = lock.try_read().expect("readers share the lock");
            assert_eq!(lock.reader_count(), 2);
            assert!(lock.try_write().is_none(), "writers exclude readers");
            drop((r1, r2));

            let w = lock.try_write().expect("lock is free");
            assert!(lock.has_writer());
            assert!(lock.try_read().is_none(), "readers exclude writers");
            drop(w);
            assert!(!lock.is_locked());
        });
    }

    #[test]
    fn spin_reader_count() {
        loom::model(|| {
            let lock = RwLock::with_raw_rwlock(0, RwSpinlock::new());
            let r1 = lock.read();
            let r2 = lock.read();
            assert_eq!(lock.reader_count(), 2);
            drop(r1);
            assert_eq!(lock.reader_count(), 1);
            drop(r2);
            assert!(!lock.is_locked());
        });
    }

    #[test]
    fn bare_read_and_write() {
        loom::model(|| {
            let lock = RwLock::new(0);

            let data = RwLockWriteGuard::leak(lock.write());
            *data = 5;
            assert!(lock.has_writer());
            unsafe { lock.force_unlock_write() };

            let data = RwLockReadGuard::leak(lock.read());
            assert_eq!(*data, 5);
            assert_eq!(lock.reader_count(), 1);
            unsafe { lock.force_unlock_read() };
            assert!(!lock.is_locked());
        });
    }

    #[test]
    fn exclusive_adapter() {
        loom::model(|| {
            let lock = RwLock::new(());
            let exclusive = Exclusive::new(lock.raw());
            assert!(exclusive.try_lock());
            assert!(exclusive.is_locked());
            assert!(lock.try_read().is_none());
            unsafe { exclusive.unlock() };

            let _read = lock.read();
            assert!(!exclusive.is_locked());
            assert!(!exclusive.try_lock());
        });
    }

    #[test]
    #[cfg(not(loom))]
    fn unlocks_on_panic() {
        let lock = RwLock::new(0);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = lock.write();
            *guard += 1;
            panic!("oh no");
        }));
        assert!(res.is_err());
        assert!(!lock.is_locked());
        assert_eq!(*lock.read(), 1);
    }

    fn writer(lock: Arc<RwLock<usize>>) -> impl FnOnce() {
        move || {
            test_debug!("trying to acquire write lock...");
            let mut guard = lock.write();
            test_debug!("got write lock!");
            *guard += 1;
        }
    }
}
