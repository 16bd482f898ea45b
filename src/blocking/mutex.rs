use super::{RawMutex, SleepMutex};
use crate::{loom::cell::UnsafeCell, util::fmt};
use core::{
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

/// A blocking mutual exclusion lock for protecting shared data.
///
/// Each mutex has a type parameter which represents the data that it is
/// protecting. The data can only be accessed through the RAII guards returned
/// from [`lock`] and [`try_lock`], which guarantees that the data is only ever
/// accessed when the mutex is locked.
///
/// The `Lock` type parameter selects the [`RawMutex`] implementation. By
/// default, this is a [`SleepMutex`], which puts contended threads to sleep.
///
/// # Guarded state
///
/// A value inside a `Mutex` cannot be reached without locking it:
///
/// ```compile_fail
/// use guarded_sync::Mutex;
///
/// struct Foo {
///     a: Mutex<i32>,
/// }
///
/// let f = Foo { a: Mutex::new(0) };
/// // error: cannot assign to data in a `Mutex`
/// *f.a = 100;
/// ```
///
/// ```
/// use guarded_sync::Mutex;
///
/// struct Foo {
///     a: Mutex<i32>,
/// }
///
/// let f = Foo { a: Mutex::new(0) };
/// *f.a.lock() = 100;
/// assert_eq!(*f.a.lock(), 100);
/// ```
///
/// A [`MutexGuard`] borrows its `Mutex`, so the mutex can't be destroyed while
/// it is locked:
///
/// ```compile_fail
/// use guarded_sync::Mutex;
///
/// let mutex = Mutex::new(0);
/// let guard = mutex.lock();
/// drop(mutex); // error: cannot move out of `mutex` because it is borrowed
/// drop(guard);
/// ```
///
/// # Bare locking
///
/// Sometimes a critical section doesn't fit in a single scope. In that case,
/// the guard may be [leaked](MutexGuard::leak), leaving the mutex locked, and
/// the mutex released later with [`force_unlock`](Mutex::force_unlock):
///
/// ```
/// use guarded_sync::Mutex;
///
/// let mutex = Mutex::new(0);
///
/// let data = guarded_sync::MutexGuard::leak(mutex.lock());
/// *data = 100;
/// assert!(mutex.is_locked());
///
/// // Safety: the leaked guard above locked the mutex, and `data` is not used
/// // past this point.
/// unsafe { mutex.force_unlock() };
/// assert_eq!(*mutex.lock(), 100);
/// ```
///
/// # Fairness
///
/// Whether this mutex is fair depends on the `Lock` type. Neither the default
/// [`SleepMutex`] nor the [`Spinlock`](crate::spin::Spinlock) is fair.
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
pub struct Mutex<T, Lock = SleepMutex> {
    lock: Lock,
    data: UnsafeCell<T>,
}

/// An RAII implementation of a "scoped lock" of a mutex. When this structure is
/// dropped (falls out of scope), the lock will be unlocked.
///
/// The guard releases the lock however its scope is exited: by falling off
/// the end, by an early return, or by a panic unwinding through it.
///
/// The data protected by the mutex can be accessed through this guard via its
/// [`Deref`] and [`DerefMut`] implementations.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`Mutex`]. A `MutexGuard` can't be copied:
///
/// ```compile_fail
/// use guarded_sync::Mutex;
///
/// let mutex = Mutex::new(0);
/// let guard = mutex.lock();
/// let guard2 = guard;
/// let guard3 = guard; // error: use of moved value: `guard`
/// ```
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
#[must_use = "if unused, the `Mutex` will immediately unlock"]
pub struct MutexGuard<'a, T, Lock: RawMutex = SleepMutex> {
    mutex: &'a Mutex<T, Lock>,
    _marker: PhantomData<(&'a mut T, Lock::GuardMarker)>,
}

impl<T> Mutex<T> {
    loom_const_fn! {
        /// Returns a new `Mutex` protecting the provided `data`.
        ///
        /// The returned `Mutex` is in an unlocked state, ready for use.
        ///
        /// # Examples
        ///
        /// ```
        /// use guarded_sync::Mutex;
        ///
        /// let mutex = Mutex::new(0);
        /// ```
        #[must_use]
        pub fn new(data: T) -> Self {
            Self {
                lock: SleepMutex::new(),
                data: UnsafeCell::new(data),
            }
        }
    }
}

impl<T, Lock> Mutex<T, Lock> {
    loom_const_fn! {
        /// Returns a new `Mutex` protecting the provided `data`, using the
        /// `Lock` type parameter as the raw mutex implementation.
        ///
        /// This constructor is used to override the internal implementation of
        /// mutex operations. By default, the [`Mutex::new`] constructor uses a
        /// [`SleepMutex`] as the underlying raw mutex implementation.
        ///
        /// The returned `Mutex` is in an unlocked state, ready for use.
        #[must_use]
        pub fn with_raw_mutex(data: T, lock: Lock) -> Self {
            Self {
                lock,
                data: UnsafeCell::new(data),
            }
        }
    }
}

impl<T, Lock> Mutex<T, Lock>
where
    Lock: RawMutex,
{
    fn guard(&self) -> MutexGuard<'_, T, Lock> {
        MutexGuard {
            mutex: self,
            _marker: PhantomData,
        }
    }

    /// Attempts to acquire this lock without blocking.
    ///
    /// If the lock could not be acquired at this time, then [`None`] is returned.
    /// Otherwise, an RAII guard is returned. The lock will be unlocked when the
    /// guard is dropped.
    ///
    /// This function will never block, and the mutex's state is unchanged if
    /// it fails.
    #[must_use]
    #[cfg_attr(test, track_caller)]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, Lock>> {
        if self.lock.try_lock() {
            Some(self.guard())
        } else {
            None
        }
    }

    /// Acquires the mutex, blocking until it is locked.
    ///
    /// Upon returning, the thread is the only thread with the lock held. An
    /// RAII guard is returned to allow scoped unlock of the lock. When the
    /// guard goes out of scope, the mutex will be unlocked.
    #[cfg_attr(test, track_caller)]
    pub fn lock(&self) -> MutexGuard<'_, T, Lock> {
        self.lock.lock();
        self.guard()
    }

    /// Locks the mutex, calls `f` with mutable access to the guarded data, and
    /// unlocks the mutex again before returning `f`'s result.
    pub fn with<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Returns `true` if the mutex is currently locked.
    ///
    /// # Note
    ///
    /// This method is not synchronized with attempts to lock the mutex, and its
    /// value may become out of date as soon as it is read. It is intended only
    /// for assertions and diagnostics.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Returns the underlying raw mutex.
    ///
    /// This is what a [`Condvar`](crate::Condvar)'s bare wait functions take.
    /// Locking or unlocking it directly bypasses the guards, and is only sound
    /// under the same rules as [`force_unlock`](Self::force_unlock).
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &Lock {
        &self.lock
    }

    /// Returns a raw pointer to the guarded data.
    ///
    /// Dereferencing the pointer is only sound while the mutex is locked by
    /// the current context.
    #[inline]
    #[must_use]
    pub fn data_ptr(&self) -> *mut T {
        self.data.with_mut(|data| data)
    }

    /// Forcibly unlock the mutex.
    ///
    /// If a lock is currently held, it will be released, regardless of who's
    /// holding it.
    ///
    /// # Safety
    ///
    /// This may only be called if the mutex was locked by the current context,
    /// and the guard that locked it was [leaked](MutexGuard::leak) or
    /// otherwise forgotten. Any reference to the data obtained from that guard
    /// must not be used afterwards.
    #[cfg_attr(test, track_caller)]
    pub unsafe fn force_unlock(&self) {
        self.lock.unlock()
    }

    /// Consumes this `Mutex`, returning the guarded data.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `Mutex` mutably, no actual locking needs to
    /// take place -- the mutable borrow statically guarantees no locks exist.
    ///
    /// # Examples
    ///
    /// ```
    /// let mut lock = guarded_sync::Mutex::new(0);
    /// *lock.get_mut() = 10;
    /// assert_eq!(*lock.lock(), 10);
    /// ```
    pub fn get_mut(&mut self) -> &mut T {
        unsafe {
            // Safety: since this call borrows the `Mutex` mutably, no actual
            // locking needs to take place -- the mutable borrow statically
            // guarantees no locks exist.
            self.data.with_mut(|data| &mut *data)
        }
    }
}

impl<T: Default, Lock: Default> Default for Mutex<T, Lock> {
    fn default() -> Self {
        Self {
            lock: Default::default(),
            data: UnsafeCell::new(Default::default()),
        }
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

impl<T, Lock> fmt::Debug for Mutex<T, Lock>
where
    T: fmt::Debug,
    Lock: fmt::Debug + RawMutex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("data", &fmt::opt(&self.try_lock()).or_else("<locked>"))
            .field("lock", &self.lock)
            .finish()
    }
}

unsafe impl<T: Send, Lock: Send> Send for Mutex<T, Lock> {}
unsafe impl<T: Send, Lock: Sync> Sync for Mutex<T, Lock> {}

// === impl MutexGuard ===

impl<'a, T, Lock: RawMutex> MutexGuard<'a, T, Lock> {
    /// Returns the [`Mutex`] this guard has locked.
    #[inline]
    #[must_use]
    pub fn mutex(this: &Self) -> &'a Mutex<T, Lock> {
        this.mutex
    }

    /// Consumes the guard *without* unlocking the mutex, returning a mutable
    /// reference to the data that lives as long as the mutex's borrow.
    ///
    /// The mutex stays locked until [`Mutex::force_unlock`] is called.
    pub fn leak(this: Self) -> &'a mut T {
        let this = ManuallyDrop::new(this);
        let mutex = this.mutex;
        unsafe {
            // Safety: the mutex is locked, and will stay locked, since the
            // guard will never be dropped.
            mutex.data.with_mut(|data| &mut *data)
        }
    }
}

impl<T, Lock: RawMutex> Deref for MutexGuard<'_, T, Lock> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe {
            // Safety: we are holding the lock, so it is okay to dereference the
            // data pointer.
            self.mutex.data.with(|data| &*data)
        }
    }
}

impl<T, Lock: RawMutex> DerefMut for MutexGuard<'_, T, Lock> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe {
            // Safety: we are holding the lock, and the guard is borrowed
            // mutably, so nothing else can access the data.
            self.mutex.data.with_mut(|data| &mut *data)
        }
    }
}

impl<T, Lock, R: ?Sized> AsRef<R> for MutexGuard<'_, T, Lock>
where
    T: AsRef<R>,
    Lock: RawMutex,
{
    #[inline]
    fn as_ref(&self) -> &R {
        self.deref().as_ref()
    }
}

impl<T, Lock, R: ?Sized> AsMut<R> for MutexGuard<'_, T, Lock>
where
    T: AsMut<R>,
    Lock: RawMutex,
{
    #[inline]
    fn as_mut(&mut self) -> &mut R {
        self.deref_mut().as_mut()
    }
}

impl<T, Lock> Drop for MutexGuard<'_, T, Lock>
where
    Lock: RawMutex,
{
    #[inline]
    #[cfg_attr(test, track_caller)]
    fn drop(&mut self) {
        unsafe { self.mutex.lock.unlock() }
    }
}

impl<T, Lock> fmt::Debug for MutexGuard<'_, T, Lock>
where
    T: fmt::Debug,
    Lock: RawMutex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

impl<T, Lock> fmt::Display for MutexGuard<'_, T, Lock>
where
    T: fmt::Display,
    Lock: RawMutex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}
