//! Blocking locks that own the state they guard.
//!
//! Every lock in this module *contains* the data it protects. The only way to
//! reach that data is through an RAII guard borrowed from the lock, so the
//! relationship between a piece of shared state and the lock that guards it is
//! part of the type, and an access that does not hold the lock does not
//! compile.
//!
//! This module provides the following APIs:
//!
//! - [`Mutex`]: a [mutual exclusion] lock, and its [`MutexGuard`].
//! - [`RwLock`]: a [reader-writer] lock, and its [`RwLockReadGuard`] and
//!   [`RwLockWriteGuard`].
//! - [`RawMutex`] and [`RawRwLock`]: the bare lock/unlock contracts that
//!   [`Mutex`] and [`RwLock`] are generic over. These are also what the
//!   [`Condvar`](crate::Condvar) waits on.
//! - [`SleepMutex`] and [`SleepRwLock`]: the default raw lock
//!   implementations, which put contended threads to sleep.
//! - [`Exclusive`]: adapts the exclusive side of a [`RawRwLock`] into a
//!   [`RawMutex`].
//!
//! # Overriding lock implementations
//!
//! Both [`Mutex`] and [`RwLock`] take a `Lock` type parameter, which defaults
//! to [`SleepMutex`] and [`SleepRwLock`], respectively. Any type implementing
//! [`RawMutex`] or [`RawRwLock`] may be used instead. The [`spin`](crate::spin)
//! module provides spinning implementations, for critical sections so short
//! that putting a thread to sleep would cost more than waiting for it.
//!
//! ```
//! use guarded_sync::{blocking::Mutex, spin::Spinlock};
//!
//! let counter = Mutex::with_raw_mutex(0usize, Spinlock::new());
//! *counter.lock() += 1;
//! assert_eq!(counter.into_inner(), 1);
//! ```
//!
//! [mutual exclusion]: https://en.wikipedia.org/wiki/Mutual_exclusion
//! [reader-writer]: https://en.wikipedia.org/wiki/Readers%E2%80%93writer_lock
mod mutex;
mod rwlock;
mod sleep;

pub use self::{mutex::*, rwlock::*, sleep::*};

/// Trait abstracting over raw [`Mutex`] implementations.
///
/// A `RawMutex` is a lock with no data attached: it only knows whether it is
/// locked. The [`Mutex`] type pairs one with the data it protects, and the
/// [`Condvar`](crate::Condvar) releases and re-acquires one while it waits.
///
/// # Safety
///
/// Implementations of this trait must ensure that the mutex is actually
/// exclusive: a lock can't be acquired while the mutex is already locked.
pub unsafe trait RawMutex {
    /// Marker type which determines whether a lock guard should be [`Send`].
    ///
    /// Use `()` for locks which may be released from a different thread than
    /// the one that acquired them, and a `!Send` type otherwise.
    type GuardMarker;

    /// Acquires this mutex, blocking the current thread until it is able to do
    /// so.
    fn lock(&self);

    /// Attempts to acquire this mutex without blocking. Returns `true`
    /// if the lock was successfully acquired and `false` otherwise.
    ///
    /// A failed `try_lock` leaves the mutex's state unchanged.
    fn try_lock(&self) -> bool;

    /// Unlocks this mutex.
    ///
    /// # Safety
    ///
    /// This method may only be called if the mutex is held in the current
    /// context, i.e. it must be paired with a successful call to [`lock`] or
    /// [`try_lock`].
    ///
    /// [`lock`]: RawMutex::lock
    /// [`try_lock`]: RawMutex::try_lock
    unsafe fn unlock(&self);

    /// Returns `true` if the mutex is currently locked.
    fn is_locked(&self) -> bool;
}

/// Trait abstracting over raw [`RwLock`] implementations.
///
/// # Safety
///
/// Implementations of this trait must ensure that the `RwLock` is actually
/// exclusive: an exclusive lock can't be acquired while an exclusive or shared
/// lock exists, and a shared lock can't be acquire while an exclusive lock
/// exists.
///
/// Implementations must also guarantee that a thread waiting for the exclusive
/// lock eventually acquires it, even while other threads keep acquiring and
/// releasing the shared lock.
pub unsafe trait RawRwLock {
    /// Marker type which determines whether a lock guard should be [`Send`].
    type GuardMarker;

    /// Acquires a shared lock, blocking the current thread until it is able
    /// to do so.
    fn lock_shared(&self);

    /// Attempts to acquire a shared lock without blocking.
    fn try_lock_shared(&self) -> bool;

    /// Releases a shared lock.
    ///
    /// # Safety
    ///
    /// This method may only be called if a shared lock is held in the current context.
    unsafe fn unlock_shared(&self);

    /// Acquires an exclusive lock, blocking the current thread until it is
    /// able to do so.
    fn lock_exclusive(&self);

    /// Attempts to acquire an exclusive lock without blocking.
    fn try_lock_exclusive(&self) -> bool;

    /// Releases an exclusive lock.
    ///
    /// # Safety
    ///
    /// This method may only be called if an exclusive lock is held in the
    /// current context.
    unsafe fn unlock_exclusive(&self);

    /// Returns `true` if this `RwLock` is currently locked in any way.
    fn is_locked(&self) -> bool;

    /// Returns `true` if this `RwLock` is currently locked exclusively.
    fn is_locked_exclusive(&self) -> bool;
}
