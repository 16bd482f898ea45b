//! A single-use value handoff between two threads, which never panics.
//!
//! A [`channel`] returns a linked [`Promise`] (the write end) and
//! [`Pending`] (the read end). The thread holding the `Promise` eventually
//! either [fulfills](Promise::set_value) it with a value, or drops it. The
//! thread holding the `Pending` [blocks](Pending::get) until one of those
//! happens, and then either receives the value or a [`Broken`] error.
//!
//! ```
//! use guarded_sync::promise;
//! use std::thread;
//!
//! let (promise, pending) = promise::channel();
//! thread::spawn(move || {
//!     promise.set_value(123).unwrap();
//! });
//! assert_eq!(pending.get(), Ok(123));
//! ```
//!
//! Dropping a `Promise` without a value is not an error for the *producer*:
//! the consumer simply observes that the promise was broken.
//!
//! ```
//! use guarded_sync::promise::{self, Broken};
//!
//! let (promise, pending) = promise::channel::<u32>();
//! drop(promise);
//! assert_eq!(pending.get(), Err(Broken));
//! ```
//!
//! Both ends are consumed by the operation that resolves them, so a promise
//! can't be fulfilled twice:
//!
//! ```compile_fail
//! let (promise, _pending) = guarded_sync::promise::channel();
//! promise.set_value(1).unwrap();
//! promise.set_value(2).unwrap(); // error: use of moved value: `promise`
//! ```
use crate::{
    loom::sync::{Arc, Condvar, Mutex as StateLock, MutexGuard as StateGuard},
    util::fmt,
};
use core::mem;
use std::{
    sync::PoisonError,
    time::{Duration, Instant},
};

/// Returns a new, linked [`Promise`] and [`Pending`] pair.
#[must_use]
pub fn channel<T>() -> (Promise<T>, Pending<T>) {
    let shared = Arc::new(Shared {
        state: StateLock::new(Inner {
            slot: Slot::Empty,
            pending_dropped: false,
        }),
        resolved: Condvar::new(),
    });
    let promise = Promise {
        shared: shared.clone(),
    };
    (promise, Pending { shared })
}

/// The write end of a [`channel`].
///
/// A `Promise` is resolved exactly once: either by [`set_value`], or by being
/// dropped, which *breaks* it.
///
/// [`set_value`]: Promise::set_value
#[must_use = "dropping a `Promise` immediately breaks it"]
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

/// The read end of a [`channel`].
#[must_use = "a `Pending` does nothing unless waited on"]
pub struct Pending<T> {
    shared: Arc<Shared<T>>,
}

/// Error returned by [`Pending::get`] when the [`Promise`] was dropped
/// without a value.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("promise was dropped without a value")]
pub struct Broken;

/// Error returned by [`Promise::set_value`] when the [`Pending`] end was
/// already dropped. The value is handed back.
#[derive(Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("the pending end of this promise was dropped")]
pub struct SendError<T>(pub T);

struct Shared<T> {
    state: StateLock<Inner<T>>,
    resolved: Condvar,
}

struct Inner<T> {
    slot: Slot<T>,
    pending_dropped: bool,
}

enum Slot<T> {
    Empty,
    Fulfilled(T),
    Broken,
}

// === impl Shared ===

impl<T> Shared<T> {
    fn lock(&self) -> StateGuard<'_, Inner<T>> {
        // No user code runs while this lock is held.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Slot<T> {
    fn is_resolved(&self) -> bool {
        !matches!(self, Slot::Empty)
    }

    fn name(&self) -> &'static str {
        match self {
            Slot::Empty => "Empty",
            Slot::Fulfilled(_) => "Fulfilled",
            Slot::Broken => "Broken",
        }
    }
}

// === impl Promise ===

impl<T> Promise<T> {
    /// Fulfills the promise with `value`, waking the thread waiting on the
    /// [`Pending`] end.
    ///
    /// # Errors
    ///
    /// If the [`Pending`] end has already been dropped, nobody can ever
    /// receive `value`, so it is returned in a [`SendError`].
    pub fn set_value(self, value: T) -> Result<(), SendError<T>> {
        let mut inner = self.shared.lock();
        if inner.pending_dropped {
            debug!(
                target: "guarded_sync::promise",
                promise = ?fmt::ptr(&*self.shared),
                "Promise::set_value: pending end was dropped"
            );
            return Err(SendError(value));
        }

        inner.slot = Slot::Fulfilled(value);
        drop(inner);
        trace!(
            target: "guarded_sync::promise",
            promise = ?fmt::ptr(&*self.shared),
            "Promise::set_value: fulfilled"
        );
        self.shared.resolved.notify_all();
        Ok(())
    }

    /// Returns `true` if the [`Pending`] end of this promise has been
    /// dropped, so that nobody will ever observe its value.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.shared.lock().pending_dropped
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner.slot.is_resolved() || inner.pending_dropped {
            return;
        }

        inner.slot = Slot::Broken;
        drop(inner);
        debug!(
            target: "guarded_sync::promise",
            promise = ?fmt::ptr(&*self.shared),
            "Promise dropped without a value, breaking it"
        );
        self.shared.resolved.notify_all();
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Promise")
            .field("state", &inner.slot.name())
            .field("abandoned", &inner.pending_dropped)
            .finish()
    }
}

// === impl Pending ===

impl<T> Pending<T> {
    /// Blocks until the promise is resolved, and then returns its value.
    ///
    /// # Errors
    ///
    /// Returns [`Broken`] if the [`Promise`] was dropped without a value.
    pub fn get(self) -> Result<T, Broken> {
        let mut inner = self.shared.lock();
        loop {
            match mem::replace(&mut inner.slot, Slot::Empty) {
                Slot::Fulfilled(value) => return Ok(value),
                Slot::Broken => return Err(Broken),
                Slot::Empty => {
                    inner = self
                        .shared
                        .resolved
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Returns `true` if the promise has been fulfilled or broken, so that
    /// [`get`](Self::get) will not block.
    ///
    /// This never blocks.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.lock().slot.is_resolved()
    }

    /// Blocks until the promise has been fulfilled or broken.
    pub fn wait(&self) {
        let mut inner = self.shared.lock();
        while !inner.slot.is_resolved() {
            inner = self
                .shared
                .resolved
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the promise has been fulfilled or broken, or until
    /// `timeout` elapses.
    ///
    /// Returns `true` if the promise was resolved.
    #[must_use]
    pub fn wait_for(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => {
                self.wait();
                true
            }
        }
    }

    /// Blocks until the promise has been fulfilled or broken, or until
    /// `deadline` passes.
    ///
    /// Returns `true` if the promise was resolved.
    #[must_use]
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut inner = self.shared.lock();
        loop {
            if inner.slot.is_resolved() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .resolved
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        self.shared.lock().pending_dropped = true;
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("state", &self.shared.lock().slot.name())
            .finish()
    }
}

// === impl SendError ===

impl<T> SendError<T> {
    /// Returns the value that could not be sent.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}
