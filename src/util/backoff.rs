/// An [exponential backoff] for spin loops.
///
/// The [spinning raw locks](crate::spin) use this to wait for a contended
/// lock: each call to [`spin`](Backoff::spin) issues twice as many spin loop
/// hints as the last one, up to a maximum. Once that maximum is reached, the
/// backoff starts yielding the thread to the OS scheduler instead, since a
/// lock that has stayed contended for that long is probably held by a thread
/// that is not currently running.
///
/// [exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
#[derive(Debug, Copy, Clone)]
pub struct Backoff {
    exp: u8,
    max: u8,
}

// === impl Backoff ===

impl Backoff {
    /// The default maximum exponent (2^8).
    ///
    /// This is the maximum exponent returned by [`Backoff::new()`] and
    /// [`Backoff::default()`]. To override the maximum exponent, use
    /// [`Backoff::with_max_exponent()`].
    pub const DEFAULT_MAX_EXPONENT: u8 = 8;

    /// Returns a new exponential backoff with the maximum exponent set to
    /// [`Self::DEFAULT_MAX_EXPONENT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            exp: 0,
            max: Self::DEFAULT_MAX_EXPONENT,
        }
    }

    /// Returns a new exponential backoff with the provided max exponent.
    ///
    /// # Panics
    ///
    /// If `max` is greater than [`Self::DEFAULT_MAX_EXPONENT`].
    #[must_use]
    pub fn with_max_exponent(max: u8) -> Self {
        assert!(
            max <= Self::DEFAULT_MAX_EXPONENT,
            "backoff exponent must be at most {}",
            Self::DEFAULT_MAX_EXPONENT
        );
        Self { exp: 0, max }
    }

    /// Backs off in a spin loop.
    ///
    /// Each time this function is called, it will issue `2^exp` [spin loop
    /// hints], where `exp` is the current exponent value (starting at 0). If
    /// `exp` is less than the configured maximum exponent, the exponent is
    /// incremented once the spin is complete. Once the exponent has reached
    /// the maximum, the current thread yields instead.
    ///
    /// [spin loop hints]: core::hint::spin_loop
    #[inline(always)]
    pub fn spin(&mut self) {
        #[cfg_attr(loom, allow(unused_variables))]
        let spins = 1u32 << self.exp;

        #[cfg(not(loom))]
        {
            if self.exp >= self.max {
                std::thread::yield_now();
                return;
            }

            for _ in 0..spins {
                crate::loom::hint::spin_loop();
            }
        }

        #[cfg(loom)]
        {
            test_debug!("would back off for {spins} spins");
            loom::thread::yield_now();
        }

        if self.exp < self.max {
            self.exp += 1
        }
    }

    /// Returns `true` once this backoff has reached its maximum exponent, and
    /// is yielding rather than spinning.
    #[inline]
    #[must_use]
    pub fn is_yielding(&self) -> bool {
        self.exp >= self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
