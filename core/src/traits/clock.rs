//! Millisecond clock abstraction.
//!
//! All cadences in the core are expressed against a wrapping `u32`
//! millisecond counter, so every comparison goes through `wrapping_sub`.

use core::cell::Cell;

/// Monotonic millisecond counter.
///
/// - `EmbassyClock` (firmware crate) reads `embassy_time::Instant`
/// - [`MockClock`] is driven by hand in tests
pub trait Clock {
    /// Milliseconds since start, wrapping after ~49 days.
    fn now_ms(&self) -> u32;

    /// Returns true once at least `interval_ms` has elapsed since `reference`,
    /// and moves `reference` forward by one interval when it does.
    ///
    /// Advancing by the interval rather than to `now` keeps a fixed cadence
    /// even when the main loop runs late.
    fn elapsed_at_least(&self, reference: &mut u32, interval_ms: u32) -> bool {
        if self.now_ms().wrapping_sub(*reference) < interval_ms {
            return false;
        }
        *reference = reference.wrapping_add(interval_ms);
        true
    }

    /// Same check as [`Clock::elapsed_at_least`] without touching `reference`.
    fn elapsed_at_least_peek(&self, reference: u32, interval_ms: u32) -> bool {
        self.now_ms().wrapping_sub(reference) >= interval_ms
    }
}

impl<T: Clock> Clock for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Clock for host tests.
///
/// ```
/// use bms_core::traits::{Clock, MockClock};
///
/// let clock = MockClock::new();
/// let mut tick = 0;
/// clock.advance(999);
/// assert!(!clock.elapsed_at_least(&mut tick, 1000));
/// clock.advance(1);
/// assert!(clock.elapsed_at_least(&mut tick, 1000));
/// assert_eq!(tick, 1000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now_ms: Cell<u32>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(ms: u32) -> Self {
        Self {
            now_ms: Cell::new(ms),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now_ms.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.now_ms.set(self.now_ms.get().wrapping_add(ms));
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u32 {
        self.now_ms.get()
    }
}
