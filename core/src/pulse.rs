//! Current measurement from the isolated pulse sensor
//!
//! The sensor emits one pulse per fixed charge quantum, with a separate
//! polarity line. Counting pulses gives an exact charge; timing them gives an
//! estimate of the current. Both come from the same pulse stream so the two
//! never disagree about how much charge moved.
//!
//! Edges are captured in interrupt context by [`PulseLatch`] and drained by
//! the main loop into [`PulseMeter::on_edge`].

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::{MA_SECONDS_PER_PULSE, MIN_PULSE_INTERVAL_MS, SENTINEL_CURRENT_MA};
use crate::count::ChargeCounter;

/// Sign of the current as reported by the sensor's polarity line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Charging
    #[default]
    Positive,
    /// Discharging
    Negative,
}

impl Polarity {
    pub fn from_level(high: bool) -> Self {
        if high { Polarity::Positive } else { Polarity::Negative }
    }
}

/// Edge flag shared between the edge interrupt and the main loop.
///
/// The interrupt side only records a timestamp and raises the flag. The main
/// loop takes it with an atomic read-and-clear, so an edge arriving between
/// the read and the clear is deferred to the next loop, never lost to a
/// decrement. Two edges inside one loop collapse into one (the later timestamp wins).
pub struct PulseLatch {
    pending: AtomicBool,
    timestamp_ms: AtomicU32,
}

impl PulseLatch {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            timestamp_ms: AtomicU32::new(0),
        }
    }

    /// Called from the edge interrupt or task.
    pub fn record(&self, timestamp_ms: u32) {
        self.timestamp_ms.store(timestamp_ms, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// Returns the edge timestamp if an edge arrived since the last call.
    pub fn take(&self) -> Option<u32> {
        if self.pending.swap(false, Ordering::Acquire) {
            Some(self.timestamp_ms.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

impl Default for PulseLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PulseMeter {
    last_pulse_ms: Option<u32>,
    last_interval_ms: u32,
    polarity: Polarity,
    instantaneous_polarity: Polarity,
}

impl PulseMeter {
    pub const fn new() -> Self {
        Self {
            last_pulse_ms: None,
            last_interval_ms: 0,
            polarity: Polarity::Positive,
            instantaneous_polarity: Polarity::Positive,
        }
    }

    /// Handles one sensor edge: latch the polarity, time the interval and
    /// feed one quantum into the counter.
    pub fn on_edge(&mut self, timestamp_ms: u32, polarity: Polarity, counter: &mut ChargeCounter) {
        self.polarity = polarity;
        self.instantaneous_polarity = polarity;
        if let Some(last) = self.last_pulse_ms {
            self.last_interval_ms = timestamp_ms.wrapping_sub(last);
        }
        self.last_pulse_ms = Some(timestamp_ms);

        match polarity {
            Polarity::Positive => counter.add_charge(MA_SECONDS_PER_PULSE),
            Polarity::Negative => counter.subtract_charge(MA_SECONDS_PER_PULSE),
        }
    }

    /// Continuous sample of the polarity line, taken every loop.
    pub fn sample_polarity(&mut self, polarity: Polarity) {
        self.instantaneous_polarity = polarity;
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn instantaneous_polarity(&self) -> Polarity {
        self.instantaneous_polarity
    }

    pub fn last_interval_ms(&self) -> u32 {
        self.last_interval_ms
    }

    /// Magnitude of the current, or 0 when no edge has been seen yet.
    ///
    /// Uses the longer of the last interval and the time since the last edge,
    /// so a stalled pulse train decays toward zero instead of holding a stale
    /// high reading.
    pub fn absolute_current_ma(&self, now_ms: u32) -> u32 {
        let Some(last) = self.last_pulse_ms else {
            return 0;
        };
        let interval = now_ms.wrapping_sub(last).max(self.last_interval_ms);
        if interval < MIN_PULSE_INTERVAL_MS {
            return SENTINEL_CURRENT_MA;
        }
        MA_SECONDS_PER_PULSE * 1000 / interval
    }

    /// Signed current, positive when charging.
    pub fn instantaneous_current_ma(&self, now_ms: u32) -> i32 {
        let ma = self.absolute_current_ma(now_ms) as i32;
        match self.polarity {
            Polarity::Positive => ma,
            Polarity::Negative => -ma,
        }
    }

    /// Time since the last edge, for staleness diagnostics.
    pub fn ms_since_last_pulse(&self, now_ms: u32) -> u32 {
        match self.last_pulse_ms {
            Some(last) => now_ms.wrapping_sub(last),
            None => now_ms,
        }
    }
}
