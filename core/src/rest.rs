//! Rest detection and self-calibration
//!
//! While the pack is electrically at rest two slow corrections run:
//! - after an hour, the current offset is nudged 1 mA per hour toward
//!   cancelling whatever current is still measured
//! - after the settle time, the counter is stepped toward the charge implied
//!   by the open-circuit voltage, at most 1000 mAs per second
//!
//! Both restart their cadence from scratch whenever rest is broken.

use crate::calibration;
use crate::config::{
    MAX_CALIBRATION_STEP_MAS, REST_DISCHARGE_THRESHOLD_MA, VOLTAGE_CALIBRATION_REPEAT_MS, ZERO_CURRENT_REPEAT_MS,
    ZERO_CURRENT_REST_MS,
};
use crate::count::ChargeCounter;
use crate::error::StoreError;
use crate::output::OutputState;
use crate::traits::{Clock, Key, Persistence};

/// Rest means no output is active and no meaningful discharge is flowing.
///
/// Only discharge beyond -100 mA breaks rest; any charging current is
/// tolerated. The asymmetry is deliberate: calibrating through a trickle
/// charge is acceptable, through a load is not.
pub fn is_at_rest(state: OutputState, current_ma: i32) -> bool {
    state == OutputState::Neutral && current_ma > REST_DISCHARGE_THRESHOLD_MA
}

/// Readings consumed by one rest/calibration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestInputs {
    pub state: OutputState,
    pub current_ma: i32,
    pub battery_mv: i16,
}

#[derive(Debug, Clone)]
pub struct RestManager {
    rest_since_ms: u32,
    voltage_settle_time_mins: u16,
    zero_current_timer_ms: u32,
    voltage_calibration_timer_ms: u32,
}

impl RestManager {
    pub fn new(voltage_settle_time_mins: u16, now_ms: u32) -> Self {
        Self {
            rest_since_ms: now_ms,
            voltage_settle_time_mins,
            zero_current_timer_ms: now_ms,
            voltage_calibration_timer_ms: now_ms,
        }
    }

    pub fn load<P: Persistence>(store: &mut P, now_ms: u32) -> Result<Self, StoreError> {
        let mins = store.read_u16(Key::VoltageSettleTimeMins)?;
        crate::log_info!("rest: voltage settle time {} min", mins);
        Ok(Self::new(mins, now_ms))
    }

    pub fn ms_at_rest(&self, now_ms: u32) -> u32 {
        now_ms.wrapping_sub(self.rest_since_ms)
    }

    pub fn voltage_settle_time_mins(&self) -> u16 {
        self.voltage_settle_time_mins
    }

    pub fn set_voltage_settle_time_mins<P: Persistence>(&mut self, v: u16, store: &mut P) -> Result<(), StoreError> {
        self.voltage_settle_time_mins = v;
        store.write_u16(Key::VoltageSettleTimeMins, v)
    }

    fn voltage_settle_time_ms(&self) -> u32 {
        self.voltage_settle_time_mins as u32 * 60 * 1000
    }

    /// Main-loop step.
    pub fn poll<C: Clock, P: Persistence>(
        &mut self,
        clock: &C,
        inputs: &RestInputs,
        counter: &mut ChargeCounter,
        store: &mut P,
    ) {
        if !is_at_rest(inputs.state, inputs.current_ma) {
            self.rest_since_ms = clock.now_ms();
        }

        let zero_current_run = clock.elapsed_at_least_peek(self.rest_since_ms, ZERO_CURRENT_REST_MS);
        if let Err(_err) = self.zero_current(clock, zero_current_run, inputs.current_ma, counter, store) {
            crate::log_warn!("rest: failed to save current offset");
        }

        let calibrate_run = clock.elapsed_at_least_peek(self.rest_since_ms, self.voltage_settle_time_ms());
        self.calibrate_from_voltage(clock, calibrate_run, inputs.battery_mv, counter);
    }

    /// A pack truly at rest reads zero net current, so whatever remains is
    /// sensor or parasitic bias. Move the offset 1 mA against it per hour.
    fn zero_current<C: Clock, P: Persistence>(
        &mut self,
        clock: &C,
        run: bool,
        current_ma: i32,
        counter: &mut ChargeCounter,
        store: &mut P,
    ) -> Result<(), StoreError> {
        if !run {
            self.zero_current_timer_ms = clock.now_ms();
        }
        if !clock.elapsed_at_least(&mut self.zero_current_timer_ms, ZERO_CURRENT_REPEAT_MS) {
            return Ok(());
        }

        let offset_ma = counter.current_offset_ma();
        let residual = current_ma + offset_ma as i32;
        let new_offset = if residual > 0 {
            offset_ma.saturating_sub(1)
        } else if residual < 0 {
            offset_ma.saturating_add(1)
        } else {
            return Ok(());
        };
        crate::log_debug!("rest: residual {} mA, offset {} -> {} mA", residual, offset_ma, new_offset);
        counter.set_current_offset_ma(new_offset, store)
    }

    fn calibrate_from_voltage<C: Clock>(
        &mut self,
        clock: &C,
        run: bool,
        battery_mv: i16,
        counter: &mut ChargeCounter,
    ) {
        if !run {
            self.voltage_calibration_timer_ms = clock.now_ms();
        }
        if !clock.elapsed_at_least(&mut self.voltage_calibration_timer_ms, VOLTAGE_CALIBRATION_REPEAT_MS) {
            return;
        }

        // Outside the trusted part of the curve: no correction this tick.
        let Some(target) = calibration::implied_milli_amp_seconds(battery_mv) else {
            return;
        };
        let actual = counter.milli_amp_seconds();
        if target > actual {
            counter.add_charge((target - actual).min(MAX_CALIBRATION_STEP_MAS));
        } else {
            counter.subtract_charge((actual - target).min(MAX_CALIBRATION_STEP_MAS));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CAPACITY_MILLI_AMP_SECONDS;
    use crate::traits::{MemoryStore, MockClock};

    const MINUTE: u32 = 60_000;
    const INFLECTION_BATTERY_MV: i16 = 3299 * 4;
    const INFLECTION_MAS: u32 = 574_560_000;

    fn resting(current_ma: i32) -> RestInputs {
        RestInputs {
            state: OutputState::Neutral,
            current_ma,
            battery_mv: INFLECTION_BATTERY_MV,
        }
    }

    #[test]
    fn rest_threshold_is_asymmetric() {
        assert!(is_at_rest(OutputState::Neutral, 0));
        assert!(is_at_rest(OutputState::Neutral, -99));
        assert!(!is_at_rest(OutputState::Neutral, -100));
        // Charging current of any size is still rest.
        assert!(is_at_rest(OutputState::Neutral, 150_000));
        assert!(!is_at_rest(OutputState::Charge, 0));
        assert!(!is_at_rest(OutputState::Discharge, 0));
    }

    #[test]
    fn discharge_sample_resets_rest_duration() {
        let clock = MockClock::new();
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAPACITY_MILLI_AMP_SECONDS);
        let mut rest = RestManager::new(0xFFFF, 0);

        clock.set(10 * 60 * MINUTE);
        rest.poll(&clock, &resting(0), &mut counter, &mut store);
        assert_eq!(rest.ms_at_rest(clock.now_ms()), 10 * 60 * MINUTE);

        rest.poll(&clock, &resting(-100), &mut counter, &mut store);
        assert_eq!(rest.ms_at_rest(clock.now_ms()), 0);

        clock.advance(5000);
        rest.poll(&clock, &resting(-99), &mut counter, &mut store);
        assert_eq!(rest.ms_at_rest(clock.now_ms()), 5000);
    }

    #[test]
    fn zero_current_nudges_offset_hourly_after_first_hour() {
        let clock = MockClock::new();
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAPACITY_MILLI_AMP_SECONDS);
        let mut rest = RestManager::new(0xFFFF, 0);

        let mut offsets = std::vec::Vec::new();
        for minute in 0..=180 {
            clock.set(minute * MINUTE);
            rest.poll(&clock, &resting(12), &mut counter, &mut store);
            offsets.push(counter.current_offset_ma());
        }

        // First armed at 60 min, so the first nudge lands an hour later.
        assert_eq!(offsets[118], 0);
        assert_eq!(offsets[119], -1);
        assert_eq!(offsets[178], -1);
        assert_eq!(offsets[179], -2);
        assert_eq!(offsets[180], -2);
        assert_eq!(store.read_i16(Key::CurrentOffsetMa), Ok(-2));
    }

    #[test]
    fn zero_current_pushes_negative_residual_up_and_leaves_zero_alone() {
        let clock = MockClock::new();
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAPACITY_MILLI_AMP_SECONDS);
        counter.set_current_offset_ma(-11, &mut store).unwrap();
        let mut rest = RestManager::new(0xFFFF, 0);

        for minute in 0..=120 {
            clock.set(minute * MINUTE);
            rest.poll(&clock, &resting(0), &mut counter, &mut store);
        }
        assert_eq!(counter.current_offset_ma(), -10);

        let mut counter = ChargeCounter::new(CAPACITY_MILLI_AMP_SECONDS);
        counter.set_current_offset_ma(-11, &mut store).unwrap();
        let mut rest = RestManager::new(0xFFFF, 0);
        for minute in 0..=120 {
            clock.set(minute * MINUTE);
            rest.poll(&clock, &resting(11), &mut counter, &mut store);
        }
        assert_eq!(counter.current_offset_ma(), -11);
    }

    #[test]
    fn calibration_waits_for_settle_time_then_steps_1000_mas() {
        let clock = MockClock::new();
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAPACITY_MILLI_AMP_SECONDS);
        counter.set_milli_amp_seconds(INFLECTION_MAS - 5000);
        let mut rest = RestManager::new(1, 0);

        for second in 0..60 {
            clock.set(second * 1000);
            rest.poll(&clock, &resting(0), &mut counter, &mut store);
        }
        assert_eq!(counter.milli_amp_seconds(), INFLECTION_MAS - 5000);

        clock.set(60_000);
        rest.poll(&clock, &resting(0), &mut counter, &mut store);
        assert_eq!(counter.milli_amp_seconds(), INFLECTION_MAS - 4000);

        for second in 61..=70 {
            clock.set(second * 1000);
            rest.poll(&clock, &resting(0), &mut counter, &mut store);
        }
        assert_eq!(counter.milli_amp_seconds(), INFLECTION_MAS);
    }

    #[test]
    fn calibration_steps_down_when_counter_is_high() {
        let clock = MockClock::new();
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAPACITY_MILLI_AMP_SECONDS);
        counter.set_milli_amp_seconds(INFLECTION_MAS + 2500);
        let mut rest = RestManager::new(0, 0);

        for second in 1..=3 {
            clock.set(second * 1000);
            rest.poll(&clock, &resting(0), &mut counter, &mut store);
        }
        assert_eq!(counter.milli_amp_seconds(), INFLECTION_MAS);
    }

    #[test]
    fn untrusted_voltage_skips_calibration() {
        let clock = MockClock::new();
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAPACITY_MILLI_AMP_SECONDS);
        counter.set_milli_amp_seconds(100_000_000);
        let mut rest = RestManager::new(0, 0);
        let mut inputs = resting(0);
        inputs.battery_mv = 13_400;

        for second in 1..=10 {
            clock.set(second * 1000);
            rest.poll(&clock, &inputs, &mut counter, &mut store);
        }
        assert_eq!(counter.milli_amp_seconds(), 100_000_000);
    }

    #[test]
    fn breaking_rest_rearms_calibration() {
        let clock = MockClock::new();
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAPACITY_MILLI_AMP_SECONDS);
        counter.set_milli_amp_seconds(INFLECTION_MAS - 10_000);
        let mut rest = RestManager::new(1, 0);

        for second in 0..=60 {
            clock.set(second * 1000);
            rest.poll(&clock, &resting(0), &mut counter, &mut store);
        }
        assert_eq!(counter.milli_amp_seconds(), INFLECTION_MAS - 9000);

        let mut busy = resting(0);
        busy.state = OutputState::Discharge;
        clock.set(61_000);
        rest.poll(&clock, &busy, &mut counter, &mut store);

        for second in 62..=120 {
            clock.set(second * 1000);
            rest.poll(&clock, &resting(0), &mut counter, &mut store);
        }
        assert_eq!(counter.milli_amp_seconds(), INFLECTION_MAS - 9000);

        clock.set(121_000);
        rest.poll(&clock, &resting(0), &mut counter, &mut store);
        assert_eq!(counter.milli_amp_seconds(), INFLECTION_MAS - 8000);
    }

    #[test]
    fn settle_time_persists() {
        let mut store = MemoryStore::new();
        let mut rest = RestManager::new(0, 0);
        rest.set_voltage_settle_time_mins(45, &mut store).unwrap();

        let loaded = RestManager::load(&mut store, 0).unwrap();
        assert_eq!(loaded.voltage_settle_time_mins(), 45);
    }
}
