//! Coulomb counter
//!
//! Integrates charge quanta into a milliamp-second accumulator bounded by the
//! pack capacity, and exposes it in the units the rest of the system wants.
//!
//! The accumulator saturates at both rails. There is no error path: a pulse
//! that would overfill or overdrain the pack simply pins the count.

use crate::config::{CAPACITY_MILLI_AMP_SECONDS, CURRENT_OFFSET_TICK_MS};
use crate::error::StoreError;
use crate::traits::{Clock, Key, Persistence};

const MAS_PER_AMP_SECOND: u64 = 1000;
const MAS_PER_MILLI_AMP_HOUR: u64 = 3600;
const MAS_PER_AMP_HOUR: u64 = 3_600_000;

#[derive(Debug, Clone)]
pub struct ChargeCounter {
    capacity_milli_amp_seconds: u32,
    milli_amp_seconds: u32,
    /// Last level written to the store, only used to skip redundant writes.
    last_saved_soc_0_to_255: u8,
    current_offset_ma: i16,
    offset_timer_ms: u32,
}

impl ChargeCounter {
    /// Empty counter for a pack of `capacity_milli_amp_seconds`.
    pub const fn new(capacity_milli_amp_seconds: u32) -> Self {
        Self {
            capacity_milli_amp_seconds,
            milli_amp_seconds: 0,
            last_saved_soc_0_to_255: 0,
            current_offset_ma: 0,
            offset_timer_ms: 0,
        }
    }

    /// Restores the counter from the store.
    ///
    /// Only the quantized level survives a reset, so the count restarts at the
    /// bottom of its 1/256th band.
    pub fn load<P: Persistence>(store: &mut P) -> Result<Self, StoreError> {
        let mut counter = Self::new(CAPACITY_MILLI_AMP_SECONDS);
        counter.last_saved_soc_0_to_255 = store.read_u8(Key::CountSoc)?;
        counter.milli_amp_seconds =
            counter.capacity_milli_amp_seconds / 256 * counter.last_saved_soc_0_to_255 as u32;
        counter.current_offset_ma = store.read_i16(Key::CurrentOffsetMa)?;
        crate::log_info!(
            "count: restored {}/255, offset {} mA",
            counter.last_saved_soc_0_to_255,
            counter.current_offset_ma
        );
        Ok(counter)
    }

    pub fn capacity_milli_amp_seconds(&self) -> u32 {
        self.capacity_milli_amp_seconds
    }

    pub fn add_charge(&mut self, milli_amp_seconds: u32) {
        self.milli_amp_seconds = self
            .milli_amp_seconds
            .saturating_add(milli_amp_seconds)
            .min(self.capacity_milli_amp_seconds);
    }

    pub fn subtract_charge(&mut self, milli_amp_seconds: u32) {
        self.milli_amp_seconds = self.milli_amp_seconds.saturating_sub(milli_amp_seconds);
    }

    fn set_clamped(&mut self, milli_amp_seconds: u64) {
        self.milli_amp_seconds = milli_amp_seconds.min(self.capacity_milli_amp_seconds as u64) as u32;
    }

    pub fn milli_amp_seconds(&self) -> u32 {
        self.milli_amp_seconds
    }

    pub fn set_milli_amp_seconds(&mut self, v: u32) {
        self.set_clamped(v as u64);
    }

    pub fn amp_seconds(&self) -> u32 {
        self.milli_amp_seconds / MAS_PER_AMP_SECOND as u32
    }

    pub fn set_amp_seconds(&mut self, v: u32) {
        self.set_clamped(v as u64 * MAS_PER_AMP_SECOND);
    }

    pub fn amp_hours(&self) -> u16 {
        (self.milli_amp_seconds as u64 / MAS_PER_AMP_HOUR) as u16
    }

    pub fn set_amp_hours(&mut self, v: u16) {
        self.set_clamped(v as u64 * MAS_PER_AMP_HOUR);
    }

    pub fn milli_amp_hours(&self) -> u32 {
        self.milli_amp_seconds / MAS_PER_MILLI_AMP_HOUR as u32
    }

    pub fn set_milli_amp_hours(&mut self, v: u32) {
        self.set_clamped(v as u64 * MAS_PER_MILLI_AMP_HOUR);
    }

    /// State of charge rounded to the nearest percent.
    ///
    /// ```text
    ///   0% = -0.5 to   0.4999%
    ///   1% =  0.5 to   1.4999%
    /// 100% = 99.5 to 100.4999%
    /// ```
    /// so add half a percent and take the whole part.
    pub fn soc_percent(&self) -> u8 {
        let one_percent = self.capacity_milli_amp_seconds / 100;
        ((self.milli_amp_seconds + self.capacity_milli_amp_seconds / 200) / one_percent) as u8
    }

    pub fn set_soc_percent(&mut self, v: u8) {
        self.set_clamped(v as u64 * (self.capacity_milli_amp_seconds / 100) as u64);
    }

    pub fn add_soc_percent(&mut self, v: u8) {
        let delta = v as u64 * self.capacity_milli_amp_seconds as u64 / 100;
        self.add_charge(delta.min(u32::MAX as u64) as u32);
    }

    pub fn subtract_soc_percent(&mut self, v: u8) {
        let delta = v as u64 * self.capacity_milli_amp_seconds as u64 / 100;
        self.subtract_charge(delta.min(u32::MAX as u64) as u32);
    }

    /// State of charge in 1/256ths, rounded to nearest.
    ///
    /// A full pack rounds up to 256, which is pinned to 255.
    pub fn soc_0_to_255(&self) -> u8 {
        let one_step = self.capacity_milli_amp_seconds / 256;
        let level = (self.milli_amp_seconds + self.capacity_milli_amp_seconds / 512) / one_step;
        level.min(u8::MAX as u32) as u8
    }

    pub fn set_soc_0_to_255(&mut self, v: u8) {
        self.set_clamped(v as u64 * (self.capacity_milli_amp_seconds / 256) as u64);
    }

    pub fn current_offset_ma(&self) -> i16 {
        self.current_offset_ma
    }

    /// Sets and immediately persists the current offset.
    pub fn set_current_offset_ma<P: Persistence>(&mut self, v: i16, store: &mut P) -> Result<(), StoreError> {
        self.current_offset_ma = v;
        store.write_i16(Key::CurrentOffsetMa, v)
    }

    /// Applies one second's worth of the current offset.
    pub fn apply_current_offset(&mut self) {
        let offset = self.current_offset_ma as i32;
        if offset > 0 {
            self.add_charge(offset as u32);
        } else if offset < 0 {
            self.subtract_charge(offset.unsigned_abs());
        }
    }

    /// Writes the quantized level when it moved since the last write.
    ///
    /// This limits EEPROM writes to about one per 1/256th of full scale.
    /// Returns whether a write happened.
    pub fn persist_if_changed<P: Persistence>(&mut self, store: &mut P) -> Result<bool, StoreError> {
        let level = self.soc_0_to_255();
        if level == self.last_saved_soc_0_to_255 {
            return Ok(false);
        }
        store.write_u8(Key::CountSoc, level)?;
        self.last_saved_soc_0_to_255 = level;
        Ok(true)
    }

    /// Main-loop step: offset aging once per second, then the persistence check.
    ///
    /// A failed write is logged and retried on the next call.
    pub fn poll<C: Clock, P: Persistence>(&mut self, clock: &C, store: &mut P) {
        if clock.elapsed_at_least(&mut self.offset_timer_ms, CURRENT_OFFSET_TICK_MS) {
            self.apply_current_offset();
        }
        if let Err(_err) = self.persist_if_changed(store) {
            crate::log_warn!("count: failed to save soc level");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MemoryStore, MockClock};

    const CAP: u32 = CAPACITY_MILLI_AMP_SECONDS;

    fn counter_at(mas: u32) -> ChargeCounter {
        let mut counter = ChargeCounter::new(CAP);
        counter.set_milli_amp_seconds(mas);
        counter
    }

    #[test]
    fn capacity_of_280ah_pack() {
        assert_eq!(CAP, 1_008_000_000);
    }

    #[test]
    fn add_saturates_at_capacity() {
        let mut counter = counter_at(CAP - 5);
        counter.add_charge(100);
        assert_eq!(counter.milli_amp_seconds(), CAP);

        counter.add_charge(u32::MAX);
        assert_eq!(counter.milli_amp_seconds(), CAP);
    }

    #[test]
    fn subtract_saturates_at_zero() {
        let mut counter = counter_at(5);
        counter.subtract_charge(100);
        assert_eq!(counter.milli_amp_seconds(), 0);
    }

    #[test]
    fn setters_clamp_to_capacity() {
        let mut counter = ChargeCounter::new(CAP);
        counter.set_amp_hours(1000);
        assert_eq!(counter.milli_amp_seconds(), CAP);
        counter.set_amp_seconds(u32::MAX);
        assert_eq!(counter.milli_amp_seconds(), CAP);
        counter.set_soc_percent(150);
        assert_eq!(counter.milli_amp_seconds(), CAP);
    }

    #[test]
    fn unit_views_rescale_the_count() {
        let mut counter = ChargeCounter::new(CAP);
        counter.set_amp_hours(140);
        assert_eq!(counter.milli_amp_seconds(), 504_000_000);
        assert_eq!(counter.amp_seconds(), 504_000);
        assert_eq!(counter.milli_amp_hours(), 140_000);
        assert_eq!(counter.soc_percent(), 50);
        assert_eq!(counter.soc_0_to_255(), 128);

        counter.set_milli_amp_hours(1);
        assert_eq!(counter.milli_amp_seconds(), 3600);
    }

    #[test]
    fn percent_round_trips_for_every_value() {
        let mut counter = ChargeCounter::new(CAP);
        for p in 0..=100u8 {
            counter.set_soc_percent(p);
            assert_eq!(counter.soc_percent(), p);
        }
    }

    #[test]
    fn percent_rounds_at_half_a_percent() {
        // 0.4999% and 0.5000% of 1_008_000_000
        assert_eq!(counter_at(5_038_992).soc_percent(), 0);
        assert_eq!(counter_at(5_040_000).soc_percent(), 1);
        // 1.4999% still reads 1%
        assert_eq!(counter_at(15_118_992).soc_percent(), 1);
    }

    #[test]
    fn level_0_to_255_rounds_and_pins_at_full() {
        let step = CAP / 256;
        assert_eq!(counter_at(step / 2 - 1).soc_0_to_255(), 0);
        assert_eq!(counter_at(step / 2).soc_0_to_255(), 1);
        assert_eq!(counter_at(CAP).soc_0_to_255(), 255);
    }

    #[test]
    fn percent_add_and_subtract_saturate() {
        let mut counter = counter_at(0);
        counter.add_soc_percent(60);
        counter.add_soc_percent(60);
        assert_eq!(counter.milli_amp_seconds(), CAP);
        counter.subtract_soc_percent(30);
        assert_eq!(counter.soc_percent(), 70);
        counter.subtract_soc_percent(255);
        assert_eq!(counter.milli_amp_seconds(), 0);
    }

    #[test]
    fn load_seeds_from_quantized_level() {
        let mut store = MemoryStore::new();
        store.write_u8(Key::CountSoc, 128).unwrap();
        store.write_i16(Key::CurrentOffsetMa, -7).unwrap();

        let counter = ChargeCounter::load(&mut store).unwrap();
        assert_eq!(counter.milli_amp_seconds(), CAP / 256 * 128);
        assert_eq!(counter.current_offset_ma(), -7);
    }

    #[test]
    fn offset_setter_persists() {
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAP);
        counter.set_current_offset_ma(-12, &mut store).unwrap();
        assert_eq!(store.read_i16(Key::CurrentOffsetMa), Ok(-12));
    }

    #[test]
    fn offset_is_applied_once_per_second() {
        let clock = MockClock::new();
        let mut store = MemoryStore::new();
        let mut counter = counter_at(1_000_000);
        counter.set_current_offset_ma(-25, &mut store).unwrap();

        clock.set(999);
        counter.poll(&clock, &mut store);
        assert_eq!(counter.milli_amp_seconds(), 1_000_000);

        clock.set(1000);
        counter.poll(&clock, &mut store);
        assert_eq!(counter.milli_amp_seconds(), 999_975);

        clock.set(3000);
        counter.poll(&clock, &mut store);
        counter.poll(&clock, &mut store);
        assert_eq!(counter.milli_amp_seconds(), 999_925);
    }

    #[test]
    fn positive_offset_trickles_charge_in() {
        let mut store = MemoryStore::new();
        let mut counter = counter_at(CAP - 10);
        counter.set_current_offset_ma(30, &mut store).unwrap();
        counter.apply_current_offset();
        assert_eq!(counter.milli_amp_seconds(), CAP);
    }

    #[test]
    fn persistence_only_writes_when_level_changes() {
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAP);

        assert_eq!(counter.persist_if_changed(&mut store), Ok(false));
        counter.add_charge(CAP / 256 / 2 - 1);
        assert_eq!(counter.persist_if_changed(&mut store), Ok(false));
        counter.add_charge(1);
        assert_eq!(counter.persist_if_changed(&mut store), Ok(true));
        assert_eq!(counter.persist_if_changed(&mut store), Ok(false));

        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_u8(Key::CountSoc), Ok(1));
    }

    #[test]
    fn failed_save_is_retried() {
        let clock = MockClock::new();
        let mut store = MemoryStore::new();
        let mut counter = ChargeCounter::new(CAP);
        counter.set_soc_percent(50);

        store.set_fail_writes(true);
        counter.poll(&clock, &mut store);
        assert_eq!(store.read_u8(Key::CountSoc), Ok(0));

        store.set_fail_writes(false);
        counter.poll(&clock, &mut store);
        assert_eq!(store.read_u8(Key::CountSoc), Ok(128));
    }
}
