//! Charge/discharge output control
//!
//! A three-state machine (Neutral, Charge, Discharge) with hysteresis around a
//! target, either a state of charge or a battery voltage. The state only
//! expresses intent: every cycle the interlocks decide whether the matching
//! actuator is actually driven.
//!
//! ```text
//!            +---------+
//!   +------->| Neutral |<-------+
//!   |        +---------+        |
//!   |         |       |         |
//!   |         v       v         |
//! +--------+           +-----------+
//! | Charge |           | Discharge |
//! +--------+           +-----------+
//! ```
//! There is no direct Charge <-> Discharge transition.

use crate::calibration::VALID_INFLECTION_MV;
use crate::config::{
    CELLS_IN_SERIES, MAX_CHARGE_MV, MIN_CHARGE_TEMPERATURE_8BFDP, MIN_DISCHARGE_MV, SOC_DEADBAND_PER_10000,
};
use crate::error::StoreError;
use crate::traits::{Actuators, Key, Persistence};

const ENABLE_CHARGE_BIT: u8 = 0b10;
const ENABLE_DISCHARGE_BIT: u8 = 0b01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputState {
    #[default]
    Neutral,
    Charge,
    Discharge,
}

/// What the hysteresis is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetMode {
    /// Hold a battery voltage (home use)
    #[default]
    Voltage,
    /// Hold a state of charge (away use)
    Soc,
    /// Any unrecognised code; forces Neutral
    Off,
}

impl TargetMode {
    pub const VOLTAGE_CODE: u8 = 0;
    pub const SOC_CODE: u8 = 1;
    pub const OFF_CODE: u8 = 0xFF;

    pub fn from_code(code: u8) -> Self {
        match code {
            Self::VOLTAGE_CODE => TargetMode::Voltage,
            Self::SOC_CODE => TargetMode::Soc,
            _ => TargetMode::Off,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TargetMode::Voltage => Self::VOLTAGE_CODE,
            TargetMode::Soc => Self::SOC_CODE,
            TargetMode::Off => Self::OFF_CODE,
        }
    }
}

/// Persisted output configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutputConfig {
    pub target_mode: TargetMode,
    /// Percent, 0-100
    pub target_soc: u8,
    /// Per cell
    pub target_mv: i16,
    /// Per cell. Must stay below [`VALID_INFLECTION_MV`] or the voltage mode never settles.
    pub rebound_mv: i8,
    pub charge_enabled: bool,
    pub discharge_enabled: bool,
}

impl OutputConfig {
    /// Both enables packed into the persisted byte.
    pub fn enables_byte(&self) -> u8 {
        let mut byte = 0;
        if self.charge_enabled {
            byte |= ENABLE_CHARGE_BIT;
        }
        if self.discharge_enabled {
            byte |= ENABLE_DISCHARGE_BIT;
        }
        byte
    }

    pub fn set_enables_byte(&mut self, byte: u8) {
        self.charge_enabled = byte & ENABLE_CHARGE_BIT != 0;
        self.discharge_enabled = byte & ENABLE_DISCHARGE_BIT != 0;
    }

    pub fn load<P: Persistence>(store: &mut P) -> Result<Self, StoreError> {
        let mut config = OutputConfig {
            target_mode: TargetMode::from_code(store.read_char(Key::OutputTargetMode)?),
            target_soc: store.read_u8(Key::OutputTargetSoc)?,
            target_mv: store.read_i16(Key::OutputTargetMv)?,
            rebound_mv: store.read_i8(Key::OutputReboundMv)?,
            ..Default::default()
        };
        config.set_enables_byte(store.read_u8(Key::OutputEnables)?);
        Ok(config)
    }
}

/// Readings consumed by one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInputs {
    pub milli_amp_seconds: u32,
    pub capacity_milli_amp_seconds: u32,
    /// Whole battery, 4 cells
    pub battery_mv: i16,
    /// Degrees C in 8.8 fixed point
    pub temperature_8bfdp: i16,
}

#[derive(Debug, Clone, Default)]
pub struct OutputControl {
    state: OutputState,
    allowed: bool,
    config: OutputConfig,
}

impl OutputControl {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            state: OutputState::Neutral,
            allowed: false,
            config,
        }
    }

    pub fn load<P: Persistence>(store: &mut P) -> Result<Self, StoreError> {
        let config = OutputConfig::load(store)?;
        crate::log_info!(
            "output: mode {}, soc {}%, {} mV, rebound {} mV, enables {}",
            config.target_mode.code(),
            config.target_soc,
            config.target_mv,
            config.rebound_mv,
            config.enables_byte()
        );
        Ok(Self::new(config))
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    /// Whether the interlocks let the current state drive its actuator.
    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Upper case when the actuator is driven, lower case when the state is
    /// blocked by an interlock.
    pub fn state_char(&self) -> char {
        match (self.state, self.allowed) {
            (OutputState::Neutral, _) => 'N',
            (OutputState::Charge, true) => 'C',
            (OutputState::Charge, false) => 'c',
            (OutputState::Discharge, true) => 'D',
            (OutputState::Discharge, false) => 'd',
        }
    }

    /// One control cycle: step the state machine, then apply the interlocks.
    pub fn update<A: Actuators>(&mut self, inputs: &OutputInputs, actuators: &mut A) {
        let previous = self.state;
        self.state = match self.config.target_mode {
            TargetMode::Soc => self.next_state_soc(inputs),
            TargetMode::Voltage => self.next_state_voltage(inputs),
            TargetMode::Off => OutputState::Neutral,
        };
        if self.state != previous {
            crate::log_info!("output: {} -> {}", state_name(previous), state_name(self.state));
        }
        self.drive(inputs, actuators);
    }

    fn next_state_soc(&self, inputs: &OutputInputs) -> OutputState {
        let one_percent = inputs.capacity_milli_amp_seconds / 100;
        let target = self.config.target_soc as u32 * one_percent;
        let band = (one_percent as u64 * SOC_DEADBAND_PER_10000 as u64 / 10_000) as u32;
        let charge_start = target.saturating_sub(band);
        let discharge_start = target.saturating_add(band);
        let mas = inputs.milli_amp_seconds;

        match self.state {
            OutputState::Neutral if mas <= charge_start => OutputState::Charge,
            OutputState::Neutral if mas >= discharge_start => OutputState::Discharge,
            OutputState::Charge if mas >= target => OutputState::Neutral,
            OutputState::Discharge if mas <= target => OutputState::Neutral,
            state => state,
        }
    }

    fn next_state_voltage(&self, inputs: &OutputInputs) -> OutputState {
        let actual = inputs.battery_mv as i32;
        let target = self.config.target_mv as i32 * CELLS_IN_SERIES;
        let width = VALID_INFLECTION_MV as i32 * CELLS_IN_SERIES;
        let rebound = self.config.rebound_mv as i32 * CELLS_IN_SERIES;

        match self.state {
            OutputState::Neutral if actual <= target - width => OutputState::Charge,
            OutputState::Neutral if actual >= target + width => OutputState::Discharge,
            OutputState::Charge if actual >= target + rebound => OutputState::Neutral,
            OutputState::Discharge if actual <= target - rebound => OutputState::Neutral,
            state => state,
        }
    }

    fn drive<A: Actuators>(&mut self, inputs: &OutputInputs, actuators: &mut A) {
        match self.state {
            OutputState::Neutral => {
                self.allowed = false;
                actuators.set_charge(false);
                actuators.set_discharge(false);
            }
            OutputState::Charge => {
                self.allowed = inputs.temperature_8bfdp >= MIN_CHARGE_TEMPERATURE_8BFDP
                    && inputs.battery_mv < MAX_CHARGE_MV
                    && self.config.charge_enabled;
                actuators.set_charge(self.allowed);
                actuators.set_discharge(false);
            }
            OutputState::Discharge => {
                self.allowed = inputs.battery_mv > MIN_DISCHARGE_MV && self.config.discharge_enabled;
                actuators.set_charge(false);
                actuators.set_discharge(self.allowed);
            }
        }
    }

    pub fn set_charge_enabled<P: Persistence>(&mut self, v: bool, store: &mut P) -> Result<(), StoreError> {
        self.config.charge_enabled = v;
        store.write_u8(Key::OutputEnables, self.config.enables_byte())
    }

    pub fn set_discharge_enabled<P: Persistence>(&mut self, v: bool, store: &mut P) -> Result<(), StoreError> {
        self.config.discharge_enabled = v;
        store.write_u8(Key::OutputEnables, self.config.enables_byte())
    }

    pub fn set_target_mode<P: Persistence>(&mut self, v: TargetMode, store: &mut P) -> Result<(), StoreError> {
        self.config.target_mode = v;
        store.write_char(Key::OutputTargetMode, v.code())
    }

    pub fn set_target_soc<P: Persistence>(&mut self, v: u8, store: &mut P) -> Result<(), StoreError> {
        self.config.target_soc = v;
        store.write_u8(Key::OutputTargetSoc, v)
    }

    pub fn set_target_mv<P: Persistence>(&mut self, v: i16, store: &mut P) -> Result<(), StoreError> {
        self.config.target_mv = v;
        store.write_i16(Key::OutputTargetMv, v)
    }

    pub fn set_rebound_mv<P: Persistence>(&mut self, v: i8, store: &mut P) -> Result<(), StoreError> {
        self.config.rebound_mv = v;
        store.write_i8(Key::OutputReboundMv, v)
    }
}

fn state_name(state: OutputState) -> &'static str {
    match state {
        OutputState::Neutral => "neutral",
        OutputState::Charge => "charge",
        OutputState::Discharge => "discharge",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CAPACITY_MILLI_AMP_SECONDS;
    use crate::traits::{MemoryStore, MockActuators};

    const CAP: u32 = CAPACITY_MILLI_AMP_SECONDS;
    const ONE_PERCENT: u32 = CAP / 100;
    const WARM: i16 = 20 << 8;

    fn soc_control(target_soc: u8) -> OutputControl {
        OutputControl::new(OutputConfig {
            target_mode: TargetMode::Soc,
            target_soc,
            charge_enabled: true,
            discharge_enabled: true,
            ..Default::default()
        })
    }

    fn voltage_control(target_mv: i16, rebound_mv: i8) -> OutputControl {
        OutputControl::new(OutputConfig {
            target_mode: TargetMode::Voltage,
            target_mv,
            rebound_mv,
            charge_enabled: true,
            discharge_enabled: true,
            ..Default::default()
        })
    }

    fn at_charge(mas: u32) -> OutputInputs {
        OutputInputs {
            milli_amp_seconds: mas,
            capacity_milli_amp_seconds: CAP,
            battery_mv: 13_200,
            temperature_8bfdp: WARM,
        }
    }

    fn at_voltage(battery_mv: i16) -> OutputInputs {
        OutputInputs {
            milli_amp_seconds: CAP / 2,
            capacity_milli_amp_seconds: CAP,
            battery_mv,
            temperature_8bfdp: WARM,
        }
    }

    #[test]
    fn starts_neutral_with_outputs_off() {
        let mut control = soc_control(50);
        let mut actuators = MockActuators::default();
        control.update(&at_charge(CAP / 2), &mut actuators);

        assert_eq!(control.state(), OutputState::Neutral);
        assert_eq!(control.state_char(), 'N');
        assert_eq!(actuators, MockActuators::default());
    }

    #[test]
    fn soc_mode_charges_below_deadband_and_returns_at_target() {
        let mut control = soc_control(50);
        let mut actuators = MockActuators::default();

        control.update(&at_charge(50 * ONE_PERCENT - ONE_PERCENT / 2), &mut actuators);
        assert_eq!(control.state(), OutputState::Charge);
        assert!(actuators.charge);
        assert!(!actuators.discharge);

        control.update(&at_charge(50 * ONE_PERCENT - 1), &mut actuators);
        assert_eq!(control.state(), OutputState::Charge);

        control.update(&at_charge(50 * ONE_PERCENT), &mut actuators);
        assert_eq!(control.state(), OutputState::Neutral);
        assert!(!actuators.charge);
    }

    #[test]
    fn soc_mode_deadband_holds_neutral() {
        let mut control = soc_control(50);
        let mut actuators = MockActuators::default();
        let band = 5_038_992;

        for mas in [
            50 * ONE_PERCENT - band + 1,
            50 * ONE_PERCENT,
            50 * ONE_PERCENT + band - 1,
        ] {
            control.update(&at_charge(mas), &mut actuators);
            assert_eq!(control.state(), OutputState::Neutral);
        }

        control.update(&at_charge(50 * ONE_PERCENT + band), &mut actuators);
        assert_eq!(control.state(), OutputState::Discharge);
        assert!(actuators.discharge);

        control.update(&at_charge(50 * ONE_PERCENT + 1), &mut actuators);
        assert_eq!(control.state(), OutputState::Discharge);
        control.update(&at_charge(50 * ONE_PERCENT), &mut actuators);
        assert_eq!(control.state(), OutputState::Neutral);
    }

    #[test]
    fn never_jumps_from_charge_to_discharge() {
        let mut control = soc_control(50);
        let mut actuators = MockActuators::default();

        control.update(&at_charge(0), &mut actuators);
        assert_eq!(control.state(), OutputState::Charge);
        control.update(&at_charge(CAP), &mut actuators);
        assert_eq!(control.state(), OutputState::Neutral);
        control.update(&at_charge(CAP), &mut actuators);
        assert_eq!(control.state(), OutputState::Discharge);
    }

    #[test]
    fn soc_target_of_zero_does_not_wrap() {
        let mut control = soc_control(0);
        let mut actuators = MockActuators::default();

        control.update(&at_charge(ONE_PERCENT), &mut actuators);
        assert_eq!(control.state(), OutputState::Discharge);
        control.update(&at_charge(0), &mut actuators);
        assert_eq!(control.state(), OutputState::Neutral);
    }

    #[test]
    fn voltage_mode_uses_inflection_width_to_enter_and_rebound_to_leave() {
        // 3300 mV per cell target, 15 mV width, 10 mV rebound (x4 for the battery)
        let mut control = voltage_control(3300, 10);
        let mut actuators = MockActuators::default();

        control.update(&at_voltage(13_141), &mut actuators);
        assert_eq!(control.state(), OutputState::Neutral);
        control.update(&at_voltage(13_140), &mut actuators);
        assert_eq!(control.state(), OutputState::Charge);
        control.update(&at_voltage(13_239), &mut actuators);
        assert_eq!(control.state(), OutputState::Charge);
        control.update(&at_voltage(13_240), &mut actuators);
        assert_eq!(control.state(), OutputState::Neutral);

        control.update(&at_voltage(13_259), &mut actuators);
        assert_eq!(control.state(), OutputState::Neutral);
        control.update(&at_voltage(13_260), &mut actuators);
        assert_eq!(control.state(), OutputState::Discharge);
        control.update(&at_voltage(13_161), &mut actuators);
        assert_eq!(control.state(), OutputState::Discharge);
        control.update(&at_voltage(13_160), &mut actuators);
        assert_eq!(control.state(), OutputState::Neutral);
    }

    #[test]
    fn unknown_mode_forces_neutral() {
        let mut control = soc_control(50);
        let mut store = MemoryStore::new();
        let mut actuators = MockActuators::default();

        control.update(&at_charge(0), &mut actuators);
        assert_eq!(control.state(), OutputState::Charge);

        control.set_target_mode(TargetMode::from_code(b'x'), &mut store).unwrap();
        control.update(&at_charge(0), &mut actuators);
        assert_eq!(control.state(), OutputState::Neutral);
        assert!(!actuators.charge);
    }

    #[test]
    fn cold_pack_blocks_charging_but_keeps_intent() {
        let mut control = soc_control(50);
        let mut actuators = MockActuators::default();
        let mut cold = at_charge(0);
        cold.temperature_8bfdp = (5 << 8) - 1;

        control.update(&cold, &mut actuators);
        assert_eq!(control.state(), OutputState::Charge);
        assert!(!control.allowed());
        assert!(!actuators.charge);
        assert_eq!(control.state_char(), 'c');

        cold.temperature_8bfdp = 5 << 8;
        control.update(&cold, &mut actuators);
        assert!(control.allowed());
        assert!(actuators.charge);
        assert_eq!(control.state_char(), 'C');
    }

    #[test]
    fn full_voltage_and_disable_block_charging() {
        let mut control = soc_control(50);
        let mut store = MemoryStore::new();
        let mut actuators = MockActuators::default();
        let mut inputs = at_charge(0);

        inputs.battery_mv = 14_000;
        control.update(&inputs, &mut actuators);
        assert_eq!(control.state_char(), 'c');

        inputs.battery_mv = 13_999;
        control.set_charge_enabled(false, &mut store).unwrap();
        control.update(&inputs, &mut actuators);
        assert_eq!(control.state_char(), 'c');
        assert!(!actuators.charge);
    }

    #[test]
    fn discharge_interlocks() {
        let mut control = soc_control(50);
        let mut store = MemoryStore::new();
        let mut actuators = MockActuators::default();
        let mut inputs = at_charge(CAP);

        inputs.battery_mv = 10_000;
        control.update(&inputs, &mut actuators);
        assert_eq!(control.state_char(), 'd');
        assert!(!actuators.discharge);

        inputs.battery_mv = 10_001;
        control.update(&inputs, &mut actuators);
        assert_eq!(control.state_char(), 'D');
        assert!(actuators.discharge);
        assert!(!actuators.charge);

        control.set_discharge_enabled(false, &mut store).unwrap();
        control.update(&inputs, &mut actuators);
        assert_eq!(control.state_char(), 'd');
        assert!(!actuators.discharge);
    }

    #[test]
    fn enables_pack_into_one_byte() {
        let mut config = OutputConfig::default();
        config.charge_enabled = true;
        assert_eq!(config.enables_byte(), 0b10);
        config.discharge_enabled = true;
        assert_eq!(config.enables_byte(), 0b11);

        config.set_enables_byte(0b01);
        assert!(!config.charge_enabled);
        assert!(config.discharge_enabled);
    }

    #[test]
    fn setters_persist_and_load_restores() {
        let mut store = MemoryStore::new();
        let mut control = OutputControl::new(OutputConfig::default());

        control.set_target_mode(TargetMode::Soc, &mut store).unwrap();
        control.set_target_soc(80, &mut store).unwrap();
        control.set_target_mv(3310, &mut store).unwrap();
        control.set_rebound_mv(-3, &mut store).unwrap();
        control.set_charge_enabled(true, &mut store).unwrap();

        let loaded = OutputControl::load(&mut store).unwrap();
        assert_eq!(loaded.config(), control.config());
        assert_eq!(loaded.state(), OutputState::Neutral);
        assert_eq!(store.read_u8(Key::OutputEnables), Ok(0b10));
    }
}
