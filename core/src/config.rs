//! Pack and board constants
//!
//! Everything here is specific to one 4S 280Ah LiFePO4 pack and its shunt.

/// Nominal pack capacity.
pub const BATTERY_CAPACITY_AH: u32 = 280;

/// 280Ah is 280 * 1000 * 3600 = 0x3C14_DC00 mAs. A u32 could hold up to 1193Ah.
pub const CAPACITY_MILLI_AMP_SECONDS: u32 = BATTERY_CAPACITY_AH * 3_600_000;

pub const CELLS_IN_SERIES: i32 = 4;

// Current sensor: voltage-to-frequency converter across a 150A / 75mV shunt.
//  HertzPerVolt       = 32.55
//  AmpSecondsPerPulse = ShuntAmps / (HertzPerVolt * ShuntVolts)
//                     = 150 / (32.55 * 0.075) = 61.444
// Pulse interval at 150A is 409ms, at 100mA it is 614s.
pub const MA_SECONDS_PER_PULSE: u32 = 61_444;

/// Below this the interval is sensor noise rather than a real current.
pub const MIN_PULSE_INTERVAL_MS: u32 = 20;

/// Reported when the pulse interval is too short to divide by.
pub const SENTINEL_CURRENT_MA: u32 = 999_999;

// Interlocks
pub const MIN_CHARGE_TEMPERATURE_8BFDP: i16 = 5 << 8;
pub const MAX_CHARGE_MV: i16 = 3500 * CELLS_IN_SERIES as i16; // 100%
pub const MIN_DISCHARGE_MV: i16 = 2500 * CELLS_IN_SERIES as i16; // 0%

/// SOC hysteresis either side of the target, in 1/10000ths of one percent of capacity.
/// 4999 = 0.4999% of capacity.
pub const SOC_DEADBAND_PER_10000: u32 = 4999;

/// Any discharge stronger than this breaks rest. Charging never does.
pub const REST_DISCHARGE_THRESHOLD_MA: i32 = -100;

// Cadences
pub const CURRENT_OFFSET_TICK_MS: u32 = 1000;
pub const ZERO_CURRENT_REST_MS: u32 = 60 * 60 * 1000;
pub const ZERO_CURRENT_REPEAT_MS: u32 = 60 * 60 * 1000;
pub const VOLTAGE_CALIBRATION_REPEAT_MS: u32 = 1000;

/// Largest correction the voltage calibration makes in one step.
pub const MAX_CALIBRATION_STEP_MAS: u32 = 1000;

/// Base of the battery's 11 bit CAN id range.
pub const BATTERY_CAN_BASE: u16 = 0x100;
