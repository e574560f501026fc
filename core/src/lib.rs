#![no_std]
//! # bms-core
//! Charge accounting and output control for a 280Ah LiFePO4 pack.
//!
//! Everything in this crate is platform-agnostic and runs on host for testing.
//! Hardware services (millisecond clock, EEPROM, actuator pins) are injected
//! through the traits in [`traits`].
//!
//! The control loop is made of four parts:
//! - [`pulse`]: converts current sensor edges into charge quanta and an instantaneous current
//! - [`count`]: the Coulomb counter and its unit views
//! - [`output`]: the Neutral/Charge/Discharge state machine and its interlocks
//! - [`rest`]: rest detection, current offset and open-circuit voltage calibration
//!
//! [`manager::BatteryManager`] wires them together in main-loop order.

#[cfg(test)]
extern crate std;

pub mod logging;

pub mod calibration;
pub mod config;
pub mod count;
pub mod error;
pub mod manager;
pub mod output;
pub mod pulse;
pub mod rest;
pub mod telemetry;
pub mod traits;
