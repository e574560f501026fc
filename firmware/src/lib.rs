#![no_std]
//! # bms-firmware
//! Board firmware for the LiFePO4 battery manager. The control logic lives in
//! `bms-core`; the modules here bind it to the STM32G491 peripherals.

pub mod board;
pub mod can_mod;
pub mod control_mod;
pub mod eeprom_mod;
pub mod led_mod;
pub mod pulse_mod;
