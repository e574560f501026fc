//! Board support
//!
//! Implements the core's hardware traits over the STM32G491 peripherals and
//! collects the per-loop sensor readings.

use core::cell::RefCell;

use bms_core::manager::SensorReadings;
use bms_core::pulse::Polarity;
use bms_core::traits::{Actuators, Clock};
use defmt::warn;
use embassy_stm32::Peri;
use embassy_stm32::adc::Adc;
use embassy_stm32::gpio::{Input, Level, Output};
use embassy_stm32::i2c::{I2c, Master};
use embassy_stm32::mode::Blocking;
use embassy_stm32::peripherals::{ADC1, PA1};
use embassy_time::Delay;
use embedded_hal::i2c::I2c as _;
use embedded_hal_bus::i2c::RefCellDevice;

use crate::eeprom_mod::At24Eeprom;
use crate::pulse_mod;

/// The EEPROM and the thermometer share I2C1.
pub type I2cBus = RefCell<I2c<'static, Blocking, Master>>;
pub type I2cDevice = RefCellDevice<'static, I2c<'static, Blocking, Master>>;

pub type Eeprom = At24Eeprom<I2cDevice, Delay>;

// Battery sense: 100k / 20k divider into a 12 bit ADC on a 3.3V reference.
//  mV = raw * 3300 * (100 + 20) / 20 / 4095
const ADC_REFERENCE_MV: i32 = 3300;
const ADC_FULL_SCALE: i32 = 4095;
const BATTERY_DIVIDER_NUM: i32 = 6;

/// TMP75 class sensor on the busbar, A0-A2 tied low.
const THERMOMETER_ADDRESS: u8 = 0x48;
const THERMOMETER_TEMP_REGISTER: u8 = 0x00;

/// [`Clock`] over the embassy time driver.
#[derive(Clone, Copy)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u32 {
        pulse_mod::now_ms()
    }
}

/// Charger and discharge outputs, both active high.
pub struct GpioActuators {
    charge: Output<'static>,
    discharge: Output<'static>,
}

impl GpioActuators {
    pub fn new(charge: Output<'static>, discharge: Output<'static>) -> Self {
        Self { charge, discharge }
    }
}

impl Actuators for GpioActuators {
    fn set_charge(&mut self, on: bool) {
        self.charge.set_level(Level::from(on));
    }

    fn set_discharge(&mut self, on: bool) {
        self.discharge.set_level(Level::from(on));
    }
}

/// Reads the temperature register, which is already degrees C in 8.8 fixed point.
pub struct Thermometer {
    i2c: I2cDevice,
}

impl Thermometer {
    pub fn new(i2c: I2cDevice) -> Self {
        Self { i2c }
    }

    pub fn read_8bfdp(&mut self) -> Option<i16> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(THERMOMETER_ADDRESS, &[THERMOMETER_TEMP_REGISTER], &mut buf)
            .ok()?;
        Some(i16::from_be_bytes(buf))
    }
}

pub struct Sensors {
    adc: Adc<'static, ADC1>,
    battery_pin: Peri<'static, PA1>,
    polarity: Input<'static>,
    thermometer: Thermometer,
    /// Last good temperature. Starts below the charge limit so charging
    /// stays blocked until the sensor has answered once.
    temperature_8bfdp: i16,
    thermometer_ok: bool,
}

impl Sensors {
    pub fn new(
        adc: Adc<'static, ADC1>,
        battery_pin: Peri<'static, PA1>,
        polarity: Input<'static>,
        thermometer: Thermometer,
    ) -> Self {
        Self {
            adc,
            battery_pin,
            polarity,
            thermometer,
            temperature_8bfdp: i16::MIN,
            thermometer_ok: true,
        }
    }

    pub fn read(&mut self) -> SensorReadings {
        let raw = self.adc.blocking_read(&mut self.battery_pin) as i32;
        let battery_mv = raw * ADC_REFERENCE_MV * BATTERY_DIVIDER_NUM / ADC_FULL_SCALE;

        match self.thermometer.read_8bfdp() {
            Some(t) => {
                self.temperature_8bfdp = t;
                self.thermometer_ok = true;
            }
            None if self.thermometer_ok => {
                warn!("Thermometer read failed, holding {}", self.temperature_8bfdp);
                self.thermometer_ok = false;
            }
            None => {}
        }

        SensorReadings {
            battery_mv: battery_mv.clamp(0, i16::MAX as i32) as i16,
            temperature_8bfdp: self.temperature_8bfdp,
            polarity: Polarity::from_level(self.polarity.is_high()),
        }
    }
}

/// Everything the control task takes ownership of.
pub struct Board {
    pub store: Eeprom,
    pub actuators: GpioActuators,
    pub sensors: Sensors,
}
