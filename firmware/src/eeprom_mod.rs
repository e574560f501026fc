//! Module for the configuration EEPROM
//!
//! A 24-series 2 Kbit I2C EEPROM (24AA02 or similar) holds the persisted
//! controller state. One address byte, 8 byte write pages, and a write
//! cycle of up to 5 ms during which the device does not acknowledge.

use bms_core::error::StoreError;
use bms_core::traits::Persistence;
use defmt::warn;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

/// 7-bit bus address with A0-A2 tied low.
pub const EEPROM_ADDRESS: u8 = 0x50;
/// Size of the device in bytes.
pub const EEPROM_SIZE: usize = 256;
const PAGE_SIZE: usize = 8;
const WRITE_CYCLE_MS: u32 = 5;

pub struct At24Eeprom<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C: I2c, D: DelayNs> At24Eeprom<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }

    fn check_range(offset: u16, len: usize) -> Result<(), StoreError> {
        if offset as usize + len > EEPROM_SIZE {
            return Err(StoreError::OutOfRange);
        }
        Ok(())
    }
}

impl<I2C: I2c, D: DelayNs> Persistence for At24Eeprom<I2C, D> {
    fn read_bytes(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), StoreError> {
        Self::check_range(offset, buf.len())?;
        self.i2c
            .write_read(EEPROM_ADDRESS, &[offset as u8], buf)
            .map_err(|_| {
                warn!("EEPROM read at {} failed", offset);
                StoreError::Device
            })
    }

    /// Splits the write on page boundaries, since a page write wraps around
    /// inside its page instead of carrying on into the next one.
    fn write_bytes(&mut self, offset: u16, data: &[u8]) -> Result<(), StoreError> {
        Self::check_range(offset, data.len())?;

        let mut address = offset as usize;
        let mut rest = data;
        while !rest.is_empty() {
            let room = PAGE_SIZE - address % PAGE_SIZE;
            let (chunk, tail) = rest.split_at(room.min(rest.len()));

            let mut frame = [0u8; PAGE_SIZE + 1];
            frame[0] = address as u8;
            frame[1..=chunk.len()].copy_from_slice(chunk);
            self.i2c.write(EEPROM_ADDRESS, &frame[..=chunk.len()]).map_err(|_| {
                warn!("EEPROM write at {} failed", address);
                StoreError::Device
            })?;
            self.delay.delay_ms(WRITE_CYCLE_MS);

            address += chunk.len();
            rest = tail;
        }
        Ok(())
    }
}
