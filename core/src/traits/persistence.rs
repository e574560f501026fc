//! Scalar store that survives power loss.
//!
//! The layout mirrors a small byte-addressed EEPROM. Each [`Key`] is a fixed
//! byte offset, and typed values are stored little endian. Writes wear the
//! device, so callers rate-limit them (see [`crate::count::ChargeCounter::persist_if_changed`]).

use crate::error::StoreError;

/// Fixed offsets of persisted values.
///
/// Gaps between offsets are spare bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Key {
    /// u8, 0-255 quantized state of charge
    CountSoc = 0,
    /// u16, minutes
    VoltageSettleTimeMins = 1,
    /// char, see [`crate::output::TargetMode`]
    OutputTargetMode = 3,
    /// u8, bit 1 charge enabled, bit 0 discharge enabled
    OutputEnables = 4,
    /// i16, per cell
    OutputTargetMv = 5,
    /// i8, per cell
    OutputReboundMv = 9,
    /// u8, owned by the display service
    DisplayOnTime = 11,
    /// u8, percent
    OutputTargetSoc = 12,
    /// u16, owned by the millisecond ticker
    MsTickCount = 14,
    /// i16
    CurrentOffsetMa = 25,
}

impl Key {
    pub const fn offset(self) -> u16 {
        self as u16
    }
}

/// Byte-addressed non-volatile store.
///
/// Implementors provide raw byte access. The typed accessors are built on top.
pub trait Persistence {
    fn read_bytes(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), StoreError>;
    fn write_bytes(&mut self, offset: u16, data: &[u8]) -> Result<(), StoreError>;

    fn read_u8(&mut self, key: Key) -> Result<u8, StoreError> {
        let mut buf = [0u8; 1];
        self.read_bytes(key.offset(), &mut buf)?;
        Ok(buf[0])
    }

    fn write_u8(&mut self, key: Key, value: u8) -> Result<(), StoreError> {
        self.write_bytes(key.offset(), &[value])
    }

    fn read_i8(&mut self, key: Key) -> Result<i8, StoreError> {
        Ok(self.read_u8(key)? as i8)
    }

    fn write_i8(&mut self, key: Key, value: i8) -> Result<(), StoreError> {
        self.write_u8(key, value as u8)
    }

    fn read_u16(&mut self, key: Key) -> Result<u16, StoreError> {
        let mut buf = [0u8; 2];
        self.read_bytes(key.offset(), &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn write_u16(&mut self, key: Key, value: u16) -> Result<(), StoreError> {
        self.write_bytes(key.offset(), &value.to_le_bytes())
    }

    fn read_i16(&mut self, key: Key) -> Result<i16, StoreError> {
        Ok(self.read_u16(key)? as i16)
    }

    fn write_i16(&mut self, key: Key, value: i16) -> Result<(), StoreError> {
        self.write_u16(key, value as u16)
    }

    /// Single character, stored as one byte.
    fn read_char(&mut self, key: Key) -> Result<u8, StoreError> {
        self.read_u8(key)
    }

    fn write_char(&mut self, key: Key, value: u8) -> Result<(), StoreError> {
        self.write_u8(key, value)
    }
}

impl<T: Persistence> Persistence for &mut T {
    fn read_bytes(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), StoreError> {
        (**self).read_bytes(offset, buf)
    }

    fn write_bytes(&mut self, offset: u16, data: &[u8]) -> Result<(), StoreError> {
        (**self).write_bytes(offset, data)
    }
}

pub const MEMORY_STORE_SIZE: usize = 32;

/// RAM-backed store for host tests.
///
/// Counts writes so tests can check the wear-limiting policies.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: [u8; MEMORY_STORE_SIZE],
    writes: u32,
    fail_writes: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            bytes: [0; MEMORY_STORE_SIZE],
            writes: 0,
            fail_writes: false,
        }
    }
}

impl MemoryStore {
    /// Zero-filled store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store in the erased state of a fresh EEPROM (all 0xFF).
    pub fn erased() -> Self {
        Self {
            bytes: [0xFF; MEMORY_STORE_SIZE],
            ..Self::default()
        }
    }

    /// Number of successful `write_bytes` calls so far.
    pub fn write_count(&self) -> u32 {
        self.writes
    }

    /// Make every following write fail with [`StoreError::Device`].
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Persistence for MemoryStore {
    fn read_bytes(&mut self, offset: u16, buf: &mut [u8]) -> Result<(), StoreError> {
        let start = offset as usize;
        let src = self
            .bytes
            .get(start..start + buf.len())
            .ok_or(StoreError::OutOfRange)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_bytes(&mut self, offset: u16, data: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Device);
        }
        let start = offset as usize;
        let dst = self
            .bytes
            .get_mut(start..start + data.len())
            .ok_or(StoreError::OutOfRange)?;
        dst.copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}
