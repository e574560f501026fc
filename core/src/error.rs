//! Error types
//!
//! The control loop itself never fails: the counter saturates, short pulse
//! intervals report a sentinel current and untrusted voltages skip a
//! calibration step. Errors only come from the persistence and telemetry
//! boundaries.

use bincode::error::{DecodeError, EncodeError};

/// Errors from the persistence service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Offset plus length runs past the end of the store
    OutOfRange,
    /// Underlying bus or device failure
    Device,
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StoreError::OutOfRange => write!(f, "store access out of range"),
            StoreError::Device => write!(f, "store device error"),
        }
    }
}

/// Errors from the telemetry codec
#[derive(Debug)]
pub enum TelemetryError {
    /// Inbound frame id is not a writable signal
    UnknownId(u32),
    /// Payload could not be decoded into the signal's type
    Decode(DecodeError),
    /// Value did not fit into a frame
    Encode(EncodeError),
}

impl From<DecodeError> for TelemetryError {
    fn from(err: DecodeError) -> Self {
        TelemetryError::Decode(err)
    }
}

impl From<EncodeError> for TelemetryError {
    fn from(err: EncodeError) -> Self {
        TelemetryError::Encode(err)
    }
}

impl core::fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TelemetryError::UnknownId(id) => write!(f, "id {:#05x} is not a writable signal", id),
            TelemetryError::Decode(err) => write!(f, "decode failed: {}", err),
            TelemetryError::Encode(err) => write!(f, "encode failed: {}", err),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TelemetryError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            TelemetryError::UnknownId(id) => defmt::write!(f, "UnknownId({=u32:#x})", id),
            TelemetryError::Decode(_) => defmt::write!(f, "Decode"),
            TelemetryError::Encode(_) => defmt::write!(f, "Encode"),
        }
    }
}
