//! CAN telemetry codec
//!
//! Every quantity of interest is published under its own 11 bit id at
//! [`BATTERY_CAN_BASE`] + offset, and only when it differs from what was last
//! transmitted. Writable configuration arrives on the same ids.
//!
//! Payloads are bincode encoded, big endian with fixed size integers, so a
//! `u32` is always 4 bytes on the wire.

use bincode::Decode;
use bincode::config::{BigEndian, Configuration, Fixint};
use embedded_can::{Id, StandardId};

use crate::config::BATTERY_CAN_BASE;
use crate::error::TelemetryError;
use crate::output::TargetMode;

/// Classic CAN payload limit.
pub const MAX_PAYLOAD: usize = 8;

/// Minimum spacing between two transmissions of the same signal.
///
/// The current estimate changes every millisecond while a pulse train
/// decays; this keeps it from flooding the bus.
pub const MIN_REPEAT_MS: u32 = 100;

fn codec_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Signal ids, as offsets from [`BATTERY_CAN_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Signal {
    /// u32, writable
    CountedAmpSeconds = 0x00,
    /// i32
    CurrentMa = 0x01,
    /// u8, writable
    TargetSoc = 0x02,
    /// u8 ASCII state character
    OutputState = 0x03,
    /// u8, writable
    ChargeEnabled = 0x04,
    /// u8, writable
    DischargeEnabled = 0x05,
    /// i16
    Temperature8bfdp = 0x06,
    /// i16
    BatteryMv = 0x07,
    /// i16, writable
    CurrentOffsetMa = 0x08,
    /// u8, writable
    TargetMode = 0x09,
    /// i16, writable
    TargetMv = 0x0A,
    /// u32, whole seconds expressed in ms
    MsAtRest = 0x0B,
    /// u16, writable
    VoltageSettleMins = 0x0C,
    /// i8, writable
    ReboundMv = 0x0D,
}

pub const SIGNAL_COUNT: usize = 14;

const fn standard_id(raw: u16) -> StandardId {
    match StandardId::new(raw) {
        Some(id) => id,
        None => panic!("signal id above 0x7FF"),
    }
}

/// Indexed by signal offset, checked at compile time.
const SIGNAL_IDS: [StandardId; SIGNAL_COUNT] = {
    let mut ids = [StandardId::ZERO; SIGNAL_COUNT];
    let mut i = 0;
    while i < SIGNAL_COUNT {
        ids[i] = standard_id(BATTERY_CAN_BASE + i as u16);
        i += 1;
    }
    ids
};

impl Signal {
    pub const ALL: [Signal; SIGNAL_COUNT] = [
        Signal::CountedAmpSeconds,
        Signal::CurrentMa,
        Signal::TargetSoc,
        Signal::OutputState,
        Signal::ChargeEnabled,
        Signal::DischargeEnabled,
        Signal::Temperature8bfdp,
        Signal::BatteryMv,
        Signal::CurrentOffsetMa,
        Signal::TargetMode,
        Signal::TargetMv,
        Signal::MsAtRest,
        Signal::VoltageSettleMins,
        Signal::ReboundMv,
    ];

    pub const fn raw_id(self) -> u16 {
        BATTERY_CAN_BASE + self as u16
    }

    pub const fn id(self) -> StandardId {
        SIGNAL_IDS[self as usize]
    }

    pub fn from_raw_id(raw: u32) -> Option<Signal> {
        Signal::ALL.into_iter().find(|signal| signal.raw_id() as u32 == raw)
    }
}

/// A signal value in its wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
}

impl TelemetryValue {
    fn encode_into(&self, buf: &mut [u8]) -> Result<usize, TelemetryError> {
        let config = codec_config();
        let len = match *self {
            TelemetryValue::U8(v) => bincode::encode_into_slice(v, buf, config)?,
            TelemetryValue::I8(v) => bincode::encode_into_slice(v, buf, config)?,
            TelemetryValue::U16(v) => bincode::encode_into_slice(v, buf, config)?,
            TelemetryValue::I16(v) => bincode::encode_into_slice(v, buf, config)?,
            TelemetryValue::U32(v) => bincode::encode_into_slice(v, buf, config)?,
            TelemetryValue::I32(v) => bincode::encode_into_slice(v, buf, config)?,
        };
        Ok(len)
    }
}

/// One outbound frame, ready to hand to the CAN peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryFrame {
    pub id: StandardId,
    len: u8,
    bytes: [u8; MAX_PAYLOAD],
}

impl TelemetryFrame {
    pub fn new(signal: Signal, value: TelemetryValue) -> Result<Self, TelemetryError> {
        let mut bytes = [0u8; MAX_PAYLOAD];
        let len = value.encode_into(&mut bytes)?;
        Ok(Self {
            id: signal.id(),
            len: len as u8,
            bytes,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Everything the bus sees, sampled once per publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub amp_seconds: u32,
    pub current_ma: i32,
    pub target_soc: u8,
    pub state_char: char,
    pub charge_enabled: bool,
    pub discharge_enabled: bool,
    pub temperature_8bfdp: i16,
    pub battery_mv: i16,
    pub current_offset_ma: i16,
    pub target_mode: TargetMode,
    pub target_mv: i16,
    pub ms_at_rest: u32,
    pub voltage_settle_time_mins: u16,
    pub rebound_mv: i8,
}

impl TelemetrySnapshot {
    pub fn value(&self, signal: Signal) -> TelemetryValue {
        match signal {
            Signal::CountedAmpSeconds => TelemetryValue::U32(self.amp_seconds),
            Signal::CurrentMa => TelemetryValue::I32(self.current_ma),
            Signal::TargetSoc => TelemetryValue::U8(self.target_soc),
            Signal::OutputState => TelemetryValue::U8(self.state_char as u8),
            Signal::ChargeEnabled => TelemetryValue::U8(self.charge_enabled as u8),
            Signal::DischargeEnabled => TelemetryValue::U8(self.discharge_enabled as u8),
            Signal::Temperature8bfdp => TelemetryValue::I16(self.temperature_8bfdp),
            Signal::BatteryMv => TelemetryValue::I16(self.battery_mv),
            Signal::CurrentOffsetMa => TelemetryValue::I16(self.current_offset_ma),
            Signal::TargetMode => TelemetryValue::U8(self.target_mode.code()),
            Signal::TargetMv => TelemetryValue::I16(self.target_mv),
            // Whole seconds, otherwise it would change on every loop.
            Signal::MsAtRest => TelemetryValue::U32(self.ms_at_rest / 1000 * 1000),
            Signal::VoltageSettleMins => TelemetryValue::U16(self.voltage_settle_time_mins),
            Signal::ReboundMv => TelemetryValue::I8(self.rebound_mv),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sent {
    value: TelemetryValue,
    at_ms: u32,
}

/// Publish-on-change state for every signal.
#[derive(Debug, Clone, Default)]
pub struct TelemetryPublisher {
    last_sent: [Option<Sent>; SIGNAL_COUNT],
}

impl TelemetryPublisher {
    pub const fn new() -> Self {
        Self {
            last_sent: [None; SIGNAL_COUNT],
        }
    }

    /// Hands `sink` a frame for every signal whose value differs from its
    /// last transmission, skipping signals sent within [`MIN_REPEAT_MS`].
    ///
    /// `sink` returns whether it accepted the frame. Only accepted frames
    /// count as transmitted; on the first refusal publishing stops and the
    /// remaining signals stay due for the next call. The first call
    /// publishes everything. Returns the number of frames accepted.
    pub fn publish<F>(&mut self, now_ms: u32, snapshot: &TelemetrySnapshot, mut sink: F) -> Result<usize, TelemetryError>
    where
        F: FnMut(TelemetryFrame) -> bool,
    {
        let mut accepted = 0;
        for (signal, last) in Signal::ALL.into_iter().zip(self.last_sent.iter_mut()) {
            let value = snapshot.value(signal);
            let due = match last {
                None => true,
                Some(sent) => sent.value != value && now_ms.wrapping_sub(sent.at_ms) >= MIN_REPEAT_MS,
            };
            if !due {
                continue;
            }
            if !sink(TelemetryFrame::new(signal, value)?) {
                break;
            }
            *last = Some(Sent { value, at_ms: now_ms });
            accepted += 1;
        }
        Ok(accepted)
    }
}

/// An inbound configuration write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigWrite {
    CountedAmpSeconds(u32),
    TargetSoc(u8),
    ChargeEnabled(bool),
    DischargeEnabled(bool),
    CurrentOffsetMa(i16),
    TargetMode(TargetMode),
    TargetMv(i16),
    VoltageSettleMins(u16),
    ReboundMv(i8),
}

fn decode<T: Decode<()>>(data: &[u8]) -> Result<T, TelemetryError> {
    Ok(bincode::decode_from_slice(data, codec_config())?.0)
}

/// Decodes a received frame into a configuration write.
///
/// Returns an error for ids that are read-only or not ours, and for
/// payloads too short for the signal's type.
pub fn decode_write(id: Id, data: &[u8]) -> Result<ConfigWrite, TelemetryError> {
    // Battery signals are 11 bit only; an extended id never aliases one.
    let raw = match id {
        Id::Standard(id) => u32::from(id.as_raw()),
        Id::Extended(id) => return Err(TelemetryError::UnknownId(id.as_raw())),
    };

    let write = match Signal::from_raw_id(raw) {
        Some(Signal::CountedAmpSeconds) => ConfigWrite::CountedAmpSeconds(decode(data)?),
        Some(Signal::TargetSoc) => ConfigWrite::TargetSoc(decode(data)?),
        Some(Signal::ChargeEnabled) => ConfigWrite::ChargeEnabled(decode::<u8>(data)? != 0),
        Some(Signal::DischargeEnabled) => ConfigWrite::DischargeEnabled(decode::<u8>(data)? != 0),
        Some(Signal::CurrentOffsetMa) => ConfigWrite::CurrentOffsetMa(decode(data)?),
        Some(Signal::TargetMode) => ConfigWrite::TargetMode(TargetMode::from_code(decode(data)?)),
        Some(Signal::TargetMv) => ConfigWrite::TargetMv(decode(data)?),
        Some(Signal::VoltageSettleMins) => ConfigWrite::VoltageSettleMins(decode(data)?),
        Some(Signal::ReboundMv) => ConfigWrite::ReboundMv(decode(data)?),
        _ => return Err(TelemetryError::UnknownId(raw)),
    };
    Ok(write)
}
