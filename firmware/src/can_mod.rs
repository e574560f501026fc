//! Module for CAN communication
//!
//! Handles the reception and transmission of CAN messages
//!
//! The peripheral is split in two halves so reception never waits on a full
//! transmit queue. Data crosses to the control task through the channels in
//! [`crate::control_mod`]; see this
//! [article](https://blog.theembeddedrustacean.com/sharing-data-among-tasks-in-rust-embassy-synchronization-primitives#heading-the-list-of-primitives)
//! on shared data in Embassy.

use bms_core::error::TelemetryError;
use bms_core::telemetry::decode_write;
use defmt::*;
use embassy_stm32::can::frame::Frame;
use embassy_stm32::can::{CanRx, CanTx};

use crate::control_mod::{CONFIG_WRITES, TELEMETRY};

/// Sends every telemetry frame the control task queues.
#[embassy_executor::task]
pub async fn can_tx_task(mut tx: CanTx<'static>) {
    loop {
        let frame = TELEMETRY.receive().await;
        match Frame::new_standard(frame.id.as_raw(), frame.data()) {
            Ok(can_frame) => {
                let _ = tx.write(&can_frame).await;
            }
            Err(_) => error!("Frame for ID {} could not be built", frame.id.as_raw()),
        }
    }
}

/// Decodes configuration writes addressed to the battery.
#[embassy_executor::task]
pub async fn can_rx_task(mut rx: CanRx<'static>) {
    loop {
        match rx.read().await {
            Ok(envelope) => handle_frame(&envelope.frame).await,
            Err(err) => error!("Error in frame: {}", err),
        }
    }
}

/// Queues the write carried by `frame`, ignoring traffic for other nodes.
pub async fn handle_frame(frame: &Frame) {
    let data = &frame.data()[..frame.header().len() as usize];

    match decode_write(*frame.header().id(), data) {
        Ok(write) => CONFIG_WRITES.send(write).await,
        Err(TelemetryError::UnknownId(_)) => {}
        Err(err) => warn!("Bad config write: {}", err),
    }
}
