//! Module for the control loop
//!
//! The control task is the only owner of the [`BatteryManager`]. Other tasks
//! talk to it through the statics below: the CAN receiver queues
//! configuration writes, the CAN transmitter drains telemetry frames, and the
//! LED task reads the latest status.

use bms_core::manager::BatteryManager;
use bms_core::telemetry::{ConfigWrite, TelemetryFrame};
use defmt::*;
use embassy_futures::select::{Either, select};
use embassy_sync::{blocking_mutex::raw::ThreadModeRawMutex, channel::Channel, mutex::Mutex};
use embassy_time::{Duration, Ticker, Timer};

use crate::board::{Board, EmbassyClock, Eeprom, GpioActuators};
use crate::pulse_mod::PULSE_LATCH;

/// Main loop period.
pub const CONTROL_PERIOD_MS: u64 = 10;

/// Config writes decoded by the CAN receiver.
pub static CONFIG_WRITES: Channel<ThreadModeRawMutex, ConfigWrite, 8> = Channel::new();

/// Outbound telemetry, drained by the CAN transmitter.
pub static TELEMETRY: Channel<ThreadModeRawMutex, TelemetryFrame, 32> = Channel::new();

/// Snapshot for the status LEDs.
#[derive(Clone, Copy, Debug, Format)]
pub struct BatteryStatus {
    pub state_char: char,
    pub soc_0_to_255: u8,
}

pub static STATUS: Mutex<ThreadModeRawMutex, BatteryStatus> = Mutex::new(BatteryStatus {
    state_char: 'N',
    soc_0_to_255: 0,
});

type Manager<'a> = BatteryManager<EmbassyClock, &'a mut Eeprom, &'a mut GpioActuators>;

#[embassy_executor::task]
pub async fn control_task(board: Board) {
    let Board {
        mut store,
        mut actuators,
        mut sensors,
    } = board;

    // Without the persisted state there is no safe target, so keep retrying.
    let mut manager: Manager<'_> = loop {
        match BatteryManager::load(EmbassyClock, &mut store, &mut actuators) {
            Ok(manager) => break manager,
            Err(err) => {
                error!("Failed to load persisted state: {}", err);
                Timer::after_secs(1).await;
            }
        }
    };
    info!("Battery manager loaded");

    let mut ticker = Ticker::every(Duration::from_millis(CONTROL_PERIOD_MS));
    loop {
        match select(ticker.next(), CONFIG_WRITES.receive()).await {
            Either::First(()) => {
                let readings = sensors.read();
                manager.poll(PULSE_LATCH.take(), readings);
                publish_telemetry(&mut manager);

                *STATUS.lock().await = BatteryStatus {
                    state_char: manager.output().state_char(),
                    soc_0_to_255: manager.counter().soc_0_to_255(),
                };
            }
            Either::Second(write) => {
                info!("Config write: {}", write);
                if let Err(err) = manager.apply_write(write) {
                    warn!("Failed to save config write: {}", err);
                }
            }
        }
    }
}

fn publish_telemetry(manager: &mut Manager<'_>) {
    let mut queue_full = false;
    let result = manager.publish_changes(|frame| {
        let queued = TELEMETRY.try_send(frame).is_ok();
        queue_full |= !queued;
        queued
    });
    match result {
        Err(err) => error!("Failed to encode telemetry: {}", err),
        // Unsent signals stay due and go out on a later tick.
        Ok(_) if queue_full => warn!("Telemetry queue full, deferring frames"),
        Ok(_) => {}
    }
}
