//! Module for the current sensor pulse input
//!
//! The voltage-to-frequency converter across the shunt emits one falling edge
//! per charge quantum. Edges are caught with an external interrupt and only
//! timestamped here; the control task drains them from [`PULSE_LATCH`].
//!
//! Note that the `exti` module of `embassy-stm32` "0.4.0" still has the
//! "0.3.0" API, so no interrupt binding is needed.

use bms_core::pulse::PulseLatch;
use embassy_stm32::exti::ExtiInput;
use embassy_time::Instant;

/// Edge flag shared with the control task.
pub static PULSE_LATCH: PulseLatch = PulseLatch::new();

/// Milliseconds since boot as the wrapping counter the core works with.
pub fn now_ms() -> u32 {
    Instant::now().as_millis() as u32
}

#[embassy_executor::task]
pub async fn pulse_task(mut sensor: ExtiInput<'static>) {
    loop {
        sensor.wait_for_falling_edge().await;
        PULSE_LATCH.record(now_ms());
    }
}
