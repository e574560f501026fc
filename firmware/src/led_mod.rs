//! Module for the LED lights
//!
//! Responsible for the WS2812B status LEDs. The first LED shows the output
//! state, the other four form a state of charge bar.
//!
//! WS2812B Datasheet: [https://cdn-shop.adafruit.com/datasheets/WS2812B.pdf](https://cdn-shop.adafruit.com/datasheets/WS2812B.pdf)

use embassy_stm32::Peri;
use embassy_stm32::peripherals::{DMA2_CH1, TIM2};
use embassy_stm32::timer::simple_pwm::SimplePwm;
use embassy_time::Timer;
use rgb_led_pwm_dma_maker::{LedDataComposition, LedDmaBuffer, RGB, calc_dma_buffer_length};

use crate::control_mod::{BatteryStatus, STATUS};

/// There are 5 LED's on the board
const LED_COUNT: usize = 5;
const BAR_LEDS: usize = LED_COUNT - 1;
/// Full brightness hurts at arm's length.
const BRIGHTNESS: u8 = 24;

fn state_color(state_char: char) -> RGB {
    match state_char {
        'C' => RGB::new(0, BRIGHTNESS, 0),
        'D' => RGB::new(BRIGHTNESS, BRIGHTNESS / 3, 0),
        // Blocked by an interlock
        'c' | 'd' => RGB::new(BRIGHTNESS, 0, 0),
        _ => RGB::new(0, 0, BRIGHTNESS),
    }
}

/// Fills the bar from the bottom, the top lit LED dimmed by its partial share.
fn soc_bar(soc_0_to_255: u8, bar: &mut [RGB]) {
    let lit = soc_0_to_255 as usize * bar.len();
    for (i, led) in bar.iter_mut().enumerate() {
        let level = lit.saturating_sub(i * 255).min(255);
        let g = (level * BRIGHTNESS as usize / 255) as u8;
        *led = RGB::new(0, g, g / 2);
    }
}

fn compose(status: &BatteryStatus) -> [RGB; LED_COUNT] {
    let mut leds: [RGB; LED_COUNT] = core::array::from_fn(|_| RGB::new(0, 0, 0));
    leds[0] = state_color(status.state_char);
    soc_bar(status.soc_0_to_255, &mut leds[1..=BAR_LEDS]);
    leds
}

/// Updates the status LED lights
#[embassy_executor::task]
pub async fn led_task(mut led_in: SimplePwm<'static, TIM2>, mut led_dma: Peri<'static, DMA2_CH1>) {
    // RESET_LENGTH = reset_period / data_transfer_time = 50us / 1.25us = 40
    const RESET_LENGTH: usize = 40;
    // Calculate the dma buffer's length at compile time
    const DMA_BUFFER_LEN: usize = calc_dma_buffer_length(8 * 3, LED_COUNT, RESET_LENGTH);
    // t1h = T1H / data_transfer_time * max_duty_cycle = 0.8us / 1.25us = 64%
    let max_duty = led_in.max_duty_cycle() as u32;
    let t1h = (max_duty * 64 / 100) as u16;
    // t0h = T0H / data_transfer_time * max_duty_cycle = 0.4us / 1.25us = 32%
    let t0h = (max_duty * 32 / 100) as u16;

    let mut dma_buffer = LedDmaBuffer::<DMA_BUFFER_LEN>::new(t1h, t0h, LedDataComposition::GRB);

    loop {
        let status = *STATUS.lock().await;
        let _ = dma_buffer.set_dma_buffer(&compose(&status), None);
        led_in
            .waveform::<embassy_stm32::timer::Ch1>(led_dma.reborrow(), dma_buffer.get_dma_buffer())
            .await;
        Timer::after_millis(200).await;
    }
}
