#![no_std]
#![no_main]
use bms_firmware::board::{Board, GpioActuators, I2cBus, Sensors, Thermometer};
use bms_firmware::can_mod::{can_rx_task, can_tx_task};
use bms_firmware::control_mod::control_task;
use bms_firmware::eeprom_mod::At24Eeprom;
use bms_firmware::led_mod::led_task;
use bms_firmware::pulse_mod::pulse_task;
use core::cell::RefCell;
use defmt::*;
use embassy_executor::Spawner;
use embassy_stm32::adc::{Adc, SampleTime};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Input, Level, Output, OutputType, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::peripherals::*;
use embassy_stm32::time::{Hertz, khz};
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::{Config, bind_interrupts, can};
use embassy_time::Delay;
use embedded_hal_bus::i2c::RefCellDevice;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    FDCAN2_IT0 => can::IT0InterruptHandler<FDCAN2>;
    FDCAN2_IT1 => can::IT1InterruptHandler<FDCAN2>;
});

static I2C_BUS: StaticCell<I2cBus> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    /////////////////////////////////////////////////
    // Initialize Peripherals
    /////////////////////////////////////////////////

    ////////////////////////////////
    // Initialize Clock
    ////////////////////////////////
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });
        config.rcc.pll = Some(Pll {
            source: PllSource::HSE,
            prediv: PllPreDiv::DIV1,
            mul: PllMul::MUL40,
            divp: Some(PllPDiv::DIV2), // 160 MHz PLLP
            divq: Some(PllQDiv::DIV4), // 80 MHz PLLQ
            divr: Some(PllRDiv::DIV2), // Main system clock at 160 MHz
        });
        config.rcc.mux.fdcansel = mux::Fdcansel::PLL1_Q;
        config.rcc.mux.adc12sel = mux::Adcsel::SYS;
        config.rcc.sys = Sysclk::PLL1_R;
    }
    let peripherals = embassy_stm32::init(config);

    ////////////////////////////////
    // Release the outputs first
    ////////////////////////////////
    let charge = Output::new(peripherals.PB10, Level::Low, Speed::Low);
    let discharge = Output::new(peripherals.PB11, Level::Low, Speed::Low);
    let actuators = GpioActuators::new(charge, discharge);

    ////////////////////////////////
    // Initialize CAN
    ////////////////////////////////
    let can_rx = peripherals.PB5;
    let can_tx = peripherals.PB6;
    let mut can = can::CanConfigurator::new(peripherals.FDCAN2, can_rx, can_tx, Irqs);

    can.properties().set_standard_filter(
        can::filter::StandardFilterSlot::_0,
        can::filter::StandardFilter::accept_all_into_fifo0(),
    );
    // Nominal Baud Rate: 1MHz
    can.set_bitrate(1_000_000);
    let can = can.start(can::OperatingMode::NormalOperationMode);
    let (can_tx, can_rx, _) = can.split();
    info!("Configured CAN");

    ////////////////////////////////
    // Initialize I2C (EEPROM and thermometer)
    ////////////////////////////////
    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz(100_000);
    let i2c = I2c::new_blocking(peripherals.I2C1, peripherals.PA15, peripherals.PB7, i2c_config);
    let i2c_bus: &'static I2cBus = I2C_BUS.init(RefCell::new(i2c));

    let store = At24Eeprom::new(RefCellDevice::new(i2c_bus), Delay);
    let thermometer = Thermometer::new(RefCellDevice::new(i2c_bus));
    info!("Configured I2C");

    ////////////////////////////////
    // Initialize Sensors
    ////////////////////////////////
    let mut adc = Adc::new(peripherals.ADC1);
    adc.set_sample_time(SampleTime::CYCLES247_5);
    let polarity = Input::new(peripherals.PB1, Pull::None);
    let sensors = Sensors::new(adc, peripherals.PA1, polarity, thermometer);

    let pulse = ExtiInput::new(peripherals.PB0, peripherals.EXTI0, Pull::None);

    ////////////////////////////////
    // Initialize LED Lights
    ////////////////////////////////
    let led_pwm = SimplePwm::new(
        peripherals.TIM2,
        Some(PwmPin::new(peripherals.PA0, OutputType::PushPull)),
        None,
        None,
        None,
        khz(800),
        CountingMode::EdgeAlignedUp,
    );

    ////////////////////////////////
    // Spawn Threads
    ////////////////////////////////
    let board = Board {
        store,
        actuators,
        sensors,
    };
    spawner.spawn(unwrap!(pulse_task(pulse)));
    spawner.spawn(unwrap!(control_task(board)));
    spawner.spawn(unwrap!(can_rx_task(can_rx)));
    spawner.spawn(unwrap!(can_tx_task(can_tx)));
    spawner.spawn(unwrap!(led_task(led_pwm, peripherals.DMA2_CH1)));
}
