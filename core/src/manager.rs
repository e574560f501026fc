//! Main-loop orchestration
//!
//! [`BatteryManager`] owns every piece of controller state plus the injected
//! hardware services, and runs one pass of the loop per [`BatteryManager::poll`]:
//! pulse handling, counter upkeep, output control, then rest and calibration.

use crate::count::ChargeCounter;
use crate::error::{StoreError, TelemetryError};
use crate::output::{OutputControl, OutputInputs};
use crate::pulse::{Polarity, PulseMeter};
use crate::rest::{RestInputs, RestManager};
use crate::telemetry::{ConfigWrite, TelemetryFrame, TelemetryPublisher, TelemetrySnapshot};
use crate::traits::{Actuators, Clock, Persistence};

/// Analog and digital readings sampled once per loop by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorReadings {
    /// Whole battery
    pub battery_mv: i16,
    /// Degrees C in 8.8 fixed point
    pub temperature_8bfdp: i16,
    /// Current state of the sensor's polarity line
    pub polarity: Polarity,
}

pub struct BatteryManager<C, P, A> {
    clock: C,
    store: P,
    actuators: A,
    counter: ChargeCounter,
    pulse: PulseMeter,
    output: OutputControl,
    rest: RestManager,
    publisher: TelemetryPublisher,
    readings: SensorReadings,
}

impl<C: Clock, P: Persistence, A: Actuators> BatteryManager<C, P, A> {
    /// Restores all persisted state. Actuators are released until the first poll decides otherwise.
    pub fn load(clock: C, mut store: P, mut actuators: A) -> Result<Self, StoreError> {
        actuators.set_charge(false);
        actuators.set_discharge(false);

        let now = clock.now_ms();
        let counter = ChargeCounter::load(&mut store)?;
        let output = OutputControl::load(&mut store)?;
        let rest = RestManager::load(&mut store, now)?;

        Ok(Self {
            clock,
            store,
            actuators,
            counter,
            pulse: PulseMeter::new(),
            output,
            rest,
            publisher: TelemetryPublisher::new(),
            readings: SensorReadings::default(),
        })
    }

    /// One main-loop pass. `edge_ms` is the timestamp of a sensor edge taken
    /// from the latch since the previous pass, if any.
    pub fn poll(&mut self, edge_ms: Option<u32>, readings: SensorReadings) {
        self.readings = readings;

        self.pulse.sample_polarity(readings.polarity);
        if let Some(timestamp_ms) = edge_ms {
            self.pulse.on_edge(timestamp_ms, readings.polarity, &mut self.counter);
        }

        self.counter.poll(&self.clock, &mut self.store);

        let inputs = OutputInputs {
            milli_amp_seconds: self.counter.milli_amp_seconds(),
            capacity_milli_amp_seconds: self.counter.capacity_milli_amp_seconds(),
            battery_mv: readings.battery_mv,
            temperature_8bfdp: readings.temperature_8bfdp,
        };
        self.output.update(&inputs, &mut self.actuators);

        let rest_inputs = RestInputs {
            state: self.output.state(),
            current_ma: self.pulse.instantaneous_current_ma(self.clock.now_ms()),
            battery_mv: readings.battery_mv,
        };
        self.rest.poll(&self.clock, &rest_inputs, &mut self.counter, &mut self.store);
    }

    /// Applies a configuration write received over the bus.
    pub fn apply_write(&mut self, write: ConfigWrite) -> Result<(), StoreError> {
        crate::log_debug!("manager: config write");
        match write {
            // Persisted by the counter's own level check on the next poll.
            ConfigWrite::CountedAmpSeconds(v) => {
                self.counter.set_amp_seconds(v);
                Ok(())
            }
            ConfigWrite::TargetSoc(v) => self.output.set_target_soc(v, &mut self.store),
            ConfigWrite::ChargeEnabled(v) => self.output.set_charge_enabled(v, &mut self.store),
            ConfigWrite::DischargeEnabled(v) => self.output.set_discharge_enabled(v, &mut self.store),
            ConfigWrite::CurrentOffsetMa(v) => self.counter.set_current_offset_ma(v, &mut self.store),
            ConfigWrite::TargetMode(v) => self.output.set_target_mode(v, &mut self.store),
            ConfigWrite::TargetMv(v) => self.output.set_target_mv(v, &mut self.store),
            ConfigWrite::VoltageSettleMins(v) => self.rest.set_voltage_settle_time_mins(v, &mut self.store),
            ConfigWrite::ReboundMv(v) => self.output.set_rebound_mv(v, &mut self.store),
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let now = self.clock.now_ms();
        let config = self.output.config();
        TelemetrySnapshot {
            amp_seconds: self.counter.amp_seconds(),
            current_ma: self.pulse.instantaneous_current_ma(now),
            target_soc: config.target_soc,
            state_char: self.output.state_char(),
            charge_enabled: config.charge_enabled,
            discharge_enabled: config.discharge_enabled,
            temperature_8bfdp: self.readings.temperature_8bfdp,
            battery_mv: self.readings.battery_mv,
            current_offset_ma: self.counter.current_offset_ma(),
            target_mode: config.target_mode,
            target_mv: config.target_mv,
            ms_at_rest: self.rest.ms_at_rest(now),
            voltage_settle_time_mins: self.rest.voltage_settle_time_mins(),
            rebound_mv: config.rebound_mv,
        }
    }

    /// Offers `sink` a frame for every signal that changed since it was last
    /// sent. A refused frame is offered again on the next call.
    pub fn publish_changes<F>(&mut self, sink: F) -> Result<usize, TelemetryError>
    where
        F: FnMut(TelemetryFrame) -> bool,
    {
        let snapshot = self.snapshot();
        self.publisher.publish(self.clock.now_ms(), &snapshot, sink)
    }

    pub fn counter(&self) -> &ChargeCounter {
        &self.counter
    }

    pub fn pulse(&self) -> &PulseMeter {
        &self.pulse
    }

    pub fn output(&self) -> &OutputControl {
        &self.output
    }

    pub fn rest(&self) -> &RestManager {
        &self.rest
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    pub fn store_mut(&mut self) -> &mut P {
        &mut self.store
    }
}
