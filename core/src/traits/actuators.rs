//! Charge and discharge outputs.

/// Two-output capability driven by the output state machine.
///
/// The firmware implements this over GPIO pins; the core never touches registers.
pub trait Actuators {
    /// Energize the charger contactor.
    fn set_charge(&mut self, on: bool);
    /// Energize the discharge (supply disconnect) output.
    fn set_discharge(&mut self, on: bool);
}

impl<T: Actuators> Actuators for &mut T {
    fn set_charge(&mut self, on: bool) {
        (**self).set_charge(on)
    }

    fn set_discharge(&mut self, on: bool) {
        (**self).set_discharge(on)
    }
}

/// Records the last level written to each output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockActuators {
    pub charge: bool,
    pub discharge: bool,
}

impl Actuators for MockActuators {
    fn set_charge(&mut self, on: bool) {
        self.charge = on;
    }

    fn set_discharge(&mut self, on: bool) {
        self.discharge = on;
    }
}
