//! Platform-agnostic services the core depends on
//!
//! - [`Clock`]: millisecond counter and cadence helpers
//! - [`Persistence`]: EEPROM-style scalar store
//! - [`Actuators`]: charge and discharge outputs
//!
//! Each trait comes with an in-memory implementation used by the host tests.

pub mod actuators;
pub mod clock;
pub mod persistence;

pub use actuators::{Actuators, MockActuators};
pub use clock::{Clock, MockClock};
pub use persistence::{Key, MemoryStore, Persistence};
