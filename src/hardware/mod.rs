//! Hardware abstraction for the fan relay and the climate sensor.
//!
//! The monitor only talks to the [`FanOutput`] and [`ClimateSensor`] traits so
//! the same control loop drives the Raspberry Pi peripherals (via `rppal`) or
//! the simulated backends used for development and tests.

pub mod blocking;
pub mod gpio;
pub mod sht3x;
pub mod simulated;

use crate::error::HardwareError;
use async_trait::async_trait;

pub use blocking::{BlockingClimateSensor, Offloaded};
pub use gpio::GpioFan;
pub use sht3x::Sht3x;
pub use simulated::{SimulatedClimate, SimulatedFan};

/// A raw sensor measurement, always in Celsius and percent relative humidity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub celsius: f64,
    pub humidity: f64,
}

/// Digital output switching the fan.
pub trait FanOutput: Send {
    /// Drive the output to the given logical level (`true` = fan running).
    fn write(&mut self, on: bool) -> Result<(), HardwareError>;

    /// Release the underlying pin. Called once during shutdown.
    fn release(&mut self) {}
}

/// Temperature and humidity source.
#[async_trait]
pub trait ClimateSensor: Send {
    async fn measure(&mut self) -> Result<Measurement, HardwareError>;
}
