//! Fan relay on a Raspberry Pi GPIO pin.

use super::FanOutput;
use crate::config::HardwareConfig;
use crate::error::HardwareError;
use log::{debug, info};
use rppal::gpio::{Gpio, Level, OutputPin};

/// Electrical level that puts the relay in the requested state.
fn relay_level(on: bool, active_low: bool) -> Level {
    if on != active_low { Level::High } else { Level::Low }
}

/// Fan relay driven through `rppal`.
///
/// The pin is claimed as an output already at the "off" level. With
/// `active_low` the electrical level is inverted, for relay boards that
/// energize on a low input.
pub struct GpioFan {
    pin: Option<OutputPin>,
    bcm: u8,
    active_low: bool,
}

impl GpioFan {
    /// Claim the configured pin as an output. Fails if the GPIO peripheral is
    /// unavailable or the pin is already in use.
    pub fn open(config: &HardwareConfig) -> Result<Self, HardwareError> {
        let pin = Gpio::new()?.get(config.fan_pin)?;
        // Claim the pin already driven to the off level so the relay never pulses
        let mut pin = match relay_level(false, config.fan_active_low) {
            Level::High => pin.into_output_high(),
            Level::Low => pin.into_output_low(),
        };
        pin.set_reset_on_drop(false);

        let mut fan = Self {
            pin: Some(pin),
            bcm: config.fan_pin,
            active_low: config.fan_active_low,
        };
        fan.write(false)?;

        info!(
            "GPIO initialized, fan control on pin {}{}",
            config.fan_pin,
            if config.fan_active_low { " (active low)" } else { "" }
        );
        Ok(fan)
    }
}

impl FanOutput for GpioFan {
    fn write(&mut self, on: bool) -> Result<(), HardwareError> {
        let pin = self
            .pin
            .as_mut()
            .ok_or_else(|| HardwareError::Gpio(format!("pin {} already released", self.bcm)))?;

        pin.write(relay_level(on, self.active_low));
        debug!("GPIO {} -> {}", self.bcm, if on { "on" } else { "off" });
        Ok(())
    }

    fn release(&mut self) {
        if self.pin.take().is_some() {
            info!("Released GPIO pin {}", self.bcm);
        }
    }
}
