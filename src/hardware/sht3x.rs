//! SHT30/SHT31 sensor on the Raspberry Pi I2C bus.
//!
//! The measurement protocol is handled by the `sht31` driver, fed with
//! `rppal`'s embedded-hal I2C bus and delay. Reads block the calling thread,
//! so the sensor is wrapped in [`super::Offloaded`] before the monitor uses it.

use super::{BlockingClimateSensor, Measurement};
use crate::config::HardwareConfig;
use crate::error::HardwareError;
use log::{debug, info};
use rppal::hal::Delay;
use rppal::i2c::I2c;
use sht31::prelude::*;

type ReadFn = Box<dyn FnMut() -> Result<Measurement, HardwareError> + Send>;

/// Map the configured bus address onto the sensor's ADDR pin setting.
fn device_addr(address: u16) -> Result<DeviceAddr, HardwareError> {
    match address {
        0x44 => Ok(DeviceAddr::AD0),
        0x45 => Ok(DeviceAddr::AD1),
        other => Err(HardwareError::I2c(format!(
            "unsupported SHT3x address 0x{:02x} (expected 0x44 or 0x45)",
            other
        ))),
    }
}

pub struct Sht3x {
    address: u16,
    read: ReadFn,
}

impl Sht3x {
    /// Open the configured bus and bind the driver to the sensor address.
    pub fn open(config: &HardwareConfig) -> Result<Self, HardwareError> {
        let addr = device_addr(config.i2c_address)?;
        let i2c = I2c::with_bus(config.i2c_bus)?;
        let mut sensor = SHT31::new(i2c, Delay::new()).with_address(addr);

        info!(
            "Initialized SHT3x sensor on I2C bus {} address 0x{:02x}",
            config.i2c_bus, config.i2c_address
        );
        Ok(Self {
            address: config.i2c_address,
            read: Box::new(move || {
                sensor
                    .read()
                    .map(|reading| Measurement {
                        celsius: f64::from(reading.temperature),
                        humidity: f64::from(reading.humidity),
                    })
                    .map_err(|e| HardwareError::I2c(format!("SHT3x read failed: {:?}", e)))
            }),
        })
    }
}

impl BlockingClimateSensor for Sht3x {
    fn measure_blocking(&mut self) -> Result<Measurement, HardwareError> {
        let measurement = (self.read)()?;
        debug!(
            "SHT3x 0x{:02x}: {:.2}°C {:.2}%",
            self.address, measurement.celsius, measurement.humidity
        );
        Ok(measurement)
    }
}
