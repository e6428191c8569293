//! Sensor reader: bounded, unit-converted reads from the climate sensor.

use crate::config::TemperatureUnit;
use crate::error::HardwareError;
use crate::hardware::ClimateSensor;
use log::{debug, error};
use std::time::Duration;

/// One tick's readings. Both fields are absent when the sensor read failed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

pub struct SensorReader {
    sensor: Box<dyn ClimateSensor>,
    unit: TemperatureUnit,
    timeout: Duration,
}

impl SensorReader {
    pub fn new(sensor: Box<dyn ClimateSensor>, unit: TemperatureUnit, timeout: Duration) -> Self {
        Self {
            sensor,
            unit,
            timeout,
        }
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    /// Read the sensor. Failures and timeouts are logged and reported as an
    /// empty [`Reading`].
    pub async fn read(&mut self) -> Reading {
        let result = match tokio::time::timeout(self.timeout, self.sensor.measure()).await {
            Ok(result) => result,
            Err(_) => Err(HardwareError::Timeout(self.timeout)),
        };

        match result {
            Ok(measurement) => {
                let reading = Reading {
                    temperature: Some(self.unit.from_celsius(measurement.celsius)),
                    humidity: Some(measurement.humidity),
                };
                debug!("Sensor reading: {:?}", reading);
                reading
            }
            Err(e) => {
                error!("Error reading sensor: {}", e);
                Reading::default()
            }
        }
    }
}
