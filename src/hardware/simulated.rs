//! Simulated hardware for running without a Raspberry Pi.
//!
//! [`SimulatedFan`] records every write, and [`SimulatedClimate`] models an
//! enclosure that heats up while the fan is off and cools while it runs.
//! Both expose cloneable handles so the state can be inspected or scripted
//! after the devices are handed to the monitor.

use super::{ClimateSensor, FanOutput, Measurement};
use crate::error::HardwareError;
use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
struct FanProbeState {
    level: bool,
    writes: Vec<bool>,
    failing: bool,
    released: bool,
}

/// Shared view of a [`SimulatedFan`].
#[derive(Debug, Clone, Default)]
pub struct FanProbe {
    inner: Arc<Mutex<FanProbeState>>,
}

impl FanProbe {
    /// Current output level.
    pub fn level(&self) -> bool {
        self.inner.lock().level
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<bool> {
        self.inner.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().writes.len()
    }

    /// Make subsequent writes fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().released
    }
}

#[derive(Debug, Default)]
pub struct SimulatedFan {
    probe: FanProbe,
}

impl SimulatedFan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> FanProbe {
        self.probe.clone()
    }
}

impl FanOutput for SimulatedFan {
    fn write(&mut self, on: bool) -> Result<(), HardwareError> {
        let mut state = self.probe.inner.lock();
        if state.failing {
            return Err(HardwareError::Simulated("fan write rejected".to_string()));
        }
        state.level = on;
        state.writes.push(on);
        Ok(())
    }

    fn release(&mut self) {
        self.probe.inner.lock().released = true;
    }
}

/// Queue of canned sensor results consumed before the thermal model.
#[derive(Debug, Clone, Default)]
pub struct ClimateScript {
    queue: Arc<Mutex<VecDeque<Option<Measurement>>>>,
}

impl ClimateScript {
    pub fn push_reading(&self, celsius: f64, humidity: f64) {
        self.queue
            .lock()
            .push_back(Some(Measurement { celsius, humidity }));
    }

    pub fn push_failure(&self) {
        self.queue.lock().push_back(None);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Degrees per measurement gained while the fan is off.
const HEATING_RATE: f64 = 0.25;
/// Degrees per measurement lost while the fan is running.
const COOLING_RATE: f64 = 0.4;
const MAX_CELSIUS: f64 = 45.0;

pub struct SimulatedClimate {
    celsius: f64,
    humidity: f64,
    ambient: f64,
    fan: Option<FanProbe>,
    script: ClimateScript,
}

impl SimulatedClimate {
    pub fn new(celsius: f64, humidity: f64) -> Self {
        Self {
            celsius,
            humidity,
            ambient: celsius.min(22.0),
            fan: None,
            script: ClimateScript::default(),
        }
    }

    /// Couple the thermal model to a simulated fan.
    pub fn with_fan(mut self, fan: FanProbe) -> Self {
        self.fan = Some(fan);
        self
    }

    pub fn script(&self) -> ClimateScript {
        self.script.clone()
    }

    fn step(&mut self) -> Measurement {
        let fan_on = self.fan.as_ref().is_some_and(FanProbe::level);
        if fan_on {
            self.celsius = (self.celsius - COOLING_RATE).max(self.ambient);
            self.humidity = (self.humidity - 0.2).max(20.0);
        } else {
            self.celsius = (self.celsius + HEATING_RATE).min(MAX_CELSIUS);
            self.humidity = (self.humidity + 0.1).min(80.0);
        }
        Measurement {
            celsius: self.celsius,
            humidity: self.humidity,
        }
    }
}

#[async_trait]
impl ClimateSensor for SimulatedClimate {
    async fn measure(&mut self) -> Result<Measurement, HardwareError> {
        let scripted = self.script.queue.lock().pop_front();
        match scripted {
            Some(Some(measurement)) => Ok(measurement),
            Some(None) => Err(HardwareError::Simulated("sensor not responding".to_string())),
            None => {
                let measurement = self.step();
                info!(
                    "[Sim] Enclosure at {:.2}°C, {:.1}%",
                    measurement.celsius, measurement.humidity
                );
                Ok(measurement)
            }
        }
    }
}
