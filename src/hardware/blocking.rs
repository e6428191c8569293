//! Runs synchronous sensor drivers on tokio's blocking pool.

use super::{ClimateSensor, Measurement};
use crate::error::HardwareError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Sensor driver whose reads block the calling thread.
pub trait BlockingClimateSensor: Send + 'static {
    fn measure_blocking(&mut self) -> Result<Measurement, HardwareError>;
}

/// [`ClimateSensor`] that runs every read of a blocking driver on
/// `spawn_blocking`, so a caller's timeout can abandon a stalled transfer.
///
/// An abandoned read keeps the driver locked until it returns. Reads
/// requested in the meantime fail with [`HardwareError::Busy`] instead of
/// queueing behind it.
pub struct Offloaded<S> {
    sensor: Arc<Mutex<S>>,
}

impl<S: BlockingClimateSensor> Offloaded<S> {
    pub fn new(sensor: S) -> Self {
        Self {
            sensor: Arc::new(Mutex::new(sensor)),
        }
    }
}

#[async_trait]
impl<S: BlockingClimateSensor> ClimateSensor for Offloaded<S> {
    async fn measure(&mut self) -> Result<Measurement, HardwareError> {
        let sensor = Arc::clone(&self.sensor);
        tokio::task::spawn_blocking(move || match sensor.try_lock() {
            Some(mut sensor) => sensor.measure_blocking(),
            None => Err(HardwareError::Busy),
        })
        .await
        .map_err(|e| HardwareError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemperatureUnit;
    use crate::sensor::{Reading, SensorReader};
    use std::time::{Duration, Instant};

    /// Driver that holds the calling thread like a stalled I2C transfer.
    struct StalledBus {
        stall: Duration,
    }

    impl BlockingClimateSensor for StalledBus {
        fn measure_blocking(&mut self) -> Result<Measurement, HardwareError> {
            std::thread::sleep(self.stall);
            Ok(Measurement {
                celsius: 20.0,
                humidity: 40.0,
            })
        }
    }

    #[tokio::test]
    async fn test_offloaded_read() {
        let mut sensor = Offloaded::new(StalledBus {
            stall: Duration::ZERO,
        });

        let measurement = sensor.measure().await.unwrap();
        assert_eq!(measurement.celsius, 20.0);
        assert_eq!(measurement.humidity, 40.0);
    }

    #[tokio::test]
    async fn test_timeout_abandons_stalled_read() {
        let sensor = Offloaded::new(StalledBus {
            stall: Duration::from_secs(1),
        });
        let mut reader = SensorReader::new(
            Box::new(sensor),
            TemperatureUnit::Celsius,
            Duration::from_millis(50),
        );

        let started = Instant::now();
        assert_eq!(reader.read().await, Reading::default());
        assert!(started.elapsed() < Duration::from_millis(500));

        // The first transfer is still stuck; the next read must not wait for it
        let started = Instant::now();
        assert_eq!(reader.read().await, Reading::default());
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
