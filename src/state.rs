use tokio::time::Instant;

/// Runtime state of the enclosure, owned by the monitor task.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub fan_on: bool,
    pub auto_mode: bool,
    /// Set while the fan is running.
    pub fan_start_time: Option<Instant>,
    pub last_temperature: Option<f64>,
    pub last_humidity: Option<f64>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            fan_on: false,
            auto_mode: true,
            fan_start_time: None,
            last_temperature: None,
            last_humidity: None,
        }
    }

    /// How long the fan has been running continuously, if it is on.
    pub fn fan_runtime(&self, now: Instant) -> Option<std::time::Duration> {
        self.fan_start_time.map(|start| now.saturating_duration_since(start))
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}
