use thiserror::Error as ThisError;

/// Configuration errors detected while loading or validating [`crate::config::Config`].
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error(
        "Invalid thresholds: require off ({off}) < on ({on}) <= critical ({critical})"
    )]
    ThresholdOrder { off: f64, on: f64, critical: f64 },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("MQTT QoS must be 0, 1 or 2 (got {0})")]
    InvalidQos(u8),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Failures reported by the fan output or the climate sensor.
#[derive(ThisError, Debug)]
pub enum HardwareError {
    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("I2C error: {0}")]
    I2c(String),

    #[error("Sensor busy with an earlier read")]
    Busy,

    #[error("Sensor task failed: {0}")]
    Task(String),

    #[error("Sensor read timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Simulated failure: {0}")]
    Simulated(String),
}

impl From<rppal::gpio::Error> for HardwareError {
    fn from(e: rppal::gpio::Error) -> Self {
        HardwareError::Gpio(e.to_string())
    }
}

impl From<rppal::i2c::Error> for HardwareError {
    fn from(e: rppal::i2c::Error) -> Self {
        HardwareError::I2c(e.to_string())
    }
}

#[derive(ThisError, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("Failed to connect to MQTT broker: {0}")]
    MqttConnect(String),

    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error("MQTT publish to {0} timed out")]
    PublishTimeout(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
