//! Enclosure monitor library.
//!
//! Reads an SHT3x temperature/humidity sensor, drives a GPIO fan with
//! hysteresis and a runtime limit, and exposes everything to Home Assistant
//! over MQTT.

pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod monitor;
pub mod mqtt;
pub mod sensor;
pub mod state;

pub use config::Config;
pub use error::{MonitorError, Result};
pub use monitor::{Monitor, Phase, StopReason};
