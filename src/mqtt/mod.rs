//! MQTT integration with Home Assistant.
//!
//! `client` owns the `rumqttc` connection, `gateway` turns device state into
//! publishes, `topics` and `discovery` define the wire contract.

mod client;
pub mod discovery;
pub mod gateway;
pub mod topics;

pub use client::{MqttClient, MqttEvent, MqttMessage, MqttPublisher, flush_disconnect};
pub use gateway::{Gateway, Publisher};
pub use topics::{Availability, Command, CommandError, SwitchPayload, Topics};
