//! Home Assistant MQTT discovery documents.
//!
//! Four entities are announced under the discovery prefix: temperature and
//! humidity sensors plus fan and auto-mode switches. All of them share the
//! configured device descriptor and the availability topic.

use super::topics::{SwitchPayload, Topics};
use crate::config::{DeviceInfo, DiscoveryConfig, TemperatureUnit};
use serde::Serialize;

/// Discovery config payload for a single entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityConfig<'a> {
    pub name: &'static str,
    pub unique_id: String,
    pub state_topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<&'static str>,
    pub device: &'a DeviceInfo,
    pub availability_topic: &'a str,
}

impl<'a> EntityConfig<'a> {
    fn sensor(
        name: &'static str,
        unique_id: String,
        state_topic: &'a str,
        unit: &'static str,
        device_class: &'static str,
        value_template: &'static str,
        (device, availability_topic): (&'a DeviceInfo, &'a str),
    ) -> Self {
        Self {
            name,
            unique_id,
            state_topic,
            command_topic: None,
            payload_on: None,
            payload_off: None,
            unit_of_measurement: Some(unit),
            device_class: Some(device_class),
            value_template: Some(value_template),
            device,
            availability_topic,
        }
    }

    fn switch(
        name: &'static str,
        unique_id: String,
        state_topic: &'a str,
        command_topic: &'a str,
        (device, availability_topic): (&'a DeviceInfo, &'a str),
    ) -> Self {
        Self {
            name,
            unique_id,
            state_topic,
            command_topic: Some(command_topic),
            payload_on: Some(SwitchPayload::On.into()),
            payload_off: Some(SwitchPayload::Off.into()),
            unit_of_measurement: None,
            device_class: None,
            value_template: None,
            device,
            availability_topic,
        }
    }
}

/// A serialized discovery document and the topic it is published to.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub payload: String,
}

/// Build the retained discovery messages for all entities.
pub fn discovery_messages(
    discovery: &DiscoveryConfig,
    topics: &Topics,
    unit: TemperatureUnit,
) -> Result<Vec<DiscoveryMessage>, serde_json::Error> {
    let id = discovery.device_id.as_str();
    let shared = (&discovery.device, topics.availability.as_str());

    let entities = [
        (
            "sensor",
            format!("{}_temp", id),
            EntityConfig::sensor(
                "Temperature",
                format!("{}_temperature", id),
                &topics.temperature_state,
                unit.symbol(),
                "temperature",
                "{{ value_json.temperature }}",
                shared,
            ),
        ),
        (
            "sensor",
            format!("{}_humidity", id),
            EntityConfig::sensor(
                "Humidity",
                format!("{}_humidity", id),
                &topics.humidity_state,
                "%",
                "humidity",
                "{{ value_json.humidity }}",
                shared,
            ),
        ),
        (
            "switch",
            format!("{}_fan", id),
            EntityConfig::switch(
                "Fan",
                format!("{}_fan", id),
                &topics.fan_state,
                &topics.fan_set,
                shared,
            ),
        ),
        (
            "switch",
            format!("{}_auto", id),
            EntityConfig::switch(
                "Auto Mode",
                format!("{}_auto_mode", id),
                &topics.auto_state,
                &topics.auto_set,
                shared,
            ),
        ),
    ];

    entities
        .iter()
        .map(|(component, object_id, entity)| {
            Ok(DiscoveryMessage {
                topic: format!("{}/{}/{}/config", discovery.prefix, component, object_id),
                payload: serde_json::to_string(entity)?,
            })
        })
        .collect()
}
