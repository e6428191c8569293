//! Messaging gateway: everything the monitor publishes or subscribes to.

use super::discovery::discovery_messages;
use super::topics::{Availability, SwitchPayload, Topics};
use crate::config::{DiscoveryConfig, TemperatureUnit};
use crate::error::Result;
use crate::sensor::Reading;
use crate::state::DeviceState;
use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat};
use log::{info, warn};
use serde::Serialize;

/// Outbound side of the MQTT connection.
///
/// QoS is fixed by the implementation; callers only choose the retain flag.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()>;
    async fn subscribe(&self, topic: &str) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct TemperaturePayload<'a> {
    temperature: f64,
    timestamp: &'a str,
}

#[derive(Debug, Serialize)]
struct HumidityPayload<'a> {
    humidity: f64,
    timestamp: &'a str,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct Gateway<P> {
    publisher: P,
    topics: Topics,
    discovery: DiscoveryConfig,
    unit: TemperatureUnit,
    retain: bool,
}

impl<P: Publisher> Gateway<P> {
    pub fn new(
        publisher: P,
        topics: Topics,
        discovery: DiscoveryConfig,
        unit: TemperatureUnit,
        retain: bool,
    ) -> Self {
        Self {
            publisher,
            topics,
            discovery,
            unit,
            retain,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Announce the device after a (re)connection: discovery documents,
    /// command subscriptions, availability, then current switch states.
    pub async fn on_connected(&self, state: &DeviceState) -> Result<()> {
        if self.discovery.enabled {
            self.publish_discovery().await?;
        }

        for topic in self.topics.command_topics() {
            self.publisher.subscribe(topic).await?;
        }

        self.publish_availability(Availability::Online).await?;
        self.publish_fan_state(state.fan_on).await?;
        self.publish_auto_mode(state.auto_mode).await
    }

    async fn publish_discovery(&self) -> Result<()> {
        info!("Publishing Home Assistant discovery configurations");
        for message in discovery_messages(&self.discovery, &self.topics, self.unit)? {
            self.publisher
                .publish(&message.topic, message.payload, true)
                .await?;
        }
        Ok(())
    }

    pub async fn publish_availability(&self, availability: Availability) -> Result<()> {
        self.publisher
            .publish(&self.topics.availability, availability.to_string(), true)
            .await
    }

    pub async fn publish_fan_state(&self, fan_on: bool) -> Result<()> {
        self.publisher
            .publish(
                &self.topics.fan_state,
                SwitchPayload::from(fan_on).to_string(),
                self.retain,
            )
            .await
    }

    pub async fn publish_auto_mode(&self, auto_mode: bool) -> Result<()> {
        self.publisher
            .publish(
                &self.topics.auto_state,
                SwitchPayload::from(auto_mode).to_string(),
                self.retain,
            )
            .await
    }

    /// Publish temperature and humidity telemetry.
    ///
    /// Returns `false` without publishing anything when there is no
    /// temperature in the reading.
    pub async fn publish_telemetry(
        &self,
        reading: &Reading,
        fan_on: bool,
        at: DateTime<Local>,
    ) -> Result<bool> {
        let Some(temperature) = reading.temperature else {
            warn!("No temperature data to publish");
            return Ok(false);
        };

        let timestamp = at.to_rfc3339_opts(SecondsFormat::Millis, false);

        let payload = serde_json::to_string(&TemperaturePayload {
            temperature: round2(temperature),
            timestamp: &timestamp,
        })?;
        self.publisher
            .publish(&self.topics.temperature_state, payload, self.retain)
            .await?;

        if let Some(humidity) = reading.humidity {
            let payload = serde_json::to_string(&HumidityPayload {
                humidity: round2(humidity),
                timestamp: &timestamp,
            })?;
            self.publisher
                .publish(&self.topics.humidity_state, payload, self.retain)
                .await?;
        }

        let humidity = reading
            .humidity
            .map(|h| format!(", {:.1}%", h))
            .unwrap_or_default();
        info!(
            "Temperature: {:.2}{}{}, Fan: {}",
            temperature,
            self.unit.symbol(),
            humidity,
            SwitchPayload::from(fan_on)
        );
        Ok(true)
    }

    /// Mark the device offline and close the connection.
    ///
    /// The disconnect is attempted even if the offline publish fails; the
    /// first error is returned.
    pub async fn shutdown(&self) -> Result<()> {
        let offline = self.publish_availability(Availability::Offline).await;
        if let Err(e) = &offline {
            warn!("Failed to publish offline availability: {}", e);
        }
        self.publisher.disconnect().await?;
        offline
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::Publisher;
    use crate::error::{MonitorError, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Publish {
            topic: String,
            payload: String,
            retain: bool,
        },
        Subscribe(String),
        Disconnect,
    }

    /// Publisher that records every call instead of talking to a broker.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingPublisher {
        calls: Arc<Mutex<Vec<Call>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingPublisher {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn clear(&self) {
            self.calls.lock().clear();
        }

        /// Make publishes time out (without being recorded) until cleared.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Payloads published to `topic`, in order.
        pub fn published_to(&self, topic: &str) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter_map(|call| match call {
                    Call::Publish { topic: t, payload, .. } if t == topic => {
                        Some(payload.clone())
                    }
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(MonitorError::PublishTimeout(topic.to_string()));
            }
            self.calls.lock().push(Call::Publish {
                topic: topic.to_string(),
                payload,
                retain,
            });
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> Result<()> {
            self.calls.lock().push(Call::Subscribe(topic.to_string()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.calls.lock().push(Call::Disconnect);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::recording::{Call, RecordingPublisher};
    use super::*;
    use crate::config::Config;
    use crate::error::MonitorError;
    use chrono::TimeZone;
    use serde_json::Value;

    fn gateway(retain: bool, discovery: bool) -> (Gateway<RecordingPublisher>, RecordingPublisher) {
        let mut config = Config::default();
        config.discovery.enabled = discovery;
        let publisher = RecordingPublisher::default();
        let gateway = Gateway::new(
            publisher.clone(),
            Topics::new("enclosure"),
            config.discovery,
            TemperatureUnit::Celsius,
            retain,
        );
        (gateway, publisher)
    }

    #[tokio::test]
    async fn test_on_connected_order() {
        let (gateway, publisher) = gateway(false, true);
        let state = DeviceState::new();

        gateway.on_connected(&state).await.unwrap();
        let calls = publisher.calls();
        assert_eq!(calls.len(), 4 + 2 + 3);

        // Discovery first, always retained
        for call in &calls[..4] {
            match call {
                Call::Publish { topic, retain, .. } => {
                    assert!(topic.starts_with("homeassistant/"));
                    assert!(*retain);
                }
                other => panic!("expected discovery publish, got {:?}", other),
            }
        }

        assert_eq!(calls[4], Call::Subscribe("enclosure/fan/set".to_string()));
        assert_eq!(calls[5], Call::Subscribe("enclosure/fan_auto/set".to_string()));
        assert_eq!(
            calls[6],
            Call::Publish {
                topic: "enclosure/availability".to_string(),
                payload: "online".to_string(),
                retain: true,
            }
        );
        assert_eq!(
            calls[7],
            Call::Publish {
                topic: "enclosure/fan/state".to_string(),
                payload: "OFF".to_string(),
                retain: false,
            }
        );
        assert_eq!(
            calls[8],
            Call::Publish {
                topic: "enclosure/fan_auto/state".to_string(),
                payload: "ON".to_string(),
                retain: false,
            }
        );
    }

    #[tokio::test]
    async fn test_discovery_can_be_disabled() {
        let (gateway, publisher) = gateway(true, false);
        gateway.on_connected(&DeviceState::new()).await.unwrap();

        let announced = publisher.calls().into_iter().any(|call| match call {
            Call::Publish { topic, .. } => topic.starts_with("homeassistant/"),
            _ => false,
        });
        assert!(!announced);
    }

    #[tokio::test]
    async fn test_telemetry_payloads() {
        let (gateway, publisher) = gateway(true, true);
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let reading = Reading {
            temperature: Some(27.456),
            humidity: Some(51.234),
        };

        assert!(gateway.publish_telemetry(&reading, true, at).await.unwrap());

        let temperature = publisher.published_to("enclosure/temperature/state");
        assert_eq!(temperature.len(), 1);
        let doc: Value = serde_json::from_str(&temperature[0]).unwrap();
        assert_eq!(doc["temperature"], 27.46);
        assert!(doc["timestamp"].as_str().unwrap().starts_with("2024-05-01T12:30:00.000"));

        let humidity = publisher.published_to("enclosure/humidity/state");
        let doc: Value = serde_json::from_str(&humidity[0]).unwrap();
        assert_eq!(doc["humidity"], 51.23);
    }

    #[tokio::test]
    async fn test_telemetry_without_humidity() {
        let (gateway, publisher) = gateway(true, true);
        let reading = Reading {
            temperature: Some(22.0),
            humidity: None,
        };

        assert!(gateway.publish_telemetry(&reading, false, Local::now()).await.unwrap());
        assert_eq!(publisher.published_to("enclosure/temperature/state").len(), 1);
        assert!(publisher.published_to("enclosure/humidity/state").is_empty());
    }

    #[tokio::test]
    async fn test_telemetry_skipped_without_temperature() {
        let (gateway, publisher) = gateway(true, true);

        let published = gateway
            .publish_telemetry(&Reading::default(), false, Local::now())
            .await
            .unwrap();
        assert!(!published);
        assert!(publisher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_marks_offline() {
        let (gateway, publisher) = gateway(false, true);
        gateway.shutdown().await.unwrap();

        assert_eq!(
            publisher.calls(),
            vec![
                Call::Publish {
                    topic: "enclosure/availability".to_string(),
                    payload: "offline".to_string(),
                    retain: true,
                },
                Call::Disconnect,
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_when_offline_publish_fails() {
        let (gateway, publisher) = gateway(false, true);
        publisher.set_failing(true);

        let result = gateway.shutdown().await;
        assert!(matches!(result, Err(MonitorError::PublishTimeout(_))));
        assert_eq!(publisher.calls(), vec![Call::Disconnect]);
    }
}
