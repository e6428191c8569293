//! MQTT client wrapper around `rumqttc`.

use super::gateway::Publisher;
use super::topics::Availability;
use crate::config::MqttConfig;
use crate::error::{MonitorError, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
};
use std::time::Duration;
use tokio::sync::mpsc;

/// Delay before the event loop is polled again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Message received from MQTT broker.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// Events forwarded from the MQTT event loop to the monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum MqttEvent {
    /// The broker accepted a (re)connection.
    Connected,
    Message(MqttMessage),
}

/// MQTT client with a retained "offline" last will on the availability topic.
pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
    qos: QoS,
}

impl MqttClient {
    /// Create a new MQTT client from configuration.
    pub fn new(config: &MqttConfig, availability_topic: &str) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keep_alive);
        options.set_last_will(LastWill::new(
            availability_topic,
            Availability::Offline.as_ref(),
            config.qos(),
            true,
        ));

        // Set credentials if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);

        Self {
            client,
            event_loop,
            qos: config.qos(),
        }
    }

    /// Drive the event loop until the broker acknowledges the connection.
    ///
    /// Any connection error or a missing ConnAck within `timeout` is fatal.
    pub async fn connect(mut self, timeout: Duration) -> Result<Self> {
        let wait_for_ack = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        debug!("ConnAck: {:?}", ack);
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => return Err(MonitorError::MqttConnect(e.to_string())),
                }
            }
        };

        match tokio::time::timeout(timeout, wait_for_ack).await {
            Ok(Ok(())) => {
                info!("Connected to MQTT broker");
                Ok(self)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MonitorError::MqttConnect(format!(
                "no ConnAck within {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Publisher handle bound to the configured QoS.
    pub fn publisher(&self, timeout: Duration) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
            qos: self.qos,
            timeout,
        }
    }

    /// Run the MQTT event loop and forward events to the provided channel.
    ///
    /// Returns once the client disconnects on request or the receiving side
    /// of the channel is dropped. Connection errors are logged and the loop
    /// keeps polling, which makes `rumqttc` reconnect.
    pub async fn run(mut self, tx: mpsc::Sender<MqttEvent>) {
        info!("Starting MQTT event loop");
        let mut disconnecting = false;

        loop {
            let event = match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Reconnected to MQTT broker");
                    MqttEvent::Connected
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = match String::from_utf8(publish.payload.to_vec()) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("Invalid UTF-8 in MQTT payload on {}: {}", publish.topic, e);
                            continue;
                        }
                    };
                    debug!("Received MQTT message: {} = {}", publish.topic, payload);
                    MqttEvent::Message(MqttMessage {
                        topic: publish.topic,
                        payload,
                    })
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker closed the MQTT connection");
                    continue;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    // Keep polling until the broker closes the socket so
                    // queued publishes are flushed first
                    disconnecting = true;
                    continue;
                }
                Ok(_) => continue,
                Err(ConnectionError::RequestsDone) => break,
                Err(_) if disconnecting => {
                    info!("MQTT client disconnected");
                    break;
                }
                Err(e) => {
                    warn!("Unexpected MQTT disconnection: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            if tx.send(event).await.is_err() {
                error!("MQTT event channel closed");
                break;
            }
        }
    }
}

/// Poll `event_loop` until a requested disconnect has been written or the
/// connection fails. Returns `false` if `timeout` elapsed first.
pub async fn flush_disconnect(event_loop: &mut EventLoop, timeout: Duration) -> bool {
    let flush = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    tokio::time::timeout(timeout, flush).await.is_ok()
}

/// [`Publisher`] backed by a `rumqttc` client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    timeout: Duration,
}

impl MqttPublisher {
    async fn bounded<F>(&self, topic: &str, request: F) -> Result<()>
    where
        F: std::future::Future<Output = std::result::Result<(), rumqttc::ClientError>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(MonitorError::from),
            Err(_) => Err(MonitorError::PublishTimeout(topic.to_string())),
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        debug!("Publishing to {}: {}", topic, payload);
        self.bounded(topic, self.client.publish(topic, self.qos, retain, payload))
            .await
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.bounded(topic, self.client.subscribe(topic, self.qos))
            .await?;
        debug!("Subscribed to {}", topic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.bounded("disconnect", self.client.disconnect()).await
    }
}
