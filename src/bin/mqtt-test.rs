//! Test binary for the enclosure monitor's MQTT interface.
//!
//! Usage:
//!   cargo run --bin mqtt-test -- [--fan ON|OFF] [--auto ON|OFF] [--seconds N]
//!
//! Connects to the configured broker with its own client id, subscribes to
//! every topic under the monitor's prefix (and its discovery documents), and
//! logs the traffic. Optional switch commands are published once subscribed.

use clap::Parser;
use enclosure_monitor::config::{self, Config};
use enclosure_monitor::mqtt::discovery::discovery_messages;
use enclosure_monitor::mqtt::{SwitchPayload, Topics, flush_disconnect};
use log::{error, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use std::time::Duration;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(name = "mqtt-test", about = "Watch and command the enclosure monitor over MQTT")]
struct Cli {
    /// Publish a fan command (ON or OFF)
    #[arg(long)]
    fan: Option<SwitchPayload>,

    /// Publish an auto-mode command (ON or OFF)
    #[arg(long)]
    auto: Option<SwitchPayload>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    seconds: Option<u64>,
}

fn main() {
    config::load_dotenv();
    match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime.block_on(run()),
        Err(e) => eprintln!("Failed to start async runtime: {}", e),
    }
}

async fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let topics = Topics::new(&config.mqtt.topic_prefix);

    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    let mut options = MqttOptions::new(
        format!("{}-test", config.mqtt.client_id),
        &config.mqtt.broker_host,
        config.mqtt.broker_port,
    );
    options.set_keep_alive(config.mqtt.keep_alive);
    if let (Some(username), Some(password)) = (&config.mqtt.username, &config.mqtt.password) {
        options.set_credentials(username, password);
    }
    let (client, mut event_loop) = AsyncClient::new(options, 32);

    let mut subscriptions = vec![format!("{}/#", config.mqtt.topic_prefix)];
    if config.discovery.enabled {
        match discovery_messages(&config.discovery, &topics, config.monitor.temperature_unit) {
            Ok(messages) => subscriptions.extend(messages.into_iter().map(|m| m.topic)),
            Err(e) => warn!("Failed to build discovery topics: {}", e),
        }
    }
    for topic in &subscriptions {
        if let Err(e) = client.subscribe(topic, config.mqtt.qos()).await {
            warn!("Failed to subscribe to {}: {}", topic, e);
        }
    }

    let mut commands = Vec::new();
    if let Some(payload) = cli.fan {
        commands.push((topics.fan_set.clone(), payload));
    }
    if let Some(payload) = cli.auto {
        commands.push((topics.auto_set.clone(), payload));
    }
    for (topic, payload) in commands {
        info!(">>> {} = {}", topic, payload);
        if let Err(e) = client
            .publish(&topic, config.mqtt.qos(), false, payload.as_ref())
            .await
        {
            warn!("Failed to publish to {}: {}", topic, e);
        }
    }

    let watch = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected, watching {}", subscriptions.join(", "));
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload);
                    let retained = if publish.retain { " (retained)" } else { "" };
                    info!("{}{} = {}", publish.topic, retained, payload);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    };

    let deadline = async {
        match cli.seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = watch => {}
        _ = deadline => info!("Watch period elapsed"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    if let Err(e) = client.disconnect().await {
        warn!("Failed to disconnect: {}", e);
        return;
    }
    if !flush_disconnect(&mut event_loop, DISCONNECT_TIMEOUT).await {
        warn!("Timed out waiting for MQTT disconnect");
    }
}
