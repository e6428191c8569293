//! Monitor loop: the single owner of [`DeviceState`].
//!
//! Poll ticks, inbound MQTT commands and reconnections are all handled by the
//! one task running [`Monitor::run`], so fan state is never mutated
//! concurrently.

use crate::config::{Config, Thresholds};
use crate::control::{ControlSource, FanActuator, desired_fan_state, is_critical};
use crate::mqtt::{Command, Gateway, MqttEvent, Publisher};
use crate::sensor::SensorReader;
use crate::state::DeviceState;
use chrono::Local;
use log::{error, info, warn};
use std::time::Duration;
use strum::Display;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lifecycle of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// Why [`Monitor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested through the cancellation token.
    Cancelled,
    /// The MQTT event loop went away.
    EventStreamClosed,
}

pub struct Monitor<P> {
    state: DeviceState,
    reader: SensorReader,
    fan: FanActuator,
    gateway: Gateway<P>,
    thresholds: Thresholds,
    update_interval: Duration,
    publish_interval: Duration,
    last_publish: Option<Instant>,
    phase: Phase,
}

impl<P: Publisher> Monitor<P> {
    pub fn new(
        config: &Config,
        reader: SensorReader,
        fan: FanActuator,
        gateway: Gateway<P>,
    ) -> Self {
        Self {
            state: DeviceState::new(),
            reader,
            fan,
            gateway,
            thresholds: config.thresholds.clone(),
            update_interval: config.monitor.update_interval,
            publish_interval: config.monitor.publish_interval,
            last_publish: None,
            phase: Phase::Starting,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        info!("Monitor {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Run until cancelled or until the MQTT event stream ends, then shut
    /// down: fan off, availability offline, disconnect, release the pin.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<MqttEvent>,
        cancel: CancellationToken,
    ) -> StopReason {
        self.enter(Phase::Running);
        self.announce().await;

        let mut ticker = tokio::time::interval(self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Shutdown requested");
                    break StopReason::Cancelled;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        error!("MQTT event stream ended unexpectedly");
                        break StopReason::EventStreamClosed;
                    }
                },
                _ = ticker.tick() => self.tick().await,
            }
        };

        self.shutdown().await;
        reason
    }

    /// Publish discovery, subscriptions and current state for a new connection.
    async fn announce(&self) {
        if let Err(e) = self.gateway.on_connected(&self.state).await {
            error!("Failed to publish initial state: {}", e);
        }
    }

    pub async fn handle_event(&mut self, event: MqttEvent) {
        match event {
            MqttEvent::Connected => self.announce().await,
            MqttEvent::Message(message) => {
                match self
                    .gateway
                    .topics()
                    .parse_command(&message.topic, &message.payload)
                {
                    Ok(command) => self.handle_command(command).await,
                    Err(e) => warn!("Ignoring MQTT message: {}", e),
                }
            }
        }
    }

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetFan(on) => {
                if self.state.auto_mode {
                    self.state.auto_mode = false;
                    info!("Switched to manual mode");
                    self.publish_auto_mode().await;
                }
                self.apply_fan(on, ControlSource::Manual).await;
            }
            Command::SetAutoMode(on) => {
                self.state.auto_mode = on;
                info!("Switched to {} mode", if on { "automatic" } else { "manual" });
                self.publish_auto_mode().await;
            }
        }
    }

    /// One poll cycle: read, control, and publish telemetry when due.
    pub async fn tick(&mut self) {
        let reading = self.reader.read().await;
        if reading.temperature.is_some() {
            self.state.last_temperature = reading.temperature;
        }
        if reading.humidity.is_some() {
            self.state.last_humidity = reading.humidity;
        }

        if let Some(temperature) = reading.temperature
            && self.state.auto_mode
        {
            self.automatic_control(temperature).await;
        }

        match self.fan.enforce_max_runtime(&mut self.state) {
            Ok(transition) => {
                if let Some(on) = transition.fan_on() {
                    self.publish_fan_state(on).await;
                }
            }
            Err(e) => error!("Failed to enforce fan runtime limit: {}", e),
        }

        let now = Instant::now();
        if self
            .last_publish
            .is_none_or(|last| now.duration_since(last) >= self.publish_interval)
        {
            if let Err(e) = self
                .gateway
                .publish_telemetry(&reading, self.state.fan_on, Local::now())
                .await
            {
                error!("Failed to publish sensor data: {}", e);
            }
            self.last_publish = Some(now);
        }
    }

    async fn automatic_control(&mut self, temperature: f64) {
        if is_critical(temperature, &self.thresholds) && !self.state.fan_on {
            warn!(
                "Critical temperature {:.1}{} - forcing fan ON",
                temperature,
                self.reader.unit().symbol()
            );
        }
        let desired = desired_fan_state(temperature, self.state.fan_on, &self.thresholds);
        self.apply_fan(desired, ControlSource::Automatic).await;
    }

    async fn apply_fan(&mut self, desired: bool, source: ControlSource) {
        // Write failures are logged by the actuator and leave the state as is
        if let Ok(transition) = self.fan.apply(&mut self.state, desired, source)
            && let Some(on) = transition.fan_on()
        {
            self.publish_fan_state(on).await;
        }
    }

    async fn publish_fan_state(&self, on: bool) {
        if let Err(e) = self.gateway.publish_fan_state(on).await {
            error!("Failed to publish fan state: {}", e);
        }
    }

    async fn publish_auto_mode(&self) {
        if let Err(e) = self.gateway.publish_auto_mode(self.state.auto_mode).await {
            error!("Failed to publish auto mode state: {}", e);
        }
    }

    /// Best-effort shutdown sequence. Every step runs even if an earlier one
    /// failed.
    pub async fn shutdown(&mut self) {
        self.enter(Phase::ShuttingDown);

        if let Err(e) = self.fan.force_off(&mut self.state) {
            error!("Error turning fan off during shutdown: {}", e);
        }
        if let Err(e) = self.gateway.shutdown().await {
            error!("Error during MQTT cleanup: {}", e);
        }
        self.fan.release();

        self.enter(Phase::Stopped);
        info!("Cleanup complete");
    }
}

/// Wait out the configured startup delay unless cancelled first.
///
/// Returns `false` if the delay was interrupted.
pub async fn startup_delay(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return true;
    }
    info!("Startup delay: {} seconds", delay.as_secs());
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulated::{ClimateScript, FanProbe};
    use crate::hardware::{SimulatedClimate, SimulatedFan};
    use crate::mqtt::gateway::recording::{Call, RecordingPublisher};
    use crate::mqtt::{MqttMessage, Topics};

    struct Harness {
        monitor: Monitor<RecordingPublisher>,
        script: ClimateScript,
        fan: FanProbe,
        publisher: RecordingPublisher,
    }

    fn harness() -> Harness {
        let mut config = Config::default();
        config.thresholds.max_fan_runtime = Duration::from_secs(600);
        config.monitor.publish_interval = Duration::from_secs(30);

        let climate = SimulatedClimate::new(20.0, 40.0);
        let script = climate.script();
        let fan_output = SimulatedFan::new();
        let fan = fan_output.probe();
        let publisher = RecordingPublisher::default();

        let reader = SensorReader::new(
            Box::new(climate),
            config.monitor.temperature_unit,
            config.monitor.sensor_timeout,
        );
        let actuator = FanActuator::new(Box::new(fan_output), config.thresholds.max_fan_runtime);
        let gateway = Gateway::new(
            publisher.clone(),
            Topics::new(&config.mqtt.topic_prefix),
            config.discovery.clone(),
            config.monitor.temperature_unit,
            config.mqtt.retain,
        );

        Harness {
            monitor: Monitor::new(&config, reader, actuator, gateway),
            script,
            fan,
            publisher,
        }
    }

    fn publishes_under(call: &Call, prefix: &str) -> bool {
        matches!(call, Call::Publish { topic, .. } if topic.starts_with(prefix))
    }

    fn is_retained_config(call: &Call) -> bool {
        matches!(call, Call::Publish { topic, retain: true, .. } if topic.ends_with("/config"))
    }

    fn command(topic: &str, payload: &str) -> MqttEvent {
        MqttEvent::Message(MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_hysteresis_through_ticks() {
        let mut h = harness();
        for t in [27.0, 29.0, 26.0, 24.0] {
            h.script.push_reading(t, 45.0);
        }

        h.monitor.tick().await;
        assert!(!h.monitor.state().fan_on);
        h.monitor.tick().await;
        assert!(h.monitor.state().fan_on);
        h.monitor.tick().await;
        assert!(h.monitor.state().fan_on);
        h.monitor.tick().await;
        assert!(!h.monitor.state().fan_on);

        assert_eq!(h.fan.writes(), vec![true, false]);
        assert_eq!(h.publisher.published_to("enclosure/fan/state"), vec!["ON", "OFF"]);
        assert_eq!(h.monitor.state().last_temperature, Some(24.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_evaluation_publishes_once() {
        let mut h = harness();
        h.script.push_reading(30.0, 45.0);
        h.script.push_reading(31.0, 45.0);

        h.monitor.tick().await;
        h.monitor.tick().await;

        assert_eq!(h.fan.write_count(), 1);
        assert_eq!(h.publisher.published_to("enclosure/fan/state"), vec!["ON"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_temperature_forces_fan_on() {
        let mut h = harness();
        h.script.push_reading(36.0, 45.0);

        h.monitor.tick().await;
        assert!(h.monitor.state().fan_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_override_disables_auto_mode() {
        let mut h = harness();

        h.monitor.handle_event(command("enclosure/fan/set", "ON")).await;
        assert!(!h.monitor.state().auto_mode);
        assert!(h.monitor.state().fan_on);
        assert_eq!(h.publisher.published_to("enclosure/fan_auto/state"), vec!["OFF"]);

        // Well below the off threshold, but manual mode bypasses the controller
        h.script.push_reading(18.0, 45.0);
        h.monitor.tick().await;
        assert!(h.monitor.state().fan_on);
        assert_eq!(h.fan.writes(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_mode_command() {
        let mut h = harness();

        h.monitor.handle_event(command("enclosure/fan_auto/set", "OFF")).await;
        assert!(!h.monitor.state().auto_mode);
        h.monitor.handle_event(command("enclosure/fan_auto/set", "ON")).await;
        assert!(h.monitor.state().auto_mode);

        assert_eq!(
            h.publisher.published_to("enclosure/fan_auto/state"),
            vec!["OFF", "ON"]
        );
        assert_eq!(h.fan.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_command_is_ignored() {
        let mut h = harness();

        h.monitor.handle_event(command("enclosure/fan/set", "MAYBE")).await;
        assert!(h.monitor.state().auto_mode);
        assert!(h.publisher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_cutoff_in_manual_mode() {
        let mut h = harness();
        h.monitor.handle_event(command("enclosure/fan/set", "ON")).await;

        tokio::time::advance(Duration::from_secs(601)).await;
        h.script.push_reading(30.0, 45.0);
        h.monitor.tick().await;

        assert!(!h.monitor.state().fan_on);
        assert_eq!(h.fan.writes(), vec![true, false]);
        assert_eq!(h.publisher.published_to("enclosure/fan/state"), vec!["ON", "OFF"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_failure_skips_control_and_telemetry() {
        let mut h = harness();
        h.script.push_failure();

        h.monitor.tick().await;

        assert_eq!(h.fan.write_count(), 0);
        assert!(h.publisher.calls().is_empty());
        assert_eq!(h.monitor.state().last_temperature, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_respects_publish_interval() {
        let mut h = harness();
        for _ in 0..3 {
            h.script.push_reading(22.0, 45.0);
        }

        h.monitor.tick().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        h.monitor.tick().await;
        tokio::time::advance(Duration::from_secs(25)).await;
        h.monitor.tick().await;

        assert_eq!(h.publisher.published_to("enclosure/temperature/state").len(), 2);
        assert_eq!(h.publisher.published_to("enclosure/humidity/state").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_republishes_discovery() {
        let mut h = harness();

        h.monitor.handle_event(MqttEvent::Connected).await;
        h.monitor.handle_event(MqttEvent::Connected).await;

        let discovery = h
            .publisher
            .calls()
            .iter()
            .filter(|call| is_retained_config(call))
            .count();
        assert_eq!(discovery, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_goes_offline() {
        let mut h = harness();
        h.monitor.handle_event(command("enclosure/fan/set", "ON")).await;
        h.publisher.clear();

        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reason = h.monitor.run(rx, cancel).await;
        assert_eq!(reason, StopReason::Cancelled);
        assert_eq!(h.monitor.phase(), Phase::Stopped);

        let calls = h.publisher.calls();
        // Discovery precedes every state publish
        let first_state = calls
            .iter()
            .position(|call| publishes_under(call, "enclosure/"))
            .unwrap();
        assert!(
            calls[..first_state]
                .iter()
                .filter(|call| matches!(call, Call::Publish { .. }))
                .all(|call| publishes_under(call, "homeassistant/"))
        );

        assert_eq!(
            &calls[calls.len() - 2..],
            &[
                Call::Publish {
                    topic: "enclosure/availability".to_string(),
                    payload: "offline".to_string(),
                    retain: true,
                },
                Call::Disconnect,
            ]
        );
        assert!(!h.fan.level());
        assert!(h.fan.is_released());
        assert!(!h.monitor.state().fan_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_event_stream_shuts_down() {
        let mut h = harness();
        let (tx, rx) = mpsc::channel(8);
        drop(tx);

        let reason = h.monitor.run(rx, CancellationToken::new()).await;
        assert_eq!(reason, StopReason::EventStreamClosed);
        let availability = h.publisher.published_to("enclosure/availability");
        assert_eq!(availability.last().map(String::as_str), Some("offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_delay() {
        let cancel = CancellationToken::new();
        assert!(startup_delay(Duration::ZERO, &cancel).await);
        assert!(startup_delay(Duration::from_secs(3), &cancel).await);

        cancel.cancel();
        assert!(!startup_delay(Duration::from_secs(3), &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_completes_when_broker_unreachable() {
        let mut h = harness();
        h.monitor.handle_event(command("enclosure/fan/set", "ON")).await;
        h.publisher.clear();
        h.publisher.set_failing(true);

        h.monitor.shutdown().await;

        assert_eq!(h.publisher.calls(), vec![Call::Disconnect]);
        assert!(!h.fan.level());
        assert!(h.fan.is_released());
        assert_eq!(h.monitor.phase(), Phase::Stopped);
    }
}
