//! Topic layout and payload vocabulary of the MQTT interface.

use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// `ON`/`OFF` payload used by the switch state and command topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, IntoStaticStr)]
pub enum SwitchPayload {
    #[strum(serialize = "ON")]
    On,
    #[strum(serialize = "OFF")]
    Off,
}

impl SwitchPayload {
    pub fn is_on(&self) -> bool {
        matches!(self, SwitchPayload::On)
    }
}

impl From<bool> for SwitchPayload {
    fn from(on: bool) -> Self {
        if on { SwitchPayload::On } else { SwitchPayload::Off }
    }
}

/// Payload of the retained availability topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Availability {
    Online,
    Offline,
}

/// Control command received on one of the `*/set` topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetFan(bool),
    SetAutoMode(bool),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("not a command topic: {0}")]
    UnknownTopic(String),

    #[error("invalid payload {payload:?} on {topic}")]
    InvalidPayload { topic: String, payload: String },
}

/// All topics under the configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub availability: String,
    pub fan_state: String,
    pub fan_set: String,
    pub auto_state: String,
    pub auto_set: String,
    pub temperature_state: String,
    pub humidity_state: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        let topic = |suffix: &str| format!("{}/{}", prefix, suffix);
        Self {
            availability: topic("availability"),
            fan_state: topic("fan/state"),
            fan_set: topic("fan/set"),
            auto_state: topic("fan_auto/state"),
            auto_set: topic("fan_auto/set"),
            temperature_state: topic("temperature/state"),
            humidity_state: topic("humidity/state"),
        }
    }

    /// Topics the daemon subscribes to.
    pub fn command_topics(&self) -> [&str; 2] {
        [&self.fan_set, &self.auto_set]
    }

    /// Map an inbound message to a [`Command`].
    pub fn parse_command(&self, topic: &str, payload: &str) -> Result<Command, CommandError> {
        let build: fn(bool) -> Command = if topic == self.fan_set {
            Command::SetFan
        } else if topic == self.auto_set {
            Command::SetAutoMode
        } else {
            return Err(CommandError::UnknownTopic(topic.to_string()));
        };

        payload
            .trim()
            .parse::<SwitchPayload>()
            .map(|value| build(value.is_on()))
            .map_err(|_| CommandError::InvalidPayload {
                topic: topic.to_string(),
                payload: payload.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        let topics = Topics::new("enclosure");
        assert_eq!(topics.availability, "enclosure/availability");
        assert_eq!(topics.fan_state, "enclosure/fan/state");
        assert_eq!(topics.auto_set, "enclosure/fan_auto/set");
        assert_eq!(topics.temperature_state, "enclosure/temperature/state");
        assert_eq!(topics.humidity_state, "enclosure/humidity/state");
        assert_eq!(
            topics.command_topics(),
            ["enclosure/fan/set", "enclosure/fan_auto/set"]
        );
    }

    #[test]
    fn test_parse_commands() {
        let topics = Topics::new("rack");
        assert_eq!(
            topics.parse_command("rack/fan/set", "ON"),
            Ok(Command::SetFan(true))
        );
        assert_eq!(
            topics.parse_command("rack/fan/set", "OFF\n"),
            Ok(Command::SetFan(false))
        );
        assert_eq!(
            topics.parse_command("rack/fan_auto/set", "ON"),
            Ok(Command::SetAutoMode(true))
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let topics = Topics::new("rack");
        assert!(matches!(
            topics.parse_command("rack/fan/set", "on"),
            Err(CommandError::InvalidPayload { .. })
        ));
        assert_eq!(
            topics.parse_command("rack/fan/state", "ON"),
            Err(CommandError::UnknownTopic("rack/fan/state".to_string()))
        );
    }

    #[test]
    fn test_payload_strings() {
        assert_eq!(SwitchPayload::from(true).as_ref(), "ON");
        assert_eq!(SwitchPayload::from(false).to_string(), "OFF");
        assert_eq!(Availability::Online.as_ref(), "online");
        assert_eq!(Availability::Offline.to_string(), "offline");
    }
}
