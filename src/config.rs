use crate::error::ConfigError;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Parse the contents of a `.env` file into key/value pairs.
///
/// Blank lines and `#` comments are skipped, values may contain spaces and
/// may be wrapped in single or double quotes.
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim().trim_start_matches("export ").trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let unquoted = ['"', '\'']
                .iter()
                .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
                .unwrap_or(value);
            Some((key.to_string(), unquoted.to_string()))
        })
        .collect()
}

/// Load variables from a `.env` file in the working directory.
///
/// Variables already present in the environment take precedence.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

pub fn load_dotenv_from(path: &Path) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    for (key, value) in parse_dotenv(&content) {
        if std::env::var_os(&key).is_none() {
            // SAFETY: only called from `main` before the async runtime is built
            unsafe { std::env::set_var(&key, value) };
        }
    }
}

/// Unit used for readings, thresholds and the discovery documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }

    /// Convert a sensor value (always Celsius) into this unit.
    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }
}

impl FromStr for TemperatureUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "°c" | "celsius" => Ok(TemperatureUnit::Celsius),
            "f" | "°f" | "fahrenheit" => Ok(TemperatureUnit::Fahrenheit),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub discovery: DiscoveryConfig,
    pub hardware: HardwareConfig,
    pub thresholds: Thresholds,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prefix for every state, command and availability topic.
    pub topic_prefix: String,
    pub qos: u8,
    /// Retain flag for state and telemetry publishes. Availability and
    /// discovery are always retained.
    pub retain: bool,
    pub keep_alive: Duration,
}

impl MqttConfig {
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }
}

/// Home Assistant device descriptor shared by all discovery documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub sw_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub prefix: String,
    pub device_id: String,
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// BCM pin number driving the fan relay.
    pub fan_pin: u8,
    pub fan_active_low: bool,
    pub i2c_bus: u8,
    pub i2c_address: u16,
}

/// Fan control thresholds, in the configured [`TemperatureUnit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub on: f64,
    pub off: f64,
    pub critical: f64,
    pub max_fan_runtime: Duration,
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.off < self.on && self.on <= self.critical) {
            return Err(ConfigError::ThresholdOrder {
                off: self.off,
                on: self.on,
                critical: self.critical,
            });
        }
        if self.max_fan_runtime.is_zero() {
            return Err(ConfigError::ZeroDuration("FAN_MAX_RUNTIME_SECS"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub temperature_unit: TemperatureUnit,
    /// Time between sensor reads and control evaluations.
    pub update_interval: Duration,
    /// Minimum time between telemetry publishes.
    pub publish_interval: Duration,
    pub startup_delay: Duration,
    pub sensor_timeout: Duration,
    pub publish_timeout: Duration,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

const DEFAULT_ON_C: f64 = 28.0;
const DEFAULT_OFF_C: f64 = 25.0;
const DEFAULT_CRITICAL_C: f64 = 35.0;

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                client_id: "enclosure-monitor".to_string(),
                username: None,
                password: None,
                topic_prefix: "enclosure".to_string(),
                qos: 1,
                retain: true,
                keep_alive: Duration::from_secs(60),
            },
            discovery: DiscoveryConfig {
                enabled: true,
                prefix: "homeassistant".to_string(),
                device_id: "enclosure".to_string(),
                device: DeviceInfo {
                    identifiers: vec!["enclosure".to_string()],
                    name: "Enclosure Monitor".to_string(),
                    model: "SHT31 Fan Controller".to_string(),
                    manufacturer: "Raspberry Pi".to_string(),
                    sw_version: env!("CARGO_PKG_VERSION").to_string(),
                },
            },
            hardware: HardwareConfig {
                fan_pin: 18,
                fan_active_low: false,
                i2c_bus: 1,
                i2c_address: 0x44,
            },
            thresholds: Thresholds {
                on: DEFAULT_ON_C,
                off: DEFAULT_OFF_C,
                critical: DEFAULT_CRITICAL_C,
                max_fan_runtime: Duration::from_secs(3600),
            },
            monitor: MonitorConfig {
                temperature_unit: TemperatureUnit::Celsius,
                update_interval: Duration::from_secs(5),
                publish_interval: Duration::from_secs(30),
                startup_delay: Duration::from_secs(0),
                sensor_timeout: Duration::from_secs(2),
                publish_timeout: Duration::from_secs(5),
                connect_timeout: Duration::from_secs(10),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}

fn parse<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

fn parse_bool(key: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value: raw }),
    }
}

fn parse_secs(key: &'static str, raw: String) -> Result<Duration, ConfigError> {
    parse::<u64>(key, raw).map(Duration::from_secs)
}

/// Accepts decimal (`68`) or hex (`0x44`) addresses.
fn parse_address(key: &'static str, raw: String) -> Result<u16, ConfigError> {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => trimmed.parse().ok(),
    };
    parsed.ok_or(ConfigError::InvalidValue { key, value: raw })
}

impl Config {
    /// Build the configuration from the process environment and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup and validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // MQTT
        if let Some(v) = lookup("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = v;
        }
        if let Some(v) = lookup("MQTT_BROKER_PORT") {
            config.mqtt.broker_port = parse("MQTT_BROKER_PORT", v)?;
        }
        if let Some(v) = lookup("MQTT_CLIENT_ID") {
            config.mqtt.client_id = v;
        }
        config.mqtt.username = lookup("MQTT_USERNAME").filter(|v| !v.is_empty());
        config.mqtt.password = lookup("MQTT_PASSWORD").filter(|v| !v.is_empty());
        if let Some(v) = lookup("MQTT_TOPIC_PREFIX") {
            config.mqtt.topic_prefix = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("MQTT_QOS") {
            config.mqtt.qos = parse("MQTT_QOS", v)?;
        }
        if let Some(v) = lookup("MQTT_RETAIN") {
            config.mqtt.retain = parse_bool("MQTT_RETAIN", v)?;
        }
        if let Some(v) = lookup("MQTT_KEEPALIVE_SECS") {
            config.mqtt.keep_alive = parse_secs("MQTT_KEEPALIVE_SECS", v)?;
        }

        // Home Assistant discovery
        if let Some(v) = lookup("HA_DISCOVERY_ENABLED") {
            config.discovery.enabled = parse_bool("HA_DISCOVERY_ENABLED", v)?;
        }
        if let Some(v) = lookup("HA_DISCOVERY_PREFIX") {
            config.discovery.prefix = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("DEVICE_ID") {
            config.discovery.device.identifiers = vec![v.clone()];
            config.discovery.device_id = v;
        }
        if let Some(v) = lookup("DEVICE_NAME") {
            config.discovery.device.name = v;
        }
        if let Some(v) = lookup("DEVICE_MODEL") {
            config.discovery.device.model = v;
        }
        if let Some(v) = lookup("DEVICE_MANUFACTURER") {
            config.discovery.device.manufacturer = v;
        }

        // Hardware
        if let Some(v) = lookup("FAN_PIN") {
            config.hardware.fan_pin = parse("FAN_PIN", v)?;
        }
        if let Some(v) = lookup("FAN_ACTIVE_LOW") {
            config.hardware.fan_active_low = parse_bool("FAN_ACTIVE_LOW", v)?;
        }
        if let Some(v) = lookup("I2C_BUS") {
            config.hardware.i2c_bus = parse("I2C_BUS", v)?;
        }
        if let Some(v) = lookup("I2C_ADDRESS") {
            config.hardware.i2c_address = parse_address("I2C_ADDRESS", v)?;
        }

        // Thresholds follow the unit, so the unit is resolved first
        if let Some(v) = lookup("TEMP_UNIT") {
            config.monitor.temperature_unit = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "TEMP_UNIT", value: v })?;
        }
        let unit = config.monitor.temperature_unit;
        config.thresholds.on = unit.from_celsius(DEFAULT_ON_C);
        config.thresholds.off = unit.from_celsius(DEFAULT_OFF_C);
        config.thresholds.critical = unit.from_celsius(DEFAULT_CRITICAL_C);
        if let Some(v) = lookup("TEMP_THRESHOLD_ON") {
            config.thresholds.on = parse("TEMP_THRESHOLD_ON", v)?;
        }
        if let Some(v) = lookup("TEMP_THRESHOLD_OFF") {
            config.thresholds.off = parse("TEMP_THRESHOLD_OFF", v)?;
        }
        if let Some(v) = lookup("TEMP_CRITICAL") {
            config.thresholds.critical = parse("TEMP_CRITICAL", v)?;
        }
        if let Some(v) = lookup("FAN_MAX_RUNTIME_SECS") {
            config.thresholds.max_fan_runtime = parse_secs("FAN_MAX_RUNTIME_SECS", v)?;
        }

        // Loop timing
        if let Some(v) = lookup("UPDATE_INTERVAL_SECS") {
            config.monitor.update_interval = parse_secs("UPDATE_INTERVAL_SECS", v)?;
        }
        if let Some(v) = lookup("PUBLISH_INTERVAL_SECS") {
            config.monitor.publish_interval = parse_secs("PUBLISH_INTERVAL_SECS", v)?;
        }
        if let Some(v) = lookup("STARTUP_DELAY_SECS") {
            config.monitor.startup_delay = parse_secs("STARTUP_DELAY_SECS", v)?;
        }

        // Logging
        if let Some(v) = lookup("LOG_LEVEL") {
            config.logging.level = v.trim().to_ascii_lowercase();
        }
        config.logging.file = lookup("LOG_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;

        if self.mqtt.qos > 2 {
            return Err(ConfigError::InvalidQos(self.mqtt.qos));
        }
        if self.mqtt.topic_prefix.is_empty() {
            return Err(ConfigError::Empty("MQTT_TOPIC_PREFIX"));
        }
        if self.mqtt.broker_host.is_empty() {
            return Err(ConfigError::Empty("MQTT_BROKER_HOST"));
        }
        if self.discovery.enabled && self.discovery.device_id.is_empty() {
            return Err(ConfigError::Empty("DEVICE_ID"));
        }
        if self.monitor.update_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("UPDATE_INTERVAL_SECS"));
        }
        if self.monitor.publish_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("PUBLISH_INTERVAL_SECS"));
        }
        if self.mqtt.keep_alive.is_zero() {
            return Err(ConfigError::ZeroDuration("MQTT_KEEPALIVE_SECS"));
        }
        Ok(())
    }
}
