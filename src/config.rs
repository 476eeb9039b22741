//! Configuration system for the LNS uplink bridge
//!
//! The bridge is configured from a single TOML file. Broker credentials and the
//! decode API token are never stored in the file; the file names the
//! environment variables that hold them, resolved at connect/request time.
//!
//! Property mappings are flat string tables:
//!
//! ```toml
//! [sensor_property_map]
//! STATUS_OPEN = "Features.ValvePosition.Properties.Status.LogicalPosition.Open"
//!
//! [sensor_property_meta]
//! Status = "Features.ValvePosition.Properties.Valid"
//! StartTime = "Features.ValvePosition.Properties.Timestamp"
//! ```

use crate::protocol::topics::{normalize_topic, validate_topic_filter, validate_topic_name};
use crate::transport::mqtt::connection::parse_broker_url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub mqtt_input: MqttInputSection,
    pub mqtt_output: MqttOutputSection,
    /// Optional second output carrying aggregated historian write requests
    pub write_output: Option<WriteOutputSection>,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    pub decoder: DecoderSection,
    #[serde(default)]
    pub sensors: SensorsSection,
    #[serde(default)]
    pub sensor_property_map: HashMap<String, String>,
    #[serde(default)]
    pub sensor_property_meta: HashMap<String, String>,
    #[serde(default)]
    pub sensor_property_timestamp: HashMap<String, String>,
    #[serde(default)]
    pub sensor_property_status: HashMap<String, String>,
    /// Explicit field name -> wire name aliases for path resolution
    #[serde(default)]
    pub field_aliases: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Broker connection settings shared by both clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL (`mqtt://`, `tcp://`, `mqtts://`, `ssl://` or bare `host:port`)
    pub broker_url: String,
    /// Client identifier; generated when empty
    #[serde(default)]
    pub client_id: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_true")]
    pub clean_session: bool,
}

/// Input side: where uplinks are consumed from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttInputSection {
    #[serde(flatten)]
    pub connection: MqttSection,
    /// Uplink topic filter, e.g. `application/+/device/+/event/up`
    pub topic: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
}

/// Output side: where flat readings are published
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttOutputSection {
    #[serde(flatten)]
    pub connection: MqttSection,
    pub topic: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

/// Historian write output, published on the output broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteOutputSection {
    pub topic: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    /// Wrap the payload in a one-element JSON array
    #[serde(default)]
    pub as_array: bool,
}

/// Bounded waits for broker operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSection {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    /// Steady-state publish/subscribe acknowledgment wait
    #[serde(default = "default_operation_secs")]
    pub operation_secs: u64,
    /// Per-topic acknowledgment wait while replaying subscriptions after reconnect
    #[serde(default = "default_resubscribe_secs")]
    pub resubscribe_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            operation_secs: default_operation_secs(),
            resubscribe_secs: default_resubscribe_secs(),
        }
    }
}

impl TimeoutSection {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_secs(self.operation_secs)
    }

    pub fn resubscribe(&self) -> Duration {
        Duration::from_secs(self.resubscribe_secs)
    }
}

/// Reconnection backoff policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Unset means retry forever
    pub max_attempts: Option<u32>,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_ms: default_backoff_ms(),
            sustained_delay_ms: default_sustained_delay_ms(),
        }
    }
}

/// Decode API settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecoderSection {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_payload_field")]
    pub payload_field: String,
    #[serde(default = "default_decoder_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auth_type: AuthType,
    /// Environment variable containing the API token
    pub auth_token_env: Option<String>,
    #[serde(default = "default_auth_header_key")]
    pub auth_header_key: String,
    #[serde(default)]
    pub mock: MockSection,
}

/// How the decode API token is presented
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `<auth_header_key>: <token>`
    Header,
}

/// Deterministic fixture mode for the decoder
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MockSection {
    #[serde(default)]
    pub enabled: bool,
    /// Inline fixture; takes priority over `file`
    pub json: Option<String>,
    pub file: Option<String>,
}

/// Sensor directory location
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SensorsSection {
    pub map_file: Option<String>,
}

/// Logging defaults, overridden by `LOG_LEVEL` / `LOG_FORMAT`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_keep_alive() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_qos() -> u8 {
    1
}

fn default_connect_secs() -> u64 {
    30
}

fn default_operation_secs() -> u64 {
    10
}

fn default_resubscribe_secs() -> u64 {
    30
}

fn default_backoff_ms() -> Vec<u64> {
    vec![250, 500, 1000, 2000, 5000]
}

fn default_sustained_delay_ms() -> u64 {
    5000
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_payload_field() -> String {
    "payload".to_string()
}

fn default_decoder_timeout() -> u64 {
    10
}

fn default_auth_header_key() -> String {
    "X-API-Key".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to parse sensor map: {0}")]
    SensorMapParse(#[from] serde_json::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file, normalize topics and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, normalize topics and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: BridgeConfig = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        self.mqtt_input.topic = normalize_topic(&self.mqtt_input.topic);
        self.mqtt_output.topic = normalize_topic(&self.mqtt_output.topic);
        if let Some(write) = self.write_output.as_mut() {
            write.topic = normalize_topic(&write.topic);
        }
        // An empty write topic is the same as no write output
        if self
            .write_output
            .as_ref()
            .is_some_and(|write| write.topic.is_empty())
        {
            self.write_output = None;
        }
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (side, connection) in [
            ("mqtt_input", &self.mqtt_input.connection),
            ("mqtt_output", &self.mqtt_output.connection),
        ] {
            if connection.broker_url.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "[{side}] broker_url must be set"
                )));
            }
            parse_broker_url(&connection.broker_url)
                .map_err(|e| ConfigError::InvalidConfig(format!("[{side}] {e}")))?;
        }

        validate_topic_filter(&self.mqtt_input.topic)
            .map_err(|e| ConfigError::InvalidConfig(format!("[mqtt_input] topic: {e}")))?;
        validate_topic_name(&self.mqtt_output.topic)
            .map_err(|e| ConfigError::InvalidConfig(format!("[mqtt_output] topic: {e}")))?;
        if let Some(write) = &self.write_output {
            validate_topic_name(&write.topic)
                .map_err(|e| ConfigError::InvalidConfig(format!("[write_output] topic: {e}")))?;
            validate_qos("write_output", write.qos)?;
        }

        validate_qos("mqtt_input", self.mqtt_input.qos)?;
        validate_qos("mqtt_output", self.mqtt_output.qos)?;

        if self.timeouts.resubscribe_secs < self.timeouts.operation_secs {
            return Err(ConfigError::InvalidConfig(
                "[timeouts] resubscribe_secs must be at least operation_secs".to_string(),
            ));
        }
        if self.timeouts.operation_secs == 0 || self.timeouts.connect_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "[timeouts] values must be greater than 0".to_string(),
            ));
        }

        if !self.decoder.mock.enabled && self.decoder.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "[decoder] base_url must be set unless mock mode is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt_input]
broker_url = "mqtt://localhost:1883"
topic = "application/+/device/+/event/up"

[mqtt_output]
broker_url = "mqtt://localhost:1883"
topic = "lora/output"

[decoder]
base_url = "http://localhost:8080/decode"

[sensor_property_map]
OPEN = "Features.ValvePosition.Properties.Status.LogicalPosition.Open"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl MqttSection {
    /// Get MQTT username from environment variable
    pub fn get_username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

impl DecoderSection {
    /// Get the decode API token from its environment variable
    pub fn get_auth_token(&self) -> Option<String> {
        get_env_var_optional(self.auth_token_env.as_ref())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn validate_qos(section: &str, qos: u8) -> Result<(), ConfigError> {
    if qos > 2 {
        return Err(ConfigError::InvalidConfig(format!(
            "[{section}] qos must be 0, 1 or 2, got {qos}"
        )));
    }
    Ok(())
}

/// Sensor directory: device names by EUI and historian tag ids by sensor id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorDirectory {
    pub names_by_dev_eui: HashMap<String, String>,
    pub tag_ids: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ExtendedSensorFile {
    #[serde(default)]
    sensor_names: HashMap<String, String>,
    #[serde(default)]
    tag_map: HashMap<String, String>,
}

impl SensorDirectory {
    /// Load the sensor directory from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse either the extended `{sensor_names, tag_map}` schema or a flat
    /// `{devEUI: name}` map
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(extended) = serde_json::from_str::<ExtendedSensorFile>(content) {
            if !extended.sensor_names.is_empty() || !extended.tag_map.is_empty() {
                return Ok(Self {
                    names_by_dev_eui: extended.sensor_names,
                    tag_ids: extended.tag_map,
                });
            }
        }

        let names_by_dev_eui: HashMap<String, String> = serde_json::from_str(content)?;
        Ok(Self {
            names_by_dev_eui,
            tag_ids: HashMap::new(),
        })
    }

    /// Historian tag id for a sensor identifier (`<base>-<suffix>`)
    pub fn tag_id(&self, sensor_id: &str) -> Option<&str> {
        self.tag_ids
            .get(sensor_id)
            .map(String::as_str)
            .filter(|tag| !tag.is_empty())
    }
}
