//! Pure connection state management for the MQTT client
//!
//! Connection states, reconnection backoff, operation timeouts, error types
//! and broker option construction.

use crate::config::{MqttSection, ReconnectSection, TimeoutSection};
use rumqttc::{MqttOptions, QoS, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial connect in progress
    Connecting,
    /// ConnAck received; publish and subscribe are allowed
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds, indexed by attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![250, 500, 1000, 2000, 5000],
            sustained_delay: 5000,
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            backoff_pattern: section.backoff_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

impl ReconnectConfig {
    /// Calculate the maximum total time for all reconnection attempts
    /// Returns None if unlimited retries are configured
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Backoff delay for a 1-based attempt number
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Bounded waits for client operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationTimeouts {
    /// Initial ConnAck wait
    pub connect: Duration,
    /// Steady-state publish/subscribe acknowledgment wait
    pub operation: Duration,
    /// Per-topic acknowledgment wait during resubscription replay
    pub resubscribe: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            operation: Duration::from_secs(10),
            resubscribe: Duration::from_secs(30),
        }
    }
}

impl From<&TimeoutSection> for OperationTimeouts {
    fn from(section: &TimeoutSection) -> Self {
        Self {
            connect: section.connect(),
            operation: section.operation(),
            resubscribe: section.resubscribe(),
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] rumqttc::ClientError),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] rumqttc::ClientError),
    #[error("Broker rejected subscription to {topic}")]
    SubscribeRejected { topic: String },
    #[error("Timed out waiting for {operation}")]
    Timeout { operation: String },
    #[error("Operation cancelled by shutdown")]
    Cancelled,
    #[error("Connection lost before {operation} was acknowledged")]
    ConnectionLost { operation: String },
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] crate::protocol::topics::TopicError),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Map a numeric QoS level to the rumqttc enum
pub fn qos_from_u8(level: u8) -> Result<QoS, MqttError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttError::InvalidQos(other)),
    }
}

/// Broker endpoint extracted from a configured URL
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `mqtt://`, `tcp://`, `mqtts://`, `ssl://` or bare `host:port`
pub fn parse_broker_url(raw: &str) -> Result<BrokerEndpoint, MqttError> {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("mqtt://{trimmed}")
    };

    let url = Url::parse(&with_scheme).map_err(|_| MqttError::InvalidBrokerUrl(raw.to_string()))?;
    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(raw.to_string())),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(raw.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Client id from configuration, generated when empty
pub fn resolve_client_id(configured: &str, role: &str) -> String {
    let configured = configured.trim();
    if configured.is_empty() {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("lora-bridge-{role}-{}", &suffix[..8])
    } else {
        configured.to_string()
    }
}

/// Build broker options from a connection section
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let endpoint = parse_broker_url(&config.broker_url)?;
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.get_username() {
        let password = config.get_password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    // rumqttc rejects keep-alive intervals below 5 seconds
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    mqtt_options.set_clean_session(config.clean_session);
    mqtt_options.set_max_packet_size(256 * 1024, 256 * 1024);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mqtt_config(broker_url: &str) -> MqttSection {
        MqttSection {
            broker_url: broker_url.to_string(),
            client_id: String::new(),
            username_env: None,
            password_env: None,
            keep_alive_secs: 30,
            clean_session: true,
        }
    }

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.backoff_pattern, vec![250, 500, 1000, 2000, 5000]);
        assert_eq!(config.sustained_delay, 5000);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100],
            sustained_delay: 250,
        };

        assert_eq!(config.calculate_backoff_delay(1), 25);
        assert_eq!(config.calculate_backoff_delay(2), 50);
        assert_eq!(config.calculate_backoff_delay(3), 100);
        assert_eq!(config.calculate_backoff_delay(4), 250);
        assert_eq!(config.calculate_backoff_delay(100), 250);
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            backoff_pattern: Vec::new(),
            sustained_delay: 40,
        };
        assert_eq!(config.calculate_backoff_delay(1), 40);
        assert_eq!(config.calculate_max_total_time(), Some(120));
    }

    #[test]
    fn test_calculate_max_total_time_unlimited() {
        assert_eq!(ReconnectConfig::default().calculate_max_total_time(), None);
    }

    #[test]
    fn test_reconnect_config_from_section() {
        let section = ReconnectSection {
            max_attempts: Some(4),
            backoff_ms: vec![10, 20],
            sustained_delay_ms: 30,
        };
        let config = ReconnectConfig::from(&section);
        assert_eq!(config.max_attempts, Some(4));
        assert_eq!(config.calculate_backoff_delay(3), 30);
    }

    #[test]
    fn test_timeouts_from_section() {
        let timeouts = OperationTimeouts::from(&TimeoutSection::default());
        assert_eq!(timeouts.operation, Duration::from_secs(10));
        assert_eq!(timeouts.resubscribe, Duration::from_secs(30));
        assert!(timeouts.resubscribe > timeouts.operation);
    }

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(qos_from_u8(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(qos_from_u8(3), Err(MqttError::InvalidQos(3))));
    }

    #[test]
    fn test_parse_broker_url_schemes() {
        let plain = parse_broker_url("mqtt://broker.local").unwrap();
        assert_eq!(plain, BrokerEndpoint { host: "broker.local".into(), port: 1883, tls: false });

        let tcp = parse_broker_url("tcp://10.0.0.5:1884").unwrap();
        assert_eq!(tcp.port, 1884);
        assert!(!tcp.tls);

        let tls = parse_broker_url("mqtts://secure.local").unwrap();
        assert_eq!(tls.port, 8883);
        assert!(tls.tls);

        let ssl = parse_broker_url("ssl://secure.local:9883").unwrap();
        assert_eq!(ssl.port, 9883);
        assert!(ssl.tls);
    }

    #[test]
    fn test_parse_bare_host_port() {
        let endpoint = parse_broker_url(" historian.local:1885 ").unwrap();
        assert_eq!(endpoint.host, "historian.local");
        assert_eq!(endpoint.port, 1885);
        assert!(!endpoint.tls);
    }

    #[test]
    fn test_invalid_broker_urls() {
        assert!(matches!(
            parse_broker_url("http://broker.local"),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
        assert!(parse_broker_url("").is_err());
        assert!(parse_broker_url("mqtt://").is_err());
    }

    #[test]
    fn test_resolve_client_id() {
        assert_eq!(resolve_client_id(" bridge-in ", "input"), "bridge-in");

        let generated = resolve_client_id("", "output");
        assert!(generated.starts_with("lora-bridge-output-"));
        assert_ne!(generated, resolve_client_id("", "output"));
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options("bridge", &test_mqtt_config("mqtt://localhost:1883"));
        let options = options.unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.client_id(), "bridge");
    }

    #[test]
    fn test_configure_mqtt_options_invalid_url() {
        let result = configure_mqtt_options("bridge", &test_mqtt_config("not a url at all"));
        assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_connection_state_equality() {
        assert_eq!(ConnectionState::Connected, ConnectionState::Connected);
        assert_ne!(
            ConnectionState::Connected,
            ConnectionState::Disconnected("test".to_string())
        );
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("refused".to_string()),
            MqttError::SubscribeRejected { topic: "a/b".to_string() },
            MqttError::Timeout { operation: "publish".to_string() },
            MqttError::Cancelled,
            MqttError::InvalidBrokerUrl("x".to_string()),
            MqttError::NotConnected {
                state: ConnectionState::Disconnected("test".to_string()),
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
