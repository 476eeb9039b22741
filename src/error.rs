//! Error types for the LNS uplink bridge
//!
//! Each layer has its own `thiserror` enum ([`ConfigError`](crate::config::ConfigError),
//! [`DecoderError`](crate::decoder::DecoderError), [`MqttError`](crate::transport::mqtt::MqttError));
//! [`BridgeError`] is the umbrella type returned by message processing and
//! orchestration.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Inbound envelope is not valid JSON for the LNS message shape
    #[error("Invalid LNS envelope: {0}")]
    Decode(#[from] serde_json::Error),

    /// Required identity or payload fields are missing or malformed
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Decode API error: {0}")]
    Api(#[from] crate::decoder::DecoderError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::mqtt::MqttError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl BridgeError {
    /// Create validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether the failure concerns a single message (dropped, processing continues)
    pub fn is_message_scoped(&self) -> bool {
        matches!(
            self,
            BridgeError::Decode(_) | BridgeError::Validation { .. } | BridgeError::Api(_)
        )
    }
}

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

static SECRET_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SECRET_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Redact secret-looking values and truncate to 500 bytes
///
/// Applied to text that originates outside the bridge (decode API error
/// bodies) before it reaches logs.
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PAIR.replace_all(message, "${1}=***");
    let mut sanitized = SECRET_PATH
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
