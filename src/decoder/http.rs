//! HTTP decode API client

use super::{Decoder, DecoderError};
use crate::config::{AuthType, DecoderSection};
use crate::error::sanitize_error_message;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// How the API token is attached to requests
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderAuth {
    None,
    Bearer(String),
    Header { name: String, token: String },
}

/// HTTP decoder configuration
#[derive(Debug, Clone)]
pub struct HttpDecoderConfig {
    pub base_url: String,
    pub method: String,
    pub payload_field: String,
    pub timeout: Duration,
    pub auth: DecoderAuth,
}

impl HttpDecoderConfig {
    /// Resolve a `[decoder]` section, reading the token from its environment variable
    pub fn from_section(section: &DecoderSection) -> Self {
        let token = section.get_auth_token().filter(|t| !t.is_empty());
        let auth = match (section.auth_type, token) {
            (AuthType::None, _) => DecoderAuth::None,
            (AuthType::Bearer, Some(token)) => DecoderAuth::Bearer(token),
            (AuthType::Header, Some(token)) => DecoderAuth::Header {
                name: section.auth_header_key.clone(),
                token,
            },
            (auth_type, None) => {
                warn!(
                    ?auth_type,
                    env = section.auth_token_env.as_deref().unwrap_or(""),
                    "Decoder auth configured but no token found; sending requests without auth"
                );
                DecoderAuth::None
            }
        };

        Self {
            base_url: section.base_url.clone(),
            method: section.method.clone(),
            payload_field: section.payload_field.clone(),
            timeout: section.timeout(),
            auth,
        }
    }
}

/// Decoder backed by the remote decode API
///
/// Each call sends `{<payload_field>: <hex>}` to `<base_url>/<device name>`.
pub struct HttpDecoder {
    client: Client,
    base_url: Url,
    method: Method,
    payload_field: String,
    auth: DecoderAuth,
}

impl HttpDecoder {
    pub fn new(config: HttpDecoderConfig) -> Result<Self, DecoderError> {
        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| DecoderError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(DecoderError::InvalidUrl(config.base_url));
        }

        let method_name = config.method.trim().to_uppercase();
        let method_name = if method_name.is_empty() {
            "POST".to_string()
        } else {
            method_name
        };
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| DecoderError::NotConfigured(format!("invalid method {method_name}")))?;

        let payload_field = if config.payload_field.is_empty() {
            "payload".to_string()
        } else {
            config.payload_field
        };

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DecoderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            method,
            payload_field,
            auth: config.auth,
        })
    }

    /// Request URL for a device: base URL with the name appended as one path segment
    pub fn device_url(&self, device_name: &str) -> Result<Url, DecoderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DecoderError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(device_name);
        Ok(url)
    }

    fn request_body(&self, hex_payload: &str) -> Value {
        let mut body = Map::new();
        body.insert(
            self.payload_field.clone(),
            Value::String(hex_payload.to_string()),
        );
        Value::Object(body)
    }
}

#[async_trait]
impl Decoder for HttpDecoder {
    async fn decode(&self, device_name: &str, hex_payload: &str) -> Result<Value, DecoderError> {
        let url = self.device_url(device_name)?;
        debug!(%url, device = device_name, bytes = hex_payload.len() / 2, "Calling decode API");

        let mut request = self
            .client
            .request(self.method.clone(), url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(hex_payload));

        request = match &self.auth {
            DecoderAuth::None => request,
            DecoderAuth::Bearer(token) => request.bearer_auth(token),
            DecoderAuth::Header { name, token } => request.header(name.as_str(), token.as_str()),
        };

        let response = request.send().await.map_err(|e| {
            DecoderError::Network(format!(
                "{e} (is_connect: {}, is_timeout: {})",
                e.is_connect(),
                e.is_timeout()
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecoderError::Http {
                status: status.as_u16(),
                body: sanitize_error_message(&body),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| DecoderError::InvalidResponse(e.to_string()))
    }
}
