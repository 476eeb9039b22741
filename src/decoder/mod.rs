//! Decode collaborator
//!
//! Turns a device name and a hex-encoded uplink payload into a loosely-typed
//! JSON tree. [`HttpDecoder`] calls the remote decode API; [`FixtureDecoder`]
//! returns a fixed tree for offline runs and tests.

pub mod fixture;
pub mod http;

pub use fixture::FixtureDecoder;
pub use http::{DecoderAuth, HttpDecoder, HttpDecoderConfig};

use crate::config::DecoderSection;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Decode API errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecoderError {
    #[error("Decoder not configured: {0}")]
    NotConfigured(String),
    #[error("Invalid decoder URL: {0}")]
    InvalidUrl(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Decode API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Fixture error: {0}")]
    Fixture(String),
}

/// Decodes one uplink payload
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn decode(&self, device_name: &str, hex_payload: &str) -> Result<Value, DecoderError>;
}

/// Build the decoder selected by configuration
///
/// Fixture mode wins when `[decoder.mock].enabled` is set; otherwise the HTTP
/// decoder is built with the token read from `auth_token_env`.
pub fn from_config(section: &DecoderSection) -> Result<Arc<dyn Decoder>, DecoderError> {
    if section.mock.enabled {
        let decoder = FixtureDecoder::from_config(&section.mock)?;
        info!("Decoder running in fixture mode");
        return Ok(Arc::new(decoder));
    }

    let config = HttpDecoderConfig::from_section(section);
    let decoder = HttpDecoder::new(config)?;
    info!(base_url = %section.base_url, "Decoder using HTTP API");
    Ok(Arc::new(decoder))
}
