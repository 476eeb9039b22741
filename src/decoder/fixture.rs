//! Fixed-response decoder for offline runs

use super::{Decoder, DecoderError};
use crate::config::MockSection;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Returns the same decoded tree for every call
#[derive(Debug, Clone)]
pub struct FixtureDecoder {
    response: Value,
}

impl FixtureDecoder {
    pub fn new(response: Value) -> Self {
        Self { response }
    }

    pub fn from_json(json: &str) -> Result<Self, DecoderError> {
        serde_json::from_str(json)
            .map(Self::new)
            .map_err(|e| DecoderError::Fixture(format!("invalid fixture JSON: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self, DecoderError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DecoderError::Fixture(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Inline JSON takes priority over the fixture file
    pub fn from_config(mock: &MockSection) -> Result<Self, DecoderError> {
        let inline = mock.json.as_deref().map(str::trim).filter(|j| !j.is_empty());
        let file = mock.file.as_deref().map(str::trim).filter(|f| !f.is_empty());

        match (inline, file) {
            (Some(json), _) => Self::from_json(json),
            (None, Some(file)) => Self::from_file(Path::new(file)),
            (None, None) => Err(DecoderError::Fixture(
                "mock mode enabled but neither json nor file is set".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Decoder for FixtureDecoder {
    async fn decode(&self, device_name: &str, hex_payload: &str) -> Result<Value, DecoderError> {
        debug!(device = device_name, payload = hex_payload, "Returning fixture response");
        Ok(self.response.clone())
    }
}
