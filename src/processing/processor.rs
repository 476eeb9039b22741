//! Uplink transformation engine
//!
//! One call to [`Processor::handle_message`] takes a raw LNS uplink through
//! envelope parsing, identity validation, payload decoding and property
//! extraction, producing the flat outputs and the optional write payload for
//! that message. The processor holds no mutable state, so calls for different
//! messages may run concurrently.

use super::coercion::as_bool;
use super::path::PathResolver;
use super::timestamp::normalize_timestamp;
use super::write_payload::build_write_payload;
use crate::config::BridgeConfig;
use crate::decoder::Decoder;
use crate::error::BridgeError;
use crate::protocol::messages::{FlatOutput, LnsMessage, WritePayload};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Meta key for the global status path
pub const META_STATUS: &str = "Status";
/// Meta key for the global start time path
pub const META_START_TIME: &str = "StartTime";

/// Field mapping from output suffixes to paths in the decoded response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMapping {
    /// Suffix -> value path
    pub property_map: HashMap<String, String>,
    /// `Status` / `StartTime` -> global fallback path
    pub meta: HashMap<String, String>,
    /// `<suffix>_TIME` -> start time path
    pub timestamp: HashMap<String, String>,
    /// `<suffix>_STATUS` -> literal `true`/`false` or a status path
    pub status: HashMap<String, String>,
}

impl PropertyMapping {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            property_map: config.sensor_property_map.clone(),
            meta: config.sensor_property_meta.clone(),
            timestamp: config.sensor_property_timestamp.clone(),
            status: config.sensor_property_status.clone(),
        }
    }
}

/// Result of processing one uplink
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedMessage {
    /// One entry per suffix whose path resolved; order is unspecified
    pub outputs: Vec<FlatOutput>,
    /// Present only when write tags are configured and at least one output qualified
    pub write_payload: Option<WritePayload>,
    pub base_name: String,
    pub dev_eui: String,
}

/// Transforms raw LNS uplinks into flat sensor outputs
pub struct Processor {
    decoder: Arc<dyn Decoder>,
    mapping: PropertyMapping,
    resolver: PathResolver,
    write_tags: Option<HashMap<String, String>>,
}

impl Processor {
    pub fn new(decoder: Arc<dyn Decoder>, mapping: PropertyMapping) -> Self {
        Self {
            decoder,
            mapping,
            resolver: PathResolver::new(),
            write_tags: None,
        }
    }

    /// Use a resolver with an alias table
    pub fn with_resolver(mut self, resolver: PathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Enable write payload aggregation with a sensor id -> tag id map
    pub fn with_write_tags(mut self, tag_ids: HashMap<String, String>) -> Self {
        self.write_tags = Some(tag_ids);
        self
    }

    pub fn mapping(&self) -> &PropertyMapping {
        &self.mapping
    }

    /// Process one raw uplink message
    pub async fn handle_message(&self, raw: &[u8]) -> Result<ProcessedMessage, BridgeError> {
        let message: LnsMessage = serde_json::from_slice(raw)?;

        let device_name = message.resolved_device_name().to_string();
        let dev_eui = message.resolved_dev_eui().to_string();
        let data = message.data.as_str();
        if data.is_empty() || device_name.is_empty() || dev_eui.is_empty() {
            return Err(BridgeError::validation(format!(
                "missing fields in LNS message (data: {}, deviceName: {}, devEUI: {})",
                !data.is_empty(),
                !device_name.is_empty(),
                !dev_eui.is_empty()
            )));
        }

        let payload = STANDARD
            .decode(data)
            .map_err(|e| BridgeError::validation(format!("invalid base64 data: {e}")))?;
        let hex_payload = hex::encode(&payload);
        debug!(device = %device_name, dev_eui = %dev_eui, hex = %hex_payload, "Decoding uplink payload");

        let decoded = self.decoder.decode(&device_name, &hex_payload).await?;

        let global_status = self.global_status(&decoded);
        let global_start = self.global_start_time(&decoded);

        let base_name = device_name;
        let mut outputs = Vec::with_capacity(self.mapping.property_map.len());
        for (suffix, path) in &self.mapping.property_map {
            let Some(value) = self.resolver.resolve(&decoded, path) else {
                warn!(path = %path, sensor = %suffix, "Failed to resolve property path");
                continue;
            };

            outputs.push(FlatOutput {
                value: value.clone(),
                status: self.effective_status(&decoded, suffix, global_status),
                sensor: format!("{base_name}-{suffix}"),
                start_time: self.effective_start_time(&decoded, suffix, &global_start),
            });
        }

        let write_payload = self
            .write_tags
            .as_ref()
            .and_then(|tag_ids| build_write_payload(&outputs, tag_ids, &dev_eui));

        Ok(ProcessedMessage {
            outputs,
            write_payload,
            base_name,
            dev_eui,
        })
    }

    fn global_status(&self, decoded: &Value) -> bool {
        let Some(path) = self.mapping.meta.get(META_STATUS) else {
            return true;
        };
        match self.resolver.resolve(decoded, path) {
            Some(value) => as_bool(value, true),
            None => {
                warn!(path = %path, "Failed to resolve status path");
                true
            }
        }
    }

    fn global_start_time(&self, decoded: &Value) -> String {
        let Some(path) = self.mapping.meta.get(META_START_TIME) else {
            return String::new();
        };
        match self.resolver.resolve(decoded, path) {
            Some(Value::String(raw)) => {
                info!(timestamp_raw = %raw, "Resolved start time");
                normalize_timestamp(raw)
            }
            Some(_) => {
                warn!(path = %path, "Start time path does not hold a string");
                String::new()
            }
            None => {
                warn!(path = %path, "Failed to resolve start time path");
                String::new()
            }
        }
    }

    fn effective_start_time(&self, decoded: &Value, suffix: &str, global: &str) -> String {
        let Some(path) = self.mapping.timestamp.get(&format!("{suffix}_TIME")) else {
            return global.to_string();
        };
        match self.resolver.resolve(decoded, path) {
            Some(Value::String(raw)) => normalize_timestamp(raw),
            Some(_) => global.to_string(),
            None => {
                warn!(path = %path, sensor = %suffix, "Failed to resolve per-sensor timestamp path");
                global.to_string()
            }
        }
    }

    fn effective_status(&self, decoded: &Value, suffix: &str, global: bool) -> bool {
        let Some(setting) = self.mapping.status.get(&format!("{suffix}_STATUS")) else {
            return global;
        };

        if let Some(literal) = parse_status_literal(setting) {
            return literal;
        }

        match self.resolver.resolve(decoded, setting) {
            Some(value) => as_bool(value, global),
            None => {
                warn!(path = %setting, sensor = %suffix, "Failed to resolve per-sensor status path");
                global
            }
        }
    }
}

/// `"true"`/`"false"` in any case, optionally quoted
fn parse_status_literal(setting: &str) -> Option<bool> {
    let cleaned = setting
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_lowercase();
    match cleaned.as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
