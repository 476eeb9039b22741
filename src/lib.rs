//! LoRa Bridge - LNS uplink to normalized MQTT readings
//!
//! Consumes uplinks published by a LoRaWAN network server, decodes their
//! payloads through a decode API, and republishes one flat JSON reading per
//! configured property, plus an optional aggregated historian write request.
//!
//! # Overview
//!
//! - [`processing`] - path resolution, coercion and the uplink [`Processor`]
//! - [`decoder`] - HTTP decode API client and offline fixture decoder
//! - [`transport`] - MQTT client with acknowledged operations, reconnection
//!   and subscription replay
//! - [`bridge`] - inbound handler publishing processor results
//!
//! # Quick Start
//!
//! ```rust
//! use lora_bridge::decoder::FixtureDecoder;
//! use lora_bridge::processing::{Processor, PropertyMapping};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let decoder = Arc::new(FixtureDecoder::new(json!({
//!     "Features": {"Valve": {"Open": true}}
//! })));
//! let mut mapping = PropertyMapping::default();
//! mapping
//!     .property_map
//!     .insert("OPEN".to_string(), "Features.Valve.Open".to_string());
//! let processor = Processor::new(decoder, mapping);
//!
//! let uplink = json!({"deviceName": "valve-1", "devEUI": "AA", "data": "AQI="});
//! let result = processor.handle_message(uplink.to_string().as_bytes()).await?;
//!
//! assert_eq!(result.outputs[0].sensor, "valve-1-OPEN");
//! assert_eq!(result.outputs[0].value, json!(true));
//! # Ok::<(), lora_bridge::BridgeError>(())
//! # });
//! ```

pub mod bridge;
pub mod config;
pub mod decoder;
pub mod error;
pub mod observability;
pub mod processing;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use bridge::{Bridge, PublishSummary, PublishTarget, WriteTarget};
pub use config::{BridgeConfig, ConfigError, SensorDirectory};
pub use error::{BridgeError, BridgeResult};
pub use processing::{ProcessedMessage, Processor, PropertyMapping};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
