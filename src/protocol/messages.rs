//! Wire message types
//!
//! Inbound: the uplink envelope published by the LoRaWAN network server (LNS).
//! Outbound: one flat reading per resolved property, and the aggregated write
//! payload consumed by the historian.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Treat an explicit JSON `null` like a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Gateway reception metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RxInfo {
    #[serde(rename = "gatewayID", default, deserialize_with = "null_as_default")]
    pub gateway_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rssi: i32,
    #[serde(rename = "loraSnr", default, deserialize_with = "null_as_default")]
    pub lora_snr: f64,
}

/// Transmission metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub frequency: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dr: i32,
}

/// Nested device identity block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "devEUI", default, deserialize_with = "null_as_default")]
    pub dev_eui: String,
    #[serde(rename = "deviceName", default, deserialize_with = "null_as_default")]
    pub device_name: String,
}

/// Uplink envelope as published by the LNS
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LnsMessage {
    #[serde(rename = "applicationID", default, deserialize_with = "null_as_default")]
    pub application_id: String,
    #[serde(rename = "applicationName", default, deserialize_with = "null_as_default")]
    pub application_name: String,
    #[serde(rename = "deviceName", default, deserialize_with = "null_as_default")]
    pub device_name: String,
    #[serde(rename = "devEUI", default, deserialize_with = "null_as_default")]
    pub dev_eui: String,
    #[serde(rename = "deviceInfo", default, deserialize_with = "null_as_default")]
    pub device_info: DeviceInfo,
    #[serde(rename = "rxInfo", default, deserialize_with = "null_as_default")]
    pub rx_info: Vec<RxInfo>,
    #[serde(rename = "txInfo", default, deserialize_with = "null_as_default")]
    pub tx_info: TxInfo,
    #[serde(rename = "fPort", default, deserialize_with = "null_as_default")]
    pub f_port: u32,
    /// Base64 encoded application payload
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: String,
    /// Network-server side decoded object, not used by the bridge
    #[serde(default)]
    pub object: Value,
}

impl LnsMessage {
    /// Device name, preferring `deviceInfo.deviceName` over the top-level field
    pub fn resolved_device_name(&self) -> &str {
        prefer_nested(&self.device_info.device_name, &self.device_name)
    }

    /// Device EUI, preferring `deviceInfo.devEUI` over the top-level field
    pub fn resolved_dev_eui(&self) -> &str {
        prefer_nested(&self.device_info.dev_eui, &self.dev_eui)
    }
}

fn prefer_nested<'a>(nested: &'a str, top_level: &'a str) -> &'a str {
    let nested = nested.trim();
    if nested.is_empty() {
        top_level.trim()
    } else {
        nested
    }
}

/// One normalized sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatOutput {
    /// Resolved field value in its native shape
    pub value: Value,
    pub status: bool,
    /// `<base name>-<suffix>`
    pub sensor: String,
    #[serde(rename = "starttime")]
    pub start_time: String,
}

/// Historian tag entry inside a write payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteTag {
    #[serde(rename = "tagid")]
    pub tag_id: String,
    /// Sensor identifier, identical to [`FlatOutput::sensor`]
    #[serde(rename = "sosid")]
    pub sensor_id: String,
    #[serde(rename = "historianid")]
    pub historian_id: String,
    pub value: Value,
}

/// Aggregated write request for the historian
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritePayload {
    pub status: String,
    pub tags: Vec<WriteTag>,
}

impl WritePayload {
    /// Status marker the historian expects on write requests
    pub const WRITE_STATUS: &'static str = "W";

    pub fn new(tags: Vec<WriteTag>) -> Self {
        Self {
            status: Self::WRITE_STATUS.to_string(),
            tags,
        }
    }
}
