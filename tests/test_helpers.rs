//! Test helpers and utilities for integration tests

use lora_bridge::config::BridgeConfig;
use serde_json::{json, Value};

/// Valve deployment: four mapped properties, global meta paths, one
/// per-sensor timestamp and two per-sensor status overrides
#[allow(dead_code)]
pub const VALVE_CONFIG: &str = r#"
[mqtt_input]
broker_url = "mqtt://localhost:1883"
topic = "application/+/device/+/event/up"

[mqtt_output]
broker_url = "mqtt://localhost:1883"
topic = "lora/output"

[write_output]
topic = "lora/write"

[decoder]
base_url = "http://localhost:8080/decode"

[sensor_property_map]
OPEN = "Features.ValvePosition.Properties.Status.LogicalPosition.Open"
CLOSED = "Features.ValvePosition.Properties.Status.LogicalPosition.Closed"
BATTERY = "Features.Battery.Properties.Level"
MISSING = "Features.Nothing.Here"

[sensor_property_meta]
Status = "Features.ValvePosition.Properties.Valid"
StartTime = "Features.ValvePosition.Properties.Timestamp"

[sensor_property_timestamp]
BATTERY_TIME = "Features.Battery.Properties.MeasuredAt"

[sensor_property_status]
CLOSED_STATUS = "false"
BATTERY_STATUS = "Features.Battery.Properties.Ok"
"#;

#[allow(dead_code)]
pub fn valve_config() -> BridgeConfig {
    BridgeConfig::from_toml_str(VALVE_CONFIG).expect("valve config should parse")
}

/// Decode API answer for the valve device, with camelCase keys as the API sends them
#[allow(dead_code)]
pub fn decoded_valve() -> Value {
    json!({
        "features": {
            "valvePosition": {
                "properties": {
                    "valid": "true",
                    "timestamp": "2024-01-05T13:45:02Z",
                    "status": {
                        "logicalPosition": {"open": true, "closed": false}
                    }
                }
            },
            "battery": {
                "properties": {
                    "level": 87.5,
                    "measuredAt": "2024-01-05 12:00:00",
                    "ok": 0
                }
            }
        }
    })
}

/// Raw LNS uplink envelope as published by the network server
#[allow(dead_code)]
pub fn uplink(device_name: &str, dev_eui: &str, data: &str) -> Vec<u8> {
    json!({
        "applicationID": "3",
        "applicationName": "valves",
        "deviceInfo": {"deviceName": device_name, "devEUI": dev_eui},
        "rxInfo": [{"gatewayID": "gw-1", "rssi": -90, "loraSnr": 6.0}],
        "txInfo": {"frequency": 868300000u64, "dr": 4},
        "fPort": 10,
        "data": data
    })
    .to_string()
    .into_bytes()
}
