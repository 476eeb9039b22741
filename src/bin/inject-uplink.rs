//! LNS Uplink Injection Utility
//!
//! Publishes a synthetic LoRaWAN network-server uplink so a running bridge
//! can be exercised without real devices.
//!
//! ## Usage
//!
//! ```bash
//! # Valve reading as hex
//! inject-uplink --device-name valve-top --dev-eui 0011223344556677 --hex 01a0ff
//!
//! # Custom topic and broker
//! inject-uplink --device-name valve-top --dev-eui 0011223344556677 --hex 01 \
//!   --topic application/7/device/0011223344556677/event/up \
//!   --broker-url mqtt://lns.local:1883
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Parser;
use lora_bridge::config::MqttSection;
use lora_bridge::protocol::messages::{DeviceInfo, LnsMessage, RxInfo, TxInfo};
use lora_bridge::transport::mqtt::{qos_from_u8, MqttClient, OperationTimeouts, ReconnectConfig};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "inject-uplink",
    about = "Publish a synthetic LNS uplink for manual bridge testing"
)]
struct Args {
    /// Device name carried in the envelope
    #[arg(long)]
    device_name: String,

    /// Device EUI carried in the envelope
    #[arg(long)]
    dev_eui: String,

    /// Application payload as hex
    #[arg(long)]
    hex: String,

    /// Uplink topic (defaults to application/1/device/<dev-eui>/event/up)
    #[arg(long)]
    topic: Option<String>,

    /// LoRaWAN frame port
    #[arg(long, default_value_t = 1)]
    f_port: u32,

    /// MQTT broker URL
    #[arg(long, default_value = "mqtt://localhost:1883", env = "LNS_BROKER_URL")]
    broker_url: String,

    /// Publish QoS
    #[arg(long, default_value_t = 1)]
    qos: u8,
}

fn build_uplink(args: &Args, payload: &[u8]) -> LnsMessage {
    LnsMessage {
        application_id: "1".to_string(),
        application_name: "inject-uplink".to_string(),
        device_name: args.device_name.clone(),
        dev_eui: args.dev_eui.clone(),
        device_info: DeviceInfo {
            dev_eui: args.dev_eui.clone(),
            device_name: args.device_name.clone(),
        },
        rx_info: vec![RxInfo {
            gateway_id: "inject-gateway".to_string(),
            rssi: -60,
            lora_snr: 9.5,
        }],
        tx_info: TxInfo {
            frequency: 868_100_000,
            dr: 5,
        },
        f_port: args.f_port,
        data: STANDARD.encode(payload),
        object: json!({}),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let payload = hex::decode(args.hex.trim())?;
    let uplink = build_uplink(&args, &payload);
    let topic = args
        .topic
        .clone()
        .unwrap_or_else(|| format!("application/1/device/{}/event/up", args.dev_eui));

    let config = MqttSection {
        broker_url: args.broker_url.clone(),
        client_id: String::new(),
        username_env: Some("MQTT_USERNAME".to_string()),
        password_env: Some("MQTT_PASSWORD".to_string()),
        keep_alive_secs: 30,
        clean_session: true,
    };
    let client = MqttClient::new(
        "inject",
        &config,
        ReconnectConfig::default(),
        OperationTimeouts::default(),
    )?;

    println!("Connecting to MQTT broker {}...", args.broker_url);
    client.connect().await?;

    let body = serde_json::to_vec_pretty(&uplink)?;
    client
        .publish(&topic, qos_from_u8(args.qos)?, false, body)
        .await?;
    println!(
        "Published uplink for {} ({}) to {}: data={}",
        args.device_name, args.dev_eui, topic, uplink.data
    );

    client.disconnect().await?;
    Ok(())
}
