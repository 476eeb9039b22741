//! MQTT client with acknowledged operations and resubscription replay
//!
//! This module separates pure functions from I/O operations for testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, backoff, timeouts and broker options
//! - [`health_monitor`] - Pure reconnection decisions and state transitions
//! - [`ack_tracker`] - Packet-id correlation for SUBACK/PUBACK/PUBCOMP
//! - [`registry`] - Durable subscription registry and replay pass
//! - [`message_handler`] - Pure event routing and inbound dispatch
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use lora_bridge::config::MqttSection;
//! use lora_bridge::transport::mqtt::{MqttClient, OperationTimeouts, ReconnectConfig};
//! use rumqttc::QoS;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     client_id: String::new(),
//!     username_env: None,
//!     password_env: None,
//!     keep_alive_secs: 30,
//!     clean_session: true,
//! };
//!
//! let client = MqttClient::new(
//!     "output",
//!     &config,
//!     ReconnectConfig::default(),
//!     OperationTimeouts::default(),
//! )?;
//! client.connect().await?;
//! client
//!     .publish("bridge/out", QoS::AtLeastOnce, false, b"{}".to_vec())
//!     .await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod ack_tracker;
pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod registry;

pub use client::MqttClient;
pub use connection::{
    qos_from_u8, ConnectionState, MqttError, OperationTimeouts, ReconnectConfig,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, InboundMessage, MessageHandler};
pub use registry::{
    replay_subscriptions, InboundHandler, ReplayReport, SubscribeLink, Subscription,
    SubscriptionRegistry,
};
