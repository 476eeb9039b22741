//! Transport layer for republishing decoded uplinks
//!
//! This module provides the publish abstraction the bridge writes through
//! and its MQTT implementation.

use rumqttc::QoS;

pub mod mqtt;

/// Outbound side of the bridge
///
/// [`crate::bridge::Bridge`] publishes through this trait so tests can swap
/// the MQTT client for [`crate::testing::MockTransport`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish `payload` to `topic`, resolving once delivered at `qos`
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error>;

    /// True while a broker session is up
    fn is_connected(&self) -> bool;

    fn connection_state(&self) -> mqtt::ConnectionState;

    /// True once reconnection has been given up
    fn is_permanently_disconnected(&self) -> bool;
}
