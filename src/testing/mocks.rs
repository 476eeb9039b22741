//! Mock implementations for testing
//!
//! Provides a mock Transport, a scripted subscribe link and a recording
//! decoder so the bridge and the replay logic can be tested without a broker
//! or a decode API.

use crate::decoder::{Decoder, DecoderError};
use crate::transport::mqtt::{ConnectionState, MqttError, SubscribeLink};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::QoS;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One message handed to [`MockTransport::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.payload)
    }
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    /// Fail every publish
    pub should_fail: bool,
    /// Fail publishes to these topics only
    pub failing_topics: HashSet<String>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn failing_topic(mut self, topic: &str) -> Self {
        self.failing_topics.insert(topic.to_string());
        self
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published_messages
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error> {
        if self.should_fail || self.failing_topics.contains(topic) {
            return Err(MqttError::Timeout {
                operation: format!("publish on {topic}"),
            });
        }

        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.should_fail
    }

    fn connection_state(&self) -> ConnectionState {
        if self.should_fail {
            ConnectionState::Disconnected("Mock disconnection".to_string())
        } else {
            ConnectionState::Connected
        }
    }

    fn is_permanently_disconnected(&self) -> bool {
        false
    }
}

/// How a [`ScriptedSubscribeLink`] answers one topic
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeScript {
    Grant,
    Reject,
    /// Never answer; the caller's timeout decides
    Hang,
}

/// Subscribe link double that records requests and answers per topic
#[derive(Debug, Default)]
pub struct ScriptedSubscribeLink {
    pub requests: Arc<Mutex<Vec<(String, QoS)>>>,
    pub scripts: std::collections::HashMap<String, SubscribeScript>,
}

impl ScriptedSubscribeLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `topic` with `script`; unscripted topics are granted
    pub fn script(mut self, topic: &str, script: SubscribeScript) -> Self {
        self.scripts.insert(topic.to_string(), script);
        self
    }

    pub async fn requests(&self) -> Vec<(String, QoS)> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl SubscribeLink for ScriptedSubscribeLink {
    async fn subscribe_and_wait(
        &self,
        topic: &str,
        qos: QoS,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        self.requests.lock().await.push((topic.to_string(), qos));

        match self.scripts.get(topic).unwrap_or(&SubscribeScript::Grant) {
            SubscribeScript::Grant => Ok(()),
            SubscribeScript::Reject => Err(MqttError::SubscribeRejected {
                topic: topic.to_string(),
            }),
            SubscribeScript::Hang => {
                tokio::time::sleep(timeout).await;
                Err(MqttError::Timeout {
                    operation: format!("subscribe on {topic}"),
                })
            }
        }
    }
}

/// Decoder double returning a fixed result and recording its inputs
#[derive(Debug)]
pub struct RecordingDecoder {
    pub response: Result<Value, DecoderError>,
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingDecoder {
    pub fn returning(response: Value) -> Self {
        Self {
            response: Ok(response),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(error: DecoderError) -> Self {
        Self {
            response: Err(error),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `(device_name, hex_payload)` pairs in call order
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Decoder for RecordingDecoder {
    async fn decode(&self, device_name: &str, hex_payload: &str) -> Result<Value, DecoderError> {
        self.calls
            .lock()
            .await
            .push((device_name.to_string(), hex_payload.to_string()));
        self.response.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_transport_records_and_fails() {
        let transport = MockTransport::new().failing_topic("broken");

        transport
            .publish("ok", QoS::AtLeastOnce, true, b"{\"a\":1}".to_vec())
            .await
            .unwrap();
        assert!(transport
            .publish("broken", QoS::AtLeastOnce, false, Vec::new())
            .await
            .is_err());

        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 1);
        assert!(published[0].retain);
        assert_eq!(published[0].json().unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_scripted_link_answers() {
        let link = ScriptedSubscribeLink::new().script("no", SubscribeScript::Reject);

        assert!(link
            .subscribe_and_wait("yes", QoS::AtMostOnce, Duration::from_millis(10))
            .await
            .is_ok());
        assert!(matches!(
            link.subscribe_and_wait("no", QoS::AtMostOnce, Duration::from_millis(10))
                .await,
            Err(MqttError::SubscribeRejected { .. })
        ));
        assert_eq!(link.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_recording_decoder() {
        let decoder = RecordingDecoder::returning(json!({"ok": true}));

        let value = decoder.decode("dev", "abcd").await.unwrap();

        assert_eq!(value, json!({"ok": true}));
        assert_eq!(
            decoder.calls().await,
            vec![("dev".to_string(), "abcd".to_string())]
        );
    }
}
