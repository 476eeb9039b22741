//! Uplink bridge: processor output republished through a transport
//!
//! [`Bridge`] is the inbound handler registered on the input client. For each
//! uplink it runs the [`Processor`], publishes every flat output to the output
//! topic and then the write payload, when there is one, to the write topic.
//! Failures are logged per message; nothing is queued or retried.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::message_span;
use crate::processing::processor::Processor;
use crate::protocol::messages::WritePayload;
use crate::transport::mqtt::{qos_from_u8, InboundHandler};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::QoS;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Topic, QoS and retain flag for one kind of outbound message
#[derive(Debug, Clone, PartialEq)]
pub struct PublishTarget {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishTarget {
    pub fn new(topic: impl Into<String>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            qos,
            retain,
        }
    }
}

/// Where write payloads go and how they are framed
#[derive(Debug, Clone, PartialEq)]
pub struct WriteTarget {
    pub target: PublishTarget,
    /// Publish `[payload]` instead of `payload`
    pub as_array: bool,
}

/// What happened to one uplink
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishSummary {
    pub outputs: usize,
    pub published: usize,
    pub failed: usize,
    pub write_published: bool,
}

/// Serialize a write payload in the configured framing
pub fn encode_write_payload(payload: &WritePayload, as_array: bool) -> BridgeResult<Vec<u8>> {
    let encoded = if as_array {
        serde_json::to_vec(&[payload])
    } else {
        serde_json::to_vec(payload)
    };
    encoded.map_err(|e| BridgeError::serialization(format!("write payload: {e}")))
}

/// Inbound handler wiring the processor to an output transport
pub struct Bridge<T: Transport> {
    processor: Arc<Processor>,
    transport: Arc<T>,
    output: PublishTarget,
    write_output: Option<WriteTarget>,
}

impl<T: Transport> Bridge<T> {
    pub fn new(processor: Arc<Processor>, transport: Arc<T>, output: PublishTarget) -> Self {
        Self {
            processor,
            transport,
            output,
            write_output: None,
        }
    }

    pub fn with_write_output(mut self, write_output: WriteTarget) -> Self {
        self.write_output = Some(write_output);
        self
    }

    /// Build from the `[mqtt_output]` and `[write_output]` sections
    pub fn from_config(
        config: &BridgeConfig,
        processor: Arc<Processor>,
        transport: Arc<T>,
    ) -> BridgeResult<Self> {
        let output = PublishTarget::new(
            config.mqtt_output.topic.clone(),
            qos_from_u8(config.mqtt_output.qos)?,
            config.mqtt_output.retain,
        );
        let mut bridge = Self::new(processor, transport, output);

        if let Some(write) = &config.write_output {
            bridge = bridge.with_write_output(WriteTarget {
                target: PublishTarget::new(write.topic.clone(), qos_from_u8(write.qos)?, write.retain),
                as_array: write.as_array,
            });
        }
        Ok(bridge)
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Process one uplink and publish its results
    ///
    /// Errors are returned only for failures that drop the whole message;
    /// individual publish failures are counted in the summary.
    pub async fn handle_uplink(&self, topic: &str, payload: &[u8]) -> BridgeResult<PublishSummary> {
        info!(topic, bytes = payload.len(), "Message received");

        let processed = self.processor.handle_message(payload).await?;
        let mut summary = PublishSummary {
            outputs: processed.outputs.len(),
            ..Default::default()
        };

        if processed.outputs.is_empty() {
            warn!(
                device = %processed.base_name,
                "No outputs produced from message; check sensor_property_* paths"
            );
        }

        if !processed.outputs.is_empty() && !self.transport.is_connected() {
            warn!(
                state = ?self.transport.connection_state(),
                permanent = self.transport.is_permanently_disconnected(),
                "Output transport not connected; publishes will fail"
            );
        }

        for output in &processed.outputs {
            let body = serde_json::to_vec(output)
                .map_err(|e| BridgeError::serialization(format!("flat output: {e}")))?;
            match self
                .transport
                .publish(&self.output.topic, self.output.qos, self.output.retain, body)
                .await
            {
                Ok(()) => {
                    summary.published += 1;
                    debug!(topic = %self.output.topic, sensor = %output.sensor, "Published flat output");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(topic = %self.output.topic, sensor = %output.sensor, error = %e, "Publish failed");
                }
            }
        }

        if let (Some(write), Some(write_payload)) = (&self.write_output, &processed.write_payload)
        {
            let body = encode_write_payload(write_payload, write.as_array)?;
            match self
                .transport
                .publish(&write.target.topic, write.target.qos, write.target.retain, body)
                .await
            {
                Ok(()) => {
                    summary.write_published = true;
                    info!(
                        topic = %write.target.topic,
                        tags = write_payload.tags.len(),
                        "Published write payload"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(topic = %write.target.topic, error = %e, "Write payload publish failed");
                }
            }
        }

        info!(
            device = %processed.base_name,
            dev_eui = %processed.dev_eui,
            published = summary.published,
            failed = summary.failed,
            "Uplink processed"
        );
        Ok(summary)
    }
}

#[async_trait]
impl<T: Transport + 'static> InboundHandler for Bridge<T> {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let span = message_span!(topic = %topic);
        if let Err(e) = self.handle_uplink(topic, payload).instrument(span).await {
            if e.is_message_scoped() {
                error!(topic, error = %e, "Processing failed; message dropped");
            } else {
                error!(topic, error = %e, "Bridge error while handling message");
            }
        }
    }
}
