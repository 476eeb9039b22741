//! Pure event routing and inbound message dispatch
//!
//! [`MessageHandler::route_mqtt_event`] classifies raw rumqttc events for the
//! event-loop task. Inbound publishes are handed to [`dispatch_loop`] through a
//! bounded channel, so handlers never run on the event-loop task itself.

use super::registry::SubscriptionRegistry;
use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Inbound queue depth between the event loop and the dispatch loop
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the appropriate handling (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                }),
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    packet_id: suback.pkid,
                    granted: Self::subscription_granted(&suback.return_codes),
                },
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    packet_id: puback.pkid,
                },
                Packet::PubComp(pubcomp) => EventRoute::PublishAcknowledged {
                    packet_id: pubcomp.pkid,
                },
                Packet::Disconnect => EventRoute::DisconnectedByBroker,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeSent {
                packet_id: *pkid,
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent {
                packet_id: *pkid,
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck return codes (pure function)
    pub fn subscription_granted(return_codes: &[SubscribeReasonCode]) -> bool {
        !return_codes.is_empty()
            && return_codes
                .iter()
                .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
    }
}

/// One message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived(InboundMessage),
    /// Broker sent DISCONNECT
    DisconnectedByBroker,
    /// Our own DISCONNECT went out
    DisconnectSent,
    /// Subscribe request written with this packet id
    SubscribeSent { packet_id: u16 },
    /// Publish request written with this packet id (0 for QoS 0)
    PublishSent { packet_id: u16 },
    SubscriptionAcknowledged { packet_id: u16, granted: bool },
    /// PUBACK or PUBCOMP
    PublishAcknowledged { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Other outgoing event (handled automatically)
    OutgoingEvent,
}

/// Deliver inbound messages to matching handlers until the channel closes
///
/// Handlers run one at a time, in arrival order.
pub async fn dispatch_loop(
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    registry: Arc<SubscriptionRegistry>,
) {
    while let Some(message) = inbound_rx.recv().await {
        let handlers = registry.handlers_for(&message.topic).await;
        if handlers.is_empty() {
            warn!(topic = %message.topic, "No handler registered for inbound message");
            continue;
        }

        debug!(
            topic = %message.topic,
            bytes = message.payload.len(),
            handlers = handlers.len(),
            "Dispatching inbound message"
        );
        for handler in handlers {
            handler.handle(&message.topic, &message.payload).await;
        }
    }
    debug!("Inbound dispatch loop stopped");
}
