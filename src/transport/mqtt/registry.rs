//! Subscription registry and resubscription replay
//!
//! The registry is the durable record of every subscription a client has
//! requested. Entries are appended before the broker is asked, so a reconnect
//! always finds them even when the original request never got its SUBACK.

use super::connection::MqttError;
use crate::protocol::topics::topic_matches;
use async_trait::async_trait;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Receives messages delivered on a subscribed topic filter
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// One registered subscription
#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
    pub handler: Arc<dyn InboundHandler>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Ordered set of subscriptions, one entry per topic filter
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription; an existing entry for the same filter is replaced in place
    ///
    /// Returns true when the filter was not registered before.
    pub async fn register(&self, subscription: Subscription) -> bool {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.topic == subscription.topic) {
            Some(existing) => {
                debug!(topic = %subscription.topic, "Replacing existing subscription");
                *existing = subscription;
                false
            }
            None => {
                entries.push(subscription);
                true
            }
        }
    }

    /// Point-in-time copy in registration order
    pub async fn snapshot(&self) -> Vec<Subscription> {
        self.entries.read().await.clone()
    }

    /// Handlers whose filter matches `topic`
    pub async fn handlers_for(&self, topic: &str) -> Vec<Arc<dyn InboundHandler>> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| topic_matches(&e.topic, topic))
            .map(|e| e.handler.clone())
            .collect()
    }

    pub async fn topics(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| e.topic.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Issues one subscribe request to the broker and waits for its acknowledgment
#[async_trait]
pub trait SubscribeLink: Send + Sync {
    async fn subscribe_and_wait(
        &self,
        topic: &str,
        qos: QoS,
        timeout: Duration,
    ) -> Result<(), MqttError>;
}

/// Outcome of one resubscription pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Topics whose resubscribe failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.succeeded == self.attempted
    }
}

/// Re-issue every registered subscription, in registry order
///
/// Works from a snapshot taken at the start of the pass. Each entry gets its
/// own bounded wait; a failure is logged and the pass moves on to the next
/// entry. Failed topics are not retried until the next reconnect.
pub async fn replay_subscriptions(
    link: &dyn SubscribeLink,
    registry: &SubscriptionRegistry,
    timeout: Duration,
) -> ReplayReport {
    let snapshot = registry.snapshot().await;
    let mut report = ReplayReport {
        attempted: snapshot.len(),
        ..Default::default()
    };

    for subscription in &snapshot {
        match link
            .subscribe_and_wait(&subscription.topic, subscription.qos, timeout)
            .await
        {
            Ok(()) => {
                debug!(topic = %subscription.topic, "Resubscribed");
                report.succeeded += 1;
            }
            Err(e) => {
                warn!(topic = %subscription.topic, error = %e, "Resubscribe failed; will retry on next reconnect");
                report
                    .failed
                    .push((subscription.topic.clone(), e.to_string()));
            }
        }
    }

    info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed.len(),
        "Resubscription pass finished"
    );
    report
}
