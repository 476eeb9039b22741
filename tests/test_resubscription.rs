//! Resubscription replay tests
//!
//! A reconnect must re-issue exactly the registered subscriptions, in the
//! order they were registered, and one failing filter must not stop the rest.

use async_trait::async_trait;
use lora_bridge::testing::mocks::{ScriptedSubscribeLink, SubscribeScript};
use lora_bridge::transport::mqtt::{
    replay_subscriptions, InboundHandler, MqttError, SubscribeLink, Subscription,
    SubscriptionRegistry,
};
use rumqttc::QoS;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const REPLAY_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct CountingHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl InboundHandler for CountingHandler {
    async fn handle(&self, _topic: &str, _payload: &[u8]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn subscription(topic: &str, qos: QoS, handler: Arc<dyn InboundHandler>) -> Subscription {
    Subscription {
        topic: topic.to_string(),
        qos,
        handler,
    }
}

async fn registry_with(topics: &[(&str, QoS)]) -> SubscriptionRegistry {
    let registry = SubscriptionRegistry::new();
    let handler: Arc<dyn InboundHandler> = Arc::new(CountingHandler::default());
    for (topic, qos) in topics {
        registry
            .register(subscription(topic, *qos, handler.clone()))
            .await;
    }
    registry
}

#[tokio::test]
async fn test_reconnect_reissues_registered_subscriptions_in_order() {
    // Arrange
    let registry = registry_with(&[
        ("application/1/device/+/event/up", QoS::AtLeastOnce),
        ("application/2/device/+/event/up", QoS::AtMostOnce),
        ("lora/commands/#", QoS::ExactlyOnce),
    ])
    .await;
    let link = ScriptedSubscribeLink::new();

    // Act
    let report = replay_subscriptions(&link, &registry, REPLAY_TIMEOUT).await;

    // Assert
    assert!(report.is_complete());
    assert_eq!(report.attempted, 3);
    assert_eq!(
        link.requests().await,
        vec![
            ("application/1/device/+/event/up".to_string(), QoS::AtLeastOnce),
            ("application/2/device/+/event/up".to_string(), QoS::AtMostOnce),
            ("lora/commands/#".to_string(), QoS::ExactlyOnce),
        ]
    );
}

#[tokio::test]
async fn test_every_reconnect_replays_the_full_set() {
    let registry = registry_with(&[("a/#", QoS::AtLeastOnce), ("b/+", QoS::AtLeastOnce)]).await;
    let link = ScriptedSubscribeLink::new();

    for _ in 0..3 {
        replay_subscriptions(&link, &registry, REPLAY_TIMEOUT).await;
    }

    let topics: Vec<String> = link.requests().await.into_iter().map(|(t, _)| t).collect();
    assert_eq!(topics, vec!["a/#", "b/+", "a/#", "b/+", "a/#", "b/+"]);
}

#[tokio::test]
async fn test_rejected_subscription_does_not_abort_the_pass() {
    let registry = registry_with(&[
        ("first/#", QoS::AtLeastOnce),
        ("denied/#", QoS::AtLeastOnce),
        ("last/#", QoS::AtLeastOnce),
    ])
    .await;
    let link = ScriptedSubscribeLink::new().script("denied/#", SubscribeScript::Reject);

    let report = replay_subscriptions(&link, &registry, REPLAY_TIMEOUT).await;

    assert!(!report.is_complete());
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "denied/#");
    assert_eq!(link.requests().await.len(), 3);
}

#[tokio::test]
async fn test_unanswered_subscription_is_bounded_by_timeout() {
    let registry = registry_with(&[
        ("silent/#", QoS::AtLeastOnce),
        ("answered/#", QoS::AtLeastOnce),
    ])
    .await;
    let link = ScriptedSubscribeLink::new().script("silent/#", SubscribeScript::Hang);

    let started = Instant::now();
    let report = replay_subscriptions(&link, &registry, REPLAY_TIMEOUT).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed[0].0, "silent/#");
    assert_eq!(
        link.requests().await.last().map(|(t, _)| t.clone()),
        Some("answered/#".to_string())
    );
}

#[tokio::test]
async fn test_duplicate_filter_replayed_once_with_latest_settings() {
    let first: Arc<dyn InboundHandler> = Arc::new(CountingHandler::default());
    let second = Arc::new(CountingHandler::default());
    let registry = SubscriptionRegistry::new();

    assert!(registry.register(subscription("dup/#", QoS::AtMostOnce, first)).await);
    assert!(
        !registry
            .register(subscription("dup/#", QoS::ExactlyOnce, second.clone()))
            .await
    );
    let link = ScriptedSubscribeLink::new();

    replay_subscriptions(&link, &registry, REPLAY_TIMEOUT).await;

    assert_eq!(
        link.requests().await,
        vec![("dup/#".to_string(), QoS::ExactlyOnce)]
    );
    for handler in registry.handlers_for("dup/x").await {
        handler.handle("dup/x", b"{}").await;
    }
    assert_eq!(second.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_registry_issues_nothing() {
    let registry = SubscriptionRegistry::new();
    let link = ScriptedSubscribeLink::new();

    let report = replay_subscriptions(&link, &registry, REPLAY_TIMEOUT).await;

    assert_eq!(report.attempted, 0);
    assert!(report.is_complete());
    assert!(link.requests().await.is_empty());
}

/// Link that registers a new subscription while the pass is running
struct RegisteringLink {
    registry: Arc<SubscriptionRegistry>,
    inner: ScriptedSubscribeLink,
}

#[async_trait]
impl SubscribeLink for RegisteringLink {
    async fn subscribe_and_wait(
        &self,
        topic: &str,
        qos: QoS,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        if topic == "a/#" {
            self.registry
                .register(subscription(
                    "late/#",
                    QoS::AtLeastOnce,
                    Arc::new(CountingHandler::default()),
                ))
                .await;
        }
        self.inner.subscribe_and_wait(topic, qos, timeout).await
    }
}

#[tokio::test]
async fn test_subscription_added_during_pass_waits_for_next_reconnect() {
    let registry = Arc::new(registry_with(&[("a/#", QoS::AtLeastOnce), ("b/#", QoS::AtLeastOnce)]).await);
    let link = RegisteringLink {
        registry: registry.clone(),
        inner: ScriptedSubscribeLink::new(),
    };

    let first = replay_subscriptions(&link, &registry, REPLAY_TIMEOUT).await;
    assert_eq!(first.attempted, 2);

    let second = replay_subscriptions(&link, &registry, REPLAY_TIMEOUT).await;
    assert_eq!(second.attempted, 3);
    let topics: Vec<String> = link
        .inner
        .requests()
        .await
        .into_iter()
        .map(|(t, _)| t)
        .collect();
    assert_eq!(topics, vec!["a/#", "b/#", "a/#", "b/#", "late/#"]);
}
