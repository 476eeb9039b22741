//! Impure I/O operations for the MQTT client
//!
//! [`MqttClient`] owns the rumqttc event loop. Publish and subscribe calls
//! complete only when the broker acknowledges them, connection loss is
//! followed by backoff reconnects, and every reconnect replays the
//! subscription registry from a separate task.

use super::ack_tracker::{AckFailure, AckReceiver, AckTracker};
use super::connection::{
    configure_mqtt_options, resolve_client_id, ConnectionState, MqttError, OperationTimeouts,
    ReconnectConfig,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{
    dispatch_loop, EventRoute, InboundMessage, MessageHandler, INBOUND_CHANNEL_CAPACITY,
};
use super::registry::{
    replay_subscriptions, InboundHandler, SubscribeLink, Subscription, SubscriptionRegistry,
};
use crate::config::MqttSection;
use crate::mqtt_span;
use crate::protocol::topics::{validate_topic_filter, validate_topic_name};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Requests rumqttc buffers between the client handle and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long disconnect waits for a background task before aborting it
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

fn lock_recover<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn apply_transition(
    role: &str,
    state_tx: &watch::Sender<ConnectionState>,
    event: ConnectionEvent,
) {
    let next = HealthMonitor::determine_next_state(event);
    let previous = state_tx.send_replace(next.clone());
    if previous != next {
        HealthMonitor::log_state_transition(role, &previous, &next);
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// State shared by the client handle, the event loop task and replay tasks
struct ClientShared {
    role: String,
    client: Mutex<AsyncClient>,
    acks: StdMutex<AckTracker>,
    registry: Arc<SubscriptionRegistry>,
    timeouts: OperationTimeouts,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ClientShared {
    fn acks(&self) -> MutexGuard<'_, AckTracker> {
        lock_recover(&self.acks)
    }

    /// Queue a SUBSCRIBE and wait for its SUBACK
    ///
    /// The waiter is registered under the client lock, so its position in the
    /// tracker matches the order rumqttc assigns packet ids.
    async fn issue_subscribe(
        &self,
        topic: &str,
        qos: QoS,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let ack = {
            let client = self.client.lock().await;
            let ack = self.acks().expect_subscribe();
            match tokio::time::timeout(timeout, client.subscribe(topic, qos)).await {
                Ok(Ok(())) => ack,
                Ok(Err(e)) => {
                    self.acks().retract_subscribe();
                    return Err(MqttError::SubscriptionFailed(e));
                }
                Err(_) => {
                    self.acks().retract_subscribe();
                    return Err(MqttError::Timeout {
                        operation: format!("queueing subscribe on {topic}"),
                    });
                }
            }
        };

        self.wait_for_ack(ack, timeout, "subscribe", topic).await
    }

    /// Queue a PUBLISH and wait until it is delivered at the requested QoS
    async fn issue_publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let ack = {
            let client = self.client.lock().await;
            let ack = self.acks().expect_publish(qos);
            match tokio::time::timeout(timeout, client.publish(topic, qos, retain, payload)).await {
                Ok(Ok(())) => ack,
                Ok(Err(e)) => {
                    self.acks().retract_publish();
                    return Err(MqttError::PublishFailed(e));
                }
                Err(_) => {
                    self.acks().retract_publish();
                    return Err(MqttError::Timeout {
                        operation: format!("queueing publish on {topic}"),
                    });
                }
            }
        };

        self.wait_for_ack(ack, timeout, "publish", topic).await
    }

    async fn wait_for_ack(
        &self,
        ack: AckReceiver,
        timeout: Duration,
        kind: &str,
        topic: &str,
    ) -> Result<(), MqttError> {
        let operation = || format!("{kind} on {topic}");
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::select! {
            result = ack => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(AckFailure::Rejected)) => Err(MqttError::SubscribeRejected {
                    topic: topic.to_string(),
                }),
                Ok(Err(AckFailure::ConnectionLost)) | Err(_) => Err(MqttError::ConnectionLost {
                    operation: operation(),
                }),
            },
            _ = tokio::time::sleep(timeout) => Err(MqttError::Timeout {
                operation: operation(),
            }),
            _ = wait_for_shutdown(&mut shutdown_rx) => Err(MqttError::Cancelled),
        }
    }
}

#[async_trait]
impl SubscribeLink for ClientShared {
    async fn subscribe_and_wait(
        &self,
        topic: &str,
        qos: QoS,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        self.issue_subscribe(topic, qos, timeout).await
    }
}

/// Background task driving the rumqttc event loop
struct EventLoopTask {
    event_loop: EventLoop,
    shared: Arc<ClientShared>,
    shutdown_rx: watch::Receiver<bool>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    reconnect_config: ReconnectConfig,
    reconnect_attempts: u32,
    connected_before: bool,
}

impl EventLoopTask {
    async fn run(mut self) {
        info!(role = %self.shared.role, "Starting MQTT event loop");

        loop {
            let polled = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!(role = %self.shared.role, "Shutdown signal received, stopping event loop");
                        break;
                    }
                    continue;
                }
                polled = self.event_loop.poll() => polled,
            };

            let keep_running = match polled {
                Ok(event) => {
                    self.process_route(MessageHandler::route_mqtt_event(&event))
                        .await
                }
                Err(e) => self.handle_error(e).await,
            };
            if !keep_running {
                break;
            }
        }

        self.shared.acks().fail_all();
        info!(role = %self.shared.role, "MQTT event loop stopped");
    }

    /// Returns false when the loop should stop
    async fn process_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.reconnect_attempts = 0;
                apply_transition(
                    &self.shared.role,
                    &self.shared.state_tx,
                    ConnectionEvent::SessionEstablished,
                );
                if HealthMonitor::should_replay_subscriptions(self.connected_before) {
                    self.spawn_replay();
                }
                self.connected_before = true;
            }
            EventRoute::MessageReceived(message) => {
                if self.inbound_tx.send(message).await.is_err() {
                    warn!(role = %self.shared.role, "Inbound dispatch loop stopped; dropping message");
                }
            }
            EventRoute::SubscribeSent { packet_id } => {
                self.shared.acks().on_outgoing_subscribe(packet_id);
            }
            EventRoute::PublishSent { packet_id } => {
                self.shared.acks().on_outgoing_publish(packet_id);
            }
            EventRoute::SubscriptionAcknowledged { packet_id, granted } => {
                if !granted {
                    warn!(role = %self.shared.role, packet_id, "Broker rejected subscription");
                }
                self.shared.acks().on_suback(packet_id, granted);
            }
            EventRoute::PublishAcknowledged { packet_id } => {
                self.shared.acks().on_publish_complete(packet_id);
            }
            EventRoute::DisconnectedByBroker => {
                // The next poll reports the closed socket and drives reconnection
                warn!(role = %self.shared.role, "Broker sent DISCONNECT");
            }
            EventRoute::DisconnectSent => {
                apply_transition(
                    &self.shared.role,
                    &self.shared.state_tx,
                    ConnectionEvent::ClosedLocally,
                );
                return false;
            }
            EventRoute::InfrastructureEvent(description) => {
                debug!(role = %self.shared.role, event = %description, "MQTT infrastructure event");
            }
            EventRoute::OutgoingEvent => {}
        }
        true
    }

    /// Returns true after a backoff sleep when the next poll should reconnect
    async fn handle_error(&mut self, err: ConnectionError) -> bool {
        let reason = err.to_string();
        let failed = self.shared.acks().on_connection_lost();
        apply_transition(
            &self.shared.role,
            &self.shared.state_tx,
            ConnectionEvent::LinkLost(reason.clone()),
        );
        if failed > 0 {
            warn!(role = %self.shared.role, failed, "In-flight requests failed by connection loss");
        }

        if !self.connected_before {
            error!(role = %self.shared.role, error = %reason, "Initial MQTT connection failed");
            return false;
        }

        let shutdown_requested = *self.shutdown_rx.borrow();
        match HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            shutdown_requested,
        ) {
            ReconnectionDecision::Retry { attempt, delay } => {
                self.reconnect_attempts = attempt;
                apply_transition(
                    &self.shared.role,
                    &self.shared.state_tx,
                    ConnectionEvent::RetryScheduled(attempt),
                );
                info!(
                    role = %self.shared.role,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Reconnecting to MQTT broker"
                );
                MqttClient::interruptible_sleep(self.shutdown_rx.clone(), delay).await
            }
            ReconnectionDecision::ShuttingDown => false,
            ReconnectionDecision::GiveUp { attempts } => {
                apply_transition(
                    &self.shared.role,
                    &self.shared.state_tx,
                    ConnectionEvent::GaveUp(format!(
                        "gave up after {attempts} reconnection attempts: {reason}"
                    )),
                );
                false
            }
        }
    }

    fn spawn_replay(&self) {
        let shared = Arc::clone(&self.shared);
        let span = mqtt_span!(operation = "resubscribe", role = %shared.role);
        tokio::spawn(
            async move {
                let timeout = shared.timeouts.resubscribe;
                let report = replay_subscriptions(&*shared, &shared.registry, timeout).await;
                if !report.is_complete() {
                    warn!(
                        role = %shared.role,
                        attempted = report.attempted,
                        failed = report.failed.len(),
                        "Resubscription incomplete"
                    );
                }
            }
            .instrument(span),
        );
    }
}

/// MQTT client with acknowledged operations, reconnection and resubscription
pub struct MqttClient {
    role: String,
    client_id: String,
    shared: Arc<ClientShared>,
    event_loop: StdMutex<Option<EventLoop>>,
    shutdown_tx: watch::Sender<bool>,
    reconnect_config: ReconnectConfig,
    event_loop_handle: StdMutex<Option<JoinHandle<()>>>,
    dispatch_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// Build a client; nothing touches the network until [`MqttClient::connect`]
    ///
    /// `role` labels log lines and the generated client id when the
    /// configuration leaves it empty.
    pub fn new(
        role: &str,
        config: &MqttSection,
        reconnect_config: ReconnectConfig,
        timeouts: OperationTimeouts,
    ) -> Result<Self, MqttError> {
        HealthMonitor::validate_connection_config(&reconnect_config)
            .map_err(MqttError::InvalidConfig)?;

        let client_id = resolve_client_id(&config.client_id, role);
        match reconnect_config.calculate_max_total_time() {
            Some(total_ms) => debug!(
                role,
                max_attempts = ?reconnect_config.max_attempts,
                total_ms,
                "Reconnection window is bounded"
            ),
            None => debug!(role, "Reconnection attempts are unlimited"),
        }
        let mqtt_options = configure_mqtt_options(&client_id, config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (state_tx, _) =
            watch::channel(ConnectionState::Disconnected("Not connected".to_string()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            role: role.to_string(),
            client_id,
            shared: Arc::new(ClientShared {
                role: role.to_string(),
                client: Mutex::new(client),
                acks: StdMutex::new(AckTracker::new()),
                registry: Arc::new(SubscriptionRegistry::new()),
                timeouts,
                state_tx,
                shutdown_rx,
            }),
            event_loop: StdMutex::new(Some(event_loop)),
            shutdown_tx,
            reconnect_config,
            event_loop_handle: StdMutex::new(None),
            dispatch_handle: StdMutex::new(None),
        })
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason));
                    }
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(MqttError::Timeout {
                operation: "ConnAck".to_string(),
            }),
        }
    }

    /// Sleep that returns false as soon as shutdown is signalled
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = wait_for_shutdown(&mut shutdown_rx) => false,
        }
    }

    /// Start the event loop and wait for the first ConnAck
    ///
    /// A failed first connect stops the background tasks and is returned to
    /// the caller; reconnection only applies once a session was established.
    pub async fn connect(&self) -> Result<(), MqttError> {
        let event_loop = lock_recover(&self.event_loop).take().ok_or_else(|| {
            MqttError::ConnectionFailed("Event loop already started".to_string())
        })?;

        let state_rx = self.shared.state_tx.subscribe();
        apply_transition(
            &self.role,
            &self.shared.state_tx,
            ConnectionEvent::ConnectStarted,
        );
        info!(role = %self.role, client_id = %self.client_id, "Connecting to MQTT broker");

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let dispatch = tokio::spawn(dispatch_loop(
            inbound_rx,
            Arc::clone(&self.shared.registry),
        ));
        let task = EventLoopTask {
            event_loop,
            shared: Arc::clone(&self.shared),
            shutdown_rx: self.shutdown_tx.subscribe(),
            inbound_tx,
            reconnect_config: self.reconnect_config.clone(),
            reconnect_attempts: 0,
            connected_before: false,
        };
        let handle = tokio::spawn(task.run());
        *lock_recover(&self.dispatch_handle) = Some(dispatch);
        *lock_recover(&self.event_loop_handle) = Some(handle);

        match Self::wait_for_connection_confirmation(state_rx, self.shared.timeouts.connect).await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(role = %self.role, error = %e, "MQTT connect failed");
                self.stop_tasks();
                Err(e)
            }
        }
    }

    /// Register a subscription and ask the broker for it
    ///
    /// The registry entry is kept even when the request fails, so the next
    /// reconnect replays it. A client that was never connected rejects the
    /// call without registering anything.
    pub async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), MqttError> {
        validate_topic_filter(topic)?;
        if !self.is_started() {
            return Err(MqttError::NotConnected {
                state: self.connection_state(),
            });
        }

        let added = self
            .shared
            .registry
            .register(Subscription {
                topic: topic.to_string(),
                qos,
                handler,
            })
            .await;
        debug!(role = %self.role, topic, added, "Subscription registered");

        self.check_connection_state(HealthMonitor::can_subscribe)?;
        self.shared
            .issue_subscribe(topic, qos, self.shared.timeouts.operation)
            .await?;

        info!(role = %self.role, topic, ?qos, "Subscribed");
        Ok(())
    }

    /// Publish and wait for delivery at `qos`
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        validate_topic_name(topic)?;
        self.check_connection_state(HealthMonitor::can_publish)?;

        let bytes = payload.len();
        self.shared
            .issue_publish(topic, qos, retain, payload, self.shared.timeouts.operation)
            .await?;

        debug!(role = %self.role, topic, bytes, retain, "Published");
        Ok(())
    }

    /// Send DISCONNECT when connected, then stop the background tasks
    ///
    /// Calling it on a client that never connected, or a second time, is a no-op.
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        if *self.shutdown_tx.borrow() {
            debug!(role = %self.role, "Disconnect requested on a stopped client");
            return Ok(());
        }
        let Some(mut event_loop_handle) = lock_recover(&self.event_loop_handle).take() else {
            debug!(role = %self.role, "Disconnect requested on a client that never connected");
            return Ok(());
        };

        let mut event_loop_finished = false;
        if HealthMonitor::can_publish(&self.connection_state()) {
            let request = {
                let client = self.shared.client.lock().await;
                tokio::time::timeout(self.shared.timeouts.operation, client.disconnect()).await
            };
            match request {
                Ok(Ok(())) => {
                    event_loop_finished =
                        tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut event_loop_handle)
                            .await
                            .is_ok();
                }
                Ok(Err(e)) => warn!(role = %self.role, error = %e, "Failed to queue DISCONNECT"),
                Err(_) => warn!(role = %self.role, "Timed out queueing DISCONNECT"),
            }
        }

        self.shutdown_tx.send_replace(true);
        if !event_loop_finished {
            Self::join_or_abort(event_loop_handle, &self.role, "event loop").await;
        }
        let dispatch = lock_recover(&self.dispatch_handle).take();
        if let Some(dispatch) = dispatch {
            Self::join_or_abort(dispatch, &self.role, "inbound dispatch").await;
        }

        apply_transition(&self.role, &self.shared.state_tx, ConnectionEvent::ClosedLocally);
        info!(role = %self.role, "Disconnected from MQTT broker");
        Ok(())
    }

    async fn join_or_abort(mut handle: JoinHandle<()>, role: &str, task: &str) {
        if tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut handle)
            .await
            .is_err()
        {
            warn!(role, task, "Background task did not stop in time; aborting");
            handle.abort();
        }
    }

    fn stop_tasks(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = lock_recover(&self.event_loop_handle).take() {
            handle.abort();
        }
        if let Some(handle) = lock_recover(&self.dispatch_handle).take() {
            handle.abort();
        }
    }

    fn is_started(&self) -> bool {
        lock_recover(&self.event_loop).is_none()
    }

    fn check_connection_state(
        &self,
        allowed: fn(&ConnectionState) -> bool,
    ) -> Result<(), MqttError> {
        let state = self.connection_state();
        if allowed(&state) {
            Ok(())
        } else {
            Err(MqttError::NotConnected { state })
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), ConnectionState::Connected)
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            ConnectionState::PermanentlyDisconnected(_)
        )
    }

    /// Receiver that observes every connection state change
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Registered topic filters in registration order
    pub async fn subscriptions(&self) -> Vec<String> {
        self.shared.registry.topics().await
    }

    /// Publish and subscribe requests still waiting for the broker
    pub fn pending_acks(&self) -> usize {
        self.shared.acks().pending()
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, qos, retain, payload).await
    }

    fn is_connected(&self) -> bool {
        MqttClient::is_connected(self)
    }

    fn connection_state(&self) -> ConnectionState {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Drop cannot await; call disconnect() for a graceful DISCONNECT
        self.stop_tasks();
    }
}
