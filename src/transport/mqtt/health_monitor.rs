//! Session lifecycle decisions for one bridge-side MQTT client
//!
//! Everything here is pure: the client feeds in what just happened and gets
//! back the next [`ConnectionState`] or whether to retry. Logging of
//! transitions lives here too so both clients report them the same way.

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reconnection policy and state machine for the input and output clients
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide what to do after the link dropped `attempts_so_far` times in a row
    pub fn should_attempt_reconnection(
        attempts_so_far: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::ShuttingDown;
        }

        match config.max_attempts {
            Some(max) if attempts_so_far >= max => ReconnectionDecision::GiveUp {
                attempts: attempts_so_far,
            },
            _ => {
                let attempt = attempts_so_far + 1;
                ReconnectionDecision::Retry {
                    attempt,
                    delay: Duration::from_millis(config.calculate_backoff_delay(attempt)),
                }
            }
        }
    }

    /// State the client enters after `event`
    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectStarted => ConnectionState::Connecting,
            ConnectionEvent::SessionEstablished => ConnectionState::Connected,
            ConnectionEvent::LinkLost(reason) => ConnectionState::Disconnected(reason),
            ConnectionEvent::RetryScheduled(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::GaveUp(reason) => ConnectionState::PermanentlyDisconnected(reason),
            ConnectionEvent::ClosedLocally => {
                ConnectionState::Disconnected("Closed by bridge".to_string())
            }
        }
    }

    /// A ConnAck replays the registry only once a session existed before it
    pub fn should_replay_subscriptions(has_connected_before: bool) -> bool {
        has_connected_before
    }

    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    pub fn can_subscribe(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log a state change for the client labelled `role`
    pub fn log_state_transition(role: &str, from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connected) => {
                info!(role, attempt, "MQTT session re-established");
            }
            (_, ConnectionState::Connected) => {
                info!(role, "MQTT session established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!(role, reason = %reason, "MQTT link lost");
            }
            (_, ConnectionState::PermanentlyDisconnected(reason)) => {
                error!(role, reason = %reason, "MQTT client gave up reconnecting");
            }
            _ => {
                debug!(role, from = ?from, to = ?to, "MQTT state change");
            }
        }
    }

    /// Reject reconnect settings that could never reconnect or would spin
    pub fn validate_connection_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.max_attempts == Some(0) {
            return Err("reconnect max_attempts must be at least 1, or unset".to_string());
        }
        let all_zero = config.backoff_pattern.iter().all(|&ms| ms == 0);
        if all_zero && config.sustained_delay == 0 {
            return Err(
                "reconnect needs a non-zero backoff_ms entry or sustained_delay_ms".to_string(),
            );
        }
        Ok(())
    }
}

/// Outcome of [`HealthMonitor::should_attempt_reconnection`]
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Sleep `delay`, then poll the event loop again as attempt number `attempt`
    Retry { attempt: u32, delay: Duration },
    ShuttingDown,
    /// `max_attempts` reached
    GiveUp { attempts: u32 },
}

/// What the event loop or the owner just did
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnectStarted,
    /// ConnAck received
    SessionEstablished,
    /// Socket or protocol error reported by the event loop
    LinkLost(String),
    RetryScheduled(u32),
    GaveUp(String),
    /// DISCONNECT sent or tasks stopped by [`super::MqttClient::disconnect`]
    ClosedLocally,
}
