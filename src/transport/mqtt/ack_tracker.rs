//! Acknowledgment tracking for outgoing subscribe and publish requests
//!
//! rumqttc assigns packet ids inside the event loop, after a request has been
//! queued. Requests are queued under the client lock, so the event loop emits
//! `Outgoing::Subscribe(pkid)` / `Outgoing::Publish(pkid)` in the same order
//! the waiters were registered here. Each outgoing event binds the oldest
//! unbound waiter of its kind to the reported id; the matching SUBACK, PUBACK
//! or PUBCOMP completes it.

use rumqttc::QoS;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::oneshot;

/// Why an acknowledgment did not arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckFailure {
    /// SUBACK carried a failure return code
    Rejected,
    /// Connection dropped while the request was in flight
    ConnectionLost,
}

pub type AckResult = Result<(), AckFailure>;
pub type AckReceiver = oneshot::Receiver<AckResult>;
type AckSender = oneshot::Sender<AckResult>;

/// Pending acknowledgment waiters keyed by issue order, then by packet id
#[derive(Debug, Default)]
pub struct AckTracker {
    unbound_subscribes: VecDeque<AckSender>,
    unbound_publishes: VecDeque<(QoS, AckSender)>,
    subscribes: HashMap<u16, AckSender>,
    publishes: HashMap<u16, AckSender>,
    /// In-flight publish ids from a dropped connection that rumqttc will replay
    stale_publishes: HashSet<u16>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next subscribe request
    pub fn expect_subscribe(&mut self) -> AckReceiver {
        let (tx, rx) = oneshot::channel();
        self.unbound_subscribes.push_back(tx);
        rx
    }

    /// Register a waiter for the next publish request
    pub fn expect_publish(&mut self, qos: QoS) -> AckReceiver {
        let (tx, rx) = oneshot::channel();
        self.unbound_publishes.push_back((qos, tx));
        rx
    }

    /// Drop the most recent subscribe waiter when its request could not be queued
    pub fn retract_subscribe(&mut self) {
        self.unbound_subscribes.pop_back();
    }

    /// Drop the most recent publish waiter when its request could not be queued
    pub fn retract_publish(&mut self) {
        self.unbound_publishes.pop_back();
    }

    pub fn on_outgoing_subscribe(&mut self, pkid: u16) {
        if let Some(tx) = self.unbound_subscribes.pop_front() {
            self.subscribes.insert(pkid, tx);
        }
    }

    pub fn on_outgoing_publish(&mut self, pkid: u16) {
        if self.stale_publishes.remove(&pkid) {
            return;
        }

        let Some((qos, tx)) = self.unbound_publishes.pop_front() else {
            return;
        };
        match qos {
            QoS::AtMostOnce => {
                let _ = tx.send(Ok(()));
            }
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                self.publishes.insert(pkid, tx);
            }
        }
    }

    /// SUBACK for `pkid`; `granted` is false when any return code is a failure
    pub fn on_suback(&mut self, pkid: u16, granted: bool) {
        if let Some(tx) = self.subscribes.remove(&pkid) {
            let _ = tx.send(if granted {
                Ok(())
            } else {
                Err(AckFailure::Rejected)
            });
        }
    }

    /// PUBACK (QoS 1) or PUBCOMP (QoS 2) for `pkid`
    pub fn on_publish_complete(&mut self, pkid: u16) {
        if let Some(tx) = self.publishes.remove(&pkid) {
            let _ = tx.send(Ok(()));
        }
    }

    /// Fail every waiter bound to a packet id; returns how many were failed
    ///
    /// Unbound waiters stay queued: their requests have not reached the network
    /// yet and rumqttc sends them after reconnecting.
    pub fn on_connection_lost(&mut self) -> usize {
        let failed = self.subscribes.len() + self.publishes.len();

        for (_, tx) in self.subscribes.drain() {
            let _ = tx.send(Err(AckFailure::ConnectionLost));
        }
        for (pkid, tx) in self.publishes.drain() {
            self.stale_publishes.insert(pkid);
            let _ = tx.send(Err(AckFailure::ConnectionLost));
        }

        failed
    }

    /// Fail everything, bound or not
    pub fn fail_all(&mut self) {
        self.on_connection_lost();
        for tx in self.unbound_subscribes.drain(..) {
            let _ = tx.send(Err(AckFailure::ConnectionLost));
        }
        for (_, tx) in self.unbound_publishes.drain(..) {
            let _ = tx.send(Err(AckFailure::ConnectionLost));
        }
        self.stale_publishes.clear();
    }

    pub fn pending(&self) -> usize {
        self.unbound_subscribes.len()
            + self.unbound_publishes.len()
            + self.subscribes.len()
            + self.publishes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_acked_by_pkid() {
        // Arrange
        let mut tracker = AckTracker::new();
        let mut first = tracker.expect_subscribe();
        let mut second = tracker.expect_subscribe();

        // Act
        tracker.on_outgoing_subscribe(7);
        tracker.on_outgoing_subscribe(8);
        tracker.on_suback(8, true);

        // Assert
        assert_eq!(second.try_recv(), Ok(Ok(())));
        assert!(first.try_recv().is_err());
        tracker.on_suback(7, false);
        assert_eq!(first.try_recv(), Ok(Err(AckFailure::Rejected)));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_qos0_publish_completes_on_send() {
        let mut tracker = AckTracker::new();
        let mut rx = tracker.expect_publish(QoS::AtMostOnce);

        tracker.on_outgoing_publish(0);

        assert_eq!(rx.try_recv(), Ok(Ok(())));
    }

    #[test]
    fn test_qos1_publish_waits_for_puback() {
        let mut tracker = AckTracker::new();
        let mut rx = tracker.expect_publish(QoS::AtLeastOnce);

        tracker.on_outgoing_publish(3);
        assert!(rx.try_recv().is_err());

        tracker.on_publish_complete(3);
        assert_eq!(rx.try_recv(), Ok(Ok(())));
    }

    #[test]
    fn test_publish_and_subscribe_queues_are_independent() {
        let mut tracker = AckTracker::new();
        let mut publish = tracker.expect_publish(QoS::ExactlyOnce);
        let mut subscribe = tracker.expect_subscribe();

        tracker.on_outgoing_subscribe(1);
        tracker.on_outgoing_publish(2);
        tracker.on_suback(1, true);
        tracker.on_publish_complete(2);

        assert_eq!(subscribe.try_recv(), Ok(Ok(())));
        assert_eq!(publish.try_recv(), Ok(Ok(())));
    }

    #[test]
    fn test_connection_lost_fails_bound_waiters_only() {
        let mut tracker = AckTracker::new();
        let mut bound = tracker.expect_subscribe();
        let mut unbound = tracker.expect_subscribe();
        tracker.on_outgoing_subscribe(5);

        let failed = tracker.on_connection_lost();

        assert_eq!(failed, 1);
        assert_eq!(bound.try_recv(), Ok(Err(AckFailure::ConnectionLost)));
        assert!(unbound.try_recv().is_err());

        // The queued request goes out after reconnect
        tracker.on_outgoing_subscribe(6);
        tracker.on_suback(6, true);
        assert_eq!(unbound.try_recv(), Ok(Ok(())));
    }

    #[test]
    fn test_replayed_publish_not_rebound() {
        let mut tracker = AckTracker::new();
        let mut lost = tracker.expect_publish(QoS::AtLeastOnce);
        tracker.on_outgoing_publish(9);
        tracker.on_connection_lost();
        assert_eq!(lost.try_recv(), Ok(Err(AckFailure::ConnectionLost)));

        let mut fresh = tracker.expect_publish(QoS::AtLeastOnce);
        // rumqttc resends pkid 9 first, then the new request
        tracker.on_outgoing_publish(9);
        tracker.on_outgoing_publish(10);
        tracker.on_publish_complete(9);
        assert!(fresh.try_recv().is_err());

        tracker.on_publish_complete(10);
        assert_eq!(fresh.try_recv(), Ok(Ok(())));
    }

    #[test]
    fn test_retract_removes_latest_waiter() {
        let mut tracker = AckTracker::new();
        let mut kept = tracker.expect_publish(QoS::AtMostOnce);
        let _retracted = tracker.expect_publish(QoS::AtMostOnce);

        tracker.retract_publish();
        tracker.on_outgoing_publish(0);

        assert_eq!(kept.try_recv(), Ok(Ok(())));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let mut tracker = AckTracker::new();
        drop(tracker.expect_subscribe());

        tracker.on_outgoing_subscribe(1);
        tracker.on_suback(1, true);

        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_fail_all() {
        let mut tracker = AckTracker::new();
        let mut a = tracker.expect_subscribe();
        let mut b = tracker.expect_publish(QoS::AtLeastOnce);

        tracker.fail_all();

        assert_eq!(a.try_recv(), Ok(Err(AckFailure::ConnectionLost)));
        assert_eq!(b.try_recv(), Ok(Err(AckFailure::ConnectionLost)));
        assert_eq!(tracker.pending(), 0);
    }
}
