//! Broadcast dispatch.
//!
//! Delivers one payload to every connection subscribed to a room. Delivery
//! to each subscriber is a non-blocking enqueue on that subscriber's bounded
//! outbound queue, so one slow client never delays the others.
//!
//! The fan-out itself runs inside the registry task (see
//! [`Registry::publish`](super::registry::Registry::publish)); this module
//! holds the per-subscriber delivery rules and the public publish entry point
//! with its authorization gate.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::connection::ConnectionId;
use super::messages::Payload;
use super::metrics::RelayMetrics;
use super::registry::Registry;
use super::rooms::Room;
use crate::config::{OverflowPolicy, PublishPolicy};
use crate::error::{RelayError, RelayResult};

/// Origin of a publish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publisher {
    /// A connected client sent `sendMessage`.
    Connection(ConnectionId),
    /// A trusted in-process publisher.
    Backend,
}

/// Decides whether a publisher may publish into a room.
pub trait PublishAuthorizer: Send + Sync {
    /// Returns true if the publish is allowed.
    fn authorize(&self, publisher: Publisher, room: &Room) -> bool;
}

impl PublishAuthorizer for PublishPolicy {
    fn authorize(&self, publisher: Publisher, room: &Room) -> bool {
        if publisher == Publisher::Backend {
            return true;
        }

        match self {
            Self::Open => true,
            Self::BackendOnly => false,
            Self::Prefixes(prefixes) => prefixes.iter().any(|p| room.has_prefix(p)),
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Target room.
    pub room: Room,

    /// Subscribers in the snapshot.
    pub targeted: usize,

    /// Subscribers the payload was queued for.
    pub delivered: usize,

    /// Subscribers that missed the payload because their queue was full.
    pub dropped: usize,

    /// Subscribers removed from the registry after a failed delivery.
    pub evicted: Vec<ConnectionId>,
}

impl DeliveryReport {
    /// Creates an empty report for a room.
    #[must_use]
    pub fn empty(room: Room) -> Self {
        Self {
            room,
            targeted: 0,
            delivered: 0,
            dropped: 0,
            evicted: Vec::new(),
        }
    }
}

/// Queues `payload` on every target's outbound channel.
///
/// A closed channel always marks the target for eviction; a full one
/// either evicts or drops depending on `policy`.
pub(crate) fn deliver<'a, I>(
    room: &Room,
    payload: &Payload,
    targets: I,
    policy: OverflowPolicy,
) -> DeliveryReport
where
    I: IntoIterator<Item = (ConnectionId, &'a mpsc::Sender<Payload>)>,
{
    let mut report = DeliveryReport::empty(room.clone());

    for (id, outbound) in targets {
        report.targeted += 1;

        match outbound.try_send(payload.clone()) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => match policy {
                OverflowPolicy::DropNewest => {
                    debug!("Outbound queue full for {}, dropping message for room {}", id, room);
                    report.dropped += 1;
                }
                OverflowPolicy::Disconnect => {
                    warn!("Outbound queue full for {}, disconnecting", id);
                    report.evicted.push(id);
                }
            },
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for {}", id);
                report.evicted.push(id);
            }
        }
    }

    report
}

/// Publish entry point shared by connection handlers and backend publishers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    authorizer: Arc<dyn PublishAuthorizer>,
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    /// Creates a new dispatcher.
    #[must_use]
    pub fn new(
        registry: Registry,
        authorizer: Arc<dyn PublishAuthorizer>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            registry,
            authorizer,
            metrics,
        }
    }

    /// Publishes a payload to every current subscriber of `room`.
    ///
    /// Returns once delivery to every subscriber has been attempted. Failed
    /// deliveries are handled per subscriber and show up in the report, not
    /// as an error.
    ///
    /// # Errors
    ///
    /// Returns `PublishRejected` if the authorizer refuses the publish,
    /// `NotRegistered` if a connection publisher has already been removed, or
    /// `RegistryClosed` if the registry has stopped.
    pub async fn publish(
        &self,
        publisher: Publisher,
        room: Room,
        payload: Payload,
    ) -> RelayResult<DeliveryReport> {
        if !self.authorizer.authorize(publisher, &room) {
            self.metrics.record_publish_rejected();
            return Err(RelayError::PublishRejected { room });
        }

        let report = self.registry.publish(publisher, room, payload).await?;

        self.metrics.record_publish();
        self.metrics.record_deliveries(report.delivered as u64);
        self.metrics.record_dropped(report.dropped as u64);
        self.metrics.record_evictions(report.evicted.len() as u64);

        debug!(
            "Published to room {}: {}/{} delivered, {} dropped, {} evicted",
            report.room,
            report.delivered,
            report.targeted,
            report.dropped,
            report.evicted.len()
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn room(name: &str) -> Room {
        Room::parse(name).expect("room")
    }

    #[test]
    fn test_open_policy_allows_everyone() {
        let policy = PublishPolicy::Open;
        let conn = Publisher::Connection(ConnectionId::next());
        assert!(policy.authorize(conn, &room("BTC_USD")));
        assert!(policy.authorize(Publisher::Backend, &room("BTC_USD")));
    }

    #[test]
    fn test_backend_only_policy() {
        let policy = PublishPolicy::BackendOnly;
        let conn = Publisher::Connection(ConnectionId::next());
        assert!(!policy.authorize(conn, &room("BTC_USD")));
        assert!(policy.authorize(Publisher::Backend, &room("BTC_USD")));
    }

    #[test]
    fn test_prefix_policy() {
        let policy = PublishPolicy::Prefixes(vec!["chat@".to_string()]);
        let conn = Publisher::Connection(ConnectionId::next());
        assert!(policy.authorize(conn, &room("chat@lobby")));
        assert!(!policy.authorize(conn, &room("depth@BTC_USD")));
        assert!(policy.authorize(Publisher::Backend, &room("depth@BTC_USD")));
    }

    #[tokio::test]
    async fn test_deliver_success() {
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let (id1, id2) = (ConnectionId::next(), ConnectionId::next());

        let report = deliver(
            &room("BTC_USD"),
            &Payload::from("tick"),
            [(id1, &tx1), (id2, &tx2)],
            OverflowPolicy::Disconnect,
        );

        assert_eq!(report.targeted, 2);
        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());
        assert_eq!(rx1.recv().await, Some(Payload::from("tick")));
        assert_eq!(rx2.recv().await, Some(Payload::from("tick")));
    }

    #[tokio::test]
    async fn test_deliver_full_queue_disconnect() {
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(4);
        let (slow, fast) = (ConnectionId::next(), ConnectionId::next());
        slow_tx.try_send(Payload::from("backlog")).expect("fill");

        let report = deliver(
            &room("BTC_USD"),
            &Payload::from("tick"),
            [(slow, &slow_tx), (fast, &fast_tx)],
            OverflowPolicy::Disconnect,
        );

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.evicted, vec![slow]);
        assert_eq!(fast_rx.recv().await, Some(Payload::from("tick")));
    }

    #[tokio::test]
    async fn test_deliver_full_queue_drop_newest() {
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let slow = ConnectionId::next();
        slow_tx.try_send(Payload::from("backlog")).expect("fill");

        let report = deliver(
            &room("BTC_USD"),
            &Payload::from("tick"),
            [(slow, &slow_tx)],
            OverflowPolicy::DropNewest,
        );

        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 1);
        assert!(report.evicted.is_empty());
        assert_eq!(slow_rx.recv().await, Some(Payload::from("backlog")));
    }

    #[test]
    fn test_deliver_closed_queue_always_evicts() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let id = ConnectionId::next();

        let report = deliver(
            &room("BTC_USD"),
            &Payload::from("tick"),
            [(id, &tx)],
            OverflowPolicy::DropNewest,
        );

        assert_eq!(report.evicted, vec![id]);
    }

    #[tokio::test]
    async fn test_dispatcher_rejects_unauthorized() {
        let metrics = Arc::new(RelayMetrics::new());
        let (registry, _task) = Registry::spawn(&RelayConfig::default(), Arc::clone(&metrics));
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(PublishPolicy::BackendOnly),
            Arc::clone(&metrics),
        );

        let result = dispatcher
            .publish(
                Publisher::Connection(ConnectionId::next()),
                room("BTC_USD"),
                Payload::from("x"),
            )
            .await;

        assert!(matches!(result, Err(RelayError::PublishRejected { .. })));
        assert_eq!(metrics.publishes_rejected(), 1);
        assert_eq!(metrics.publishes(), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_records_metrics() {
        let metrics = Arc::new(RelayMetrics::new());
        let (registry, _task) = Registry::spawn(&RelayConfig::default(), Arc::clone(&metrics));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            Arc::new(PublishPolicy::Open),
            Arc::clone(&metrics),
        );

        let (tx, mut rx) = mpsc::channel(4);
        let id = registry.register(tx).await.expect("register");
        registry.subscribe(id, room("BTC_USD")).await;

        let report = dispatcher
            .publish(Publisher::Backend, room("BTC_USD"), Payload::from("{\"price\":100}"))
            .await
            .expect("publish");

        assert_eq!(report.delivered, 1);
        assert_eq!(metrics.publishes(), 1);
        assert_eq!(metrics.deliveries(), 1);
        assert_eq!(rx.recv().await, Some(Payload::from("{\"price\":100}")));
    }

    #[tokio::test]
    async fn test_dispatcher_drops_publish_from_removed_connection() {
        let metrics = Arc::new(RelayMetrics::new());
        let (registry, _task) = Registry::spawn(&RelayConfig::default(), Arc::clone(&metrics));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            Arc::new(PublishPolicy::Open),
            Arc::clone(&metrics),
        );

        let (tx_sub, mut rx_sub) = mpsc::channel(4);
        let (tx_gone, _rx_gone) = mpsc::channel(4);
        let sub = registry.register(tx_sub).await.expect("register");
        let gone = registry.register(tx_gone).await.expect("register");
        registry.subscribe(sub, room("BTC_USD")).await;
        registry.unregister(gone).await;

        let result = dispatcher
            .publish(Publisher::Connection(gone), room("BTC_USD"), Payload::from("late"))
            .await;

        assert!(matches!(result, Err(RelayError::NotRegistered(id)) if id == gone));
        assert!(rx_sub.try_recv().is_err());
        assert_eq!(metrics.publishes(), 0);
        assert_eq!(metrics.deliveries(), 0);
    }
}
