//! Relay metrics tracking.
//!
//! Provides atomic counters for monitoring connections and fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for the relay.
#[derive(Debug)]
pub struct RelayMetrics {
    /// Total connections opened.
    connections_opened: AtomicU64,

    /// Total connections closed.
    connections_closed: AtomicU64,

    /// Total frames received from clients.
    messages_received: AtomicU64,

    /// Total frames written to clients.
    messages_sent: AtomicU64,

    /// Inbound frames discarded as malformed.
    malformed_messages: AtomicU64,

    /// Publishes dispatched.
    publishes: AtomicU64,

    /// Publishes refused by the publish policy.
    publishes_rejected: AtomicU64,

    /// Payloads queued for a subscriber.
    deliveries: AtomicU64,

    /// Payloads dropped because a subscriber's queue was full.
    deliveries_dropped: AtomicU64,

    /// Connections removed after a failed delivery.
    evictions: AtomicU64,

    /// Connections closed for inactivity.
    idle_timeouts: AtomicU64,

    /// Total subscriptions.
    subscriptions: AtomicU64,

    /// Total unsubscriptions.
    unsubscriptions: AtomicU64,

    /// Transport errors.
    errors: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
            publishes_rejected: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            deliveries_dropped: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            subscriptions: AtomicU64::new(0),
            unsubscriptions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a connection opened.
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection closed.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message received.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message sent.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a malformed inbound message.
    pub fn record_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dispatched publish.
    pub fn record_publish(&self) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a publish refused by policy.
    pub fn record_publish_rejected(&self) {
        self.publishes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records payloads queued for subscribers.
    pub fn record_deliveries(&self, count: u64) {
        self.deliveries.fetch_add(count, Ordering::Relaxed);
    }

    /// Records payloads dropped on full queues.
    pub fn record_dropped(&self, count: u64) {
        self.deliveries_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Records connections evicted after failed deliveries.
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an idle timeout.
    pub fn record_idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a subscription.
    pub fn record_subscription(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an unsubscription.
    pub fn record_unsubscription(&self) {
        self.unsubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total connections opened.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Returns the total connections closed.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    /// Returns the current active connections.
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.connections_opened()
            .saturating_sub(self.connections_closed())
    }

    /// Returns the total messages received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Returns the total messages sent.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Returns the total malformed messages.
    #[must_use]
    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages.load(Ordering::Relaxed)
    }

    /// Returns the total publishes.
    #[must_use]
    pub fn publishes(&self) -> u64 {
        self.publishes.load(Ordering::Relaxed)
    }

    /// Returns the total rejected publishes.
    #[must_use]
    pub fn publishes_rejected(&self) -> u64 {
        self.publishes_rejected.load(Ordering::Relaxed)
    }

    /// Returns the total deliveries.
    #[must_use]
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Returns the total dropped deliveries.
    #[must_use]
    pub fn deliveries_dropped(&self) -> u64 {
        self.deliveries_dropped.load(Ordering::Relaxed)
    }

    /// Returns the total evictions.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Returns the total idle timeouts.
    #[must_use]
    pub fn idle_timeouts(&self) -> u64 {
        self.idle_timeouts.load(Ordering::Relaxed)
    }

    /// Returns the total subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::Relaxed)
    }

    /// Returns the total unsubscriptions.
    #[must_use]
    pub fn unsubscriptions(&self) -> u64 {
        self.unsubscriptions.load(Ordering::Relaxed)
    }

    /// Returns the total errors.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns deliveries per second since start.
    #[must_use]
    pub fn deliveries_per_second(&self) -> f64 {
        let elapsed = self.uptime().as_secs_f64();
        if elapsed > 0.0 {
            self.deliveries() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            connections_opened: self.connections_opened(),
            connections_closed: self.connections_closed(),
            active_connections: self.active_connections(),
            messages_received: self.messages_received(),
            messages_sent: self.messages_sent(),
            malformed_messages: self.malformed_messages(),
            publishes: self.publishes(),
            publishes_rejected: self.publishes_rejected(),
            deliveries: self.deliveries(),
            deliveries_dropped: self.deliveries_dropped(),
            evictions: self.evictions(),
            idle_timeouts: self.idle_timeouts(),
            subscriptions: self.subscriptions(),
            unsubscriptions: self.unsubscriptions(),
            errors: self.errors(),
            uptime: self.uptime(),
            deliveries_per_second: self.deliveries_per_second(),
        }
    }
}

/// A point-in-time snapshot of relay metrics.
#[derive(Debug, Clone)]
pub struct RelayMetricsSnapshot {
    /// Total connections opened.
    pub connections_opened: u64,
    /// Total connections closed.
    pub connections_closed: u64,
    /// Active connections.
    pub active_connections: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Malformed messages.
    pub malformed_messages: u64,
    /// Publishes.
    pub publishes: u64,
    /// Rejected publishes.
    pub publishes_rejected: u64,
    /// Deliveries.
    pub deliveries: u64,
    /// Dropped deliveries.
    pub deliveries_dropped: u64,
    /// Evictions.
    pub evictions: u64,
    /// Idle timeouts.
    pub idle_timeouts: u64,
    /// Subscriptions.
    pub subscriptions: u64,
    /// Unsubscriptions.
    pub unsubscriptions: u64,
    /// Errors.
    pub errors: u64,
    /// Uptime.
    pub uptime: Duration,
    /// Deliveries per second.
    pub deliveries_per_second: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = RelayMetrics::new();
        assert_eq!(metrics.connections_opened(), 0);
        assert_eq!(metrics.connections_closed(), 0);
        assert_eq!(metrics.active_connections(), 0);
    }

    #[test]
    fn test_metrics_record_connection() {
        let metrics = RelayMetrics::new();

        metrics.record_connection_opened();
        metrics.record_connection_opened();
        assert_eq!(metrics.active_connections(), 2);

        metrics.record_connection_closed();
        assert_eq!(metrics.connections_closed(), 1);
        assert_eq!(metrics.active_connections(), 1);
    }

    #[test]
    fn test_metrics_active_never_underflows() {
        let metrics = RelayMetrics::new();
        metrics.record_connection_closed();
        assert_eq!(metrics.active_connections(), 0);
    }

    #[test]
    fn test_metrics_record_fanout() {
        let metrics = RelayMetrics::new();

        metrics.record_publish();
        metrics.record_deliveries(3);
        metrics.record_dropped(1);
        metrics.record_evictions(2);

        assert_eq!(metrics.publishes(), 1);
        assert_eq!(metrics.deliveries(), 3);
        assert_eq!(metrics.deliveries_dropped(), 1);
        assert_eq!(metrics.evictions(), 2);
    }

    #[test]
    fn test_metrics_record_subscription() {
        let metrics = RelayMetrics::new();

        metrics.record_subscription();
        metrics.record_subscription();
        metrics.record_unsubscription();

        assert_eq!(metrics.subscriptions(), 2);
        assert_eq!(metrics.unsubscriptions(), 1);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = RelayMetrics::new();

        metrics.record_connection_opened();
        metrics.record_message_received();
        metrics.record_message_sent();
        metrics.record_malformed();
        metrics.record_publish_rejected();
        metrics.record_idle_timeout();
        metrics.record_error();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.connections_opened, 1);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.messages_sent, 1);
        assert_eq!(snapshot.malformed_messages, 1);
        assert_eq!(snapshot.publishes_rejected, 1);
        assert_eq!(snapshot.idle_timeouts, 1);
        assert_eq!(snapshot.errors, 1);
    }
}
