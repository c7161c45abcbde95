//! WebSocket connection state management.
//!
//! Provides connection identities and the per-connection lifecycle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Global connection ID counter.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a connection.
///
/// Allocated from a process-wide monotonic counter, so an ID is never
/// handed out twice during the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric ID.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport accepted, not yet registered.
    Connecting,
    /// Registered; subscribe and deliver apply.
    Active,
    /// Removed from the registry. Terminal.
    Closed,
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the transport.
    ClientClosed,
    /// Reading from the transport failed.
    TransportError,
    /// No inbound activity within the idle timeout.
    IdleTimeout,
    /// The registry dropped the connection after a failed delivery.
    Evicted,
    /// The registry is no longer running.
    Shutdown,
}

impl CloseReason {
    /// Returns a short label for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::IdleTimeout => "idle_timeout",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Per-task view of one WebSocket session.
///
/// Owned by the connection's reader task. Room membership itself lives in
/// the registry; this only tracks where the session is in its lifecycle.
#[derive(Debug)]
pub struct Connection {
    id: Option<ConnectionId>,
    state: ConnectionState,
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
}

impl Connection {
    /// Creates a connection in the `Connecting` state.
    #[must_use]
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            id: None,
            state: ConnectionState::Connecting,
            peer,
            connected_at: Utc::now(),
        }
    }

    /// Returns the connection ID, once registered.
    #[must_use]
    pub const fn id(&self) -> Option<ConnectionId> {
        self.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the peer address, if known.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns when the transport was accepted.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Returns true if the connection is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Returns the ID if the connection is active.
    #[must_use]
    pub fn active_id(&self) -> Option<ConnectionId> {
        if self.is_active() {
            self.id
        } else {
            None
        }
    }

    /// Moves `Connecting -> Active`.
    ///
    /// Returns false, leaving the state unchanged, from any other state.
    pub fn activate(&mut self, id: ConnectionId) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.id = Some(id);
        self.state = ConnectionState::Active;
        true
    }

    /// Moves to `Closed`.
    ///
    /// Returns the ID to unregister on the first call after activation;
    /// later calls return None.
    pub fn close(&mut self) -> Option<ConnectionId> {
        let was_active = self.is_active();
        self.state = ConnectionState::Closed;
        if was_active {
            self.id
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_connection_id() {
        let id1 = ConnectionId::next();
        let id2 = ConnectionId::next();
        assert!(id2 > id1);
        assert!(id1.get() > 0);
    }

    #[test]
    fn test_connection_ids_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..1000).map(|_| ConnectionId::next()).collect::<Vec<_>>()))
            .collect();

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.join().expect("join") {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::next();
        assert_eq!(id.to_string(), format!("conn-{}", id.get()));
    }

    #[test]
    fn test_connection_new() {
        let conn = Connection::new(None);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.id().is_none());
        assert!(!conn.is_active());
        assert!(conn.active_id().is_none());
    }

    #[test]
    fn test_connection_lifecycle() {
        let peer: SocketAddr = "127.0.0.1:9000".parse().expect("addr");
        let mut conn = Connection::new(Some(peer));
        let id = ConnectionId::next();
        assert_eq!(conn.peer(), Some(peer));

        assert!(conn.activate(id));
        assert!(conn.is_active());
        assert_eq!(conn.active_id(), Some(id));

        assert_eq!(conn.close(), Some(id));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.active_id().is_none());
    }

    #[test]
    fn test_connection_close_is_one_shot() {
        let mut conn = Connection::new(None);
        let id = ConnectionId::next();
        conn.activate(id);

        assert_eq!(conn.close(), Some(id));
        assert_eq!(conn.close(), None);
    }

    #[test]
    fn test_connection_cannot_reactivate() {
        let mut conn = Connection::new(None);
        conn.activate(ConnectionId::next());
        conn.close();

        assert!(!conn.activate(ConnectionId::next()));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_close_before_activation() {
        let mut conn = Connection::new(None);
        assert_eq!(conn.close(), None);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_close_reason_labels() {
        assert_eq!(CloseReason::IdleTimeout.as_str(), "idle_timeout");
        assert_eq!(CloseReason::Evicted.as_str(), "evicted");
        assert_eq!(CloseReason::Shutdown.as_str(), "shutdown");
    }
}
