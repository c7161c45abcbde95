//! Relay error types.

use crate::config::ConfigError;
use crate::ws::connection::ConnectionId;
use crate::ws::rooms::Room;

/// Errors surfaced by the relay's public operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The registry task has stopped and no longer accepts commands.
    #[error("connection registry is not running")]
    RegistryClosed,

    /// The publisher is not allowed to publish into the room.
    #[error("publish into room {room} rejected")]
    PublishRejected {
        /// Target room.
        room: Room,
    },

    /// The connection has been unregistered and can no longer act.
    #[error("connection {0} is not registered")]
    NotRegistered(ConnectionId),

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Binding or serving the listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_display() {
        assert_eq!(
            RelayError::RegistryClosed.to_string(),
            "connection registry is not running"
        );

        let room = Room::parse("BTC_USD").expect("room");
        assert_eq!(
            RelayError::PublishRejected { room }.to_string(),
            "publish into room BTC_USD rejected"
        );
    }

    #[test]
    fn test_relay_error_not_registered_display() {
        let id = ConnectionId::next();
        assert_eq!(
            RelayError::NotRegistered(id).to_string(),
            format!("connection conn-{} is not registered", id.get())
        );
    }

    #[test]
    fn test_relay_error_from_config() {
        let err: RelayError = ConfigError::InvalidHeartbeat.into();
        assert_eq!(
            err.to_string(),
            "invalid configuration: heartbeat_interval must be > 0"
        );
    }

    #[test]
    fn test_relay_error_from_io() {
        let err: RelayError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken").into();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
