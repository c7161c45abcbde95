//! Shared application state.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::ws::dispatcher::{Dispatcher, PublishAuthorizer};
use crate::ws::metrics::RelayMetrics;
use crate::ws::registry::Registry;

/// State shared by every connection handler.
#[derive(Clone)]
pub struct AppState {
    /// Relay configuration.
    pub config: Arc<RelayConfig>,
    /// Connection registry handle.
    pub registry: Registry,
    /// Publish entry point.
    pub dispatcher: Dispatcher,
    /// Metrics.
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    /// Creates the state and spawns the registry task.
    ///
    /// Client publishes are authorized by the configured publish policy.
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let authorizer = Arc::new(config.publish_policy.clone());
        Self::with_authorizer(config, authorizer)
    }

    /// Creates the state with a custom publish authorizer.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_authorizer(config: RelayConfig, authorizer: Arc<dyn PublishAuthorizer>) -> Self {
        let metrics = Arc::new(RelayMetrics::new());
        let (registry, _task) = Registry::spawn(&config, Arc::clone(&metrics));
        let dispatcher = Dispatcher::new(registry.clone(), authorizer, Arc::clone(&metrics));

        Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::ConnectionId;
    use crate::ws::dispatcher::Publisher;
    use crate::ws::rooms::Room;

    struct DenyAll;

    impl PublishAuthorizer for DenyAll {
        fn authorize(&self, _publisher: Publisher, _room: &Room) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let state = AppState::new(RelayConfig::default());
        assert_eq!(state.metrics.connections_opened(), 0);
        assert_eq!(state.registry.stats().await.expect("stats").connections, 0);
    }

    #[tokio::test]
    async fn test_app_state_custom_authorizer() {
        let state = AppState::with_authorizer(RelayConfig::default(), Arc::new(DenyAll));
        let room = Room::parse("BTC_USD").expect("room");

        let result = state
            .dispatcher
            .publish(Publisher::Connection(ConnectionId::next()), room, "x".into())
            .await;

        assert!(result.is_err());
    }
}
