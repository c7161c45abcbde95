//! HTTP server hosting the WebSocket endpoint.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::RelayResult;
use crate::state::AppState;
use crate::ws::handler::ws_handler;

/// The relay server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Creates a new server.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Builds the router.
    ///
    /// The WebSocket endpoint is mounted at `/` and `/ws`. The router needs
    /// connection info, so serve it with
    /// `into_make_service_with_connect_info::<SocketAddr>()`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Binds the configured address and serves until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or binding or
    /// serving fails.
    pub async fn run(self) -> RelayResult<()> {
        self.state.config.validate()?;
        let listener = TcpListener::bind(self.state.config.bind_address()).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or serving fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.config.validate()?;
        info!("Relay listening on {}", listener.local_addr()?);

        let stats_task = self
            .state
            .config
            .stats_interval
            .map(|interval| spawn_stats_logger(self.state.clone(), interval));

        let app = self.router();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        if let Some(task) = stats_task {
            task.abort();
        }

        info!("Relay stopped");
        result.map_err(Into::into)
    }
}

/// Periodically logs registry and delivery counters.
fn spawn_stats_logger(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Ok(stats) = state.registry.stats().await else {
                break;
            };
            let metrics = state.metrics.snapshot();

            info!(
                "Relay stats: {} connections, {} rooms, {} subscriptions, {} publishes, {} deliveries, {} dropped, {} evictions, {} idle timeouts",
                stats.connections,
                stats.rooms,
                stats.subscriptions,
                metrics.publishes,
                metrics.deliveries,
                metrics.deliveries_dropped,
                metrics.evictions,
                metrics.idle_timeouts
            );
        }
    })
}

/// Resolves when the process receives Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
