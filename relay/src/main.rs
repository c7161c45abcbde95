//! Roomcast Relay binary.
//!
//! Entry point for the WebSocket relay server.

use anyhow::Context;
use roomcast_relay::{AppState, RelayConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,roomcast_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = RelayConfig::from_env().context("invalid relay configuration")?;

    tracing::info!(
        "Starting relay on {} (outbound capacity {}, overflow {:?}, idle timeout {:?})",
        config.bind_address(),
        config.outbound_capacity,
        config.overflow_policy,
        config.idle_timeout
    );

    let state = AppState::new(config);
    let server = Server::new(state);
    server.run().await.context("relay server failed")?;

    Ok(())
}
