//! Roomcast Relay - real-time room-based event relay.
//!
//! Clients hold a WebSocket open, join named rooms and receive every message
//! subsequently published to those rooms. Payloads are opaque: the relay
//! forwards them without inspecting their content.
//!
//! # Components
//!
//! - [`config`]: Relay configuration
//! - [`ws::registry`]: Connection registry (owning task)
//! - [`ws::dispatcher`]: Broadcast dispatch and publish authorization
//! - [`ws::handler`]: WebSocket connection handling
//! - [`server`]: HTTP server and shutdown
//! - [`state`]: Shared application state

pub mod config;
pub mod error;
pub mod server;
pub mod state;
pub mod ws;

pub use config::{ConfigError, OverflowPolicy, PublishPolicy, RelayConfig};
pub use error::{RelayError, RelayResult};
pub use server::Server;
pub use state::AppState;
