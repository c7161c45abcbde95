//! WebSocket module for room-based fan-out.
//!
//! # Message Types
//!
//! - `SUBSCRIBE` — join a room
//! - `UNSUBSCRIBE` — leave a room
//! - `sendMessage` — publish a payload to every subscriber of a room
//!
//! Published payloads are delivered as raw text frames. No acknowledgments
//! or error frames are sent; malformed input is logged and discarded.

pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod rooms;

pub use connection::{CloseReason, Connection, ConnectionId, ConnectionState};
pub use dispatcher::{DeliveryReport, Dispatcher, PublishAuthorizer, Publisher};
pub use handler::ws_handler;
pub use messages::{ClientMessage, MessageError, Payload, Request};
pub use metrics::{RelayMetrics, RelayMetricsSnapshot};
pub use registry::{Registry, RegistryStats};
pub use rooms::Room;
