//! WebSocket connection handler.
//!
//! Provides the upgrade handler and the per-connection loops. Each connection
//! runs a reader (this task) and exactly one writer task that owns the socket
//! sink, so writes to a client are always serialized.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use super::connection::{CloseReason, Connection, ConnectionId};
use super::dispatcher::Publisher;
use super::messages::{MessageError, Payload, Request};
use super::metrics::RelayMetrics;
use crate::error::RelayError;
use crate::state::AppState;

/// How long the writer may take to flush and close after unregistering.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler.
///
/// Upgrades an HTTP connection to a WebSocket connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state, Some(peer)))
}

/// Handles a WebSocket connection from accept to close.
///
/// The session ends on the first of: client close, transport error, idle
/// timeout, writer failure, or removal by the registry.
async fn handle_connection(socket: WebSocket, state: AppState, peer: Option<SocketAddr>) {
    state.metrics.record_connection_opened();
    let mut connection = Connection::new(peer);

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Payload>(state.config.outbound_capacity);
    let released = Arc::new(Notify::new());

    let id = match state
        .registry
        .register_with_release(tx, Arc::clone(&released))
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to register connection from {:?}: {}", connection.peer(), e);
            state.metrics.record_connection_closed();
            info!(
                "WebSocket connection from {:?} closed ({})",
                connection.peer(),
                CloseReason::Shutdown.as_str()
            );
            return;
        }
    };
    connection.activate(id);
    info!("WebSocket connection {} opened from {:?}", id, connection.peer());

    let mut writer = tokio::spawn(write_loop(
        ws_sender,
        rx,
        WriterTimings {
            heartbeat: state.config.heartbeat_interval,
            write_timeout: state.config.write_timeout,
        },
        Arc::clone(&state.metrics),
        id,
    ));

    let idle_timeout = state.config.idle_timeout;
    // Only pongs and well-formed requests count as liveness.
    let mut last_seen = Instant::now();
    let mut writer_done = false;

    let reason = loop {
        tokio::select! {
            result = &mut writer => {
                writer_done = true;
                break result.unwrap_or(CloseReason::TransportError);
            }
            () = released.notified() => {
                debug!("{} released by the registry", id);
                break CloseReason::Evicted;
            }
            next = time::timeout_at(last_seen + idle_timeout, ws_receiver.next()) => {
                let msg = match next {
                    Err(_) => {
                        state.metrics.record_idle_timeout();
                        break CloseReason::IdleTimeout;
                    }
                    Ok(None) => break CloseReason::ClientClosed,
                    Ok(Some(Err(e))) => {
                        warn!("WebSocket error on {}: {}", id, e);
                        state.metrics.record_error();
                        break CloseReason::TransportError;
                    }
                    Ok(Some(Ok(msg))) => msg,
                };

                state.metrics.record_message_received();

                match msg {
                    Message::Text(text) => {
                        if handle_decoded(Request::decode(text.as_str()), &connection, &state).await {
                            last_seen = Instant::now();
                        }
                    }
                    Message::Binary(bytes) => {
                        if handle_decoded(Request::decode_bytes(&bytes), &connection, &state).await {
                            last_seen = Instant::now();
                        }
                    }
                    Message::Pong(_) => {
                        debug!("Pong from {}", id);
                        last_seen = Instant::now();
                    }
                    Message::Ping(_) => {
                        debug!("Ping from {}", id);
                    }
                    Message::Close(_) => break CloseReason::ClientClosed,
                }
            }
        }
    };

    // Cleanup
    if let Some(id) = connection.close() {
        state.registry.unregister(id).await;
    }
    if !writer_done && time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    state.metrics.record_connection_closed();

    info!(
        "WebSocket connection {} from {:?} closed ({}) after {}s",
        id,
        connection.peer(),
        reason.as_str(),
        (chrono::Utc::now() - connection.connected_at()).num_seconds()
    );
}

/// Timing settings for the writer task.
#[derive(Debug, Clone, Copy)]
struct WriterTimings {
    heartbeat: Duration,
    write_timeout: Duration,
}

/// Drains the outbound queue into the socket and sends heartbeat pings.
///
/// Ends when the registry releases the queue, a write fails, or a write does
/// not complete within the write timeout.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Payload>,
    timings: WriterTimings,
    metrics: Arc<RelayMetrics>,
    id: ConnectionId,
) -> CloseReason {
    let mut ticker = time::interval_at(Instant::now() + timings.heartbeat, timings.heartbeat);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(payload) = next else {
                    let _ = time::timeout(timings.write_timeout, sink.send(Message::Close(None))).await;
                    return CloseReason::Evicted;
                };

                let frame = Message::Text(payload.as_str().to_owned().into());
                if let Err(reason) = send_frame(&mut sink, frame, timings.write_timeout, id).await {
                    metrics.record_error();
                    return reason;
                }
                metrics.record_message_sent();
            }
            _ = ticker.tick() => {
                let ping = Message::Ping(Bytes::new());
                if let Err(reason) = send_frame(&mut sink, ping, timings.write_timeout, id).await {
                    return reason;
                }
            }
        }
    }
}

/// Writes one frame, bounded by `write_timeout`.
async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    write_timeout: Duration,
    id: ConnectionId,
) -> Result<(), CloseReason> {
    match time::timeout(write_timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!("Write to {} failed: {}", id, e);
            Err(CloseReason::TransportError)
        }
        Err(_) => {
            warn!("Write to {} stalled for {:?}", id, write_timeout);
            Err(CloseReason::TransportError)
        }
    }
}

/// Handles a decoded inbound frame, discarding malformed ones.
///
/// Returns true if the frame was a well-formed request.
async fn handle_decoded(
    decoded: Result<Request, MessageError>,
    connection: &Connection,
    state: &AppState,
) -> bool {
    match decoded {
        Ok(request) => {
            handle_request(request, connection, state).await;
            true
        }
        Err(e) => {
            state.metrics.record_malformed();
            debug!("Discarding malformed message from {:?}: {}", connection.id(), e);
            false
        }
    }
}

/// Applies a request on behalf of an active connection.
///
/// Requests on a connection that is not active are ignored. Membership
/// metrics are recorded by the registry when a change actually happens.
async fn handle_request(request: Request, connection: &Connection, state: &AppState) {
    let Some(id) = connection.active_id() else {
        return;
    };

    match request {
        Request::Subscribe(room) => {
            debug!("{} subscribed to room {}", id, room);
            state.registry.subscribe(id, room).await;
        }
        Request::Unsubscribe(room) => {
            debug!("{} unsubscribed from room {}", id, room);
            state.registry.unsubscribe(id, room).await;
        }
        Request::Publish { room, payload } => {
            match state
                .dispatcher
                .publish(Publisher::Connection(id), room, payload)
                .await
            {
                Ok(_) => {}
                Err(RelayError::PublishRejected { room }) => {
                    debug!("{} is not allowed to publish into room {}", id, room);
                }
                Err(RelayError::NotRegistered(_)) => {
                    debug!("Dropping publish from released connection {}", id);
                }
                Err(e) => warn!("Publish from {} failed: {}", id, e),
            }
        }
    }
}
