//! Connection registry.
//!
//! Owns every live connection's outbound handle and room set. A single task
//! holds the state exclusively and processes commands one at a time, so
//! subscribe, unregister and dispatch never interleave:
//!
//! - a publish reaches exactly the connections subscribed when its command
//!   is processed;
//! - a connection removed before a publish is processed never receives it;
//! - every subscriber observes publishes in one global order.
//!
//! [`Registry`] is the cloneable handle used by connection tasks and the
//! dispatcher.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::connection::ConnectionId;
use super::dispatcher::{self, DeliveryReport, Publisher};
use super::messages::Payload;
use super::metrics::RelayMetrics;
use super::rooms::Room;
use crate::config::{OverflowPolicy, RelayConfig};
use crate::error::{RelayError, RelayResult};

/// Aggregate registry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered connections.
    pub connections: usize,
    /// Rooms with at least one subscriber.
    pub rooms: usize,
    /// Total (connection, room) memberships.
    pub subscriptions: usize,
}

/// Commands processed by the registry task.
#[derive(Debug)]
enum Command {
    Register {
        outbound: mpsc::Sender<Payload>,
        released: Arc<Notify>,
        reply_to: oneshot::Sender<ConnectionId>,
    },
    Subscribe {
        id: ConnectionId,
        room: Room,
    },
    Unsubscribe {
        id: ConnectionId,
        room: Room,
    },
    Unregister {
        id: ConnectionId,
    },
    Snapshot {
        room: Room,
        reply_to: oneshot::Sender<Vec<ConnectionId>>,
    },
    RoomsOf {
        id: ConnectionId,
        reply_to: oneshot::Sender<Option<Vec<Room>>>,
    },
    Publish {
        publisher: Publisher,
        room: Room,
        payload: Payload,
        reply_to: oneshot::Sender<RelayResult<DeliveryReport>>,
    },
    Stats {
        reply_to: oneshot::Sender<RegistryStats>,
    },
}

/// Registry entry for one connection.
#[derive(Debug)]
struct Entry {
    outbound: mpsc::Sender<Payload>,
    /// Signalled once when the entry is removed.
    released: Arc<Notify>,
    rooms: HashSet<Room>,
}

/// State owned by the registry task.
#[derive(Debug)]
struct RegistryState {
    connections: HashMap<ConnectionId, Entry>,
    /// Room index: room -> subscribed connections.
    rooms: HashMap<Room, HashSet<ConnectionId>>,
    overflow_policy: OverflowPolicy,
    metrics: Arc<RelayMetrics>,
}

impl RegistryState {
    fn new(overflow_policy: OverflowPolicy, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            connections: HashMap::new(),
            rooms: HashMap::new(),
            overflow_policy,
            metrics,
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register {
                outbound,
                released,
                reply_to,
            } => {
                let id = self.register(outbound, released);
                if reply_to.send(id).is_err() {
                    // Caller gave up before learning its id.
                    self.unregister(id);
                }
            }
            Command::Subscribe { id, room } => self.subscribe(id, room),
            Command::Unsubscribe { id, room } => self.unsubscribe(id, &room),
            Command::Unregister { id } => self.unregister(id),
            Command::Snapshot { room, reply_to } => {
                let _ = reply_to.send(self.snapshot(&room));
            }
            Command::RoomsOf { id, reply_to } => {
                let rooms = self
                    .connections
                    .get(&id)
                    .map(|entry| entry.rooms.iter().cloned().collect());
                let _ = reply_to.send(rooms);
            }
            Command::Publish {
                publisher,
                room,
                payload,
                reply_to,
            } => {
                let _ = reply_to.send(self.publish(publisher, room, &payload));
            }
            Command::Stats { reply_to } => {
                let _ = reply_to.send(self.stats());
            }
        }
    }

    fn register(&mut self, outbound: mpsc::Sender<Payload>, released: Arc<Notify>) -> ConnectionId {
        let id = ConnectionId::next();
        self.connections.insert(
            id,
            Entry {
                outbound,
                released,
                rooms: HashSet::new(),
            },
        );
        debug!("Registered {}", id);
        id
    }

    fn subscribe(&mut self, id: ConnectionId, room: Room) {
        let Some(entry) = self.connections.get_mut(&id) else {
            return;
        };

        if entry.rooms.insert(room.clone()) {
            self.rooms.entry(room).or_default().insert(id);
            self.metrics.record_subscription();
        }
    }

    fn unsubscribe(&mut self, id: ConnectionId, room: &Room) {
        let Some(entry) = self.connections.get_mut(&id) else {
            return;
        };

        if entry.rooms.remove(room) {
            self.remove_from_index(id, room);
            self.metrics.record_unsubscription();
        }
    }

    fn unregister(&mut self, id: ConnectionId) {
        let Some(entry) = self.connections.remove(&id) else {
            return;
        };

        for room in &entry.rooms {
            self.remove_from_index(id, room);
        }
        entry.released.notify_one();
        debug!("Unregistered {} ({} rooms)", id, entry.rooms.len());
        // Dropping the entry drops the outbound sender, closing the queue.
    }

    fn remove_from_index(&mut self, id: ConnectionId, room: &Room) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn snapshot(&self, room: &Room) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    fn publish(
        &mut self,
        publisher: Publisher,
        room: Room,
        payload: &Payload,
    ) -> RelayResult<DeliveryReport> {
        if let Publisher::Connection(id) = publisher {
            if !self.connections.contains_key(&id) {
                return Err(RelayError::NotRegistered(id));
            }
        }

        let targets = self.snapshot(&room);
        let connections = &self.connections;

        let report = dispatcher::deliver(
            &room,
            payload,
            targets
                .into_iter()
                .filter_map(move |id| connections.get(&id).map(|entry| (id, &entry.outbound))),
            self.overflow_policy,
        );

        for id in &report.evicted {
            self.unregister(*id);
        }

        Ok(report)
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
            subscriptions: self.rooms.values().map(HashSet::len).sum(),
        }
    }
}

/// Handle to the connection registry task.
#[derive(Debug, Clone)]
pub struct Registry {
    commands: mpsc::Sender<Command>,
}

impl Registry {
    /// Spawns the registry task.
    ///
    /// The task runs until every [`Registry`] handle has been dropped.
    /// Membership changes are counted in `metrics`.
    #[must_use]
    pub fn spawn(config: &RelayConfig, metrics: Arc<RelayMetrics>) -> (Self, JoinHandle<()>) {
        let (commands, mut inbox) = mpsc::channel(config.command_queue.max(1));
        let mut state = RegistryState::new(config.overflow_policy, metrics);

        let task = tokio::spawn(async move {
            while let Some(command) = inbox.recv().await {
                state.handle(command);
            }
            info!(
                "Connection registry stopped with {} connections",
                state.connections.len()
            );
        });

        (Self { commands }, task)
    }

    async fn send(&self, command: Command) -> RelayResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::RegistryClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> RelayResult<T> {
        let (reply_to, reply) = oneshot::channel();
        self.send(command(reply_to)).await?;
        reply.await.map_err(|_| RelayError::RegistryClosed)
    }

    /// Registers a connection's outbound queue and returns its new ID.
    ///
    /// The connection starts with no rooms.
    ///
    /// # Errors
    ///
    /// Returns `RegistryClosed` if the registry task has stopped.
    pub async fn register(&self, outbound: mpsc::Sender<Payload>) -> RelayResult<ConnectionId> {
        self.register_with_release(outbound, Arc::new(Notify::new()))
            .await
    }

    /// Registers a connection and arranges for `released` to be notified
    /// when the registry removes it, whether by unregister or eviction.
    ///
    /// # Errors
    ///
    /// Returns `RegistryClosed` if the registry task has stopped.
    pub async fn register_with_release(
        &self,
        outbound: mpsc::Sender<Payload>,
        released: Arc<Notify>,
    ) -> RelayResult<ConnectionId> {
        self.request(|reply_to| Command::Register {
            outbound,
            released,
            reply_to,
        })
        .await
    }

    /// Adds a room to a connection's room set.
    ///
    /// Idempotent. Does nothing if the connection is gone.
    pub async fn subscribe(&self, id: ConnectionId, room: Room) {
        if self.send(Command::Subscribe { id, room }).await.is_err() {
            debug!("Registry closed, dropping subscribe for {}", id);
        }
    }

    /// Removes a room from a connection's room set.
    ///
    /// Does nothing if the connection is gone or was not in the room.
    pub async fn unsubscribe(&self, id: ConnectionId, room: Room) {
        if self.send(Command::Unsubscribe { id, room }).await.is_err() {
            debug!("Registry closed, dropping unsubscribe for {}", id);
        }
    }

    /// Removes a connection and releases its outbound queue.
    ///
    /// Does nothing if the connection is already gone.
    pub async fn unregister(&self, id: ConnectionId) {
        if self.send(Command::Unregister { id }).await.is_err() {
            debug!("Registry closed, dropping unregister for {}", id);
        }
    }

    /// Returns the connections subscribed to `room` right now.
    ///
    /// # Errors
    ///
    /// Returns `RegistryClosed` if the registry task has stopped.
    pub async fn snapshot(&self, room: Room) -> RelayResult<Vec<ConnectionId>> {
        self.request(|reply_to| Command::Snapshot { room, reply_to })
            .await
    }

    /// Returns the room set of a connection, or None if it is not registered.
    ///
    /// # Errors
    ///
    /// Returns `RegistryClosed` if the registry task has stopped.
    pub async fn rooms_of(&self, id: ConnectionId) -> RelayResult<Option<Vec<Room>>> {
        self.request(|reply_to| Command::RoomsOf { id, reply_to })
            .await
    }

    /// Delivers `payload` to every connection subscribed to `room`.
    ///
    /// Connections whose delivery fails are unregistered before the next
    /// command is processed.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if the publisher is a connection that is no
    /// longer registered, or `RegistryClosed` if the registry task has stopped.
    pub async fn publish(
        &self,
        publisher: Publisher,
        room: Room,
        payload: Payload,
    ) -> RelayResult<DeliveryReport> {
        self.request(|reply_to| Command::Publish {
            publisher,
            room,
            payload,
            reply_to,
        })
        .await?
    }

    /// Returns aggregate registry counts.
    ///
    /// # Errors
    ///
    /// Returns `RegistryClosed` if the registry task has stopped.
    pub async fn stats(&self) -> RelayResult<RegistryStats> {
        self.request(|reply_to| Command::Stats { reply_to }).await
    }
}
