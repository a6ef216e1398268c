use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::engine::UserId;
use crate::service::Broadcaster;

use super::messages::ServerMessage;

const LOG_TARGET: &str = "crash_round::server::hub";

/// Reliable messages a connection may have queued before it is dropped as too slow.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

pub type ConnectionId = u64;

struct Connection {
    outbound: mpsc::Sender<ServerMessage>,
    user_id: Option<UserId>,
}

/// What a session needs to drain its connection: the reliable queue and the latest delta.
pub struct Registration {
    pub id: ConnectionId,
    pub outbound: mpsc::Receiver<ServerMessage>,
    pub deltas: watch::Receiver<Option<ServerMessage>>,
}

/// Registry of live connections.
///
/// Reliable messages go through a bounded per-connection queue so they are never dropped or
/// reordered; a connection that lets its queue fill up is disconnected instead. Deltas go
/// through a single watch slot: a slow connection skips stale ticks and only ever sees the
/// newest one.
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Connection>,
    deltas: watch::Sender<Option<ServerMessage>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OUTBOUND_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (deltas, _) = watch::channel(None);
        Self {
            connections: DashMap::new(),
            deltas,
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    pub fn register(&self) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.insert(
            id,
            Connection {
                outbound: tx,
                user_id: None,
            },
        );
        debug!(target: LOG_TARGET, connection_id = id, "connection registered");
        Registration {
            id,
            outbound: rx,
            deltas: self.deltas.subscribe(),
        }
    }

    pub fn unregister(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            debug!(target: LOG_TARGET, connection_id = id, "connection removed");
        }
    }

    /// Associates a connection with a user so unicasts reach it.
    pub fn bind_user(&self, id: ConnectionId, user_id: UserId) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.user_id = Some(user_id);
        }
    }

    pub fn user_of(&self, id: ConnectionId) -> Option<UserId> {
        self.connections.get(&id).and_then(|c| c.user_id)
    }

    /// Sends to one connection. Returns false when it is gone or has just been dropped for
    /// falling behind.
    pub fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let delivered = match self.connections.get(&id) {
            Some(connection) => enqueue(id, &connection, message),
            None => return false,
        };
        if !delivered {
            self.unregister(id);
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn deliver(&self, message: &ServerMessage, filter: impl Fn(&Connection) -> bool) {
        let mut dead = Vec::new();
        for entry in self.connections.iter() {
            if !filter(entry.value()) {
                continue;
            }
            if !enqueue(*entry.key(), entry.value(), message.clone()) {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.unregister(id);
        }
    }
}

fn enqueue(id: ConnectionId, connection: &Connection, message: ServerMessage) -> bool {
    match connection.outbound.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(target: LOG_TARGET, connection_id = id, "outbound queue full; dropping connection");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

impl Broadcaster for ConnectionHub {
    fn broadcast(&self, message: ServerMessage) {
        self.deliver(&message, |_| true);
    }

    fn publish_delta(&self, message: ServerMessage) {
        self.deltas.send_replace(Some(message));
    }

    fn clear_delta(&self) {
        self.deltas.send_replace(None);
    }

    fn send_to_user(&self, user_id: &UserId, message: ServerMessage) {
        self.deliver(&message, |c| c.user_id.as_ref() == Some(user_id));
    }
}
