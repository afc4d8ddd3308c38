//! Connection registry - one live push connection per user
//!
//! The registry maps a user to the outbound queue of their connection. Each
//! connection owns a writer task that drains its queue and writes one frame
//! per payload, so concurrent sends to the same user never interleave and a
//! slow client only fills its own queue.
//!
//! Delivery is best-effort: a send to an absent, closed or saturated
//! connection is dropped and reported as not delivered. Nothing is queued
//! for users who reconnect later; the persisted notification is the record.

use crate::domain::types::UserId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one accepted connection, distinct across reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Send side of a live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        Self { id, tx }
    }

    /// Handle plus the receiver its writer task should drain
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// False once the writer side has gone away
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Concurrency-safe user -> connection map
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<FxHashMap<UserId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous one for the user
    ///
    /// Returns the replaced handle; dropping it closes that connection's queue.
    pub fn add(&self, user: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn_id = handle.id();
        let previous = self.connections.write().insert(user, handle);
        if let Some(ref old) = previous {
            debug!(user_id = %user, old_conn = %old.id(), new_conn = %conn_id, "connection_replaced");
        }
        previous
    }

    /// Drop the user's entry; no-op when absent
    pub fn remove(&self, user: UserId) -> Option<ConnectionHandle> {
        self.connections.write().remove(&user)
    }

    /// Drop the user's entry only if it still belongs to `conn_id`
    ///
    /// Used by a closing connection so it cannot evict a newer one for the same user.
    pub fn remove_if_current(&self, user: UserId, conn_id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        match connections.get(&user) {
            Some(handle) if handle.id() == conn_id => {
                connections.remove(&user);
                true
            }
            _ => false,
        }
    }

    /// Queue a payload for the user's connection
    ///
    /// Returns whether the payload was handed to a live connection. Never blocks.
    pub fn send(&self, user: UserId, payload: &str) -> bool {
        let connections = self.connections.read();
        let Some(handle) = connections.get(&user) else {
            debug!(user_id = %user, "push_no_connection");
            return false;
        };

        match handle.tx.try_send(payload.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(user_id = %user, conn = %handle.id(), "push_dropped: outbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(user_id = %user, conn = %handle.id(), "push_connection_closed");
                false
            }
        }
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.connections.read().contains_key(&user)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
