use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::ws::Message;
use thiserror::Error;
use tokio::sync::mpsc;

pub type ConnectionId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("connection closed")]
    Closed,
    #[error("connection outbox is full")]
    Backlogged,
}

/// One viewer session as seen by the broadcaster. `push` must not wait on
/// the network.
pub trait Connection: Send + Sync {
    fn push(&self, payload: Arc<str>) -> Result<(), PushError>;

    fn is_alive(&self) -> bool {
        true
    }
}

/// Feeds a WebSocket writer task through a bounded outbox.
pub struct WsConnection {
    outbox: mpsc::Sender<Message>,
}

impl WsConnection {
    pub fn new(outbox: mpsc::Sender<Message>) -> Self {
        Self { outbox }
    }
}

impl Connection for WsConnection {
    fn push(&self, payload: Arc<str>) -> Result<(), PushError> {
        self.outbox
            .try_send(Message::Text(payload.to_string()))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => PushError::Backlogged,
                mpsc::error::TrySendError::Closed(_) => PushError::Closed,
            })
    }

    fn is_alive(&self) -> bool {
        !self.outbox.is_closed()
    }
}

/// Live viewer sessions. Every operation takes the same lock, so a snapshot
/// never observes a half-applied register or unregister.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Arc<dyn Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Arc<dyn Connection>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, connection);
        id
    }

    /// Returns whether `id` was still registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Point-in-time copy of the members, iterable without the lock held.
    pub fn snapshot(&self) -> Vec<(ConnectionId, Arc<dyn Connection>)> {
        self.lock()
            .iter()
            .map(|(id, connection)| (*id, Arc::clone(connection)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<dyn Connection>>> {
        // a panic elsewhere cannot leave the map half-written
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
