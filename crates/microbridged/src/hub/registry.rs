//! Registry of live client connections.

use std::sync::{Arc, PoisonError, RwLock};

use microbridge_core::ConnectionId;

use super::connection::Connection;

/// Ordered, concurrency-safe collection of registered connections.
///
/// The accept loop appends, any read loop may remove, and broadcasts
/// iterate, all from different tasks. Mutations replace the backing vector
/// (copy-on-write) so a snapshot taken for iteration never observes a
/// partial update and is never invalidated by a concurrent removal.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<Arc<Vec<Arc<Connection>>>>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a connection in accept order.
    pub fn add(&self, connection: Arc<Connection>) {
        let mut guard = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut *guard).push(connection);
    }

    /// Removes a connection by identity.
    ///
    /// Returns true if it was registered. Exactly one caller can observe
    /// `true` for a given connection, which makes this the gate for
    /// disconnect notifications.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut guard = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = guard.iter().position(|c| c.id() == id) else {
            return false;
        };
        Arc::make_mut(&mut *guard).remove(index);
        true
    }

    /// Looks up a registered connection.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.snapshot().iter().find(|c| c.id() == id).cloned()
    }

    /// Returns true if the connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.snapshot().iter().any(|c| c.id() == id)
    }

    /// Returns the registered connections at this instant.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Connection>>> {
        let guard = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Returns the number of registered connections.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns true if no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
