//! Observer contract for hub lifecycle and data events.
//!
//! Observers are notified synchronously on the task that triggered the
//! event: `started`/`stopped` on the caller of [`Hub::start`]/[`Hub::stop`],
//! connect events on the accept loop, receive and disconnect events on the
//! connection's own read loop. Callbacks must therefore return quickly and
//! must not block on I/O; hand work off to a channel if it is expensive.
//!
//! Every method has an empty default so implementors only override what
//! they care about.

use std::io;
use std::sync::{Arc, PoisonError, RwLock};

use super::connection::Connection;
use super::Hub;

/// Callbacks fired by a [`Hub`].
pub trait HubObserver: Send + Sync {
    /// The hub bound its listening socket and is accepting connections.
    fn on_started(&self, _hub: &Hub) {}

    /// The hub closed its listener and every connection.
    fn on_stopped(&self, _hub: &Hub) {}

    /// A client was accepted and registered. Fired before any data from
    /// that client is delivered.
    fn on_client_connected(&self, _hub: &Hub, _connection: &Arc<Connection>) {}

    /// A client left the registry. Fired exactly once per connection, after
    /// its read loop has stopped producing data.
    fn on_client_disconnected(&self, _hub: &Hub, _connection: &Arc<Connection>) {}

    /// One successful read from a client. `data` is never empty and carries
    /// exactly what a single read returned, with no framing applied.
    fn on_received(&self, _connection: &Arc<Connection>, _data: &[u8]) {}

    /// `accept()` failed for a reason other than shutdown. The accept loop
    /// keeps running.
    fn on_accept_failed(&self, _hub: &Hub, _error: &io::Error) {}
}

/// Set of registered observers.
///
/// Copy-on-write: dispatch iterates an immutable snapshot, so observers may
/// be added or removed from any task (including from inside a callback)
/// without blocking or disturbing an in-flight notification. Identity is the
/// `Arc` allocation, so registering the same observer twice is a no-op.
#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Arc<Vec<Arc<dyn HubObserver>>>>,
}

impl ObserverSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer. Returns false if it was already registered.
    pub fn add(&self, observer: Arc<dyn HubObserver>) -> bool {
        let mut guard = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|existing| same_observer(existing, &observer)) {
            return false;
        }
        Arc::make_mut(&mut *guard).push(observer);
        true
    }

    /// Removes an observer. Returns false if it was not registered.
    pub fn remove(&self, observer: &Arc<dyn HubObserver>) -> bool {
        let mut guard = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = guard.iter().position(|existing| same_observer(existing, observer)) else {
            return false;
        };
        Arc::make_mut(&mut *guard).remove(index);
        true
    }

    /// Returns true if the observer is registered.
    pub fn contains(&self, observer: &Arc<dyn HubObserver>) -> bool {
        self.snapshot().iter().any(|existing| same_observer(existing, observer))
    }

    /// Returns the current observers. Later changes do not affect it.
    pub fn snapshot(&self) -> Arc<Vec<Arc<dyn HubObserver>>> {
        let guard = self.observers.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Returns the number of registered observers.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns true if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Compares the data pointers only; vtable pointers for the same type may
/// differ between codegen units.
fn same_observer(a: &Arc<dyn HubObserver>, b: &Arc<dyn HubObserver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
