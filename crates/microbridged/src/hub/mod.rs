//! TCP hub that boards connect to.
//!
//! The hub:
//! - Listens on a fixed TCP port
//! - Registers every accepted socket as a [`Connection`] with its own read task
//! - Fans lifecycle and data events out to registered [`HubObserver`]s
//! - Broadcasts command bytes to every connected board
//! - Supports start/stop cycles via a per-run `CancellationToken`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │       Hub       │──── observers: started / stopped
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()  (accept task)
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │   Connection    │────▶│ ClientRegistry  │
//! │  (read task)    │     │ (copy-on-write) │
//! └───────┬─────────┘     └─────────────────┘
//!         │ received / disconnected
//!         ▼
//! ┌─────────────────┐
//! │  HubObserver(s) │
//! └─────────────────┘
//! ```
//!
//! Tasks only hold weak references to the hub, so dropping the last
//! [`Hub`] handle cancels a running accept loop and its connections.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Bind failures are returned to the caller, never fatal to the process
//! - Connection failures stay local to the connection

mod connection;
mod observer;
mod registry;

pub use connection::{Connection, ConnectionError};
pub use observer::{HubObserver, ObserverSet};
pub use registry::ClientRegistry;

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use microbridge_core::ConnectionId;

use connection::ReadSettings;

/// Port used by the ADK Main Board firmware.
pub const DEFAULT_PORT: u16 = 4568;

/// Port of the original MicroBridge lightweight server.
pub const MICROBRIDGE_LEGACY_PORT: u16 = 4567;

/// Default upper bound for one send (10 seconds)
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-connection read buffer size
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Socket and timing options for a hub.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Address to bind on
    pub host: IpAddr,

    /// Close a connection after this long without data (None = never)
    pub read_timeout: Option<Duration>,

    /// Upper bound for a single send to one connection
    pub write_timeout: Duration,

    /// Size of each connection's read buffer
    pub read_buffer_size: usize,

    /// Enable TCP keepalive on accepted sockets
    pub keepalive: bool,

    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            read_timeout: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            keepalive: true,
            nodelay: true,
        }
    }
}

impl HubOptions {
    /// Options bound to the loopback interface, used by tests and the simulator.
    pub fn loopback() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Self::default()
        }
    }
}

/// State that exists only while the hub is running.
struct RunState {
    /// Cancels the accept loop and, through child tokens, every connection
    cancel_token: CancellationToken,

    /// The accept task; joining it guarantees the listener is closed
    accept_task: JoinHandle<()>,

    /// Address the listener is bound to
    local_addr: SocketAddr,
}

struct HubInner {
    port: u16,
    options: HubOptions,
    running: AtomicBool,
    lifecycle: Mutex<Option<RunState>>,
    clients: ClientRegistry,
    observers: ObserverSet,
    tasks: TaskTracker,
    connection_counter: AtomicU64,
}

impl Drop for HubInner {
    fn drop(&mut self) {
        if let Some(run) = self.lifecycle.get_mut().take() {
            run.cancel_token.cancel();
        }
    }
}

/// Multi-client TCP hub.
///
/// A cheap-to-clone handle; all clones refer to the same hub.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use microbridged::hub::{Connection, Hub, HubObserver};
///
/// struct Printer;
///
/// impl HubObserver for Printer {
///     fn on_received(&self, connection: &Arc<Connection>, data: &[u8]) {
///         println!("{}: {:?}", connection.id(), data);
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let hub = Hub::new(4568);
///     hub.add_observer(Arc::new(Printer));
///     hub.start().await?;
///     hub.broadcast(&[1]).await;
///     hub.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

/// Non-owning reference held by hub tasks.
#[derive(Clone)]
pub(crate) struct WeakHub {
    inner: Weak<HubInner>,
}

impl WeakHub {
    pub(crate) fn upgrade(&self) -> Option<Hub> {
        self.inner.upgrade().map(|inner| Hub { inner })
    }

    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        Self { inner: Weak::new() }
    }
}

impl Hub {
    /// Creates a hub for `port` with default options. Nothing is bound
    /// until [`Hub::start`].
    pub fn new(port: u16) -> Self {
        Self::with_options(port, HubOptions::default())
    }

    /// Creates a hub on the legacy MicroBridge port.
    pub fn with_default_port() -> Self {
        Self::new(MICROBRIDGE_LEGACY_PORT)
    }

    /// Creates a hub with explicit options.
    pub fn with_options(port: u16, options: HubOptions) -> Self {
        Self {
            inner: Arc::new(HubInner {
                port,
                options,
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(None),
                clients: ClientRegistry::new(),
                observers: ObserverSet::new(),
                tasks: TaskTracker::new(),
                connection_counter: AtomicU64::new(0),
            }),
        }
    }

    fn downgrade(&self) -> WeakHub {
        WeakHub {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns the configured port (0 means "any free port").
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Returns the options the hub was built with.
    pub fn options(&self) -> &HubOptions {
        &self.inner.options
    }

    /// Returns true while the listener is open and the accept loop alive.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Returns the bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lifecycle.lock().await.as_ref().map(|run| run.local_addr)
    }

    /// Returns the number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// Returns the registered connections at this instant.
    pub fn connections(&self) -> Arc<Vec<Arc<Connection>>> {
        self.inner.clients.snapshot()
    }

    /// Looks up a registered connection by id.
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.clients.get(id)
    }

    /// Registers an observer. Returns false if it was already registered.
    pub fn add_observer(&self, observer: Arc<dyn HubObserver>) -> bool {
        self.inner.observers.add(observer)
    }

    /// Returns true if the observer is registered.
    pub fn has_observer(&self, observer: &Arc<dyn HubObserver>) -> bool {
        self.inner.observers.contains(observer)
    }

    /// Unregisters an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, observer: &Arc<dyn HubObserver>) -> bool {
        self.inner.observers.remove(observer)
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Observers see `started` before any `client_connected`. Returns the
    /// bound address, which differs from the configured one when port 0 is
    /// used.
    ///
    /// # Errors
    ///
    /// - `HubError::AlreadyRunning` if the hub is running
    /// - `HubError::Bind` if the port is unavailable; the hub stays stopped
    pub async fn start(&self) -> Result<SocketAddr, HubError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if lifecycle.is_some() {
            return Err(HubError::AlreadyRunning {
                port: self.inner.port,
            });
        }

        let addr = SocketAddr::new(self.inner.options.host, self.inner.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HubError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(HubError::LocalAddr)?;

        info!(address = %local_addr, "Hub listening");

        let cancel_token = CancellationToken::new();
        self.inner.tasks.reopen();
        self.inner.running.store(true, Ordering::SeqCst);

        // Notify before the first accept so `started` precedes any connect.
        self.notify(|observer| observer.on_started(self));

        let accept_task = tokio::spawn(accept_loop(
            self.downgrade(),
            listener,
            cancel_token.clone(),
        ));

        *lifecycle = Some(RunState {
            cancel_token,
            accept_task,
            local_addr,
        });

        Ok(local_addr)
    }

    /// Stops the hub.
    ///
    /// Closes the listener, closes every connection, waits for all read
    /// loops to finish (each reports its own disconnect) and then notifies
    /// `stopped`. Calling this while stopped is a no-op.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let Some(run) = lifecycle.take() else {
            debug!(port = self.inner.port, "Stop requested while not running");
            return;
        };

        info!(address = %run.local_addr, "Stopping hub");

        run.cancel_token.cancel();
        if let Err(e) = run.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        self.inner.running.store(false, Ordering::SeqCst);

        let clients = self.inner.clients.snapshot();
        for connection in clients.iter() {
            connection.close();
        }

        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        drop(lifecycle);

        info!(closed = clients.len(), "Hub stopped");
        self.notify(|observer| observer.on_stopped(self));
    }

    /// Sends `data` to every registered connection.
    ///
    /// Sends run concurrently so one slow board cannot hold up the rest. A
    /// failure on one connection closes that connection only and is listed
    /// in the returned report.
    pub async fn broadcast(&self, data: &[u8]) -> BroadcastReport {
        let clients = self.inner.clients.snapshot();
        let payload: Arc<[u8]> = Arc::from(data);
        let mut sends = JoinSet::new();

        for connection in clients.iter() {
            let connection = Arc::clone(connection);
            let payload = Arc::clone(&payload);
            sends.spawn(async move {
                let result = connection.send(&payload).await;
                (connection.id(), result)
            });
        }

        let mut report = BroadcastReport::default();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((id, Ok(()))) => report.delivered.push(id),
                Ok((id, Err(e))) => {
                    debug!(connection = %id, error = %e, "Broadcast to client failed");
                    report.failed.push((id, e));
                }
                Err(e) => warn!(error = %e, "Broadcast send task failed"),
            }
        }

        report.delivered.sort_unstable();
        report.failed.sort_unstable_by_key(|(id, _)| *id);

        trace!(
            bytes = data.len(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Broadcast complete"
        );

        report
    }

    /// Sends the UTF-8 bytes of `text` to every registered connection.
    pub async fn broadcast_str(&self, text: &str) -> BroadcastReport {
        self.broadcast(text.as_bytes()).await
    }

    /// Registers an accepted socket and starts its read task.
    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr, run_token: &CancellationToken) {
        let options = &self.inner.options;

        if options.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
            }
        }
        if options.keepalive {
            if let Err(e) = socket2::SockRef::from(&stream).set_keepalive(true) {
                debug!(peer = %peer_addr, error = %e, "Failed to enable keepalive");
            }
        }

        let id = ConnectionId::new(self.inner.connection_counter.fetch_add(1, Ordering::Relaxed));
        let (connection, reader) = Connection::new(
            id,
            stream,
            peer_addr,
            options.write_timeout,
            run_token.child_token(),
        );

        // Register and notify before the read task exists, so no data event
        // can overtake the connect event.
        self.inner.clients.add(Arc::clone(&connection));
        info!(connection = %id, peer = %peer_addr, "Client connected");
        self.notify(|observer| observer.on_client_connected(self, &connection));

        let settings = ReadSettings {
            idle_timeout: options.read_timeout,
            buffer_size: options.read_buffer_size,
        };
        self.inner
            .tasks
            .spawn(connection.run_reader(reader, self.downgrade(), settings));
    }

    /// Reports an `accept()` failure; the accept loop carries on.
    fn accept_failed(&self, error: &io::Error) {
        warn!(error = %error, "Failed to accept connection");
        self.notify(|observer| observer.on_accept_failed(self, error));
    }

    /// Dispatches one read to the observers.
    pub(crate) fn receive(&self, connection: &Arc<Connection>, data: &[u8]) {
        self.notify(|observer| observer.on_received(connection, data));
    }

    /// Removes a connection and notifies observers, once per connection.
    pub(crate) fn disconnect_client(&self, connection: &Arc<Connection>) {
        if !self.inner.clients.remove(connection.id()) {
            return;
        }

        info!(
            connection = %connection.id(),
            peer = %connection.peer_addr(),
            "Client disconnected"
        );
        self.notify(|observer| observer.on_client_disconnected(self, connection));
    }

    fn notify(&self, mut event: impl FnMut(&dyn HubObserver)) {
        for observer in self.inner.observers.snapshot().iter() {
            event(observer.as_ref());
        }
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("port", &self.inner.port)
            .field("running", &self.is_running())
            .field("connections", &self.connection_count())
            .field("observers", &self.inner.observers.len())
            .finish()
    }
}

/// Accepts connections until the run token is cancelled.
async fn accept_loop(hub: WeakHub, listener: TcpListener, cancel_token: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Accept loop shutting down");
                break;
            }
            result = listener.accept() => result,
        };

        let Some(hub) = hub.upgrade() else {
            break;
        };

        match accepted {
            Ok((stream, peer_addr)) => hub.admit(stream, peer_addr, &cancel_token),
            Err(e) => {
                hub.accept_failed(&e);
                drop(hub);

                // Back off so a persistent failure (e.g. fd exhaustion)
                // does not spin.
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    drop(listener);
    if let Some(hub) = hub.upgrade() {
        hub.inner.running.store(false, Ordering::SeqCst);
    }
}

/// Outcome of a broadcast, per recipient.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Connections that received the payload
    pub delivered: Vec<ConnectionId>,

    /// Connections the send failed on, with the reason
    pub failed: Vec<(ConnectionId, ConnectionError)>,
}

impl BroadcastReport {
    /// Returns true if no send failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns how many connections the broadcast was attempted on.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Errors that can occur in hub operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Hub is already running on port {port}")]
    AlreadyRunning { port: u16 },

    #[error("Failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),
}
