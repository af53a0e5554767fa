//! Shared helpers for the hub integration suites.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use microbridge_core::ConnectionId;
use microbridged::hub::{Connection, Hub, HubObserver, HubOptions};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

/// Upper bound for any single wait in these suites
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between condition checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One observed hub event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started,
    Stopped,
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    Received(ConnectionId, Vec<u8>),
}

/// Observer that records every callback in order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn connects(&self) -> usize {
        self.count(|e| matches!(e, Event::Connected(_)))
    }

    pub fn disconnects(&self) -> usize {
        self.count(|e| matches!(e, Event::Disconnected(_)))
    }

    pub fn disconnects_of(&self, id: ConnectionId) -> usize {
        self.count(|e| *e == Event::Disconnected(id))
    }

    /// All bytes received from `id`, concatenated.
    pub fn received_from(&self, id: ConnectionId) -> Vec<u8> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Received(from, data) if *from == id => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl HubObserver for RecordingObserver {
    fn on_started(&self, _hub: &Hub) {
        self.push(Event::Started);
    }

    fn on_stopped(&self, _hub: &Hub) {
        self.push(Event::Stopped);
    }

    fn on_client_connected(&self, _hub: &Hub, connection: &Arc<Connection>) {
        self.push(Event::Connected(connection.id()));
    }

    fn on_client_disconnected(&self, _hub: &Hub, connection: &Arc<Connection>) {
        self.push(Event::Disconnected(connection.id()));
    }

    fn on_received(&self, connection: &Arc<Connection>, data: &[u8]) {
        self.push(Event::Received(connection.id(), data.to_vec()));
    }
}

/// Starts a loopback hub on a free port with a recording observer attached.
pub async fn start_hub(options: HubOptions) -> (Hub, Arc<RecordingObserver>, SocketAddr) {
    let hub = Hub::with_options(0, options);
    let observer = RecordingObserver::new();
    hub.add_observer(observer.clone());
    let addr = hub.start().await.expect("start hub");
    (hub, observer, addr)
}

/// Polls `condition` until it holds, failing the test after `WAIT_TIMEOUT`.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < WAIT_TIMEOUT {
        if condition() {
            return;
        }
        sleep(POLL_INTERVAL).await;
    }
    panic!("Timed out waiting for {what}");
}

/// Finds the hub-side id of a client socket.
pub fn id_of(hub: &Hub, client: &TcpStream) -> ConnectionId {
    let local = client.local_addr().unwrap();
    hub.connections()
        .iter()
        .find(|c| c.peer_addr() == local)
        .map(|c| c.id())
        .expect("client is registered")
}

/// Reads exactly `n` bytes from `client`.
pub async fn read_n(client: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(WAIT_TIMEOUT, client.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

/// Returns true once the peer has closed `client` (EOF or reset).
pub async fn is_closed_by_peer(client: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    match timeout(WAIT_TIMEOUT, client.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        Ok(Ok(_)) | Err(_) => false,
    }
}
