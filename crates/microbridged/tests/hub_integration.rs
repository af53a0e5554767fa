//! Integration tests for the TCP hub.
//!
//! These tests drive a real hub over loopback sockets and check the
//! observer contract: notification order, exactly-once disconnects,
//! broadcast fan-out and shutdown behavior.
//!
//! Tests may use `.unwrap()` and `.expect()`; the panic-free policy applies
//! to production code only.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{id_of, is_closed_by_peer, read_n, start_hub, wait_until, Event};
use microbridge_core::ConnectionId;
use microbridged::hub::{ConnectionError, Hub, HubObserver, HubOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_then_immediate_stop() {
    let (hub, observer, _addr) = start_hub(HubOptions::loopback()).await;

    hub.stop().await;

    assert!(!hub.is_running());
    assert_eq!(hub.connection_count(), 0);
    assert_eq!(observer.events(), vec![Event::Started, Event::Stopped]);
}

#[tokio::test]
async fn test_listener_closed_after_stop() {
    let (hub, _observer, addr) = start_hub(HubOptions::loopback()).await;

    hub.stop().await;

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_stop_disconnects_every_client() {
    let (hub, observer, addr) = start_hub(HubOptions::loopback()).await;

    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();
    wait_until("two clients", || hub.connection_count() == 2).await;

    hub.stop().await;

    // stop returns only after every read loop reported its disconnect.
    assert_eq!(observer.disconnects(), 2);
    assert_eq!(observer.events().last(), Some(&Event::Stopped));
    assert_eq!(hub.connection_count(), 0);
    assert!(is_closed_by_peer(&mut a).await);
    assert!(is_closed_by_peer(&mut b).await);
}

#[tokio::test]
async fn test_dropping_last_handle_closes_listener() {
    let hub = Hub::with_options(0, HubOptions::loopback());
    let addr = hub.start().await.unwrap();

    drop(hub);

    let mut refused = false;
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_err() {
            refused = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(refused, "listener should close once the hub is dropped");
}

// ============================================================================
// Connections
// ============================================================================

#[tokio::test]
async fn test_concurrent_clients_each_notified_once() {
    const CLIENTS: usize = 8;
    let (hub, observer, addr) = start_hub(HubOptions::loopback()).await;

    let mut connects = Vec::new();
    for _ in 0..CLIENTS {
        connects.push(tokio::spawn(TcpStream::connect(addr)));
    }
    let mut clients = Vec::new();
    for connect in connects {
        clients.push(connect.await.unwrap().unwrap());
    }

    wait_until("all clients registered", || hub.connection_count() == CLIENTS).await;
    assert_eq!(observer.connects(), CLIENTS);

    let mut ids: Vec<ConnectionId> = hub.connections().iter().map(|c| c.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), CLIENTS);

    hub.stop().await;
}

#[tokio::test]
async fn test_connect_precedes_receive() {
    let (hub, observer, addr) = start_hub(HubOptions::loopback()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&[1, 2, 3]).await.unwrap();

    wait_until("data received", || {
        observer.count(|e| matches!(e, Event::Received(..))) > 0
    })
    .await;

    let events = observer.events();
    let connected = events
        .iter()
        .position(|e| matches!(e, Event::Connected(_)))
        .unwrap();
    let received = events
        .iter()
        .position(|e| matches!(e, Event::Received(..)))
        .unwrap();
    assert!(connected < received);

    hub.stop().await;
}

#[tokio::test]
async fn test_peer_close_notifies_once() {
    let (hub, observer, addr) = start_hub(HubOptions::loopback()).await;

    let client = TcpStream::connect(addr).await.unwrap();
    wait_until("client registered", || hub.connection_count() == 1).await;
    let id = id_of(&hub, &client);

    drop(client);

    wait_until("disconnect", || observer.disconnects_of(id) == 1).await;
    assert_eq!(hub.connection_count(), 0);
    assert!(hub.connection(id).is_none());

    // Stopping afterwards must not report the same client again.
    hub.stop().await;
    assert_eq!(observer.disconnects_of(id), 1);
}

#[tokio::test]
async fn test_close_from_host_side() {
    let (hub, observer, addr) = start_hub(HubOptions::loopback()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_until("client registered", || hub.connection_count() == 1).await;
    let id = id_of(&hub, &client);
    let connection = hub.connection(id).unwrap();

    connection.close();
    connection.close();

    wait_until("disconnect", || observer.disconnects_of(id) == 1).await;
    assert!(!connection.is_alive());
    assert!(is_closed_by_peer(&mut client).await);
    assert!(matches!(
        connection.send(&[1]).await,
        Err(ConnectionError::Closed)
    ));

    hub.stop().await;
}

#[tokio::test]
async fn test_reads_forwarded_in_order() {
    let (hub, observer, addr) = start_hub(HubOptions::loopback()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_until("client registered", || hub.connection_count() == 1).await;
    let id = id_of(&hub, &client);

    let payload: Vec<u8> = (0..=255u8).collect();
    for chunk in payload.chunks(7) {
        client.write_all(chunk).await.unwrap();
    }

    wait_until("all bytes", || observer.received_from(id).len() == payload.len()).await;
    assert_eq!(observer.received_from(id), payload);

    hub.stop().await;
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_broadcast_reaches_all_clients() {
    let (hub, _observer, addr) = start_hub(HubOptions::loopback()).await;

    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();
    wait_until("two clients", || hub.connection_count() == 2).await;

    let report = hub.broadcast(&[1]).await;

    assert!(report.is_complete());
    assert_eq!(report.delivered.len(), 2);
    assert_eq!(read_n(&mut a, 1).await, vec![1]);
    assert_eq!(read_n(&mut b, 1).await, vec![1]);

    hub.stop().await;
}

#[tokio::test]
async fn test_broadcast_str() {
    let (hub, _observer, addr) = start_hub(HubOptions::loopback()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_until("client registered", || hub.connection_count() == 1).await;

    hub.broadcast_str("on").await;
    assert_eq!(read_n(&mut client, 2).await, b"on".to_vec());

    hub.stop().await;
}

#[tokio::test]
async fn test_broadcast_survives_gone_peer() {
    let (hub, observer, addr) = start_hub(HubOptions::loopback()).await;

    let mut healthy = TcpStream::connect(addr).await.unwrap();
    let gone = TcpStream::connect(addr).await.unwrap();
    wait_until("two clients", || hub.connection_count() == 2).await;
    let healthy_id = id_of(&hub, &healthy);
    let gone_id = id_of(&hub, &gone);

    drop(gone);
    let report = hub.broadcast(&[1]).await;

    assert!(report.delivered.contains(&healthy_id));
    assert_eq!(read_n(&mut healthy, 1).await, vec![1]);

    wait_until("gone peer removed", || observer.disconnects_of(gone_id) == 1).await;
    assert_eq!(hub.connection_count(), 1);

    let report = hub.broadcast(&[0]).await;
    assert_eq!(report.delivered, vec![healthy_id]);
    assert_eq!(read_n(&mut healthy, 1).await, vec![0]);

    hub.stop().await;
}

#[tokio::test]
async fn test_broadcast_reports_closed_connection() {
    let (hub, _observer, addr) = start_hub(HubOptions::loopback()).await;

    let mut healthy = TcpStream::connect(addr).await.unwrap();
    let closed = TcpStream::connect(addr).await.unwrap();
    wait_until("two clients", || hub.connection_count() == 2).await;
    let healthy_id = id_of(&hub, &healthy);
    let closed_id = id_of(&hub, &closed);

    hub.connection(closed_id).unwrap().close();
    let report = hub.broadcast(&[1]).await;

    // The closed connection is either reported failed or already gone.
    assert_eq!(report.delivered, vec![healthy_id]);
    assert!(report
        .failed
        .iter()
        .all(|(id, e)| *id == closed_id && matches!(e, ConnectionError::Closed)));
    assert_eq!(read_n(&mut healthy, 1).await, vec![1]);

    hub.stop().await;
}

#[tokio::test]
async fn test_broadcast_without_clients() {
    let hub = Hub::with_options(0, HubOptions::loopback());

    let report = hub.broadcast(&[1]).await;

    assert_eq!(report.attempted(), 0);
    assert!(report.is_complete());
}

// ============================================================================
// Observers
// ============================================================================

#[tokio::test]
async fn test_removed_observer_sees_nothing_more() {
    let (hub, observer, addr) = start_hub(HubOptions::loopback()).await;
    let as_dyn: Arc<dyn HubObserver> = observer.clone();

    assert!(hub.remove_observer(&as_dyn));
    assert!(!hub.remove_observer(&as_dyn));

    let _client = TcpStream::connect(addr).await.unwrap();
    wait_until("client registered", || hub.connection_count() == 1).await;
    hub.stop().await;

    assert_eq!(observer.events(), vec![Event::Started]);
}

/// Observer that unregisters itself on the first data event.
struct OneShot {
    me: std::sync::Mutex<Option<Arc<dyn HubObserver>>>,
    hub: Hub,
    fired: std::sync::atomic::AtomicUsize,
}

impl HubObserver for OneShot {
    fn on_received(&self, _connection: &Arc<microbridged::hub::Connection>, _data: &[u8]) {
        self.fired
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(me) = self.me.lock().unwrap().take() {
            self.hub.remove_observer(&me);
        }
    }
}

#[tokio::test]
async fn test_observer_can_unregister_during_dispatch() {
    let (hub, recorder, addr) = start_hub(HubOptions::loopback()).await;
    let one_shot = Arc::new(OneShot {
        me: std::sync::Mutex::new(None),
        hub: hub.clone(),
        fired: Default::default(),
    });
    let as_dyn: Arc<dyn HubObserver> = one_shot.clone();
    *one_shot.me.lock().unwrap() = Some(Arc::clone(&as_dyn));
    hub.add_observer(Arc::clone(&as_dyn));

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_until("client registered", || hub.connection_count() == 1).await;
    let id = id_of(&hub, &client);

    client.write_all(&[1]).await.unwrap();
    wait_until("first byte", || recorder.received_from(id).len() == 1).await;
    client.write_all(&[2]).await.unwrap();
    wait_until("second byte", || recorder.received_from(id).len() == 2).await;

    assert_eq!(one_shot.fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(!hub.has_observer(&as_dyn));

    hub.stop().await;
}
