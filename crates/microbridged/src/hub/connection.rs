//! A single accepted client connection.
//!
//! Each `Connection` owns the write half of its socket. The read half is
//! moved into a dedicated read task (see [`Connection::run_reader`]) that:
//! - Waits on `read()` with no polling, racing it against the
//!   connection's `CancellationToken` and an optional idle deadline
//! - Forwards every non-empty read, unframed, to the hub's receive dispatch
//! - Releases the socket and reports the disconnect exactly once on exit
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Transport failures close the connection instead of propagating raw errors

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use microbridge_core::ConnectionId;

use super::WeakHub;

/// Settings for a connection's read loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadSettings {
    /// Close the connection after this long without data (None = never)
    pub idle_timeout: Option<Duration>,

    /// Size of the per-connection read buffer
    pub buffer_size: usize,
}

/// One client connection registered with a hub.
#[derive(Debug)]
pub struct Connection {
    /// Identifier assigned at accept time
    id: ConnectionId,

    /// Remote address of the client
    peer_addr: SocketAddr,

    /// When the connection was accepted
    connected_at: DateTime<Utc>,

    /// Write half, taken by the read loop when it releases the socket
    writer: Mutex<Option<OwnedWriteHalf>>,

    /// True while the read loop is expected to keep running
    alive: AtomicBool,

    /// Cancels the read loop
    cancel_token: CancellationToken,

    /// Upper bound for a single send
    write_timeout: Duration,
}

impl Connection {
    /// Wraps an accepted stream.
    ///
    /// Returns the shared connection and the read half, which the caller
    /// must hand to [`Connection::run_reader`].
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        write_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> (Arc<Self>, OwnedReadHalf) {
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Self {
            id,
            peer_addr,
            connected_at: Utc::now(),
            writer: Mutex::new(Some(writer)),
            alive: AtomicBool::new(true),
            cancel_token,
            write_timeout,
        });
        (connection, reader)
    }

    /// Returns the connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the client's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns when the connection was accepted.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Returns false once the connection is being torn down.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Writes and flushes `data`.
    ///
    /// Any failure closes the connection, and its read loop then reports
    /// the disconnect. A [`Connection::close`] issued while the write is
    /// pending (for example by [`Hub::stop`](super::Hub::stop)) aborts it.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Closed` if the connection is torn down before or
    ///   during the write
    /// - `ConnectionError::Disconnected` if the peer is gone (broken pipe,
    ///   reset, abort)
    /// - `ConnectionError::WriteTimeout` if the write did not finish in time
    /// - `ConnectionError::Io` for any other transport error
    pub async fn send(&self, data: &[u8]) -> Result<(), ConnectionError> {
        if !self.is_alive() {
            return Err(ConnectionError::Closed);
        }

        let result = {
            let mut guard = tokio::select! {
                _ = self.cancel_token.cancelled() => return Err(ConnectionError::Closed),
                guard = self.writer.lock() => guard,
            };
            let Some(writer) = guard.as_mut() else {
                return Err(ConnectionError::Closed);
            };

            let write = timeout(self.write_timeout, async {
                writer.write_all(data).await?;
                writer.flush().await?;
                Ok::<(), io::Error>(())
            });

            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => Err(ConnectionError::Closed),
                written = write => match written {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(ConnectionError::from_io(&e)),
                    Err(_) => Err(ConnectionError::WriteTimeout),
                },
            }
        };

        self.settle(result)
    }

    /// Closes the connection if a send failed.
    fn settle(&self, result: Result<(), ConnectionError>) -> Result<(), ConnectionError> {
        if let Err(ref e) = result {
            debug!(connection = %self.id, error = %e, "Send failed, closing connection");
            self.close();
        }
        result
    }

    /// Sends the UTF-8 bytes of `text`.
    pub async fn send_str(&self, text: &str) -> Result<(), ConnectionError> {
        self.send(text.as_bytes()).await
    }

    /// Marks the connection dead and cancels its read loop.
    ///
    /// Safe to call from any task, any number of times, including while the
    /// read loop is running. The socket is released by the read loop as it
    /// exits.
    pub fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!(connection = %self.id, "Closing connection");
        }
        self.cancel_token.cancel();
    }

    /// Runs the read loop until EOF, an error, or [`Connection::close`].
    ///
    /// On exit the socket is shut down and the hub is told about the
    /// disconnect. Returns the reason the loop ended.
    pub(crate) async fn run_reader(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        hub: WeakHub,
        settings: ReadSettings,
    ) -> ConnectionError {
        let mut buf = vec![0u8; settings.buffer_size.max(1)];

        let reason = loop {
            let read = tokio::select! {
                _ = self.cancel_token.cancelled() => break ConnectionError::Closed,
                result = read_chunk(&mut reader, &mut buf, settings.idle_timeout) => result,
            };

            match read {
                Ok(0) => break ConnectionError::Eof,
                Ok(n) => {
                    if !self.is_alive() {
                        break ConnectionError::Closed;
                    }
                    let Some(hub) = hub.upgrade() else {
                        break ConnectionError::Closed;
                    };
                    if let Some(data) = buf.get(..n) {
                        trace!(connection = %self.id, bytes = n, "Read chunk");
                        hub.receive(&self, data);
                    }
                }
                Err(e) => break e,
            }
        };

        self.alive.store(false, Ordering::SeqCst);
        self.cancel_token.cancel();
        drop(reader);
        self.release_writer().await;

        debug!(connection = %self.id, reason = %reason, "Read loop finished");

        if let Some(hub) = hub.upgrade() {
            hub.disconnect_client(&self);
        }

        reason
    }

    /// Shuts down and drops the write half, fully closing the socket.
    async fn release_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                trace!(connection = %self.id, error = %e, "Shutdown after close failed");
            }
        }
    }
}

/// Reads whatever is available, honoring an optional idle deadline.
async fn read_chunk(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<usize, ConnectionError> {
    match idle_timeout {
        Some(limit) => match timeout(limit, reader.read(buf)).await {
            Ok(result) => result.map_err(|e| ConnectionError::from_io(&e)),
            Err(_) => Err(ConnectionError::ReadTimeout),
        },
        None => reader.read(buf).await.map_err(|e| ConnectionError::from_io(&e)),
    }
}

/// Errors that can occur on a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,

    #[error("Peer disconnected: {0}")]
    Disconnected(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Read timeout")]
    ReadTimeout,

    #[error("End of stream")]
    Eof,
}

impl ConnectionError {
    /// Maps a transport error, separating a vanished peer from other failures.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => Self::Disconnected(error.to_string()),
            _ => Self::Io(error.to_string()),
        }
    }
}
