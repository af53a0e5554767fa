//! Reconnecting board client.
//!
//! `BoardSimulator` behaves like an ADK board on the network:
//! - Connects to the hub, retrying with exponential backoff
//! - Sends one 2-byte little-endian sample per interval
//! - Decodes every received byte as an LED command
//! - Reports what happens through an event channel
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use microbridge_core::{LedState, SensorValue};
use microbridge_protocol::{decode_commands, CommandError};

use crate::error::{Result, SimError};
use crate::source::SampleSource;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a simulated board.
///
/// # Example
///
/// ```rust
/// use microbridge_sim::SimConfig;
/// use std::time::Duration;
///
/// let config = SimConfig {
///     addr: "127.0.0.1:4568".to_string(),
///     sample_interval: Duration::from_millis(50),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Hub address as `host:port`.
    pub addr: String,

    /// Time between two samples.
    pub sample_interval: Duration,

    /// Step of the triangle sweep.
    pub step: u16,

    /// Initial delay before the first retry after a failed connect.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retries.
    pub retry_max_delay: Duration,

    /// Multiplier applied to the delay after each failed attempt.
    pub retry_multiplier: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4568".to_string(),
            sample_interval: Duration::from_millis(500),
            step: 32,
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            retry_multiplier: 2.0,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// What the simulated board observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// Connected to the hub.
    Connected { addr: String },

    /// The session ended; the simulator will reconnect unless cancelled.
    Disconnected { reason: String },

    /// A sample was written to the hub.
    SampleSent(SensorValue),

    /// An LED command arrived. Sent for every command, even when the state
    /// does not change.
    LedChanged(LedState),

    /// A byte that is not a valid LED command arrived.
    InvalidCommand { byte: u8 },
}

// ============================================================================
// Board Simulator
// ============================================================================

/// A simulated ADK board.
///
/// # Example
///
/// ```rust,ignore
/// use microbridge_sim::{BoardSimulator, SimConfig};
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let cancel_token = CancellationToken::new();
/// let board = BoardSimulator::new(SimConfig::default(), tx, cancel_token.clone());
///
/// tokio::spawn(async move { board.run().await });
/// while let Some(event) = rx.recv().await {
///     println!("{event:?}");
/// }
/// ```
pub struct BoardSimulator {
    config: SimConfig,
    event_tx: mpsc::UnboundedSender<SimEvent>,
    cancel_token: CancellationToken,
    led: LedState,
}

impl BoardSimulator {
    #[must_use]
    pub fn new(
        config: SimConfig,
        event_tx: mpsc::UnboundedSender<SimEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            cancel_token,
            led: LedState::default(),
        }
    }

    /// Returns the LED state last commanded by the hub.
    pub fn led(&self) -> LedState {
        self.led
    }

    /// Runs sessions until the cancellation token fires.
    ///
    /// Each session starts a fresh sample sweep. Between sessions the
    /// simulator waits with exponential backoff.
    pub async fn run(mut self) {
        info!(addr = %self.config.addr, "Board simulator starting");

        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }

            match self.connect_with_retry().await {
                Ok(stream) => {
                    self.emit(SimEvent::Connected {
                        addr: self.config.addr.clone(),
                    });

                    let reason = match self.handle_connection(stream).await {
                        Ok(()) => "cancelled".to_string(),
                        Err(e) => {
                            warn!(error = %e, "Session ended");
                            e.to_string()
                        }
                    };
                    self.emit(SimEvent::Disconnected { reason });
                }
                Err(SimError::Cancelled) => break,
                Err(e) => warn!(error = %e, "Failed to connect to hub"),
            }
        }

        info!("Board simulator stopped");
    }

    /// Connects, retrying with exponential backoff until cancelled.
    async fn connect_with_retry(&self) -> Result<TcpStream> {
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            debug!(attempt, addr = %self.config.addr, "Connecting to hub");

            let connected = tokio::select! {
                _ = self.cancel_token.cancelled() => return Err(SimError::Cancelled),
                result = TcpStream::connect(&self.config.addr) => result,
            };

            match connected {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "Failed to set TCP_NODELAY");
                    }
                    info!(attempt, addr = %self.config.addr, "Connected to hub");
                    return Ok(stream);
                }
                Err(e) => {
                    if attempt == 1 {
                        warn!(addr = %self.config.addr, error = %e, "Hub not reachable, will retry");
                    } else {
                        debug!(attempt, error = %e, "Connection attempt failed");
                    }
                }
            }

            tokio::select! {
                _ = sleep(delay) => {
                    let next_delay_ms = (delay.as_millis() as f64 * self.config.retry_multiplier) as u64;
                    delay = Duration::from_millis(next_delay_ms).min(self.config.retry_max_delay);
                }
                _ = self.cancel_token.cancelled() => return Err(SimError::Cancelled),
            }
        }
    }

    /// Streams samples and reads commands until the hub goes away.
    ///
    /// Returns `Ok(())` only when cancelled.
    async fn handle_connection(&mut self, stream: TcpStream) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let mut source = SampleSource::new(self.config.step);
        let mut ticker = interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; 64];

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    if let Err(e) = writer.shutdown().await {
                        debug!(error = %e, "Shutdown on cancel failed");
                    }
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let value = source.next().unwrap_or_default();
                    writer.write_all(&value.to_le_bytes()).await?;
                    writer.flush().await?;
                    debug!(value = value.raw(), "Sample sent");
                    self.emit(SimEvent::SampleSent(value));
                }
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Err(SimError::Closed);
                    }
                    if let Some(bytes) = buf.get(..n) {
                        self.apply_commands(bytes);
                    }
                }
            }
        }
    }

    fn apply_commands(&mut self, bytes: &[u8]) {
        for command in decode_commands(bytes) {
            match command {
                Ok(state) => {
                    if state != self.led {
                        info!(led = %state, "LED switched");
                    }
                    self.led = state;
                    self.emit(SimEvent::LedChanged(state));
                }
                Err(CommandError::UnknownByte { byte, offset }) => {
                    warn!(byte, offset, "Ignoring unknown command byte");
                    self.emit(SimEvent::InvalidCommand { byte });
                }
            }
        }
    }

    fn emit(&self, event: SimEvent) {
        // The receiver may already be gone during shutdown.
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator() -> (BoardSimulator, mpsc::UnboundedReceiver<SimEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let board = BoardSimulator::new(SimConfig::default(), tx, CancellationToken::new());
        (board, rx)
    }

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.addr, "127.0.0.1:4568");
        assert!(config.retry_initial_delay <= config.retry_max_delay);
    }

    #[test]
    fn test_commands_update_led() {
        let (mut board, mut rx) = simulator();

        board.apply_commands(&[1, 1, 0]);

        assert_eq!(board.led(), LedState::Off);
        assert_eq!(rx.try_recv().unwrap(), SimEvent::LedChanged(LedState::On));
        assert_eq!(rx.try_recv().unwrap(), SimEvent::LedChanged(LedState::On));
        assert_eq!(rx.try_recv().unwrap(), SimEvent::LedChanged(LedState::Off));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_byte_reported() {
        let (mut board, mut rx) = simulator();

        board.apply_commands(&[7, 1]);

        assert_eq!(rx.try_recv().unwrap(), SimEvent::InvalidCommand { byte: 7 });
        assert_eq!(rx.try_recv().unwrap(), SimEvent::LedChanged(LedState::On));
        assert_eq!(board.led(), LedState::On);
    }

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let config = SimConfig {
            // Nothing listens on loopback port 1.
            addr: "127.0.0.1:1".to_string(),
            retry_initial_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let board = BoardSimulator::new(config, tx, cancel_token.clone());

        let handle = tokio::spawn(board.run());
        sleep(Duration::from_millis(50)).await;
        cancel_token.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
