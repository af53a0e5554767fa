//! Host-side component for an ADK board.
//!
//! `AdkBoard` is what an application embeds to talk to a board: it owns a
//! [`Hub`], tracks the board's ADC reading through a [`SensorTracker`]
//! observer and pushes LED commands to every connected board. The host
//! drives it through three lifecycle hooks:
//!
//! - `on_resume` starts listening
//! - `on_stop` stops listening
//! - `on_delete` stops listening and detaches the tracker

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use microbridge_core::{ConnectionId, LedState, SensorSnapshot, SensorValue};
use microbridge_protocol::{encode_led, FrameMode, SensorDecoder};

use crate::hub::{BroadcastReport, Connection, Hub, HubError, HubObserver};

/// Observer that keeps the latest sensor reading.
///
/// Holds one decoder per connection so that, in stream framing mode, bytes
/// from different boards are never spliced together.
pub struct SensorTracker {
    mode: FrameMode,
    snapshot: std::sync::Mutex<SensorSnapshot>,
    decoders: std::sync::Mutex<HashMap<ConnectionId, SensorDecoder>>,
}

impl SensorTracker {
    /// Creates a tracker reporting the default value until the first reading.
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            snapshot: std::sync::Mutex::new(SensorSnapshot::initial()),
            decoders: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns the framing mode used for decoding.
    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Returns the latest value.
    pub fn value(&self) -> SensorValue {
        self.snapshot().value
    }

    /// Returns the latest value with its update metadata.
    pub fn snapshot(&self) -> SensorSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns how many connections currently have decoder state.
    pub fn tracked_connections(&self) -> usize {
        self.decoders.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn decode(&self, id: ConnectionId, data: &[u8]) -> Option<SensorValue> {
        let mut decoders = self.decoders.lock().unwrap_or_else(PoisonError::into_inner);
        decoders
            .entry(id)
            .or_insert_with(|| SensorDecoder::new(self.mode))
            .push(data)
    }
}

impl HubObserver for SensorTracker {
    fn on_client_connected(&self, _hub: &Hub, connection: &Arc<Connection>) {
        self.decoders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection.id(), SensorDecoder::new(self.mode));
    }

    fn on_client_disconnected(&self, _hub: &Hub, connection: &Arc<Connection>) {
        self.decoders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection.id());
    }

    fn on_received(&self, connection: &Arc<Connection>, data: &[u8]) {
        let Some(value) = self.decode(connection.id(), data) else {
            debug!(
                connection = %connection.id(),
                bytes = data.len(),
                "Chunk carried no complete reading"
            );
            return;
        };

        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(value);
        debug!(connection = %connection.id(), value = value.raw(), "Sensor reading");
    }

    fn on_stopped(&self, _hub: &Hub) {
        self.decoders.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// An ADK board as seen by the host application.
pub struct AdkBoard {
    hub: Hub,
    tracker: Arc<SensorTracker>,
    observer: Arc<dyn HubObserver>,
    led: Mutex<LedState>,
}

impl AdkBoard {
    /// Wraps `hub` and registers the sensor tracker on it.
    pub fn new(hub: Hub, mode: FrameMode) -> Self {
        let tracker = Arc::new(SensorTracker::new(mode));
        let observer: Arc<dyn HubObserver> = tracker.clone();
        hub.add_observer(Arc::clone(&observer));

        Self {
            hub,
            tracker,
            observer,
            led: Mutex::new(LedState::default()),
        }
    }

    /// Returns the underlying hub.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Returns the sensor tracker.
    pub fn tracker(&self) -> &Arc<SensorTracker> {
        &self.tracker
    }

    /// Host resumed: start listening if not already.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Bind` if the port is unavailable. The host decides
    /// whether to retry or disable the board.
    pub async fn on_resume(&self) -> Result<(), HubError> {
        // Re-attach after on_delete; a no-op otherwise.
        self.hub.add_observer(Arc::clone(&self.observer));

        match self.hub.start().await {
            Ok(addr) => {
                info!(address = %addr, "Board bridge listening");
                Ok(())
            }
            Err(HubError::AlreadyRunning { .. }) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Board bridge failed to start");
                Err(e)
            }
        }
    }

    /// Host stopped: stop listening and drop all boards.
    pub async fn on_stop(&self) {
        self.hub.stop().await;
    }

    /// Host deleted the component: stop and detach from the hub.
    pub async fn on_delete(&self) {
        self.hub.stop().await;
        self.hub.remove_observer(&self.observer);
    }

    /// Latest ADC reading from the board.
    pub fn adc_sensor_value(&self) -> u16 {
        self.tracker.value().raw()
    }

    /// Latest reading with its update metadata.
    pub fn sensor_snapshot(&self) -> SensorSnapshot {
        self.tracker.snapshot()
    }

    /// Returns the LED state last sent.
    pub async fn led_state(&self) -> LedState {
        *self.led.lock().await
    }

    /// Flips the LED and broadcasts the new state to every board.
    ///
    /// The state flips even if no board is connected or a send fails; the
    /// report says which boards got the command.
    pub async fn toggle_led(&self) -> BroadcastReport {
        let mut led = self.led.lock().await;
        *led = led.toggled();
        self.push_led(*led).await
    }

    /// Sets the LED and broadcasts the state to every board.
    pub async fn set_led(&self, state: LedState) -> BroadcastReport {
        let mut led = self.led.lock().await;
        *led = state;
        self.push_led(state).await
    }

    /// Sends while the caller holds the LED lock, so boards always see
    /// commands in the order the state changed.
    async fn push_led(&self, state: LedState) -> BroadcastReport {
        let report = self.hub.broadcast(&encode_led(state)).await;
        info!(
            led = %state,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "LED command sent"
        );
        report
    }
}
