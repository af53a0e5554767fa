//! Sensor readings reported by the board.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value reported before the first reading arrives.
///
/// Matches the initial `adcSensorValue` the board component has always
/// exposed, so hosts polling early see the same number.
pub const DEFAULT_ADC_VALUE: u16 = 10;

/// An unsigned 16-bit ADC reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorValue(u16);

impl SensorValue {
    /// Creates a new SensorValue.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Assembles a value from its little-endian byte pair.
    pub const fn from_le_pair(low: u8, high: u8) -> Self {
        Self(u16::from_le_bytes([low, high]))
    }

    /// Returns the raw reading.
    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Returns the little-endian wire encoding.
    pub const fn to_le_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

impl Default for SensorValue {
    fn default() -> Self {
        Self(DEFAULT_ADC_VALUE)
    }
}

impl From<u16> for SensorValue {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<SensorValue> for u16 {
    fn from(value: SensorValue) -> Self {
        value.0
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of the tracked sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Most recent decoded value (or the default if none arrived yet)
    pub value: SensorValue,

    /// When the value was last updated, `None` before the first reading
    pub updated_at: Option<DateTime<Utc>>,

    /// Number of readings applied so far
    pub updates: u64,
}

impl SensorSnapshot {
    /// Snapshot of a sensor that has not reported yet.
    pub fn initial() -> Self {
        Self {
            value: SensorValue::default(),
            updated_at: None,
            updates: 0,
        }
    }

    /// Records a new reading taken now.
    pub fn record(&mut self, value: SensorValue) {
        self.record_at(value, Utc::now());
    }

    /// Records a new reading with an explicit timestamp.
    pub fn record_at(&mut self, value: SensorValue, at: DateTime<Utc>) {
        self.value = value;
        self.updated_at = Some(at);
        self.updates = self.updates.saturating_add(1);
    }

    /// Returns true if at least one reading has been recorded.
    pub fn has_reading(&self) -> bool {
        self.updated_at.is_some()
    }
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}
