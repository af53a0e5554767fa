//! LED command state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Binary on/off state pushed to the board.
///
/// The board firmware understands exactly two command bytes:
/// `0x00` switches the LED off, `0x01` switches it on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedState {
    /// LED off (command byte 0)
    #[default]
    Off,

    /// LED on (command byte 1)
    On,
}

impl LedState {
    /// Returns the opposite state.
    pub fn toggled(self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Off,
        }
    }

    /// Returns the single byte sent on the wire for this state.
    pub fn command_byte(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
        }
    }

    /// Parses a command byte received from the hub.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidCommandByte` for anything but 0 or 1.
    pub fn from_command_byte(byte: u8) -> DomainResult<Self> {
        match byte {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            other => Err(DomainError::InvalidCommandByte { byte: other }),
        }
    }

    /// Returns true if the LED is on.
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

impl From<bool> for LedState {
    fn from(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

impl fmt::Display for LedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
        }
    }
}
