//! Error types for the board simulator.

use std::io;
use thiserror::Error;

/// Errors that end one simulator session.
///
/// None of these are fatal to [`crate::BoardSimulator::run`]; it logs them
/// and reconnects.
#[derive(Error, Debug)]
pub enum SimError {
    /// Could not reach the hub.
    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// The hub closed the connection.
    #[error("Hub closed the connection")]
    Closed,

    /// Transport failure on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Shutdown was requested while waiting.
    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for simulator operations.
pub type Result<T> = std::result::Result<T, SimError>;
