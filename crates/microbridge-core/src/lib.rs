//! microbridge Core - Shared types for the ADK board bridge
//!
//! This crate provides the domain types shared between the hub daemon
//! (microbridged), the wire protocol and the board simulator.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod connection;
pub mod error;
pub mod led;
pub mod sensor;

// Re-exports for convenience
pub use connection::ConnectionId;
pub use error::{DomainError, DomainResult};
pub use led::LedState;
pub use sensor::{SensorSnapshot, SensorValue, DEFAULT_ADC_VALUE};
