//! Simulated ADK board.
//!
//! Connects to a microbridge hub the way the real board does, streams
//! 2-byte sensor samples and reports the LED commands it receives:
//! - `client` - The reconnecting board client and its events
//! - `source` - Sample generators
//! - `error` - Simulator errors
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

pub mod client;
pub mod error;
pub mod source;

pub use client::{BoardSimulator, SimConfig, SimEvent};
pub use error::{Result, SimError};
pub use source::{SampleSource, ADC_MAX};
