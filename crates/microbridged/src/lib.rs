//! microbridge hub - TCP bridge between a host application and ADK boards
//!
//! This crate provides the host side of the bridge:
//! - `hub` - Multi-client TCP server with an observer protocol
//! - `board` - The embedding component: sensor tracking and LED commands
//! - `config` - TOML/env configuration for the daemon
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     microbridged                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │    AdkBoard     │────▶│            Hub              │   │
//! │  │ (LED, lifecycle)│     │  (TcpListener, accept task) │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │ observer                    │ connections       │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  SensorTracker  │◀────│        Connection           │   │
//! │  │ (latest value)  │     │     (read task per board)   │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Poisoned locks are recovered, never propagated as panics

pub mod board;
pub mod config;
pub mod hub;
