//! `polltcp` — a single-connection TCP client over a poll-driven transport engine.
//!
//! # Architecture
//!
//! ```text
//!  ┌─────────────┐ connect / read / write_nonblock / close
//!  │ Application │──────────────────────────────────────────┐
//!  └─────────────┘                                          │
//!                                                    ┌──────▼──────┐
//!                                                    │  TcpClient  │
//!                                                    │ handle, err │
//!                                                    └──────┬──────┘
//!                                     poll(&mut EventShim)  │
//!                                                    ┌──────▼──────────┐
//!                                                    │ TransportEngine │
//!                                                    │ (owns the conn) │
//!                                                    └─────────────────┘
//! ```
//!
//! The engine does all TCP work; the client only drives its pump and keeps
//! the connection handle and the last error.
//!
//! Each module has a single responsibility:
//! - [`client`]    — the connection-lifecycle adapter and its per-read event shim
//! - [`engine`]    — traits an engine implements, connection handle and state
//! - [`config`]    — static engine tuning parameters
//! - [`error`]     — error types
//! - [`simulator`] — scripted in-process engine for deterministic testing
//! - [`kernel`]    — engine backed by a non-blocking OS socket
//! - [`packet`]    — fixed-size demo record and stream decoding helper

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod packet;
pub mod simulator;

pub use client::TcpClient;
pub use config::{CongestionControl, EngineConfig};
pub use engine::{ConnId, ConnState, EngineConn, EventHandler, TransportEngine};
pub use error::{ClientError, ConfigError, EngineError};
