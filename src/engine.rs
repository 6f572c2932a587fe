//! The transport-engine surface consumed by [`crate::client::TcpClient`].
//!
//! An engine is a non-blocking, single-threaded TCP implementation.  It owns
//! every connection object; callers refer to one by its [`ConnId`] and look it
//! up again through [`TransportEngine::conn`] when needed.  All progress
//! happens inside [`TransportEngine::poll`], which synchronously delivers zero
//! or more callbacks to an [`EventHandler`] and returns.
//!
//! ```text
//!  TcpClient ──poll(&mut shim)──▶ TransportEngine
//!      ▲                               │
//!      │  handle / last error          │ on_* callbacks, in engine order
//!      └──────────── EventShim ◀───────┘
//! ```
//!
//! `poll` is generic over the handler so callbacks are statically bound.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Engine-issued index of a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u32);

/// Coarse lifecycle of an engine-owned connection.
///
/// ```text
///  SYN_SENT ──SYN-ACK──▶ ESTABLISHED ──RST / FIN / timeout / close──▶ CLOSED
///     │                                                                 ▲
///     └─────────────────────── RST / timeout ───────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// SYN sent; waiting for SYN-ACK.
    SynSent,
    /// Handshake complete; data may flow.
    Established,
    /// Reset, timed out, half-closed by the peer, or closed locally.
    Closed,
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SynSent => "SYN_SENT",
            Self::Established => "ESTABLISHED",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// A connection object owned by an engine.
pub trait EngineConn {
    fn id(&self) -> ConnId;

    fn is_closed(&self) -> bool;

    /// Remote endpoint of the connection.
    fn peer_addr(&self) -> SocketAddrV4;

    /// Queue `data` for transmission without blocking.
    ///
    /// Returns how many bytes the engine accepted.  `more` hints that another
    /// send follows immediately so the engine may coalesce segments.
    fn send(&mut self, data: &[u8], more: bool) -> usize;

    fn close(&mut self);
}

/// Callbacks an engine delivers from inside [`TransportEngine::poll`].
pub trait EventHandler<C: EngineConn> {
    /// The peer answered the SYN with RST.  No connection object survives.
    fn on_connection_refused(&mut self);

    fn on_connection_reset(&mut self, conn: &mut C);

    /// SYN or data retransmissions exhausted.
    fn on_connection_timeout(&mut self, conn: &mut C);

    /// The engine finished closing the connection.
    fn on_connection_closed(&mut self, conn: &mut C);

    /// Peer sent FIN.  `data` holds any bytes still buffered for the connection.
    fn on_fin(&mut self, conn: &mut C, data: &[u8]);

    /// Send buffer space became available again.
    fn on_more_sendable(&mut self, conn: &mut C);

    fn on_user_timeout(&mut self, conn: &mut C, timer_id: u32);

    fn on_connection_established(&mut self, conn: &mut C);

    /// In-order payload arrived.
    ///
    /// `data` starts with any bytes left unconsumed by the previous call.
    /// Returns the length of the trailing suffix *not* consumed; the engine
    /// keeps those bytes and presents them again with the next delivery.
    fn on_data(&mut self, conn: &mut C, data: &[u8]) -> usize;
}

/// A poll-driven TCP client engine.
pub trait TransportEngine {
    type Conn: EngineConn;

    /// Bind the engine to the named network interface.
    fn init(&mut self, interface: &str) -> Result<(), EngineError>;

    /// Start an active open.  Completion is reported through `poll`.
    fn connect(&mut self, server_ip: Ipv4Addr, server_port: u16) -> Result<(), EngineError>;

    /// Close every connection the engine holds.
    fn close(&mut self);

    /// Run one non-blocking pump, delivering events to `handler`.
    fn poll<H: EventHandler<Self::Conn>>(&mut self, handler: &mut H);

    fn conn(&self, id: ConnId) -> Option<&Self::Conn>;

    fn conn_mut(&mut self, id: ConnId) -> Option<&mut Self::Conn>;

    fn config(&self) -> &EngineConfig;
}
