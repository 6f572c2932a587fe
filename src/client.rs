//! Single-connection client adapter.
//!
//! [`TcpClient`] wraps a [`TransportEngine`] and tracks exactly two pieces of
//! state across calls:
//! - the handle of the one connection the engine established, and
//! - the most recent error or close reason (last write wins).
//!
//! Every operation returns after at most one engine pump, except
//! [`TcpClient::connect`], which spins the pump until the handshake resolves.
//!
//! ```ignore
//! let mut client = TcpClient::new(engine);
//! client.connect("eth0", "10.0.0.2".parse()?, 9000)?;
//! client.write_nonblock(&packet.encode(), false)?;
//! while client.is_connected() {
//!     client.read(|data| for_each_packet(data, |p| println!("{p:?}")));
//! }
//! println!("closed: {}", client.last_error().unwrap());
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::engine::{ConnId, EngineConn, EventHandler, TransportEngine};
use crate::error::ClientError;

// ---------------------------------------------------------------------------
// TcpClient
// ---------------------------------------------------------------------------

/// Blocking-style client API over a poll-driven engine.
///
/// Not thread-safe by construction: all state is mutated from inside `poll`
/// on the caller's thread.
pub struct TcpClient<E: TransportEngine> {
    engine: E,
    /// Non-owning handle into the engine's connection storage.
    conn: Option<ConnId>,
    last_error: Option<ClientError>,
}

impl<E: TransportEngine> TcpClient<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            conn: None,
            last_error: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// The most recent failure or close reason, if any.
    pub fn last_error(&self) -> Option<&ClientError> {
        self.last_error.as_ref()
    }

    /// `true` while a connection handle is held and the engine still reports
    /// it open.  Asks the engine on every call.
    pub fn is_connected(&self) -> bool {
        self.conn
            .and_then(|id| self.engine.conn(id))
            .is_some_and(|c| !c.is_closed())
    }

    /// Remote endpoint, or `None` when not connected.
    pub fn peer_addr(&self) -> Option<SocketAddrV4> {
        self.conn
            .and_then(|id| self.engine.conn(id))
            .filter(|c| !c.is_closed())
            .map(|c| c.peer_addr())
    }

    /// Initialise the engine on `interface` and open a connection.
    ///
    /// Busy-polls the engine until the connection is established or an error
    /// is recorded.  There is no timeout here; the engine's SYN retry limit
    /// bounds the wait.  Bytes that arrive before establishment are left with
    /// the engine and never reach a caller's handler.
    pub fn connect(
        &mut self,
        interface: &str,
        server_ip: Ipv4Addr,
        server_port: u16,
    ) -> Result<(), ClientError> {
        self.conn = None;
        self.last_error = None;

        if let Err(e) = self.engine.init(interface) {
            return Err(self.record(e.into()));
        }
        if let Err(e) = self.engine.connect(server_ip, server_port) {
            return Err(self.record(e.into()));
        }
        log::debug!("[client] connecting to {server_ip}:{server_port} via {interface}");

        let mut pumps = 0u64;
        while self.conn.is_none() && self.last_error.is_none() {
            self.read(|data| data.len());
            pumps += 1;
        }

        // A handle assigned earlier in the same pump as an error still counts;
        // the error stays in the slot and `is_connected` reports the teardown.
        match (self.conn, &self.last_error) {
            (Some(id), _) => {
                log::debug!("[client] established {id:?} after {pumps} pump(s)");
                Ok(())
            }
            (None, Some(e)) => {
                log::debug!("[client] connect failed after {pumps} pump(s): {e}");
                Err(e.clone())
            }
            (None, None) => unreachable!("connect loop exits only on handle or error"),
        }
    }

    /// Record `reason` and ask the engine to close.  Safe to call at any time.
    pub fn close(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        log::debug!("[client] close: {reason}");
        self.last_error = Some(ClientError::Local(reason));
        self.engine.close();
    }

    /// Send all of `data` or fail.
    ///
    /// If the engine cannot take every byte the connection is closed and
    /// "send buffer full" is recorded; there is no partial success and no
    /// queueing.  `more` is forwarded to the engine as a coalescing hint.
    /// Writing to a connection the engine already closed fails the same way,
    /// even when `data` is empty.
    pub fn write_nonblock(&mut self, data: &[u8], more: bool) -> Result<(), ClientError> {
        let Some(conn) = self.conn.and_then(|id| self.engine.conn_mut(id)) else {
            return Err(ClientError::NotConnected);
        };
        // An empty write would otherwise "succeed" on a dead connection.
        if conn.is_closed() {
            return Err(self.record(ClientError::SendBufferFull));
        }

        let sent = conn.send(data, more);
        if sent != data.len() {
            log::warn!("[client] send accepted {sent} of {} bytes; closing", data.len());
            conn.close();
            return Err(self.record(ClientError::SendBufferFull));
        }
        Ok(())
    }

    /// Run one engine pump, feeding received bytes to `handler`.
    ///
    /// `handler` gets the buffered bytes and returns how many trailing bytes
    /// it did not consume (at most `data.len()`); those are presented again at
    /// the front of the next delivery.  Returns `true` iff at least one data
    /// event occurred during this pump.
    pub fn read<F>(&mut self, mut handler: F) -> bool
    where
        F: FnMut(&[u8]) -> usize,
    {
        let mut shim = EventShim {
            handler: &mut handler,
            conn: &mut self.conn,
            last_error: &mut self.last_error,
            got_data: false,
        };
        self.engine.poll(&mut shim);
        shim.got_data
    }

    fn record(&mut self, err: ClientError) -> ClientError {
        self.last_error = Some(err.clone());
        err
    }
}

// ---------------------------------------------------------------------------
// EventShim
// ---------------------------------------------------------------------------

/// Per-`read` translation of engine callbacks onto the client's slots.
struct EventShim<'a, F> {
    handler: &'a mut F,
    conn: &'a mut Option<ConnId>,
    last_error: &'a mut Option<ClientError>,
    got_data: bool,
}

impl<F> EventShim<'_, F> {
    fn set_error(&mut self, err: ClientError) {
        log::debug!("[client] {err}");
        *self.last_error = Some(err);
    }
}

impl<C, F> EventHandler<C> for EventShim<'_, F>
where
    C: EngineConn,
    F: FnMut(&[u8]) -> usize,
{
    fn on_connection_refused(&mut self) {
        self.set_error(ClientError::Refused);
    }

    fn on_connection_reset(&mut self, _conn: &mut C) {
        self.set_error(ClientError::Reset);
    }

    fn on_connection_timeout(&mut self, _conn: &mut C) {
        self.set_error(ClientError::Timeout);
    }

    fn on_connection_closed(&mut self, _conn: &mut C) {
        self.set_error(ClientError::Closed);
    }

    // Trailing bytes are dropped along with the connection.
    fn on_fin(&mut self, _conn: &mut C, _data: &[u8]) {
        self.set_error(ClientError::Closed);
    }

    fn on_more_sendable(&mut self, _conn: &mut C) {}

    fn on_user_timeout(&mut self, _conn: &mut C, _timer_id: u32) {}

    fn on_connection_established(&mut self, conn: &mut C) {
        *self.conn = Some(conn.id());
    }

    #[inline]
    fn on_data(&mut self, _conn: &mut C, data: &[u8]) -> usize {
        self.got_data = true;
        let remaining = (self.handler)(data);
        debug_assert!(remaining <= data.len(), "handler left more bytes than it was given");
        remaining
    }
}
