//! Scripted in-process engine for deterministic testing.
//!
//! [`SimEngine`] implements [`TransportEngine`] without touching the network.
//! Each call to `poll` consumes one scripted batch of [`SimEvent`]s and
//! delivers them in order, applying the same state changes a real engine
//! would:
//!
//! | Event            | Connection state after | Callback                       |
//! |------------------|------------------------|--------------------------------|
//! | `Established`    | Established            | `on_connection_established`    |
//! | `Data(bytes)`    | unchanged              | `on_data` (with retained bytes)|
//! | `Fin(bytes)`     | Closed                 | `on_fin`                       |
//! | `Reset`          | Closed                 | `on_connection_reset`          |
//! | `Timeout`        | Closed                 | `on_connection_timeout`        |
//! | `Closed`         | Closed                 | `on_connection_closed`         |
//! | `Refused`        | slot freed in SYN_SENT, otherwise Closed | `on_connection_refused` |
//! | `MoreSendable`   | unchanged              | `on_more_sendable`             |
//! | `UserTimeout(n)` | unchanged              | `on_user_timeout`              |
//!
//! When no batch is queued and the connection is still in SYN_SENT, the
//! pump counts as one SYN retransmission; once `syn_retries` are used up the
//! next idle pump times the connection out.  An unanswered connect therefore
//! always terminates, as it would against a silent peer.
//!
//! Received bytes are reassembled the way an engine must for the
//! unconsumed-suffix contract: whatever a handler leaves unconsumed is kept
//! and presented at the front of the next delivery.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::config::EngineConfig;
use crate::engine::{ConnId, ConnState, EngineConn, EventHandler, TransportEngine};
use crate::error::{ConfigError, EngineError};

/// One scripted engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Refused,
    Established,
    Data(Vec<u8>),
    Fin(Vec<u8>),
    Reset,
    Timeout,
    Closed,
    MoreSendable,
    UserTimeout(u32),
}

// ---------------------------------------------------------------------------
// SimConn
// ---------------------------------------------------------------------------

/// Connection slot owned by a [`SimEngine`].
#[derive(Debug)]
pub struct SimConn {
    id: ConnId,
    state: ConnState,
    peer: SocketAddrV4,
    /// Bytes accepted by `send` and not yet drained by the test.
    sent: Vec<u8>,
    send_capacity: usize,
    /// Every `more` hint passed to `send`, in order.
    more_hints: Vec<bool>,
}

impl SimConn {
    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    pub fn more_hints(&self) -> &[bool] {
        &self.more_hints
    }
}

impl EngineConn for SimConn {
    fn id(&self) -> ConnId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    fn peer_addr(&self) -> SocketAddrV4 {
        self.peer
    }

    fn send(&mut self, data: &[u8], more: bool) -> usize {
        if self.state != ConnState::Established {
            return 0;
        }
        let room = self.send_capacity.saturating_sub(self.sent.len());
        let n = data.len().min(room);
        self.sent.extend_from_slice(&data[..n]);
        self.more_hints.push(more);
        n
    }

    fn close(&mut self) {
        self.state = ConnState::Closed;
    }
}

// ---------------------------------------------------------------------------
// SimEngine
// ---------------------------------------------------------------------------

/// Deterministic, scripted [`TransportEngine`].
#[derive(Debug)]
pub struct SimEngine {
    config: EngineConfig,
    interface: Option<String>,
    conn: Option<SimConn>,
    next_id: u32,
    script: VecDeque<Vec<SimEvent>>,
    /// Bytes delivered to the connection but not yet consumed by a handler.
    recv_buf: Vec<u8>,
    syn_retransmits: u32,
    polls: u64,
    init_failure: Option<String>,
    connect_failure: Option<String>,
    send_capacity: usize,
}

impl SimEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let send_capacity = config.send_buf_size();
        Ok(Self {
            config,
            interface: None,
            conn: None,
            next_id: 0,
            script: VecDeque::new(),
            recv_buf: Vec::new(),
            syn_retransmits: 0,
            polls: 0,
            init_failure: None,
            connect_failure: None,
            send_capacity,
        })
    }

    /// Queue the events the next unscripted pump will deliver.
    pub fn push_pump(&mut self, events: Vec<SimEvent>) {
        self.script.push_back(events);
    }

    /// Make the next `init` fail with `msg`.
    pub fn fail_init(&mut self, msg: impl Into<String>) {
        self.init_failure = Some(msg.into());
    }

    /// Make the next `connect` fail with `msg`.
    pub fn fail_connect(&mut self, msg: impl Into<String>) {
        self.connect_failure = Some(msg.into());
    }

    /// Cap the bytes a connection may hold un-drained.  Applies immediately.
    pub fn set_send_capacity(&mut self, bytes: usize) {
        self.send_capacity = bytes;
        if let Some(conn) = self.conn.as_mut() {
            conn.send_capacity = bytes;
        }
    }

    /// Take every byte sent so far, freeing send capacity.
    pub fn drain_sent(&mut self) -> Vec<u8> {
        self.conn
            .as_mut()
            .map(|c| std::mem::take(&mut c.sent))
            .unwrap_or_default()
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn current_conn(&self) -> Option<&SimConn> {
        self.conn.as_ref()
    }

    /// Bytes held back for the next delivery.
    pub fn pending_recv(&self) -> &[u8] {
        &self.recv_buf
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn scripted_pumps_left(&self) -> usize {
        self.script.len()
    }

    fn idle<H: EventHandler<SimConn>>(&mut self, handler: &mut H) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        if conn.state != ConnState::SynSent {
            return;
        }
        if self.syn_retransmits < self.config.syn_retries {
            self.syn_retransmits += 1;
            log::trace!("[sim] SYN retransmit {}", self.syn_retransmits);
            return;
        }
        log::debug!("[sim] SYN retries exhausted");
        conn.state = ConnState::Closed;
        handler.on_connection_timeout(conn);
    }

    fn deliver<H: EventHandler<SimConn>>(&mut self, event: SimEvent, handler: &mut H) {
        if event == SimEvent::Refused {
            // A refused SYN frees the slot; a refusal after that tears the
            // connection down like any other fatal event.
            match self.conn.as_ref().map(|c| c.state) {
                Some(ConnState::SynSent) => self.conn = None,
                Some(_) => {
                    if let Some(conn) = self.conn.as_mut() {
                        conn.state = ConnState::Closed;
                    }
                }
                None => {}
            }
            handler.on_connection_refused();
            return;
        }

        let Some(conn) = self.conn.as_mut() else {
            log::warn!("[sim] dropping {event:?}: no connection");
            return;
        };
        if conn.state == ConnState::Closed {
            log::warn!("[sim] dropping {event:?}: connection closed");
            return;
        }

        match event {
            SimEvent::Refused => {}
            SimEvent::Established => {
                if conn.state == ConnState::SynSent {
                    conn.state = ConnState::Established;
                    handler.on_connection_established(conn);
                }
            }
            SimEvent::Data(bytes) => {
                let cap = self.config.conn_recv_buf_size as usize;
                let room = cap.saturating_sub(self.recv_buf.len());
                if bytes.len() > room {
                    log::warn!("[sim] receive buffer full; dropping {} byte(s)", bytes.len() - room);
                }
                self.recv_buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
                if self.recv_buf.is_empty() {
                    return;
                }
                let remaining = handler.on_data(conn, &self.recv_buf).min(self.recv_buf.len());
                let consumed = self.recv_buf.len() - remaining;
                self.recv_buf.drain(..consumed);
            }
            SimEvent::Fin(bytes) => {
                self.recv_buf.extend_from_slice(&bytes);
                conn.state = ConnState::Closed;
                handler.on_fin(conn, &self.recv_buf);
                self.recv_buf.clear();
            }
            SimEvent::Reset => {
                conn.state = ConnState::Closed;
                handler.on_connection_reset(conn);
            }
            SimEvent::Timeout => {
                conn.state = ConnState::Closed;
                handler.on_connection_timeout(conn);
            }
            SimEvent::Closed => {
                conn.state = ConnState::Closed;
                handler.on_connection_closed(conn);
            }
            SimEvent::MoreSendable => handler.on_more_sendable(conn),
            SimEvent::UserTimeout(id) => handler.on_user_timeout(conn, id),
        }
    }
}

impl TransportEngine for SimEngine {
    type Conn = SimConn;

    fn init(&mut self, interface: &str) -> Result<(), EngineError> {
        if let Some(msg) = self.init_failure.take() {
            return Err(EngineError(msg));
        }
        if interface.is_empty() {
            return Err(EngineError::new("empty interface name"));
        }
        self.interface = Some(interface.to_string());
        Ok(())
    }

    fn connect(&mut self, server_ip: Ipv4Addr, server_port: u16) -> Result<(), EngineError> {
        if self.interface.is_none() {
            return Err(EngineError::new("engine not initialised"));
        }
        if let Some(msg) = self.connect_failure.take() {
            return Err(EngineError(msg));
        }
        if self.conn.as_ref().is_some_and(|c| !c.is_closed()) {
            return Err(EngineError::new("connection slot in use"));
        }

        let id = ConnId(self.next_id);
        self.next_id += 1;
        self.conn = Some(SimConn {
            id,
            state: ConnState::SynSent,
            peer: SocketAddrV4::new(server_ip, server_port),
            sent: Vec::new(),
            send_capacity: self.send_capacity,
            more_hints: Vec::new(),
        });
        self.recv_buf.clear();
        self.syn_retransmits = 0;
        log::debug!("[sim] {id:?} SYN_SENT to {server_ip}:{server_port}");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.close();
        }
    }

    fn poll<H: EventHandler<SimConn>>(&mut self, handler: &mut H) {
        self.polls += 1;
        match self.script.pop_front() {
            Some(batch) => {
                for event in batch {
                    self.deliver(event, handler);
                }
            }
            None => self.idle(handler),
        }
    }

    fn conn(&self, id: ConnId) -> Option<&SimConn> {
        self.conn.as_ref().filter(|c| c.id == id)
    }

    fn conn_mut(&mut self, id: ConnId) -> Option<&mut SimConn> {
        self.conn.as_mut().filter(|c| c.id == id)
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }
}
