//! Poll-driven engine backed by a non-blocking OS TCP socket.
//!
//! [`KernelEngine`] speaks the same [`TransportEngine`] contract as a
//! kernel-bypass stack, but lets the operating system do the TCP work.  It
//! exists so the client and the demo binary run on any Linux host; it is not
//! a low-latency path.
//!
//! Mapping of socket conditions onto engine events:
//!
//! | Condition while SYN_SENT          | Event                 |
//! |-----------------------------------|-----------------------|
//! | `SO_ERROR` = `ECONNREFUSED`       | `on_connection_refused` |
//! | any other `SO_ERROR`              | `on_connection_timeout` |
//! | peer address available            | `on_connection_established` |
//! | `syn_timeout()` elapsed           | `on_connection_timeout` |
//!
//! | Condition while ESTABLISHED       | Event                 |
//! |-----------------------------------|-----------------------|
//! | bytes read                        | `on_data`             |
//! | read returns 0                    | `on_fin`              |
//! | `ETIMEDOUT`                       | `on_connection_timeout` |
//! | any other read error              | `on_connection_reset` |
//!
//! The interface name is only checked for existence; egress follows the
//! host routing table.

use std::ffi::CString;
use std::io::{self, ErrorKind, Read};
use std::net::{Ipv4Addr, Shutdown, SocketAddrV4, TcpStream};
use std::time::Instant;

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};

use crate::config::EngineConfig;
use crate::engine::{ConnId, ConnState, EngineConn, EventHandler, TransportEngine};
use crate::error::{ConfigError, EngineError};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const MORE_FLAG: libc::c_int = libc::MSG_MORE;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MORE_FLAG: libc::c_int = 0;

// ---------------------------------------------------------------------------
// KernelConn
// ---------------------------------------------------------------------------

/// Connection slot of a [`KernelEngine`].
#[derive(Debug)]
pub struct KernelConn {
    id: ConnId,
    state: ConnState,
    peer: SocketAddrV4,
    /// `None` once the connection is closed.
    stream: Option<TcpStream>,
    /// Error returned synchronously by `connect(2)`, reported on the next poll.
    connect_error: Option<io::Error>,
}

impl KernelConn {
    pub fn state(&self) -> ConnState {
        self.state
    }

    fn shut(&mut self) {
        self.state = ConnState::Closed;
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl EngineConn for KernelConn {
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
        let Some(stream) = self.stream.as_ref() else {
            return 0;
        };
        let flags = if more { SEND_FLAGS | MORE_FLAG } else { SEND_FLAGS };
        match SockRef::from(stream).send_with_flags(data, flags) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
            Err(e) => {
                log::warn!("[kernel] send failed: {e}");
                0
            }
        }
    }

    fn close(&mut self) {
        self.shut();
    }
}

// ---------------------------------------------------------------------------
// KernelEngine
// ---------------------------------------------------------------------------

/// [`TransportEngine`] over a non-blocking kernel TCP socket.
#[derive(Debug)]
pub struct KernelEngine {
    config: EngineConfig,
    interface: Option<String>,
    conn: Option<KernelConn>,
    next_id: u32,
    syn_deadline: Option<Instant>,
    /// Received bytes a handler has not consumed yet, at most
    /// `conn_recv_buf_size` long.
    recv_buf: Vec<u8>,
}

impl KernelEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cap = config.conn_recv_buf_size as usize;
        Ok(Self {
            config,
            interface: None,
            conn: None,
            next_id: 0,
            syn_deadline: None,
            recv_buf: Vec::with_capacity(cap),
        })
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn current_conn(&self) -> Option<&KernelConn> {
        self.conn.as_ref()
    }

    fn open_socket(&self, addr: SocketAddrV4) -> io::Result<(TcpStream, Option<io::Error>)> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_send_buffer_size(self.config.send_buf_size())?;
        socket.set_recv_buffer_size(self.config.conn_recv_buf_size as usize)?;

        let pending = match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => None,
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => None,
            Err(e) => Some(e),
        };

        let stream: TcpStream = socket.into();
        stream.set_nodelay(true)?;
        Ok((stream, pending))
    }

    fn poll_connecting<H: EventHandler<KernelConn>>(&mut self, handler: &mut H) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        let Some(stream) = conn.stream.as_ref() else {
            return;
        };

        let failure = conn
            .connect_error
            .take()
            .or_else(|| stream.take_error().unwrap_or_else(Some));
        if let Some(err) = failure {
            log::debug!("[kernel] {:?} connect failed: {err}", conn.id);
            if err.kind() == ErrorKind::ConnectionRefused {
                conn.shut();
                self.conn = None;
                handler.on_connection_refused();
            } else {
                conn.shut();
                handler.on_connection_timeout(conn);
            }
            return;
        }

        if stream.peer_addr().is_ok() {
            conn.state = ConnState::Established;
            self.syn_deadline = None;
            log::debug!("[kernel] {:?} ESTABLISHED with {}", conn.id, conn.peer);
            handler.on_connection_established(conn);
            return;
        }

        if self.syn_deadline.is_some_and(|d| Instant::now() >= d) {
            log::debug!("[kernel] {:?} SYN retries exhausted", conn.id);
            conn.shut();
            handler.on_connection_timeout(conn);
        }
    }

    fn poll_established<H: EventHandler<KernelConn>>(&mut self, handler: &mut H) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        let Some(stream) = conn.stream.as_mut() else {
            return;
        };

        let cap = self.config.conn_recv_buf_size as usize;
        let start = self.recv_buf.len();
        if start >= cap {
            // handler is holding a full buffer; nothing can be read until it consumes
            return;
        }
        self.recv_buf.resize(cap, 0);
        let result = stream.read(&mut self.recv_buf[start..]);

        match result {
            Ok(0) => {
                self.recv_buf.truncate(start);
                log::debug!("[kernel] {:?} FIN from peer", conn.id);
                conn.shut();
                handler.on_fin(conn, &self.recv_buf);
                self.recv_buf.clear();
            }
            Ok(n) => {
                self.recv_buf.truncate(start + n);
                let remaining = handler.on_data(conn, &self.recv_buf).min(self.recv_buf.len());
                let consumed = self.recv_buf.len() - remaining;
                self.recv_buf.drain(..consumed);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                self.recv_buf.truncate(start);
            }
            Err(e) => {
                self.recv_buf.truncate(start);
                log::debug!("[kernel] {:?} read failed: {e}", conn.id);
                conn.shut();
                self.recv_buf.clear();
                if e.kind() == ErrorKind::TimedOut {
                    handler.on_connection_timeout(conn);
                } else {
                    handler.on_connection_reset(conn);
                }
            }
        }
    }
}

impl TransportEngine for KernelEngine {
    type Conn = KernelConn;

    fn init(&mut self, interface: &str) -> Result<(), EngineError> {
        let name = CString::new(interface)
            .map_err(|_| EngineError::new("interface name contains a NUL byte"))?;
        // SAFETY: `name` is a valid NUL-terminated string for the duration of the call.
        let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if index == 0 {
            return Err(EngineError(format!("no such interface: {interface}")));
        }
        log::debug!("[kernel] using interface {interface} (index {index})");
        self.interface = Some(interface.to_string());
        Ok(())
    }

    fn connect(&mut self, server_ip: Ipv4Addr, server_port: u16) -> Result<(), EngineError> {
        if self.interface.is_none() {
            return Err(EngineError::new("engine not initialised"));
        }
        if self.conn.as_ref().is_some_and(|c| !c.is_closed()) {
            return Err(EngineError::new("connection slot in use"));
        }

        let peer = SocketAddrV4::new(server_ip, server_port);
        let (stream, connect_error) = self.open_socket(peer)?;

        let id = ConnId(self.next_id);
        self.next_id += 1;
        self.conn = Some(KernelConn {
            id,
            state: ConnState::SynSent,
            peer,
            stream: Some(stream),
            connect_error,
        });
        self.recv_buf.clear();
        self.syn_deadline = Some(Instant::now() + self.config.syn_timeout());
        log::debug!("[kernel] {id:?} SYN_SENT to {peer}");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.shut();
        }
        self.recv_buf.clear();
    }

    fn poll<H: EventHandler<KernelConn>>(&mut self, handler: &mut H) {
        match self.conn.as_ref().map(|c| c.state) {
            Some(ConnState::SynSent) => self.poll_connecting(handler),
            Some(ConnState::Established) => self.poll_established(handler),
            Some(ConnState::Closed) | None => {}
        }
    }

    fn conn(&self, id: ConnId) -> Option<&KernelConn> {
        self.conn.as_ref().filter(|c| c.id == id)
    }

    fn conn_mut(&mut self, id: ConnId) -> Option<&mut KernelConn> {
        self.conn.as_mut().filter(|c| c.id == id)
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = EngineConfig::default().with_recv_buf_size(0);
        assert_eq!(
            KernelEngine::new(cfg).unwrap_err(),
            ConfigError::Zero("conn_recv_buf_size")
        );
    }

    #[test]
    fn unknown_interface_fails_init() {
        let mut e = KernelEngine::new(EngineConfig::default()).unwrap();
        let err = e.init("nosuchif0").unwrap_err();
        assert_eq!(err.to_string(), "no such interface: nosuchif0");
        assert!(e.interface().is_none());
    }

    #[test]
    fn loopback_interface_resolves() {
        let mut e = KernelEngine::new(EngineConfig::default()).unwrap();
        e.init("lo").unwrap();
        assert_eq!(e.interface(), Some("lo"));
    }

    #[test]
    fn connect_before_init_fails() {
        let mut e = KernelEngine::new(EngineConfig::default()).unwrap();
        assert!(e.connect(Ipv4Addr::LOCALHOST, 9).is_err());
    }
}
