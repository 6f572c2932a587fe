//! Error types shared by the adapter, the engines, and the demo codec.
//!
//! The adapter keeps a single last-error slot.  Every variant of
//! [`ClientError`] renders to the exact human-readable reason callers see, so
//! `err.to_string()` is the "last error string".

use thiserror::Error;

/// Failure reported by a transport engine's `init` or `connect`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError(err.to_string())
    }
}

/// Why the adapter is not (or no longer) connected.
///
/// No distinction is kept between failures and caller-requested closes; use
/// [`crate::client::TcpClient::is_connected`] to judge severity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Engine `init` or `connect` failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("connection refused")]
    Refused,
    #[error("connection reset")]
    Reset,
    #[error("connection timeout")]
    Timeout,
    /// Engine-initiated close or peer half-close.
    #[error("connection closed")]
    Closed,
    #[error("send buffer full")]
    SendBufferFull,
    /// Reason passed to [`crate::client::TcpClient::close`].
    #[error("{0}")]
    Local(String),
    /// Returned by writes without a connection; never recorded.
    #[error("not connected")]
    NotConnected,
}

/// Rejected [`crate::config::EngineConfig`] values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),
    #[error("min_rto_ms ({min}) exceeds max_rto_ms ({max})")]
    RtoRange { min: u32, max: u32 },
    #[error("unknown congestion control algorithm {0}")]
    UnknownCongestionControl(u8),
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError(format!("invalid engine config: {err}"))
    }
}
