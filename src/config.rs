//! Static tuning parameters for a transport engine.
//!
//! An [`EngineConfig`] is handed to an engine when it is constructed and is
//! never changed afterwards.  The defaults describe a latency-oriented,
//! single-connection client:
//!
//! | Parameter            | Default | Meaning                                  |
//! |----------------------|---------|------------------------------------------|
//! | `conn_send_buf_cnt`  | 1024    | send buffers per connection              |
//! | `send_buf_1k`        | true    | 1 KiB send buffers (else MSS-sized)      |
//! | `conn_recv_buf_size` | 4096    | per-connection receive buffer, bytes     |
//! | `recv_buf_cnt`       | 512     | NIC receive descriptors                  |
//! | `syn_retries`        | 3       | SYN retransmissions before timing out    |
//! | `tcp_retries`        | 10      | data retransmissions before timing out   |
//! | `delayed_ack_ms`     | 10      | delayed-ACK timer                        |
//! | `min_rto_ms`         | 100     | lower RTO bound                          |
//! | `max_rto_ms`         | 30 000  | upper RTO bound                          |
//!
//! RTO back-off doubles from `min_rto_ms` and is capped at `max_rto_ms`; the
//! same rule bounds how long a SYN may go unanswered (see
//! [`EngineConfig::syn_timeout`]).

use std::time::Duration;

use crate::error::ConfigError;

/// Concurrent connections an engine may hold.  This is a single-connection client.
pub const MAX_CONN_CNT: u32 = 1;
/// Connections that may linger in TIME_WAIT.
pub const MAX_TIME_WAIT_CONN_CNT: u32 = 1;

const SEND_BUF_1K: usize = 1024;
const SEND_BUF_MSS: usize = 1460;

/// Congestion-window algorithm selected in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CongestionControl {
    /// No congestion window; only the peer's receive window limits sending.
    #[default]
    None,
    NewReno,
    Cubic,
}

impl CongestionControl {
    pub fn from_u8(value: u8) -> Result<Self, ConfigError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::NewReno),
            2 => Ok(Self::Cubic),
            other => Err(ConfigError::UnknownCongestionControl(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::NewReno => 1,
            Self::Cubic => 2,
        }
    }
}

/// Engine tuning block, fixed for the lifetime of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub conn_send_buf_cnt: u32,
    pub send_buf_1k: bool,
    pub conn_recv_buf_size: u32,
    pub recv_buf_cnt: u32,
    pub syn_retries: u32,
    pub tcp_retries: u32,
    pub delayed_ack_ms: u32,
    pub min_rto_ms: u32,
    pub max_rto_ms: u32,
    pub window_scale: bool,
    pub timestamp: bool,
    pub congestion_control: CongestionControl,
    /// Application timers per connection; this adapter uses none.
    pub user_timer_cnt: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conn_send_buf_cnt: 1024,
            send_buf_1k: true,
            conn_recv_buf_size: 4096,
            recv_buf_cnt: 512,
            syn_retries: 3,
            tcp_retries: 10,
            delayed_ack_ms: 10,
            min_rto_ms: 100,
            max_rto_ms: 30 * 1000,
            window_scale: false,
            timestamp: false,
            congestion_control: CongestionControl::None,
            user_timer_cnt: 0,
        }
    }
}

impl EngineConfig {
    pub fn with_recv_buf_size(mut self, size: u32) -> Self {
        self.conn_recv_buf_size = size;
        self
    }

    pub fn with_syn_retries(mut self, retries: u32) -> Self {
        self.syn_retries = retries;
        self
    }

    pub fn with_congestion_control(mut self, algo: CongestionControl) -> Self {
        self.congestion_control = algo;
        self
    }

    /// Reject values no engine can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("conn_send_buf_cnt", self.conn_send_buf_cnt),
            ("conn_recv_buf_size", self.conn_recv_buf_size),
            ("recv_buf_cnt", self.recv_buf_cnt),
            ("min_rto_ms", self.min_rto_ms),
        ];
        if let Some((name, _)) = non_zero.into_iter().find(|&(_, v)| v == 0) {
            return Err(ConfigError::Zero(name));
        }
        if self.min_rto_ms > self.max_rto_ms {
            return Err(ConfigError::RtoRange {
                min: self.min_rto_ms,
                max: self.max_rto_ms,
            });
        }
        Ok(())
    }

    /// Total bytes of send buffering per connection.
    pub fn send_buf_size(&self) -> usize {
        let unit = if self.send_buf_1k { SEND_BUF_1K } else { SEND_BUF_MSS };
        self.conn_send_buf_cnt as usize * unit
    }

    pub fn min_rto(&self) -> Duration {
        Duration::from_millis(u64::from(self.min_rto_ms))
    }

    pub fn max_rto(&self) -> Duration {
        Duration::from_millis(u64::from(self.max_rto_ms))
    }

    /// How long a connect may wait for a SYN-ACK before the engine gives up.
    ///
    /// Sum of the RTOs covering the initial SYN and each of `syn_retries`
    /// retransmissions, doubling from `min_rto` and capped at `max_rto`.
    pub fn syn_timeout(&self) -> Duration {
        let max = self.max_rto();
        let mut rto = self.min_rto().min(max);
        let mut total = Duration::ZERO;
        for _ in 0..=self.syn_retries {
            total += rto;
            rto = (rto * 2).min(max);
        }
        total
    }
}
