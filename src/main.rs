//! Entry point for `polltcp-client`.
//!
//! Connects to a server, sends a timestamped record once per second, and
//! prints every record received with its round-trip latency.  Protocol work
//! lives in the library; this file owns process setup (logging, signals,
//! argument parsing).

use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use polltcp::kernel::KernelEngine;
use polltcp::packet::{for_each_packet, Packet};
use polltcp::{EngineConfig, TcpClient};

const SEND_INTERVAL: Duration = Duration::from_secs(1);

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

/// Single-connection TCP client demo.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Network interface to use (e.g. eth0).
    interface: String,
    /// Server IPv4 address.
    server_ip: Ipv4Addr,
    /// Server TCP port.
    server_port: u16,
    /// Per-connection receive buffer size in bytes.
    #[arg(long, default_value_t = 4096)]
    recv_buf_size: u32,
}

fn install_signal_handlers() {
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGPIPE, handler);
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, nanos)
}

fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

fn main() -> anyhow::Result<ExitCode> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return Ok(ExitCode::from(1));
        }
        Err(e) => {
            // --help / --version
            e.print()?;
            return Ok(ExitCode::SUCCESS);
        }
    };
    install_signal_handlers();

    let config = EngineConfig::default().with_recv_buf_size(cli.recv_buf_size);
    let engine = KernelEngine::new(config)?;
    let mut client = TcpClient::new(engine);

    if let Err(e) = client.connect(&cli.interface, cli.server_ip, cli.server_port) {
        println!("{e}");
        return Ok(ExitCode::from(1));
    }
    log::info!("connected to {:?}", client.peer_addr());

    let mut pack = Packet::default();
    while RUNNING.load(Ordering::Relaxed) {
        let now = now_ns();
        if now.saturating_sub(pack.ts) >= nanos(SEND_INTERVAL) {
            pack.val += 1;
            pack.ts = now;
            // a failed write is reported through is_connected below
            let _ = client.write_nonblock(&pack.encode(), false);
        }

        client.read(|data| {
            let now = now_ns();
            for_each_packet(data, |recv| {
                println!("recv val: {} latency: {}", recv.val, now.saturating_sub(recv.ts));
            })
        });

        if !client.is_connected() {
            let reason = client.last_error().map(ToString::to_string).unwrap_or_default();
            println!("connection closed: {reason}");
            break;
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanos_saturates_instead_of_wrapping() {
        assert_eq!(nanos(Duration::from_secs(1)), 1_000_000_000);
        assert_eq!(nanos(Duration::MAX), i64::MAX);
    }
}
