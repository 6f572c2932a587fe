//! Adapter behaviour against the scripted simulator engine.
//!
//! Every test drives a [`TcpClient`] over a [`SimEngine`] whose pumps are
//! scripted in advance, so each scenario is fully deterministic.

use std::net::{Ipv4Addr, SocketAddrV4};

use polltcp::packet::{for_each_packet, Packet, PACKET_LEN};
use polltcp::simulator::{SimEngine, SimEvent};
use polltcp::{ClientError, ConnState, EngineConfig, TcpClient};
use rand::Rng;

const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const SERVER_PORT: u16 = 9000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn client() -> TcpClient<SimEngine> {
    TcpClient::new(SimEngine::new(EngineConfig::default()).expect("valid config"))
}

/// A client whose connect completed on the first pump.
fn connected() -> TcpClient<SimEngine> {
    let mut c = client();
    c.engine_mut().push_pump(vec![SimEvent::Established]);
    c.connect("eth0", SERVER_IP, SERVER_PORT).expect("connect");
    c
}

fn last_error(c: &TcpClient<SimEngine>) -> Option<String> {
    c.last_error().map(ToString::to_string)
}

// ---------------------------------------------------------------------------
// connect
// ---------------------------------------------------------------------------

#[test]
fn connect_succeeds_on_establishment() {
    let c = connected();
    assert!(c.is_connected());
    assert_eq!(c.last_error(), None);
    assert_eq!(c.engine().interface(), Some("eth0"));
    assert_eq!(c.peer_addr(), Some(SocketAddrV4::new(SERVER_IP, SERVER_PORT)));
}

#[test]
fn connect_spins_until_established() {
    let mut c = client();
    c.engine_mut().push_pump(vec![]);
    c.engine_mut().push_pump(vec![SimEvent::MoreSendable]);
    c.engine_mut().push_pump(vec![SimEvent::Established]);
    c.connect("eth0", SERVER_IP, SERVER_PORT).unwrap();
    assert_eq!(c.engine().polls(), 3);
    assert!(c.is_connected());
}

#[test]
fn unreachable_server_times_out_after_syn_retries() {
    let mut c = client();
    let err = c.connect("eth0", SERVER_IP, SERVER_PORT).unwrap_err();
    assert_eq!(err, ClientError::Timeout);
    assert_eq!(last_error(&c).as_deref(), Some("connection timeout"));
    assert!(!c.is_connected());
    // initial SYN window plus one pump per retransmission
    assert_eq!(c.engine().polls(), u64::from(EngineConfig::default().syn_retries) + 1);
}

#[test]
fn refused_connect_fails() {
    let mut c = client();
    c.engine_mut().push_pump(vec![SimEvent::Refused]);
    assert_eq!(c.connect("eth0", SERVER_IP, SERVER_PORT), Err(ClientError::Refused));
    assert_eq!(last_error(&c).as_deref(), Some("connection refused"));
    assert!(!c.is_connected());
    assert_eq!(c.peer_addr(), None);
}

#[test]
fn init_failure_is_recorded() {
    let mut c = client();
    c.engine_mut().fail_init("no such interface: eth9");
    let err = c.connect("eth9", SERVER_IP, SERVER_PORT).unwrap_err();
    assert_eq!(err.to_string(), "no such interface: eth9");
    assert_eq!(last_error(&c).as_deref(), Some("no such interface: eth9"));
    assert_eq!(c.engine().polls(), 0);
}

#[test]
fn connect_request_failure_is_recorded() {
    let mut c = client();
    c.engine_mut().fail_connect("arp resolution failed");
    let err = c.connect("eth0", SERVER_IP, SERVER_PORT).unwrap_err();
    assert_eq!(err.to_string(), "arp resolution failed");
    assert_eq!(c.engine().polls(), 0);
}

#[test]
fn error_before_establishment_wins() {
    let mut c = client();
    c.engine_mut()
        .push_pump(vec![SimEvent::Timeout, SimEvent::Established]);
    assert_eq!(c.connect("eth0", SERVER_IP, SERVER_PORT), Err(ClientError::Timeout));
    assert!(!c.is_connected());
}

#[test]
fn establishment_before_error_still_connects() {
    let mut c = client();
    c.engine_mut()
        .push_pump(vec![SimEvent::Established, SimEvent::Reset]);
    assert_eq!(c.connect("eth0", SERVER_IP, SERVER_PORT), Ok(()));
    assert_eq!(last_error(&c).as_deref(), Some("connection reset"));
    assert!(!c.is_connected());
}

#[test]
fn pre_establishment_data_is_not_surfaced() {
    let mut c = client();
    c.engine_mut().push_pump(vec![SimEvent::Data(b"early".to_vec())]);
    c.engine_mut().push_pump(vec![SimEvent::Established]);
    c.connect("eth0", SERVER_IP, SERVER_PORT).unwrap();

    // the early bytes stay with the engine; the user sees them only through a
    // later read, prefixed to new data
    assert_eq!(c.engine().pending_recv(), b"early");
    c.engine_mut().push_pump(vec![SimEvent::Data(b"!".to_vec())]);
    let mut seen = Vec::new();
    assert!(c.read(|d| {
        seen.extend_from_slice(d);
        0
    }));
    assert_eq!(seen, b"early!");
}

#[test]
fn reconnect_clears_previous_state() {
    let mut c = client();
    c.engine_mut().push_pump(vec![SimEvent::Refused]);
    assert!(c.connect("eth0", SERVER_IP, SERVER_PORT).is_err());

    c.engine_mut().push_pump(vec![SimEvent::Established]);
    c.connect("eth0", SERVER_IP, SERVER_PORT).unwrap();
    assert_eq!(c.last_error(), None);
    assert!(c.is_connected());
}

// ---------------------------------------------------------------------------
// state queries
// ---------------------------------------------------------------------------

#[test]
fn fresh_client_is_not_connected() {
    let c = client();
    assert!(!c.is_connected());
    assert_eq!(c.peer_addr(), None);
    assert_eq!(c.last_error(), None);
}

#[test]
fn reset_flips_connection_state_without_handler_call() {
    let mut c = connected();
    c.engine_mut().push_pump(vec![SimEvent::Reset]);
    let mut calls = 0;
    assert!(!c.read(|d| {
        calls += 1;
        d.len()
    }));
    assert_eq!(calls, 0);
    assert!(!c.is_connected());
    assert_eq!(last_error(&c).as_deref(), Some("connection reset"));
    assert_eq!(c.peer_addr(), None);
}

#[test]
fn every_teardown_event_disconnects() {
    let cases = [
        (SimEvent::Reset, "connection reset"),
        (SimEvent::Timeout, "connection timeout"),
        (SimEvent::Closed, "connection closed"),
        (SimEvent::Fin(b"tail".to_vec()), "connection closed"),
    ];
    for (event, reason) in cases {
        let mut c = connected();
        c.engine_mut().push_pump(vec![event.clone()]);
        c.read(|d| d.len());
        assert!(!c.is_connected(), "{event:?}");
        assert_eq!(last_error(&c).as_deref(), Some(reason), "{event:?}");
    }
}

#[test]
fn engine_side_close_is_seen_without_a_read() {
    let mut c = connected();
    polltcp::TransportEngine::close(c.engine_mut());
    assert!(!c.is_connected());
    assert_eq!(c.last_error(), None);
}

#[test]
fn timers_and_sendable_events_change_nothing() {
    let mut c = connected();
    c.engine_mut()
        .push_pump(vec![SimEvent::MoreSendable, SimEvent::UserTimeout(1)]);
    assert!(!c.read(|d| d.len()));
    assert!(c.is_connected());
    assert_eq!(c.last_error(), None);
}

#[test]
fn refusal_after_establishment_disconnects() {
    let mut c = connected();
    c.engine_mut().push_pump(vec![SimEvent::Refused]);
    assert!(!c.read(|d| d.len()));
    assert!(!c.is_connected());
    assert_eq!(last_error(&c).as_deref(), Some("connection refused"));
}

// ---------------------------------------------------------------------------
// close
// ---------------------------------------------------------------------------

#[test]
fn close_records_reason_and_disconnects() {
    let mut c = connected();
    c.close("user requested");
    assert_eq!(last_error(&c).as_deref(), Some("user requested"));
    assert!(!c.is_connected());
    assert_eq!(
        c.engine().current_conn().map(|conn| conn.state()),
        Some(ConnState::Closed)
    );
}

#[test]
fn close_without_connection_is_harmless() {
    let mut c = client();
    c.close("shutdown");
    c.close("shutdown again");
    assert_eq!(last_error(&c).as_deref(), Some("shutdown again"));
    assert!(!c.is_connected());
}

#[test]
fn later_event_overwrites_close_reason() {
    let mut c = connected();
    c.close("bye");
    c.engine_mut().push_pump(vec![SimEvent::Refused]);
    c.read(|d| d.len());
    assert_eq!(last_error(&c).as_deref(), Some("connection refused"));
}

// ---------------------------------------------------------------------------
// write_nonblock
// ---------------------------------------------------------------------------

#[test]
fn write_within_capacity_succeeds() {
    let mut c = connected();
    let payload = [7u8; 64];
    assert_eq!(c.write_nonblock(&payload, false), Ok(()));
    assert!(c.is_connected());
    assert_eq!(c.last_error(), None);
    assert_eq!(c.engine_mut().drain_sent(), payload);
}

#[test]
fn write_forwards_more_hint() {
    let mut c = connected();
    c.write_nonblock(b"head", true).unwrap();
    c.write_nonblock(b"tail", false).unwrap();
    let conn = c.engine().current_conn().unwrap();
    assert_eq!(conn.more_hints(), [true, false]);
    assert_eq!(conn.sent(), b"headtail");
}

#[test]
fn write_exactly_filling_capacity_succeeds() {
    let mut c = connected();
    c.engine_mut().set_send_capacity(16);
    assert_eq!(c.write_nonblock(&[1u8; 16], false), Ok(()));
    assert!(c.is_connected());
}

#[test]
fn partial_write_closes_connection() {
    let mut c = connected();
    c.engine_mut().set_send_capacity(10);
    assert_eq!(c.write_nonblock(&[0u8; 11], false), Err(ClientError::SendBufferFull));
    assert_eq!(last_error(&c).as_deref(), Some("send buffer full"));
    assert!(!c.is_connected());
    // the accepted prefix stays with the engine; nothing is queued for retry
    assert_eq!(c.engine().current_conn().unwrap().sent().len(), 10);
}

#[test]
fn empty_write_to_closed_connection_fails() {
    let mut c = connected();
    c.engine_mut().push_pump(vec![SimEvent::Reset]);
    c.read(|d| d.len());
    assert_eq!(c.write_nonblock(&[], false), Err(ClientError::SendBufferFull));
    assert_eq!(last_error(&c).as_deref(), Some("send buffer full"));
}

#[test]
fn empty_write_to_open_connection_succeeds() {
    let mut c = connected();
    assert_eq!(c.write_nonblock(&[], false), Ok(()));
    assert!(c.is_connected());
}

#[test]
fn write_without_connection_is_rejected() {
    let mut c = client();
    assert_eq!(c.write_nonblock(b"x", false), Err(ClientError::NotConnected));
    assert_eq!(c.last_error(), None);
}

// ---------------------------------------------------------------------------
// read
// ---------------------------------------------------------------------------

#[test]
fn read_without_events_reports_no_data() {
    let mut c = connected();
    assert!(!c.read(|d| d.len()));
}

#[test]
fn read_reports_data_even_when_nothing_consumed() {
    let mut c = connected();
    c.engine_mut().push_pump(vec![SimEvent::Data(vec![1, 2, 3])]);
    assert!(c.read(|d| d.len()));
    assert_eq!(c.engine().pending_recv(), [1u8, 2, 3]);
}

#[test]
fn handler_runs_once_per_data_event() {
    let mut c = connected();
    c.engine_mut().push_pump(vec![
        SimEvent::Data(b"ab".to_vec()),
        SimEvent::MoreSendable,
        SimEvent::Data(b"cd".to_vec()),
    ]);
    let mut chunks = Vec::new();
    assert!(c.read(|d| {
        chunks.push(d.to_vec());
        0
    }));
    assert_eq!(chunks, [b"ab".to_vec(), b"cd".to_vec()]);
}

#[test]
fn data_then_reset_in_one_pump() {
    let mut c = connected();
    c.engine_mut()
        .push_pump(vec![SimEvent::Data(b"last".to_vec()), SimEvent::Reset]);
    let mut seen = Vec::new();
    assert!(c.read(|d| {
        seen.extend_from_slice(d);
        0
    }));
    assert_eq!(seen, b"last");
    assert!(!c.is_connected());
    assert_eq!(last_error(&c).as_deref(), Some("connection reset"));
}

#[test]
fn record_straddling_two_deliveries_is_reassembled() {
    let mut c = connected();
    let a = Packet { ts: 11, val: 1 }.encode();
    let b = Packet { ts: 22, val: 2 }.encode();
    let mut first = a.to_vec();
    first.extend_from_slice(&b[..5]);
    c.engine_mut().push_pump(vec![SimEvent::Data(first)]);
    c.engine_mut().push_pump(vec![SimEvent::Data(b[5..].to_vec())]);

    let mut got = Vec::new();
    assert!(c.read(|d| for_each_packet(d, |p| got.push(p))));
    assert_eq!(got, [Packet { ts: 11, val: 1 }]);
    assert_eq!(c.engine().pending_recv().len(), 5);

    assert!(c.read(|d| for_each_packet(d, |p| got.push(p))));
    assert_eq!(got, [Packet { ts: 11, val: 1 }, Packet { ts: 22, val: 2 }]);
    assert!(c.engine().pending_recv().is_empty());
}

#[test]
fn random_chunking_loses_and_duplicates_nothing() {
    let mut rng = rand::rng();
    let sent: Vec<Packet> = (0..200).map(|i| Packet { ts: i * 3, val: i }).collect();
    let stream: Vec<u8> = sent.iter().flat_map(|p| p.encode()).collect();

    for _ in 0..20 {
        let mut c = connected();
        let mut offset = 0;
        while offset < stream.len() {
            let n = rng.random_range(1..=3 * PACKET_LEN).min(stream.len() - offset);
            c.engine_mut()
                .push_pump(vec![SimEvent::Data(stream[offset..offset + n].to_vec())]);
            offset += n;
        }

        let mut got = Vec::new();
        while c.engine().scripted_pumps_left() > 0 {
            c.read(|d| for_each_packet(d, |p| got.push(p)));
        }
        assert_eq!(got, sent);
        assert!(c.engine().pending_recv().is_empty());
    }
}
