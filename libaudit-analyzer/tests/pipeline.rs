//! End-to-end pipeline tests: synthetic frames in, audit records out.

mod common;

use common::*;
use crossbeam_channel::Receiver;
use libaudit_analyzer::Analyzer;
use libaudit_tools::{PcapAnalyzer, Timestamp};
use pnet_packet::tcp::TcpFlags;
use std::net::Ipv4Addr;

const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

fn drain(rx: &Receiver<String>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(js) = rx.try_recv() {
        out.push(serde_json::from_str(&js).expect("record json"));
    }
    out
}

/// SYN, SYN-ACK, ACK, two data segments, FIN exchange: one connection
/// record with the client direction, and an HTTP-decoded conversation.
#[test]
fn handshake_data_fin_produces_connection_and_http_conversation() {
    let mut analyzer = Analyzer::new(test_config()).expect("analyzer");
    let conn_rx = analyzer.channel("Connection").unwrap().clone();
    let conv_rx = analyzer.channel("Conversation").unwrap().clone();

    let request = b"GET / HTTP/1.0\r\n\r\n";
    let response = b"HTTP/1.0 200 OK\r\n\r\nhi";
    let frames = vec![
        tcp_frame(A, B, 1234, 80, 100, 0, TcpFlags::SYN, b""),
        tcp_frame(B, A, 80, 1234, 500, 101, TcpFlags::SYN | TcpFlags::ACK, b""),
        tcp_frame(A, B, 1234, 80, 101, 501, TcpFlags::ACK, b""),
        tcp_frame(
            A,
            B,
            1234,
            80,
            101,
            501,
            TcpFlags::PSH | TcpFlags::ACK,
            request,
        ),
        tcp_frame(
            B,
            A,
            80,
            1234,
            501,
            101 + request.len() as u32,
            TcpFlags::PSH | TcpFlags::ACK,
            response,
        ),
        tcp_frame(
            A,
            B,
            1234,
            80,
            101 + request.len() as u32,
            501 + response.len() as u32,
            TcpFlags::FIN | TcpFlags::ACK,
            b"",
        ),
        tcp_frame(
            B,
            A,
            80,
            1234,
            501 + response.len() as u32,
            102 + request.len() as u32,
            TcpFlags::FIN | TcpFlags::ACK,
            b"",
        ),
    ];
    for (n, frame) in frames.iter().enumerate() {
        analyzer.handle_l2(Timestamp::new(1000 + n as u32, 0), n + 1, frame);
    }
    analyzer.teardown();

    let conns = drain(&conn_rx);
    assert_eq!(conns.len(), 1);
    let conn = &conns[0];
    assert_eq!(conn["SrcIP"], "10.0.0.1");
    assert_eq!(conn["DstIP"], "10.0.0.2");
    assert_eq!(conn["SrcPort"], "1234");
    assert_eq!(conn["DstPort"], "80");
    assert_eq!(conn["NumPackets"], 7);
    assert_eq!(conn["Duration"], 6_000_000_000i64);
    assert_eq!(conn["TransportProto"], "TCP");

    let convs = drain(&conv_rx);
    assert_eq!(convs.len(), 1);
    assert_eq!(convs[0]["Decoder"], "HTTP");
    assert_eq!(convs[0]["Complete"], true);
    assert_eq!(
        convs[0]["TotalSize"],
        (request.len() + response.len()) as i64
    );
}

/// Packets from both directions of a 5-tuple land on the same connection,
/// and the UID is stable across runs.
#[test]
fn connection_identity_is_symmetric_and_stable() {
    let run = || {
        let mut analyzer = Analyzer::new(test_config()).expect("analyzer");
        let conn_rx = analyzer.channel("Connection").unwrap().clone();
        let frames = vec![
            tcp_frame(A, B, 1234, 80, 100, 0, TcpFlags::SYN, b""),
            tcp_frame(B, A, 80, 1234, 500, 101, TcpFlags::SYN | TcpFlags::ACK, b""),
            tcp_frame(A, B, 1234, 80, 101, 501, TcpFlags::ACK, b""),
        ];
        for (n, frame) in frames.iter().enumerate() {
            analyzer.handle_l2(Timestamp::new(100 + n as u32, 0), n + 1, frame);
        }
        analyzer.teardown();
        let conns = drain(&conn_rx);
        assert_eq!(conns.len(), 1);
        conns[0]["UID"].as_str().unwrap().to_string()
    };
    let uid1 = run();
    let uid2 = run();
    assert_eq!(uid1, uid2);
    assert_eq!(uid1.len(), 32);
}

/// Whatever the ingestion order, the recorded direction belongs to the
/// earliest-timestamped packet.
#[test]
fn earliest_packet_defines_direction() {
    let packets = vec![
        (Timestamp::new(10, 0), tcp_frame(A, B, 1234, 80, 100, 0, TcpFlags::ACK, b"x")),
        (Timestamp::new(11, 0), tcp_frame(B, A, 80, 1234, 500, 0, TcpFlags::ACK, b"y")),
        (Timestamp::new(12, 0), tcp_frame(A, B, 1234, 80, 101, 0, TcpFlags::ACK, b"z")),
    ];
    let orders: [[usize; 3]; 3] = [[0, 1, 2], [1, 0, 2], [2, 1, 0]];
    for order in orders.iter() {
        let mut analyzer = Analyzer::new(test_config()).expect("analyzer");
        let conn_rx = analyzer.channel("Connection").unwrap().clone();
        for (n, &i) in order.iter().enumerate() {
            analyzer.handle_l2(packets[i].0, n + 1, &packets[i].1);
        }
        analyzer.teardown();
        let conns = drain(&conn_rx);
        assert_eq!(conns.len(), 1, "order {:?}", order);
        assert_eq!(conns[0]["SrcIP"], "10.0.0.1", "order {:?}", order);
        assert_eq!(conns[0]["SrcPort"], "1234", "order {:?}", order);
    }
}

/// Packet and byte counters are exact.
#[test]
fn profile_counters_are_monotonic_and_exact() {
    let mut analyzer = Analyzer::new(test_config()).expect("analyzer");
    let conn_rx = analyzer.channel("Connection").unwrap().clone();
    let frames = vec![
        tcp_frame(A, B, 1234, 80, 100, 0, TcpFlags::ACK, b"aa"),
        tcp_frame(B, A, 80, 1234, 500, 0, TcpFlags::ACK, b"bbb"),
        tcp_frame(A, B, 1234, 80, 102, 0, TcpFlags::ACK, b"cccc"),
    ];
    let total: usize = frames.iter().map(|f| f.len()).sum();
    for (n, frame) in frames.iter().enumerate() {
        analyzer.handle_l2(Timestamp::new(n as u32, 0), n + 1, frame);
    }

    let profile = analyzer.profiles().get("10.0.0.1").expect("profile");
    assert_eq!(profile.num_packets, 3);
    assert_eq!(profile.bytes, total as u64);

    analyzer.teardown();
    let conns = drain(&conn_rx);
    assert_eq!(conns[0]["NumPackets"], 3);
    assert_eq!(conns[0]["TotalSize"], total as i64);
}

/// Port aggregation: repeated `(port, proto)` pairs accumulate in place.
#[test]
fn profile_port_entries_are_unique_and_accumulated() {
    let peer = Ipv4Addr::new(1, 1, 1, 1);
    let mut analyzer = Analyzer::new(test_config()).expect("analyzer");
    // frame sizes 100, 200, 300, then 400 bytes on the same 5-tuple
    for (n, size) in [100usize, 200, 300, 400].iter().enumerate() {
        let payload = vec![b'x'; size - 54];
        let frame = tcp_frame(A, peer, 55000, 443, 100 + n as u32, 0, TcpFlags::ACK, &payload);
        assert_eq!(frame.len(), *size);
        analyzer.handle_l2(Timestamp::new(n as u32, 0), n + 1, &frame);
    }

    let profile = analyzer.profiles().get("10.0.0.1").expect("profile");
    assert_eq!(profile.src_ports.len(), 1);
    let sp = &profile.src_ports[0];
    assert_eq!((sp.port, sp.proto.as_str()), (55000, "TCP"));
    assert_eq!(sp.bytes, 1000);
    assert_eq!(sp.packets, 4);

    assert_eq!(profile.contacted_ports.len(), 1);
    let cp = &profile.contacted_ports[0];
    assert_eq!((cp.port, cp.proto.as_str()), (443, "TCP"));
    assert_eq!(cp.bytes, 1000);
    assert_eq!(cp.packets, 4);

    let peer_profile = analyzer.profiles().get("1.1.1.1").expect("peer profile");
    assert_eq!(peer_profile.dst_ports.len(), 1);
    assert_eq!(peer_profile.dst_ports[0].port, 443);
    analyzer.teardown();
}

/// Idle UDP conversations are flushed with all their datagrams accounted.
#[test]
fn udp_conversation_times_out() {
    let mut config = test_config();
    config.udp_timeout = 5;
    let mut analyzer = Analyzer::new(config).expect("analyzer");
    let udp_rx = analyzer.channel("UDPConversation").unwrap().clone();

    let query = b"\x00\x01\x01\x00\x00\x01\x00\x00\x00\x00\x00\x00";
    analyzer.handle_l2(Timestamp::new(0, 0), 1, &udp_frame(A, B, 5353, 53, query));
    analyzer.handle_l2(Timestamp::new(1, 0), 2, &udp_frame(B, A, 53, 5353, query));
    // unrelated datagram at ts=6 drives the sweep past the deadline
    let other = Ipv4Addr::new(10, 0, 0, 9);
    analyzer.handle_l2(Timestamp::new(6, 0), 3, &udp_frame(A, other, 4000, 4000, b"tick"));

    let records = drain(&udp_rx);
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec["SrcIP"], "10.0.0.1");
    assert_eq!(rec["DstIP"], "10.0.0.2");
    assert_eq!(rec["NumDatagrams"], 2);
    assert_eq!(rec["ClientBytes"], query.len());
    assert_eq!(rec["ServerBytes"], query.len());
    analyzer.teardown();
}

/// Record JSON carries millisecond timestamps.
#[test]
fn json_timestamps_are_milliseconds() {
    let mut analyzer = Analyzer::new(test_config()).expect("analyzer");
    let conn_rx = analyzer.channel("Connection").unwrap().clone();
    let frame = tcp_frame(A, B, 1234, 80, 100, 0, TcpFlags::SYN, b"");
    analyzer.handle_l2(Timestamp::new(1234, 567_890), 1, &frame);
    analyzer.teardown();
    let conns = drain(&conn_rx);
    // 1234.567890 s -> 1234567 ms
    assert_eq!(conns[0]["Timestamp"], 1_234_567i64);
}
