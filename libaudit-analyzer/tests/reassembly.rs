//! TCP reassembly behavior: ordering, gaps, overlaps, direction
//! correction and decode-once semantics.

mod common;

use common::*;
use libaudit_analyzer::{Analyzer, HeuristicClassifier, Resolvers, TcpDirection};
use libaudit_tools::{PcapAnalyzer, Timestamp};
use pnet_packet::tcp::TcpFlags;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::net::Ipv4Addr;
use std::sync::Arc;

const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

fn capture_analyzer(config: libaudit_analyzer::PipelineConfig) -> (Analyzer, Arc<Captured>) {
    let store = Arc::new(Captured::default());
    let analyzer = Analyzer::with_parts(
        config,
        Arc::new(Resolvers::new()),
        Arc::new(HeuristicClassifier),
        Some(capture_registry(store.clone())),
    )
    .expect("analyzer");
    (analyzer, store)
}

fn handshake(analyzer: &mut Analyzer, ts_base: u32) {
    let frames = vec![
        tcp_frame(A, B, 1234, 80, 100, 0, TcpFlags::SYN, b""),
        tcp_frame(B, A, 80, 1234, 500, 101, TcpFlags::SYN | TcpFlags::ACK, b""),
        tcp_frame(A, B, 1234, 80, 101, 501, TcpFlags::ACK, b""),
    ];
    for (n, frame) in frames.iter().enumerate() {
        analyzer.handle_l2(Timestamp::new(ts_base + n as u32, 0), n + 1, frame);
    }
}

fn fin_exchange(analyzer: &mut Analyzer, ts: u32, client_seq: u32, server_seq: u32) {
    analyzer.handle_l2(
        Timestamp::new(ts, 0),
        90,
        &tcp_frame(A, B, 1234, 80, client_seq, server_seq, TcpFlags::FIN | TcpFlags::ACK, b""),
    );
    analyzer.handle_l2(
        Timestamp::new(ts + 1, 0),
        91,
        &tcp_frame(B, A, 80, 1234, server_seq, client_seq + 1, TcpFlags::FIN | TcpFlags::ACK, b""),
    );
}

/// Out-of-order segments are delivered in sequence order.
#[test]
fn out_of_order_segments_reassemble() {
    let (mut analyzer, store) = capture_analyzer(test_config());
    handshake(&mut analyzer, 1);
    // "EFGH" first, then "ABCD"
    analyzer.handle_l2(
        Timestamp::new(10, 0),
        4,
        &tcp_frame(A, B, 1234, 80, 105, 501, TcpFlags::PSH | TcpFlags::ACK, b"EFGH"),
    );
    analyzer.handle_l2(
        Timestamp::new(11, 0),
        5,
        &tcp_frame(A, B, 1234, 80, 101, 501, TcpFlags::PSH | TcpFlags::ACK, b"ABCD"),
    );
    fin_exchange(&mut analyzer, 20, 109, 501);
    analyzer.teardown();

    let convs = store.conversations.lock().unwrap();
    assert_eq!(convs.len(), 1);
    assert_eq!(convs[0].client_data(), b"ABCDEFGH");
    assert!(analyzer.stats().snapshot().out_of_order_packets >= 1);
}

/// Any permutation of the data segments yields the original byte stream.
#[test]
fn arbitrary_permutations_reassemble() {
    let payload = b"0123456789abcdefghij";
    for seed in 0..5u64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut segments: Vec<(u32, &[u8])> = payload
            .chunks(4)
            .enumerate()
            .map(|(n, chunk)| (101 + (n * 4) as u32, chunk))
            .collect();
        segments.shuffle(&mut rng);

        let (mut analyzer, store) = capture_analyzer(test_config());
        handshake(&mut analyzer, 1);
        for (n, (seq, chunk)) in segments.iter().enumerate() {
            analyzer.handle_l2(
                Timestamp::new(10 + n as u32, 0),
                4 + n,
                &tcp_frame(A, B, 1234, 80, *seq, 501, TcpFlags::PSH | TcpFlags::ACK, chunk),
            );
        }
        fin_exchange(&mut analyzer, 30, 101 + payload.len() as u32, 501);
        analyzer.teardown();

        let convs = store.conversations.lock().unwrap();
        assert_eq!(convs.len(), 1, "seed {}", seed);
        assert_eq!(convs[0].client_data(), payload, "seed {}", seed);
    }
}

/// A sequence gap aborts the delivery of the later chunk and counts the
/// missing bytes; the stream reader keeps only the clean prefix.
#[test]
fn missing_bytes_drop_partial_delivery() {
    let (mut analyzer, store) = capture_analyzer(test_config());
    handshake(&mut analyzer, 1);
    analyzer.handle_l2(
        Timestamp::new(10, 0),
        4,
        &tcp_frame(A, B, 1234, 80, 101, 501, TcpFlags::PSH | TcpFlags::ACK, b"AAAA"),
    );
    // 100 bytes lost between seq 105 and 205
    analyzer.handle_l2(
        Timestamp::new(11, 0),
        5,
        &tcp_frame(A, B, 1234, 80, 205, 501, TcpFlags::PSH | TcpFlags::ACK, b"BBBB"),
    );
    analyzer.teardown();

    let stats = analyzer.stats().snapshot();
    assert_eq!(stats.missed_bytes, 100);
    let convs = store.conversations.lock().unwrap();
    assert_eq!(convs.len(), 1);
    assert_eq!(convs[0].client_data(), b"AAAA");
}

/// Overlapping retransmission: the overlap is trimmed and accounted.
#[test]
fn overlap_is_trimmed_and_counted() {
    let (mut analyzer, store) = capture_analyzer(test_config());
    handshake(&mut analyzer, 1);
    analyzer.handle_l2(
        Timestamp::new(10, 0),
        4,
        &tcp_frame(A, B, 1234, 80, 101, 501, TcpFlags::PSH | TcpFlags::ACK, b"ABCD"),
    );
    // overlaps the previous segment by two bytes
    analyzer.handle_l2(
        Timestamp::new(11, 0),
        5,
        &tcp_frame(A, B, 1234, 80, 103, 501, TcpFlags::PSH | TcpFlags::ACK, b"CDEF"),
    );
    fin_exchange(&mut analyzer, 20, 107, 501);
    analyzer.teardown();

    let stats = analyzer.stats().snapshot();
    assert_eq!(stats.overlap_bytes, 2);
    assert_eq!(stats.overlap_packets, 1);
    let convs = store.conversations.lock().unwrap();
    assert_eq!(convs[0].client_data(), b"ABCDEF");
}

/// The endpoint with the earliest capture timestamp becomes the client,
/// even when its packet is ingested second; stored fragments are re-tagged.
#[test]
fn late_first_packet_flips_direction() {
    let mut config = test_config();
    config.allow_missing_init = true;
    config.ignore_fsm_errors = true;
    let (mut analyzer, store) = capture_analyzer(config);

    // the observation starts with the server's reply
    analyzer.handle_l2(
        Timestamp::new(5, 0),
        1,
        &tcp_frame(B, A, 80, 1234, 500, 0, TcpFlags::PSH | TcpFlags::ACK, b"RESP"),
    );
    // the true client packet carries an earlier timestamp
    analyzer.handle_l2(
        Timestamp::new(2, 0),
        2,
        &tcp_frame(A, B, 1234, 80, 100, 0, TcpFlags::PSH | TcpFlags::ACK, b"REQ"),
    );
    analyzer.teardown();

    let convs = store.conversations.lock().unwrap();
    assert_eq!(convs.len(), 1);
    let conv = &convs[0];
    assert_eq!(conv.client_ip, "10.0.0.1");
    assert_eq!(conv.server_ip, "10.0.0.2");
    assert_eq!(conv.client_data(), b"REQ");
    assert_eq!(conv.server_data(), b"RESP");
    for f in &conv.data {
        match f.data.as_slice() {
            b"REQ" => assert_eq!(f.dir, TcpDirection::ClientToServer),
            b"RESP" => assert_eq!(f.dir, TcpDirection::ServerToClient),
            other => panic!("unexpected fragment {:?}", other),
        }
    }
}

/// Fragments already handed to a stream reader are re-tagged by the flip.
#[test]
fn flip_retags_delivered_fragments() {
    let mut config = test_config();
    config.allow_missing_init = true;
    config.ignore_fsm_errors = true;
    let (mut analyzer, store) = capture_analyzer(config);

    // B opens with SYN and sends data, so its bytes are delivered eagerly
    analyzer.handle_l2(
        Timestamp::new(5, 0),
        1,
        &tcp_frame(B, A, 80, 1234, 500, 0, TcpFlags::SYN, b""),
    );
    analyzer.handle_l2(
        Timestamp::new(6, 0),
        2,
        &tcp_frame(B, A, 80, 1234, 501, 0, TcpFlags::PSH | TcpFlags::ACK, b"RESP"),
    );
    // the true client appears later in the capture with an older timestamp
    analyzer.handle_l2(
        Timestamp::new(2, 0),
        3,
        &tcp_frame(A, B, 1234, 80, 100, 0, TcpFlags::PSH | TcpFlags::ACK, b"REQ"),
    );
    analyzer.teardown();

    let convs = store.conversations.lock().unwrap();
    assert_eq!(convs.len(), 1);
    let conv = &convs[0];
    assert_eq!(conv.client_ip, "10.0.0.1");
    assert_eq!(conv.server_data(), b"RESP");
    assert_eq!(conv.client_data(), b"REQ");
}

/// decode() runs exactly once per connection, no matter how often the
/// completion path fires.
#[test]
fn decode_runs_exactly_once() {
    let mut config = test_config();
    config.remove_closed_streams = false;
    let (mut analyzer, store) = capture_analyzer(config);
    handshake(&mut analyzer, 1);
    analyzer.handle_l2(
        Timestamp::new(10, 0),
        4,
        &tcp_frame(A, B, 1234, 80, 101, 501, TcpFlags::PSH | TcpFlags::ACK, b"hello"),
    );
    fin_exchange(&mut analyzer, 20, 106, 501);
    // a trailing ACK after completion must not re-run the decoder
    analyzer.handle_l2(
        Timestamp::new(22, 0),
        7,
        &tcp_frame(A, B, 1234, 80, 107, 502, TcpFlags::ACK, b""),
    );
    analyzer.teardown();

    assert_eq!(store.decode_count(), 1);
}

/// With an unobserved stream start, data is still delivered when
/// configured, marked by the missing-initial-bytes contract.
#[test]
fn missing_init_stream_is_accepted_when_allowed() {
    let mut config = test_config();
    config.allow_missing_init = true;
    let (mut analyzer, store) = capture_analyzer(config);

    analyzer.handle_l2(
        Timestamp::new(10, 0),
        1,
        &tcp_frame(A, B, 1234, 80, 105, 0, TcpFlags::PSH | TcpFlags::ACK, b"EFGH"),
    );
    analyzer.handle_l2(
        Timestamp::new(11, 0),
        2,
        &tcp_frame(A, B, 1234, 80, 101, 0, TcpFlags::PSH | TcpFlags::ACK, b"ABCD"),
    );
    analyzer.teardown();

    let convs = store.conversations.lock().unwrap();
    assert_eq!(convs.len(), 1);
    assert_eq!(convs[0].client_data(), b"ABCDEFGH");
}

/// Without the override, mid-stream segments are rejected by the state
/// machine and dropped.
#[test]
fn fsm_rejects_midstream_data_by_default() {
    let (mut analyzer, store) = capture_analyzer(test_config());
    analyzer.handle_l2(
        Timestamp::new(10, 0),
        1,
        &tcp_frame(A, B, 1234, 80, 105, 0, TcpFlags::PSH | TcpFlags::ACK, b"data"),
    );
    analyzer.teardown();

    let stats = analyzer.stats().snapshot();
    assert_eq!(stats.reject_fsm, 1);
    assert_eq!(stats.reject_conn_fsm, 1);
    let convs = store.conversations.lock().unwrap();
    assert!(convs.is_empty() || convs[0].client_data().is_empty());
}
