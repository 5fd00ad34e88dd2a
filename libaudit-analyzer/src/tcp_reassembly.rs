//! TCP stream reassembly.
//!
//! Per-connection state machine, option and checksum validation, ordered
//! segment assembly with overlap and out-of-order accounting, direction
//! correction when the true first packet is discovered late, and
//! conversation hand-off to the application decoders.

use crate::config::PipelineConfig;
use crate::conversation::{
    reverse_ident, sort_fragments, ConversationInfo, DataFragment, StreamData, StreamReader,
};
use crate::counters::CounterHandle;
use crate::ip_defrag::{DefragEngine, Fragment, FragmentKey, Ipv4DefragEngine};
use crate::packet_info::PacketInfo;
use crate::records::{AuditRecord, ConversationRecord, ServiceBannerRecord};
use crate::stats::StatsHandle;
use crate::stream_decoders::StreamDecoderRegistry;
use crate::tcp_fsm::{TcpDirection, TcpFsm, TcpOptionCheck};
use crate::writer::RecordWriter;
use libaudit_tools::LayerFlow;
use pnet_packet::ipv4::{Ipv4Flags, Ipv4Packet};
use pnet_packet::tcp::{self, TcpFlags, TcpPacket};
use pnet_packet::Packet as PnetPacket;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::num::Wrapping;
use std::sync::Arc;
use std::time::Instant;

/// Bound on the persisted service banner.
const BANNER_SIZE: usize = 512;

/// Stream table key: the symmetric network and transport flow hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub network: u64,
    pub transport: u64,
}

/// `true` when `a` is before `b` in wrapping sequence space.
#[inline]
fn seq_before(a: Wrapping<u32>, b: Wrapping<u32>) -> bool {
    a != b && (b - a).0 < 0x8000_0000
}

struct PendingSegment {
    rel_seq: Wrapping<u32>,
    data: Vec<u8>,
    ts_nanos: i64,
}

/// One ordered, contiguous byte range on its way to a stream reader.
struct Delivery {
    /// bytes missing before this chunk; -1 when the stream start was never
    /// observed
    skip: i64,
    data: Vec<u8>,
    ts_nanos: i64,
    /// number of segments merged into this chunk
    segments: usize,
}

#[derive(Default)]
struct SegmentOutcome {
    deliveries: Vec<Delivery>,
    out_of_order_packets: i64,
    out_of_order_bytes: i64,
    overlap_packets: i64,
    overlap_bytes: i64,
}

/// Assembly state for one direction of one connection.
struct HalfStream {
    /// SYN observed, so the stream start is known
    start_known: bool,
    /// sequence number of the first expected payload byte
    isn: Option<Wrapping<u32>>,
    /// next expected relative sequence
    next_rel: Wrapping<u32>,
    delivered_any: bool,
    /// out-of-order segments, sorted by rel_seq
    queued: VecDeque<PendingSegment>,
}

impl HalfStream {
    fn new() -> HalfStream {
        HalfStream {
            start_known: false,
            isn: None,
            next_rel: Wrapping(0),
            delivered_any: false,
            queued: VecDeque::new(),
        }
    }

    /// Feed one segment; returns deliveries that became contiguous plus the
    /// accounting deltas.
    fn handle_segment(
        &mut self,
        seq: u32,
        syn: bool,
        payload: &[u8],
        ts_nanos: i64,
    ) -> SegmentOutcome {
        let mut outcome = SegmentOutcome::default();

        let data_seq = if syn {
            Wrapping(seq) + Wrapping(1)
        } else {
            Wrapping(seq)
        };

        match self.isn {
            None => {
                self.isn = Some(data_seq);
                self.start_known = syn;
            }
            Some(isn) => {
                if syn {
                    // late SYN for a stream caught mid-flight: rebase so
                    // counting starts at the true beginning
                    if !self.start_known && !self.delivered_any && seq_before(data_seq, isn) {
                        self.rebase(data_seq);
                    }
                    self.start_known = true;
                } else if !self.start_known
                    && !self.delivered_any
                    && seq_before(data_seq, isn)
                    && !payload.is_empty()
                {
                    self.rebase(data_seq);
                }
            }
        }

        if payload.is_empty() {
            outcome.deliveries = self.drain();
            return outcome;
        }

        let isn = self.isn.expect("isn set above");
        let mut rel = data_seq - isn;
        let mut data = payload.to_vec();

        // overlap with already delivered bytes
        if seq_before(rel, self.next_rel) {
            let overlap = ((self.next_rel - rel).0 as usize).min(data.len());
            outcome.overlap_bytes += overlap as i64;
            outcome.overlap_packets += 1;
            if overlap == data.len() {
                // full retransmission
                return outcome;
            }
            data.drain(..overlap);
            rel = self.next_rel;
        }

        // overlap with queued segments: existing data wins
        let mut insert_pos = self.queued.len();
        let mut overlapped_queue = false;
        for (n, s) in self.queued.iter().enumerate() {
            let s_end = s.rel_seq + Wrapping(s.data.len() as u32);
            if seq_before(rel, s.rel_seq) {
                insert_pos = n;
                // trim our tail if we run into this segment
                let end = rel + Wrapping(data.len() as u32);
                if seq_before(s.rel_seq, end) {
                    let keep = (s.rel_seq - rel).0 as usize;
                    outcome.overlap_bytes += (data.len() - keep) as i64;
                    overlapped_queue = true;
                    data.truncate(keep);
                }
                break;
            }
            if seq_before(rel, s_end) {
                // our head lands inside this segment
                let cut = ((s_end - rel).0 as usize).min(data.len());
                outcome.overlap_bytes += cut as i64;
                overlapped_queue = true;
                if cut == data.len() {
                    data.clear();
                    break;
                }
                data.drain(..cut);
                rel = s_end;
            }
        }
        if overlapped_queue {
            outcome.overlap_packets += 1;
        }
        if data.is_empty() {
            return outcome;
        }

        if rel != self.next_rel {
            outcome.out_of_order_packets += 1;
            outcome.out_of_order_bytes += data.len() as i64;
        }

        self.queued.insert(
            insert_pos,
            PendingSegment {
                rel_seq: rel,
                data,
                ts_nanos,
            },
        );

        outcome.deliveries = self.drain();
        outcome
    }

    /// Shift the base sequence down to `new_isn`; only valid before any
    /// delivery happened.
    fn rebase(&mut self, new_isn: Wrapping<u32>) {
        let old_isn = self.isn.expect("rebase without isn");
        let delta = old_isn - new_isn;
        for s in self.queued.iter_mut() {
            s.rel_seq += delta;
        }
        self.isn = Some(new_isn);
    }

    /// Pop every segment that became contiguous. Streams with an unknown
    /// start are held back until `flush` so an earlier segment can still
    /// take its place.
    fn drain(&mut self) -> Vec<Delivery> {
        if !self.start_known && !self.delivered_any {
            return Vec::new();
        }
        let mut deliveries = Vec::new();
        while let Some(front) = self.queued.front() {
            if front.rel_seq != self.next_rel {
                break;
            }
            let mut chunk = Vec::new();
            let mut segments = 0;
            let ts_nanos = front.ts_nanos;
            while let Some(front) = self.queued.front() {
                if front.rel_seq != self.next_rel {
                    break;
                }
                let seg = self.queued.pop_front().expect("non-empty queue");
                self.next_rel += Wrapping(seg.data.len() as u32);
                chunk.extend_from_slice(&seg.data);
                segments += 1;
            }
            let skip = if !self.delivered_any && !self.start_known {
                -1
            } else {
                0
            };
            self.delivered_any = true;
            deliveries.push(Delivery {
                skip,
                data: chunk,
                ts_nanos,
                segments,
            });
        }
        deliveries
    }

    /// Force delivery of everything still queued, reporting gaps through
    /// the `skip` field.
    fn flush(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        while let Some(front) = self.queued.front() {
            if front.rel_seq == self.next_rel {
                deliveries.extend(self.drain_forced());
                continue;
            }
            let skip = if !self.delivered_any && !self.start_known {
                -1
            } else {
                (front.rel_seq - self.next_rel).0 as i64
            };
            self.next_rel = front.rel_seq;
            let mut sub = self.drain_forced();
            if let Some(first) = sub.first_mut() {
                first.skip = skip;
            }
            deliveries.extend(sub);
        }
        deliveries
    }

    /// Like `drain`, but ignores the unknown-start hold-back.
    fn drain_forced(&mut self) -> Vec<Delivery> {
        let was = self.delivered_any;
        self.delivered_any = true;
        let mut out = self.drain();
        if !was && !self.start_known {
            if let Some(first) = out.first_mut() {
                if first.skip == 0 {
                    first.skip = -1;
                }
            }
        }
        out
    }

    fn queued_len(&self) -> usize {
        self.queued.len()
    }
}

/// One tracked TCP connection.
struct TcpConnection {
    net_flow: LayerFlow,
    transport_flow: LayerFlow,
    client_ip: String,
    server_ip: String,
    client_port: u16,
    server_port: u16,
    ident: String,
    first_packet_nanos: i64,
    last_seen_nanos: i64,
    fsm: TcpFsm,
    optcheck: TcpOptionCheck,
    fsm_err: bool,
    halves: [HalfStream; 2],
    readers: [StreamReader; 2],
    merged: Option<Vec<DataFragment>>,
    decoded: bool,
    completed: bool,
    /// FIN or RST observed
    closed: bool,
}

impl TcpConnection {
    fn new(
        info: &PacketInfo,
        tcp: &TcpPacket,
        allow_missing_init: bool,
        channel_capacity: usize,
    ) -> TcpConnection {
        let net_flow = info.network.map(|l| l.flow).unwrap_or_default();
        let client_port = tcp.get_source();
        let server_port = tcp.get_destination();
        let transport_flow =
            LayerFlow::new(&client_port.to_be_bytes(), &server_port.to_be_bytes());
        let client_ip = info.endpoints.src.addr.to_string();
        let server_ip = info.endpoints.dst.addr.to_string();
        let ident = format!(
            "{}:{} -> {}:{}",
            client_ip, client_port, server_ip, server_port
        );
        TcpConnection {
            net_flow,
            transport_flow,
            client_ip,
            server_ip,
            client_port,
            server_port,
            ident,
            first_packet_nanos: info.ts_nanos,
            last_seen_nanos: info.ts_nanos,
            fsm: TcpFsm::new(allow_missing_init),
            optcheck: TcpOptionCheck::new(),
            fsm_err: false,
            halves: [HalfStream::new(), HalfStream::new()],
            readers: [
                StreamReader::spawn(channel_capacity),
                StreamReader::spawn(channel_capacity),
            ],
            merged: None,
            decoded: false,
            completed: false,
            closed: false,
        }
    }

    /// Direction of a packet relative to the current orientation.
    fn direction_of(&self, info: &PacketInfo, transport_flow: LayerFlow) -> TcpDirection {
        let net = info.network.map(|l| l.flow).unwrap_or_default();
        if net == self.net_flow && transport_flow == self.transport_flow {
            TcpDirection::ClientToServer
        } else {
            TcpDirection::ServerToClient
        }
    }

    /// The earliest capture timestamp defines which endpoint is the client.
    /// A packet older than the recorded first packet that travels against
    /// the current client flow flips the connection.
    fn reorder(&mut self, info: &PacketInfo, transport_flow: LayerFlow) {
        if info.ts_nanos >= self.first_packet_nanos {
            return;
        }
        self.first_packet_nanos = info.ts_nanos;
        let net = info.network.map(|l| l.flow).unwrap_or_default();
        if net == self.net_flow && transport_flow == self.transport_flow {
            return;
        }
        debug!("flipping connection {}", self.ident);
        self.net_flow = self.net_flow.reverse();
        self.transport_flow = self.transport_flow.reverse();
        self.ident = reverse_ident(&self.ident);
        std::mem::swap(&mut self.client_ip, &mut self.server_ip);
        std::mem::swap(&mut self.client_port, &mut self.server_port);
        self.halves.swap(0, 1);
        self.readers.swap(0, 1);
        self.readers[TcpDirection::ClientToServer.index()]
            .set_direction(TcpDirection::ClientToServer);
        self.readers[TcpDirection::ServerToClient.index()]
            .set_direction(TcpDirection::ServerToClient);
    }

    fn feed(&self, dir: TcpDirection, delivery: Delivery) {
        let reader = &self.readers[dir.index()];
        if !reader.feed(StreamData {
            data: delivery.data,
            ts_nanos: delivery.ts_nanos,
            dir,
        }) {
            warn!("{}: stream reader is gone, dropping fragment", self.ident);
        }
    }

    /// Merge client and server fragments into conversation order, once.
    fn sort_and_merge(&mut self) {
        if self.merged.is_some() {
            return;
        }
        let mut merged = self.readers[0].fragments();
        merged.extend(self.readers[1].fragments());
        sort_fragments(&mut merged);
        self.merged = Some(merged);
    }

    fn conversation_info(&self) -> ConversationInfo {
        ConversationInfo {
            data: self.merged.clone().unwrap_or_default(),
            ident: self.ident.clone(),
            first_client_packet: self.readers[0]
                .first_packet_nanos()
                .unwrap_or(self.first_packet_nanos),
            first_server_packet: self.readers[1]
                .first_packet_nanos()
                .unwrap_or(self.first_packet_nanos),
            client_ip: self.client_ip.clone(),
            server_ip: self.server_ip.clone(),
            client_port: self.client_port,
            server_port: self.server_port,
        }
    }
}

/// The reassembler: stream table plus sinks and knobs.
pub struct TcpReassembly {
    connections: HashMap<StreamKey, TcpConnection>,
    config: PipelineConfig,
    stats: StatsHandle,
    metrics: CounterHandle,
    decoders: Arc<StreamDecoderRegistry>,
    defrag: Ipv4DefragEngine,
    conv_writer: Box<dyn RecordWriter>,
    banner_writer: Box<dyn RecordWriter>,
    num_conversations: i64,
    num_banners: i64,
    packet_count: u64,
}

impl TcpReassembly {
    pub fn new(
        config: PipelineConfig,
        stats: StatsHandle,
        metrics: CounterHandle,
        decoders: Arc<StreamDecoderRegistry>,
        conv_writer: Box<dyn RecordWriter>,
        banner_writer: Box<dyn RecordWriter>,
    ) -> TcpReassembly {
        TcpReassembly {
            connections: HashMap::new(),
            config,
            stats,
            metrics,
            decoders,
            defrag: Ipv4DefragEngine::new(),
            conv_writer,
            banner_writer,
            num_conversations: 0,
            num_banners: 0,
            packet_count: 0,
        }
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    /// Entry point for TCP packets.
    pub fn handle_packet(&mut self, info: &PacketInfo) {
        self.packet_count += 1;
        let data_len = info.data.len() as i64;
        self.stats.update(|s| {
            s.count += 1;
            s.data_bytes += data_len;
        });

        // IPv4 defragmentation happens before the TCP layer sees the bytes
        let mut defragmented: Option<Vec<u8>> = None;
        if self.config.defrag_ipv4 {
            match self.defrag_ipv4(info) {
                DefragOutcome::Passthrough => (),
                DefragOutcome::Pending => return,
                DefragOutcome::Complete(tcp_bytes) => defragmented = Some(tcp_bytes),
            }
        }

        let tcp_data = match &defragmented {
            Some(bytes) => bytes.as_slice(),
            None => match &info.transport {
                Some(t) => t.data,
                None => return,
            },
        };
        let tcp = match TcpPacket::new(tcp_data) {
            Some(tcp) => tcp,
            None => {
                self.metrics.inc_error("tcp-decode", "truncated TCP header");
                return;
            }
        };

        let payload_len = tcp.payload().len() as i64;
        self.stats.update(|s| s.total_sz += payload_len);

        // ports come from the (possibly defragmented) TCP header, so
        // continuation fragments land on the same stream
        let transport_flow = LayerFlow::new(
            &tcp.get_source().to_be_bytes(),
            &tcp.get_destination().to_be_bytes(),
        );
        let (_, network_hash, _) = info.flow_hashes();
        let key = StreamKey {
            network: network_hash,
            transport: transport_flow.fast_hash(),
        };

        // borrow fields disjointly: the connection entry on one side, the
        // knobs and sinks on the other
        let Self {
            connections,
            config,
            stats,
            metrics,
            ..
        } = self;
        let conn = connections.entry(key).or_insert_with(|| {
            TcpConnection::new(
                info,
                &tcp,
                config.allow_missing_init,
                config.stream_channel_capacity,
            )
        });

        conn.reorder(info, transport_flow);
        let dir = conn.direction_of(info, transport_flow);
        conn.last_seen_nanos = conn.last_seen_nanos.max(info.ts_nanos);

        if !Self::accept(conn, info, &tcp, dir, config, stats, metrics) {
            return;
        }

        let flags = tcp.get_flags();
        let outcome = conn.halves[dir.index()].handle_segment(
            tcp.get_sequence(),
            flags & TcpFlags::SYN != 0,
            tcp.payload(),
            info.ts_nanos,
        );
        Self::apply_outcome(conn, dir, outcome, config.allow_missing_init, stats);

        let rst = flags & TcpFlags::RST != 0;
        let finished = rst || conn.fsm.both_fins_seen();
        if finished {
            conn.closed = true;
        }

        if finished {
            self.complete_by_key(key, if rst { "RST" } else { "FIN" });
        }

        if self.config.flush_every > 0 && self.packet_count % self.config.flush_every == 0 {
            let inactive = info.ts_nanos - self.config.close_inactive_timeout as i64 * 1_000_000_000;
            let pending = info.ts_nanos - self.config.close_pending_timeout as i64 * 1_000_000_000;
            self.flush_older_than(inactive, pending);
        }
    }

    /// FSM, option and checksum gates, with their override switches.
    fn accept(
        conn: &mut TcpConnection,
        info: &PacketInfo,
        tcp: &TcpPacket,
        dir: TcpDirection,
        config: &PipelineConfig,
        stats: &StatsHandle,
        metrics: &CounterHandle,
    ) -> bool {
        if !conn.fsm.check(tcp.get_flags(), dir) {
            stats.update(|s| s.reject_fsm += 1);
            if !conn.fsm_err {
                conn.fsm_err = true;
                stats.update(|s| s.reject_conn_fsm += 1);
            }
            metrics.inc_error("FSM", &conn.ident);
            if !config.ignore_fsm_errors {
                return false;
            }
        }

        if let Err(e) = conn.optcheck.accept(tcp, dir) {
            stats.update(|s| s.reject_opt += 1);
            metrics.inc_error("OptionChecker", &e.to_string());
            if !config.no_opt_check {
                return false;
            }
        }

        if config.verify_checksums {
            let valid = match (info.endpoints.src.addr, info.endpoints.dst.addr) {
                (IpAddr::V4(src), IpAddr::V4(dst)) => {
                    tcp::ipv4_checksum(tcp, &src, &dst) == tcp.get_checksum()
                }
                (IpAddr::V6(src), IpAddr::V6(dst)) => {
                    tcp::ipv6_checksum(tcp, &src, &dst) == tcp.get_checksum()
                }
                _ => true,
            };
            if !valid {
                stats.update(|s| s.reject_opt += 1);
                metrics.inc_error("Checksum", &conn.ident);
                return false;
            }
        }
        true
    }

    fn apply_outcome(
        conn: &TcpConnection,
        dir: TcpDirection,
        outcome: SegmentOutcome,
        allow_missing_init: bool,
        stats: &StatsHandle,
    ) {
        stats.update(|s| {
            s.out_of_order_packets += outcome.out_of_order_packets;
            s.out_of_order_bytes += outcome.out_of_order_bytes;
            s.overlap_packets += outcome.overlap_packets;
            s.overlap_bytes += outcome.overlap_bytes;
        });
        for delivery in outcome.deliveries {
            Self::deliver(conn, dir, delivery, allow_missing_init, stats);
        }
    }

    /// Apply the skip contract, update per-delivery stats and forward the
    /// chunk to the right stream reader.
    fn deliver(
        conn: &TcpConnection,
        dir: TcpDirection,
        delivery: Delivery,
        allow_missing_init: bool,
        stats: &StatsHandle,
    ) {
        let len = delivery.data.len() as i64;
        let segments = delivery.segments as i64;
        let skip = delivery.skip;
        stats.update(|s| {
            if skip > 0 {
                s.missed_bytes += skip;
            }
            s.sz += len;
            s.pkt += segments;
            if segments > 1 {
                s.reassembled += 1;
            }
            if len > s.biggest_chunk_bytes {
                s.biggest_chunk_bytes = len;
            }
            if segments > s.biggest_chunk_packets {
                s.biggest_chunk_packets = segments;
            }
        });

        if delivery.skip == -1 && allow_missing_init {
            // ok: start was never captured, accept the stream anyway
        } else if delivery.skip != 0 {
            // data loss, do not hand partial content to the decoders
            return;
        }

        if !delivery.data.is_empty() {
            conn.feed(dir, delivery);
        }
    }

    fn defrag_ipv4(&mut self, info: &PacketInfo) -> DefragOutcome {
        let network = match &info.network {
            Some(n) => n,
            None => return DefragOutcome::Passthrough,
        };
        let ip4 = match Ipv4Packet::new(network.data) {
            Some(p) => p,
            None => return DefragOutcome::Passthrough,
        };
        let more_fragments = ip4.get_flags() & Ipv4Flags::MoreFragments != 0;
        let frag_offset = ip4.get_fragment_offset() as usize * 8;
        if !more_fragments && frag_offset == 0 {
            return DefragOutcome::Passthrough;
        }
        let key = FragmentKey {
            src: ip4.get_source(),
            dst: ip4.get_destination(),
            id: ip4.get_identification(),
            proto: ip4.get_next_level_protocol().0,
        };
        let original_len = ip4.payload().len();
        match self.defrag.update(key, frag_offset, more_fragments, ip4.payload()) {
            Fragment::NoFrag(_) => DefragOutcome::Passthrough,
            Fragment::Incomplete => DefragOutcome::Pending,
            Fragment::Error => {
                self.metrics.inc_error("defrag", "missing first fragment");
                DefragOutcome::Pending
            }
            Fragment::Complete(payload) => {
                if payload.len() == original_len {
                    // nothing was actually merged, keep the packet as-is
                    return DefragOutcome::Passthrough;
                }
                self.stats.update(|s| s.ip_defrag += 1);
                DefragOutcome::Complete(payload)
            }
        }
    }

    fn complete_by_key(&mut self, key: StreamKey, reason: &str) {
        let remove = self.config.remove_closed_streams;
        if let Some(mut conn) = self.connections.remove(&key) {
            self.complete(&mut conn, reason);
            if !remove {
                self.connections.insert(key, conn);
            }
        }
    }

    /// Invoked when no more data is expected: FIN/RST observed, flush
    /// horizon crossed, or teardown.
    fn complete(&mut self, conn: &mut TcpConnection, reason: &str) {
        if conn.completed {
            return;
        }
        conn.completed = true;
        debug!("reassembly complete for {} ({})", conn.ident, reason);

        // push out everything still queued, then let the readers drain
        for dir in [TcpDirection::ClientToServer, TcpDirection::ServerToClient] {
            let deliveries = conn.halves[dir.index()].flush();
            for delivery in deliveries {
                Self::deliver(
                    conn,
                    dir,
                    delivery,
                    self.config.allow_missing_init,
                    &self.stats,
                );
            }
        }
        for reader in conn.readers.iter_mut() {
            reader.close_and_join();
        }

        let write_record = conn.closed || self.config.write_incomplete;

        if !conn.readers[0].saved() {
            conn.readers[0].mark_saved();
            conn.sort_and_merge();
            let mut record = {
                let conv = conn.conversation_info();
                ConversationRecord {
                    timestamp_first_client: conv.first_client_packet,
                    timestamp_first_server: conv.first_server_packet,
                    ident: conv.ident.clone(),
                    client_ip: conv.client_ip.clone(),
                    server_ip: conv.server_ip.clone(),
                    client_port: conv.client_port,
                    server_port: conv.server_port,
                    total_size: conv.total_size(),
                    num_fragments: conv.data.len(),
                    decoder: String::new(),
                    complete: conn.closed,
                }
            };

            // application decode runs exactly once per connection
            if !conn.decoded {
                conn.decoded = true;
                let conv = conn.conversation_info();
                if let Some((name, mut decoder)) = self.decoders.select(&conv) {
                    let started = Instant::now();
                    decoder.decode();
                    debug!(
                        "decoder {} finished for {} in {:?}",
                        name,
                        conn.ident,
                        started.elapsed()
                    );
                    record.decoder = name.to_string();
                }
            }

            if write_record {
                self.num_conversations += 1;
                self.stats.update(|s| s.saved_tcp_connections += 1);
                if let Err(e) = self.conv_writer.write(&record) {
                    error!("failed to write conversation record: {}", e);
                    self.metrics.inc_error("io-write", &e.to_string());
                }
            }
        }

        if !conn.readers[1].saved() {
            conn.readers[1].mark_saved();
            conn.sort_and_merge();
            let banner: Vec<u8> = conn
                .merged
                .as_ref()
                .map(|m| {
                    m.iter()
                        .filter(|f| f.dir == TcpDirection::ServerToClient)
                        .flat_map(|f| f.data.iter().copied())
                        .take(BANNER_SIZE)
                        .collect()
                })
                .unwrap_or_default();
            if !banner.is_empty() {
                let record = ServiceBannerRecord {
                    timestamp: conn.readers[1]
                        .first_packet_nanos()
                        .unwrap_or(conn.first_packet_nanos),
                    ident: conn.ident.clone(),
                    ip: conn.server_ip.clone(),
                    port: conn.server_port,
                    banner: String::from_utf8_lossy(&banner).to_string(),
                };
                self.num_banners += 1;
                if let Err(e) = self.banner_writer.write(&record) {
                    error!("failed to write banner record: {}", e);
                    self.metrics.inc_error("io-write", &e.to_string());
                }
            }
        }
    }

    /// Flush streams whose last activity is older than the horizons.
    pub fn flush_older_than(&mut self, inactive_nanos: i64, pending_nanos: i64) {
        let keys: Vec<StreamKey> = self
            .connections
            .iter()
            .filter(|(_, c)| {
                c.last_seen_nanos < inactive_nanos
                    || (c.closed && c.last_seen_nanos < pending_nanos)
            })
            .map(|(k, _)| *k)
            .collect();
        let flushed = keys.len();
        for key in keys {
            if let Some(mut conn) = self.connections.remove(&key) {
                self.complete(&mut conn, "timeout");
            }
        }
        if flushed > 0 {
            info!("forced flush closed {} streams", flushed);
        }
    }

    /// Flush every remaining stream and close the sinks.
    pub fn teardown(&mut self) {
        if self.config.wait_for_connections {
            let keys: Vec<StreamKey> = self.connections.keys().copied().collect();
            for key in keys {
                if let Some(mut conn) = self.connections.remove(&key) {
                    self.complete(&mut conn, "EOF");
                }
            }
        } else if !self.connections.is_empty() {
            info!("abandoning {} active streams", self.connections.len());
            self.connections.clear();
        }
        if let Err(e) = self.conv_writer.close(self.num_conversations) {
            warn!("failed to close conversation writer: {}", e);
        }
        if let Err(e) = self.banner_writer.close(self.num_banners) {
            warn!("failed to close banner writer: {}", e);
        }
        self.stats.log_summary(self.config.defrag_ipv4);
    }

    /// Queued (undelivered) segments across all connections, for inspection
    pub fn queued_segments(&self) -> usize {
        self.connections
            .values()
            .map(|c| c.halves[0].queued_len() + c.halves[1].queued_len())
            .sum()
    }
}

enum DefragOutcome {
    Passthrough,
    Pending,
    Complete(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_stream_delivers_in_order() {
        let mut h = HalfStream::new();
        h.handle_segment(100, true, b"", 0);
        let out = h.handle_segment(101, false, b"abcd", 1);
        assert_eq!(out.deliveries.len(), 1);
        assert_eq!(out.deliveries[0].data, b"abcd");
        assert_eq!(out.deliveries[0].skip, 0);
        let out = h.handle_segment(105, false, b"efgh", 2);
        assert_eq!(out.deliveries[0].data, b"efgh");
    }

    #[test]
    fn half_stream_coalesces_out_of_order() {
        let mut h = HalfStream::new();
        h.handle_segment(100, true, b"", 0);
        let out = h.handle_segment(105, false, b"efgh", 1);
        assert!(out.deliveries.is_empty());
        assert_eq!(out.out_of_order_packets, 1);
        assert_eq!(out.out_of_order_bytes, 4);
        let out = h.handle_segment(101, false, b"abcd", 2);
        assert_eq!(out.deliveries.len(), 1);
        assert_eq!(out.deliveries[0].data, b"abcdefgh");
        assert_eq!(out.deliveries[0].segments, 2);
    }

    #[test]
    fn half_stream_counts_overlap_with_delivered_data() {
        let mut h = HalfStream::new();
        h.handle_segment(100, true, b"", 0);
        h.handle_segment(101, false, b"abcd", 1);
        let out = h.handle_segment(103, false, b"cdef", 2);
        assert_eq!(out.overlap_bytes, 2);
        assert_eq!(out.overlap_packets, 1);
        assert_eq!(out.deliveries.len(), 1);
        assert_eq!(out.deliveries[0].data, b"ef");
    }

    #[test]
    fn half_stream_drops_full_retransmission() {
        let mut h = HalfStream::new();
        h.handle_segment(100, true, b"", 0);
        h.handle_segment(101, false, b"abcd", 1);
        let out = h.handle_segment(101, false, b"abcd", 2);
        assert!(out.deliveries.is_empty());
        assert_eq!(out.overlap_bytes, 4);
    }

    #[test]
    fn half_stream_flush_reports_gap() {
        let mut h = HalfStream::new();
        h.handle_segment(100, true, b"", 0);
        h.handle_segment(101, false, b"abcd", 1);
        let out = h.handle_segment(205, false, b"wxyz", 2);
        assert!(out.deliveries.is_empty());
        let flushed = h.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].skip, 100);
        assert_eq!(flushed[0].data, b"wxyz");
    }

    #[test]
    fn half_stream_handles_sequence_wraparound() {
        let mut h = HalfStream::new();
        h.handle_segment(u32::MAX - 1, true, b"", 0);
        let out = h.handle_segment(u32::MAX, false, b"abcd", 1);
        assert_eq!(out.deliveries[0].data, b"abcd");
        // 4294967295 + 4 wraps to 3
        let out = h.handle_segment(3, false, b"efgh", 2);
        assert_eq!(out.deliveries[0].data, b"efgh");
    }

    #[test]
    fn half_stream_holds_back_unknown_start() {
        let mut h = HalfStream::new();
        let out = h.handle_segment(105, false, b"efgh", 1);
        assert!(out.deliveries.is_empty());
        let out = h.handle_segment(101, false, b"abcd", 2);
        assert!(out.deliveries.is_empty());
        let flushed = h.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].skip, -1);
        assert_eq!(flushed[0].data, b"abcdefgh");
    }
}
