//! UDP conversation tracking.
//!
//! Datagrams sharing a 5-tuple (either direction) are aggregated into one
//! conversation; a sweep closes conversations that stayed silent past the
//! timeout, hands them to decoder selection and writes the record.

use crate::conversation::{ConversationInfo, DataFragment};
use crate::counters::CounterHandle;
use crate::packet_info::PacketInfo;
use crate::records::{AuditRecord, UdpConversationRecord};
use crate::stats::StatsHandle;
use crate::stream_decoders::StreamDecoderRegistry;
use crate::tcp_fsm::TcpDirection;
use crate::writer::RecordWriter;
use libaudit_tools::Endpoints;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

struct UdpConversation {
    /// orientation fixed by the first observed datagram
    endpoints: Endpoints,
    first_nanos: i64,
    last_nanos: i64,
    num_datagrams: u64,
    fragments: Vec<DataFragment>,
}

impl UdpConversation {
    fn direction_bytes(&self, dir: TcpDirection) -> usize {
        self.fragments
            .iter()
            .filter(|f| f.dir == dir)
            .map(|f| f.data.len())
            .sum()
    }
}

pub struct UdpTracker {
    items: HashMap<Endpoints, UdpConversation>,
    timeout_nanos: i64,
    writer: Box<dyn RecordWriter>,
    decoders: Arc<StreamDecoderRegistry>,
    stats: StatsHandle,
    metrics: CounterHandle,
    export: bool,
    num_written: i64,
}

impl UdpTracker {
    pub fn new(
        writer: Box<dyn RecordWriter>,
        timeout_secs: u64,
        decoders: Arc<StreamDecoderRegistry>,
        stats: StatsHandle,
        metrics: CounterHandle,
        export: bool,
    ) -> UdpTracker {
        UdpTracker {
            items: HashMap::new(),
            timeout_nanos: timeout_secs as i64 * 1_000_000_000,
            writer,
            decoders,
            stats,
            metrics,
            export,
            num_written: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Account one datagram.
    pub fn handle_packet(&mut self, info: &PacketInfo) {
        let payload = match info.app_payload {
            Some(p) => p,
            None => return,
        };
        let ep = info.endpoints;

        let (key, dir) = if self.items.contains_key(&ep) {
            (ep, TcpDirection::ClientToServer)
        } else {
            let rev = ep.reversed();
            if self.items.contains_key(&rev) {
                (rev, TcpDirection::ServerToClient)
            } else {
                (ep, TcpDirection::ClientToServer)
            }
        };

        let conv = self.items.entry(key).or_insert_with(|| UdpConversation {
            endpoints: key,
            first_nanos: info.ts_nanos,
            last_nanos: info.ts_nanos,
            num_datagrams: 0,
            fragments: Vec::new(),
        });
        conv.num_datagrams += 1;
        conv.last_nanos = conv.last_nanos.max(info.ts_nanos);
        conv.first_nanos = conv.first_nanos.min(info.ts_nanos);
        if !payload.is_empty() {
            conv.fragments.push(DataFragment {
                dir,
                data: payload.to_vec(),
                ts_nanos: info.ts_nanos,
            });
        }
    }

    /// Close conversations silent for longer than the timeout.
    pub fn sweep(&mut self, now_nanos: i64) {
        let timeout = self.timeout_nanos;
        let expired: Vec<Endpoints> = self
            .items
            .iter()
            .filter(|(_, c)| now_nanos - c.last_nanos >= timeout)
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            if let Some(conv) = self.items.remove(&key) {
                self.write_conversation(conv);
            }
        }
    }

    /// Flush everything and close the sink.
    pub fn teardown(&mut self) {
        let keys: Vec<Endpoints> = self.items.keys().copied().collect();
        for key in keys {
            if let Some(conv) = self.items.remove(&key) {
                self.write_conversation(conv);
            }
        }
        if let Err(e) = self.writer.close(self.num_written) {
            warn!("failed to close UDP conversation writer: {}", e);
        }
    }

    fn write_conversation(&mut self, conv: UdpConversation) {
        let mut record = UdpConversationRecord {
            timestamp_first: conv.first_nanos,
            timestamp_last: conv.last_nanos,
            src_ip: conv.endpoints.src.addr.to_string(),
            dst_ip: conv.endpoints.dst.addr.to_string(),
            src_port: conv.endpoints.src.port,
            dst_port: conv.endpoints.dst.port,
            num_datagrams: conv.num_datagrams,
            client_bytes: conv.direction_bytes(TcpDirection::ClientToServer),
            server_bytes: conv.direction_bytes(TcpDirection::ServerToClient),
            decoder: String::new(),
        };

        // decoder selection, analogous to the TCP completion path
        let mut fragments = conv.fragments;
        crate::conversation::sort_fragments(&mut fragments);
        let info = ConversationInfo {
            data: fragments,
            ident: format!(
                "{}:{} -> {}:{}",
                record.src_ip, record.src_port, record.dst_ip, record.dst_port
            ),
            first_client_packet: conv.first_nanos,
            first_server_packet: conv.first_nanos,
            client_ip: record.src_ip.clone(),
            server_ip: record.dst_ip.clone(),
            client_port: record.src_port,
            server_port: record.dst_port,
        };
        if let Some((name, mut decoder)) = self.decoders.select(&info) {
            let started = Instant::now();
            decoder.decode();
            debug!(
                "decoder {} finished for {} in {:?}",
                name,
                info.ident,
                started.elapsed()
            );
            record.decoder = name.to_string();
        }

        if self.export {
            record.inc(&self.metrics);
        }
        self.num_written += 1;
        self.stats.update(|s| s.saved_udp_conversations += 1);
        if let Err(e) = self.writer.write(&record) {
            error!("failed to write UDP conversation record: {}", e);
            self.metrics.inc_error("io-write", &e.to_string());
        }
    }
}
