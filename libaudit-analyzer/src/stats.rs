//! Reassembly statistics.
//!
//! One counter block behind a single mutex; updates happen in batches at
//! reassembly boundaries, not per segment, so contention stays low.

use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone)]
pub struct ReassemblyStats {
    pub ip_defrag: i64,
    pub missed_bytes: i64,
    pub pkt: i64,
    pub sz: i64,
    pub total_sz: i64,
    pub reject_fsm: i64,
    pub reject_opt: i64,
    pub reject_conn_fsm: i64,
    pub reassembled: i64,
    pub out_of_order_bytes: i64,
    pub out_of_order_packets: i64,
    pub biggest_chunk_bytes: i64,
    pub biggest_chunk_packets: i64,
    pub overlap_bytes: i64,
    pub overlap_packets: i64,
    pub saved_tcp_connections: i64,
    pub saved_udp_conversations: i64,
    pub count: i64,
    pub data_bytes: i64,
}

/// Shared handle onto the statistics block.
#[derive(Clone, Default)]
pub struct StatsHandle {
    inner: Arc<Mutex<ReassemblyStats>>,
}

impl StatsHandle {
    pub fn new() -> StatsHandle {
        StatsHandle::default()
    }

    /// Apply a mutation under the lock
    pub fn update<F: FnOnce(&mut ReassemblyStats)>(&self, f: F) {
        let mut s = self.inner.lock().unwrap();
        f(&mut s);
    }

    pub fn snapshot(&self) -> ReassemblyStats {
        self.inner.lock().unwrap().clone()
    }

    /// Log the final statistics table
    pub fn log_summary(&self, defrag_enabled: bool) {
        let s = self.snapshot();
        if defrag_enabled {
            info!("IPv4 defragmentation: {}", s.ip_defrag);
        }
        info!("missed bytes: {}", s.missed_bytes);
        info!("total packets: {}", s.pkt);
        info!("rejected FSM: {}", s.reject_fsm);
        info!("rejected Options: {}", s.reject_opt);
        info!("reassembled bytes: {}", s.sz);
        info!("total TCP bytes: {}", s.total_sz);
        info!("connection rejected FSM: {}", s.reject_conn_fsm);
        info!("reassembled chunks: {}", s.reassembled);
        info!("out-of-order packets: {}", s.out_of_order_packets);
        info!("out-of-order bytes: {}", s.out_of_order_bytes);
        info!("biggest-chunk packets: {}", s.biggest_chunk_packets);
        info!("biggest-chunk bytes: {}", s.biggest_chunk_bytes);
        info!("overlap packets: {}", s.overlap_packets);
        info!("overlap bytes: {}", s.overlap_bytes);
        info!("saved TCP connections: {}", s.saved_tcp_connections);
        info!("saved UDP conversations: {}", s.saved_udp_conversations);
    }
}
