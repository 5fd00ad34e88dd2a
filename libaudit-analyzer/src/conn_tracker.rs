//! Bidirectional connection tracker.
//!
//! Connections are keyed by the triple of symmetric per-layer flow hashes,
//! so both directions of a conversation land on the same entry. The table
//! lock covers lookup and insertion only; mutation happens under the
//! per-entry lock.

use crate::counters::CounterHandle;
use crate::error::PipelineError;
use crate::packet_info::PacketInfo;
use crate::records::{AuditRecord, ConnectionRecord};
use crate::writer::RecordWriter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Identifier of a bidirectional connection: the symmetric fast hashes of
/// the link, network and transport flows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub link: u64,
    pub network: u64,
    pub transport: u64,
}

impl ConnectionId {
    pub fn from_packet(info: &PacketInfo) -> ConnectionId {
        let (link, network, transport) = info.flow_hashes();
        ConnectionId {
            link,
            network,
            transport,
        }
    }

    /// Canonical string form, input of the stable UID
    pub fn as_string(&self) -> String {
        format!("{}{}{}", self.link, self.network, self.transport)
    }

    /// Stable UID: hex MD5 of the canonical string
    pub fn uid(&self) -> String {
        format!("{:x}", md5::compute(self.as_string()))
    }
}

type SharedConnection = Arc<Mutex<ConnectionRecord>>;

pub struct ConnectionTracker {
    items: Mutex<HashMap<ConnectionId, SharedConnection>>,
    writer: Arc<Mutex<Box<dyn RecordWriter>>>,
    num_written: Arc<AtomicI64>,
    export: bool,
    metrics: CounterHandle,
    /// Idle eviction horizon, nanoseconds
    timeout_nanos: i64,
    flush_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionTracker {
    pub fn new(
        writer: Box<dyn RecordWriter>,
        timeout_secs: u64,
        export: bool,
        metrics: CounterHandle,
    ) -> ConnectionTracker {
        ConnectionTracker {
            items: Mutex::new(HashMap::new()),
            writer: Arc::new(Mutex::new(writer)),
            num_written: Arc::new(AtomicI64::new(0)),
            export,
            metrics,
            timeout_nanos: timeout_secs as i64 * 1_000_000_000,
            flush_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Account one packet.
    pub fn update(&self, info: &PacketInfo) {
        let id = ConnectionId::from_packet(info);
        let ts = info.ts_nanos;

        let table = self.items.lock().unwrap();
        if let Some(entry) = table.get(&id) {
            let entry = entry.clone();
            // entry lock is taken before the table lock is released, so a
            // concurrent flush cannot write this entry half-updated
            let mut conn = entry.lock().unwrap();
            drop(table);

            let mut calc_duration = false;
            if ts < conn.timestamp_first {
                // a packet captured before the connection's current first
                // packet defines the direction
                calc_duration = true;
                conn.timestamp_first = ts;
                self.set_direction_fields(&mut conn, info);
            }
            if ts > conn.timestamp_last {
                conn.timestamp_last = ts;
                calc_duration = true;
            }
            conn.num_packets += 1;
            conn.total_size += info.data.len() as i64;
            if let Some(payload) = info.app_payload {
                conn.app_payload_size += payload.len() as i64;
            }
            if calc_duration {
                conn.duration = conn.timestamp_last - conn.timestamp_first;
            }
        } else {
            drop(table);
            let mut conn = ConnectionRecord {
                uid: id.uid(),
                timestamp_first: ts,
                timestamp_last: ts,
                num_packets: 1,
                total_size: info.data.len() as i64,
                app_payload_size: info.app_payload.map_or(0, |p| p.len() as i64),
                ..Default::default()
            };
            if let Some(link) = &info.link {
                conn.link_proto = link.proto().to_string();
            }
            if let Some(network) = &info.network {
                conn.network_proto = network.proto().to_string();
            }
            if let Some(transport) = &info.transport {
                conn.transport_proto = transport.proto().to_string();
            }
            if info.app_payload.map_or(false, |p| !p.is_empty()) {
                conn.application_proto = "Payload".to_string();
            }
            self.set_direction_fields(&mut conn, info);
            let mut table = self.items.lock().unwrap();
            table.insert(id, Arc::new(Mutex::new(conn)));
        }
    }

    fn set_direction_fields(&self, conn: &mut ConnectionRecord, info: &PacketInfo) {
        if let Some(mac) = info.src_mac {
            conn.src_mac = mac.to_string();
        }
        if let Some(mac) = info.dst_mac {
            conn.dst_mac = mac.to_string();
        }
        if info.network.is_some() {
            conn.src_ip = info.endpoints.src.addr.to_string();
            conn.dst_ip = info.endpoints.dst.addr.to_string();
        }
        if info.transport.is_some() {
            conn.src_port = info.endpoints.src.port.to_string();
            conn.dst_port = info.endpoints.dst.port.to_string();
        }
    }

    /// Evict entries idle for longer than the configured timeout, relative
    /// to the current packet timestamp. Evicted records are written on a
    /// background thread.
    pub fn flush_idle(&self, current_ts_nanos: i64) {
        let mut evicted = Vec::new();
        {
            let mut table = self.items.lock().unwrap();
            table.retain(|_, entry| {
                let conn = entry.lock().unwrap();
                if current_ts_nanos - conn.timestamp_last > self.timeout_nanos {
                    evicted.push(conn.clone());
                    false
                } else {
                    true
                }
            });
        }
        if evicted.is_empty() {
            return;
        }
        debug!("flushing {} idle connections", evicted.len());
        let writer = self.writer.clone();
        let num_written = self.num_written.clone();
        let export = self.export;
        let metrics = self.metrics.clone();
        let handle = std::thread::spawn(move || {
            for conn in evicted {
                if let Err(e) = write_conn(&writer, &num_written, export, &metrics, &conn) {
                    error!("failed to write connection record: {}", e);
                    metrics.inc_error("io-write", &e.to_string());
                }
            }
        });
        self.flush_handles.lock().unwrap().push(handle);
    }

    /// Write all remaining entries and close the sink.
    pub fn teardown(&self) -> Result<(String, u64), PipelineError> {
        for handle in self.flush_handles.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        let entries: Vec<_> = {
            let mut table = self.items.lock().unwrap();
            table.drain().map(|(_, v)| v).collect()
        };
        for entry in entries {
            let conn = entry.lock().unwrap();
            write_conn(
                &self.writer,
                &self.num_written,
                self.export,
                &self.metrics,
                &conn,
            )?;
        }
        let num = self.num_written.load(Ordering::SeqCst);
        self.writer.lock().unwrap().close(num)
    }

    pub fn num_written(&self) -> i64 {
        self.num_written.load(Ordering::SeqCst)
    }
}

fn write_conn(
    writer: &Arc<Mutex<Box<dyn RecordWriter>>>,
    num_written: &AtomicI64,
    export: bool,
    metrics: &CounterHandle,
    conn: &ConnectionRecord,
) -> Result<(), PipelineError> {
    if export {
        conn.inc(metrics);
    }
    num_written.fetch_add(1, Ordering::SeqCst);
    writer.lock().unwrap().write(conn)
}
