//! Per-address behavioral profiles.
//!
//! One profile per IP address string. The table lock covers lookup and
//! insertion; per-entry locks guard mutation. Port lists are plain vectors
//! searched linearly: they stay small and the scan beats a secondary index
//! on cache locality.

use crate::counters::CounterHandle;
use crate::dpi::ProtocolClassifier;
use crate::error::PipelineError;
use crate::packet_info::PacketInfo;
use crate::records::{AuditRecord, IpProfileRecord, PortStats, ProtocolStats};
use crate::resolvers::Resolvers;
use crate::tls;
use crate::writer::RecordWriter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

type SharedProfile = Arc<Mutex<IpProfileRecord>>;

pub struct IpProfileMap {
    items: Mutex<HashMap<String, SharedProfile>>,
    writer: Mutex<Box<dyn RecordWriter>>,
    num_written: AtomicI64,
    export: bool,
    local_dns: bool,
    metrics: CounterHandle,
    resolvers: Arc<Resolvers>,
    classifier: Arc<dyn ProtocolClassifier>,
}

/// Update one port list in place: bump the matching `(port, proto)` entry
/// or append a new one.
fn update_port_list(list: &mut Vec<PortStats>, port: u16, proto: &str, data_len: u64) {
    for entry in list.iter_mut() {
        if entry.port == port && entry.proto == proto {
            entry.bytes += data_len;
            entry.packets += 1;
            return;
        }
    }
    list.push(PortStats {
        port,
        proto: proto.to_string(),
        bytes: data_len,
        packets: 1,
    });
}

impl IpProfileMap {
    pub fn new(
        writer: Box<dyn RecordWriter>,
        export: bool,
        local_dns: bool,
        metrics: CounterHandle,
        resolvers: Arc<Resolvers>,
        classifier: Arc<dyn ProtocolClassifier>,
    ) -> IpProfileMap {
        IpProfileMap {
            items: Mutex::new(HashMap::new()),
            writer: Mutex::new(writer),
            num_written: AtomicI64::new(0),
            export,
            local_dns,
            metrics,
            resolvers,
            classifier,
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch-and-update the profile for `addr`. `source` tells whether the
    /// address is the sender of this packet.
    pub fn update(&self, addr: &str, info: &PacketInfo, source: bool) {
        if addr.is_empty() {
            return;
        }
        let data_len = info.data.len() as u64;

        let existing = {
            let table = self.items.lock().unwrap();
            table.get(addr).cloned()
        };

        if let Some(entry) = existing {
            let mut p = entry.lock().unwrap();
            p.num_packets += 1;
            p.timestamp_last = info.ts_nanos;
            p.bytes += data_len;

            if let Some(transport) = &info.transport {
                let proto = transport.proto();
                if source {
                    update_port_list(&mut p.src_ports, info.endpoints.src.port, proto, data_len);
                    update_port_list(
                        &mut p.contacted_ports,
                        info.endpoints.dst.port,
                        proto,
                        data_len,
                    );
                } else {
                    update_port_list(&mut p.dst_ports, info.endpoints.dst.port, proto, data_len);
                    update_port_list(
                        &mut p.contacted_ports,
                        info.endpoints.src.port,
                        proto,
                        data_len,
                    );
                }
            }

            if let Some(payload) = info.app_payload {
                if let Some(hello) = tls::parse_client_hello(payload) {
                    if !hello.sni.is_empty() {
                        *p.snis.entry(hello.sni.clone()).or_insert(0) += 1;
                    }
                    if !p.ja3.contains_key(&hello.ja3) {
                        let label = self.resolvers.lookup_ja3(&hello.ja3);
                        p.ja3.insert(hello.ja3, label);
                    }
                } else if let Some(hash) = tls::parse_server_hello_digest(payload) {
                    if !p.ja3.contains_key(&hash) {
                        let label = self.resolvers.lookup_ja3(&hash);
                        p.ja3.insert(hash, label);
                    }
                }
            }

            for label in self.classifier.classify(info) {
                if let Some(stats) = p.protocols.get_mut(label.name) {
                    stats.packets += 1;
                } else {
                    p.protocols.insert(
                        label.name.to_string(),
                        ProtocolStats {
                            packets: 1,
                            category: label.category.to_string(),
                        },
                    );
                }
            }
            return;
        }

        // new address: build the full profile before taking the table lock
        let mut p = IpProfileRecord {
            addr: addr.to_string(),
            num_packets: 1,
            bytes: data_len,
            timestamp_first: info.ts_nanos,
            timestamp_last: info.ts_nanos,
            geolocation: self.resolvers.lookup_geolocation(addr),
            ..Default::default()
        };

        if let Some(transport) = &info.transport {
            let proto = transport.proto();
            if source {
                update_port_list(&mut p.src_ports, info.endpoints.src.port, proto, data_len);
                update_port_list(
                    &mut p.contacted_ports,
                    info.endpoints.dst.port,
                    proto,
                    data_len,
                );
            } else {
                update_port_list(&mut p.dst_ports, info.endpoints.dst.port, proto, data_len);
                update_port_list(
                    &mut p.contacted_ports,
                    info.endpoints.src.port,
                    proto,
                    data_len,
                );
            }
        }

        if let Some(payload) = info.app_payload {
            if let Some(hello) = tls::parse_client_hello(payload) {
                if !hello.sni.is_empty() {
                    p.snis.insert(hello.sni.clone(), 1);
                }
                let label = self.resolvers.lookup_ja3(&hello.ja3);
                p.ja3.insert(hello.ja3, label);
            } else if let Some(hash) = tls::parse_server_hello_digest(payload) {
                let label = self.resolvers.lookup_ja3(&hash);
                p.ja3.insert(hash, label);
            }
        }

        for label in self.classifier.classify(info) {
            p.protocols.insert(
                label.name.to_string(),
                ProtocolStats {
                    packets: 1,
                    category: label.category.to_string(),
                },
            );
        }

        p.dns_names = if self.local_dns {
            self.resolvers
                .lookup_dns_name_local(addr)
                .into_iter()
                .collect()
        } else {
            self.resolvers.lookup_dns_names(addr)
        };

        let mut table = self.items.lock().unwrap();
        table.insert(addr.to_string(), Arc::new(Mutex::new(p)));
    }

    /// Snapshot of one profile, for inspection
    pub fn get(&self, addr: &str) -> Option<IpProfileRecord> {
        let table = self.items.lock().unwrap();
        table.get(addr).map(|p| p.lock().unwrap().clone())
    }

    /// Write all profiles and close the sink.
    pub fn teardown(&self) -> Result<(String, u64), PipelineError> {
        let entries: Vec<_> = {
            let mut table = self.items.lock().unwrap();
            table.drain().map(|(_, v)| v).collect()
        };
        for entry in entries {
            let p = entry.lock().unwrap();
            if self.export {
                p.inc(&self.metrics);
            }
            self.num_written.fetch_add(1, Ordering::SeqCst);
            self.writer.lock().unwrap().write(&*p)?;
        }
        let num = self.num_written.load(Ordering::SeqCst);
        self.writer.lock().unwrap().close(num)
    }

    pub fn num_written(&self) -> i64 {
        self.num_written.load(Ordering::SeqCst)
    }
}
