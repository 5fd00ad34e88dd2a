//! Audit-record types and the capability they all share.
//!
//! Every structured row the pipeline emits (connections, profiles,
//! conversations, extracted artifacts, per-layer records) implements
//! [`AuditRecord`], so writers and the metrics path can stay generic.

use crate::counters::CounterHandle;
use serde::Serializer;

mod connection;
mod ip_profile;
mod layers;
mod stream;

pub use connection::ConnectionRecord;
pub use ip_profile::{IpProfileRecord, PortStats, ProtocolStats};
pub use layers::*;
pub use stream::{ConversationRecord, FileRecord, ServiceBannerRecord, UdpConversationRecord};

/// Context of the packet that produced a record: addresses and ports as seen
/// on the wire.
#[derive(Clone, Debug, Default)]
pub struct PacketContext {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Capability shared by all audit records.
pub trait AuditRecord: Send {
    /// Record type name, used for writer headers and metric labels
    fn record_type(&self) -> &'static str;

    /// Column names for the CSV sink
    fn csv_header(&self) -> Vec<&'static str>;

    /// One CSV row for this record
    fn csv_record(&self) -> Vec<String>;

    /// JSON serialization. Timestamps are emitted in milliseconds for
    /// indexer compatibility (the nanosecond value is divided by 1e6).
    fn json(&self) -> Result<String, serde_json::Error>;

    /// Capture timestamp in nanoseconds
    fn time(&self) -> i64;

    /// Stamp the packet context (source/destination addresses) onto the record
    fn set_packet_context(&mut self, ctx: &PacketContext);

    /// Feed the labeled record counter
    fn inc(&self, counters: &CounterHandle) {
        counters.inc_record(self.record_type());
    }

    /// Source address (layer-dependent)
    fn src(&self) -> String;

    /// Destination address (layer-dependent)
    fn dst(&self) -> String;
}

/// Serialize a nanosecond timestamp as milliseconds.
pub(crate) fn ser_millis<S: Serializer>(ns: &i64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(*ns / 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_timestamp_is_milliseconds() {
        let mut conn = ConnectionRecord::default();
        conn.timestamp_first = 1_500_000_123;
        conn.timestamp_last = 1_500_000_123;
        let js = conn.json().expect("json");
        let v: serde_json::Value = serde_json::from_str(&js).expect("parse");
        assert_eq!(v["Timestamp"], serde_json::json!(1_500));
    }
}
