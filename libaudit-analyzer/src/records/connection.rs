use super::{ser_millis, AuditRecord, PacketContext};
use serde::Serialize;

/// A bidirectional connection between two endpoints, identified by the
/// combined link-, network- and transport-layer flows.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConnectionRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp_first: i64,
    #[serde(rename = "TimestampLast", serialize_with = "ser_millis")]
    pub timestamp_last: i64,
    #[serde(rename = "UID")]
    pub uid: String,
    #[serde(rename = "LinkProto")]
    pub link_proto: String,
    #[serde(rename = "NetworkProto")]
    pub network_proto: String,
    #[serde(rename = "TransportProto")]
    pub transport_proto: String,
    #[serde(rename = "ApplicationProto")]
    pub application_proto: String,
    #[serde(rename = "SrcMAC")]
    pub src_mac: String,
    #[serde(rename = "DstMAC")]
    pub dst_mac: String,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
    #[serde(rename = "SrcPort")]
    pub src_port: String,
    #[serde(rename = "DstPort")]
    pub dst_port: String,
    #[serde(rename = "NumPackets")]
    pub num_packets: i64,
    #[serde(rename = "TotalSize")]
    pub total_size: i64,
    #[serde(rename = "AppPayloadSize")]
    pub app_payload_size: i64,
    /// last - first, in nanoseconds
    #[serde(rename = "Duration")]
    pub duration: i64,
}

impl AuditRecord for ConnectionRecord {
    fn record_type(&self) -> &'static str {
        "Connection"
    }

    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "TimestampLast",
            "UID",
            "LinkProto",
            "NetworkProto",
            "TransportProto",
            "ApplicationProto",
            "SrcMAC",
            "DstMAC",
            "SrcIP",
            "DstIP",
            "SrcPort",
            "DstPort",
            "NumPackets",
            "TotalSize",
            "AppPayloadSize",
            "Duration",
        ]
    }

    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp_first.to_string(),
            self.timestamp_last.to_string(),
            self.uid.clone(),
            self.link_proto.clone(),
            self.network_proto.clone(),
            self.transport_proto.clone(),
            self.application_proto.clone(),
            self.src_mac.clone(),
            self.dst_mac.clone(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
            self.src_port.clone(),
            self.dst_port.clone(),
            self.num_packets.to_string(),
            self.total_size.to_string(),
            self.app_payload_size.to_string(),
            self.duration.to_string(),
        ]
    }

    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn time(&self) -> i64 {
        self.timestamp_first
    }

    fn set_packet_context(&mut self, _ctx: &PacketContext) {
        // direction is fixed by the earliest observed packet, not by the
        // packet that triggered the write
    }

    fn src(&self) -> String {
        self.src_ip.clone()
    }

    fn dst(&self) -> String {
        self.dst_ip.clone()
    }
}
