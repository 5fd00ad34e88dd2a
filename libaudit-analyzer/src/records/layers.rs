//! Per-layer audit records, one struct per protocol header the
//! demultiplexer resolves.

use super::{ser_millis, AuditRecord, PacketContext};
use serde::Serialize;

#[derive(Clone, Debug, Default, Serialize)]
pub struct EthernetRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "SrcMAC")]
    pub src_mac: String,
    #[serde(rename = "DstMAC")]
    pub dst_mac: String,
    #[serde(rename = "EthernetType")]
    pub ethertype: u16,
    #[serde(rename = "PayloadSize")]
    pub payload_size: usize,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
}

impl AuditRecord for EthernetRecord {
    fn record_type(&self) -> &'static str {
        "Ethernet"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "SrcMAC",
            "DstMAC",
            "EthernetType",
            "PayloadSize",
            "SrcIP",
            "DstIP",
        ]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.src_mac.clone(),
            self.dst_mac.clone(),
            self.ethertype.to_string(),
            self.payload_size.to_string(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp
    }
    fn set_packet_context(&mut self, ctx: &PacketContext) {
        self.src_ip = ctx.src_ip.clone();
        self.dst_ip = ctx.dst_ip.clone();
    }
    fn src(&self) -> String {
        self.src_mac.clone()
    }
    fn dst(&self) -> String {
        self.dst_mac.clone()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ArpRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "Operation")]
    pub operation: u16,
    #[serde(rename = "SrcHwAddr")]
    pub src_hw_addr: String,
    #[serde(rename = "DstHwAddr")]
    pub dst_hw_addr: String,
    #[serde(rename = "SrcProtoAddr")]
    pub src_proto_addr: String,
    #[serde(rename = "DstProtoAddr")]
    pub dst_proto_addr: String,
}

impl AuditRecord for ArpRecord {
    fn record_type(&self) -> &'static str {
        "ARP"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "Operation",
            "SrcHwAddr",
            "DstHwAddr",
            "SrcProtoAddr",
            "DstProtoAddr",
        ]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.operation.to_string(),
            self.src_hw_addr.clone(),
            self.dst_hw_addr.clone(),
            self.src_proto_addr.clone(),
            self.dst_proto_addr.clone(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp
    }
    fn set_packet_context(&mut self, _ctx: &PacketContext) {}
    fn src(&self) -> String {
        self.src_proto_addr.clone()
    }
    fn dst(&self) -> String {
        self.dst_proto_addr.clone()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Ipv4Record {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "IHL")]
    pub ihl: u8,
    #[serde(rename = "TOS")]
    pub tos: u8,
    #[serde(rename = "Length")]
    pub length: u16,
    #[serde(rename = "Id")]
    pub id: u16,
    #[serde(rename = "Flags")]
    pub flags: u8,
    #[serde(rename = "FragOffset")]
    pub frag_offset: u16,
    #[serde(rename = "TTL")]
    pub ttl: u8,
    #[serde(rename = "Protocol")]
    pub protocol: u8,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
    #[serde(rename = "PayloadSize")]
    pub payload_size: usize,
}

impl AuditRecord for Ipv4Record {
    fn record_type(&self) -> &'static str {
        "IPv4"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "IHL",
            "TOS",
            "Length",
            "Id",
            "Flags",
            "FragOffset",
            "TTL",
            "Protocol",
            "SrcIP",
            "DstIP",
            "PayloadSize",
        ]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.ihl.to_string(),
            self.tos.to_string(),
            self.length.to_string(),
            self.id.to_string(),
            self.flags.to_string(),
            self.frag_offset.to_string(),
            self.ttl.to_string(),
            self.protocol.to_string(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
            self.payload_size.to_string(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp
    }
    fn set_packet_context(&mut self, _ctx: &PacketContext) {
        // addresses are taken from the header itself
    }
    fn src(&self) -> String {
        self.src_ip.clone()
    }
    fn dst(&self) -> String {
        self.dst_ip.clone()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Ipv6Record {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "TrafficClass")]
    pub traffic_class: u8,
    #[serde(rename = "FlowLabel")]
    pub flow_label: u32,
    #[serde(rename = "Length")]
    pub length: u16,
    #[serde(rename = "NextHeader")]
    pub next_header: u8,
    #[serde(rename = "HopLimit")]
    pub hop_limit: u8,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
    #[serde(rename = "PayloadSize")]
    pub payload_size: usize,
}

impl AuditRecord for Ipv6Record {
    fn record_type(&self) -> &'static str {
        "IPv6"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "TrafficClass",
            "FlowLabel",
            "Length",
            "NextHeader",
            "HopLimit",
            "SrcIP",
            "DstIP",
            "PayloadSize",
        ]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.traffic_class.to_string(),
            self.flow_label.to_string(),
            self.length.to_string(),
            self.next_header.to_string(),
            self.hop_limit.to_string(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
            self.payload_size.to_string(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp
    }
    fn set_packet_context(&mut self, _ctx: &PacketContext) {}
    fn src(&self) -> String {
        self.src_ip.clone()
    }
    fn dst(&self) -> String {
        self.dst_ip.clone()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Icmpv4Record {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "TypeCode")]
    pub type_code: u16,
    #[serde(rename = "Checksum")]
    pub checksum: u16,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
}

impl AuditRecord for Icmpv4Record {
    fn record_type(&self) -> &'static str {
        "ICMPv4"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec!["Timestamp", "TypeCode", "Checksum", "SrcIP", "DstIP"]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.type_code.to_string(),
            self.checksum.to_string(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp
    }
    fn set_packet_context(&mut self, ctx: &PacketContext) {
        self.src_ip = ctx.src_ip.clone();
        self.dst_ip = ctx.dst_ip.clone();
    }
    fn src(&self) -> String {
        self.src_ip.clone()
    }
    fn dst(&self) -> String {
        self.dst_ip.clone()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Icmpv6Record {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "TypeCode")]
    pub type_code: u16,
    #[serde(rename = "Checksum")]
    pub checksum: u16,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
}

impl AuditRecord for Icmpv6Record {
    fn record_type(&self) -> &'static str {
        "ICMPv6"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec!["Timestamp", "TypeCode", "Checksum", "SrcIP", "DstIP"]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.type_code.to_string(),
            self.checksum.to_string(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp
    }
    fn set_packet_context(&mut self, ctx: &PacketContext) {
        self.src_ip = ctx.src_ip.clone();
        self.dst_ip = ctx.dst_ip.clone();
    }
    fn src(&self) -> String {
        self.src_ip.clone()
    }
    fn dst(&self) -> String {
        self.dst_ip.clone()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TcpRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "SrcPort")]
    pub src_port: u16,
    #[serde(rename = "DstPort")]
    pub dst_port: u16,
    #[serde(rename = "SeqNum")]
    pub seq: u32,
    #[serde(rename = "AckNum")]
    pub ack: u32,
    #[serde(rename = "DataOffset")]
    pub data_offset: u8,
    #[serde(rename = "Flags")]
    pub flags: String,
    #[serde(rename = "Window")]
    pub window: u16,
    #[serde(rename = "Checksum")]
    pub checksum: u16,
    #[serde(rename = "Urgent")]
    pub urgent: u16,
    #[serde(rename = "PayloadSize")]
    pub payload_size: usize,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
}

impl AuditRecord for TcpRecord {
    fn record_type(&self) -> &'static str {
        "TCP"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "SrcPort",
            "DstPort",
            "SeqNum",
            "AckNum",
            "DataOffset",
            "Flags",
            "Window",
            "Checksum",
            "Urgent",
            "PayloadSize",
            "SrcIP",
            "DstIP",
        ]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.src_port.to_string(),
            self.dst_port.to_string(),
            self.seq.to_string(),
            self.ack.to_string(),
            self.data_offset.to_string(),
            self.flags.clone(),
            self.window.to_string(),
            self.checksum.to_string(),
            self.urgent.to_string(),
            self.payload_size.to_string(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp
    }
    fn set_packet_context(&mut self, ctx: &PacketContext) {
        self.src_ip = ctx.src_ip.clone();
        self.dst_ip = ctx.dst_ip.clone();
    }
    fn src(&self) -> String {
        self.src_ip.clone()
    }
    fn dst(&self) -> String {
        self.dst_ip.clone()
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct UdpRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "SrcPort")]
    pub src_port: u16,
    #[serde(rename = "DstPort")]
    pub dst_port: u16,
    #[serde(rename = "Length")]
    pub length: u16,
    #[serde(rename = "Checksum")]
    pub checksum: u16,
    #[serde(rename = "PayloadSize")]
    pub payload_size: usize,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
}

impl AuditRecord for UdpRecord {
    fn record_type(&self) -> &'static str {
        "UDP"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "SrcPort",
            "DstPort",
            "Length",
            "Checksum",
            "PayloadSize",
            "SrcIP",
            "DstIP",
        ]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.src_port.to_string(),
            self.dst_port.to_string(),
            self.length.to_string(),
            self.checksum.to_string(),
            self.payload_size.to_string(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp
    }
    fn set_packet_context(&mut self, ctx: &PacketContext) {
        self.src_ip = ctx.src_ip.clone();
        self.dst_ip = ctx.dst_ip.clone();
    }
    fn src(&self) -> String {
        self.src_ip.clone()
    }
    fn dst(&self) -> String {
        self.dst_ip.clone()
    }
}
