//! Records produced from reassembled streams: conversations, service
//! banners, extracted files.

use super::{ser_millis, AuditRecord, PacketContext};
use serde::Serialize;

/// A completed TCP conversation, merged across both directions.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConversationRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp_first_client: i64,
    #[serde(rename = "TimestampServer", serialize_with = "ser_millis")]
    pub timestamp_first_server: i64,
    #[serde(rename = "Ident")]
    pub ident: String,
    #[serde(rename = "ClientIP")]
    pub client_ip: String,
    #[serde(rename = "ServerIP")]
    pub server_ip: String,
    #[serde(rename = "ClientPort")]
    pub client_port: u16,
    #[serde(rename = "ServerPort")]
    pub server_port: u16,
    #[serde(rename = "TotalSize")]
    pub total_size: usize,
    #[serde(rename = "NumFragments")]
    pub num_fragments: usize,
    #[serde(rename = "Decoder")]
    pub decoder: String,
    #[serde(rename = "Complete")]
    pub complete: bool,
}

impl AuditRecord for ConversationRecord {
    fn record_type(&self) -> &'static str {
        "Conversation"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "TimestampServer",
            "Ident",
            "ClientIP",
            "ServerIP",
            "ClientPort",
            "ServerPort",
            "TotalSize",
            "NumFragments",
            "Decoder",
            "Complete",
        ]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp_first_client.to_string(),
            self.timestamp_first_server.to_string(),
            self.ident.clone(),
            self.client_ip.clone(),
            self.server_ip.clone(),
            self.client_port.to_string(),
            self.server_port.to_string(),
            self.total_size.to_string(),
            self.num_fragments.to_string(),
            self.decoder.clone(),
            self.complete.to_string(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp_first_client
    }
    fn set_packet_context(&mut self, _ctx: &PacketContext) {}
    fn src(&self) -> String {
        self.client_ip.clone()
    }
    fn dst(&self) -> String {
        self.server_ip.clone()
    }
}

/// First bytes a service sent towards the client, bounded.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ServiceBannerRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "Ident")]
    pub ident: String,
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Banner")]
    pub banner: String,
}

impl AuditRecord for ServiceBannerRecord {
    fn record_type(&self) -> &'static str {
        "ServiceBanner"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec!["Timestamp", "Ident", "IP", "Port", "Banner"]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.ident.clone(),
            self.ip.clone(),
            self.port.to_string(),
            self.banner.clone(),
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
        self.ip.clone()
    }
    fn dst(&self) -> String {
        String::new()
    }
}

/// A file artifact extracted from a conversation by a stream decoder.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FileRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp: i64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Length")]
    pub length: i64,
    #[serde(rename = "Hash")]
    pub hash: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Ident")]
    pub ident: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "ContentType")]
    pub content_type: String,
    #[serde(rename = "ContentTypeDetected")]
    pub content_type_detected: String,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
    #[serde(rename = "SrcPort")]
    pub src_port: u16,
    #[serde(rename = "DstPort")]
    pub dst_port: u16,
    #[serde(rename = "Host")]
    pub host: String,
}

impl AuditRecord for FileRecord {
    fn record_type(&self) -> &'static str {
        "File"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "Name",
            "Length",
            "Hash",
            "Location",
            "Ident",
            "Source",
            "ContentType",
            "ContentTypeDetected",
            "SrcIP",
            "DstIP",
            "SrcPort",
            "DstPort",
            "Host",
        ]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.name.clone(),
            self.length.to_string(),
            self.hash.clone(),
            self.location.clone(),
            self.ident.clone(),
            self.source.clone(),
            self.content_type.clone(),
            self.content_type_detected.clone(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
            self.src_port.to_string(),
            self.dst_port.to_string(),
            self.host.clone(),
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

/// A UDP 5-tuple conversation, flushed after inactivity.
#[derive(Clone, Debug, Default, Serialize)]
pub struct UdpConversationRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp_first: i64,
    #[serde(rename = "TimestampLast", serialize_with = "ser_millis")]
    pub timestamp_last: i64,
    #[serde(rename = "SrcIP")]
    pub src_ip: String,
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
    #[serde(rename = "SrcPort")]
    pub src_port: u16,
    #[serde(rename = "DstPort")]
    pub dst_port: u16,
    #[serde(rename = "NumDatagrams")]
    pub num_datagrams: u64,
    #[serde(rename = "ClientBytes")]
    pub client_bytes: usize,
    #[serde(rename = "ServerBytes")]
    pub server_bytes: usize,
    #[serde(rename = "Decoder")]
    pub decoder: String,
}

impl AuditRecord for UdpConversationRecord {
    fn record_type(&self) -> &'static str {
        "UDPConversation"
    }
    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "TimestampLast",
            "SrcIP",
            "DstIP",
            "SrcPort",
            "DstPort",
            "NumDatagrams",
            "ClientBytes",
            "ServerBytes",
            "Decoder",
        ]
    }
    fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp_first.to_string(),
            self.timestamp_last.to_string(),
            self.src_ip.clone(),
            self.dst_ip.clone(),
            self.src_port.to_string(),
            self.dst_port.to_string(),
            self.num_datagrams.to_string(),
            self.client_bytes.to_string(),
            self.server_bytes.to_string(),
            self.decoder.clone(),
        ]
    }
    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    fn time(&self) -> i64 {
        self.timestamp_first
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
