use super::{ser_millis, AuditRecord, PacketContext};
use serde::Serialize;
use std::collections::HashMap;

/// Traffic seen on one `(port, transport protocol)` pair.
#[derive(Clone, Debug, Serialize)]
pub struct PortStats {
    pub port: u16,
    pub proto: String,
    pub bytes: u64,
    pub packets: u64,
}

/// Aggregated statistics for one protocol identified by content inspection.
#[derive(Clone, Debug, Serialize)]
pub struct ProtocolStats {
    pub packets: u64,
    pub category: String,
}

/// Behavioral profile of a single IPv4 or IPv6 address seen on the network.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IpProfileRecord {
    #[serde(rename = "Timestamp", serialize_with = "ser_millis")]
    pub timestamp_first: i64,
    #[serde(rename = "TimestampLast", serialize_with = "ser_millis")]
    pub timestamp_last: i64,
    #[serde(rename = "Addr")]
    pub addr: String,
    #[serde(rename = "NumPackets")]
    pub num_packets: i64,
    #[serde(rename = "Bytes")]
    pub bytes: u64,
    #[serde(rename = "Geolocation")]
    pub geolocation: String,
    #[serde(rename = "DNSNames")]
    pub dns_names: Vec<String>,
    /// Server name indication values, with occurrence counts
    #[serde(rename = "SNIs")]
    pub snis: HashMap<String, i64>,
    /// TLS fingerprint hash to human-readable label
    #[serde(rename = "Ja3")]
    pub ja3: HashMap<String, String>,
    #[serde(rename = "Protocols")]
    pub protocols: HashMap<String, ProtocolStats>,
    #[serde(rename = "SrcPorts")]
    pub src_ports: Vec<PortStats>,
    #[serde(rename = "DstPorts")]
    pub dst_ports: Vec<PortStats>,
    #[serde(rename = "ContactedPorts")]
    pub contacted_ports: Vec<PortStats>,
}

fn join_ports(ports: &[PortStats]) -> String {
    ports
        .iter()
        .map(|p| format!("{}/{}({}b,{}p)", p.port, p.proto, p.bytes, p.packets))
        .collect::<Vec<_>>()
        .join(" ")
}

impl AuditRecord for IpProfileRecord {
    fn record_type(&self) -> &'static str {
        "IPProfile"
    }

    fn csv_header(&self) -> Vec<&'static str> {
        vec![
            "Timestamp",
            "TimestampLast",
            "Addr",
            "NumPackets",
            "Bytes",
            "Geolocation",
            "DNSNames",
            "SNIs",
            "Ja3",
            "Protocols",
            "SrcPorts",
            "DstPorts",
            "ContactedPorts",
        ]
    }

    fn csv_record(&self) -> Vec<String> {
        let mut snis: Vec<_> = self.snis.iter().collect();
        snis.sort();
        let mut ja3: Vec<_> = self.ja3.keys().cloned().collect();
        ja3.sort();
        let mut protos: Vec<_> = self.protocols.keys().cloned().collect();
        protos.sort();
        vec![
            self.timestamp_first.to_string(),
            self.timestamp_last.to_string(),
            self.addr.clone(),
            self.num_packets.to_string(),
            self.bytes.to_string(),
            self.geolocation.clone(),
            self.dns_names.join(" "),
            snis.iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect::<Vec<_>>()
                .join(" "),
            ja3.join(" "),
            protos.join(" "),
            join_ports(&self.src_ports),
            join_ports(&self.dst_ports),
            join_ports(&self.contacted_ports),
        ]
    }

    fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn time(&self) -> i64 {
        self.timestamp_first
    }

    fn set_packet_context(&mut self, _ctx: &PacketContext) {
        // a profile belongs to one address, not to one packet
    }

    fn src(&self) -> String {
        self.addr.clone()
    }

    fn dst(&self) -> String {
        String::new()
    }
}
