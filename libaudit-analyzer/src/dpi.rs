//! Content-based protocol classification.
//!
//! The classifier is a black box from the pipeline's point of view: it maps
//! a packet to a set of protocol labels. The bundled implementation is a
//! table of cheap payload probes in priority order, with a port fallback
//! for protocols that cannot be recognized from a single datagram.

use crate::packet_info::PacketInfo;

/// One identified protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolLabel {
    pub name: &'static str,
    pub category: &'static str,
}

/// Black-box classifier contract.
pub trait ProtocolClassifier: Send + Sync {
    /// Protocol labels for this packet; empty when nothing matched
    fn classify(&self, info: &PacketInfo) -> Vec<ProtocolLabel>;

    /// Release classifier resources (optional)
    fn destroy(&self) {}
}

type ProbeFn = fn(&[u8]) -> bool;

struct Probe {
    name: &'static str,
    category: &'static str,
    /// 6 = TCP, 17 = UDP, 0 = either
    proto: u8,
    /// fallback match when the payload probe is inconclusive
    ports: &'static [u16],
    probe: ProbeFn,
}

fn http_probe(data: &[u8]) -> bool {
    const VERBS: [&[u8]; 7] = [
        b"GET ", b"POST ", b"PUT ", b"DELETE ", b"HEAD ", b"OPTIONS ", b"HTTP/",
    ];
    VERBS.iter().any(|v| data.starts_with(v))
}

fn tls_probe(data: &[u8]) -> bool {
    data.len() > 5 && data[0] == 0x16 && data[1] == 0x03
}

fn ssh_probe(data: &[u8]) -> bool {
    data.starts_with(b"SSH-")
}

fn smtp_probe(data: &[u8]) -> bool {
    data.starts_with(b"220 ") || data.starts_with(b"EHLO ") || data.starts_with(b"HELO ")
}

fn pop3_probe(data: &[u8]) -> bool {
    data.starts_with(b"+OK")
}

fn dns_probe(data: &[u8]) -> bool {
    // header with a plausible opcode and at least one question
    data.len() >= 12 && (data[2] & 0x70) == 0 && u16::from_be_bytes([data[4], data[5]]) >= 1
}

fn ntp_probe(data: &[u8]) -> bool {
    data.len() >= 48 && (data[0] >> 3) & 0x07 <= 4
}

fn dhcp_probe(data: &[u8]) -> bool {
    data.len() >= 240 && (data[0] == 1 || data[0] == 2) && data[236..240] == [99, 130, 83, 99]
}

const PROBES: &[Probe] = &[
    Probe {
        name: "TLS",
        category: "session",
        proto: 6,
        ports: &[443, 8443],
        probe: tls_probe,
    },
    Probe {
        name: "HTTP",
        category: "application",
        proto: 6,
        ports: &[80, 8080],
        probe: http_probe,
    },
    Probe {
        name: "SSH",
        category: "application",
        proto: 6,
        ports: &[22],
        probe: ssh_probe,
    },
    Probe {
        name: "SMTP",
        category: "application",
        proto: 6,
        ports: &[25],
        probe: smtp_probe,
    },
    Probe {
        name: "POP3",
        category: "application",
        proto: 6,
        ports: &[110],
        probe: pop3_probe,
    },
    Probe {
        name: "DHCP",
        category: "network",
        proto: 17,
        ports: &[67, 68],
        probe: dhcp_probe,
    },
    Probe {
        name: "DNS",
        category: "application",
        proto: 0,
        ports: &[53],
        probe: dns_probe,
    },
    Probe {
        name: "NTP",
        category: "application",
        proto: 17,
        ports: &[123],
        probe: ntp_probe,
    },
];

/// Probe-table classifier.
#[derive(Default)]
pub struct HeuristicClassifier;

impl ProtocolClassifier for HeuristicClassifier {
    fn classify(&self, info: &PacketInfo) -> Vec<ProtocolLabel> {
        let payload = match info.app_payload {
            Some(p) if !p.is_empty() => p,
            _ => return Vec::new(),
        };
        let proto = info.endpoints.proto;
        let mut labels = Vec::new();
        for p in PROBES {
            if p.proto != 0 && p.proto != proto {
                continue;
            }
            let port_match = p.ports.contains(&info.endpoints.src.port)
                || p.ports.contains(&info.endpoints.dst.port);
            if (p.probe)(payload) && (port_match || content_only(p.name)) {
                labels.push(ProtocolLabel {
                    name: p.name,
                    category: p.category,
                });
            }
        }
        labels
    }
}

/// Protocols whose signature is strong enough to trust without a port hint.
fn content_only(name: &str) -> bool {
    matches!(name, "HTTP" | "TLS" | "SSH" | "DHCP")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_info::PacketInfo;
    use libaudit_tools::Timestamp;

    fn info_with_payload(payload: &'static [u8], proto: u8, dst_port: u16) -> PacketInfo<'static> {
        let mut info = PacketInfo::new(Timestamp::new(0, 0), 1, payload);
        info.app_payload = Some(payload);
        info.endpoints.proto = proto;
        info.endpoints.dst.port = dst_port;
        info
    }

    #[test]
    fn classifies_http_without_port_hint() {
        let info = info_with_payload(b"GET /index.html HTTP/1.0\r\n\r\n", 6, 8081);
        let labels = HeuristicClassifier.classify(&info);
        assert!(labels.iter().any(|l| l.name == "HTTP"));
    }

    #[test]
    fn dns_requires_port_agreement() {
        // plausible DNS header but on an unrelated port
        let payload: &[u8] = &[0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0];
        let info = info_with_payload(payload, 17, 9999);
        let labels = HeuristicClassifier.classify(&info);
        assert!(labels.iter().all(|l| l.name != "DNS"));
    }

    #[test]
    fn empty_payload_yields_nothing() {
        let info = PacketInfo::new(Timestamp::new(0, 0), 1, b"");
        assert!(HeuristicClassifier.classify(&info).is_empty());
    }
}
