//! Protocol layers the demultiplexer can resolve.

use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LayerType {
    Ethernet,
    Arp,
    Ipv4,
    Ipv6,
    Icmpv4,
    Icmpv6,
    Tcp,
    Udp,
}

impl LayerType {
    pub const ALL: [LayerType; 8] = [
        LayerType::Ethernet,
        LayerType::Arp,
        LayerType::Ipv4,
        LayerType::Ipv6,
        LayerType::Icmpv4,
        LayerType::Icmpv6,
        LayerType::Tcp,
        LayerType::Udp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LayerType::Ethernet => "Ethernet",
            LayerType::Arp => "ARP",
            LayerType::Ipv4 => "IPv4",
            LayerType::Ipv6 => "IPv6",
            LayerType::Icmpv4 => "ICMPv4",
            LayerType::Icmpv6 => "ICMPv6",
            LayerType::Tcp => "TCP",
            LayerType::Udp => "UDP",
        }
    }

    pub fn from_name(name: &str) -> Option<LayerType> {
        LayerType::ALL.iter().copied().find(|l| l.name() == name)
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}
