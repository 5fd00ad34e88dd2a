use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// One transport endpoint: address plus port (0 when the protocol has no
/// ports).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct HostPort {
    pub addr: IpAddr,
    pub port: u16,
}

impl Default for HostPort {
    fn default() -> Self {
        HostPort {
            addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// The two endpoints of one packet, in observed direction, plus the
/// transport protocol number.
///
/// This is labeling data, not connection identity: the trackers key their
/// tables on the symmetric [`LayerFlow`](crate::LayerFlow) hashes, and use
/// this type for record fields, profile updates and direction-sensitive
/// lookups (via `reversed`).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Endpoints {
    pub proto: u8,
    pub src: HostPort,
    pub dst: HostPort,
}

impl Endpoints {
    /// The same pair seen from the other side
    pub fn reversed(&self) -> Endpoints {
        Endpoints {
            proto: self.proto,
            src: self.dst,
            dst: self.src,
        }
    }
}

impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} -> {} [{}]", self.src, self.dst, self.proto)
    }
}

#[cfg(test)]
mod tests {
    use super::{Endpoints, HostPort};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn endpoints_reverse() {
        let e = Endpoints {
            proto: 6,
            src: HostPort {
                addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                port: 1234,
            },
            dst: HostPort {
                addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                port: 80,
            },
        };
        let r = e.reversed();
        assert_eq!(r.src, e.dst);
        assert_eq!(r.dst.port, 1234);
        assert_eq!(r.reversed(), e);
    }

    #[test]
    fn endpoints_display() {
        let e = Endpoints {
            proto: 17,
            src: HostPort {
                addr: IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
                port: 53,
            },
            ..Default::default()
        };
        assert_eq!(e.to_string(), "1.1.1.1:53 -> 0.0.0.0:0 [17]");
    }
}
