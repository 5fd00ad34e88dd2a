//! Pure-function lookups: geolocation classes, DNS names, fingerprint
//! labels.
//!
//! Backed by in-memory tables that can be populated at startup; no lookup
//! performs network I/O.

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Default)]
pub struct Resolvers {
    dns: HashMap<String, Vec<String>>,
    ja3_labels: HashMap<String, String>,
}

impl Resolvers {
    pub fn new() -> Resolvers {
        Resolvers::default()
    }

    /// Register a DNS name for an address
    pub fn add_dns_name(&mut self, addr: &str, name: &str) {
        self.dns
            .entry(addr.to_string())
            .or_insert_with(Vec::new)
            .push(name.to_string());
    }

    /// Register a human-readable label for a fingerprint hash
    pub fn add_ja3_label(&mut self, hash: &str, label: &str) {
        self.ja3_labels.insert(hash.to_string(), label.to_string());
    }

    /// Coarse location class for an address. Without a geo database this
    /// classifies the address scope, which is still useful for profiling.
    pub fn lookup_geolocation(&self, addr: &str) -> String {
        match IpAddr::from_str(addr) {
            Ok(IpAddr::V4(ip)) => {
                if ip.is_loopback() {
                    "loopback".to_string()
                } else if ip.is_private() {
                    "private".to_string()
                } else if ip.is_link_local() {
                    "link-local".to_string()
                } else if ip.is_multicast() {
                    "multicast".to_string()
                } else {
                    "public".to_string()
                }
            }
            Ok(IpAddr::V6(ip)) => {
                if ip.is_loopback() {
                    "loopback".to_string()
                } else if ip.is_multicast() {
                    "multicast".to_string()
                } else {
                    "public".to_string()
                }
            }
            Err(_) => String::new(),
        }
    }

    /// Resolve an address from the local cache only
    pub fn lookup_dns_name_local(&self, addr: &str) -> Option<String> {
        self.dns.get(addr).and_then(|names| names.first().cloned())
    }

    /// Resolve an address to all known names
    pub fn lookup_dns_names(&self, addr: &str) -> Vec<String> {
        self.dns.get(addr).cloned().unwrap_or_default()
    }

    /// Label for a fingerprint hash; empty when unknown
    pub fn lookup_ja3(&self, hash: &str) -> String {
        self.ja3_labels.get(hash).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::Resolvers;

    #[test]
    fn geolocation_classes() {
        let r = Resolvers::new();
        assert_eq!(r.lookup_geolocation("127.0.0.1"), "loopback");
        assert_eq!(r.lookup_geolocation("10.0.0.1"), "private");
        assert_eq!(r.lookup_geolocation("1.1.1.1"), "public");
        assert_eq!(r.lookup_geolocation("not-an-ip"), "");
    }

    #[test]
    fn dns_cache() {
        let mut r = Resolvers::new();
        r.add_dns_name("1.1.1.1", "one.one.one.one");
        assert_eq!(
            r.lookup_dns_name_local("1.1.1.1"),
            Some("one.one.one.one".to_string())
        );
        assert!(r.lookup_dns_names("8.8.8.8").is_empty());
    }
}
