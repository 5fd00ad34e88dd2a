//! TLS handshake inspection: server name extraction and handshake
//! fingerprints (hex MD5 digests of normalized hello parameters).

use tls_parser::{
    parse_tls_extensions, parse_tls_plaintext, TlsExtension, TlsExtensionType, TlsMessage,
    TlsMessageHandshake,
};

/// Fields extracted from a TLS ClientHello.
#[derive(Clone, Debug, Default)]
pub struct ClientHelloInfo {
    pub sni: String,
    pub ja3: String,
}

/// Try to parse the payload as a TLS record carrying a ClientHello.
pub fn parse_client_hello(payload: &[u8]) -> Option<ClientHelloInfo> {
    let (_, record) = parse_tls_plaintext(payload).ok()?;
    for msg in &record.msg {
        if let TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) = msg {
            let mut sni = String::new();
            let mut ext_ids = Vec::new();
            let mut curves = Vec::new();
            let mut point_fmts = Vec::new();
            if let Some(ext_data) = ch.ext {
                if let Ok((_, exts)) = parse_tls_extensions(ext_data) {
                    for ext in &exts {
                        ext_ids.push(TlsExtensionType::from(ext).0);
                        match ext {
                            TlsExtension::SNI(names) => {
                                if let Some((_, name)) = names.first() {
                                    sni = String::from_utf8_lossy(name).to_string();
                                }
                            }
                            TlsExtension::EllipticCurves(groups) => {
                                curves = groups.iter().map(|g| g.0).collect();
                            }
                            TlsExtension::EcPointFormats(fmts) => {
                                point_fmts = fmts.to_vec();
                            }
                            _ => (),
                        }
                    }
                }
            }
            let ja3 = digest(
                ch.version.0,
                &ch.ciphers.iter().map(|c| c.0).collect::<Vec<_>>(),
                &ext_ids,
                &curves,
                &point_fmts,
            );
            return Some(ClientHelloInfo { sni, ja3 });
        }
    }
    None
}

/// Fingerprint of a TLS ServerHello, the server-side counterpart of the
/// client fingerprint.
pub fn parse_server_hello_digest(payload: &[u8]) -> Option<String> {
    let (_, record) = parse_tls_plaintext(payload).ok()?;
    for msg in &record.msg {
        if let TlsMessage::Handshake(TlsMessageHandshake::ServerHello(sh)) = msg {
            let mut ext_ids = Vec::new();
            if let Some(ext_data) = sh.ext {
                if let Ok((_, exts)) = parse_tls_extensions(ext_data) {
                    for ext in &exts {
                        ext_ids.push(TlsExtensionType::from(ext).0);
                    }
                }
            }
            let fields = format!(
                "{},{},{}",
                sh.version.0,
                sh.cipher.0,
                join_dashed(&ext_ids)
            );
            return Some(format!("{:x}", md5::compute(fields)));
        }
    }
    None
}

fn join_dashed(values: &[u16]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn digest(version: u16, ciphers: &[u16], exts: &[u16], curves: &[u16], point_fmts: &[u8]) -> String {
    let fields = format!(
        "{},{},{},{},{}",
        version,
        join_dashed(ciphers),
        join_dashed(exts),
        join_dashed(curves),
        point_fmts
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("-")
    );
    format!("{:x}", md5::compute(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a minimal but well-formed ClientHello record with an SNI
    /// extension.
    pub(crate) fn build_client_hello(server_name: &str) -> Vec<u8> {
        let name = server_name.as_bytes();

        // server_name extension body: list length, type 0 (host_name), name
        let mut sni_list = Vec::new();
        sni_list.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        sni_list.push(0);
        sni_list.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni_list.extend_from_slice(name);

        let mut extensions = Vec::new();
        extensions.extend_from_slice(&0u16.to_be_bytes()); // type: server_name
        extensions.extend_from_slice(&(sni_list.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&sni_list);

        let mut body = Vec::new();
        body.extend_from_slice(&0x0303u16.to_be_bytes()); // client version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session id length
        body.extend_from_slice(&2u16.to_be_bytes()); // cipher suites length
        body.extend_from_slice(&0x002fu16.to_be_bytes());
        body.push(1); // compression methods length
        body.push(0);
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = Vec::new();
        handshake.push(1); // handshake type: client hello
        let len = body.len() as u32;
        handshake.extend_from_slice(&len.to_be_bytes()[1..]); // u24 length
        handshake.extend_from_slice(&body);

        let mut record = Vec::new();
        record.push(0x16); // content type: handshake
        record.extend_from_slice(&0x0301u16.to_be_bytes());
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn client_hello_sni_and_digest() {
        let record = build_client_hello("example.com");
        let info = parse_client_hello(&record).expect("client hello");
        assert_eq!(info.sni, "example.com");
        assert_eq!(info.ja3.len(), 32);
    }

    #[test]
    fn garbage_is_not_a_client_hello() {
        assert!(parse_client_hello(b"GET / HTTP/1.0\r\n\r\n").is_none());
        assert!(parse_client_hello(&[]).is_none());
    }

    #[test]
    fn digest_is_stable() {
        let r1 = build_client_hello("example.com");
        let r2 = build_client_hello("example.com");
        let d1 = parse_client_hello(&r1).unwrap().ja3;
        let d2 = parse_client_hello(&r2).unwrap().ja3;
        assert_eq!(d1, d2);
    }
}
