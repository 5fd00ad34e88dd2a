//! Artifact extraction: persist reconstructed payload bodies to disk and
//! emit `File` records.
//!
//! Layout: `<out>/<file_storage>/<content-type>/<name>-<ident>[-N]<ext>`.
//! Bodies are decoded (gzip/deflate/base64) before the final content-type
//! sniff; the file is renamed when the detected type changes.

use crate::conversation::ConversationInfo;
use crate::counters::CounterHandle;
use crate::records::{AuditRecord, FileRecord};
use crate::writer::RecordWriter;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Best-effort content sniffing from magic bytes.
pub fn sniff_content_type(body: &[u8]) -> &'static str {
    if body.starts_with(b"\x1f\x8b") {
        "application/gzip"
    } else if body.starts_with(b"%PDF") {
        "application/pdf"
    } else if body.starts_with(b"\x89PNG") {
        "image/png"
    } else if body.starts_with(b"\xff\xd8\xff") {
        "image/jpeg"
    } else if body.starts_with(b"GIF8") {
        "image/gif"
    } else if body.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else if body.starts_with(b"<!DOCTYPE") || body.starts_with(b"<html") {
        "text/html"
    } else if body.starts_with(b"{") || body.starts_with(b"[") {
        "application/json"
    } else if body.iter().take(512).all(|b| b.is_ascii()) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "application/gzip" => ".gz",
        "application/pdf" => ".pdf",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "application/zip" => ".zip",
        "text/html" => ".html",
        "application/json" => ".json",
        "text/plain" => ".txt",
        _ => ".bin",
    }
}

/// Strip characters that are unsafe in file names from an identifier.
fn clean_ident(ident: &str) -> String {
    ident
        .chars()
        .map(|c| match c {
            '/' | '\\' | ' ' | ':' => '-',
            '>' => '-',
            c => c,
        })
        .collect()
}

/// Destination for extracted artifacts. Disabled when no storage directory
/// is configured: records are still emitted, bodies are dropped.
pub struct ArtifactSink {
    root: Option<PathBuf>,
    writer: Mutex<Option<Box<dyn RecordWriter>>>,
    num_written: AtomicI64,
    export: bool,
    metrics: CounterHandle,
}

impl ArtifactSink {
    pub fn new(
        out: &Path,
        file_storage: &str,
        writer: Box<dyn RecordWriter>,
        export: bool,
        metrics: CounterHandle,
    ) -> ArtifactSink {
        let root = if file_storage.is_empty() {
            None
        } else {
            Some(out.join(file_storage))
        };
        ArtifactSink {
            root,
            writer: Mutex::new(Some(writer)),
            num_written: AtomicI64::new(0),
            export,
            metrics,
        }
    }

    /// A sink that never touches the filesystem and drops records.
    pub fn disabled() -> ArtifactSink {
        ArtifactSink {
            root: None,
            writer: Mutex::new(None),
            num_written: AtomicI64::new(0),
            export: false,
            metrics: CounterHandle::new(),
        }
    }

    pub fn num_written(&self) -> i64 {
        self.num_written.load(Ordering::SeqCst)
    }

    /// Decode and persist one extracted body, then emit its record.
    pub fn save_file(
        &self,
        conv: &ConversationInfo,
        source: &str,
        name: &str,
        body: &[u8],
        encoding: &[String],
        host: &str,
        content_type: &str,
    ) {
        if body.is_empty() {
            return;
        }
        let name = if name.is_empty() || name == "/" {
            "unknown"
        } else {
            name
        };

        let decoded = decode_body(body, encoding);
        let detected = sniff_content_type(&decoded);
        let hash = format!("{:x}", md5::compute(&decoded));

        let location = match &self.root {
            Some(root) => {
                match write_to_storage(root, detected, name, &conv.ident, &decoded) {
                    Ok(path) => path.display().to_string(),
                    Err(e) => {
                        warn!("failed to save artifact {}: {}", name, e);
                        self.metrics.inc_error("save-file", &e.to_string());
                        String::new()
                    }
                }
            }
            None => String::new(),
        };

        let provided = if content_type.is_empty() {
            sniff_content_type(body)
        } else {
            content_type
        };

        let record = FileRecord {
            timestamp: conv.first_client_packet,
            name: name.to_string(),
            length: decoded.len() as i64,
            hash,
            location,
            ident: conv.ident.clone(),
            source: source.to_string(),
            content_type: provided.to_string(),
            content_type_detected: detected.to_string(),
            src_ip: conv.client_ip.clone(),
            dst_ip: conv.server_ip.clone(),
            src_port: conv.client_port,
            dst_port: conv.server_port,
            host: host.to_string(),
        };
        if self.export {
            record.inc(&self.metrics);
        }
        let mut guard = self.writer.lock().unwrap();
        if let Some(writer) = guard.as_mut() {
            if let Err(e) = writer.write(&record) {
                error!("failed to write file record: {}", e);
                self.metrics.inc_error("io-write", &e.to_string());
            } else {
                self.num_written.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub fn teardown(&self) {
        let num = self.num_written.load(Ordering::SeqCst);
        let mut guard = self.writer.lock().unwrap();
        if let Some(writer) = guard.as_mut() {
            if let Err(e) = writer.close(num) {
                warn!("failed to close artifact writer: {}", e);
            }
        }
        *guard = None;
    }
}

/// Apply transfer encodings. A failed decode falls back to the raw body.
fn decode_body(body: &[u8], encoding: &[String]) -> Vec<u8> {
    match encoding.first().map(|s| s.as_str()) {
        Some("gzip") | Some("deflate") => {
            let mut out = Vec::new();
            let mut reader = GzDecoder::new(body);
            match reader.read_to_end(&mut out) {
                Ok(_) => out,
                Err(_) => body.to_vec(),
            }
        }
        Some("base64") => base64::decode(body).unwrap_or_else(|_| body.to_vec()),
        _ => body.to_vec(),
    }
}

/// Write the body under the content-type directory, avoiding collisions
/// with a numeric suffix.
fn write_to_storage(
    root: &Path,
    content_type: &str,
    name: &str,
    ident: &str,
    body: &[u8],
) -> std::io::Result<PathBuf> {
    let dir = root.join(content_type);
    std::fs::create_dir_all(&dir)?;

    let ext = extension_for(content_type);
    let base = format!("{}-{}", name, clean_ident(ident));
    let base = if base.len() > 250 { &base[..250] } else { &base };

    let mut target = dir.join(format!("{}{}", base, ext));
    let mut n = 0;
    while target.exists() {
        target = dir.join(format!("{}-{}{}", base, n, ext));
        n += 1;
    }
    std::fs::write(&target, body)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffing_basics() {
        assert_eq!(sniff_content_type(b"%PDF-1.4"), "application/pdf");
        assert_eq!(sniff_content_type(b"\x89PNG\r\n"), "image/png");
        assert_eq!(sniff_content_type(b"hello world"), "text/plain");
        assert_eq!(sniff_content_type(&[0x00, 0x81, 0xff]), "application/octet-stream");
    }

    #[test]
    fn ident_cleaning() {
        assert_eq!(
            clean_ident("10.0.0.1:80 -> 10.0.0.2:1234"),
            "10.0.0.1-80----10.0.0.2-1234"
        );
    }

    #[test]
    fn disabled_sink_drops_everything() {
        let sink = ArtifactSink::disabled();
        let conv = ConversationInfo::default();
        sink.save_file(&conv, "test", "x", b"body", &[], "", "");
        assert_eq!(sink.num_written(), 0);
    }
}
