//! HTTP stream decoder: the reference implementation of the stream-decoder
//! contract. Extracts requests, responses and response bodies from a merged
//! conversation.

use crate::artifacts::ArtifactSink;
use crate::conversation::ConversationInfo;
use crate::stream_decoders::{ConversationDecoder, DecoderFactory, StreamDecoder};
use std::sync::Arc;

const METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"];

fn starts_with_method(data: &[u8]) -> bool {
    METHODS
        .iter()
        .any(|m| data.starts_with(m.as_bytes()) && data.get(m.len()) == Some(&b' '))
}

pub struct HttpStreamDecoder;

struct HttpFactory;

static FACTORY: HttpFactory = HttpFactory;

impl StreamDecoder for HttpStreamDecoder {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    fn can_decode(&self, client_head: &[u8], server_head: &[u8]) -> bool {
        starts_with_method(client_head) || server_head.starts_with(b"HTTP/")
    }

    fn factory(&self) -> Option<&dyn DecoderFactory> {
        Some(&FACTORY)
    }
}

impl DecoderFactory for HttpFactory {
    fn new_decoder(
        &self,
        conv: ConversationInfo,
        sink: Arc<ArtifactSink>,
    ) -> Box<dyn ConversationDecoder> {
        Box::new(HttpConversationDecoder { conv, sink })
    }
}

#[derive(Debug, Default)]
struct HttpRequest {
    method: String,
    path: String,
    host: String,
}

#[derive(Debug, Default)]
struct HttpResponse {
    status: u16,
    content_type: String,
    content_encoding: Vec<String>,
    body: Vec<u8>,
}

pub struct HttpConversationDecoder {
    conv: ConversationInfo,
    sink: Arc<ArtifactSink>,
}

impl ConversationDecoder for HttpConversationDecoder {
    fn decode(&mut self) {
        let client = self.conv.client_data();
        let server = self.conv.server_data();

        let requests = parse_requests(&client);
        let responses = parse_responses(&server);
        debug!(
            "{}: {} requests, {} responses",
            self.conv.ident,
            requests.len(),
            responses.len()
        );

        // pair responses with requests positionally; unmatched responses
        // still produce artifacts under an empty name
        for (n, resp) in responses.iter().enumerate() {
            let (name, host) = match requests.get(n) {
                Some(req) => (file_name_for(&req.path), req.host.clone()),
                None => (String::new(), String::new()),
            };
            self.sink.save_file(
                &self.conv,
                "HTTP",
                &name,
                &resp.body,
                &resp.content_encoding,
                &host,
                &resp.content_type,
            );
        }
    }
}

fn file_name_for(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    path.rsplit('/').next().unwrap_or("").to_string()
}

fn parse_requests(data: &[u8]) -> Vec<HttpRequest> {
    let mut out = Vec::new();
    let text = String::from_utf8_lossy(data);
    let mut current: Option<HttpRequest> = None;
    for line in text.split("\r\n") {
        let mut words = line.split(' ');
        let first = words.next().unwrap_or("");
        if METHODS.contains(&first) {
            if let Some(req) = current.take() {
                out.push(req);
            }
            current = Some(HttpRequest {
                method: first.to_string(),
                path: words.next().unwrap_or("/").to_string(),
                host: String::new(),
            });
        } else if let Some(req) = current.as_mut() {
            if let Some(host) = header_value(line, "host") {
                req.host = host;
            }
        }
    }
    if let Some(req) = current.take() {
        out.push(req);
    }
    out
}

fn header_value(line: &str, name: &str) -> Option<String> {
    let (k, v) = line.split_once(':')?;
    if k.trim().eq_ignore_ascii_case(name) {
        Some(v.trim().to_string())
    } else {
        None
    }
}

fn parse_responses(data: &[u8]) -> Vec<HttpResponse> {
    let mut out = Vec::new();
    let mut rest = data;
    while let Some(pos) = find_subslice(rest, b"HTTP/") {
        rest = &rest[pos..];
        let header_end = match find_subslice(rest, b"\r\n\r\n") {
            Some(p) => p + 4,
            None => break,
        };
        let headers = String::from_utf8_lossy(&rest[..header_end]);
        let mut resp = HttpResponse::default();
        for (n, line) in headers.split("\r\n").enumerate() {
            if n == 0 {
                resp.status = line
                    .split(' ')
                    .nth(1)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                continue;
            }
            if let Some(v) = header_value(line, "content-type") {
                resp.content_type = v;
            } else if let Some(v) = header_value(line, "content-encoding") {
                resp.content_encoding = vec![v];
            }
        }
        let body_and_beyond = &rest[header_end..];
        // body extends to the next response start, or to the stream end
        let body_len = find_subslice(body_and_beyond, b"HTTP/").unwrap_or(body_and_beyond.len());
        resp.body = body_and_beyond[..body_len].to_vec();
        out.push(resp);
        rest = &body_and_beyond[body_len..];
    }
    out
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parsing() {
        let reqs =
            parse_requests(b"GET /a/b.txt HTTP/1.1\r\nHost: example.com\r\n\r\nGET /c HTTP/1.1\r\n\r\n");
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].method, "GET");
        assert_eq!(reqs[0].path, "/a/b.txt");
        assert_eq!(reqs[0].host, "example.com");
        assert_eq!(reqs[1].path, "/c");
    }

    #[test]
    fn response_parsing_with_body() {
        let resps = parse_responses(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nhello there",
        );
        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0].status, 200);
        assert_eq!(resps[0].content_type, "text/plain");
        assert_eq!(resps[0].body, b"hello there");
    }

    #[test]
    fn file_names() {
        assert_eq!(file_name_for("/a/b.txt"), "b.txt");
        assert_eq!(file_name_for("/a/b.txt?q=1"), "b.txt");
        assert_eq!(file_name_for("/"), "");
    }
}
