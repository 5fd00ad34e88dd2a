//! Application-layer stream decoders.
//!
//! A stream decoder inspects the first bytes of each direction to decide
//! whether it understands a conversation; its factory then produces a
//! per-conversation decoder instance. A per-port map accelerates the common
//! cases, falling back to a scan in registration order.

use crate::artifacts::ArtifactSink;
use crate::conversation::ConversationInfo;
use crate::http_decoder::HttpStreamDecoder;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-conversation decoder instance.
pub trait ConversationDecoder: Send {
    /// Process the merged conversation; called exactly once
    fn decode(&mut self);
}

/// Produces decoder instances bound to a conversation view.
pub trait DecoderFactory: Send + Sync {
    fn new_decoder(&self, conv: ConversationInfo, sink: Arc<ArtifactSink>)
        -> Box<dyn ConversationDecoder>;
}

/// A registered stream decoder.
pub trait StreamDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide from the first fragment of each direction whether this
    /// decoder understands the conversation.
    fn can_decode(&self, client_head: &[u8], server_head: &[u8]) -> bool;

    /// The decoder's factory; `None` marks a probe-only registration.
    fn factory(&self) -> Option<&dyn DecoderFactory>;
}

pub struct StreamDecoderRegistry {
    decoders: Vec<Arc<dyn StreamDecoder>>,
    by_port: HashMap<u16, usize>,
    sink: Arc<ArtifactSink>,
}

impl StreamDecoderRegistry {
    pub fn new(sink: Arc<ArtifactSink>) -> StreamDecoderRegistry {
        StreamDecoderRegistry {
            decoders: Vec::new(),
            by_port: HashMap::new(),
            sink,
        }
    }

    /// Registry with the bundled decoders and their default ports.
    pub fn with_defaults(sink: Arc<ArtifactSink>) -> StreamDecoderRegistry {
        let mut registry = StreamDecoderRegistry::new(sink);
        registry.register(Arc::new(HttpStreamDecoder), &[80, 8080]);
        registry
    }

    /// Register a decoder, optionally as the default for some server ports.
    pub fn register(&mut self, decoder: Arc<dyn StreamDecoder>, ports: &[u16]) {
        let idx = self.decoders.len();
        self.decoders.push(decoder);
        for port in ports {
            self.by_port.insert(*port, idx);
        }
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Select a decoder for a conversation: the port hint first, then all
    /// decoders in registration order. Returns the selected decoder's name
    /// and instance.
    pub fn select(
        &self,
        conv: &ConversationInfo,
    ) -> Option<(&'static str, Box<dyn ConversationDecoder>)> {
        let client_head = conv.head(crate::tcp_fsm::TcpDirection::ClientToServer);
        let server_head = conv.head(crate::tcp_fsm::TcpDirection::ServerToClient);

        if let Some(&idx) = self.by_port.get(&conv.server_port) {
            let d = &self.decoders[idx];
            if let Some(factory) = d.factory() {
                if d.can_decode(client_head, server_head) {
                    return Some((d.name(), factory.new_decoder(conv.clone(), self.sink.clone())));
                }
            }
        }

        for d in &self.decoders {
            if let Some(factory) = d.factory() {
                if d.can_decode(client_head, server_head) {
                    return Some((d.name(), factory.new_decoder(conv.clone(), self.sink.clone())));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::DataFragment;
    use crate::tcp_fsm::TcpDirection;

    fn http_conversation() -> ConversationInfo {
        ConversationInfo {
            data: vec![
                DataFragment {
                    dir: TcpDirection::ClientToServer,
                    data: b"GET / HTTP/1.0\r\n\r\n".to_vec(),
                    ts_nanos: 1,
                },
                DataFragment {
                    dir: TcpDirection::ServerToClient,
                    data: b"HTTP/1.0 200 OK\r\n\r\nhi".to_vec(),
                    ts_nanos: 2,
                },
            ],
            ident: "10.0.0.1:1234 -> 10.0.0.2:80".to_string(),
            server_port: 80,
            ..Default::default()
        }
    }

    #[test]
    fn http_is_selected_by_port_hint() {
        let sink = Arc::new(ArtifactSink::disabled());
        let registry = StreamDecoderRegistry::with_defaults(sink);
        let selected = registry.select(&http_conversation());
        assert_eq!(selected.map(|(name, _)| name), Some("HTTP"));
    }

    #[test]
    fn http_is_selected_on_other_ports_by_content() {
        let sink = Arc::new(ArtifactSink::disabled());
        let registry = StreamDecoderRegistry::with_defaults(sink);
        let mut conv = http_conversation();
        conv.server_port = 8099;
        let selected = registry.select(&conv);
        assert_eq!(selected.map(|(name, _)| name), Some("HTTP"));
    }

    #[test]
    fn binary_conversation_selects_nothing() {
        let sink = Arc::new(ArtifactSink::disabled());
        let registry = StreamDecoderRegistry::with_defaults(sink);
        let mut conv = http_conversation();
        conv.data[0].data = vec![0x00, 0x01, 0x02];
        conv.data[1].data = vec![0xff, 0xfe];
        assert!(registry.select(&conv).is_none());
    }
}
