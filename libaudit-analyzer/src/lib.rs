//! Passive traffic-audit pipeline: layer decoders, connection tracking,
//! per-address profiles, TCP/UDP stream reassembly and application-layer
//! artifact extraction.

#[macro_use]
extern crate log;

/// Schema version written into record headers.
pub const SCHEMA_VERSION: &str = "1.0";

mod analyzer;
mod artifacts;
mod config;
mod conn_tracker;
mod conversation;
mod counters;
mod dpi;
mod error;
mod http_decoder;
mod ip_defrag;
mod ip_profile;
mod layers;
mod packet_info;
mod records;
mod registry;
mod resolvers;
mod stats;
mod stream_decoders;
mod tcp_fsm;
mod tcp_reassembly;
mod tls;
mod udp_conversations;
mod writer;

pub use analyzer::Analyzer;
pub use artifacts::{sniff_content_type, ArtifactSink};
pub use config::PipelineConfig;
pub use conn_tracker::{ConnectionId, ConnectionTracker};
pub use conversation::{
    reverse_ident, sort_fragments, ConversationInfo, DataFragment, StreamData, StreamReader,
};
pub use counters::CounterHandle;
pub use dpi::{HeuristicClassifier, ProtocolClassifier, ProtocolLabel};
pub use error::PipelineError;
pub use http_decoder::HttpStreamDecoder;
pub use ip_defrag::{DefragEngine, Fragment, FragmentKey, Ipv4DefragEngine};
pub use ip_profile::IpProfileMap;
pub use layers::LayerType;
pub use packet_info::{LayerInfo, PacketInfo};
pub use records::*;
pub use registry::DecoderRegistry;
pub use resolvers::Resolvers;
pub use stats::{ReassemblyStats, StatsHandle};
pub use stream_decoders::{
    ConversationDecoder, DecoderFactory, StreamDecoder, StreamDecoderRegistry,
};
pub use tcp_fsm::{OptionCheckError, TcpDirection, TcpFsm, TcpFsmState, TcpOptionCheck};
pub use tcp_reassembly::{StreamKey, TcpReassembly};
pub use udp_conversations::UdpTracker;
pub use writer::{build_writer, RecordWriter, WriterConfig, WriterKind};
