//! Shared helpers for pipeline tests: synthetic frame construction and a
//! stream decoder that captures conversations for inspection.
#![allow(dead_code)]

use libaudit_analyzer::{
    ArtifactSink, ConversationDecoder, ConversationInfo, DecoderFactory, PipelineConfig,
    StreamDecoder, StreamDecoderRegistry, WriterKind,
};
use pnet_base::MacAddr;
use pnet_packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{self, MutableIpv4Packet};
use pnet_packet::tcp::{self, MutableTcpPacket};
use pnet_packet::udp::{self, MutableUdpPacket};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        writer_kind: WriterKind::Chan,
        ..Default::default()
    }
}

fn ethernet_header(buf: &mut [u8]) {
    let mut eth = MutableEthernetPacket::new(buf).expect("ethernet buffer");
    eth.set_source(MacAddr::new(2, 0, 0, 0, 0, 1));
    eth.set_destination(MacAddr::new(2, 0, 0, 0, 0, 2));
    eth.set_ethertype(EtherTypes::Ipv4);
}

fn ipv4_header(buf: &mut [u8], src: Ipv4Addr, dst: Ipv4Addr, proto: u8, total_len: u16) {
    let mut ip = MutableIpv4Packet::new(buf).expect("ipv4 buffer");
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_total_length(total_len);
    ip.set_ttl(64);
    ip.set_next_level_protocol(pnet_packet::ip::IpNextHeaderProtocol(proto));
    ip.set_source(src);
    ip.set_destination(dst);
    let checksum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);
}

/// Build a full Ethernet/IPv4/TCP frame.
#[allow(clippy::too_many_arguments)]
pub fn tcp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u16,
    payload: &[u8],
) -> Vec<u8> {
    let tcp_len = 20 + payload.len();
    let ip_len = 20 + tcp_len;
    let mut buf = vec![0u8; 14 + ip_len];
    ethernet_header(&mut buf);
    ipv4_header(
        &mut buf[14..],
        src,
        dst,
        IpNextHeaderProtocols::Tcp.0,
        ip_len as u16,
    );
    {
        let mut t = MutableTcpPacket::new(&mut buf[34..]).expect("tcp buffer");
        t.set_source(src_port);
        t.set_destination(dst_port);
        t.set_sequence(seq);
        t.set_acknowledgement(ack);
        t.set_data_offset(5);
        t.set_flags(flags);
        t.set_window(65535);
        t.set_payload(payload);
        let checksum = tcp::ipv4_checksum(&t.to_immutable(), &src, &dst);
        t.set_checksum(checksum);
    }
    buf
}

/// Build a full Ethernet/IPv4/UDP frame.
pub fn udp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp_len = 8 + payload.len();
    let ip_len = 20 + udp_len;
    let mut buf = vec![0u8; 14 + ip_len];
    ethernet_header(&mut buf);
    ipv4_header(
        &mut buf[14..],
        src,
        dst,
        IpNextHeaderProtocols::Udp.0,
        ip_len as u16,
    );
    {
        let mut u = MutableUdpPacket::new(&mut buf[34..]).expect("udp buffer");
        u.set_source(src_port);
        u.set_destination(dst_port);
        u.set_length(udp_len as u16);
        u.set_payload(payload);
        let checksum = udp::ipv4_checksum(&u.to_immutable(), &src, &dst);
        u.set_checksum(checksum);
    }
    buf
}

/// Conversations handed to the capture decoder.
#[derive(Default)]
pub struct Captured {
    pub conversations: Mutex<Vec<ConversationInfo>>,
}

impl Captured {
    pub fn decode_count(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }
}

/// Accepts every conversation and stores the view it was handed.
pub struct CaptureDecoder(pub Arc<Captured>);

impl StreamDecoder for CaptureDecoder {
    fn name(&self) -> &'static str {
        "Capture"
    }

    fn can_decode(&self, _client_head: &[u8], _server_head: &[u8]) -> bool {
        true
    }

    fn factory(&self) -> Option<&dyn DecoderFactory> {
        Some(self)
    }
}

impl DecoderFactory for CaptureDecoder {
    fn new_decoder(
        &self,
        conv: ConversationInfo,
        _sink: Arc<ArtifactSink>,
    ) -> Box<dyn ConversationDecoder> {
        Box::new(CaptureRun {
            conv,
            store: self.0.clone(),
        })
    }
}

struct CaptureRun {
    conv: ConversationInfo,
    store: Arc<Captured>,
}

impl ConversationDecoder for CaptureRun {
    fn decode(&mut self) {
        self.store.conversations.lock().unwrap().push(self.conv.clone());
    }
}

/// Registry with only the capture decoder, so every conversation lands in
/// the store.
pub fn capture_registry(store: Arc<Captured>) -> StreamDecoderRegistry {
    let mut registry = StreamDecoderRegistry::new(Arc::new(ArtifactSink::disabled()));
    registry.register(Arc::new(CaptureDecoder(store)), &[]);
    registry
}
