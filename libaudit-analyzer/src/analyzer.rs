//! Packet demultiplexer: walks a captured packet's layer stack, hands every
//! layer to the registered decoders, feeds the connection tracker and the
//! per-address profiles, and routes transport segments into the TCP
//! reassembler or the UDP conversation tracker.

use crate::artifacts::ArtifactSink;
use crate::config::PipelineConfig;
use crate::conn_tracker::ConnectionTracker;
use crate::counters::CounterHandle;
use crate::dpi::{HeuristicClassifier, ProtocolClassifier};
use crate::ip_profile::IpProfileMap;
use crate::layers::LayerType;
use crate::packet_info::{LayerInfo, PacketInfo};
use crate::registry::DecoderRegistry;
use crate::resolvers::Resolvers;
use crate::stats::StatsHandle;
use crate::stream_decoders::StreamDecoderRegistry;
use crate::tcp_reassembly::TcpReassembly;
use crate::udp_conversations::UdpTracker;
use crate::writer::{build_writer, WriterConfig, WriterKind};
use crossbeam_channel::Receiver;
use libaudit_tools::{CapturedFrame, Error, LayerFlow, ParseContext, PcapAnalyzer, Timestamp};
use pcap_parser::data::PacketData;
use pnet_packet::arp::ArpPacket;
use pnet_packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::tcp::TcpPacket;
use pnet_packet::udp::UdpPacket;
use std::cmp::min;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

pub struct Analyzer {
    config: PipelineConfig,
    registry: DecoderRegistry,
    conn_tracker: ConnectionTracker,
    profiles: IpProfileMap,
    tcp: TcpReassembly,
    udp: UdpTracker,
    artifacts: Arc<ArtifactSink>,
    stats: StatsHandle,
    metrics: CounterHandle,
    /// record streams, populated when the channel sink is selected
    channels: HashMap<String, Receiver<String>>,
    packet_count: u64,
}

impl Analyzer {
    pub fn new(config: PipelineConfig) -> Result<Analyzer, Error> {
        let resolvers = Arc::new(Resolvers::new());
        let classifier: Arc<dyn ProtocolClassifier> = Arc::new(HeuristicClassifier);
        Analyzer::with_parts(config, resolvers, classifier, None)
    }

    /// Full-control constructor: custom resolvers, classifier and stream
    /// decoders.
    pub fn with_parts(
        config: PipelineConfig,
        resolvers: Arc<Resolvers>,
        classifier: Arc<dyn ProtocolClassifier>,
        stream_decoders: Option<StreamDecoderRegistry>,
    ) -> Result<Analyzer, Error> {
        let metrics = CounterHandle::new();
        let stats = StatsHandle::new();
        let mut channels = HashMap::new();

        let mut make_writer = |name: &str| -> Result<_, Error> {
            let wcfg = WriterConfig::new(config.writer_kind, &config.out, name);
            let (writer, rx) =
                build_writer(&wcfg).map_err(|e| sink_error("writer construction", &e))?;
            if let Some(rx) = rx {
                channels.insert(name.to_string(), rx);
            }
            Ok(writer)
        };

        let conn_writer = make_writer("Connection")?;
        let profile_writer = make_writer("IPProfile")?;
        let conv_writer = make_writer("Conversation")?;
        let banner_writer = make_writer("ServiceBanner")?;
        let udp_writer = make_writer("UDPConversation")?;
        let file_writer = make_writer("File")?;

        let mut registry = DecoderRegistry::new(&config, metrics.clone())
            .map_err(|e| sink_error("decoder registry", &e))?;
        for (name, rx) in registry.take_channels() {
            channels.insert(name, rx);
        }

        let artifacts = Arc::new(ArtifactSink::new(
            &config.out,
            &config.file_storage,
            file_writer,
            config.export_metrics,
            metrics.clone(),
        ));
        let stream_decoders = Arc::new(
            stream_decoders
                .unwrap_or_else(|| StreamDecoderRegistry::with_defaults(artifacts.clone())),
        );

        let conn_tracker = ConnectionTracker::new(
            conn_writer,
            config.conn_timeout,
            config.export_metrics,
            metrics.clone(),
        );
        let profiles = IpProfileMap::new(
            profile_writer,
            config.export_metrics,
            config.local_dns,
            metrics.clone(),
            resolvers,
            classifier,
        );
        let tcp = TcpReassembly::new(
            config.clone(),
            stats.clone(),
            metrics.clone(),
            stream_decoders.clone(),
            conv_writer,
            banner_writer,
        );
        let udp = UdpTracker::new(
            udp_writer,
            config.udp_timeout,
            stream_decoders,
            stats.clone(),
            metrics.clone(),
            config.export_metrics,
        );

        Ok(Analyzer {
            config,
            registry,
            conn_tracker,
            profiles,
            tcp,
            udp,
            artifacts,
            stats,
            metrics,
            channels,
            packet_count: 0,
        })
    }

    pub fn metrics(&self) -> &CounterHandle {
        &self.metrics
    }

    pub fn stats(&self) -> &StatsHandle {
        &self.stats
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.conn_tracker
    }

    pub fn profiles(&self) -> &IpProfileMap {
        &self.profiles
    }

    /// Record stream for a type, when the channel sink is active
    pub fn channel(&self, name: &str) -> Option<&Receiver<String>> {
        self.channels.get(name)
    }

    /// Dispatch one raw frame. `ts` and `pcap_index` come from the capture.
    pub fn handle_l2(&mut self, ts: Timestamp, pcap_index: usize, data: &[u8]) {
        let eth = match EthernetPacket::new(data) {
            Some(eth) => eth,
            None => {
                self.metrics.inc_error("l2-decode", "truncated ethernet frame");
                return;
            }
        };
        let mut info = PacketInfo::new(ts, pcap_index, data);
        info.src_mac = Some(eth.get_source());
        info.dst_mac = Some(eth.get_destination());
        info.link = Some(LayerInfo {
            layer_type: LayerType::Ethernet,
            flow: LayerFlow::new(&eth.get_source().octets(), &eth.get_destination().octets()),
            data,
        });
        if data.len() > 14 {
            self.resolve_l3(&mut info, &data[14..], eth.get_ethertype());
        }
        self.process(info);
    }

    /// Dispatch a frame that starts at the network layer.
    pub fn handle_l3(
        &mut self,
        ts: Timestamp,
        pcap_index: usize,
        data: &[u8],
        ethertype: EtherType,
    ) {
        let mut info = PacketInfo::new(ts, pcap_index, data);
        self.resolve_l3(&mut info, data, ethertype);
        self.process(info);
    }

    fn resolve_l3<'a>(&mut self, info: &mut PacketInfo<'a>, data: &'a [u8], ethertype: EtherType) {
        if data.is_empty() {
            return;
        }
        match ethertype {
            EtherTypes::Ipv4 => {
                let ipv4 = match Ipv4Packet::new(data) {
                    Some(p) => p,
                    None => {
                        self.metrics.inc_error("l3-decode", "truncated IPv4 header");
                        return;
                    }
                };
                // drop link-layer padding
                let total_len = ipv4.get_total_length() as usize;
                let data = if total_len > 0 && total_len < data.len() {
                    &data[..total_len]
                } else {
                    data
                };
                let ipv4 = match Ipv4Packet::new(data) {
                    Some(p) => p,
                    None => return,
                };
                info.network = Some(LayerInfo {
                    layer_type: LayerType::Ipv4,
                    flow: LayerFlow::new(&ipv4.get_source().octets(), &ipv4.get_destination().octets()),
                    data,
                });
                info.endpoints.src.addr = IpAddr::V4(ipv4.get_source());
                info.endpoints.dst.addr = IpAddr::V4(ipv4.get_destination());
                info.endpoints.proto = ipv4.get_next_level_protocol().0;
                // non-first fragments carry no transport header
                if ipv4.get_fragment_offset() > 0 {
                    return;
                }
                let header_len = min(ipv4.get_header_length() as usize * 4, data.len());
                self.resolve_l4(
                    info,
                    &data[header_len..],
                    ipv4.get_next_level_protocol(),
                );
            }
            EtherTypes::Ipv6 => {
                let ipv6 = match Ipv6Packet::new(data) {
                    Some(p) => p,
                    None => {
                        self.metrics.inc_error("l3-decode", "truncated IPv6 header");
                        return;
                    }
                };
                info.network = Some(LayerInfo {
                    layer_type: LayerType::Ipv6,
                    flow: LayerFlow::new(&ipv6.get_source().octets(), &ipv6.get_destination().octets()),
                    data,
                });
                info.endpoints.src.addr = IpAddr::V6(ipv6.get_source());
                info.endpoints.dst.addr = IpAddr::V6(ipv6.get_destination());
                if data.len() > 40 {
                    self.resolve_l4(info, &data[40..], ipv6.get_next_header());
                }
            }
            EtherTypes::Arp => {
                if let Some(arp) = ArpPacket::new(data) {
                    info.network = Some(LayerInfo {
                        layer_type: LayerType::Arp,
                        flow: LayerFlow::new(
                            &arp.get_sender_proto_addr().octets(),
                            &arp.get_target_proto_addr().octets(),
                        ),
                        data,
                    });
                }
            }
            e => {
                trace!("unhandled ethertype 0x{:04x}", e.0);
            }
        }
    }

    fn resolve_l4<'a>(
        &mut self,
        info: &mut PacketInfo<'a>,
        data: &'a [u8],
        proto: IpNextHeaderProtocol,
    ) {
        if data.is_empty() {
            return;
        }
        info.endpoints.proto = proto.0;
        match proto {
            IpNextHeaderProtocols::Tcp => {
                if let Some(tcp) = TcpPacket::new(data) {
                    info.endpoints.src.port = tcp.get_source();
                    info.endpoints.dst.port = tcp.get_destination();
                    info.transport = Some(LayerInfo {
                        layer_type: LayerType::Tcp,
                        flow: LayerFlow::new(
                            &tcp.get_source().to_be_bytes(),
                            &tcp.get_destination().to_be_bytes(),
                        ),
                        data,
                    });
                    let offset = tcp.get_data_offset() as usize * 4;
                    if offset >= 20 && offset <= data.len() {
                        info.app_payload = Some(&data[offset..]);
                    }
                }
            }
            IpNextHeaderProtocols::Udp => {
                if let Some(udp) = UdpPacket::new(data) {
                    info.endpoints.src.port = udp.get_source();
                    info.endpoints.dst.port = udp.get_destination();
                    info.transport = Some(LayerInfo {
                        layer_type: LayerType::Udp,
                        flow: LayerFlow::new(
                            &udp.get_source().to_be_bytes(),
                            &udp.get_destination().to_be_bytes(),
                        ),
                        data,
                    });
                    if data.len() > 8 {
                        info.app_payload = Some(&data[8..]);
                    }
                }
            }
            IpNextHeaderProtocols::Icmp => {
                info.transport = Some(LayerInfo {
                    layer_type: LayerType::Icmpv4,
                    flow: LayerFlow::default(),
                    data,
                });
            }
            IpNextHeaderProtocols::Icmpv6 => {
                info.transport = Some(LayerInfo {
                    layer_type: LayerType::Icmpv6,
                    flow: LayerFlow::default(),
                    data,
                });
            }
            p => {
                trace!("unhandled transport protocol {}", p.0);
            }
        }
    }

    /// Fan the resolved packet out to decoders, trackers and reassembly.
    fn process(&mut self, info: PacketInfo) {
        self.packet_count += 1;

        if let Err(e) = self.registry.dispatch(&info) {
            // a sink rejecting a record means corrupt output; count it and
            // surface the failure at teardown
            error!("layer decoder dispatch failed: {}", e);
            self.metrics.inc_error("io-write", &e.to_string());
        }

        self.conn_tracker.update(&info);

        if info.network.is_some() {
            let src = info.endpoints.src.addr.to_string();
            let dst = info.endpoints.dst.addr.to_string();
            self.profiles.update(&src, &info, true);
            self.profiles.update(&dst, &info, false);
        }

        match info.transport.as_ref().map(|t| t.layer_type) {
            Some(LayerType::Tcp) => self.tcp.handle_packet(&info),
            Some(LayerType::Udp) => {
                self.udp.handle_packet(&info);
                self.udp.sweep(info.ts_nanos);
            }
            // TCP continuation fragments still need to reach the defragger
            None if self.config.defrag_ipv4
                && info.endpoints.proto == IpNextHeaderProtocols::Tcp.0
                && info
                    .network
                    .as_ref()
                    .map_or(false, |n| n.layer_type == LayerType::Ipv4) =>
            {
                self.tcp.handle_packet(&info)
            }
            _ => (),
        }

        if self.config.flush_every > 0 && self.packet_count % self.config.flush_every == 0 {
            self.conn_tracker.flush_idle(info.ts_nanos);
        }
    }
}

fn sink_error(what: &str, e: &crate::error::PipelineError) -> Error {
    error!("{} failed: {}", what, e);
    Error::Generic("pipeline initialization failed")
}

impl PcapAnalyzer for Analyzer {
    fn init(&mut self) -> Result<(), Error> {
        info!("pipeline ready ({} layer decoders)", self.registry.num_decoders());
        Ok(())
    }

    fn handle_frame(&mut self, frame: &CapturedFrame, _ctx: &ParseContext) -> Result<(), Error> {
        match &frame.data {
            PacketData::L2(data) => {
                let datalen = min(frame.caplen as usize, data.len());
                self.handle_l2(frame.ts, frame.pcap_index, &data[..datalen]);
            }
            PacketData::L3(ethertype, data) => {
                self.handle_l3(frame.ts, frame.pcap_index, data, EtherType(*ethertype));
            }
            _ => {
                warn!("unsupported packet data layer");
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        debug!("tearing down pipeline after {} packets", self.packet_count);
        if let Err(e) = self.conn_tracker.teardown() {
            error!("connection tracker teardown failed: {}", e);
        }
        if let Err(e) = self.profiles.teardown() {
            error!("profile aggregator teardown failed: {}", e);
        }
        self.tcp.teardown();
        self.udp.teardown();
        self.artifacts.teardown();
        for (name, size, records) in self.registry.teardown() {
            debug!("closed {} ({} bytes, {} records)", name, size, records);
        }
        let errors = self.metrics.error_snapshot();
        if !errors.is_empty() {
            info!("error summary:");
            for (subject, count) in errors {
                info!("  {}: {}", subject, count);
            }
        }
    }
}
