//! Layer-decoder registry.
//!
//! Maps a layer type to the decoder instances registered for it. Each
//! decoder owns its record writer and counter; dispatch hands every resolved
//! layer of a packet to its decoders in registration order.

use crate::config::PipelineConfig;
use crate::counters::CounterHandle;
use crate::error::PipelineError;
use crate::layers::LayerType;
use crate::packet_info::{LayerInfo, PacketInfo};
use crate::records::*;
use crate::writer::{build_writer, RecordWriter, WriterConfig};
use crossbeam_channel::Receiver;
use multimap::MultiMap;
use pnet_packet::arp::ArpPacket;
use pnet_packet::ethernet::EthernetPacket;
use pnet_packet::icmp::IcmpPacket;
use pnet_packet::icmpv6::Icmpv6Packet;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::tcp::{TcpFlags, TcpPacket};
use pnet_packet::udp::UdpPacket;
use pnet_packet::Packet as PnetPacket;

/// Produce a record for one resolved layer, or nothing.
pub type LayerHandler = fn(&PacketInfo, &LayerInfo) -> Option<Box<dyn AuditRecord>>;

struct DecoderSpec {
    layer: LayerType,
    description: &'static str,
    handler: LayerHandler,
    header: fn() -> Vec<&'static str>,
}

/// One registered decoder instance with its private sink.
pub struct LayerDecoder {
    pub layer: LayerType,
    handler: LayerHandler,
    writer: Box<dyn RecordWriter>,
    num_records: i64,
    export: bool,
}

impl LayerDecoder {
    /// Run the handler for a layer; write, count and export the record if
    /// one was produced.
    fn decode(
        &mut self,
        info: &PacketInfo,
        layer: &LayerInfo,
        metrics: &CounterHandle,
    ) -> Result<(), PipelineError> {
        if let Some(mut record) = (self.handler)(info, layer) {
            let ctx = PacketContext {
                src_ip: info.endpoints.src.addr.to_string(),
                dst_ip: info.endpoints.dst.addr.to_string(),
                src_port: info.endpoints.src.port,
                dst_port: info.endpoints.dst.port,
            };
            record.set_packet_context(&ctx);
            self.writer.write(record.as_ref())?;
            self.num_records += 1;
            if self.export {
                record.inc(metrics);
            }
        }
        Ok(())
    }
}

/// All registered layer decoders, with per-layer dispatch.
pub struct DecoderRegistry {
    decoders: MultiMap<LayerType, LayerDecoder>,
    metrics: CounterHandle,
    channels: Vec<(String, Receiver<String>)>,
}

fn default_decoders() -> Vec<DecoderSpec> {
    vec![
        DecoderSpec {
            layer: LayerType::Ethernet,
            description: "Ethernet II frames",
            handler: decode_ethernet,
            header: || EthernetRecord::default().csv_header(),
        },
        DecoderSpec {
            layer: LayerType::Arp,
            description: "Address resolution protocol",
            handler: decode_arp,
            header: || ArpRecord::default().csv_header(),
        },
        DecoderSpec {
            layer: LayerType::Ipv4,
            description: "Internet protocol version 4",
            handler: decode_ipv4,
            header: || Ipv4Record::default().csv_header(),
        },
        DecoderSpec {
            layer: LayerType::Ipv6,
            description: "Internet protocol version 6",
            handler: decode_ipv6,
            header: || Ipv6Record::default().csv_header(),
        },
        DecoderSpec {
            layer: LayerType::Icmpv4,
            description: "Internet control message protocol",
            handler: decode_icmpv4,
            header: || Icmpv4Record::default().csv_header(),
        },
        DecoderSpec {
            layer: LayerType::Icmpv6,
            description: "Internet control message protocol v6",
            handler: decode_icmpv6,
            header: || Icmpv6Record::default().csv_header(),
        },
        DecoderSpec {
            layer: LayerType::Tcp,
            description: "Transmission control protocol",
            handler: decode_tcp,
            header: || TcpRecord::default().csv_header(),
        },
        DecoderSpec {
            layer: LayerType::Udp,
            description: "User datagram protocol",
            handler: decode_udp,
            header: || UdpRecord::default().csv_header(),
        },
    ]
}

/// Split a comma-separated decoder name list, validating every name.
fn parse_name_list(list: &str) -> Result<Vec<LayerType>, PipelineError> {
    let mut out = Vec::new();
    for name in list.split(',') {
        if name.is_empty() {
            continue;
        }
        match LayerType::from_name(name) {
            Some(l) => out.push(l),
            None => return Err(PipelineError::InvalidDecoder(name.to_string())),
        }
    }
    Ok(out)
}

impl DecoderRegistry {
    /// Build the registry: apply include/exclude selection to the default
    /// decoder set, provision a writer per enabled decoder and write the
    /// header rows.
    pub fn new(config: &PipelineConfig, metrics: CounterHandle) -> Result<Self, PipelineError> {
        let include = parse_name_list(&config.include_decoders)?;
        let exclude = parse_name_list(&config.exclude_decoders)?;

        let mut selection = default_decoders();
        if !include.is_empty() {
            selection.retain(|spec| include.contains(&spec.layer));
        }
        selection.retain(|spec| !exclude.contains(&spec.layer));

        let mut decoders = MultiMap::new();
        let mut channels = Vec::new();
        for spec in selection {
            let wcfg = WriterConfig::new(config.writer_kind, &config.out, spec.layer.name());
            let (mut writer, rx) = build_writer(&wcfg)?;
            if let Some(rx) = rx {
                channels.push((spec.layer.name().to_string(), rx));
            }
            writer.write_header(spec.layer.name(), &(spec.header)())?;
            trace!("registered {} decoder ({})", spec.layer, spec.description);
            decoders.insert(
                spec.layer,
                LayerDecoder {
                    layer: spec.layer,
                    handler: spec.handler,
                    writer,
                    num_records: 0,
                    export: config.export_metrics,
                },
            );
        }
        info!("initialized {} layer decoders", decoders.len());
        Ok(DecoderRegistry {
            decoders,
            metrics,
            channels,
        })
    }

    /// Hand out the record streams of channel-backed sinks.
    pub fn take_channels(&mut self) -> Vec<(String, Receiver<String>)> {
        std::mem::take(&mut self.channels)
    }

    /// Dispatch every resolved layer of the packet to its decoders.
    pub fn dispatch(&mut self, info: &PacketInfo) -> Result<(), PipelineError> {
        let layers = [&info.link, &info.network, &info.transport];
        for layer in layers.iter().filter_map(|l| l.as_ref()) {
            if let Some(decoders) = self.decoders.get_vec_mut(&layer.layer_type) {
                for dec in decoders {
                    dec.decode(info, layer, &self.metrics)?;
                }
            }
        }
        Ok(())
    }

    pub fn num_decoders(&self) -> usize {
        self.decoders.iter_all().map(|(_, v)| v.len()).sum()
    }

    /// Close all writers; returns `(name, bytes, records)` per decoder.
    pub fn teardown(&mut self) -> Vec<(String, u64, i64)> {
        let mut out = Vec::new();
        for (_, decoders) in self.decoders.iter_all_mut() {
            for dec in decoders {
                match dec.writer.close(dec.num_records) {
                    Ok((name, size)) => out.push((name, size, dec.num_records)),
                    Err(e) => warn!("failed to close writer for {}: {}", dec.layer, e),
                }
            }
        }
        out
    }
}

fn tcp_flags_string(flags: u16) -> String {
    let mut s = String::new();
    for (bit, c) in [
        (TcpFlags::FIN, 'F'),
        (TcpFlags::SYN, 'S'),
        (TcpFlags::RST, 'R'),
        (TcpFlags::PSH, 'P'),
        (TcpFlags::ACK, 'A'),
        (TcpFlags::URG, 'U'),
        (TcpFlags::ECE, 'E'),
        (TcpFlags::CWR, 'C'),
    ]
    .iter()
    {
        if flags & bit != 0 {
            s.push(*c);
        }
    }
    s
}

fn decode_ethernet(info: &PacketInfo, layer: &LayerInfo) -> Option<Box<dyn AuditRecord>> {
    let eth = EthernetPacket::new(layer.data)?;
    Some(Box::new(EthernetRecord {
        timestamp: info.ts_nanos,
        src_mac: eth.get_source().to_string(),
        dst_mac: eth.get_destination().to_string(),
        ethertype: eth.get_ethertype().0,
        payload_size: eth.payload().len(),
        ..Default::default()
    }))
}

fn decode_arp(info: &PacketInfo, layer: &LayerInfo) -> Option<Box<dyn AuditRecord>> {
    let arp = ArpPacket::new(layer.data)?;
    Some(Box::new(ArpRecord {
        timestamp: info.ts_nanos,
        operation: arp.get_operation().0,
        src_hw_addr: arp.get_sender_hw_addr().to_string(),
        dst_hw_addr: arp.get_target_hw_addr().to_string(),
        src_proto_addr: arp.get_sender_proto_addr().to_string(),
        dst_proto_addr: arp.get_target_proto_addr().to_string(),
    }))
}

fn decode_ipv4(info: &PacketInfo, layer: &LayerInfo) -> Option<Box<dyn AuditRecord>> {
    let ip = Ipv4Packet::new(layer.data)?;
    Some(Box::new(Ipv4Record {
        timestamp: info.ts_nanos,
        ihl: ip.get_header_length(),
        tos: ip.get_dscp() << 2 | ip.get_ecn(),
        length: ip.get_total_length(),
        id: ip.get_identification(),
        flags: ip.get_flags(),
        frag_offset: ip.get_fragment_offset(),
        ttl: ip.get_ttl(),
        protocol: ip.get_next_level_protocol().0,
        src_ip: ip.get_source().to_string(),
        dst_ip: ip.get_destination().to_string(),
        payload_size: ip.payload().len(),
    }))
}

fn decode_ipv6(info: &PacketInfo, layer: &LayerInfo) -> Option<Box<dyn AuditRecord>> {
    let ip = Ipv6Packet::new(layer.data)?;
    Some(Box::new(Ipv6Record {
        timestamp: info.ts_nanos,
        traffic_class: ip.get_traffic_class(),
        flow_label: ip.get_flow_label(),
        length: ip.get_payload_length(),
        next_header: ip.get_next_header().0,
        hop_limit: ip.get_hop_limit(),
        src_ip: ip.get_source().to_string(),
        dst_ip: ip.get_destination().to_string(),
        payload_size: ip.payload().len(),
    }))
}

fn decode_icmpv4(info: &PacketInfo, layer: &LayerInfo) -> Option<Box<dyn AuditRecord>> {
    let icmp = IcmpPacket::new(layer.data)?;
    Some(Box::new(Icmpv4Record {
        timestamp: info.ts_nanos,
        type_code: u16::from(icmp.get_icmp_type().0) << 8 | u16::from(icmp.get_icmp_code().0),
        checksum: icmp.get_checksum(),
        ..Default::default()
    }))
}

fn decode_icmpv6(info: &PacketInfo, layer: &LayerInfo) -> Option<Box<dyn AuditRecord>> {
    let icmp = Icmpv6Packet::new(layer.data)?;
    Some(Box::new(Icmpv6Record {
        timestamp: info.ts_nanos,
        type_code: u16::from(icmp.get_icmpv6_type().0) << 8 | u16::from(icmp.get_icmpv6_code().0),
        checksum: icmp.get_checksum(),
        ..Default::default()
    }))
}

fn decode_tcp(info: &PacketInfo, layer: &LayerInfo) -> Option<Box<dyn AuditRecord>> {
    let tcp = TcpPacket::new(layer.data)?;
    Some(Box::new(TcpRecord {
        timestamp: info.ts_nanos,
        src_port: tcp.get_source(),
        dst_port: tcp.get_destination(),
        seq: tcp.get_sequence(),
        ack: tcp.get_acknowledgement(),
        data_offset: tcp.get_data_offset(),
        flags: tcp_flags_string(tcp.get_flags()),
        window: tcp.get_window(),
        checksum: tcp.get_checksum(),
        urgent: tcp.get_urgent_ptr(),
        payload_size: tcp.payload().len(),
        ..Default::default()
    }))
}

fn decode_udp(info: &PacketInfo, layer: &LayerInfo) -> Option<Box<dyn AuditRecord>> {
    let udp = UdpPacket::new(layer.data)?;
    Some(Box::new(UdpRecord {
        timestamp: info.ts_nanos,
        src_port: udp.get_source(),
        dst_port: udp.get_destination(),
        length: udp.get_length(),
        checksum: udp.get_checksum(),
        payload_size: udp.payload().len(),
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WriterKind;

    fn registry_config(kind: WriterKind) -> PipelineConfig {
        PipelineConfig {
            writer_kind: kind,
            ..Default::default()
        }
    }

    #[test]
    fn unknown_decoder_name_is_rejected() {
        let mut config = registry_config(WriterKind::Null);
        config.include_decoders = "TCP,NoSuchLayer".to_string();
        let res = DecoderRegistry::new(&config, CounterHandle::new());
        match res {
            Err(PipelineError::InvalidDecoder(name)) => assert_eq!(name, "NoSuchLayer"),
            _ => panic!("expected InvalidDecoder"),
        }
    }

    #[test]
    fn include_intersects_exclude_removes() {
        let mut config = registry_config(WriterKind::Null);
        config.include_decoders = "TCP,UDP,IPv4".to_string();
        config.exclude_decoders = "UDP".to_string();
        let registry = DecoderRegistry::new(&config, CounterHandle::new()).expect("registry");
        assert_eq!(registry.num_decoders(), 2);
    }

    #[test]
    fn default_set_is_complete() {
        let config = registry_config(WriterKind::Null);
        let registry = DecoderRegistry::new(&config, CounterHandle::new()).expect("registry");
        assert_eq!(registry.num_decoders(), LayerType::ALL.len());
    }
}
