use crate::config::Config;
use crate::context::{InterfaceInfo, ParseContext};
use crate::error::Error;
use crate::packet::{CapturedFrame, PcapAnalyzer};
use crate::timestamp::Timestamp;
use pcap_parser::*;
use std::io::Read;

/// pcap/pcap-ng capture engine
///
/// Reads blocks from a capture file and hands every frame to the wrapped
/// [`PcapAnalyzer`].
pub struct PcapEngine {
    a: Box<dyn PcapAnalyzer>,
    buffer_initial_capacity: usize,
}

impl PcapEngine {
    /// Build a new PcapEngine, taking ownership of the input PcapAnalyzer
    pub fn new(a: Box<dyn PcapAnalyzer>, config: &Config) -> Self {
        let buffer_initial_capacity = config
            .get_usize("buffer_initial_capacity")
            .unwrap_or(128 * 1024);
        PcapEngine {
            a,
            buffer_initial_capacity,
        }
    }

    /// Main function: given a reader, read all pcap data and call the analyzer for each frame
    pub fn run<R: Read>(&mut self, f: &mut R) -> Result<(), Error> {
        let capacity = self.buffer_initial_capacity;
        let mut reader = pcap_parser::create_reader(capacity, f)?;

        self.a.init()?;
        let mut ctx = ParseContext::default();

        let (offset, block) = reader.next()?;
        match block {
            PcapBlockOwned::NG(Block::SectionHeader(ref shb)) => {
                ctx.bigendian = shb.big_endian();
            }
            PcapBlockOwned::LegacyHeader(ref hdr) => {
                ctx.register_interface(InterfaceInfo::legacy(hdr.network, hdr.snaplen));
                ctx.bigendian = hdr.is_bigendian();
            }
            _ => unreachable!(),
        };
        reader.consume(offset);

        let mut last_incomplete_index = 0;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    let frame = match block {
                        PcapBlockOwned::NG(Block::SectionHeader(ref _shb)) => {
                            debug!("pcap-ng: new section");
                            ctx.clear_interfaces();
                            reader.consume(offset);
                            continue;
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(ref idb)) => {
                            ctx.register_interface(InterfaceInfo::from_idb(idb));
                            reader.consume(offset);
                            continue;
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(ref epb)) => {
                            ctx.pcap_index += 1;
                            let if_info = ctx
                                .interface(epb.if_id as usize)
                                .ok_or(Error::Generic("Missing interface info"))?;
                            let ts = if_info.build_timestamp(epb.ts_high, epb.ts_low);
                            let data = pcap_parser::data::get_packetdata(
                                epb.data,
                                if_info.link_type,
                                epb.caplen as usize,
                            )
                            .ok_or(Error::Generic("Parsing PacketData failed (EnhancedPacket)"))?;
                            CapturedFrame {
                                ts,
                                data,
                                caplen: epb.caplen,
                                pcap_index: ctx.pcap_index,
                            }
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(ref spb)) => {
                            ctx.pcap_index += 1;
                            let if_info = ctx
                                .interface(0)
                                .ok_or(Error::Generic("Missing interface info"))?;
                            let blen = (spb.block_len1 - 16) as usize;
                            let data = pcap_parser::data::get_packetdata(
                                spb.data,
                                if_info.link_type,
                                blen,
                            )
                            .ok_or(Error::Generic("Parsing PacketData failed (SimplePacket)"))?;
                            CapturedFrame {
                                ts: Timestamp::default(),
                                data,
                                caplen: if_info.snaplen,
                                pcap_index: ctx.pcap_index,
                            }
                        }
                        PcapBlockOwned::LegacyHeader(ref hdr) => {
                            ctx.register_interface(InterfaceInfo::legacy(hdr.network, hdr.snaplen));
                            debug!("Legacy pcap, link type: {}", hdr.network);
                            reader.consume(offset);
                            continue;
                        }
                        PcapBlockOwned::Legacy(ref b) => {
                            ctx.pcap_index += 1;
                            let if_info = ctx
                                .interface(0)
                                .ok_or(Error::Generic("Missing interface info"))?;
                            let blen = b.caplen as usize;
                            let data =
                                pcap_parser::data::get_packetdata(b.data, if_info.link_type, blen)
                                    .ok_or(Error::Generic(
                                        "Parsing PacketData failed (Legacy Packet)",
                                    ))?;
                            CapturedFrame {
                                ts: Timestamp::new(b.ts_sec, b.ts_usec),
                                data,
                                caplen: b.caplen,
                                pcap_index: ctx.pcap_index,
                            }
                        }
                        PcapBlockOwned::NG(Block::InterfaceStatistics(_))
                        | PcapBlockOwned::NG(Block::NameResolution(_)) => {
                            reader.consume(offset);
                            continue;
                        }
                        _ => {
                            warn!("unsupported block");
                            reader.consume(offset);
                            continue;
                        }
                    };
                    if ctx.first_packet_ts.is_null() {
                        ctx.first_packet_ts = frame.ts;
                    }
                    trace!("    time  : {}", frame.ts);
                    ctx.rel_ts = frame.ts - ctx.first_packet_ts;
                    self.a.handle_frame(&frame, &ctx)?;
                    reader.consume(offset);
                    continue;
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete) => {
                    if last_incomplete_index == ctx.pcap_index {
                        warn!("Could not read complete data block.");
                        warn!("Hint: the reader buffer size may be too small, or the input file may be truncated.");
                        break;
                    }
                    last_incomplete_index = ctx.pcap_index;
                    self.a.before_refill();
                    reader.refill()?;
                    continue;
                }
                Err(e) => return Err(Error::Pcap(e)),
            }
        }

        self.a.teardown();
        Ok(())
    }
}
