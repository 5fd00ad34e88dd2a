use crate::timestamp::{Timestamp, MICROS_PER_SEC};
use pcap_parser::{InterfaceDescriptionBlock, Linktype, OptionCode};

/// Parameters of one capture interface, reduced to what the engine needs:
/// the link type, the snap length, and enough timestamp metadata to turn
/// raw pcap-ng tick values into a [`Timestamp`].
#[derive(Clone, Debug)]
pub struct InterfaceInfo {
    pub link_type: Linktype,
    pub snaplen: u32,
    ts_resol: u8,
    ts_offset: u64,
}

impl InterfaceInfo {
    /// Interface of a legacy pcap capture: fixed microsecond resolution
    pub fn legacy(link_type: Linktype, snaplen: u32) -> InterfaceInfo {
        InterfaceInfo {
            link_type,
            snaplen,
            ts_resol: 6,
            ts_offset: 0,
        }
    }

    /// Read an interface description block, picking up the timestamp
    /// resolution and offset options when present.
    pub fn from_idb(idb: &InterfaceDescriptionBlock) -> InterfaceInfo {
        let mut info = InterfaceInfo::legacy(idb.linktype, idb.snaplen);
        for opt in idb.options.iter() {
            match opt.code {
                OptionCode::IfTsresol => {
                    if let Some(&resol) = opt.value.first() {
                        info.ts_resol = resol;
                    }
                }
                OptionCode::IfTsoffset => {
                    if opt.value.len() >= 8 {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(&opt.value[..8]);
                        info.ts_offset = u64::from_le_bytes(raw);
                    }
                }
                _ => (),
            }
        }
        info
    }

    /// Decode the split tick value of an enhanced packet block into a
    /// timestamp, honoring this interface's resolution.
    pub fn build_timestamp(&self, ts_high: u32, ts_low: u32) -> Timestamp {
        let (secs, frac, unit) =
            pcap_parser::build_ts(ts_high, ts_low, self.ts_offset, self.ts_resol);
        let unit = unit as u32;
        let micros = if unit >= MICROS_PER_SEC {
            frac / (unit / MICROS_PER_SEC)
        } else if unit > 0 {
            frac * (MICROS_PER_SEC / unit)
        } else {
            frac
        };
        Timestamp::new(secs, micros)
    }
}

/// State the engine threads through the capture: first/relative timestamps,
/// the frame index, and the interfaces seen so far.
#[derive(Clone, Default)]
pub struct ParseContext {
    /// Timestamp of first packet seen
    pub first_packet_ts: Timestamp,
    /// Timestamp of the current packet, relative to the first
    pub rel_ts: Timestamp,
    /// Index of the current packet in the capture
    pub pcap_index: usize,
    /// Endianness of the capture file
    pub bigendian: bool,
    interfaces: Vec<InterfaceInfo>,
}

impl ParseContext {
    pub fn register_interface(&mut self, info: InterfaceInfo) {
        self.interfaces.push(info);
    }

    /// A new pcap-ng section invalidates all known interfaces
    pub fn clear_interfaces(&mut self) {
        self.interfaces.clear();
    }

    pub fn interface(&self, id: usize) -> Option<&InterfaceInfo> {
        self.interfaces.get(id)
    }
}
