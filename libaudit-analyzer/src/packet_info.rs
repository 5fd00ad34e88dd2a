//! Resolved view of one captured packet.

use crate::layers::LayerType;
use libaudit_tools::{Endpoints, LayerFlow, Timestamp};
use pnet_base::MacAddr;

/// One resolved protocol layer: its type, directional flow and raw bytes
/// (header included).
#[derive(Clone, Copy, Debug)]
pub struct LayerInfo<'a> {
    pub layer_type: LayerType,
    pub flow: LayerFlow,
    pub data: &'a [u8],
}

impl<'a> LayerInfo<'a> {
    pub fn proto(&self) -> &'static str {
        self.layer_type.name()
    }
}

/// A captured packet with its layer stack resolved.
///
/// Built once per packet by the demultiplexer and shared with the
/// per-layer decoders, the connection tracker, the profile aggregator and
/// the reassembly paths.
#[derive(Clone, Debug)]
pub struct PacketInfo<'a> {
    /// Capture timestamp, nanoseconds UTC
    pub ts_nanos: i64,
    /// Index of the packet in the capture
    pub pcap_index: usize,
    /// The full captured frame
    pub data: &'a [u8],
    pub link: Option<LayerInfo<'a>>,
    pub network: Option<LayerInfo<'a>>,
    pub transport: Option<LayerInfo<'a>>,
    /// Transport payload, when the transport header parsed cleanly
    pub app_payload: Option<&'a [u8]>,
    pub src_mac: Option<MacAddr>,
    pub dst_mac: Option<MacAddr>,
    /// Addresses and ports in observed direction; only meaningful when a
    /// network layer is present
    pub endpoints: Endpoints,
}

impl<'a> PacketInfo<'a> {
    pub fn new(ts: Timestamp, pcap_index: usize, data: &'a [u8]) -> PacketInfo<'a> {
        PacketInfo {
            ts_nanos: ts.as_nanos(),
            pcap_index,
            data,
            link: None,
            network: None,
            transport: None,
            app_payload: None,
            src_mac: None,
            dst_mac: None,
            endpoints: Endpoints::default(),
        }
    }

    /// Symmetric per-layer flow hashes `(link, network, transport)`;
    /// 0 for absent layers.
    pub fn flow_hashes(&self) -> (u64, u64, u64) {
        (
            self.link.as_ref().map_or(0, |l| l.flow.fast_hash()),
            self.network.as_ref().map_or(0, |l| l.flow.fast_hash()),
            self.transport.as_ref().map_or(0, |l| l.flow.fast_hash()),
        )
    }
}
