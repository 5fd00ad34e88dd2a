use crate::context::ParseContext;
use crate::error::Error;
use crate::timestamp::Timestamp;
use pcap_parser::data::PacketData;

/// One frame handed from the capture source to the analyzer: the capture
/// timestamp, the layer-tagged bytes, and how much of the original frame
/// made it into the capture.
#[derive(Debug, Clone)]
pub struct CapturedFrame<'a> {
    pub ts: Timestamp,
    pub data: PacketData<'a>,
    /// number of octets actually captured; the data slice may carry
    /// trailing padding beyond this
    pub caplen: u32,
    pub pcap_index: usize,
}

/// Common trait for pcap/pcap-ng analyzers
pub trait PcapAnalyzer {
    /// Initialization function, called before reading pcap data (optional)
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Callback function for every captured frame
    fn handle_frame(&mut self, frame: &CapturedFrame, ctx: &ParseContext) -> Result<(), Error>;

    /// Called before the engine refills its buffer (optional)
    fn before_refill(&mut self) {}

    /// Teardown function, called after reading pcap data (optional)
    fn teardown(&mut self) {}
}
