#[macro_use]
extern crate log;

mod config;
mod context;
mod endpoints;
mod engine;
mod error;
mod flow;
mod packet;
mod timestamp;

pub use config::Config;
pub use context::{InterfaceInfo, ParseContext};
pub use endpoints::{Endpoints, HostPort};
pub use engine::PcapEngine;
pub use error::Error;
pub use flow::{Endpoint, FlowHash, LayerFlow};
pub use packet::{CapturedFrame, PcapAnalyzer};
pub use timestamp::{Timestamp, MICROS_PER_SEC};
