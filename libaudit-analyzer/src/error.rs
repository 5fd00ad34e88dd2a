use std::{fmt, io};

/// Pipeline error kinds.
///
/// Per-packet errors are counted and logged, and processing continues.
/// Initialization and sink errors abort the run.
#[derive(Debug)]
pub enum PipelineError {
    /// Unknown decoder name in an include/exclude list
    InvalidDecoder(String),
    /// A sink rejected a record; output would be corrupt
    Io(io::Error),
    /// Record serialization failed
    Serialize(serde_json::Error),
    /// CSV sink failure
    Csv(csv::Error),
    /// The consumer side of a channel sink is gone
    SinkClosed(String),
    /// Re-decoding a defragmented datagram failed
    PacketDecode(&'static str),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineError::InvalidDecoder(name) => write!(f, "invalid decoder: {}", name),
            PipelineError::Io(e) => write!(f, "I/O error: {}", e),
            PipelineError::Serialize(e) => write!(f, "serialization error: {}", e),
            PipelineError::Csv(e) => write!(f, "csv error: {}", e),
            PipelineError::SinkClosed(name) => write!(f, "sink closed: {}", name),
            PipelineError::PacketDecode(s) => write!(f, "packet decode failed: {}", s),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<io::Error> for PipelineError {
    fn from(e: io::Error) -> Self {
        PipelineError::Io(e)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Serialize(e)
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        PipelineError::Csv(e)
    }
}
