//! Record sinks.
//!
//! One writer per record type; writers are never shared between decoders.
//! Backends: CSV, newline-delimited JSON, an in-process channel (used by
//! tests and embedders), and a null sink.

use crate::error::PipelineError;
use crate::records::AuditRecord;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Selected sink backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterKind {
    Csv,
    Json,
    Chan,
    Null,
}

/// Sink construction parameters, resolved once per decoder.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub kind: WriterKind,
    /// Output directory for file-backed sinks
    pub out: PathBuf,
    /// Record type name, used as the file stem
    pub name: String,
    /// Schema version written into the header
    pub version: &'static str,
    /// Capacity of the channel sink
    pub chan_capacity: usize,
}

impl WriterConfig {
    pub fn new(kind: WriterKind, out: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        WriterConfig {
            kind,
            out: out.into(),
            name: name.into(),
            version: crate::SCHEMA_VERSION,
            chan_capacity: 1024,
        }
    }
}

/// Contract every sink fulfils.
pub trait RecordWriter: Send {
    /// Write a header identifying the record type and schema version
    fn write_header(
        &mut self,
        record_type: &'static str,
        fields: &[&'static str],
    ) -> Result<(), PipelineError>;

    /// Accept one record
    fn write(&mut self, record: &dyn AuditRecord) -> Result<(), PipelineError>;

    /// Flush and close. Returns the sink name and the number of bytes written.
    fn close(&mut self, num_records: i64) -> Result<(String, u64), PipelineError>;
}

/// Build a writer according to the configuration. The channel receiver is
/// returned for the `Chan` backend so the consumer side can be hooked up.
pub fn build_writer(
    cfg: &WriterConfig,
) -> Result<(Box<dyn RecordWriter>, Option<Receiver<String>>), PipelineError> {
    match cfg.kind {
        WriterKind::Csv => Ok((Box::new(CsvWriter::create(cfg)?), None)),
        WriterKind::Json => Ok((Box::new(JsonWriter::create(cfg)?), None)),
        WriterKind::Chan => {
            let (w, rx) = ChanWriter::create(cfg);
            Ok((Box::new(w), Some(rx)))
        }
        WriterKind::Null => Ok((Box::new(NullWriter::default()), None)),
    }
}

pub struct CsvWriter {
    name: String,
    version: &'static str,
    path: PathBuf,
    inner: csv::Writer<BufWriter<File>>,
}

impl CsvWriter {
    pub fn create(cfg: &WriterConfig) -> Result<CsvWriter, PipelineError> {
        std::fs::create_dir_all(&cfg.out)?;
        let path = cfg.out.join(format!("{}.csv", cfg.name));
        let file = File::create(&path)?;
        let inner = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(BufWriter::new(file));
        Ok(CsvWriter {
            name: cfg.name.clone(),
            version: cfg.version,
            path,
            inner,
        })
    }
}

impl RecordWriter for CsvWriter {
    fn write_header(
        &mut self,
        record_type: &'static str,
        fields: &[&'static str],
    ) -> Result<(), PipelineError> {
        self.inner
            .write_record(&[format!("#{} {}", record_type, self.version)])?;
        self.inner.write_record(fields)?;
        Ok(())
    }

    fn write(&mut self, record: &dyn AuditRecord) -> Result<(), PipelineError> {
        self.inner.write_record(record.csv_record())?;
        Ok(())
    }

    fn close(&mut self, num_records: i64) -> Result<(String, u64), PipelineError> {
        self.inner.flush()?;
        let size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        debug!("closed csv writer {} ({} records)", self.name, num_records);
        Ok((self.name.clone(), size))
    }
}

pub struct JsonWriter {
    name: String,
    version: &'static str,
    path: PathBuf,
    inner: BufWriter<File>,
}

impl JsonWriter {
    pub fn create(cfg: &WriterConfig) -> Result<JsonWriter, PipelineError> {
        std::fs::create_dir_all(&cfg.out)?;
        let path = cfg.out.join(format!("{}.json", cfg.name));
        let file = File::create(&path)?;
        Ok(JsonWriter {
            name: cfg.name.clone(),
            version: cfg.version,
            path,
            inner: BufWriter::new(file),
        })
    }
}

impl RecordWriter for JsonWriter {
    fn write_header(
        &mut self,
        record_type: &'static str,
        _fields: &[&'static str],
    ) -> Result<(), PipelineError> {
        writeln!(
            self.inner,
            "{}",
            serde_json::json!({"Type": record_type, "Version": self.version})
        )?;
        Ok(())
    }

    fn write(&mut self, record: &dyn AuditRecord) -> Result<(), PipelineError> {
        let js = record.json()?;
        writeln!(self.inner, "{}", js)?;
        Ok(())
    }

    fn close(&mut self, num_records: i64) -> Result<(String, u64), PipelineError> {
        self.inner.flush()?;
        let size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        debug!("closed json writer {} ({} records)", self.name, num_records);
        Ok((self.name.clone(), size))
    }
}

/// Streams serialized records into a bounded channel.
pub struct ChanWriter {
    name: String,
    tx: Option<Sender<String>>,
    bytes: u64,
}

impl ChanWriter {
    pub fn create(cfg: &WriterConfig) -> (ChanWriter, Receiver<String>) {
        let (tx, rx) = bounded(cfg.chan_capacity);
        (
            ChanWriter {
                name: cfg.name.clone(),
                tx: Some(tx),
                bytes: 0,
            },
            rx,
        )
    }
}

impl RecordWriter for ChanWriter {
    fn write_header(
        &mut self,
        _record_type: &'static str,
        _fields: &[&'static str],
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    fn write(&mut self, record: &dyn AuditRecord) -> Result<(), PipelineError> {
        let js = record.json()?;
        self.bytes += js.len() as u64;
        if let Some(tx) = &self.tx {
            tx.send(js)
                .map_err(|_| PipelineError::SinkClosed(self.name.clone()))?;
        }
        Ok(())
    }

    fn close(&mut self, _num_records: i64) -> Result<(String, u64), PipelineError> {
        self.tx = None;
        Ok((self.name.clone(), self.bytes))
    }
}

#[derive(Default)]
pub struct NullWriter {
    num: i64,
}

impl RecordWriter for NullWriter {
    fn write_header(
        &mut self,
        _record_type: &'static str,
        _fields: &[&'static str],
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    fn write(&mut self, _record: &dyn AuditRecord) -> Result<(), PipelineError> {
        self.num += 1;
        Ok(())
    }

    fn close(&mut self, _num_records: i64) -> Result<(String, u64), PipelineError> {
        Ok(("null".to_string(), 0))
    }
}
