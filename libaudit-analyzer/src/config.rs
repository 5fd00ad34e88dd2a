//! Typed pipeline configuration, resolved once at startup from the
//! toml-backed [`Config`](libaudit_tools::Config).

use crate::writer::WriterKind;
use libaudit_tools::Config;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Comma-separated decoder names to enable (intersects the default set)
    pub include_decoders: String,
    /// Comma-separated decoder names to disable
    pub exclude_decoders: String,
    /// Feed labeled counters on every written record
    pub export_metrics: bool,
    /// Idle eviction horizon for tracked connections, seconds
    pub conn_timeout: u64,
    /// Idle eviction horizon for UDP conversations, seconds
    pub udp_timeout: u64,
    /// Forced reassembly flush interval, in packets (0 = never)
    pub flush_every: u64,
    /// Flush horizon for streams without recent activity, seconds
    pub close_inactive_timeout: u64,
    /// Flush horizon for streams awaiting closure, seconds
    pub close_pending_timeout: u64,
    /// Accept streams whose initial bytes were not captured
    pub allow_missing_init: bool,
    /// Keep processing segments rejected by the connection FSM
    pub ignore_fsm_errors: bool,
    /// Keep processing segments rejected by the option checker
    pub no_opt_check: bool,
    /// Verify TCP checksums
    pub verify_checksums: bool,
    /// Reassemble IPv4 fragments before TCP processing
    pub defrag_ipv4: bool,
    /// Persist partial conversations on shutdown
    pub write_incomplete: bool,
    /// Release connection state once FIN/RST is processed
    pub remove_closed_streams: bool,
    /// Process still-active streams at shutdown; false abandons them
    pub wait_for_connections: bool,
    /// Capacity of each stream-reader channel
    pub stream_channel_capacity: usize,
    /// Resolve DNS names from the local cache only
    pub local_dns: bool,
    /// Output directory for records
    pub out: PathBuf,
    /// Subdirectory (under `out`) for extracted file artifacts; empty
    /// disables artifact extraction
    pub file_storage: String,
    /// Sink backend for all writers
    pub writer_kind: WriterKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            include_decoders: String::new(),
            exclude_decoders: String::new(),
            export_metrics: false,
            conn_timeout: 120,
            udp_timeout: 60,
            flush_every: 0,
            close_inactive_timeout: 3600,
            close_pending_timeout: 30,
            allow_missing_init: false,
            ignore_fsm_errors: false,
            no_opt_check: false,
            verify_checksums: false,
            defrag_ipv4: false,
            write_incomplete: false,
            remove_closed_streams: true,
            wait_for_connections: true,
            stream_channel_capacity: 256,
            local_dns: true,
            out: PathBuf::from("."),
            file_storage: String::new(),
            writer_kind: WriterKind::Csv,
        }
    }
}

impl PipelineConfig {
    /// Build a pipeline configuration, reading known keys from `config` and
    /// keeping defaults for absent ones.
    pub fn from_config(config: &Config) -> PipelineConfig {
        let mut c = PipelineConfig::default();
        if let Some(v) = config.get("decoders.include") {
            c.include_decoders = v.to_string();
        }
        if let Some(v) = config.get("decoders.exclude") {
            c.exclude_decoders = v.to_string();
        }
        if let Some(v) = config.get_bool("decoders.export_metrics") {
            c.export_metrics = v;
        }
        if let Some(v) = config.get_u64("tracker.conn_timeout") {
            c.conn_timeout = v;
        }
        if let Some(v) = config.get_u64("tracker.udp_timeout") {
            c.udp_timeout = v;
        }
        if let Some(v) = config.get_u64("reassembly.flush_every") {
            c.flush_every = v;
        }
        if let Some(v) = config.get_u64("reassembly.close_inactive_timeout") {
            c.close_inactive_timeout = v;
        }
        if let Some(v) = config.get_u64("reassembly.close_pending_timeout") {
            c.close_pending_timeout = v;
        }
        if let Some(v) = config.get_bool("reassembly.allow_missing_init") {
            c.allow_missing_init = v;
        }
        if let Some(v) = config.get_bool("reassembly.ignore_fsm_errors") {
            c.ignore_fsm_errors = v;
        }
        if let Some(v) = config.get_bool("reassembly.no_opt_check") {
            c.no_opt_check = v;
        }
        if let Some(v) = config.get_bool("reassembly.checksum") {
            c.verify_checksums = v;
        }
        if let Some(v) = config.get_bool("reassembly.defrag_ipv4") {
            c.defrag_ipv4 = v;
        }
        if let Some(v) = config.get_bool("reassembly.write_incomplete") {
            c.write_incomplete = v;
        }
        if let Some(v) = config.get_bool("reassembly.remove_closed_streams") {
            c.remove_closed_streams = v;
        }
        if let Some(v) = config.get_bool("reassembly.wait_for_connections") {
            c.wait_for_connections = v;
        }
        if let Some(v) = config.get_usize("reassembly.stream_channel_capacity") {
            c.stream_channel_capacity = v;
        }
        if let Some(v) = config.get_bool("resolvers.local_dns") {
            c.local_dns = v;
        }
        if let Some(v) = config.get("output.dir") {
            c.out = PathBuf::from(v);
        }
        if let Some(v) = config.get("output.file_storage") {
            c.file_storage = v.to_string();
        }
        if let Some(v) = config.get("output.format") {
            c.writer_kind = match v {
                "json" => WriterKind::Json,
                "null" => WriterKind::Null,
                _ => WriterKind::Csv,
            };
        }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineConfig;
    use libaudit_tools::Config;

    #[test]
    fn pipeline_config_from_toml() {
        let mut config = Config::default();
        let toml = r#"
[reassembly]
flush_every = 500
allow_missing_init = true

[tracker]
conn_timeout = 42

[output]
format = "json"
"#;
        config.load_config(toml.as_bytes()).expect("load");
        let c = PipelineConfig::from_config(&config);
        assert_eq!(c.flush_every, 500);
        assert!(c.allow_missing_init);
        assert_eq!(c.conn_timeout, 42);
        assert_eq!(c.writer_kind, crate::writer::WriterKind::Json);
        // untouched defaults
        assert_eq!(c.close_pending_timeout, 30);
        assert!(!c.ignore_fsm_errors);
    }
}
