#[macro_use]
extern crate log;

use clap::{crate_version, App, Arg};
use flate2::read::GzDecoder;
use libaudit_analyzer::{Analyzer, PipelineConfig};
use libaudit_tools::{Config, PcapEngine};
use std::fs::File;
use std::io;
use std::path::Path;
use xz2::read::XzDecoder;

fn load_config(config: &mut Config, filename: &str) -> Result<(), io::Error> {
    debug!("Loading configuration {}", filename);
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config.load_config(file)
}

fn main() -> io::Result<()> {
    let matches = App::new("Traffic audit analyzer")
        .version(crate_version!())
        .about("Passive network-traffic analysis of pcap/pcap-ng files")
        .arg(
            Arg::with_name("verbose")
                .help("Be verbose")
                .short("v")
                .long("verbose"),
        )
        .arg(
            Arg::with_name("config")
                .help("Configuration file")
                .short("c")
                .long("config")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("include")
                .help("Layer decoders to enable (comma-separated)")
                .short("i")
                .long("include")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("exclude")
                .help("Layer decoders to disable (comma-separated)")
                .short("e")
                .long("exclude")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("outdir")
                .help("Output directory for records")
                .short("o")
                .long("outdir")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("INPUT")
                .help("Input file name")
                .required(true)
                .index(1),
        )
        .get_matches();

    env_logger::init();

    let mut config = Config::default();
    if let Some(filename) = matches.value_of("config") {
        load_config(&mut config, filename)?;
    }

    let mut pipeline_config = PipelineConfig::from_config(&config);
    if let Some(list) = matches.value_of("include") {
        pipeline_config.include_decoders = list.to_string();
    }
    if let Some(list) = matches.value_of("exclude") {
        pipeline_config.exclude_decoders = list.to_string();
    }
    if let Some(dir) = matches.value_of("outdir") {
        pipeline_config.out = dir.into();
    }

    let input_filename = matches.value_of("INPUT").unwrap();
    let path = Path::new(&input_filename);
    let file = File::open(path)?;
    let mut input_reader: Box<dyn io::Read> = if input_filename.ends_with(".gz") {
        Box::new(GzDecoder::new(file))
    } else if input_filename.ends_with(".xz") {
        Box::new(XzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let analyzer = Analyzer::new(pipeline_config)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let mut engine = PcapEngine::new(Box::new(analyzer), &config);

    info!("processing {}", input_filename);
    engine
        .run(&mut input_reader)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    info!("done");

    Ok(())
}
