//! File playback host for the Iridium burst receiver.
//!
//! Reads a raw IQ capture (or stdin), runs the full pipeline, and
//! prints one RAW line per decoded frame on stdout. SIGINT stops the
//! pipeline cleanly.
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use log::info;

use iridium_rx::demod::{DemodConfig, TimingRecovery};
use iridium_rx::detector::DetectorConfig;
use iridium_rx::pipeline::{Pipeline, PipelineConfig};
use iridium_rx::sample::SampleFormat;

#[derive(Parser)]
#[command(version, about = "Iridium L-band burst receiver")]
struct Opt {
    /// Input capture, '-' for stdin.
    input: PathBuf,

    /// Input sample rate in Hz.
    #[arg(short = 'r', long, default_value_t = 10_000_000.0)]
    sample_rate: f64,

    /// SDR center frequency in Hz.
    #[arg(short = 'c', long, default_value_t = 1_626_000_000.0)]
    center: f64,

    /// Sample format; guessed from the file extension if not given.
    #[arg(long, value_parser = parse_format)]
    format: Option<SampleFormat>,

    /// Detection threshold in dB over the noise floor.
    #[arg(short = 't', long, default_value_t = 18.0)]
    threshold: f32,

    /// Downmix worker threads.
    #[arg(short = 'j', long, default_value_t = 4)]
    workers: usize,

    /// Use nearest-neighbor decimation instead of Gardner timing
    /// recovery.
    #[arg(long)]
    no_gardner: bool,

    /// Tag for the RAW output lines.
    #[arg(long)]
    file_info: Option<String>,

    /// Verbosity. Repeat for more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_format(s: &str) -> Result<SampleFormat, String> {
    match s {
        "ci8" => Ok(SampleFormat::Ci8),
        "ci16" => Ok(SampleFormat::Ci16),
        "cf32" => Ok(SampleFormat::Cf32),
        _ => Err(format!("unknown format {s:?} (ci8, ci16, cf32)")),
    }
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("iridium_rx")
        .verbosity(usize::from(opt.verbose))
        .init()?;

    let stdin = opt.input.to_str() == Some("-");
    let format = match (opt.format, stdin) {
        (Some(f), _) => f,
        (None, true) => SampleFormat::Ci8,
        (None, false) => SampleFormat::from_extension(&opt.input.display().to_string())
            .ok_or_else(|| {
                anyhow::anyhow!("cannot guess sample format from {:?}, use --format", opt.input)
            })?,
    };

    let mut detector = DetectorConfig::new(opt.sample_rate, opt.center)?;
    detector.threshold_db = opt.threshold;
    let config = PipelineConfig {
        detector,
        demod: DemodConfig {
            timing: if opt.no_gardner {
                TimingRecovery::NearestNeighbor
            } else {
                TimingRecovery::Gardner
            },
        },
        workers: opt.workers,
        file_info: opt.file_info.clone(),
        playback: !stdin,
        ..Default::default()
    };

    let pipeline = Pipeline::spawn(config)?;
    let running = pipeline.running();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::Relaxed);
    })?;

    info!("reading {:?} as {format:?} at {} samples/s", opt.input, opt.sample_rate);
    let reader: Box<dyn Read> = if stdin {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(std::io::BufReader::new(std::fs::File::open(&opt.input)?))
    };
    let total = pipeline.run_reader(reader, format)?;
    info!("done after {total} samples");
    pipeline.shutdown();
    pipeline.join()?;
    Ok(())
}
