//! brightnet - network brightness seismic event scanner
//!
//! Scans a travel-time grid against one window of continuous waveform
//! data and reports the detections and accepted templates as JSON.
//!
//! # Usage
//!
//! ```bash
//! brightnet --grid-dir grids/ --stations WEL1,WEL2,WEL3 --waveforms day_001/
//!
//! # With a config file and a report path
//! brightnet --grid-dir grids/ --stations WEL1,WEL2 --waveforms day_001/ \
//!     --config scan.toml --output detections.json
//! ```
//!
//! # Environment Variables
//!
//! - `BRIGHTNET_CONFIG`: Path to a TOML config (when `--config` is not given)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use brightnet::config::ScanConfig;
use brightnet::grid::{Polygon, TravelTimeGrid};
use brightnet::io::load_waveform_dir;
use brightnet::pipeline::{scan, ScanOutcome};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "brightnet")]
#[command(about = "Network brightness seismic event scanner")]
#[command(version)]
struct CliArgs {
    /// Directory holding per-station travel-time CSVs
    /// (named <volume>.<phase>.<station>.time.csv)
    #[arg(long, value_name = "DIR")]
    grid_dir: PathBuf,

    /// Stations to scan with (comma-separated); stations without a
    /// travel-time file are excluded with a warning
    #[arg(long, value_delimiter = ',', required = true)]
    stations: Vec<String>,

    /// Directory of waveform CSVs (<station>.<channel>.csv)
    #[arg(long, value_name = "DIR")]
    waveforms: PathBuf,

    /// Config file path (overrides BRIGHTNET_CONFIG and ./brightnet.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where to write the JSON report (stdout if omitted)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

/// JSON report of one scan.
#[derive(Serialize)]
struct ScanReport<'a> {
    detections: &'a [brightnet::Detection],
    accepted_nodes: &'a [brightnet::Node],
    templates: Vec<TemplateSummary>,
}

/// Template metadata for the report; sample data stays out of the JSON.
#[derive(Serialize)]
struct TemplateSummary {
    node: brightnet::Node,
    coherence: f64,
    channels: Vec<String>,
    start_times: Vec<String>,
    samples: Vec<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => ScanConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ScanConfig::load().context("loading config")?,
    };
    config.validate().context("validating config")?;

    let mut grid = TravelTimeGrid::read_travel_times(
        &args.grid_dir,
        &args.stations,
        config.grid.phase,
        config.grid.phase_out,
        config.grid.ps_ratio,
    )
    .context("reading travel-time grid")?;

    if let Some(resample) = &config.grid.resample {
        let boundary = Polygon::new(resample.boundary.clone());
        grid = grid.resample(resample.min_depth_km, resample.max_depth_km, &boundary);
    }
    if let Some(threshold) = config.grid.dedup_threshold_secs {
        grid = grid.deduplicate(threshold);
    }

    let waveforms =
        load_waveform_dir(&args.waveforms).context("loading waveforms")?;

    // Distinct per concurrent run sharing one scratch root
    let instance = u64::from(std::process::id()) ^ (chrono::Utc::now().timestamp_millis() as u64);

    let outcome = scan(&config, &grid, &waveforms, instance).context("running scan")?;
    info!(
        detections = outcome.detections.len(),
        templates = outcome.templates.len(),
        "scan complete"
    );

    let report = build_report(&outcome);
    let json = serde_json::to_string_pretty(&report).context("serializing report")?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn build_report(outcome: &ScanOutcome) -> ScanReport<'_> {
    let templates = outcome
        .templates
        .iter()
        .map(|t| TemplateSummary {
            node: t.node,
            coherence: t.coherence,
            channels: t
                .traces
                .iter()
                .map(|tr| format!("{}.{}", tr.station, tr.channel))
                .collect(),
            start_times: t
                .traces
                .iter()
                .map(|tr| tr.start_time.to_rfc3339())
                .collect(),
            samples: t.traces.iter().map(|tr| tr.data.len()).collect(),
        })
        .collect();
    ScanReport {
        detections: &outcome.detections,
        accepted_nodes: &outcome.accepted_nodes,
        templates,
    }
}
