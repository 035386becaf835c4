//! Waveform loading for the CLI.
//!
//! The core pipeline takes a pre-validated [`WaveformSet`]; real
//! deployments feed it from whatever waveform container they use. This
//! module is the thin shim the bundled binary uses: one CSV per channel,
//! named `<station>.<channel>.csv`, with a header row
//! `start_time_iso,sample_rate` followed by one amplitude sample per
//! line.

use crate::stack::{ChannelTrace, WaveformSet};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Errors loading waveform CSVs
#[derive(Error, Debug)]
pub enum WaveformIoError {
    #[error("no waveform CSVs found in {0}")]
    Empty(String),

    #[error("{file}: malformed header: {reason}")]
    MalformedHeader { file: String, reason: String },

    #[error("{file}:{line}: malformed sample: {reason}")]
    MalformedSample {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load every `<station>.<channel>.csv` in a directory into a waveform
/// set. Files with other extensions are ignored; files whose names do
/// not split into station and channel are skipped with a warning.
pub fn load_waveform_dir(dir: &Path) -> Result<WaveformSet, WaveformIoError> {
    let mut traces = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
        .collect();
    entries.sort();

    for path in entries {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some((station, channel)) = stem.split_once('.') else {
            warn!(file = %path.display(), "file name is not <station>.<channel>.csv, skipping");
            continue;
        };
        let trace = read_channel_csv(&path, station, channel)?;
        traces.push(trace);
    }

    if traces.is_empty() {
        return Err(WaveformIoError::Empty(dir.display().to_string()));
    }
    info!(channels = traces.len(), "waveforms loaded");
    Ok(WaveformSet::new(traces))
}

fn read_channel_csv(
    path: &Path,
    station: &str,
    channel: &str,
) -> Result<ChannelTrace, WaveformIoError> {
    let file_name = path.display().to_string();
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| WaveformIoError::MalformedHeader {
            file: file_name.clone(),
            reason: "empty file".to_string(),
        })?;
    let (start_field, rate_field) =
        header
            .split_once(',')
            .ok_or_else(|| WaveformIoError::MalformedHeader {
                file: file_name.clone(),
                reason: "expected start_time_iso,sample_rate".to_string(),
            })?;
    let start_time: DateTime<Utc> = start_field
        .trim()
        .parse()
        .map_err(|e: chrono::ParseError| WaveformIoError::MalformedHeader {
            file: file_name.clone(),
            reason: e.to_string(),
        })?;
    let sample_rate: f64 =
        rate_field
            .trim()
            .parse()
            .map_err(|e: std::num::ParseFloatError| WaveformIoError::MalformedHeader {
                file: file_name.clone(),
                reason: e.to_string(),
            })?;

    let mut data = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let sample: f64 = trimmed
            .parse()
            .map_err(|e: std::num::ParseFloatError| WaveformIoError::MalformedSample {
                file: file_name.clone(),
                line: idx + 2,
                reason: e.to_string(),
            })?;
        data.push(sample);
    }

    Ok(ChannelTrace {
        station: station.to_string(),
        channel: channel.to_string(),
        start_time,
        sample_rate,
        data,
    })
}
