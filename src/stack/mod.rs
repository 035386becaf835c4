//! Per-node energy stacking.
//!
//! For one grid node, each station's amplitude series is shifted
//! backward in time by that station's lag for the node (so an arrival
//! that reaches the station `lag` seconds after the origin lines up at
//! the origin time), squared into an energy envelope, clipped to a
//! multiple of its own mean to bound spikes and glitches, normalized by
//! its RMS so no station dominates on amplitude scale alone, and summed
//! across stations.
//!
//! Nodes are fully independent of each other: one call to [`stack_node`]
//! is the unit of parallel work for the scan's first phase.

use crate::stack::envelope::lag_shifted_energy;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

mod envelope;

/// Errors in energy stacking
#[derive(Error, Debug)]
pub enum StackError {
    #[error("node {node}: no station had matching waveform data")]
    NoStationData { node: usize },

    #[error("station {station}: trace length {actual} does not match window length {expected}")]
    LengthMismatch {
        station: String,
        expected: usize,
        actual: usize,
    },
}

// ============================================================================
// Waveforms
// ============================================================================

/// One continuous single-channel recording.
///
/// All traces fed to a scan must share a sample rate and a synchronized
/// start time; that validation happens upstream of this crate.
#[derive(Debug, Clone)]
pub struct ChannelTrace {
    pub station: String,
    pub channel: String,
    pub start_time: DateTime<Utc>,
    /// Samples per second
    pub sample_rate: f64,
    pub data: Vec<f64>,
}

/// The waveform collection for one analysis window.
#[derive(Debug, Clone, Default)]
pub struct WaveformSet {
    pub traces: Vec<ChannelTrace>,
}

impl WaveformSet {
    pub fn new(traces: Vec<ChannelTrace>) -> Self {
        Self { traces }
    }

    /// All channels recorded at the named station, in input order.
    pub fn select_station(&self, station: &str) -> Vec<&ChannelTrace> {
        self.traces.iter().filter(|tr| tr.station == station).collect()
    }

    /// Sample rate of the window (uniform across traces by contract).
    pub fn sample_rate(&self) -> f64 {
        self.traces.first().map(|tr| tr.sample_rate).unwrap_or(0.0)
    }

    /// Stations that actually have at least one channel present.
    pub fn real_stations(&self, stations: &[String]) -> Vec<String> {
        stations
            .iter()
            .filter(|s| !self.select_station(s).is_empty())
            .cloned()
            .collect()
    }

    /// Working copy with samples narrowed through f32.
    ///
    /// Optional precision/memory tradeoff for very long windows: halves
    /// the resident working-set cost of the stacking phase at the price
    /// of ~7 significant digits. Template extraction always reads the
    /// original full-precision set.
    pub fn downcast_f32(&self) -> Self {
        let traces = self
            .traces
            .iter()
            .map(|tr| ChannelTrace {
                station: tr.station.clone(),
                channel: tr.channel.clone(),
                start_time: tr.start_time,
                sample_rate: tr.sample_rate,
                data: tr.data.iter().map(|&v| v as f32 as f64).collect(),
            })
            .collect();
        Self { traces }
    }
}

// ============================================================================
// Stacking
// ============================================================================

/// Compute the summed, lag-aligned, normalized energy envelope for one
/// node.
///
/// `lag_column[s]` is the lag in seconds of `stations[s]` for this node.
/// Stations with no matching channel are skipped with a warning; a
/// station with several matching channels contributes only its first,
/// with a warning. If no station matches at all the node has no energy
/// trace and the scan must abort rather than emit a silently incomplete
/// stack.
pub fn stack_node(
    node: usize,
    stations: &[String],
    lag_column: &[f64],
    waveforms: &WaveformSet,
    clip_level: f64,
) -> Result<Vec<f64>, StackError> {
    debug_assert_eq!(stations.len(), lag_column.len());

    let mut stack: Option<Vec<f64>> = None;
    for (s, station) in stations.iter().enumerate() {
        let matches = waveforms.select_station(station);
        let trace = match matches.as_slice() {
            [] => {
                warn!(station = %station, node, "no channel match, skipping station");
                continue;
            }
            [only] => *only,
            [first, ..] => {
                warn!(
                    station = %station,
                    node,
                    matches = matches.len(),
                    "multiple channel matches, using the first"
                );
                *first
            }
        };

        let envelope = lag_shifted_energy(&trace.data, lag_column[s], trace.sample_rate, clip_level);

        // Seed the accumulator with the first contribution, fold the rest
        match stack.as_mut() {
            None => stack = Some(envelope),
            Some(acc) => {
                if envelope.len() != acc.len() {
                    return Err(StackError::LengthMismatch {
                        station: station.clone(),
                        expected: acc.len(),
                        actual: envelope.len(),
                    });
                }
                for (a, e) in acc.iter_mut().zip(&envelope) {
                    *a += e;
                }
            }
        }
    }

    stack.ok_or(StackError::NoStationData { node })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trace(station: &str, channel: &str, data: Vec<f64>) -> ChannelTrace {
        ChannelTrace {
            station: station.to_string(),
            channel: channel.to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            sample_rate: 1.0,
            data,
        }
    }

    #[test]
    fn zero_lag_stack_is_sum_of_normalized_envelopes() {
        let waveforms = WaveformSet::new(vec![
            trace("AAA", "SHZ", vec![1.0, 1.0, 1.0, 1.0]),
            trace("BBB", "SHZ", vec![2.0, 2.0, 2.0, 2.0]),
        ]);
        let stations = vec!["AAA".to_string(), "BBB".to_string()];
        let stack = stack_node(0, &stations, &[0.0, 0.0], &waveforms, 1e9).unwrap();
        // Each constant envelope normalizes to all-ones regardless of scale
        assert_eq!(stack.len(), 4);
        for v in stack {
            assert!((v - 2.0).abs() < 1e-12, "expected 2.0, got {v}");
        }
    }

    #[test]
    fn lag_shifts_energy_backward_in_time() {
        // Spike at sample 3, lag of 3 samples: energy must land at sample 0
        let waveforms = WaveformSet::new(vec![trace(
            "AAA",
            "SHZ",
            vec![0.0, 0.0, 0.0, 5.0, 0.0, 0.0],
        )]);
        let stations = vec!["AAA".to_string()];
        let stack = stack_node(0, &stations, &[3.0], &waveforms, 1e9).unwrap();
        let peak = stack
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(peak, 0);
        assert_eq!(stack.len(), 6);
    }

    #[test]
    fn unmatched_station_is_skipped() {
        let waveforms = WaveformSet::new(vec![trace("AAA", "SHZ", vec![1.0, 2.0, 3.0])]);
        let stations = vec!["AAA".to_string(), "ZZZ".to_string()];
        let stack = stack_node(0, &stations, &[0.0, 0.0], &waveforms, 1e9).unwrap();
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn duplicate_channels_use_first_match() {
        let waveforms = WaveformSet::new(vec![
            trace("AAA", "SHZ", vec![1.0, 1.0]),
            trace("AAA", "SHN", vec![100.0, 0.0]),
        ]);
        let stations = vec!["AAA".to_string()];
        let stack = stack_node(0, &stations, &[0.0], &waveforms, 1e9).unwrap();
        // Only the constant SHZ channel contributes
        assert!((stack[0] - 1.0).abs() < 1e-12);
        assert!((stack[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_matching_station_at_all_is_an_error() {
        let waveforms = WaveformSet::new(vec![trace("AAA", "SHZ", vec![1.0])]);
        let stations = vec!["ZZZ".to_string()];
        let err = stack_node(4, &stations, &[0.0], &waveforms, 1e9).unwrap_err();
        assert!(matches!(err, StackError::NoStationData { node: 4 }));
    }

    #[test]
    fn clipping_bounds_spike_influence() {
        // A huge spike on an otherwise quiet channel: with a tight clip
        // level the spike's energy is capped at clip_level × mean
        let data = vec![1.0, 1.0, 1.0, 1000.0, 1.0, 1.0, 1.0, 1.0];
        let waveforms = WaveformSet::new(vec![trace("AAA", "SHZ", data)]);
        let stations = vec!["AAA".to_string()];
        let clipped = stack_node(0, &stations, &[0.0], &waveforms, 2.0).unwrap();
        let unclipped = stack_node(0, &stations, &[0.0], &waveforms, 1e12).unwrap();
        let ratio_clipped = clipped[3] / clipped[0];
        let ratio_unclipped = unclipped[3] / unclipped[0];
        assert!(
            ratio_clipped < ratio_unclipped / 2.0,
            "clipping should cut the spike's relative weight: {ratio_clipped} vs {ratio_unclipped}"
        );
    }

    #[test]
    fn downcast_is_lossy_but_close() {
        let waveforms = WaveformSet::new(vec![trace("AAA", "SHZ", vec![1.000000123456789])]);
        let narrowed = waveforms.downcast_f32();
        let v = narrowed.traces[0].data[0];
        assert!(v != 1.000000123456789 || (v - 1.0).abs() < 1e-6);
        assert!((v - 1.0).abs() < 1e-6);
    }
}
