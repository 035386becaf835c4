//! Travel-time grid preparation.
//!
//! Owns the per-station, per-node lag table the whole scan runs against:
//!
//! - **Ingestion**: reads per-station travel-time CSV files (one file per
//!   station and phase, rows of `lat lon depth traveltime`), converts
//!   between P and S phases with a fixed velocity ratio, and re-zeroes
//!   each station's lags to that station's own minimum.
//! - **Resample**: cuts the grid to a depth range and a 2D boundary
//!   polygon.
//! - **Deduplicate**: drops nodes whose network moveout is
//!   near-indistinguishable from an already-kept node.
//!
//! Note on re-zeroing: subtracting each station's minimum travel time
//! discards absolute inter-station timing, keeping only the
//! relative-across-nodes moveout per station. This means P and S grids
//! are never jointly exploited. That matches the published method as
//! implemented; it is not corrected here.

mod polygon;

pub use polygon::Polygon;

use crate::types::Node;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Errors in grid preparation
#[derive(Error, Debug)]
pub enum GridError {
    #[error("no travel-time files found for any requested station")]
    NoStations,

    #[error("station {station}: expected {expected} nodes, file has {actual}")]
    NodeCountMismatch {
        station: String,
        expected: usize,
        actual: usize,
    },

    #[error("{file}:{line}: malformed travel-time row: {reason}")]
    MalformedRow {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Seismic Phases
// ============================================================================

/// Seismic phase a travel-time grid was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Phase {
    P,
    S,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::P => write!(f, "P"),
            Phase::S => write!(f, "S"),
        }
    }
}

// ============================================================================
// Travel-Time Grid
// ============================================================================

/// Per-station, per-node lag table.
///
/// `lags[s][i]` is the delay (seconds) from node `nodes[i]` to station
/// `stations[s]`, relative to that station's fastest node. Every
/// station's lag row has exactly `nodes.len()` entries, and every
/// transformation preserves that alignment.
#[derive(Debug, Clone)]
pub struct TravelTimeGrid {
    stations: Vec<String>,
    nodes: Vec<Node>,
    lags: Vec<Vec<f64>>,
}

impl TravelTimeGrid {
    /// Assemble a grid from already-aligned parts.
    ///
    /// Callers are responsible for alignment; this is checked in debug
    /// builds only.
    pub fn from_parts(stations: Vec<String>, nodes: Vec<Node>, lags: Vec<Vec<f64>>) -> Self {
        let grid = Self { stations, nodes, lags };
        grid.debug_check_shape();
        grid
    }

    pub fn stations(&self) -> &[String] {
        &self.stations
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    /// Lag of station `s` for node `i`, in seconds.
    pub fn lag(&self, s: usize, i: usize) -> f64 {
        self.lags[s][i]
    }

    /// The lag of every station for node `i`, in station order.
    pub fn lag_column(&self, i: usize) -> Vec<f64> {
        self.lags.iter().map(|row| row[i]).collect()
    }

    fn debug_check_shape(&self) {
        debug_assert!(
            self.lags.len() == self.stations.len()
                && self.lags.iter().all(|row| row.len() == self.nodes.len()),
            "lag table shape does not match station/node counts"
        );
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Read per-station travel-time CSVs from `dir` into a grid.
    ///
    /// Looks for one file per requested station named
    /// `<anything>.<phase>.<station>.time.csv`, containing
    /// space-delimited rows of `lat lon depth traveltime_secs` in the
    /// grid's canonical node order. Stations without a file are excluded
    /// with a warning; if none are found the run cannot proceed.
    ///
    /// Travel times are converted from `phase` to `phase_out` using
    /// `ps_ratio` (S is slower: P→S multiplies, S→P divides), then each
    /// station's column is shifted so its minimum lag is zero.
    pub fn read_travel_times(
        dir: &Path,
        stations: &[String],
        phase: Phase,
        phase_out: Phase,
        ps_ratio: f64,
    ) -> Result<Self, GridError> {
        let mut stations_out: Vec<String> = Vec::new();
        let mut nodes: Vec<Node> = Vec::new();
        let mut lags: Vec<Vec<f64>> = Vec::new();

        for station in stations {
            let Some(path) = find_grid_file(dir, phase, station)? else {
                warn!(station = %station, %phase, "no travel-time file found, excluding station");
                continue;
            };
            info!(station = %station, file = %path.display(), "reading travel times");
            let (file_nodes, mut traveltimes) = read_grid_file(&path)?;

            if stations_out.is_empty() {
                nodes = file_nodes;
            } else if file_nodes.len() != nodes.len() {
                return Err(GridError::NodeCountMismatch {
                    station: station.clone(),
                    expected: nodes.len(),
                    actual: file_nodes.len(),
                });
            }

            convert_phase(&mut traveltimes, phase, phase_out, ps_ratio);
            rezero(&mut traveltimes);

            stations_out.push(station.clone());
            lags.push(traveltimes);
        }

        if stations_out.is_empty() {
            return Err(GridError::NoStations);
        }
        info!(
            stations = stations_out.len(),
            nodes = nodes.len(),
            "travel-time grid loaded"
        );
        Ok(Self::from_parts(stations_out, nodes, lags))
    }

    // ------------------------------------------------------------------
    // Resample
    // ------------------------------------------------------------------

    /// Cut the grid to a sub-volume.
    ///
    /// Keeps nodes with `min_depth < depth < max_depth` (strict) whose
    /// (lat, lon) falls inside `boundary`. Dropped nodes are gone for
    /// good; the lag table is re-sliced to the kept indices so alignment
    /// is preserved.
    pub fn resample(&self, min_depth: f64, max_depth: f64, boundary: &Polygon) -> Self {
        let keep: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| {
                let node = &self.nodes[i];
                min_depth < node.depth_km
                    && node.depth_km < max_depth
                    && boundary.contains(node.latitude, node.longitude)
            })
            .collect();
        info!(
            kept = keep.len(),
            dropped = self.nodes.len() - keep.len(),
            "grid resampled to sub-volume"
        );
        self.select(&keep)
    }

    // ------------------------------------------------------------------
    // Deduplicate
    // ------------------------------------------------------------------

    /// Remove nodes whose network moveout is indistinguishable from an
    /// already-kept node.
    ///
    /// Two nodes are distinguishable when the L1 distance between their
    /// lag vectors (summed over stations) exceeds `threshold` seconds.
    /// Greedy scan in node order: node 0 is always kept, each later node
    /// is kept only if distinguishable from every kept node. Relative
    /// order of kept nodes is preserved. O(N²·S), intended as a one-time
    /// grid preparation cost.
    pub fn deduplicate(&self, threshold: f64) -> Self {
        if self.nodes.is_empty() {
            return self.clone();
        }
        let mut keep: Vec<usize> = vec![0];
        for i in 1..self.nodes.len() {
            let distinct = keep
                .iter()
                .all(|&j| self.moveout_distance(i, j) > threshold);
            if distinct {
                keep.push(i);
            }
        }
        info!(
            removed = self.nodes.len() - keep.len(),
            kept = keep.len(),
            "removed near-duplicate moveout nodes"
        );
        self.select(&keep)
    }

    /// L1 network moveout distance between nodes `i` and `j`.
    pub fn moveout_distance(&self, i: usize, j: usize) -> f64 {
        self.lags
            .iter()
            .map(|row| (row[i] - row[j]).abs())
            .sum()
    }

    /// Re-slice to the given node indices, preserving per-station
    /// alignment.
    fn select(&self, keep: &[usize]) -> Self {
        let nodes = keep.iter().map(|&i| self.nodes[i]).collect();
        let lags = self
            .lags
            .iter()
            .map(|row| keep.iter().map(|&i| row[i]).collect())
            .collect();
        Self::from_parts(self.stations.clone(), nodes, lags)
    }
}

// ============================================================================
// File Reading
// ============================================================================

/// Find the travel-time file for one station, `*.{phase}.{station}.time.csv`.
fn find_grid_file(
    dir: &Path,
    phase: Phase,
    station: &str,
) -> Result<Option<std::path::PathBuf>, GridError> {
    let suffix = format!(".{}.{}.time.csv", phase, station);
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(&suffix) {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

/// Parse one travel-time CSV: space-delimited `lat lon depth traveltime`.
fn read_grid_file(path: &Path) -> Result<(Vec<Node>, Vec<f64>), GridError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut nodes = Vec::new();
    let mut traveltimes = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(GridError::MalformedRow {
                file: path.display().to_string(),
                line: idx + 1,
                reason: format!("expected 4 fields, got {}", fields.len()),
            });
        }
        let parse = |s: &str| -> Result<f64, GridError> {
            s.parse::<f64>().map_err(|e| GridError::MalformedRow {
                file: path.display().to_string(),
                line: idx + 1,
                reason: e.to_string(),
            })
        };
        nodes.push(Node::new(parse(fields[0])?, parse(fields[1])?, parse(fields[2])?));
        traveltimes.push(parse(fields[3])?);
    }
    Ok((nodes, traveltimes))
}

/// Convert travel times between phases with a fixed velocity ratio.
fn convert_phase(traveltimes: &mut [f64], phase: Phase, phase_out: Phase, ps_ratio: f64) {
    if phase == phase_out {
        return;
    }
    match phase {
        // S grid requested as P: S is slower, divide
        Phase::S => traveltimes.iter_mut().for_each(|t| *t /= ps_ratio),
        // P grid requested as S: multiply
        Phase::P => traveltimes.iter_mut().for_each(|t| *t *= ps_ratio),
    }
}

/// Shift a station's travel times so its minimum is zero.
fn rezero(traveltimes: &mut [f64]) {
    let min = traveltimes.iter().copied().fold(f64::INFINITY, f64::min);
    if min.is_finite() {
        traveltimes.iter_mut().for_each(|t| *t -= min);
    }
}
