//! Shared domain types for the brightness scan pipeline.
//!
//! Index alignment is the central invariant of the whole pipeline: a
//! [`Node`] at index `i` of the grid's node sequence corresponds to the
//! `i`-th lag entry of *every* station, and every downstream array
//! (energy traces, cumulative response owner indices) refers to nodes by
//! that same index.

use serde::{Deserialize, Serialize};

// ============================================================================
// Grid Nodes
// ============================================================================

/// A candidate source location in the 3D search grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Depth in km (positive down)
    pub depth_km: f64,
}

impl Node {
    pub fn new(latitude: f64, longitude: f64, depth_km: f64) -> Self {
        Self { latitude, longitude, depth_km }
    }

    /// Composite identity key, `lat_lon_depth`.
    ///
    /// Used to carry node identity through detection records and to
    /// deduplicate the accepted-node set at the end of a scan.
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.latitude, self.longitude, self.depth_km)
    }
}

// ============================================================================
// Threshold Modes
// ============================================================================

/// How the detection threshold is derived from the cumulative network
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// Median absolute value of the response × multiplier (robust scale)
    Mad,
    /// Multiplier used directly as an absolute threshold
    Abs,
    /// Root-mean-square of the response × multiplier
    Rms,
}

impl std::fmt::Display for ThresholdMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdMode::Mad => write!(f, "MAD"),
            ThresholdMode::Abs => write!(f, "abs"),
            ThresholdMode::Rms => write!(f, "RMS"),
        }
    }
}

// ============================================================================
// Detections
// ============================================================================

/// One detection picked from the cumulative network response.
///
/// Immutable once constructed; handed to template extraction and the
/// coherence filter as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Source node the peak sample was attributed to
    pub node: Node,
    /// Detection time in seconds from the start of the analysis window
    pub time_secs: f64,
    /// Number of stations that contributed data to the scan
    pub station_count: usize,
    /// Peak value of the network response at the detection sample
    pub peak_value: f64,
    /// Threshold value in force when the peak was accepted
    pub threshold: f64,
    /// Detection method tag (always `"brightness"` for this pipeline)
    pub method: String,
    /// Names of the contributing stations
    pub stations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_key_is_stable_composite() {
        let node = Node::new(-43.5, 170.25, 12.0);
        assert_eq!(node.key(), "-43.5_170.25_12");
    }

    #[test]
    fn threshold_mode_serde_round_trip() {
        let mode: ThresholdMode = toml::from_str::<toml::Value>("v = \"mad\"")
            .unwrap()
            .get("v")
            .unwrap()
            .clone()
            .try_into()
            .unwrap();
        assert_eq!(mode, ThresholdMode::Mad);
        assert_eq!(ThresholdMode::Rms.to_string(), "RMS");
    }
}
