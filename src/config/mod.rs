//! Scan configuration loaded from TOML.
//!
//! Every tunable of the pipeline lives here as an explicit value object
//! handed to the components that need it — there is no process-global
//! configuration state.
//!
//! ## Loading Order
//!
//! 1. `BRIGHTNET_CONFIG` environment variable (path to a TOML file)
//! 2. `brightnet.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Every section and field is optional in the file; missing keys fall
//! back to the documented defaults.

use crate::grid::Phase;
use crate::types::ThresholdMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one brightness scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Travel-time grid preparation
    #[serde(default)]
    pub grid: GridConfig,

    /// Energy stacking
    #[serde(default)]
    pub energy: EnergyConfig,

    /// Thresholding, peak picking and template acceptance
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Worker pool and memory mode
    #[serde(default)]
    pub compute: ComputeConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            energy: EnergyConfig::default(),
            detection: DetectionConfig::default(),
            compute: ComputeConfig::default(),
        }
    }
}

/// Travel-time grid options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Phase the travel-time files on disk were computed for
    #[serde(default = "default_phase")]
    pub phase: Phase,

    /// Phase the scan should run in (converted via `ps_ratio` if needed)
    #[serde(default = "default_phase_out")]
    pub phase_out: Phase,

    /// P-to-S velocity ratio used for phase conversion
    #[serde(default = "default_ps_ratio")]
    pub ps_ratio: f64,

    /// Collapse nodes whose network moveout differs by no more than this
    /// many seconds. `None` skips deduplication.
    #[serde(default)]
    pub dedup_threshold_secs: Option<f64>,

    /// Optional sub-volume cut applied before deduplication
    #[serde(default)]
    pub resample: Option<ResampleConfig>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            phase: default_phase(),
            phase_out: default_phase_out(),
            ps_ratio: default_ps_ratio(),
            dedup_threshold_secs: None,
            resample: None,
        }
    }
}

/// Sub-volume bounds for grid resampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResampleConfig {
    /// Upper depth bound in km (nodes must be strictly deeper)
    pub min_depth_km: f64,
    /// Lower depth bound in km (nodes must be strictly shallower)
    pub max_depth_km: f64,
    /// (latitude, longitude) corners of the 2D boundary polygon
    pub boundary: Vec<(f64, f64)>,
}

/// Energy stacking options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyConfig {
    /// Envelope values are capped at this multiple of the per-station
    /// mean energy, bounding the influence of spikes and glitches
    #[serde(default = "default_clip_level")]
    pub clip_level: f64,

    /// Narrow samples through f32 before energy computation. Explicit
    /// precision/memory tradeoff for very long analysis windows; off by
    /// default.
    #[serde(default)]
    pub downcast_f32: bool,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            clip_level: default_clip_level(),
            downcast_f32: false,
        }
    }
}

/// Detection and template acceptance options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// How the threshold is derived from the network response
    #[serde(default = "default_threshold_mode")]
    pub threshold_mode: ThresholdMode,

    /// Meaning depends on `threshold_mode`: a scale factor for MAD/RMS,
    /// the threshold itself for abs
    #[serde(default = "default_multiplier")]
    pub threshold_multiplier: f64,

    /// Template duration; also the minimum separation between accepted
    /// detections
    #[serde(default = "default_template_length")]
    pub template_length_secs: f64,

    /// Candidate templates scoring at or below this network coherence
    /// are discarded
    #[serde(default = "default_coherence_threshold")]
    pub coherence_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_mode: default_threshold_mode(),
            threshold_multiplier: default_multiplier(),
            template_length_secs: default_template_length(),
            coherence_threshold: default_coherence_threshold(),
        }
    }
}

/// Worker pool and memory mode options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Core budget for the worker pool. The effective pool size is the
    /// minimum of this, the hardware parallelism, and the number of
    /// units of work.
    #[serde(default = "default_cores")]
    pub cores: usize,

    /// Persist per-node energy traces to scratch slots instead of
    /// holding them all in memory
    #[serde(default)]
    pub out_of_core: bool,

    /// Scratch root for out-of-core runs; each run instance gets its own
    /// subdirectory
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            cores: default_cores(),
            out_of_core: false,
            scratch_dir: default_scratch_dir(),
        }
    }
}

fn default_phase() -> Phase {
    Phase::S
}
fn default_phase_out() -> Phase {
    Phase::S
}
fn default_ps_ratio() -> f64 {
    1.68
}
fn default_clip_level() -> f64 {
    10.0
}
fn default_threshold_mode() -> ThresholdMode {
    ThresholdMode::Mad
}
fn default_multiplier() -> f64 {
    8.0
}
fn default_template_length() -> f64 {
    6.0
}
fn default_coherence_threshold() -> f64 {
    0.5
}
fn default_cores() -> usize {
    4
}
fn default_scratch_dir() -> PathBuf {
    PathBuf::from("scratch")
}

// ============================================================================
// Loading & Validation
// ============================================================================

impl ScanConfig {
    /// Load configuration using the documented search order.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("BRIGHTNET_CONFIG") {
            info!(path = %path, "loading config from BRIGHTNET_CONFIG");
            return Self::from_path(Path::new(&path));
        }
        let local = Path::new("brightnet.toml");
        if local.exists() {
            info!("loading config from ./brightnet.toml");
            return Self::from_path(local);
        }
        info!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load and validate a specific TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Physical range checks. Called by `from_path`; call directly when
    /// building a config in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| ConfigError::Invalid { field, reason };

        if self.grid.ps_ratio <= 0.0 {
            return Err(invalid("grid.ps_ratio", "must be positive".into()));
        }
        if let Some(threshold) = self.grid.dedup_threshold_secs {
            if threshold < 0.0 {
                return Err(invalid("grid.dedup_threshold_secs", "must be non-negative".into()));
            }
        }
        if let Some(resample) = &self.grid.resample {
            if resample.min_depth_km >= resample.max_depth_km {
                return Err(invalid(
                    "grid.resample",
                    format!(
                        "min_depth_km ({}) must be below max_depth_km ({})",
                        resample.min_depth_km, resample.max_depth_km
                    ),
                ));
            }
            if resample.boundary.len() < 3 {
                return Err(invalid(
                    "grid.resample.boundary",
                    "polygon needs at least 3 vertices".into(),
                ));
            }
        }
        if self.energy.clip_level <= 0.0 {
            return Err(invalid("energy.clip_level", "must be positive".into()));
        }
        if self.detection.threshold_multiplier <= 0.0 {
            return Err(invalid("detection.threshold_multiplier", "must be positive".into()));
        }
        if self.detection.template_length_secs <= 0.0 {
            return Err(invalid("detection.template_length_secs", "must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.detection.coherence_threshold) {
            return Err(invalid(
                "detection.coherence_threshold",
                "must be within [0, 1]".into(),
            ));
        }
        if self.compute.cores == 0 {
            return Err(invalid("compute.cores", "must be at least 1".into()));
        }
        if self.energy.downcast_f32 {
            warn!("energy.downcast_f32 enabled: samples narrowed to ~7 significant digits");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ScanConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ScanConfig = toml::from_str(
            r#"
            [detection]
            threshold_mode = "rms"
            threshold_multiplier = 12.0
            "#,
        )
        .unwrap();
        assert_eq!(config.detection.threshold_mode, ThresholdMode::Rms);
        assert_eq!(config.detection.threshold_multiplier, 12.0);
        assert_eq!(config.grid.ps_ratio, 1.68);
        assert_eq!(config.energy.clip_level, 10.0);
        assert!(!config.compute.out_of_core);
    }

    #[test]
    fn inverted_depth_bounds_are_rejected() {
        let mut config = ScanConfig::default();
        config.grid.resample = Some(ResampleConfig {
            min_depth_km: 20.0,
            max_depth_km: 5.0,
            boundary: vec![(0.0, 0.0), (0.0, 1.0), (1.0, 0.0)],
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "grid.resample", .. })
        ));
    }

    #[test]
    fn zero_cores_is_rejected() {
        let mut config = ScanConfig::default();
        config.compute.cores = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn coherence_threshold_out_of_range_is_rejected() {
        let mut config = ScanConfig::default();
        config.detection.coherence_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
