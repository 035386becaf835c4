//! brightnet: network brightness detection of seismic events.
//!
//! Scans a 3D grid of candidate source locations against continuous
//! multi-station waveform data, following the Frank & Shapiro (2014)
//! brightness method: remove per-station travel-time delays, stack
//! energy across the network per node, reduce to a cumulative network
//! response, pick well-separated peaks, and keep only candidates whose
//! waveforms are coherent across channels.
//!
//! ## Pipeline
//!
//! - **grid**: travel-time lag table ingestion, sub-volume resampling,
//!   near-duplicate moveout removal
//! - **stack**: per-node lag-aligned energy stacking (the parallel unit)
//! - **response**: cumulative network response with node provenance,
//!   in-memory or out-of-core
//! - **picker**: MAD/abs/RMS thresholds and minimum-separation peaks
//! - **coherence**: pairwise cross-correlation template acceptance
//! - **pipeline**: the scan driver tying the phases together

pub mod coherence;
pub mod config;
pub mod grid;
pub mod io;
pub mod picker;
pub mod pipeline;
pub mod response;
pub mod scratch;
pub mod stack;
pub mod types;

// Re-export the surface a typical scan touches
pub use config::{ComputeConfig, DetectionConfig, EnergyConfig, GridConfig, ScanConfig};
pub use grid::{Phase, Polygon, TravelTimeGrid};
pub use pipeline::{scan, PipelineError, ScanOutcome, Template};
pub use response::CumulativeResponse;
pub use scratch::ScratchStore;
pub use stack::{ChannelTrace, WaveformSet};
pub use types::{Detection, Node, ThresholdMode};
