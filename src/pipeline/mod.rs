//! Scan orchestration.
//!
//! Runs the full brightness pipeline over one analysis window:
//!
//! 1. Energy stacking — one task per node on a fixed-size worker pool,
//!    in-memory or spilling to scratch slots.
//! 2. Reduction to the cumulative network response.
//! 3. Detection picking.
//! 4. Template extraction and coherence-based acceptance.
//!
//! The pool is sized `min(core budget, hardware parallelism, units of
//! work)` and shared by both parallel phases. Any failed task aborts the
//! whole run: a silently missing node would corrupt the "true global
//! maximum" guarantee of the response, so there is no degraded mode.

use crate::coherence::coherence;
use crate::config::ScanConfig;
use crate::grid::TravelTimeGrid;
use crate::picker::{find_detections, PickError};
use crate::response::{reduce_in_memory, reduce_out_of_core, CumulativeResponse, ReduceError};
use crate::scratch::{ScratchError, ScratchStore};
use crate::stack::{stack_node, ChannelTrace, StackError, WaveformSet};
use crate::types::{Detection, Node};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors aborting a scan
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("travel-time grid has no nodes")]
    EmptyGrid,

    #[error("no grid station has waveform data in the analysis window")]
    NoWaveforms,

    #[error("detection owner node {0} is not present in the grid")]
    InconsistentOwner(String),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Reduce(#[from] ReduceError),

    #[error(transparent)]
    Pick(#[from] PickError),

    #[error(transparent)]
    Scratch(#[from] ScratchError),
}

// ============================================================================
// Outcome Types
// ============================================================================

/// An accepted template: the extracted waveform window and the node it
/// originated from.
#[derive(Debug, Clone)]
pub struct Template {
    pub node: Node,
    pub traces: Vec<ChannelTrace>,
    /// Network coherence score the template was accepted with
    pub coherence: f64,
}

/// Everything a scan produces.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// All detections picked from the network response, coherent or not
    pub detections: Vec<Detection>,
    /// Templates that passed the coherence filter
    pub templates: Vec<Template>,
    /// Distinct node identities among the accepted templates
    pub accepted_nodes: Vec<Node>,
}

// ============================================================================
// Scan Driver
// ============================================================================

/// Run one brightness scan.
///
/// `instance` keys this run's scratch slots; concurrent pipelines
/// sharing a scratch root must pass distinct values.
pub fn scan(
    config: &ScanConfig,
    grid: &TravelTimeGrid,
    waveforms: &WaveformSet,
    instance: u64,
) -> Result<ScanOutcome, PipelineError> {
    let node_count = grid.node_count();
    if node_count == 0 {
        return Err(PipelineError::EmptyGrid);
    }
    let real_stations = waveforms.real_stations(grid.stations());
    if real_stations.is_empty() {
        return Err(PipelineError::NoWaveforms);
    }

    // Optional precision/memory tradeoff for the stacking phase only;
    // template extraction always reads the full-precision set
    let working = if config.energy.downcast_f32 {
        waveforms.downcast_f32()
    } else {
        waveforms.clone()
    };

    let hardware = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let threads = config.compute.cores.min(hardware).min(node_count);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    info!(
        nodes = node_count,
        stations = real_stations.len(),
        threads,
        out_of_core = config.compute.out_of_core,
        "computing energy stacks"
    );

    let stations = grid.stations();
    let clip_level = config.energy.clip_level;

    let response = if config.compute.out_of_core {
        let scratch = ScratchStore::create(&config.compute.scratch_dir, instance)?;
        let result = stack_and_reduce_out_of_core(
            &pool, &scratch, grid, &working, clip_level, node_count, threads,
        );
        // The run directory goes away whether the phase succeeded or
        // aborted: leftover slots from failed runs would otherwise pile
        // up under the shared scratch root
        match result {
            Ok(response) => {
                scratch.remove_all()?;
                response
            }
            Err(err) => {
                if let Err(cleanup) = scratch.remove_all() {
                    warn!(error = %cleanup, "could not clean scratch area after aborted run");
                }
                return Err(err);
            }
        }
    } else {
        let traces: Vec<Vec<f64>> = pool.install(|| {
            (0..node_count)
                .into_par_iter()
                .map(|i| stack_node(i, stations, &grid.lag_column(i), &working, clip_level))
                .collect::<Result<_, _>>()
        })?;
        reduce_in_memory(&traces)?
    };

    info!("finding detections in the cumulative network response");
    let detections = find_detections(
        &response,
        grid.nodes(),
        config.detection.threshold_mode,
        config.detection.threshold_multiplier,
        waveforms.sample_rate(),
        config.detection.template_length_secs,
        &real_stations,
    )?;

    let mut templates = Vec::new();
    let mut accepted_nodes: Vec<Node> = Vec::new();
    for detection in &detections {
        let Some(node_index) = grid.nodes().iter().position(|n| n == &detection.node) else {
            // Owner nodes come straight from the grid; not finding one
            // means the response is inconsistent with the grid
            return Err(PipelineError::InconsistentOwner(detection.node.key()));
        };
        let traces = extract_template(
            waveforms,
            &real_stations,
            &grid.lag_column(node_index),
            stations,
            detection.time_secs,
            config.detection.template_length_secs,
        );
        let score = coherence(&traces);
        if score > config.detection.coherence_threshold {
            info!(
                node = %detection.node.key(),
                score = format!("{score:.3}"),
                "template accepted"
            );
            if !accepted_nodes.iter().any(|n| n == &detection.node) {
                accepted_nodes.push(detection.node);
            }
            templates.push(Template {
                node: detection.node,
                traces,
                coherence: score,
            });
        } else {
            info!(
                node = %detection.node.key(),
                score = format!("{score:.3}"),
                threshold = config.detection.coherence_threshold,
                "template incoherent, discarded"
            );
        }
    }
    Ok(ScanOutcome {
        detections,
        templates,
        accepted_nodes,
    })
}

/// The two out-of-core phases, separated out so the caller can clean the
/// scratch area on either exit path.
fn stack_and_reduce_out_of_core(
    pool: &rayon::ThreadPool,
    scratch: &ScratchStore,
    grid: &TravelTimeGrid,
    working: &WaveformSet,
    clip_level: f64,
    node_count: usize,
    threads: usize,
) -> Result<CumulativeResponse, PipelineError> {
    let stations = grid.stations();
    pool.install(|| {
        (0..node_count)
            .into_par_iter()
            .try_for_each(|i| -> Result<(), PipelineError> {
                let trace = stack_node(i, stations, &grid.lag_column(i), working, clip_level)?;
                scratch.write_trace(i, &trace)?;
                Ok(())
            })
    })?;
    debug!("stacking phase complete, folding scratch slots");
    let response = pool.install(|| reduce_out_of_core(scratch, node_count, threads))?;
    Ok(response)
}

/// Cut the template window for one detection from the full-precision
/// waveforms.
///
/// Each station's window starts at the detection time plus that
/// station's lag for the detection's node, and runs for the template
/// duration.
fn extract_template(
    waveforms: &WaveformSet,
    real_stations: &[String],
    lag_column: &[f64],
    grid_stations: &[String],
    detect_time_secs: f64,
    template_length_secs: f64,
) -> Vec<ChannelTrace> {
    let mut traces = Vec::new();
    for station in real_stations {
        let Some(s) = grid_stations.iter().position(|g| g == station) else {
            continue;
        };
        let lag = lag_column[s];
        for tr in waveforms.select_station(station) {
            let start_secs = detect_time_secs + lag;
            let start = (start_secs * tr.sample_rate).round() as usize;
            if start >= tr.data.len() {
                continue;
            }
            let len = (template_length_secs * tr.sample_rate).round() as usize;
            let end = (start + len).min(tr.data.len());
            traces.push(ChannelTrace {
                station: tr.station.clone(),
                channel: tr.channel.clone(),
                start_time: tr.start_time
                    + chrono::Duration::milliseconds((start_secs * 1000.0).round() as i64),
                sample_rate: tr.sample_rate,
                data: tr.data[start..end].to_vec(),
            });
        }
    }
    traces
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trace(station: &str, data: Vec<f64>) -> ChannelTrace {
        ChannelTrace {
            station: station.to_string(),
            channel: "SHZ".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap(),
            sample_rate: 1.0,
            data,
        }
    }

    #[test]
    fn empty_grid_is_rejected() {
        let grid = TravelTimeGrid::from_parts(vec!["AAA".into()], vec![], vec![vec![]]);
        let waveforms = WaveformSet::new(vec![trace("AAA", vec![0.0; 10])]);
        let err = scan(&ScanConfig::default(), &grid, &waveforms, 0).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyGrid));
    }

    #[test]
    fn no_station_overlap_is_rejected() {
        let grid = TravelTimeGrid::from_parts(
            vec!["AAA".into()],
            vec![Node::new(0.0, 0.0, 5.0)],
            vec![vec![0.0]],
        );
        let waveforms = WaveformSet::new(vec![trace("ZZZ", vec![0.0; 10])]);
        let err = scan(&ScanConfig::default(), &grid, &waveforms, 0).unwrap_err();
        assert!(matches!(err, PipelineError::NoWaveforms));
    }

    #[test]
    fn aborted_out_of_core_run_cleans_its_scratch_area() {
        let grid = TravelTimeGrid::from_parts(
            vec!["AAA".into(), "BBB".into()],
            vec![Node::new(0.0, 0.0, 5.0)],
            vec![vec![0.0], vec![0.0]],
        );
        // Mismatched trace lengths make the stacking phase abort
        let waveforms = WaveformSet::new(vec![
            trace("AAA", vec![1.0; 10]),
            trace("BBB", vec![1.0; 8]),
        ]);
        let root = tempfile::tempdir().unwrap();
        let mut config = ScanConfig::default();
        config.compute.out_of_core = true;
        config.compute.scratch_dir = root.path().to_path_buf();

        // A slot already sitting in this run's scratch area must be
        // swept up with it
        let pre = ScratchStore::create(root.path(), 42).unwrap();
        pre.write_trace(0, &[1.0]).unwrap();

        let err = scan(&config, &grid, &waveforms, 42).unwrap_err();
        assert!(matches!(err, PipelineError::Stack(_)));
        assert!(
            !root.path().join("brightnet_run_42").exists(),
            "scratch area must be removed when the run aborts"
        );
    }

    #[test]
    fn template_window_applies_station_lag() {
        let waveforms = WaveformSet::new(vec![
            trace("AAA", (0..20).map(|i| i as f64).collect()),
            trace("BBB", (0..20).map(|i| i as f64).collect()),
        ]);
        let stations = vec!["AAA".to_string(), "BBB".to_string()];
        let traces = extract_template(&waveforms, &stations, &[0.0, 3.0], &stations, 2.0, 4.0);
        assert_eq!(traces.len(), 2);
        // AAA window starts at sample 2, BBB at sample 5
        assert_eq!(traces[0].data, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(traces[1].data, vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn template_window_clamps_at_data_end() {
        let waveforms = WaveformSet::new(vec![trace("AAA", (0..10).map(|i| i as f64).collect())]);
        let stations = vec!["AAA".to_string()];
        let traces = extract_template(&waveforms, &stations, &[0.0], &stations, 8.0, 6.0);
        assert_eq!(traces[0].data, vec![8.0, 9.0]);
    }
}
