//! Detection picking from the cumulative network response.
//!
//! Resolves a threshold from the response (MAD, absolute, or RMS),
//! extracts well-separated local maxima above it, and maps each peak to
//! the node that owned the response at that sample.

use crate::response::CumulativeResponse;
use crate::types::{Detection, Node, ThresholdMode};
use thiserror::Error;
use tracing::info;

/// Errors in detection picking
#[derive(Error, Debug)]
pub enum PickError {
    /// Non-finite values survived the zero-replacement scrub. Should be
    /// unreachable; if it fires, the response upstream is corrupted and
    /// no detection output can be trusted.
    #[error("non-finite values remain in the network response after scrubbing")]
    NonFinite,

    #[error("network response owner table length {owners} does not match values length {values}")]
    ShapeMismatch { values: usize, owners: usize },
}

// ============================================================================
// Threshold Resolution
// ============================================================================

/// Resolve the detection threshold for a response trace.
pub fn resolve_threshold(cnr: &[f64], mode: ThresholdMode, multiplier: f64) -> f64 {
    match mode {
        ThresholdMode::Mad => median_abs(cnr) * multiplier,
        ThresholdMode::Abs => multiplier,
        ThresholdMode::Rms => rms(cnr) * multiplier,
    }
}

/// Median of the absolute values (robust scale of the response).
fn median_abs(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.iter().map(|v| v.abs()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

// ============================================================================
// Peak Extraction
// ============================================================================

/// Find local maxima above `threshold`, at least `min_separation`
/// samples apart.
///
/// Only samples that are local maxima of the response qualify — a
/// monotone flank above threshold (the decaying tail of a large event)
/// is not a sequence of detections. Within an exclusion window the
/// higher value wins: candidates are visited in descending value order
/// (lowest index first on equal values) and accepted only when clear of
/// every already-accepted peak. Returned peaks are in time order.
pub fn find_peaks(cnr: &[f64], threshold: f64, min_separation: usize) -> Vec<(usize, f64)> {
    let min_separation = min_separation.max(1);
    let mut candidates: Vec<(usize, f64)> = cnr
        .iter()
        .enumerate()
        .filter(|&(i, &v)| v > threshold && is_local_max(cnr, i))
        .map(|(i, &v)| (i, v))
        .collect();
    candidates.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let mut accepted: Vec<(usize, f64)> = Vec::new();
    for (i, v) in candidates {
        let clear = accepted
            .iter()
            .all(|&(p, _)| i.abs_diff(p) >= min_separation);
        if clear {
            accepted.push((i, v));
        }
    }
    accepted.sort_by_key(|&(i, _)| i);
    accepted
}

/// A sample is a local maximum when neither neighbor exceeds it; the
/// window edges only have one neighbor to beat.
fn is_local_max(cnr: &[f64], i: usize) -> bool {
    let left_ok = i == 0 || cnr[i] >= cnr[i - 1];
    let right_ok = i + 1 >= cnr.len() || cnr[i] >= cnr[i + 1];
    left_ok && right_ok
}

// ============================================================================
// Detection Construction
// ============================================================================

/// Pick detections out of a cumulative network response.
///
/// Non-finite response values are replaced with zero before
/// thresholding. `min_separation_secs` is the enforced gap between
/// accepted detections (the template duration). An empty result is a
/// perfectly valid outcome.
pub fn find_detections(
    response: &CumulativeResponse,
    nodes: &[Node],
    mode: ThresholdMode,
    multiplier: f64,
    sample_rate: f64,
    min_separation_secs: f64,
    stations: &[String],
) -> Result<Vec<Detection>, PickError> {
    if response.values.len() != response.owners.len() {
        return Err(PickError::ShapeMismatch {
            values: response.values.len(),
            owners: response.owners.len(),
        });
    }

    let cnr: Vec<f64> = response
        .values
        .iter()
        .map(|v| if v.is_finite() { *v } else { 0.0 })
        .collect();
    if cnr.iter().any(|v| !v.is_finite()) {
        return Err(PickError::NonFinite);
    }

    let threshold = resolve_threshold(&cnr, mode, multiplier);
    let max = cnr.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    info!(
        %mode,
        threshold = format!("{threshold:.4}"),
        mad = format!("{:.4}", median_abs(&cnr)),
        rms = format!("{:.4}", rms(&cnr)),
        max = format!("{max:.4}"),
        "picking detections"
    );

    let min_separation = (min_separation_secs * sample_rate).round() as usize;
    let peaks = find_peaks(&cnr, threshold, min_separation);

    let detections: Vec<Detection> = peaks
        .into_iter()
        .map(|(p, v)| Detection {
            node: nodes[response.owners[p]],
            time_secs: p as f64 / sample_rate,
            station_count: stations.len(),
            peak_value: v,
            threshold,
            method: "brightness".to_string(),
            stations: stations.to_vec(),
        })
        .collect();
    info!(count = detections.len(), "possible detections found");
    Ok(detections)
}
