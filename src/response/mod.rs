//! Cumulative network response reduction.
//!
//! Reduces the per-node energy traces into a single elementwise-maximum
//! trace with provenance: for every time sample, the value of the
//! brightest node and the index of the node that produced it.
//!
//! Two operating modes with identical output:
//!
//! - **In-memory**: all traces are present at once and folded in node
//!   order.
//! - **Out-of-core**: traces live in scratch slots. The node index range
//!   is split into contiguous chunks, one per worker; each worker folds
//!   its chunk sequentially (deleting each slot as soon as it is
//!   consumed) and the partial results are folded across chunks.
//!
//! Tie policy, everywhere: the first node to reach a given maximum wins.
//! The owner at sample `t` is always the *lowest* node index achieving
//! the global maximum there, no matter how the work was partitioned.

use crate::scratch::{ScratchError, ScratchStore};
use rayon::prelude::*;
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

/// Errors in response reduction
#[derive(Error, Debug)]
pub enum ReduceError {
    #[error("no energy traces to reduce")]
    Empty,

    #[error("node {node}: trace length {actual} does not match window length {expected}")]
    LengthMismatch {
        node: usize,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Scratch(#[from] ScratchError),
}

/// The cumulative network response: per-sample maximum energy across all
/// nodes, with the owning node index alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeResponse {
    pub values: Vec<f64>,
    pub owners: Vec<usize>,
}

impl CumulativeResponse {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fold another node's trace into the running response.
    ///
    /// Strict `>` keeps the already-accumulated node on ties, which is
    /// what makes the whole reduction first-wins.
    fn fold_trace(&mut self, node: usize, trace: &[f64]) -> Result<(), ReduceError> {
        if trace.len() != self.values.len() {
            return Err(ReduceError::LengthMismatch {
                node,
                expected: self.values.len(),
                actual: trace.len(),
            });
        }
        for (t, &v) in trace.iter().enumerate() {
            if v > self.values[t] {
                self.values[t] = v;
                self.owners[t] = node;
            }
        }
        Ok(())
    }

    fn seed(node: usize, trace: Vec<f64>) -> Self {
        let owners = vec![node; trace.len()];
        Self { values: trace, owners }
    }
}

// ============================================================================
// In-Memory Reduction
// ============================================================================

/// Reduce per-node energy traces held in memory.
///
/// `traces[i]` is the energy trace of node `i`.
pub fn reduce_in_memory(traces: &[Vec<f64>]) -> Result<CumulativeResponse, ReduceError> {
    let (first, rest) = traces.split_first().ok_or(ReduceError::Empty)?;
    let mut response = CumulativeResponse::seed(0, first.clone());
    for (offset, trace) in rest.iter().enumerate() {
        response.fold_trace(offset + 1, trace)?;
    }
    Ok(response)
}

// ============================================================================
// Out-of-Core Reduction
// ============================================================================

/// Split `0..node_count` into at most `workers` contiguous, non-empty
/// chunks that exactly cover the range.
///
/// The first `node_count % workers` chunks carry one extra node, so no
/// node is ever omitted or double-counted for awkward count/worker
/// combinations.
pub fn partition_chunks(node_count: usize, workers: usize) -> Vec<Range<usize>> {
    if node_count == 0 || workers == 0 {
        return Vec::new();
    }
    let workers = workers.min(node_count);
    let base = node_count / workers;
    let remainder = node_count % workers;
    let mut chunks = Vec::with_capacity(workers);
    let mut start = 0;
    for w in 0..workers {
        let size = base + usize::from(w < remainder);
        chunks.push(start..start + size);
        start += size;
    }
    chunks
}

/// Reduce per-node energy traces stored in scratch slots.
///
/// Each chunk is folded by one worker; every consumed slot is deleted
/// immediately to bound peak disk usage. The cross-chunk fold walks the
/// partials in ascending chunk order with the same strict-`>` policy, so
/// the final owner at each sample is the lowest node index achieving the
/// global maximum — identical to [`reduce_in_memory`].
pub fn reduce_out_of_core(
    scratch: &ScratchStore,
    node_count: usize,
    workers: usize,
) -> Result<CumulativeResponse, ReduceError> {
    let chunks = partition_chunks(node_count, workers);
    if chunks.is_empty() {
        return Err(ReduceError::Empty);
    }
    debug!(node_count, chunks = chunks.len(), "out-of-core reduction");

    let partials: Vec<CumulativeResponse> = chunks
        .into_par_iter()
        .map(|chunk| fold_chunk(scratch, chunk))
        .collect::<Result<_, _>>()?;

    let mut iter = partials.into_iter();
    let mut response = iter.next().ok_or(ReduceError::Empty)?;
    for partial in iter {
        if partial.len() != response.len() {
            return Err(ReduceError::LengthMismatch {
                node: partial.owners.first().copied().unwrap_or(0),
                expected: response.len(),
                actual: partial.len(),
            });
        }
        for t in 0..response.len() {
            if partial.values[t] > response.values[t] {
                response.values[t] = partial.values[t];
                response.owners[t] = partial.owners[t];
            }
        }
    }
    Ok(response)
}

/// Sequentially fold one contiguous node range from scratch slots.
fn fold_chunk(
    scratch: &ScratchStore,
    chunk: Range<usize>,
) -> Result<CumulativeResponse, ReduceError> {
    let mut nodes = chunk.clone();
    let first = nodes.next().ok_or(ReduceError::Empty)?;
    let first_trace = scratch.read_trace(first)?;
    scratch.remove_trace(first)?;
    let mut response = CumulativeResponse::seed(first, first_trace);

    for node in nodes {
        let trace = scratch.read_trace(node)?;
        response.fold_trace(node, &trace)?;
        scratch.remove_trace(node)?;
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_argmax_with_provenance() {
        let traces = vec![
            vec![1.0, 0.0, 2.0],
            vec![0.5, 3.0, 2.5],
            vec![0.9, 1.0, 0.1],
        ];
        let resp = reduce_in_memory(&traces).unwrap();
        assert_eq!(resp.values, vec![1.0, 3.0, 2.5]);
        assert_eq!(resp.owners, vec![0, 1, 1]);
    }

    #[test]
    fn ties_go_to_the_lowest_node_index() {
        let traces = vec![vec![2.0, 1.0], vec![2.0, 1.0], vec![2.0, 0.5]];
        let resp = reduce_in_memory(&traces).unwrap();
        assert_eq!(resp.owners, vec![0, 0]);
    }

    #[test]
    fn empty_trace_set_is_an_error() {
        assert!(matches!(reduce_in_memory(&[]), Err(ReduceError::Empty)));
    }

    #[test]
    fn mismatched_lengths_are_fatal() {
        let traces = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(matches!(
            reduce_in_memory(&traces),
            Err(ReduceError::LengthMismatch { node: 1, .. })
        ));
    }

    #[test]
    fn chunks_cover_every_node_exactly_once() {
        for node_count in [1, 2, 3, 7, 8, 9, 100, 101] {
            for workers in [1, 2, 3, 4, 7, 8, 16, 200] {
                let chunks = partition_chunks(node_count, workers);
                let mut covered = vec![0usize; node_count];
                for chunk in &chunks {
                    assert!(!chunk.is_empty(), "empty chunk for n={node_count} w={workers}");
                    for i in chunk.clone() {
                        covered[i] += 1;
                    }
                }
                assert!(
                    covered.iter().all(|&c| c == 1),
                    "bad cover for n={node_count} w={workers}: {covered:?}"
                );
                // Contiguity: chunk k starts where chunk k-1 ended
                let mut expected_start = 0;
                for chunk in &chunks {
                    assert_eq!(chunk.start, expected_start);
                    expected_start = chunk.end;
                }
                assert_eq!(expected_start, node_count);
            }
        }
    }

    #[test]
    fn out_of_core_matches_in_memory_for_any_partitioning() {
        let traces = vec![
            vec![1.0, 5.0, 0.0, 2.0],
            vec![1.0, 4.0, 6.0, 2.0],
            vec![0.0, 5.0, 6.0, 2.0],
            vec![1.0, 0.0, 0.0, 9.0],
            vec![0.5, 0.5, 0.5, 9.0],
        ];
        let expected = reduce_in_memory(&traces).unwrap();

        for workers in 1..=7 {
            let root = tempfile::tempdir().unwrap();
            let scratch = ScratchStore::create(root.path(), 0).unwrap();
            for (node, trace) in traces.iter().enumerate() {
                scratch.write_trace(node, trace).unwrap();
            }
            let resp = reduce_out_of_core(&scratch, traces.len(), workers).unwrap();
            assert_eq!(resp, expected, "workers={workers}");
        }
    }

    #[test]
    fn out_of_core_deletes_consumed_slots() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchStore::create(root.path(), 0).unwrap();
        for node in 0..4 {
            scratch.write_trace(node, &[node as f64]).unwrap();
        }
        reduce_out_of_core(&scratch, 4, 2).unwrap();
        for node in 0..4 {
            assert!(scratch.read_trace(node).is_err(), "slot {node} not deleted");
        }
    }
}
