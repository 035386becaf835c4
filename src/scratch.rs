//! On-disk scratch slots for out-of-core energy traces.
//!
//! When the per-node energy traces do not fit in memory, each stacking
//! task writes its trace to a slot keyed by (run instance, node index)
//! and the reduction phase streams the slots back, deleting each one as
//! soon as it has been folded in. The store is an explicit value handed
//! to both phases; nothing about the scratch location is ambient.
//!
//! Slots are raw little-endian f64 files. The instance id must be unique
//! among pipelines sharing a scratch root, otherwise concurrent runs
//! would collide on slot paths.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors accessing scratch slots
#[derive(Error, Debug)]
pub enum ScratchError {
    #[error("scratch slot for node {node} missing or unreadable: {source}")]
    Slot {
        node: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("scratch slot for node {node} is truncated ({len} bytes)")]
    Truncated { node: usize, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A per-run scratch area holding one trace file per node index.
#[derive(Debug, Clone)]
pub struct ScratchStore {
    dir: PathBuf,
}

impl ScratchStore {
    /// Open (creating if needed) the scratch area for one run instance.
    ///
    /// `instance` must differ between concurrently running pipelines that
    /// share `root`.
    pub fn create(root: &Path, instance: u64) -> Result<Self, ScratchError> {
        let dir = root.join(format!("brightnet_run_{instance}"));
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "scratch store ready");
        Ok(Self { dir })
    }

    fn slot_path(&self, node: usize) -> PathBuf {
        self.dir.join(format!("node_{node}.f64"))
    }

    /// Persist one node's energy trace.
    pub fn write_trace(&self, node: usize, trace: &[f64]) -> Result<(), ScratchError> {
        let mut file = fs::File::create(self.slot_path(node))?;
        let mut bytes = Vec::with_capacity(trace.len() * 8);
        for v in trace {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Read one node's energy trace back.
    pub fn read_trace(&self, node: usize) -> Result<Vec<f64>, ScratchError> {
        let mut file = fs::File::open(self.slot_path(node))
            .map_err(|source| ScratchError::Slot { node, source })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|source| ScratchError::Slot { node, source })?;
        if bytes.len() % 8 != 0 {
            return Err(ScratchError::Truncated { node, len: bytes.len() });
        }
        Ok(bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }

    /// Delete one node's slot. Called as soon as a trace has been folded
    /// into the running reduction, to bound peak disk usage.
    pub fn remove_trace(&self, node: usize) -> Result<(), ScratchError> {
        fs::remove_file(self.slot_path(node))
            .map_err(|source| ScratchError::Slot { node, source })
    }

    /// Remove the whole scratch area for this run.
    pub fn remove_all(&self) -> Result<(), ScratchError> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}
