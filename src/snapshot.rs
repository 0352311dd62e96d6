//! # Hierarchy Snapshots
//!
//! Structured records of the hierarchy state, emitted every `dump_period`
//! evaluations so prediction error can be analysed offline.
//!
//! ## File Format
//!
//! `JsonSnapshotSink` writes one file per dumped time step:
//!
//! ```text
//! dump_dir/
//! ├── h_0.json
//! ├── h_100.json
//! └── h_200.json
//! ```
//!
//! Each file holds a [`SnapshotRecord`] with the phases `after_forward` and
//! `after_backward`.

use crate::error::MpfError;
use crate::som::KernelKind;
use crate::unit::UnitRole;
use crate::MpfResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Phase key after the bottom-up sweep
pub const AFTER_FORWARD: &str = "after_forward";
/// Phase key after the top-down sweep
pub const AFTER_BACKWARD: &str = "after_backward";

/// Lattice state of one SOM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SomSnapshot {
    pub width: usize,
    pub height: usize,
    pub kernel: KernelKind,
    pub recurrent: bool,
    pub neurons: Vec<Vec<f64>>,
    pub activation: Vec<f64>,
    pub last_model_bias: Option<f64>,
    pub last_bmu: Option<usize>,
    pub noise_magnitude: f64,
    /// Markov transition matrix, when the predictor is enabled
    pub transitions: Option<Vec<Vec<f64>>>,
    /// Mixture covariances, when the mixture model is enabled
    pub covariances: Option<Vec<Vec<Vec<f64>>>>,
}

/// State of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub role: UnitRole,
    pub level: usize,
    pub spatial: SomSnapshot,
    pub temporal: Option<SomSnapshot>,
    pub input: Vec<f64>,
    pub previous_input: Vec<f64>,
    pub output: Vec<f64>,
    pub previous_output: Vec<f64>,
    pub local_prediction: Vec<f64>,
    pub global_prediction: Vec<f64>,
    pub total_prediction: Vec<f64>,
    pub reward_correlation: Vec<f64>,
    pub output_bias: Vec<f64>,
    pub learning_rate: f64,
    pub bias_influence: f64,
}

/// Hierarchy state at one phase of an evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchySnapshot {
    pub time: u64,
    pub reinforcement_prime: f64,
    pub max_abs_reinforcement_prime: f64,
    pub output: Vec<f64>,
    /// Keyed `unit_L{level}__{counter:03}`
    pub units: BTreeMap<String, UnitSnapshot>,
}

/// Everything dumped for one time step, keyed by phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub time: u64,
    pub phases: BTreeMap<String, HierarchySnapshot>,
}

impl SnapshotRecord {
    pub fn new(time: u64) -> Self {
        Self {
            time,
            phases: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, phase: &str, snapshot: HierarchySnapshot) {
        self.phases.insert(phase.to_string(), snapshot);
    }

    pub fn phase(&self, phase: &str) -> Option<&HierarchySnapshot> {
        self.phases.get(phase)
    }
}

/// Write-only consumer of snapshot records
pub trait SnapshotSink: Send {
    fn write(&mut self, record: &SnapshotRecord) -> MpfResult<()>;
}

/// Sink writing `h_{time}.json` files into a directory
#[derive(Debug, Clone)]
pub struct JsonSnapshotSink {
    dir: PathBuf,
}

impl JsonSnapshotSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for a time step
    pub fn path_for(&self, time: u64) -> PathBuf {
        self.dir.join(format!("h_{}.json", time))
    }
}

impl SnapshotSink for JsonSnapshotSink {
    fn write(&mut self, record: &SnapshotRecord) -> MpfResult<()> {
        fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_string(record)?;
        let path = self.path_for(record.time);
        fs::write(&path, json)?;

        log::debug!("Wrote hierarchy snapshot to {:?}", path);
        Ok(())
    }
}

/// Load a record previously written by [`JsonSnapshotSink`]
pub fn load_snapshot(path: impl AsRef<Path>) -> MpfResult<SnapshotRecord> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)?;
    serde_json::from_str(&json)
        .map_err(|e| MpfError::SerializationError(format!("{}: {}", path.display(), e)))
}

/// List dumped time steps in a directory, oldest first
pub fn list_snapshots(dir: impl AsRef<Path>) -> MpfResult<Vec<(u64, PathBuf)>> {
    let dir = dir.as_ref();
    let mut found = Vec::new();

    if !dir.exists() {
        return Ok(found);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let time = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("h_"))
            .and_then(|n| n.strip_suffix(".json"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(time) = time {
            found.push((time, path));
        }
    }

    found.sort_by_key(|(t, _)| *t);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(time: u64) -> SnapshotRecord {
        let mut record = SnapshotRecord::new(time);
        record.insert(
            AFTER_FORWARD,
            HierarchySnapshot {
                time,
                reinforcement_prime: 0.5,
                max_abs_reinforcement_prime: 0.0,
                output: vec![0.1, 0.2],
                units: BTreeMap::new(),
            },
        );
        record
    }

    #[test]
    fn test_sink_writes_time_keyed_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut sink = JsonSnapshotSink::new(temp_dir.path().join("dumps"));

        sink.write(&record(0)).unwrap();
        sink.write(&record(20)).unwrap();

        let listed = list_snapshots(sink.dir()).unwrap();
        assert_eq!(listed.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec![0, 20]);

        let loaded = load_snapshot(sink.path_for(20)).unwrap();
        assert_eq!(loaded, record(20));
        assert!(loaded.phase(AFTER_FORWARD).is_some());
        assert!(loaded.phase(AFTER_BACKWARD).is_none());
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let listed = list_snapshots(temp_dir.path().join("nowhere")).unwrap();
        assert!(listed.is_empty());
    }
}
