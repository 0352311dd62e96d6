//! # Hierarchy Controller
//!
//! Builds the unit tree from leaf (sensor/actuator) units and drives one
//! forward + backward sweep per evaluation.
//!
//! ## Construction
//!
//! ```text
//! level 2 (root)              [R]
//!                          /       \
//! level 1              [A]           [B]
//!                     /   \        /  |  \
//! level 0 (leaves)  [0]   [1]    [2] [3] [4]   ← last group absorbs the odd leaf
//! ```
//!
//! Units live in one arena: leaves first (in input order), then internal units
//! level by level, the root last. Parent links are arena indices and do not
//! own anything.
//!
//! ## Evaluation
//!
//! 1. Slice the input per leaf and run each leaf's forward pass; a parent fires
//!    once all of its children have reported (fan-in).
//! 2. Run the root's backward pass on a fresh uniform random vector; every unit
//!    hands its children their slices of its generated output.
//! 3. Concatenate the leaves' outputs and return the last leaf's part.

use crate::config::{HierarchyConfig, LevelShape, ReinforcementMode};
use crate::error::{MpfError, Phase};
use crate::snapshot::{
    HierarchySnapshot, JsonSnapshotSink, SnapshotRecord, SnapshotSink, AFTER_BACKWARD,
    AFTER_FORWARD,
};
use crate::som::KernelKind;
use crate::unit::{MpfUnit, UnitConfig, UnitId, UnitRole};
use crate::MpfResult;
use ndarray::{s, Array1, ArrayView1, ArrayViewMut1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;

/// Reinforcement signal as seen by the units
#[derive(Debug, Clone, Default)]
pub struct ReinforcementState {
    mode: ReinforcementMode,
    prime: f64,
    max_abs_prime: f64,
    previous: f64,
    previous_prime: f64,
}

impl ReinforcementState {
    pub fn new(mode: ReinforcementMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Current reinforcement prime
    pub fn prime(&self) -> f64 {
        self.prime
    }

    pub fn max_abs_prime(&self) -> f64 {
        self.max_abs_prime
    }

    /// Fold a new reinforcement sample into the state
    pub fn update(&mut self, reinforcement: f64) -> f64 {
        match self.mode {
            ReinforcementMode::PassThrough => self.prime = reinforcement,
            ReinforcementMode::Derivative { decay } => {
                let delta = reinforcement - self.previous;
                let mut prime = if self.max_abs_prime == 0.0 {
                    delta
                } else {
                    delta / self.max_abs_prime
                };
                if prime.abs() > self.max_abs_prime {
                    self.max_abs_prime = prime.abs();
                }
                self.previous = reinforcement;

                prime = decay * prime + (1.0 - decay) * self.previous_prime;
                self.previous_prime = prime;
                self.prime = prime;
            }
        }
        self.prime
    }
}

/// Tree of MPF units with a flat input/output interface
pub struct Hierarchy {
    config: HierarchyConfig,
    units: Vec<MpfUnit>,
    leaf_count: usize,
    leaf_ranges: Vec<Range<usize>>,
    root: UnitId,
    time: u64,
    reinforcement: ReinforcementState,
    output: Array1<f64>,
    sink: Option<Box<dyn SnapshotSink>>,
    rng: StdRng,
}

impl fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hierarchy")
            .field("levels", &self.config.levels)
            .field("units", &self.units.len())
            .field("leaves", &self.leaf_count)
            .field("time", &self.time)
            .field("reinforcement", &self.reinforcement)
            .field("dumping", &self.sink.is_some())
            .finish()
    }
}

impl Hierarchy {
    /// Build a hierarchy with default level shapes.
    ///
    /// An empty `dump_path` or a zero `dump_period` disables snapshots.
    pub fn construct(
        leaves: Vec<MpfUnit>,
        levels: usize,
        dump_period: u64,
        dump_path: impl AsRef<Path>,
    ) -> MpfResult<Self> {
        let mut config = HierarchyConfig::new(levels);
        config.dump_period = dump_period;
        if !dump_path.as_ref().as_os_str().is_empty() {
            config.dump_path = Some(dump_path.as_ref().to_path_buf());
        }
        Self::with_config(leaves, config)
    }

    pub fn with_config(leaves: Vec<MpfUnit>, config: HierarchyConfig) -> MpfResult<Self> {
        config.validate()?;

        if leaves.is_empty() {
            return Err(MpfError::Configuration(
                "hierarchy needs at least one leaf unit".into(),
            ));
        }
        for (i, leaf) in leaves.iter().enumerate() {
            if leaf.role() == UnitRole::Internal {
                return Err(MpfError::Configuration(format!(
                    "leaf {} is an internal unit",
                    i
                )));
            }
            if leaf.parent().is_some() || !leaf.children().is_empty() {
                return Err(MpfError::Configuration(format!(
                    "leaf {} is already linked into a tree",
                    i
                )));
            }
        }

        let mut leaf_ranges = Vec::with_capacity(leaves.len());
        let mut pos = 0;
        for leaf in &leaves {
            leaf_ranges.push(pos..pos + leaf.input_dim());
            pos += leaf.input_dim();
        }

        let spatial_kernel = config
            .spatial_kernel
            .unwrap_or_else(|| leaves[0].spatial().kernel_kind());
        let temporal_kernel = config
            .temporal_kernel
            .or_else(|| leaves[0].temporal().map(|t| t.kernel_kind()))
            .unwrap_or(spatial_kernel);

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let sink: Option<Box<dyn SnapshotSink>> = match (&config.dump_path, config.dump_period) {
            (Some(path), period) if period > 0 => Some(Box::new(JsonSnapshotSink::new(path))),
            _ => None,
        };

        let leaf_count = leaves.len();
        let mut hierarchy = Self {
            config,
            units: leaves,
            leaf_count,
            leaf_ranges,
            root: 0,
            time: 0,
            reinforcement: ReinforcementState::default(),
            output: Array1::zeros(pos),
            sink,
            rng,
        };
        hierarchy.reinforcement = ReinforcementState::new(hierarchy.config.reinforcement);
        hierarchy.build_tree(spatial_kernel, temporal_kernel)?;

        log::info!(
            "Built MPF hierarchy: {} levels, {} leaves, {} units, input dim {}",
            hierarchy.config.levels,
            hierarchy.leaf_count,
            hierarchy.units.len(),
            hierarchy.input_dim()
        );
        Ok(hierarchy)
    }

    fn build_tree(&mut self, spatial: KernelKind, temporal: KernelKind) -> MpfResult<()> {
        let levels = self.config.levels;
        let mut current: Vec<UnitId> = (0..self.leaf_count).collect();

        for level in 1..levels - 1 {
            let groups = (current.len() / 2).max(1);
            let mut next = Vec::with_capacity(groups);

            for i in 0..groups {
                let first = i * 2;
                let last = if i == groups - 1 {
                    current.len()
                } else {
                    (i + 1) * 2
                };
                let shape = self.config.intermediate_shape;
                next.push(self.add_unit(&current[first..last], shape, level, spatial, temporal)?);
            }

            current = next;
        }

        let shape = self.config.top_shape;
        self.root = self.add_unit(&current, shape, levels - 1, spatial, temporal)?;
        Ok(())
    }

    fn add_unit(
        &mut self,
        children: &[UnitId],
        shape: LevelShape,
        level: usize,
        spatial: KernelKind,
        temporal: KernelKind,
    ) -> MpfResult<UnitId> {
        let input_dim = children.iter().map(|&c| self.units[c].output_dim()).sum();
        let config = UnitConfig::internal(
            level,
            input_dim,
            shape.spatial,
            shape.temporal,
            spatial,
            temporal,
        )
        .with_seed(self.rng.gen())
        .with_parallel(self.config.parallel);

        let id = self.units.len();
        let mut unit = MpfUnit::new(config)?;
        for &child in children {
            let range = unit.add_child(child, self.units[child].output_dim())?;
            self.units[child].set_parent(id, range);
        }

        log::debug!(
            "Added L{} unit {} over children {:?} ({} inputs)",
            level,
            id,
            children,
            input_dim
        );
        self.units.push(unit);
        Ok(id)
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// Evaluations performed so far
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn reinforcement(&self) -> &ReinforcementState {
        &self.reinforcement
    }

    pub fn units(&self) -> &[MpfUnit] {
        &self.units
    }

    pub fn unit(&self, id: UnitId) -> Option<&MpfUnit> {
        self.units.get(id)
    }

    pub fn leaves(&self) -> &[MpfUnit] {
        &self.units[..self.leaf_count]
    }

    pub fn leaf_ranges(&self) -> &[Range<usize>] {
        &self.leaf_ranges
    }

    pub fn root_id(&self) -> UnitId {
        self.root
    }

    pub fn root(&self) -> &MpfUnit {
        &self.units[self.root]
    }

    /// Length of the flat input (and full output) vector
    pub fn input_dim(&self) -> usize {
        self.output.len()
    }

    /// Full prediction of the last evaluation, all leaves concatenated
    pub fn output(&self) -> &Array1<f64> {
        &self.output
    }

    /// Replace the snapshot sink (dumping still follows `dump_period`)
    pub fn set_sink(&mut self, sink: Box<dyn SnapshotSink>) {
        self.sink = Some(sink);
    }

    fn should_dump(&self) -> bool {
        self.sink.is_some()
            && self.config.dump_period > 0
            && self.time % self.config.dump_period == 0
    }

    fn locate(&self, id: UnitId, err: MpfError, phase: Phase) -> MpfError {
        err.in_unit(self.units[id].level(), id, phase)
    }

    /// Evaluate once: forward sweep, backward sweep, return the actuator slice
    pub fn evaluate(&mut self, input: &[f64], reinforcement: f64) -> MpfResult<Array1<f64>> {
        if input.len() != self.input_dim() {
            return Err(MpfError::DimensionMismatch {
                expected: self.input_dim(),
                got: input.len(),
            });
        }
        if !(-1.0..=1.0).contains(&reinforcement) {
            log::debug!(
                "Reinforcement {} outside [-1, 1] at t={}",
                reinforcement,
                self.time
            );
        }

        let prime = self.reinforcement.update(reinforcement);
        let mut record = self.should_dump().then(|| SnapshotRecord::new(self.time));

        let input = ArrayView1::from(input);
        for leaf in 0..self.leaf_count {
            let range = self.leaf_ranges[leaf].clone();
            self.forward_from(leaf, input.slice(s![range]), prime)?;
        }

        if let Some(record) = record.as_mut() {
            record.insert(AFTER_FORWARD, self.snapshot());
        }

        let top_dim = self.units[self.root].output_dim();
        let mut top_down = Array1::from_shape_fn(top_dim, |_| self.rng.gen::<f64>());
        self.backward_from(self.root, top_down.view_mut())?;

        for leaf in 0..self.leaf_count {
            let range = self.leaf_ranges[leaf].clone();
            self.output
                .slice_mut(s![range])
                .assign(self.units[leaf].accumulator());
        }

        if let Some(mut record) = record {
            record.insert(AFTER_BACKWARD, self.snapshot());
            self.write_record(&record);
        }

        self.time += 1;
        Ok(self.actuator_output())
    }

    /// Output slice of the last leaf
    pub fn actuator_output(&self) -> Array1<f64> {
        let range = self.leaf_ranges[self.leaf_count - 1].clone();
        self.output.slice(s![range]).to_owned()
    }

    fn forward_from(&mut self, leaf: UnitId, input: ArrayView1<f64>, prime: f64) -> MpfResult<()> {
        self.units[leaf]
            .forward_pass(input, prime)
            .map_err(|e| self.locate(leaf, e, Phase::Forward))?;

        let mut current = leaf;
        while let Some(link) = self.units[current].parent().cloned() {
            let activation = self.units[current].output_activation().clone();
            if !self.units[link.id].receive_child_output(link.range, &activation) {
                break;
            }

            self.units[link.id]
                .forward_from_children(prime)
                .map_err(|e| self.locate(link.id, e, Phase::Forward))?;
            current = link.id;
        }
        Ok(())
    }

    fn backward_from(&mut self, id: UnitId, from_parent: ArrayViewMut1<f64>) -> MpfResult<()> {
        self.units[id]
            .backward_pass(from_parent)
            .map_err(|e| self.locate(id, e, Phase::Backward))?;

        let children = self.units[id].children().to_vec();
        if children.is_empty() {
            return Ok(());
        }

        // children get exclusive sub-views of this unit's output
        let mut output = self.units[id].take_accumulator();
        let mut result = Ok(());
        for link in &children {
            result = self.backward_from(link.id, output.slice_mut(s![link.range.clone()]));
            if result.is_err() {
                break;
            }
        }
        self.units[id].restore_accumulator(output);
        result
    }

    fn write_record(&mut self, record: &SnapshotRecord) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write(record) {
                log::warn!("Snapshot at t={} not written: {}", record.time, e);
            }
        }
    }

    /// Current state of every unit
    pub fn snapshot(&self) -> HierarchySnapshot {
        let units: BTreeMap<String, _> = self
            .units
            .iter()
            .enumerate()
            .map(|(i, unit)| (format!("unit_L{}__{:03}", unit.level(), i), unit.snapshot()))
            .collect();

        HierarchySnapshot {
            time: self.time,
            reinforcement_prime: self.reinforcement.prime(),
            max_abs_reinforcement_prime: self.reinforcement.max_abs_prime(),
            output: self.output.to_vec(),
            units,
        }
    }
}
