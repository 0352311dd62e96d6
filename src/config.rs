//! Hierarchy configuration

use crate::error::MpfError;
use crate::som::KernelKind;
use crate::MpfResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Lattice shapes of the SOM pair created for an internal unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelShape {
    pub spatial: (usize, usize),
    pub temporal: (usize, usize),
}

impl LevelShape {
    pub const fn new(spatial: (usize, usize), temporal: (usize, usize)) -> Self {
        Self { spatial, temporal }
    }
}

/// How the reinforcement scalar becomes the hierarchy's reinforcement state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReinforcementMode {
    /// Use the scalar as given
    PassThrough,
    /// Smoothed first derivative of the scalar, normalized by its largest
    /// magnitude seen so far
    Derivative { decay: f64 },
}

impl Default for ReinforcementMode {
    fn default() -> Self {
        ReinforcementMode::PassThrough
    }
}

/// Configuration for building and running a hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    /// Total number of levels, leaves included (at least 2)
    pub levels: usize,
    /// Dump a snapshot every `dump_period` evaluations (0 disables)
    pub dump_period: u64,
    /// Directory receiving snapshot files
    pub dump_path: Option<PathBuf>,
    /// Shapes for units between the leaves and the root
    pub intermediate_shape: LevelShape,
    /// Shapes for the root unit
    pub top_shape: LevelShape,
    /// Spatial kernel of internal units; the leaves' kernel when absent
    pub spatial_kernel: Option<KernelKind>,
    /// Temporal kernel of internal units; derived from the leaves when absent
    pub temporal_kernel: Option<KernelKind>,
    pub reinforcement: ReinforcementMode,
    /// Seed for internal units and the root's backward input
    pub seed: Option<u64>,
    /// Parallel distance computation in internal units
    pub parallel: bool,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            dump_period: 0,
            dump_path: None,
            intermediate_shape: LevelShape::new((3, 3), (4, 4)),
            top_shape: LevelShape::new((20, 20), (10, 10)),
            spatial_kernel: None,
            temporal_kernel: None,
            reinforcement: ReinforcementMode::PassThrough,
            seed: None,
            parallel: false,
        }
    }
}

impl HierarchyConfig {
    pub fn new(levels: usize) -> Self {
        Self {
            levels,
            ..Default::default()
        }
    }

    pub fn with_dump(mut self, period: u64, path: impl AsRef<Path>) -> Self {
        self.dump_period = period;
        self.dump_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_shapes(mut self, intermediate: LevelShape, top: LevelShape) -> Self {
        self.intermediate_shape = intermediate;
        self.top_shape = top;
        self
    }

    pub fn with_temporal_kernel(mut self, kernel: KernelKind) -> Self {
        self.temporal_kernel = Some(kernel);
        self
    }

    pub fn with_reinforcement(mut self, mode: ReinforcementMode) -> Self {
        self.reinforcement = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> MpfResult<()> {
        if self.levels < 2 {
            return Err(MpfError::Configuration(format!(
                "hierarchy needs at least 2 levels, got {}",
                self.levels
            )));
        }
        for (name, shape) in [("intermediate", self.intermediate_shape), ("top", self.top_shape)] {
            let (sw, sh) = shape.spatial;
            let (tw, th) = shape.temporal;
            if sw * sh == 0 || tw * th == 0 {
                return Err(MpfError::Configuration(format!(
                    "{} level shape has an empty lattice: {:?}",
                    name, shape
                )));
            }
        }
        if let ReinforcementMode::Derivative { decay } = self.reinforcement {
            if !(0.0..=1.0).contains(&decay) {
                return Err(MpfError::Configuration(format!(
                    "reinforcement decay must lie in [0, 1], got {}",
                    decay
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> MpfResult<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> MpfResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }
}
