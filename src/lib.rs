//! # MPF Hierarchy
//!
//! A memory-prediction framework built from self-organizing maps. Units pair
//! a spatial SOM with a recurrent temporal SOM, stack into a tree, and run one
//! bottom-up inference sweep plus one top-down generative sweep per time
//! step. A scalar reinforcement signal biases the top-down predictions toward
//! rewarded states, so the hierarchy's output doubles as an action.
//!
//! ## Features
//! - Online (Miller) and parameterless (PL-SOM) weight updates
//! - Recurrent SOM smoothing for temporal pooling
//! - Markov next-state prediction over SOM winners
//! - Categorical and Gaussian-mixture generative sampling
//! - Reward-correlated output biasing with decaying schedules
//! - Periodic JSON snapshots of the whole hierarchy
//!
//! ## Architecture
//!
//! ```text
//! input ─┬─► [leaf 0] ─┐
//!        ├─► [leaf 1] ─┼─► [L1 units] ─► ... ─► [root]
//!        └─► [leaf n] ─┘                           │
//!                                           random top-down
//!                                                  │
//! output ◄── leaf outputs ◄── [L1 units] ◄── ... ◄─┘
//! ```

// Core modules
pub mod error;
pub mod noise;
pub mod som;
pub mod unit;

// Hierarchy and persistence
pub mod config;
pub mod hierarchy;
pub mod snapshot;

// Adapters
pub mod board;

// Integration tests
#[cfg(test)]
mod tests;

pub use error::{MpfError, Phase};
pub use noise::{NoiseConfig, NoiseGenerator};
pub use som::{
    CovarianceMode, GenerativeModel, KernelKind, Lattice, Likelihood, MarkovPredictor,
    MixtureModel, Som, SomConfig, UpdateKernel,
};
pub use unit::{MpfUnit, RewardConfig, UnitConfig, UnitId, UnitRole};
pub use config::{HierarchyConfig, LevelShape, ReinforcementMode};
pub use hierarchy::{Hierarchy, ReinforcementState};
pub use snapshot::{
    HierarchySnapshot, JsonSnapshotSink, SnapshotRecord, SnapshotSink, SomSnapshot,
    UnitSnapshot,
};
pub use board::{BoardAgent, Outcome, Side};

/// Result type for hierarchy operations
pub type MpfResult<T> = Result<T, MpfError>;

/// Smallest positive value used to floor norms and sums
pub const EPS: f64 = f64::EPSILON;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        // SOM engine
        KernelKind,
        Likelihood,
        Som,
        SomConfig,

        // Units and hierarchy
        Hierarchy,
        HierarchyConfig,
        MpfUnit,
        ReinforcementMode,
        UnitConfig,

        // Result type
        MpfError,
        MpfResult,
    };
}
