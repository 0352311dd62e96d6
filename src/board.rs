//! # Tic-Tac-Toe Agent
//!
//! Plays noughts and crosses by feeding the flattened 3×3 field through a
//! three-level hierarchy and reading the predicted field back as its move.
//!
//! Cell values: empty `0.0`, nought `0.5`, cross `1.0`. The generated field
//! is quantized to these values and then corrected into a legal move with as
//! few alterations as possible.

use crate::config::HierarchyConfig;
use crate::error::MpfError;
use crate::hierarchy::Hierarchy;
use crate::som::KernelKind;
use crate::unit::{MpfUnit, UnitConfig};
use crate::MpfResult;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub const EMPTY: f64 = 0.0;
pub const CELLS: usize = 9;

/// Which mark a player puts on the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Cross,
    Nought,
}

impl Side {
    /// Cell value of this side's mark
    pub fn value(self) -> f64 {
        match self {
            Side::Cross => 1.0,
            Side::Nought => 0.5,
        }
    }

    pub fn opponent(self) -> Side {
        match self {
            Side::Cross => Side::Nought,
            Side::Nought => Side::Cross,
        }
    }

    pub fn from_value(value: f64) -> Option<Side> {
        if value == Side::Cross.value() {
            Some(Side::Cross)
        } else if value == Side::Nought.value() {
            Some(Side::Nought)
        } else {
            None
        }
    }
}

/// Finished game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win(Side),
    Draw,
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Snap a generated cell value to the nearest mark
#[inline]
pub fn quantize(value: f64) -> f64 {
    if value <= 0.25 {
        EMPTY
    } else if value <= 0.75 {
        Side::Nought.value()
    } else {
        Side::Cross.value()
    }
}

/// Turn a proposed field into a legal move for `side`.
///
/// Occupied cells are restored, the first new `side` mark is kept and every
/// other new mark is cleared. Without a kept mark the first empty cell is
/// taken; a full field is left as is.
pub fn correct_move(previous: &[f64], proposed: &mut [f64], side: Side) {
    let mark = side.value();
    let mut move_made = false;

    for (prev, cell) in previous.iter().zip(proposed.iter_mut()) {
        if *prev == *cell {
            continue;
        }
        if *prev != EMPTY {
            *cell = *prev;
        } else if move_made || *cell != mark {
            *cell = EMPTY;
        } else {
            move_made = true;
        }
    }

    if !move_made {
        if let Some(cell) = proposed.iter_mut().find(|c| **c == EMPTY) {
            *cell = mark;
        }
    }
}

/// True when `next` is `previous` plus exactly one `side` mark on an empty cell
pub fn is_valid_move(previous: &[f64], next: &[f64], side: Side) -> bool {
    if previous.len() != next.len() {
        return false;
    }

    let mut placed = 0;
    for (prev, cell) in previous.iter().zip(next) {
        if prev == cell {
            continue;
        }
        if *prev != EMPTY || *cell != side.value() {
            return false;
        }
        placed += 1;
    }
    placed == 1
}

/// Winner or draw, `None` while the game goes on
pub fn outcome(field: &[f64]) -> Option<Outcome> {
    for line in LINES {
        let first = field[line[0]];
        if first != EMPTY && line.iter().all(|&i| field[i] == first) {
            if let Some(side) = Side::from_value(first) {
                return Some(Outcome::Win(side));
            }
        }
    }

    if field.iter().all(|&c| c != EMPTY) {
        Some(Outcome::Draw)
    } else {
        None
    }
}

/// Hierarchy-driven tic-tac-toe player
#[derive(Debug)]
pub struct BoardAgent {
    side: Side,
    hierarchy: Hierarchy,
}

impl BoardAgent {
    /// Agent with a fresh hierarchy
    pub fn init(side: Side) -> MpfResult<Self> {
        Self::with_config(side, Self::default_config())
    }

    /// Agent with a reproducible hierarchy
    pub fn with_seed(side: Side, seed: u64) -> MpfResult<Self> {
        Self::with_config(side, Self::default_config().with_seed(seed))
    }

    /// Three levels, Online temporal SOMs above the leaves
    pub fn default_config() -> HierarchyConfig {
        HierarchyConfig::new(3).with_temporal_kernel(KernelKind::Online)
    }

    /// Agent over three row sensors; leaf seeds derive from `config.seed`
    pub fn with_config(side: Side, config: HierarchyConfig) -> MpfResult<Self> {
        let leaves = (0..3)
            .map(|i| {
                let mut leaf = UnitConfig::sensor(3, (5, 5), KernelKind::Online);
                if let Some(seed) = config.seed {
                    leaf = leaf.with_seed(seed.wrapping_add(i * 2 + 1));
                }
                MpfUnit::new(leaf)
            })
            .collect::<MpfResult<Vec<_>>>()?;

        log::info!("Tic-tac-toe agent playing {:?}", side);
        Ok(Self {
            side,
            hierarchy: Hierarchy::with_config(leaves, config)?,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Evaluate the field and write the agent's move into it
    pub fn make_move(&mut self, field: &mut Array2<f64>, reinforcement: f64) -> MpfResult<()> {
        if field.len() != CELLS {
            return Err(MpfError::DimensionMismatch {
                expected: CELLS,
                got: field.len(),
            });
        }

        let previous: Vec<f64> = field.iter().copied().collect();
        self.hierarchy.evaluate(&previous, reinforcement)?;

        let mut proposed: Vec<f64> = self.hierarchy.output().iter().map(|&v| quantize(v)).collect();
        correct_move(&previous, &mut proposed, self.side);

        for (cell, value) in field.iter_mut().zip(proposed) {
            *cell = value;
        }
        Ok(())
    }
}
