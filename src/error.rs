//! Error types for MPF hierarchy operations

use std::fmt;
use thiserror::Error;

/// Pass of a hierarchy evaluation in which a unit failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Forward,
    Backward,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Forward => write!(f, "forward"),
            Phase::Backward => write!(f, "backward"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MpfError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Sampling error: {0}")]
    Sampling(String),

    #[error("Ordering error: {0}")]
    Ordering(String),

    #[error("Unit L{level}#{index} failed in {phase} pass: {source}")]
    Unit {
        level: usize,
        index: usize,
        phase: Phase,
        #[source]
        source: Box<MpfError>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MpfError {
    /// Attach unit location and pass to an error raised inside a unit
    pub fn in_unit(self, level: usize, index: usize, phase: Phase) -> Self {
        MpfError::Unit {
            level,
            index,
            phase,
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for MpfError {
    fn from(e: serde_json::Error) -> Self {
        MpfError::SerializationError(e.to_string())
    }
}
