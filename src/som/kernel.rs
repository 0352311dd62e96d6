//! Neuron update kernels
//!
//! Two online rules move the lattice toward the input, both weighted by a
//! Gaussian neighbourhood around the winning neuron:
//!
//! - **Online** (Miller & Lommel): neighbourhood width follows the mean
//!   squared error at the winner, so learning never depends on time.
//! - **Parameterless** (Berglund & Sitte): error is normalized by the largest
//!   winner distance seen so far and also scales the step size.

use super::lattice::Lattice;
use crate::EPS;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Closed set of update rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelKind {
    Online,
    Parameterless,
}

/// Update rule together with the state it carries between calls
#[derive(Debug, Clone)]
pub enum UpdateKernel {
    Online,
    Parameterless {
        /// Running maximum of the winner distance (never decreases)
        max_distance: f64,
    },
}

impl UpdateKernel {
    pub fn new(kind: KernelKind) -> Self {
        match kind {
            KernelKind::Online => UpdateKernel::Online,
            KernelKind::Parameterless => UpdateKernel::Parameterless { max_distance: EPS },
        }
    }

    pub fn kind(&self) -> KernelKind {
        match self {
            UpdateKernel::Online => KernelKind::Online,
            UpdateKernel::Parameterless { .. } => KernelKind::Parameterless,
        }
    }

    /// Per-neuron step factors for a winner at `bmu`, or `None` when the
    /// rule decides not to move anything.
    pub fn step_factors(
        &mut self,
        lattice: &Lattice,
        bmu: usize,
        diff: &Array2<f64>,
        nh_constant: f64,
    ) -> Option<Array1<f64>> {
        let bmu_diff = diff.row(bmu);
        let bmu_sq = bmu_diff.dot(&bmu_diff);

        match self {
            UpdateKernel::Online => {
                let dim = diff.ncols().max(1) as f64;
                let model_error = (bmu_sq / dim).max(EPS);
                let denom = model_error * nh_constant * nh_constant;
                Some(lattice.gaussian_neighbourhood(bmu, denom))
            }
            UpdateKernel::Parameterless { max_distance } => {
                let distance = bmu_sq.sqrt();
                *max_distance = max_distance.max(distance);
                let model_error = distance / *max_distance;

                if model_error <= 0.0 {
                    return None;
                }

                let sigma = (nh_constant * model_error).max(1.0);
                let nh = lattice.gaussian_neighbourhood(bmu, sigma * sigma);
                Some(nh * model_error)
            }
        }
    }

    /// Apply the rule: `neurons += diff * step`
    pub fn update_kernel(
        &mut self,
        lattice: &Lattice,
        bmu: usize,
        diff: &Array2<f64>,
        nh_constant: f64,
        neurons: &mut Array2<f64>,
    ) {
        if let Some(step) = self.step_factors(lattice, bmu, diff, nh_constant) {
            let step = step.insert_axis(Axis(1));
            *neurons += &(diff * &step);
        }
    }
}
