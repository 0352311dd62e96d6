//! Generative extension of the SOM
//!
//! Two ways of turning an activation-like vector back into input space:
//!
//! 1. **Categorical**: neuron indices are categories with a probability mass
//!    given by the vector; the drawn neurons' weights (plus noise) are returned.
//! 2. **Mixture**: every neuron is the mean of a Gaussian component whose
//!    covariance comes from the differences to its direct lattice neighbours.
//!    No EM is involved; the lattice itself is the fitted model.

use super::lattice::Lattice;
use crate::error::MpfError;
use crate::MpfResult;
use ndarray::{s, Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Covariance sharing between mixture components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovarianceMode {
    /// Distinct covariance per neuron
    Full,
    /// One averaged covariance for every neuron
    Tied,
}

#[derive(Debug, Clone)]
pub enum GenerativeModel {
    Categorical,
    Mixture(MixtureModel),
}

/// Draw `count` indices from the unnormalized weights by inverse-CDF lookup
pub fn sample_categorical(
    weights: ArrayView1<f64>,
    count: usize,
    rng: &mut StdRng,
) -> MpfResult<Vec<usize>> {
    let mut bins: Vec<f64> = Vec::with_capacity(weights.len());
    let mut total = 0.0;
    for w in weights.iter() {
        total += w.abs();
        bins.push(total);
    }

    if total == 0.0 || !total.is_finite() {
        return Err(MpfError::Sampling(format!(
            "cumulative distribution total is {} over {} categories",
            total,
            weights.len()
        )));
    }

    for b in bins.iter_mut() {
        *b /= total;
    }

    let last = bins.len() - 1;
    Ok((0..count)
        .map(|_| {
            let r: f64 = rng.gen();
            bins.partition_point(|&b| b <= r).min(last)
        })
        .collect())
}

/// Neighbour-derived Gaussian mixture over the lattice
#[derive(Debug, Clone)]
pub struct MixtureModel {
    mode: CovarianceMode,
    /// Neighbour index per slot; out-of-lattice slots point at the neuron itself
    neighbours: Vec<[usize; 4]>,
    /// `1 / sqrt(adjacent_count)` per neuron
    norm: Vec<f64>,
    scale: f64,
    covariances: Vec<Array2<f64>>,
}

impl MixtureModel {
    pub fn new(lattice: &Lattice, dim: usize, mode: CovarianceMode, scale: f64) -> Self {
        let mut neighbours = Vec::with_capacity(lattice.len());
        let mut norm = Vec::with_capacity(lattice.len());

        for i in 0..lattice.len() {
            let adjacent = lattice.neighbours(i);
            let count = adjacent.iter().filter(|n| n.is_some()).count();
            neighbours.push(adjacent.map(|n| n.unwrap_or(i)));
            norm.push(1.0 / (count.max(1) as f64).sqrt());
        }

        let components = match mode {
            CovarianceMode::Full => lattice.len(),
            CovarianceMode::Tied => 1,
        };

        Self {
            mode,
            neighbours,
            norm,
            scale,
            covariances: vec![Array2::zeros((dim, dim)); components],
        }
    }

    pub fn mode(&self) -> CovarianceMode {
        self.mode
    }

    /// Covariances from the last refresh (one entry in tied mode)
    pub fn covariances(&self) -> &[Array2<f64>] {
        &self.covariances
    }

    /// Scaled neighbour differences, D x 4, for one neuron
    fn difference_factor(&self, neurons: &Array2<f64>, i: usize) -> Array2<f64> {
        let dim = neurons.ncols();
        let center = neurons.row(i);
        let factor = self.norm[i] * self.scale;

        let mut data = Array2::zeros((dim, 4));
        for (slot, &nb) in self.neighbours[i].iter().enumerate() {
            let col = (&neurons.row(nb) - &center) * factor;
            data.column_mut(slot).assign(&col);
        }
        data
    }

    /// Recompute covariances from the current lattice weights
    pub fn refresh(&mut self, neurons: &Array2<f64>) {
        match self.mode {
            CovarianceMode::Full => {
                for i in 0..neurons.nrows() {
                    let data = self.difference_factor(neurons, i);
                    self.covariances[i] = data.dot(&data.t());
                }
            }
            CovarianceMode::Tied => {
                let dim = neurons.ncols();
                let mut mean = Array2::zeros((dim, dim));
                for i in 0..neurons.nrows() {
                    let data = self.difference_factor(neurons, i);
                    mean += &data.dot(&data.t());
                }
                mean /= neurons.nrows().max(1) as f64;
                self.covariances[0] = mean;
            }
        }
    }

    fn covariance_of(&self, component: usize) -> &Array2<f64> {
        match self.mode {
            CovarianceMode::Full => &self.covariances[component],
            CovarianceMode::Tied => &self.covariances[0],
        }
    }

    /// Draw `count` samples with component weights `weights`
    pub fn sample(
        &mut self,
        neurons: &Array2<f64>,
        weights: ArrayView1<f64>,
        count: usize,
        rng: &mut StdRng,
    ) -> MpfResult<Array2<f64>> {
        self.refresh(neurons);

        let components = sample_categorical(weights, count, rng)?;
        let dim = neurons.ncols();
        let mut samples = Array2::zeros((count, dim));

        for (row, &c) in components.iter().enumerate() {
            let chol = cholesky(self.covariance_of(c));
            let z: Array1<f64> = Array1::from_shape_fn(dim, |_| rng.sample(StandardNormal));
            let x = &neurons.row(c) + &chol.dot(&z);
            samples.row_mut(row).assign(&x);
        }

        Ok(samples)
    }
}

/// Lower-triangular factor of a positive semi-definite matrix.
///
/// Non-positive pivots zero their column, so rank-deficient covariances
/// (at most rank 4 here) still factor.
pub fn cholesky(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for j in 0..n {
        let row_j = l.row(j);
        let residual = a[[j, j]] - row_j.slice(s![..j]).dot(&row_j.slice(s![..j]));
        if residual <= crate::EPS {
            continue;
        }
        let pivot = residual.sqrt();
        l[[j, j]] = pivot;

        for i in (j + 1)..n {
            let dot = l
                .row(i)
                .slice(s![..j])
                .dot(&l.row(j).slice(s![..j]));
            l[[i, j]] = (a[[i, j]] - dot) / pivot;
        }
    }

    l
}
