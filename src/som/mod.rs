//! # Self-Organizing Map Engine
//!
//! A lattice of weight vectors trained online by competitive learning, with
//! the extensions used by MPF units:
//!
//! - **Spatial**: plain input-weight difference
//! - **Temporal (RSOM)**: exponentially decayed difference, giving the map
//!   short-term memory
//! - **Predictor**: first-order Markov chain over winning neurons
//! - **Generative**: categorical resampling of neurons, or a Gaussian mixture
//!   derived from the lattice
//!
//! ## Usage
//!
//! ```rust
//! use mpf_hierarchy::som::{KernelKind, Som, SomConfig};
//! use ndarray::aview1;
//!
//! let config = SomConfig::new(4, 4, 3, KernelKind::Online).with_seed(42);
//! let mut som = Som::new(config).unwrap();
//!
//! let (bmu, _weights) = som.feed(aview1(&[0.2, 0.5, 0.9])).unwrap();
//! assert!(bmu < 16);
//! ```

pub mod generative;
pub mod kernel;
pub mod lattice;
pub mod predictor;

pub use generative::{CovarianceMode, GenerativeModel, MixtureModel};
pub use kernel::{KernelKind, UpdateKernel};
pub use lattice::Lattice;
pub use predictor::MarkovPredictor;

use crate::error::MpfError;
use crate::noise::{NoiseConfig, NoiseGenerator};
use crate::snapshot::SomSnapshot;
use crate::{MpfResult, EPS};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Transform from squared distances to activation (likelihood)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Likelihood {
    /// `exp(-d / 2)`
    Gaussian,
    /// `1 - d / max(d)`
    Uniform,
}

impl Likelihood {
    pub fn apply(&self, distances: &Array1<f64>) -> Array1<f64> {
        match self {
            Likelihood::Gaussian => distances.mapv(|d| (-d / 2.0).exp()),
            Likelihood::Uniform => {
                let max = distances.fold(0.0_f64, |m, &d| m.max(d));
                let min = distances.fold(f64::INFINITY, |m, &d| m.min(d));
                // equidistant lattice: every neuron is equally likely
                if max - min <= EPS {
                    return Array1::ones(distances.len());
                }
                distances.mapv(|d| 1.0 - d / max)
            }
        }
    }
}

/// Configuration for a single SOM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SomConfig {
    /// Lattice width
    pub width: usize,
    /// Lattice height
    pub height: usize,
    /// Weight vector dimension
    pub input_dim: usize,
    /// Update rule
    pub kernel: KernelKind,
    /// Neighbourhood constant `k`
    pub neighborhood_constant: f64,
    /// Distance to activation transform
    pub likelihood: Likelihood,
    /// Enable the RSOM (decayed difference) extension
    pub recurrent: bool,
    /// RSOM decay constant
    pub decay: f64,
    /// Scale of neighbour differences in mixture covariances
    pub covariance_scale: f64,
    /// Noise added to categorical samples
    pub noise: NoiseConfig,
    /// RNG seed; entropy-seeded when absent
    pub seed: Option<u64>,
    /// Compute the distance vector with rayon
    pub parallel: bool,
}

impl Default for SomConfig {
    fn default() -> Self {
        Self {
            width: 5,
            height: 5,
            input_dim: 3,
            kernel: KernelKind::Online,
            neighborhood_constant: 2.3,
            likelihood: Likelihood::Uniform,
            recurrent: false,
            decay: 0.7,
            covariance_scale: 0.3,
            noise: NoiseConfig::None,
            seed: None,
            parallel: false,
        }
    }
}

impl SomConfig {
    pub fn new(width: usize, height: usize, input_dim: usize, kernel: KernelKind) -> Self {
        Self {
            width,
            height,
            input_dim,
            kernel,
            ..Default::default()
        }
    }

    pub fn with_recurrent(mut self, recurrent: bool) -> Self {
        self.recurrent = recurrent;
        self
    }

    pub fn with_noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_likelihood(mut self, likelihood: Likelihood) -> Self {
        self.likelihood = likelihood;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Number of neurons
    pub fn neurons(&self) -> usize {
        self.width * self.height
    }

    pub fn validate(&self) -> MpfResult<()> {
        if self.width == 0 || self.height == 0 || self.input_dim == 0 {
            return Err(MpfError::Configuration(format!(
                "SOM needs a non-empty lattice and input, got {}x{} over {} inputs",
                self.width, self.height, self.input_dim
            )));
        }
        if !(0.0..=1.0).contains(&self.decay) {
            return Err(MpfError::Configuration(format!(
                "RSOM decay must lie in [0, 1], got {}",
                self.decay
            )));
        }
        self.noise.validate()
    }
}

/// Self-organizing map with optional RSOM, predictor and generative extensions
#[derive(Debug, Clone)]
pub struct Som {
    config: SomConfig,
    lattice: Lattice,
    neurons: Array2<f64>,
    activation: Array1<f64>,
    last_model_bias: Option<f64>,
    last_bmu: Option<usize>,
    kernel: UpdateKernel,
    /// Difference matrix from the most recent BMU search
    diff: Array2<f64>,
    diff_ready: bool,
    /// RSOM memory of the previous difference
    recurrent_diff: Option<Array2<f64>>,
    predictor: Option<MarkovPredictor>,
    generative: GenerativeModel,
    noise: NoiseGenerator,
    rng: StdRng,
}

impl Som {
    /// Create a SOM with uniform random weights in `[0, 1)`
    pub fn new(config: SomConfig) -> MpfResult<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let neurons =
            Array2::from_shape_fn((config.neurons(), config.input_dim), |_| rng.gen::<f64>());
        Self::build(config, neurons, rng)
    }

    /// Create a SOM with explicit weights, one row per neuron
    pub fn from_weights(config: SomConfig, neurons: Array2<f64>) -> MpfResult<Self> {
        config.validate()?;
        if neurons.nrows() != config.neurons() {
            return Err(MpfError::DimensionMismatch {
                expected: config.neurons(),
                got: neurons.nrows(),
            });
        }
        if neurons.ncols() != config.input_dim {
            return Err(MpfError::DimensionMismatch {
                expected: config.input_dim,
                got: neurons.ncols(),
            });
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::build(config, neurons, rng)
    }

    fn build(config: SomConfig, neurons: Array2<f64>, rng: StdRng) -> MpfResult<Self> {
        let lattice = Lattice::new(config.width, config.height);
        let shape = neurons.raw_dim();
        let recurrent_diff = config.recurrent.then(|| Array2::zeros(shape.clone()));

        let noise = NoiseGenerator::new(config.noise.clone())?;

        Ok(Self {
            lattice,
            activation: Array1::zeros(config.neurons()),
            last_model_bias: None,
            last_bmu: None,
            kernel: UpdateKernel::new(config.kernel),
            diff: Array2::zeros(shape),
            diff_ready: false,
            recurrent_diff,
            predictor: None,
            generative: GenerativeModel::Categorical,
            noise,
            rng,
            neurons,
            config,
        })
    }

    pub fn config(&self) -> &SomConfig {
        &self.config
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn neurons(&self) -> &Array2<f64> {
        &self.neurons
    }

    /// Number of neurons
    pub fn len(&self) -> usize {
        self.neurons.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Weight vector dimension
    pub fn dim(&self) -> usize {
        self.neurons.ncols()
    }

    pub fn activation(&self) -> &Array1<f64> {
        &self.activation
    }

    pub fn activation_mut(&mut self) -> &mut Array1<f64> {
        &mut self.activation
    }

    /// Normalized distance between the last input and its BMU
    pub fn last_model_bias(&self) -> Option<f64> {
        self.last_model_bias
    }

    pub fn last_bmu(&self) -> Option<usize> {
        self.last_bmu
    }

    pub fn kernel_kind(&self) -> KernelKind {
        self.kernel.kind()
    }

    pub fn is_recurrent(&self) -> bool {
        self.recurrent_diff.is_some()
    }

    pub fn predictor(&self) -> Option<&MarkovPredictor> {
        self.predictor.as_ref()
    }

    pub fn generative_model(&self) -> &GenerativeModel {
        &self.generative
    }

    pub fn noise_magnitude(&self) -> f64 {
        self.noise.magnitude()
    }

    /// Enable the first-order Markov predictor
    pub fn init_predictor(&mut self) {
        self.predictor = Some(MarkovPredictor::new(self.len()));
    }

    /// Switch the generative model to the neighbour-derived Gaussian mixture
    pub fn init_generative_mixture(&mut self, mode: CovarianceMode) {
        let mut model =
            MixtureModel::new(&self.lattice, self.dim(), mode, self.config.covariance_scale);
        model.refresh(&self.neurons);
        self.generative = GenerativeModel::Mixture(model);
    }

    fn check_input(&self, input: &ArrayView1<f64>) -> MpfResult<()> {
        if input.len() != self.dim() {
            return Err(MpfError::DimensionMismatch {
                expected: self.dim(),
                got: input.len(),
            });
        }
        Ok(())
    }

    fn compute_difference(&mut self, input: &ArrayView1<f64>) {
        let raw = input - &self.neurons;
        match self.recurrent_diff.as_mut() {
            Some(previous) => {
                let decay = self.config.decay;
                let decayed = &*previous * (1.0 - decay) + &(raw * decay);
                previous.assign(&decayed);
                self.diff = decayed;
            }
            None => self.diff = raw,
        }
        self.diff_ready = true;
    }

    fn squared_distances(&self) -> Array1<f64> {
        if self.config.parallel {
            let diff = &self.diff;
            let norms: Vec<f64> = (0..diff.nrows())
                .into_par_iter()
                .map(|i| {
                    let row = diff.row(i);
                    row.dot(&row)
                })
                .collect();
            Array1::from(norms)
        } else {
            self.diff
                .map_axis(Axis(1), |row| row.dot(&row))
        }
    }

    fn select_bmu(
        &mut self,
        input: &ArrayView1<f64>,
        with_activation: bool,
    ) -> (usize, Array1<f64>) {
        let distances = self.squared_distances();

        let mut bmu = 0;
        for (i, &d) in distances.iter().enumerate() {
            if d < distances[bmu] {
                bmu = i;
            }
        }

        if with_activation {
            self.activation = self.config.likelihood.apply(&distances);
        }

        let input_norm = input.dot(input).sqrt().max(EPS);
        let weights = self.neurons.row(bmu);
        let weight_norm = weights.dot(&weights).sqrt().max(EPS);
        let gap = &(input / input_norm) - &(&weights / weight_norm);
        self.last_model_bias = Some(gap.dot(&gap).sqrt());
        self.last_bmu = Some(bmu);

        (bmu, weights.to_owned())
    }

    /// Best-matching unit for `input`: its index and weight vector.
    ///
    /// Also refreshes `last_model_bias` and, when `with_activation` is set,
    /// the activation vector. The difference matrix is kept for the next
    /// `update_neurons` call.
    pub fn find_bmu(
        &mut self,
        input: ArrayView1<f64>,
        with_activation: bool,
    ) -> MpfResult<(usize, Array1<f64>)> {
        self.check_input(&input)?;
        self.compute_difference(&input);
        Ok(self.select_bmu(&input, with_activation))
    }

    /// Move neurons toward the input of the last BMU search, centred on `bmu`
    pub fn update_neurons(&mut self, bmu: usize) -> MpfResult<()> {
        if !self.diff_ready {
            return Err(MpfError::Ordering(
                "update_neurons called without a preceding BMU search".into(),
            ));
        }
        if bmu >= self.len() {
            return Err(MpfError::DimensionMismatch {
                expected: self.len(),
                got: bmu,
            });
        }

        self.kernel.update_kernel(
            &self.lattice,
            bmu,
            &self.diff,
            self.config.neighborhood_constant,
            &mut self.neurons,
        );
        self.diff_ready = false;

        if let Some(predictor) = self.predictor.as_mut() {
            predictor.record(bmu);
        }
        Ok(())
    }

    /// One learning step: BMU search with activation, then neuron update
    pub fn feed(&mut self, input: ArrayView1<f64>) -> MpfResult<(usize, Array1<f64>)> {
        let bmu = self.find_bmu(input, true)?;
        self.update_neurons(bmu.0)?;
        Ok(bmu)
    }

    /// Predicted activation at the next step: `activation · transitions`
    pub fn predict_next_activation(&self) -> MpfResult<Array1<f64>> {
        let predictor = self.predictor.as_ref().ok_or_else(|| {
            MpfError::Ordering("predictor used before init_predictor".into())
        })?;
        Ok(predictor.predict(&self.activation))
    }

    /// Generate `count` samples in input space, weighted per neuron by `weights`
    pub fn generate(&mut self, weights: ArrayView1<f64>, count: usize) -> MpfResult<Array2<f64>> {
        if weights.len() != self.len() {
            return Err(MpfError::DimensionMismatch {
                expected: self.len(),
                got: weights.len(),
            });
        }

        match &mut self.generative {
            GenerativeModel::Categorical => {
                let indices = generative::sample_categorical(weights, count, &mut self.rng)?;
                let noise = self.noise.sample(self.neurons.ncols(), &mut self.rng);
                let mut samples = Array2::zeros((count, self.neurons.ncols()));
                for (row, &i) in indices.iter().enumerate() {
                    samples
                        .row_mut(row)
                        .assign(&(&self.neurons.row(i) + &noise));
                }
                Ok(samples)
            }
            GenerativeModel::Mixture(model) => {
                model.sample(&self.neurons, weights, count, &mut self.rng)
            }
        }
    }

    /// Serializable view of the lattice state
    pub fn snapshot(&self) -> SomSnapshot {
        SomSnapshot {
            width: self.lattice.width,
            height: self.lattice.height,
            kernel: self.kernel.kind(),
            recurrent: self.is_recurrent(),
            neurons: self.neurons.outer_iter().map(|r| r.to_vec()).collect(),
            activation: self.activation.to_vec(),
            last_model_bias: self.last_model_bias,
            last_bmu: self.last_bmu,
            noise_magnitude: self.noise.magnitude(),
            transitions: self
                .predictor
                .as_ref()
                .map(|p| p.transitions().outer_iter().map(|r| r.to_vec()).collect()),
            covariances: match &self.generative {
                GenerativeModel::Categorical => None,
                GenerativeModel::Mixture(model) => Some(
                    model
                        .covariances()
                        .iter()
                        .map(|c| c.outer_iter().map(|r| r.to_vec()).collect())
                        .collect(),
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, aview1};

    fn square_som(kernel: KernelKind) -> Som {
        let config = SomConfig::new(2, 2, 2, kernel).with_seed(1);
        let weights = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        Som::from_weights(config, weights).unwrap()
    }

    #[test]
    fn test_bmu_and_model_bias() {
        let mut som = square_som(KernelKind::Online);
        let (bmu, weights) = som.find_bmu(aview1(&[0.9, 0.1]), true).unwrap();

        assert_eq!(bmu, 1);
        assert_eq!(weights, array![1.0, 0.0]);
        let bias = som.last_model_bias().unwrap();
        assert!((bias - 0.1106).abs() < 5e-5, "bias = {}", bias);
    }

    #[test]
    fn test_bmu_is_deterministic() {
        let mut som = Som::new(SomConfig::new(6, 6, 4, KernelKind::Online).with_seed(9)).unwrap();
        let input = aview1(&[0.3, 0.1, 0.8, 0.5]);
        let first = som.find_bmu(input, false).unwrap().0;
        for _ in 0..5 {
            assert_eq!(som.find_bmu(input, false).unwrap().0, first);
        }
    }

    #[test]
    fn test_activation_non_negative() {
        for likelihood in [Likelihood::Uniform, Likelihood::Gaussian] {
            let config = SomConfig::new(5, 4, 3, KernelKind::Parameterless)
                .with_seed(2)
                .with_likelihood(likelihood);
            let mut som = Som::new(config).unwrap();
            som.find_bmu(aview1(&[2.0, -1.0, 0.5]), true).unwrap();
            assert!(som.activation().iter().all(|&a| a >= 0.0));
        }
    }

    #[test]
    fn test_uniform_likelihood_peaks_at_bmu() {
        let mut som = square_som(KernelKind::Online);
        let (bmu, _) = som.find_bmu(aview1(&[0.9, 0.1]), true).unwrap();
        assert!((som.activation()[bmu] - (1.0 - 0.02 / 1.62)).abs() < 1e-12);
        assert_eq!(som.activation()[2], 0.0);
    }

    #[test]
    fn test_uniform_likelihood_equal_distances() {
        assert_eq!(Likelihood::Uniform.apply(&array![0.5, 0.5, 0.5]), array![1.0, 1.0, 1.0]);
        assert_eq!(Likelihood::Uniform.apply(&array![0.0, 0.0]), array![1.0, 1.0]);

        let config = SomConfig::new(1, 1, 2, KernelKind::Online).with_seed(2);
        let mut som = Som::new(config).unwrap();
        som.find_bmu(aview1(&[0.7, 0.2]), true).unwrap();
        assert_eq!(som.activation(), &array![1.0]);
    }

    #[test]
    fn test_empty_lattice_rejected() {
        for (width, height, input_dim) in [(0, 3, 2), (3, 0, 2), (3, 3, 0)] {
            let config = SomConfig::new(width, height, input_dim, KernelKind::Online);
            assert!(matches!(Som::new(config), Err(MpfError::Configuration(_))));
        }

        let weights = Array2::zeros((0, 2));
        let config = SomConfig::new(0, 1, 2, KernelKind::Online);
        assert!(matches!(
            Som::from_weights(config, weights),
            Err(MpfError::Configuration(_))
        ));
    }

    #[test]
    fn test_decay_out_of_range_rejected() {
        let mut config = SomConfig::new(2, 2, 2, KernelKind::Online);
        config.decay = 1.5;
        assert!(matches!(Som::new(config), Err(MpfError::Configuration(_))));
    }

    #[test]
    fn test_update_does_not_increase_bmu_distance() {
        for kernel in [KernelKind::Online, KernelKind::Parameterless] {
            let mut som = Som::new(SomConfig::new(4, 4, 3, kernel).with_seed(4)).unwrap();
            let input = array![0.7, 0.2, 0.4];
            for _ in 0..10 {
                let (bmu, before) = som.find_bmu(input.view(), true).unwrap();
                let d_before = (&before - &input).mapv(|x| x * x).sum();
                som.update_neurons(bmu).unwrap();
                let after = som.neurons().row(bmu).to_owned();
                let d_after = (&after - &input).mapv(|x| x * x).sum();
                assert!(d_after <= d_before + 1e-12);
            }
        }
    }

    #[test]
    fn test_update_without_search_is_ordering_error() {
        let mut som = square_som(KernelKind::Online);
        assert!(matches!(som.update_neurons(0), Err(MpfError::Ordering(_))));
    }

    #[test]
    fn test_predict_without_init_is_ordering_error() {
        let som = square_som(KernelKind::Online);
        assert!(matches!(
            som.predict_next_activation(),
            Err(MpfError::Ordering(_))
        ));
    }

    #[test]
    fn test_predictor_rows_normalized_after_feeding() {
        let mut som = Som::new(SomConfig::new(3, 3, 2, KernelKind::Online).with_seed(8)).unwrap();
        som.init_predictor();
        for i in 0..40 {
            let x = (i as f64 * 0.37).sin().abs();
            som.feed(aview1(&[x, 1.0 - x])).unwrap();
        }
        let predictor = som.predictor().unwrap();
        for row in 0..som.len() {
            if predictor.frequencies().row(row).sum() > 0.0 {
                assert!((predictor.transitions().row(row).sum() - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_categorical_generation_without_noise() {
        let mut som = square_som(KernelKind::Online);
        for count in [1, 3, 10] {
            let samples = som.generate(aview1(&[0.0, 0.0, 0.0, 1.0]), count).unwrap();
            assert_eq!(samples.nrows(), count);
            for row in samples.outer_iter() {
                assert_eq!(row, array![1.0, 1.0]);
            }
        }
    }

    #[test]
    fn test_generation_zero_weights_is_sampling_error() {
        let mut som = square_som(KernelKind::Online);
        let err = som.generate(aview1(&[0.0; 4]), 1).unwrap_err();
        assert!(matches!(err, MpfError::Sampling(_)));
    }

    #[test]
    fn test_recurrent_difference_decays() {
        let config = SomConfig::new(1, 1, 1, KernelKind::Online)
            .with_seed(3)
            .with_recurrent(true);
        let mut som = Som::from_weights(config, array![[0.0]]).unwrap();

        som.find_bmu(aview1(&[1.0]), false).unwrap();
        // first step: 0.3 * 0 + 0.7 * 1
        assert!((som.diff[[0, 0]] - 0.7).abs() < 1e-12);
        som.find_bmu(aview1(&[1.0]), false).unwrap();
        // second step: 0.3 * 0.7 + 0.7 * 1
        assert!((som.diff[[0, 0]] - 0.91).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let seq = SomConfig::new(5, 5, 4, KernelKind::Online).with_seed(21);
        let par = seq.clone().with_parallel(true);
        let mut a = Som::new(seq).unwrap();
        let mut b = Som::new(par).unwrap();
        let input = aview1(&[0.1, 0.9, 0.4, 0.6]);
        assert_eq!(a.find_bmu(input, true).unwrap().0, b.find_bmu(input, true).unwrap().0);
        assert_eq!(a.activation(), b.activation());
    }

    #[test]
    fn test_mixture_samples_near_means() {
        let mut som = square_som(KernelKind::Online);
        som.init_generative_mixture(CovarianceMode::Full);
        let samples = som.generate(aview1(&[0.0, 0.0, 0.0, 1.0]), 200).unwrap();
        let mean = samples.mean_axis(Axis(0)).unwrap();
        assert!((mean[0] - 1.0).abs() < 0.2);
        assert!((mean[1] - 1.0).abs() < 0.2);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut som = square_som(KernelKind::Online);
        assert!(matches!(
            som.find_bmu(aview1(&[1.0, 2.0, 3.0]), false),
            Err(MpfError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }
}
