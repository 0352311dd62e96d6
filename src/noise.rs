//! Noise generators for the generative sampler
//!
//! Frozen random distributions whose magnitude decreases on every draw until
//! it reaches a floor, after which it stays there.

use crate::error::MpfError;
use crate::MpfResult;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Noise configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NoiseConfig {
    /// No perturbation at all
    None,
    /// Uniform noise in `[lower, upper)` scaled by the magnitude
    Uniform {
        lower: f64,
        upper: f64,
        magnitude: f64,
        decrease: f64,
        floor: f64,
    },
    /// Gaussian noise around `mean` with the magnitude as standard deviation
    Gaussian {
        mean: f64,
        magnitude: f64,
        decrease: f64,
        floor: f64,
    },
}

impl Default for NoiseConfig {
    fn default() -> Self {
        NoiseConfig::None
    }
}

impl NoiseConfig {
    /// Uniform noise with the given bounds, magnitude and per-draw decrease
    pub fn uniform(lower: f64, upper: f64, magnitude: f64, decrease: f64) -> Self {
        NoiseConfig::Uniform {
            lower,
            upper,
            magnitude,
            decrease,
            floor: 0.001,
        }
    }

    /// Gaussian noise with the given mean, magnitude and per-draw decrease
    pub fn gaussian(mean: f64, magnitude: f64, decrease: f64) -> Self {
        NoiseConfig::Gaussian {
            mean,
            magnitude,
            decrease,
            floor: 0.001,
        }
    }

    /// Reject bounds and schedules that cannot be sampled
    pub fn validate(&self) -> MpfResult<()> {
        let (magnitude, decrease, floor) = match self {
            NoiseConfig::None => return Ok(()),
            NoiseConfig::Uniform {
                lower,
                upper,
                magnitude,
                decrease,
                floor,
            } => {
                if !(lower.is_finite() && upper.is_finite() && lower < upper) {
                    return Err(MpfError::Configuration(format!(
                        "uniform noise needs finite bounds with lower < upper, got [{}, {})",
                        lower, upper
                    )));
                }
                (*magnitude, *decrease, *floor)
            }
            NoiseConfig::Gaussian {
                mean,
                magnitude,
                decrease,
                floor,
            } => {
                if !mean.is_finite() {
                    return Err(MpfError::Configuration(format!(
                        "gaussian noise mean must be finite, got {}",
                        mean
                    )));
                }
                (*magnitude, *decrease, *floor)
            }
        };

        for (name, value) in [("magnitude", magnitude), ("decrease", decrease), ("floor", floor)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MpfError::Configuration(format!(
                    "noise {} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Noise used by MPF units at the given hierarchy level.
    ///
    /// Decrease shrinks by an order of magnitude per level.
    pub fn for_level(level: usize) -> Self {
        let decrease = 1e-4 * 10f64.powi(-(level as i32));
        NoiseConfig::uniform(-0.5, 0.5, 1.0, decrease)
    }
}

/// Stateful noise source with decaying magnitude
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    config: NoiseConfig,
    magnitude: f64,
    decrease: f64,
}

impl NoiseGenerator {
    pub fn new(config: NoiseConfig) -> MpfResult<Self> {
        config.validate()?;

        // The first draw subtracts one decrease step, so start one step above
        let (magnitude, decrease) = match &config {
            NoiseConfig::None => (0.0, 0.0),
            NoiseConfig::Uniform {
                magnitude, decrease, ..
            }
            | NoiseConfig::Gaussian {
                magnitude, decrease, ..
            } => (magnitude + decrease, *decrease),
        };

        Ok(Self {
            config,
            magnitude,
            decrease,
        })
    }

    /// Current magnitude (after the most recent draw)
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    pub fn is_silent(&self) -> bool {
        matches!(self.config, NoiseConfig::None)
    }

    fn step_magnitude(&mut self, floor: f64) {
        self.magnitude -= self.decrease;
        if self.magnitude < floor {
            self.decrease = 0.0;
            self.magnitude = floor;
        }
    }

    /// Draw one noise vector of length `dim`
    pub fn sample(&mut self, dim: usize, rng: &mut StdRng) -> Array1<f64> {
        match self.config.clone() {
            NoiseConfig::None => Array1::zeros(dim),
            NoiseConfig::Uniform {
                lower,
                upper,
                floor,
                ..
            } => {
                self.step_magnitude(floor);
                let magnitude = self.magnitude;
                Array1::from_shape_fn(dim, |_| rng.gen_range(lower..upper) * magnitude)
            }
            NoiseConfig::Gaussian { mean, floor, .. } => {
                self.step_magnitude(floor);
                match Normal::new(mean, self.magnitude) {
                    Ok(normal) => Array1::from_shape_fn(dim, |_| normal.sample(rng)),
                    Err(_) => Array1::from_elem(dim, mean),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_silent_noise_is_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut noise = NoiseGenerator::new(NoiseConfig::None).unwrap();
        let v = noise.sample(4, &mut rng);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_uniform_noise_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut noise = NoiseGenerator::new(NoiseConfig::uniform(-0.5, 0.5, 1.0, 0.0)).unwrap();
        for _ in 0..100 {
            let v = noise.sample(8, &mut rng);
            assert!(v.iter().all(|&x| (-0.5..0.5).contains(&x)));
        }
    }

    #[test]
    fn test_magnitude_decays_to_floor() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut noise = NoiseGenerator::new(NoiseConfig::uniform(-1.0, 1.0, 1.0, 0.25)).unwrap();

        noise.sample(1, &mut rng);
        assert!((noise.magnitude() - 1.0).abs() < 1e-12);
        noise.sample(1, &mut rng);
        assert!((noise.magnitude() - 0.75).abs() < 1e-12);

        for _ in 0..10 {
            noise.sample(1, &mut rng);
        }
        assert!((noise.magnitude() - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_level_noise_decrease() {
        match NoiseConfig::for_level(2) {
            NoiseConfig::Uniform { decrease, .. } => assert!((decrease - 1e-6).abs() < 1e-15),
            other => panic!("unexpected noise config {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_uniform_bounds_rejected() {
        for (lower, upper) in [(0.5, 0.5), (1.0, -1.0), (f64::NAN, 1.0)] {
            let config = NoiseConfig::uniform(lower, upper, 1.0, 0.0);
            let err = NoiseGenerator::new(config).unwrap_err();
            assert!(matches!(err, MpfError::Configuration(_)));
        }
    }

    #[test]
    fn test_negative_magnitude_rejected() {
        assert!(NoiseConfig::gaussian(0.0, -1.0, 0.0).validate().is_err());
        assert!(NoiseConfig::for_level(3).validate().is_ok());
    }
}
