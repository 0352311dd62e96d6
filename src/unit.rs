//! # MPF Unit
//!
//! One node of the memory-prediction hierarchy: a spatial SOM (spatial
//! pooler) paired with an optional temporal RSOM (temporal pooler), following
//! Rawlinson & Kowadlo, "Generating Adaptive Behaviour within a
//! Memory-Prediction Framework" (2012).
//!
//! ## Passes
//!
//! ```text
//!            parent slice (backward)          parent slice (forward)
//!                    │                                 ▲
//!                    ▼                                 │
//!   ┌──────────── bias by reward ──────────┐   temporal activation
//!   │   temporal SOM ─ generate ─► global  │           │
//!   │                                 ×    │   ┌── temporal SOM (RSOM) ◄─ one-hot winner
//!   │   Markov predictor ────────► local   │   │
//!   │                                 │    │   spatial SOM ◄─ × total prediction
//!   │         total prediction ◄──────┘    │           ▲
//!   │   spatial SOM ─ generate ─► output   │           │
//!   └──────────────────────────────────────┘         input
//! ```
//!
//! The total prediction computed in a backward pass biases the spatial
//! activation of the *next* forward pass.

use crate::error::MpfError;
use crate::noise::NoiseConfig;
use crate::snapshot::UnitSnapshot;
use crate::som::{KernelKind, Som, SomConfig};
use crate::{MpfResult, EPS};
use ndarray::{Array1, ArrayBase, ArrayView1, ArrayViewMut1, DataMut, Ix1};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Position of a unit in the hierarchy arena
pub type UnitId = usize;

/// Role of a unit in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitRole {
    /// Leaf fed from the environment
    Sensor,
    /// Leaf whose output drives an actuator
    Actuator,
    /// Unit above the leaves, fed by its children
    Internal,
}

/// Reward correlator schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Initial learning rate of the reward correlator
    pub learning_rate: f64,
    /// Linear decrease per forward pass
    pub learning_rate_decrease: f64,
    /// Learning rate floor
    pub min_learning_rate: f64,
    /// Initial influence of the reward bias on the backward pass
    pub bias_influence: f64,
    /// Linear decrease per forward pass
    pub bias_influence_decrease: f64,
    /// Bias influence floor
    pub min_bias_influence: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1.0,
            learning_rate_decrease: 0.001,
            min_learning_rate: 0.01,
            bias_influence: 1.0,
            bias_influence_decrease: 0.001,
            min_bias_influence: 0.1,
        }
    }
}

/// Configuration of a single unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    pub role: UnitRole,
    /// Hierarchy level (leaves are always 0)
    pub level: usize,
    /// Spatial SOM input dimension
    pub input_dim: usize,
    /// Spatial lattice (width, height)
    pub spatial_shape: (usize, usize),
    pub spatial_kernel: KernelKind,
    /// Temporal lattice (width, height); no temporal SOM when absent
    pub temporal_shape: Option<(usize, usize)>,
    pub temporal_kernel: KernelKind,
    pub reward: RewardConfig,
    pub seed: Option<u64>,
    /// Parallel distance computation in both SOMs
    pub parallel: bool,
}

impl UnitConfig {
    fn leaf(
        role: UnitRole,
        input_dim: usize,
        spatial_shape: (usize, usize),
        kernel: KernelKind,
    ) -> Self {
        Self {
            role,
            level: 0,
            input_dim,
            spatial_shape,
            spatial_kernel: kernel,
            temporal_shape: None,
            temporal_kernel: kernel,
            reward: RewardConfig::default(),
            seed: None,
            parallel: false,
        }
    }

    /// Leaf unit fed from the environment
    pub fn sensor(input_dim: usize, spatial_shape: (usize, usize), kernel: KernelKind) -> Self {
        Self::leaf(UnitRole::Sensor, input_dim, spatial_shape, kernel)
    }

    /// Leaf unit whose output is the hierarchy's action
    pub fn actuator(input_dim: usize, spatial_shape: (usize, usize), kernel: KernelKind) -> Self {
        Self::leaf(UnitRole::Actuator, input_dim, spatial_shape, kernel)
    }

    /// Unit above the leaves; always carries a temporal SOM
    pub fn internal(
        level: usize,
        input_dim: usize,
        spatial_shape: (usize, usize),
        temporal_shape: (usize, usize),
        spatial_kernel: KernelKind,
        temporal_kernel: KernelKind,
    ) -> Self {
        Self {
            role: UnitRole::Internal,
            level,
            input_dim,
            spatial_shape,
            spatial_kernel,
            temporal_shape: Some(temporal_shape),
            temporal_kernel,
            reward: RewardConfig::default(),
            seed: None,
            parallel: false,
        }
    }

    pub fn with_temporal(mut self, shape: (usize, usize), kernel: KernelKind) -> Self {
        self.temporal_shape = Some(shape);
        self.temporal_kernel = kernel;
        self
    }

    pub fn with_reward(mut self, reward: RewardConfig) -> Self {
        self.reward = reward;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Scalar that decreases linearly to a floor and then stays frozen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearDecay {
    value: f64,
    decrease: f64,
    floor: f64,
}

impl LinearDecay {
    pub fn new(value: f64, decrease: f64, floor: f64) -> Self {
        Self {
            value,
            decrease,
            floor,
        }
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_frozen(&self) -> bool {
        self.decrease == 0.0
    }

    pub fn step(&mut self) {
        self.value -= self.decrease;
        if self.value < self.floor {
            self.value = self.floor;
            self.decrease = 0.0;
        }
    }
}

/// Logistic adjustment of reward correlation, centred on zero
#[inline]
pub fn reward_adjustment(correlation: f64) -> f64 {
    1.0 / (1.0 + (-((correlation + 1.0) * 5.0 - 5.0)).exp()) - 0.5
}

/// Scale a vector to sum to one; a zero sum is floored at epsilon
pub fn normalize<S>(v: &mut ArrayBase<S, Ix1>)
where
    S: DataMut<Elem = f64>,
{
    let total = v.sum();
    let total = if total.abs() < EPS { EPS } else { total };
    *v /= total;
}

fn argmax(v: &Array1<f64>) -> usize {
    let mut best = 0;
    for (i, &x) in v.iter().enumerate() {
        if x > v[best] {
            best = i;
        }
    }
    best
}

/// Reserved slice of a parent's input for one child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildLink {
    pub id: UnitId,
    pub range: Range<usize>,
}

/// Link from a child to its parent (non-owning)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub id: UnitId,
    pub range: Range<usize>,
}

/// SOM-RSOM pair with local and global prediction loops
#[derive(Debug, Clone)]
pub struct MpfUnit {
    role: UnitRole,
    level: usize,
    spatial: Som,
    temporal: Option<Som>,

    parent: Option<ParentLink>,
    children: Vec<ChildLink>,
    /// Children that reported in the current forward sweep
    pending_children: usize,

    /// Spatial activation predicted by the Markov predictor
    local_prediction: Array1<f64>,
    /// Spatial activation generated top-down
    global_prediction: Array1<f64>,
    /// Combined prediction biasing the next forward pass
    total_prediction: Array1<f64>,

    reward_correlation: Array1<f64>,
    /// Backward-pass bias on the output activation
    output_bias: Array1<f64>,
    /// Previous output activation scaled by the learning rate
    last_output: Array1<f64>,
    learning_rate: LinearDecay,
    bias_influence: LinearDecay,

    /// Children's outputs on the way up, generated output on the way down
    accumulator: Array1<f64>,
    input: Array1<f64>,
    previous_input: Array1<f64>,
    previous_output: Array1<f64>,
    forward_passes: u64,
}

impl MpfUnit {
    pub fn new(config: UnitConfig) -> MpfResult<Self> {
        let (sw, sh) = config.spatial_shape;
        if sw == 0 || sh == 0 || config.input_dim == 0 {
            return Err(MpfError::Configuration(format!(
                "spatial SOM needs a non-empty lattice and input, got {}x{} over {} inputs",
                sw, sh, config.input_dim
            )));
        }

        let level = match config.role {
            UnitRole::Sensor | UnitRole::Actuator => 0,
            UnitRole::Internal => config.level,
        };
        let noise = NoiseConfig::for_level(level);

        let mut spatial_config = SomConfig::new(sw, sh, config.input_dim, config.spatial_kernel)
            .with_noise(noise.clone())
            .with_parallel(config.parallel);
        if let Some(seed) = config.seed {
            spatial_config = spatial_config.with_seed(seed);
        }
        let mut spatial = Som::new(spatial_config)?;
        spatial.init_predictor();

        let temporal = match config.temporal_shape {
            Some((tw, th)) => {
                if tw == 0 || th == 0 {
                    return Err(MpfError::Configuration(format!(
                        "temporal SOM needs a non-empty lattice, got {}x{}",
                        tw, th
                    )));
                }
                let mut temporal_config =
                    SomConfig::new(tw, th, spatial.len(), config.temporal_kernel)
                        .with_recurrent(true)
                        .with_noise(noise)
                        .with_parallel(config.parallel);
                if let Some(seed) = config.seed {
                    temporal_config = temporal_config.with_seed(seed.wrapping_add(1));
                }
                Some(Som::new(temporal_config)?)
            }
            None => None,
        };

        let n_spatial = spatial.len();
        let n_output = temporal.as_ref().map_or(n_spatial, Som::len);
        let reward = &config.reward;

        Ok(Self {
            role: config.role,
            level,
            parent: None,
            children: Vec::new(),
            pending_children: 0,
            local_prediction: Array1::ones(n_spatial),
            global_prediction: Array1::ones(n_spatial),
            total_prediction: Array1::ones(n_spatial),
            reward_correlation: Array1::ones(n_output),
            output_bias: Array1::ones(n_output),
            last_output: Array1::zeros(n_output),
            learning_rate: LinearDecay::new(
                reward.learning_rate,
                reward.learning_rate_decrease,
                reward.min_learning_rate,
            ),
            bias_influence: LinearDecay::new(
                reward.bias_influence,
                reward.bias_influence_decrease,
                reward.min_bias_influence,
            ),
            accumulator: Array1::zeros(config.input_dim),
            input: Array1::zeros(config.input_dim),
            previous_input: Array1::zeros(config.input_dim),
            previous_output: Array1::zeros(config.input_dim),
            forward_passes: 0,
            spatial,
            temporal,
        })
    }

    pub fn role(&self) -> UnitRole {
        self.role
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn spatial(&self) -> &Som {
        &self.spatial
    }

    pub fn temporal(&self) -> Option<&Som> {
        self.temporal.as_ref()
    }

    pub fn has_temporal(&self) -> bool {
        self.temporal.is_some()
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[ChildLink] {
        &self.children
    }

    /// Spatial SOM input dimension
    pub fn input_dim(&self) -> usize {
        self.spatial.dim()
    }

    /// Size of the activation this unit reports upward
    pub fn output_dim(&self) -> usize {
        self.temporal.as_ref().map_or(self.spatial.len(), Som::len)
    }

    /// Temporal activation, or the spatial one without a temporal SOM
    pub fn output_activation(&self) -> &Array1<f64> {
        match &self.temporal {
            Some(temporal) => temporal.activation(),
            None => self.spatial.activation(),
        }
    }

    /// Output generated by the last backward pass (spatial input space)
    pub fn accumulator(&self) -> &Array1<f64> {
        &self.accumulator
    }

    pub fn local_prediction(&self) -> &Array1<f64> {
        &self.local_prediction
    }

    pub fn global_prediction(&self) -> &Array1<f64> {
        &self.global_prediction
    }

    pub fn total_prediction(&self) -> &Array1<f64> {
        &self.total_prediction
    }

    pub fn output_bias(&self) -> &Array1<f64> {
        &self.output_bias
    }

    pub fn reward_correlation(&self) -> &Array1<f64> {
        &self.reward_correlation
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate.value()
    }

    pub fn bias_influence(&self) -> f64 {
        self.bias_influence.value()
    }

    pub fn forward_passes(&self) -> u64 {
        self.forward_passes
    }

    /// Reserve the next slice of this unit's input for a child.
    ///
    /// Fails when the child's output does not fit in the remaining input.
    pub fn add_child(&mut self, child: UnitId, child_output_dim: usize) -> MpfResult<Range<usize>> {
        let start = self.children.last().map_or(0, |c| c.range.end);
        let range = start..start + child_output_dim;

        if range.end > self.input_dim() {
            return Err(MpfError::Configuration(format!(
                "child {} needs input range {:?} but L{} unit accepts only {} inputs",
                child,
                range,
                self.level,
                self.input_dim()
            )));
        }

        self.children.push(ChildLink {
            id: child,
            range: range.clone(),
        });
        self.pending_children = 0;
        Ok(range)
    }

    pub fn set_parent(&mut self, parent: UnitId, range: Range<usize>) {
        self.parent = Some(ParentLink { id: parent, range });
    }

    /// Store a child's output activation in its reserved slice.
    ///
    /// Returns `true` once every child has reported; the counter then resets.
    pub fn receive_child_output(&mut self, range: Range<usize>, activation: &Array1<f64>) -> bool {
        self.accumulator
            .slice_mut(ndarray::s![range])
            .assign(activation);
        self.pending_children += 1;

        if self.pending_children >= self.children.len() {
            self.pending_children = 0;
            true
        } else {
            false
        }
    }

    /// Forward pass fed by the accumulated children outputs
    pub fn forward_from_children(&mut self, reinforcement: f64) -> MpfResult<()> {
        let input = self.accumulator.clone();
        self.forward_pass(input.view(), reinforcement)
    }

    /// Bottom-up inference for one time step
    pub fn forward_pass(&mut self, input: ArrayView1<f64>, reinforcement: f64) -> MpfResult<()> {
        self.spatial.find_bmu(input, true)?;
        self.previous_input = std::mem::replace(&mut self.input, input.to_owned());

        // bias the unbiased activation by the last total prediction
        let activation = self.spatial.activation_mut();
        *activation *= &self.total_prediction;
        normalize(activation);

        let winner = argmax(self.spatial.activation());
        self.spatial.update_neurons(winner)?;

        let mut local = self.spatial.predict_next_activation()?;
        normalize(&mut local);
        self.local_prediction = local;

        if let Some(temporal) = self.temporal.as_mut() {
            // one-hot keeps temporal inputs maximally orthogonal
            let activation = self.spatial.activation_mut();
            activation.fill(0.0);
            activation[winner] = 1.0;

            temporal.feed(self.spatial.activation().view())?;
            normalize(temporal.activation_mut());
        }

        self.reward_correlation = &self.last_output * reinforcement
            + &((1.0 - &self.last_output) * &self.reward_correlation);

        let uniform = 1.0 / self.output_dim() as f64;
        let influence = self.bias_influence.value();
        self.output_bias = self
            .reward_correlation
            .mapv(|c| (reward_adjustment(c) * influence + uniform).clamp(EPS, 1.0));

        self.last_output = self.output_activation() * self.learning_rate.value();
        self.learning_rate.step();
        self.bias_influence.step();

        self.forward_passes += 1;
        Ok(())
    }

    /// Top-down generation for one time step.
    ///
    /// `from_parent` is this unit's slice of the parent's output and is
    /// normalized in place; the caller must not touch it during the call.
    pub fn backward_pass(&mut self, mut from_parent: ArrayViewMut1<f64>) -> MpfResult<()> {
        if self.forward_passes == 0 {
            return Err(MpfError::Ordering(
                "backward pass requested before any forward pass".into(),
            ));
        }
        if from_parent.len() != self.output_dim() {
            return Err(MpfError::DimensionMismatch {
                expected: self.output_dim(),
                got: from_parent.len(),
            });
        }

        // a generated slice may go negative; clip before it is read as a PMF
        from_parent.mapv_inplace(|x| x.max(0.0));
        normalize(&mut from_parent);
        from_parent *= &self.output_bias;
        normalize(&mut from_parent);

        self.global_prediction = match self.temporal.as_mut() {
            Some(temporal) => {
                let samples = temporal.generate(from_parent.view(), 1)?;
                let mut global = samples.row(0).mapv(|x| x.max(0.0));
                normalize(&mut global);
                global
            }
            None => from_parent.to_owned(),
        };

        let uniform = 1.0 / self.spatial.len() as f64;
        let mut total = &self.global_prediction * &self.local_prediction + uniform;
        normalize(&mut total);
        self.total_prediction = total;

        let output = self.spatial.generate(self.total_prediction.view(), 1)?;
        self.previous_output = std::mem::replace(&mut self.accumulator, output.row(0).to_owned());
        Ok(())
    }

    /// Take the output buffer so children can be handed sub-views of it
    pub(crate) fn take_accumulator(&mut self) -> Array1<f64> {
        std::mem::take(&mut self.accumulator)
    }

    pub(crate) fn restore_accumulator(&mut self, accumulator: Array1<f64>) {
        self.accumulator = accumulator;
    }

    /// Serializable view of the unit state
    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            role: self.role,
            level: self.level,
            spatial: self.spatial.snapshot(),
            temporal: self.temporal.as_ref().map(Som::snapshot),
            input: self.input.to_vec(),
            previous_input: self.previous_input.to_vec(),
            output: self.accumulator.to_vec(),
            previous_output: self.previous_output.to_vec(),
            local_prediction: self.local_prediction.to_vec(),
            global_prediction: self.global_prediction.to_vec(),
            total_prediction: self.total_prediction.to_vec(),
            reward_correlation: self.reward_correlation.to_vec(),
            output_bias: self.output_bias.to_vec(),
            learning_rate: self.learning_rate.value(),
            bias_influence: self.bias_influence.value(),
        }
    }
}
