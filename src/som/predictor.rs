//! First-order Markov predictor over lattice states
//!
//! Every neuron is a state of a Markov chain. A transition from the previous
//! winner to the current one is counted in a frequency matrix, whose rows are
//! normalized into the state-transition matrix.

use ndarray::{Array1, Array2};

#[derive(Debug, Clone)]
pub struct MarkovPredictor {
    frequencies: Array2<f64>,
    transitions: Array2<f64>,
    previous: Option<usize>,
}

impl MarkovPredictor {
    /// Zero frequencies, identity transitions
    pub fn new(states: usize) -> Self {
        Self {
            frequencies: Array2::zeros((states, states)),
            transitions: Array2::eye(states),
            previous: None,
        }
    }

    /// Record a transition into `state` from the previously recorded one
    pub fn record(&mut self, state: usize) {
        if let Some(prev) = self.previous {
            self.frequencies[[prev, state]] += 1.0;

            let row = self.frequencies.row(prev);
            let total = row.sum();
            let normalized = &row / total;
            self.transitions.row_mut(prev).assign(&normalized);
        }

        self.previous = Some(state);
    }

    /// `activation · transitions`
    pub fn predict(&self, activation: &Array1<f64>) -> Array1<f64> {
        activation.dot(&self.transitions)
    }

    pub fn transitions(&self) -> &Array2<f64> {
        &self.transitions
    }

    pub fn frequencies(&self) -> &Array2<f64> {
        &self.frequencies
    }

    pub fn previous(&self) -> Option<usize> {
        self.previous
    }
}
