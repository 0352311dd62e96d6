//! Rectangular neuron lattice
//!
//! Neurons are stored flat, `index = y * width + x`. The lattice does not
//! wrap: neighbours that fall outside are reported as absent.

use ndarray::{Array1, Array2};

/// Width x height grid of neuron positions
#[derive(Debug, Clone)]
pub struct Lattice {
    pub width: usize,
    pub height: usize,
    /// Precomputed (x, y) coordinate of every neuron
    coords: Array2<f64>,
}

impl Lattice {
    pub fn new(width: usize, height: usize) -> Self {
        let n = width * height;
        let mut coords = Array2::zeros((n, 2));
        for i in 0..n {
            coords[[i, 0]] = (i % width) as f64;
            coords[[i, 1]] = (i / width) as f64;
        }

        Self {
            width,
            height,
            coords,
        }
    }

    /// Number of neurons
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index -> (x, y)
    #[inline]
    pub fn position(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }

    /// (x, y) -> flat index
    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// Left, right, upper and lower neighbours; `None` past the lattice edge
    pub fn neighbours(&self, index: usize) -> [Option<usize>; 4] {
        let (x, y) = self.position(index);
        [
            (x > 0).then(|| self.index(x - 1, y)),
            (x + 1 < self.width).then(|| self.index(x + 1, y)),
            (y > 0).then(|| self.index(x, y - 1)),
            (y + 1 < self.height).then(|| self.index(x, y + 1)),
        ]
    }

    /// Squared lattice distance of every neuron to `center`
    pub fn squared_distances_from(&self, center: usize) -> Array1<f64> {
        let cx = self.coords[[center, 0]];
        let cy = self.coords[[center, 1]];
        Array1::from_shape_fn(self.len(), |i| {
            let dx = self.coords[[i, 0]] - cx;
            let dy = self.coords[[i, 1]] - cy;
            dx * dx + dy * dy
        })
    }

    /// Gaussian neighbourhood `exp(-|c_i - c_center|^2 / denom)`
    pub fn gaussian_neighbourhood(&self, center: usize, denom: f64) -> Array1<f64> {
        self.squared_distances_from(center)
            .mapv_into(|d2| (-d2 / denom).exp())
    }
}
