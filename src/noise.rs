//! Seeded source of Gaussian increments shared by every update rule.

use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Generator of independent standard-normal vectors (and uniforms for accept/reject tests).
///
/// One source belongs to one chain. Two chains built with the same seed see identical
/// increments, which is what makes side-by-side algorithm comparisons fair.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    seed: u64,
    rng: SmallRng,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// The seed this source was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draws a fresh `N(0, I_dim)` vector.
    pub fn standard_normal(&mut self, dim: usize) -> Array1<f64> {
        Array1::from_shape_fn(dim, |_| self.rng.sample(StandardNormal))
    }

    /// Uniform draw on `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}
