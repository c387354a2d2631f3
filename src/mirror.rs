//! Mirror-Langevin rules under the hyperbolic-entropy mirror map
//! `φ_β(x) = Σᵢ xᵢ asinh(xᵢ/βᵢ) − √(xᵢ² + βᵢ²)`.
//!
//! The map is separable, with `∇φ_β(x) = asinh(x/β)`, `∇φ_β*(y) = β sinh(y)` and
//! `∇²φ_β(x) = diag((x² + β²)^{-1/2})`. Each step moves in the dual (mirror) space and
//! maps back through `∇φ_β*`.

use ndarray::{Array1, ArrayView1, Zip};

use crate::distributions::{BregmanProximal, SmoothPotential};
use crate::error::{ensure_positive_step, LangevinError, Result};
use crate::langevin::{check_dim, StepStrategy, Transition};
use crate::noise::NoiseSource;

fn validate_scale(name: &str, scale: &Array1<f64>) -> Result<()> {
    if scale.is_empty() || scale.iter().any(|b| !(b.is_finite() && *b > 0.0)) {
        return Err(LangevinError::algorithm(format!(
            "{name} must be a non-empty vector of finite positive scales"
        )));
    }
    Ok(())
}

/// `∇φ_β(x) = asinh(x/β)`.
pub fn mirror_map(x: ArrayView1<f64>, scale: ArrayView1<f64>) -> Array1<f64> {
    Zip::from(&x).and(&scale).map_collect(|&xi, &b| (xi / b).asinh())
}

/// `∇φ_β*(y) = β sinh(y)`.
pub fn inverse_mirror_map(y: ArrayView1<f64>, scale: ArrayView1<f64>) -> Array1<f64> {
    Zip::from(&y).and(&scale).map_collect(|&yi, &b| b * yi.sinh())
}

/// Dual-space update `y = asinh(x/β) − γ·drift + √(2γ)(x² + β²)^{-1/4}ξ`, mapped back
/// into `state`.
fn mirror_move(
    state: &mut Array1<f64>,
    drift: &Array1<f64>,
    step_size: f64,
    scale: &Array1<f64>,
    noise: &mut NoiseSource,
) {
    let xi = noise.standard_normal(state.len());
    let noise_scale = (2.0 * step_size).sqrt();
    Zip::from(state)
        .and(drift)
        .and(scale)
        .and(&xi)
        .for_each(|x, &g, &b, &e| {
            let diffusion = noise_scale * (*x * *x + b * b).powf(-0.25) * e;
            let y = (*x / b).asinh() - step_size * g + diffusion;
            *x = b * y.sinh();
        });
}

/// Mirror Langevin algorithm (MLA) with hyperbolic entropy of scale `β`.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorLangevin {
    step_size: f64,
    mirror_scale: Array1<f64>,
}

impl MirrorLangevin {
    pub fn new(step_size: f64, mirror_scale: Array1<f64>) -> Result<Self> {
        ensure_positive_step("MLA step size", step_size)?;
        validate_scale("MLA mirror scale", &mirror_scale)?;
        Ok(Self {
            step_size,
            mirror_scale,
        })
    }
}

impl<T: SmoothPotential + ?Sized> StepStrategy<T> for MirrorLangevin {
    fn name(&self) -> &'static str {
        "MLA"
    }

    fn validate(&self, _target: &T, dim: usize) -> Result<()> {
        check_dim("MLA mirror scale", self.mirror_scale.len(), dim)
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        let grad = target.potential_gradient(state.view());
        mirror_move(state, &grad, self.step_size, &self.mirror_scale, noise);
        Transition::unadjusted()
    }
}

/**
Left Bregman–Moreau unadjusted mirror-Langevin algorithm (LBMUMLA).

The nonsmooth term is replaced by its left Bregman–Moreau envelope under `φ_σ`, with
gradient `(x² + σ²)^{-1/2}(x − leftprox_σ(x, λ))/λ`; the mirror step itself uses `φ_β`.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct BregmanMoreauLangevin {
    step_size: f64,
    smoothing: f64,
    mirror_scale: Array1<f64>,
    prior_scale: Array1<f64>,
}

impl BregmanMoreauLangevin {
    pub fn new(
        step_size: f64,
        smoothing: f64,
        mirror_scale: Array1<f64>,
        prior_scale: Array1<f64>,
    ) -> Result<Self> {
        ensure_positive_step("LBMUMLA step size", step_size)?;
        ensure_positive_step("LBMUMLA smoothing", smoothing)?;
        validate_scale("LBMUMLA mirror scale", &mirror_scale)?;
        validate_scale("LBMUMLA prior scale", &prior_scale)?;
        if mirror_scale.len() != prior_scale.len() {
            return Err(LangevinError::algorithm(
                "LBMUMLA mirror and prior scales must have the same length",
            ));
        }
        Ok(Self {
            step_size,
            smoothing,
            mirror_scale,
            prior_scale,
        })
    }

    /// Gradient of the left Bregman–Moreau envelope of `U₂` at `x`.
    pub fn envelope_gradient<T: BregmanProximal + ?Sized>(
        &self,
        x: ArrayView1<f64>,
        target: &T,
    ) -> Array1<f64> {
        let left = target.left_bregman_prox(x, self.prior_scale.view(), self.smoothing);
        let lambda = self.smoothing;
        Zip::from(&x)
            .and(&left)
            .and(&self.prior_scale)
            .map_collect(|&xi, &pi, &s| (xi - pi) / ((xi * xi + s * s).sqrt() * lambda))
    }
}

impl<T: SmoothPotential + BregmanProximal + ?Sized> StepStrategy<T> for BregmanMoreauLangevin {
    fn name(&self) -> &'static str {
        "LBMUMLA"
    }

    fn validate(&self, _target: &T, dim: usize) -> Result<()> {
        check_dim("LBMUMLA mirror scale", self.mirror_scale.len(), dim)
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        let mut drift = target.potential_gradient(state.view());
        drift += &self.envelope_gradient(state.view(), target);
        mirror_move(state, &drift, self.step_size, &self.mirror_scale, noise);
        Transition::unadjusted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Composite, GaussianMixture};
    use crate::prox::{LaplacePrior, Unregularized};
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn mirror_step_matches_formula() {
        let target = GaussianMixture::isotropic(vec![arr1(&[0.0])], 1.0).unwrap();
        let mut mla = MirrorLangevin::new(0.1, arr1(&[2.0])).unwrap();
        let mut x = arr1(&[1.0]);
        mla.step(&mut x, &target, &mut NoiseSource::new(5));
        let e = NoiseSource::new(5).standard_normal(1)[0];
        let y = 0.5_f64.asinh() - 0.1 * 1.0 + 0.2_f64.sqrt() * 5.0_f64.powf(-0.25) * e;
        assert_abs_diff_eq!(x[0], 2.0 * y.sinh(), epsilon = 1e-12);
    }

    #[test]
    fn mirror_maps_are_inverse() {
        let scale = arr1(&[0.3, 1.0, 4.0]);
        let x = arr1(&[-2.0, 0.5, 10.0]);
        let back = inverse_mirror_map(mirror_map(x.view(), scale.view()).view(), scale.view());
        assert_abs_diff_eq!(back, x, epsilon = 1e-12);
    }

    #[test]
    fn lbmumla_without_prior_is_mla() {
        let target = Composite::new(GaussianMixture::benchmark(3).unwrap(), Unregularized).unwrap();
        let beta = arr1(&[1.5, 1.5]);
        let mut mla = MirrorLangevin::new(0.02, beta.clone()).unwrap();
        let mut lbm = BregmanMoreauLangevin::new(0.02, 0.1, beta, arr1(&[0.5, 0.5])).unwrap();
        let (mut a, mut b) = (arr1(&[0.1, 0.2]), arr1(&[0.1, 0.2]));
        let (mut na, mut nb) = (NoiseSource::new(17), NoiseSource::new(17));
        for _ in 0..100 {
            mla.step(&mut a, &target, &mut na);
            lbm.step(&mut b, &target, &mut nb);
        }
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }

    #[test]
    fn envelope_gradient_pulls_toward_zero() {
        let target = Composite::new(
            GaussianMixture::benchmark(1).unwrap(),
            LaplacePrior::centered(1.0, 2).unwrap(),
        )
        .unwrap();
        let lbm =
            BregmanMoreauLangevin::new(0.01, 0.2, arr1(&[1.0, 1.0]), arr1(&[1.0, 1.0])).unwrap();
        let g = lbm.envelope_gradient(arr1(&[3.0, -3.0]).view(), &target);
        assert!(g[0] > 0.0 && g[1] < 0.0);
        assert_abs_diff_eq!(g[0], -g[1], epsilon = 1e-12);
        // inside the dead zone the left prox is zero
        let inner = lbm.envelope_gradient(arr1(&[0.1, 0.0]).view(), &target);
        assert_abs_diff_eq!(inner[0], 0.1 / (0.01_f64 + 1.0).sqrt() / 0.2, epsilon = 1e-12);
    }

    #[test]
    fn mla_recovers_standard_gaussian_moments() {
        let target = GaussianMixture::isotropic(vec![arr1(&[0.0])], 1.0).unwrap();
        let mut mla = MirrorLangevin::new(0.02, arr1(&[1.0])).unwrap();
        let mut noise = NoiseSource::new(2024);
        let mut x = arr1(&[0.0]);
        let (mut sum, mut sum_sq) = (0.0, 0.0);
        let n = 50_000;
        for _ in 0..n {
            mla.step(&mut x, &target, &mut noise);
            sum += x[0];
            sum_sq += x[0] * x[0];
        }
        let mean = sum / n as f64;
        let var = sum_sq / n as f64 - mean * mean;
        assert!(mean.abs() < 0.15, "mean = {mean}");
        assert!((var - 1.0).abs() < 0.25, "var = {var}");
    }

    #[test]
    fn rejects_bad_scales() {
        assert!(MirrorLangevin::new(0.1, arr1(&[1.0, 0.0])).is_err());
        assert!(BregmanMoreauLangevin::new(0.1, 0.1, arr1(&[1.0]), arr1(&[1.0, 1.0])).is_err());
        let mla = MirrorLangevin::new(0.1, arr1(&[1.0])).unwrap();
        let target = GaussianMixture::benchmark(2).unwrap();
        assert!(StepStrategy::validate(&mla, &target, 2).is_err());
    }
}
