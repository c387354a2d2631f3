//! Proximal-splitting Langevin rules for potentials `U₁ + U₂` with nonsmooth `U₂`:
//! PGLD, MYULA, PPULA and FBULA.

use ndarray::{Array1, Array2, ArrayView1};

use crate::algorithm::SubSolverConfig;
use crate::distributions::{Curvature, Proximal, SmoothPotential};
use crate::error::{ensure_positive_step, LangevinError, Result};
use crate::langevin::{check_dim, langevin_move, Preconditioner, StepStrategy, Transition};
use crate::linalg::{largest_eigenvalue, spd_factor};
use crate::noise::NoiseSource;

/// How the nonsmooth term enters a [`ProximalLangevin`] step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Splitting {
    /// PGLD: `x_½ = prox_{λU₂}(x)`, then a Langevin step on `U₁` from `x_½`.
    ProximalGradient { prox_step: f64 },
    /// MYULA: a Langevin step on `U₁ + env_λ(U₂)`, whose gradient is
    /// `∇U₁(x) + (x − prox_{λU₂}(x))/λ`.
    MoreauYosida { smoothing: f64 },
}

/// Unadjusted Langevin with a proximal step on the nonsmooth part.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximalLangevin {
    step_size: f64,
    splitting: Splitting,
}

impl ProximalLangevin {
    pub fn new(step_size: f64, splitting: Splitting) -> Result<Self> {
        match splitting {
            Splitting::ProximalGradient { prox_step } => {
                ensure_positive_step("PGLD step size", step_size)?;
                ensure_positive_step("PGLD prox step", prox_step)?;
            }
            Splitting::MoreauYosida { smoothing } => {
                ensure_positive_step("MYULA step size", step_size)?;
                ensure_positive_step("MYULA smoothing", smoothing)?;
            }
        }
        Ok(Self {
            step_size,
            splitting,
        })
    }

    /// PGLD.
    pub fn proximal_gradient(step_size: f64, prox_step: f64) -> Result<Self> {
        Self::new(step_size, Splitting::ProximalGradient { prox_step })
    }

    /// MYULA.
    pub fn moreau_yosida(step_size: f64, smoothing: f64) -> Result<Self> {
        Self::new(step_size, Splitting::MoreauYosida { smoothing })
    }

    pub fn splitting(&self) -> Splitting {
        self.splitting
    }
}

/// `∇U₁(x) + (x − prox_{λU₂}(x))/λ`.
pub(crate) fn moreau_yosida_drift<T>(target: &T, x: ArrayView1<f64>, smoothing: f64) -> Array1<f64>
where
    T: SmoothPotential + Proximal + ?Sized,
{
    let mut drift = target.potential_gradient(x);
    let residual = &x - &target.prox_nonsmooth(x, smoothing);
    drift.scaled_add(1.0 / smoothing, &residual);
    drift
}

impl<T: SmoothPotential + Proximal + ?Sized> StepStrategy<T> for ProximalLangevin {
    fn name(&self) -> &'static str {
        match self.splitting {
            Splitting::ProximalGradient { .. } => "PGLD",
            Splitting::MoreauYosida { .. } => "MYULA",
        }
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        match self.splitting {
            Splitting::ProximalGradient { prox_step } => {
                let half = target.prox_nonsmooth(state.view(), prox_step);
                let grad = target.potential_gradient(half.view());
                state.assign(&half);
                langevin_move(state, &grad, self.step_size, None, noise);
            }
            Splitting::MoreauYosida { smoothing } => {
                let drift = moreau_yosida_drift(target, state.view(), smoothing);
                langevin_move(state, &drift, self.step_size, None, noise);
            }
        }
        Transition::unadjusted()
    }
}

/**
Preconditioned proximal ULA (PPULA).

`x' = x − γM∇U₁(x) − (γ/λ)Q⁻¹(x − prox^Q_{λU₂}(x)) + √(2γ)M^{1/2}ξ`, where
`prox^Q_{λU₂}(x) = argmin_u λU₂(u) + ½‖u − x‖²_{Q⁻¹}`. The metric prox has no closed
form; it is the limit of the dual iteration

```text
u = x − Qw
w ← w + ηu − η·prox_{(λ/η)U₂}(w/η + u)
```

with `η = 0.99 / ‖Q‖₂`. The dual variable `w` is warm-started from the previous step.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct PreconditionedProximalLangevin {
    step_size: f64,
    smoothing: f64,
    preconditioner: Preconditioner,
    prox_metric: Array2<f64>,
    prox_metric_inverse: Array2<f64>,
    dual_step: f64,
    solver: SubSolverConfig,
    dual: Option<Array1<f64>>,
}

impl PreconditionedProximalLangevin {
    pub fn new(
        step_size: f64,
        smoothing: f64,
        preconditioner: Array2<f64>,
        prox_metric: Array2<f64>,
        solver: SubSolverConfig,
    ) -> Result<Self> {
        ensure_positive_step("PPULA step size", step_size)?;
        ensure_positive_step("PPULA smoothing", smoothing)?;
        solver.validate()?;
        let preconditioner = Preconditioner::new("PPULA preconditioner", preconditioner)?;
        if prox_metric.dim() != preconditioner.matrix.dim() {
            return Err(LangevinError::algorithm(
                "PPULA preconditioner and prox metric must have the same shape",
            ));
        }
        let metric = spd_factor(&prox_metric).ok_or_else(|| {
            LangevinError::algorithm("PPULA prox metric must be symmetric positive definite")
        })?;
        let norm = largest_eigenvalue(&prox_metric)
            .ok_or_else(|| LangevinError::algorithm("PPULA prox metric has no spectral norm"))?;
        Ok(Self {
            step_size,
            smoothing,
            preconditioner,
            prox_metric,
            prox_metric_inverse: metric.inverse,
            dual_step: 0.99 / norm,
            solver,
            dual: None,
        })
    }

    /// `prox^Q_{λU₂}(x)` by the warm-started dual iteration.
    fn metric_prox<T: Proximal + ?Sized>(&mut self, x: ArrayView1<f64>, target: &T) -> Array1<f64> {
        let eta = self.dual_step;
        let inner_step = self.smoothing / eta;
        let mut w = self.dual.take().unwrap_or_else(|| Array1::zeros(x.len()));
        let mut converged = false;
        for _ in 0..self.solver.max_iterations {
            let u = &x - &self.prox_metric.dot(&w);
            let shifted = &w / eta + &u;
            let p = target.prox_nonsmooth(shifted.view(), inner_step);
            let next = &w + &((&u - &p) * eta);
            let change = (&next - &w).fold(0.0_f64, |m, v| m.max(v.abs()));
            w = next;
            if change <= self.solver.tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            log::debug!(
                "PPULA metric prox hit its cap of {} iterations",
                self.solver.max_iterations
            );
        }
        let u = &x - &self.prox_metric.dot(&w);
        self.dual = Some(w);
        u
    }
}

impl<T: SmoothPotential + Proximal + ?Sized> StepStrategy<T> for PreconditionedProximalLangevin {
    fn name(&self) -> &'static str {
        "PPULA"
    }

    fn validate(&self, _target: &T, dim: usize) -> Result<()> {
        check_dim("PPULA preconditioner", self.preconditioner.dim(), dim)
    }

    fn reset(&mut self, _initial: ArrayView1<f64>, _target: &T) {
        self.dual = None;
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        let grad = target.potential_gradient(state.view());
        let prox = self.metric_prox(state.view(), target);
        let residual = &*state - &prox;
        let envelope = self.prox_metric_inverse.dot(&residual) / self.smoothing;

        // M∇U₁ + Q⁻¹(x − prox)/λ, then coloured noise
        let mut drift = self.preconditioner.matrix.dot(&grad);
        drift += &envelope;
        let xi = noise.standard_normal(state.len());
        state.scaled_add(-self.step_size, &drift);
        state.scaled_add((2.0 * self.step_size).sqrt(), &self.preconditioner.root.dot(&xi));
        Transition::unadjusted()
    }
}

/**
Forward–backward ULA (FBULA): a Langevin step on the forward–backward envelope, with
gradient `(I − λ∇²U₁(x))(x − prox_{λU₂}(x − λ∇U₁(x)))/λ`.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardBackwardLangevin {
    step_size: f64,
    smoothing: f64,
}

impl ForwardBackwardLangevin {
    pub fn new(step_size: f64, smoothing: f64) -> Result<Self> {
        ensure_positive_step("FBULA step size", step_size)?;
        ensure_positive_step("FBULA smoothing", smoothing)?;
        Ok(Self {
            step_size,
            smoothing,
        })
    }

    pub(crate) fn envelope_gradient<T>(&self, x: ArrayView1<f64>, target: &T) -> Array1<f64>
    where
        T: Curvature + Proximal + ?Sized,
    {
        let lambda = self.smoothing;
        let mut forward = x.to_owned();
        forward.scaled_add(-lambda, &target.potential_gradient(x));
        let residual = &x - &target.prox_nonsmooth(forward.view(), lambda);
        let hess = target.potential_hessian(x);
        let mut grad = residual.clone();
        grad.scaled_add(-lambda, &hess.dot(&residual));
        grad / lambda
    }
}

impl<T: Curvature + Proximal + ?Sized> StepStrategy<T> for ForwardBackwardLangevin {
    fn name(&self) -> &'static str {
        "FBULA"
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        let grad = self.envelope_gradient(state.view(), target);
        langevin_move(state, &grad, self.step_size, None, noise);
        Transition::unadjusted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Composite, GaussianMixture};
    use crate::prox::{LaplacePrior, Unregularized};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn laplace_target(rate: f64) -> Composite<GaussianMixture, LaplacePrior> {
        Composite::new(
            GaussianMixture::isotropic(vec![arr1(&[1.0, -1.0])], 1.0).unwrap(),
            LaplacePrior::centered(rate, 2).unwrap(),
        )
        .unwrap()
    }

    fn solver() -> SubSolverConfig {
        SubSolverConfig::new(5000, 1e-12).unwrap()
    }

    #[test]
    fn pgld_applies_prox_before_gradient() {
        let target = laplace_target(1.0);
        let mut pgld = ProximalLangevin::proximal_gradient(0.1, 0.5).unwrap();
        let mut x = arr1(&[2.0, 0.2]);
        pgld.step(&mut x, &target, &mut NoiseSource::new(2));
        // prox: (1.5, 0.0); gradient there: (0.5, 1.0)
        let xi = NoiseSource::new(2).standard_normal(2);
        let expected = arr1(&[1.5 - 0.05, -0.1]) + xi * 0.2_f64.sqrt();
        assert_abs_diff_eq!(x, expected, epsilon = 1e-12);
    }

    #[test]
    fn myula_without_prior_is_ula() {
        let target = Composite::new(
            GaussianMixture::benchmark(2).unwrap(),
            Unregularized,
        )
        .unwrap();
        let mut myula = ProximalLangevin::moreau_yosida(0.05, 0.3).unwrap();
        let mut ula = crate::langevin::UnadjustedLangevin::new(0.05).unwrap();
        let (mut a, mut b) = (arr1(&[0.5, 0.5]), arr1(&[0.5, 0.5]));
        let (mut na, mut nb) = (NoiseSource::new(8), NoiseSource::new(8));
        for _ in 0..100 {
            myula.step(&mut a, &target, &mut na);
            ula.step(&mut b, &target, &mut nb);
        }
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }

    #[test]
    fn identity_metric_prox_is_plain_prox() {
        let target = laplace_target(0.8);
        let mut ppula = PreconditionedProximalLangevin::new(
            0.1,
            0.5,
            Array2::eye(2),
            Array2::eye(2),
            solver(),
        )
        .unwrap();
        let x = arr1(&[1.3, -0.1]);
        let p = ppula.metric_prox(x.view(), &target);
        assert_abs_diff_eq!(p, target.prox_nonsmooth(x.view(), 0.5), epsilon = 1e-9);
    }

    #[test]
    fn diagonal_metric_prox_rescales_threshold() {
        // with Q = diag(q), the metric prox of α|u| thresholds coordinate i at λαqᵢ
        let target = laplace_target(1.0);
        let q = arr2(&[[2.0, 0.0], [0.0, 0.5]]);
        let mut ppula =
            PreconditionedProximalLangevin::new(0.1, 0.2, Array2::eye(2), q, solver()).unwrap();
        let p = ppula.metric_prox(arr1(&[1.0, 1.0]).view(), &target);
        assert_abs_diff_eq!(p, arr1(&[0.6, 0.9]), epsilon = 1e-8);
    }

    #[test]
    fn ppula_with_identity_metrics_matches_myula() {
        let target = laplace_target(0.7);
        let mut ppula =
            PreconditionedProximalLangevin::new(0.05, 0.1, Array2::eye(2), Array2::eye(2), solver())
                .unwrap();
        let mut myula = ProximalLangevin::moreau_yosida(0.05, 0.1).unwrap();
        let (mut a, mut b) = (arr1(&[0.2, 0.9]), arr1(&[0.2, 0.9]));
        let (mut na, mut nb) = (NoiseSource::new(31), NoiseSource::new(31));
        for _ in 0..50 {
            ppula.step(&mut a, &target, &mut na);
            myula.step(&mut b, &target, &mut nb);
        }
        assert_abs_diff_eq!(a, b, epsilon = 1e-7);
    }

    #[test]
    fn ppula_rejects_mismatched_metrics() {
        let mismatched =
            PreconditionedProximalLangevin::new(0.1, 0.1, Array2::eye(2), Array2::eye(3), solver());
        assert!(mismatched.is_err());
        assert!(PreconditionedProximalLangevin::new(
            0.1,
            0.1,
            Array2::eye(2),
            arr2(&[[1.0, 3.0], [3.0, 1.0]]),
            solver()
        )
        .is_err());
    }

    #[test]
    fn forward_backward_gradient_without_prior_is_preconditioned_gradient() {
        let target = Composite::new(GaussianMixture::benchmark(1).unwrap(), Unregularized).unwrap();
        let fbula = ForwardBackwardLangevin::new(0.05, 0.2).unwrap();
        let x = arr1(&[0.4, -1.0]);
        let g = target.potential_gradient(x.view());
        let h = target.potential_hessian(x.view());
        let expected = &g - &(h.dot(&g) * 0.2);
        assert_abs_diff_eq!(fbula.envelope_gradient(x.view(), &target), expected, epsilon = 1e-12);
    }
}
