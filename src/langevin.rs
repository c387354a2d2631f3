/*!
The step-update seam, and the gradient-driven Langevin rules.

Every sampler in this crate is a [`StepStrategy`]: given the current state, a target and
a [`NoiseSource`], it advances the state in place by one iteration. The chain driver in
[`crate::core`] owns the state and the noise; strategies own only their own working
memory (cached potentials, preconditioners, dual variables).

# Examples

```rust
use prox_langevin::distributions::GaussianMixture;
use prox_langevin::langevin::{StepStrategy, UnadjustedLangevin};
use prox_langevin::noise::NoiseSource;
use ndarray::arr1;

let target = GaussianMixture::isotropic(vec![arr1(&[0.0, 0.0])], 1.0).unwrap();
let mut ula = UnadjustedLangevin::new(0.1).unwrap();
let mut noise = NoiseSource::new(42);
let mut x = arr1(&[1.0, 1.0]);
let t = ula.step(&mut x, &target, &mut noise);
assert!(t.accepted.is_none());
```
*/

use ndarray::{Array1, Array2, ArrayView1};

use crate::distributions::{total_potential, Curvature, Proximal, SmoothPotential};
use crate::error::{ensure_positive_step, LangevinError, Result};
use crate::linalg::{spd_factor, spectral_map, symmetric_eigen};
use crate::noise::NoiseSource;

/// Outcome of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// `Some(accepted)` for Metropolis-corrected rules, `None` otherwise.
    pub accepted: Option<bool>,
}

impl Transition {
    pub fn unadjusted() -> Self {
        Self { accepted: None }
    }

    pub fn adjusted(accepted: bool) -> Self {
        Self {
            accepted: Some(accepted),
        }
    }
}

/// One state-transition rule of a Langevin-type sampler on target `T`.
pub trait StepStrategy<T: ?Sized>: Send {
    /// Short algorithm name used in logs, summaries and errors.
    fn name(&self) -> &'static str;

    /// Checks the configuration against a target of dimension `dim` before any iteration.
    fn validate(&self, _target: &T, _dim: usize) -> Result<()> {
        Ok(())
    }

    /// Clears per-run state. Called once when a chain starts.
    fn reset(&mut self, _initial: ArrayView1<f64>, _target: &T) {}

    /// Advances `state` by one iteration, drawing increments from `noise`.
    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition;
}

impl<T: ?Sized, S: StepStrategy<T> + ?Sized> StepStrategy<T> for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn validate(&self, target: &T, dim: usize) -> Result<()> {
        (**self).validate(target, dim)
    }

    fn reset(&mut self, initial: ArrayView1<f64>, target: &T) {
        (**self).reset(initial, target)
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        (**self).step(state, target, noise)
    }
}

pub(crate) fn check_dim(name: &str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(LangevinError::algorithm(format!(
            "{name} expects dimension {expected}, target has dimension {got}"
        )))
    }
}

/// A fixed SPD preconditioner `M` with a square root used to colour the noise.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Preconditioner {
    pub(crate) matrix: Array2<f64>,
    pub(crate) root: Array2<f64>,
}

impl Preconditioner {
    pub(crate) fn new(name: &str, matrix: Array2<f64>) -> Result<Self> {
        let factor = spd_factor(&matrix).ok_or_else(|| {
            LangevinError::algorithm(format!("{name} must be symmetric positive definite"))
        })?;
        Ok(Self {
            matrix,
            root: factor.lower,
        })
    }

    pub(crate) fn dim(&self) -> usize {
        self.matrix.nrows()
    }
}

/// `x ← x − γ·M·g + √(2γ)·R·ξ` (identity `M` and `R` when absent).
pub(crate) fn langevin_move(
    state: &mut Array1<f64>,
    drift: &Array1<f64>,
    step_size: f64,
    metric: Option<(&Array2<f64>, &Array2<f64>)>,
    noise: &mut NoiseSource,
) {
    let xi = noise.standard_normal(state.len());
    let scale = (2.0 * step_size).sqrt();
    match metric {
        Some((m, r)) => {
            state.scaled_add(-step_size, &m.dot(drift));
            state.scaled_add(scale, &r.dot(&xi));
        }
        None => {
            state.scaled_add(-step_size, drift);
            state.scaled_add(scale, &xi);
        }
    }
}

/**
Unadjusted Langevin algorithm: `x' = x − γ∇U₁(x) + √(2γ)ξ`.

With a preconditioner (PULA) the drift is `γM∇U₁(x)` and the noise `√(2γ)Lξ` with
`LLᵀ = M`. No accept/reject step; the stationary law carries an `O(γ)` bias.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct UnadjustedLangevin {
    step_size: f64,
    preconditioner: Option<Preconditioner>,
}

impl UnadjustedLangevin {
    pub fn new(step_size: f64) -> Result<Self> {
        ensure_positive_step("ULA step size", step_size)?;
        Ok(Self {
            step_size,
            preconditioner: None,
        })
    }

    /// PULA with a fixed SPD preconditioner `M`.
    pub fn preconditioned(step_size: f64, preconditioner: Array2<f64>) -> Result<Self> {
        ensure_positive_step("PULA step size", step_size)?;
        Ok(Self {
            step_size,
            preconditioner: Some(Preconditioner::new("PULA preconditioner", preconditioner)?),
        })
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }
}

impl<T: SmoothPotential + ?Sized> StepStrategy<T> for UnadjustedLangevin {
    fn name(&self) -> &'static str {
        if self.preconditioner.is_some() {
            "PULA"
        } else {
            "ULA"
        }
    }

    fn validate(&self, _target: &T, dim: usize) -> Result<()> {
        match &self.preconditioner {
            Some(p) => check_dim("PULA preconditioner", p.dim(), dim),
            None => Ok(()),
        }
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        let grad = target.potential_gradient(state.view());
        let metric = self.preconditioner.as_ref().map(|p| (&p.matrix, &p.root));
        langevin_move(state, &grad, self.step_size, metric, noise);
        Transition::unadjusted()
    }
}

/**
Inexact-Hessian preconditioned ULA (IHPULA).

The preconditioner is the regularized inverse Hessian `V diag(1 / max(|λᵢ|, floor)) Vᵀ`
of `U₁`, re-estimated every `refresh_interval` iterations and reused in between.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct HessianPreconditionedLangevin {
    step_size: f64,
    eigenvalue_floor: f64,
    refresh_interval: usize,
    cached: Option<Preconditioner>,
    since_refresh: usize,
}

impl HessianPreconditionedLangevin {
    pub fn new(step_size: f64, eigenvalue_floor: f64, refresh_interval: usize) -> Result<Self> {
        ensure_positive_step("IHPULA step size", step_size)?;
        ensure_positive_step("IHPULA eigenvalue floor", eigenvalue_floor)?;
        if refresh_interval == 0 {
            return Err(LangevinError::algorithm(
                "IHPULA refresh interval must be at least 1",
            ));
        }
        Ok(Self {
            step_size,
            eigenvalue_floor,
            refresh_interval,
            cached: None,
            since_refresh: 0,
        })
    }

    fn refresh<T: Curvature + ?Sized>(
        &self,
        x: ArrayView1<f64>,
        target: &T,
    ) -> Option<Preconditioner> {
        let (values, vectors) = symmetric_eigen(&target.potential_hessian(x))?;
        let clamped = values.mapv(|l| l.abs().max(self.eigenvalue_floor));
        Some(Preconditioner {
            matrix: spectral_map(&clamped, &vectors, |l| 1.0 / l),
            root: spectral_map(&clamped, &vectors, |l| 1.0 / l.sqrt()),
        })
    }
}

impl<T: Curvature + ?Sized> StepStrategy<T> for HessianPreconditionedLangevin {
    fn name(&self) -> &'static str {
        "IHPULA"
    }

    fn reset(&mut self, _initial: ArrayView1<f64>, _target: &T) {
        self.cached = None;
        self.since_refresh = 0;
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        if self.cached.is_none() || self.since_refresh >= self.refresh_interval {
            match self.refresh(state.view(), target) {
                Some(p) => self.cached = Some(p),
                None => {
                    // non-finite curvature: report it as a divergence of the state
                    state.fill(f64::NAN);
                    return Transition::unadjusted();
                }
            }
            self.since_refresh = 0;
        }
        self.since_refresh += 1;
        let grad = target.potential_gradient(state.view());
        let metric = self.cached.as_ref().map(|p| (&p.matrix, &p.root));
        langevin_move(state, &grad, self.step_size, metric, noise);
        Transition::unadjusted()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Evaluated {
    at: Array1<f64>,
    potential: f64,
    mean: Array1<f64>,
}

/**
Metropolis-adjusted Langevin (MALA), and its Moreau–Yosida variant (MYMALA).

The proposal is the Langevin move `y = x − γD(x) + √(2γ)ξ`, where the drift `D` is
`∇U₁` for MALA and `∇U₁ + (x − prox_{λU₂}(x))/λ` for MYMALA. It is accepted with
probability `min(1, exp(U(x) − U(y) + log q(x|y) − log q(y|x)))` against the exact
potential `U = U₁ + U₂`, with `log q(a|b) = −‖a − b + γD(b)‖² / (4γ)`. Proposals with a
non-finite potential are rejected.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct MetropolisAdjustedLangevin {
    step_size: f64,
    smoothing: Option<f64>,
    current: Option<Evaluated>,
}

impl MetropolisAdjustedLangevin {
    pub fn new(step_size: f64) -> Result<Self> {
        ensure_positive_step("MALA step size", step_size)?;
        Ok(Self {
            step_size,
            smoothing: None,
            current: None,
        })
    }

    /// MYMALA with Moreau–Yosida smoothing `λ`.
    pub fn moreau_yosida(step_size: f64, smoothing: f64) -> Result<Self> {
        ensure_positive_step("MYMALA step size", step_size)?;
        ensure_positive_step("MYMALA smoothing", smoothing)?;
        Ok(Self {
            step_size,
            smoothing: Some(smoothing),
            current: None,
        })
    }

    fn evaluate<T: SmoothPotential + Proximal + ?Sized>(
        &self,
        x: ArrayView1<f64>,
        target: &T,
    ) -> Evaluated {
        let mut drift = target.potential_gradient(x);
        if let Some(lambda) = self.smoothing {
            let residual = &x - &target.prox_nonsmooth(x, lambda);
            drift.scaled_add(1.0 / lambda, &residual);
        }
        let mut mean = x.to_owned();
        mean.scaled_add(-self.step_size, &drift);
        Evaluated {
            at: x.to_owned(),
            potential: total_potential(target, x),
            mean,
        }
    }

    fn log_proposal(&self, to: &Array1<f64>, from: &Evaluated) -> f64 {
        let diff = to - &from.mean;
        -diff.dot(&diff) / (4.0 * self.step_size)
    }
}

impl<T: SmoothPotential + Proximal + ?Sized> StepStrategy<T> for MetropolisAdjustedLangevin {
    fn name(&self) -> &'static str {
        if self.smoothing.is_some() {
            "MYMALA"
        } else {
            "MALA"
        }
    }

    fn reset(&mut self, _initial: ArrayView1<f64>, _target: &T) {
        self.current = None;
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        let current = match self.current.take() {
            Some(c) if c.at == *state => c,
            _ => self.evaluate(state.view(), target),
        };

        let xi = noise.standard_normal(state.len());
        let mut proposal = current.mean.clone();
        proposal.scaled_add((2.0 * self.step_size).sqrt(), &xi);
        let u: f64 = noise.uniform();

        let candidate = self.evaluate(proposal.view(), target);
        let log_accept_ratio = current.potential - candidate.potential
            + self.log_proposal(state, &candidate)
            - self.log_proposal(&proposal, &current);

        let accepted = candidate.potential.is_finite()
            && candidate.mean.iter().all(|v| v.is_finite())
            && log_accept_ratio > u.ln();
        if accepted {
            state.assign(&proposal);
            self.current = Some(candidate);
        } else {
            self.current = Some(current);
        }
        Transition::adjusted(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Composite, GaussianMixture};
    use crate::prox::{LaplacePrior, Unregularized};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn standard_gaussian() -> Composite<GaussianMixture, Unregularized> {
        Composite::new(
            GaussianMixture::isotropic(vec![arr1(&[0.0, 0.0])], 1.0).unwrap(),
            Unregularized,
        )
        .unwrap()
    }

    #[test]
    fn ula_step_is_drift_plus_noise() {
        let target = standard_gaussian();
        let mut ula = UnadjustedLangevin::new(0.1).unwrap();
        let mut x = arr1(&[1.0, -2.0]);
        ula.step(&mut x, &target, &mut NoiseSource::new(9));
        let xi = NoiseSource::new(9).standard_normal(2);
        let expected = arr1(&[1.0 - 0.1, -2.0 + 0.2]) + xi * 0.2_f64.sqrt();
        assert_abs_diff_eq!(x, expected, epsilon = 1e-12);
    }

    #[test]
    fn identity_preconditioner_reproduces_ula() {
        let target = standard_gaussian();
        let mut ula = UnadjustedLangevin::new(0.05).unwrap();
        let mut pula = UnadjustedLangevin::preconditioned(0.05, Array2::eye(2)).unwrap();
        let (mut a, mut b) = (arr1(&[0.3, 0.4]), arr1(&[0.3, 0.4]));
        let (mut na, mut nb) = (NoiseSource::new(1), NoiseSource::new(1));
        for _ in 0..50 {
            ula.step(&mut a, &target, &mut na);
            pula.step(&mut b, &target, &mut nb);
        }
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        assert_eq!(StepStrategy::<Composite<GaussianMixture, Unregularized>>::name(&pula), "PULA");
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(UnadjustedLangevin::new(0.0).is_err());
        assert!(UnadjustedLangevin::preconditioned(0.1, arr2(&[[1.0, 2.0], [2.0, 1.0]])).is_err());
        assert!(HessianPreconditionedLangevin::new(0.1, 0.5, 0).is_err());
        assert!(MetropolisAdjustedLangevin::moreau_yosida(0.1, -1.0).is_err());
        let pula = UnadjustedLangevin::preconditioned(0.1, Array2::eye(3)).unwrap();
        assert!(StepStrategy::validate(&pula, &standard_gaussian(), 2).is_err());
    }

    #[test]
    fn hessian_preconditioner_on_gaussian_is_its_covariance() {
        let cov = arr2(&[[2.0, 0.3], [0.3, 0.5]]);
        let target =
            GaussianMixture::new(vec![1.0], vec![arr1(&[0.0, 0.0])], vec![cov.clone()]).unwrap();
        let ih = HessianPreconditionedLangevin::new(0.1, 1e-3, 10).unwrap();
        let p = ih.refresh(arr1(&[0.7, -0.2]).view(), &target).unwrap();
        assert_abs_diff_eq!(p.matrix, cov, epsilon = 1e-10);
        assert_abs_diff_eq!(p.root.dot(&p.root), cov, epsilon = 1e-10);
    }

    #[test]
    fn mala_stays_put_on_rejection_and_counts_acceptance() {
        let target = standard_gaussian();
        let mut mala = MetropolisAdjustedLangevin::new(50.0).unwrap();
        let mut noise = NoiseSource::new(4);
        let mut x = arr1(&[0.1, 0.1]);
        let mut rejected = 0;
        for _ in 0..200 {
            let before = x.clone();
            let t = mala.step(&mut x, &target, &mut noise);
            if t.accepted == Some(false) {
                rejected += 1;
                assert_eq!(x, before);
            }
        }
        assert!(rejected > 150);
    }

    #[test]
    fn mymala_rejects_proposals_with_infinite_potential() {
        use crate::prox::{ScalarPenalty, SeparablePrior};
        let prior = SeparablePrior::new(ScalarPenalty::Uniform { omega: 0.5 }, 1.0).unwrap();
        let target = Composite::new(
            GaussianMixture::isotropic(vec![arr1(&[0.0])], 1.0).unwrap(),
            prior,
        )
        .unwrap();
        let mut mymala = MetropolisAdjustedLangevin::moreau_yosida(0.5, 0.1).unwrap();
        let mut noise = NoiseSource::new(12);
        let mut x = arr1(&[0.0]);
        for _ in 0..500 {
            mymala.step(&mut x, &target, &mut noise);
            assert!(x[0].abs() <= 0.5);
        }
    }

    #[test]
    fn mymala_with_laplace_prior_moves() {
        let target = Composite::new(
            GaussianMixture::benchmark(2).unwrap(),
            LaplacePrior::centered(0.5, 2).unwrap(),
        )
        .unwrap();
        let mut mymala = MetropolisAdjustedLangevin::moreau_yosida(0.05, 0.05).unwrap();
        let mut noise = NoiseSource::new(3);
        let mut x = arr1(&[0.0, 0.0]);
        let accepted = (0..500)
            .filter(|_| mymala.step(&mut x, &target, &mut noise).accepted == Some(true))
            .count();
        assert!(accepted > 250 && accepted < 500);
    }
}
