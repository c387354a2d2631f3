/*!
Deterministic MAP solvers sharing the target interfaces of the samplers.

[`ForwardBackward`] iterates `x ← prox_{γU₂}(x − γ∇U₁(x))`, optionally with FISTA
momentum. [`PrimalDualSolver`] runs the ULPDA iteration with the noise removed, which
is plain PDHG on `f(x) + g(Kx)`. Both keep the objective value after every iteration.
*/

use ndarray::Array1;

use crate::distributions::{total_potential, Proximal, SmoothPotential, SplitOperator};
use crate::operators::LinearOperator;
use crate::error::{ensure_positive_step, LangevinError, Result};
use crate::primal_dual::{primal_dual_iteration, PrimalDualConfig};

/// A point estimate and the objective trace that led to it.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEstimate {
    pub estimate: Array1<f64>,
    /// Objective after each iteration.
    pub objective: Vec<f64>,
    pub iterations: usize,
}

fn ensure_iterations(iterations: usize) -> Result<()> {
    if iterations == 0 {
        return Err(LangevinError::algorithm(
            "optimizer needs a positive iteration budget",
        ));
    }
    Ok(())
}

fn ensure_start<T: SmoothPotential + ?Sized>(target: &T, x0: &Array1<f64>) -> Result<()> {
    if x0.len() != target.dim() {
        return Err(LangevinError::algorithm(format!(
            "starting point has dimension {}, target has dimension {}",
            x0.len(),
            target.dim()
        )));
    }
    Ok(())
}

fn diverged(algorithm: &str, iteration: usize) -> LangevinError {
    log::warn!("{algorithm} produced a non-finite iterate at iteration {iteration}");
    LangevinError::NumericalDivergence {
        algorithm: algorithm.to_string(),
        iteration,
    }
}

/// Proximal gradient descent on `U₁ + U₂`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardBackward {
    /// `γ`; convergence needs `γ ≤ 1/L` for `L` the Lipschitz constant of `∇U₁`.
    pub step_size: f64,
    pub iterations: usize,
    /// FISTA momentum.
    pub accelerated: bool,
}

impl ForwardBackward {
    pub fn new(step_size: f64, iterations: usize, accelerated: bool) -> Result<Self> {
        let solver = Self {
            step_size,
            iterations,
            accelerated,
        };
        solver.validate()?;
        Ok(solver)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive_step("forward-backward step size", self.step_size)?;
        ensure_iterations(self.iterations)
    }

    fn name(&self) -> &'static str {
        if self.accelerated {
            "FISTA"
        } else {
            "forward-backward"
        }
    }

    pub fn solve<T>(&self, target: &T, x0: Array1<f64>) -> Result<MapEstimate>
    where
        T: SmoothPotential + Proximal + ?Sized,
    {
        self.validate()?;
        ensure_start(target, &x0)?;
        let gamma = self.step_size;
        let mut x = x0.clone();
        let mut y = x0;
        let mut t = 1.0_f64;
        let mut objective = Vec::with_capacity(self.iterations);

        for k in 0..self.iterations {
            let mut forward = y.clone();
            forward.scaled_add(-gamma, &target.potential_gradient(y.view()));
            let next = target.prox_nonsmooth(forward.view(), gamma);
            if next.iter().any(|v| !v.is_finite()) {
                return Err(diverged(self.name(), k));
            }
            if self.accelerated {
                let t_next = (1.0 + (1.0 + 4.0 * t * t).sqrt()) / 2.0;
                y = &next + &((&next - &x) * ((t - 1.0) / t_next));
                t = t_next;
            } else {
                y = next.clone();
            }
            x = next;
            objective.push(total_potential(target, x.view()));
        }
        log::debug!(
            "{} finished {} iterations, objective {:.6}",
            self.name(),
            self.iterations,
            objective.last().copied().unwrap_or(f64::NAN)
        );
        Ok(MapEstimate {
            estimate: x,
            objective,
            iterations: self.iterations,
        })
    }
}

/// PDHG on `f(x) + g(Kx)`: the ULPDA iteration without injected noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimalDualSolver {
    pub config: PrimalDualConfig,
    pub iterations: usize,
}

impl PrimalDualSolver {
    pub fn new(config: PrimalDualConfig, iterations: usize) -> Result<Self> {
        config.validate()?;
        ensure_iterations(iterations)?;
        Ok(Self { config, iterations })
    }

    pub fn solve<T>(&self, target: &T, x0: Array1<f64>) -> Result<MapEstimate>
    where
        T: SmoothPotential + SplitOperator + ?Sized,
    {
        ensure_iterations(self.iterations)?;
        self.config.validate_for(target)?;
        ensure_start(target, &x0)?;
        let mut x = x0;
        let mut z = Array1::zeros(target.operator().output_dim());
        let mut objective = Vec::with_capacity(self.iterations);

        for k in 0..self.iterations {
            primal_dual_iteration(&self.config, &mut x, &mut z, target, None);
            if x.iter().any(|v| !v.is_finite()) {
                return Err(diverged("PDHG", k));
            }
            objective.push(target.potential(x.view()) + target.regularization_value(x.view()));
        }
        log::debug!(
            "PDHG finished {} iterations, objective {:.6}",
            self.iterations,
            objective.last().copied().unwrap_or(f64::NAN)
        );
        Ok(MapEstimate {
            estimate: x,
            objective,
            iterations: self.iterations,
        })
    }
}
