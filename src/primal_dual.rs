/*!
Unadjusted Langevin primal-dual algorithm (ULPDA).

For targets `f(x) + g(Kx)` exposed through [`SplitOperator`], each iteration is a
PDHG (Chambolle–Pock) step with Gaussian noise injected into the primal update:

```text
x' = x − γ₀Kᵀz − γ₀∇f(x) + √(2γ₀)ξ        (gradient primal update)
x' = prox_{γ₀f}(x − γ₀Kᵀz) + √(2γ₀)ξ      (proximal primal update)
x̄  = x' + θ(x' − x)
z' = prox_{γ₁g*}(z + γ₁Kx̄)
```

The dual variable `z` lives in the range of `K`. The steps must satisfy
`γ₀·γ₁·‖K‖² < 1`, checked when the sampler is built.
*/

use ndarray::{Array1, ArrayView1};

use crate::distributions::{SmoothPotential, SplitOperator};
use crate::error::{ensure_positive_step, LangevinError, Result};
use crate::langevin::{StepStrategy, Transition};
use crate::noise::NoiseSource;
use crate::operators::LinearOperator;
use crate::prox::prox_conjugate;

/// How the smooth term enters the primal update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimalUpdate {
    /// Explicit gradient step on `f`.
    Gradient,
    /// Implicit step through the closed-form `prox_{γ₀f}`.
    Proximal,
}

/// Step sizes and variant of a primal-dual iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimalDualConfig {
    /// `γ₀`.
    pub primal_step: f64,
    /// `γ₁`.
    pub dual_step: f64,
    /// `θ ∈ [0, 1]`.
    pub extrapolation: f64,
    pub primal_update: PrimalUpdate,
}

impl PrimalDualConfig {
    pub fn new(
        primal_step: f64,
        dual_step: f64,
        extrapolation: f64,
        primal_update: PrimalUpdate,
    ) -> Result<Self> {
        let config = Self {
            primal_step,
            dual_step,
            extrapolation,
            primal_update,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive_step("primal step", self.primal_step)?;
        ensure_positive_step("dual step", self.dual_step)?;
        if !(0.0..=1.0).contains(&self.extrapolation) {
            return Err(LangevinError::algorithm(format!(
                "extrapolation must lie in [0, 1], got {}",
                self.extrapolation
            )));
        }
        Ok(())
    }

    /// Checks the configuration against a target: dimensions, the stability condition
    /// `γ₀·γ₁·‖K‖² < 1`, and availability of `prox_{γ₀f}` for the proximal update.
    pub fn validate_for<T>(&self, target: &T) -> Result<()>
    where
        T: SmoothPotential + SplitOperator + ?Sized,
    {
        self.validate()?;
        let op = target.operator();
        if op.input_dim() != target.dim() {
            return Err(LangevinError::algorithm(format!(
                "operator acts on dimension {}, target has dimension {}",
                op.input_dim(),
                target.dim()
            )));
        }
        let product = self.primal_step * self.dual_step * op.norm_squared();
        if product.is_nan() || product >= 1.0 {
            return Err(LangevinError::algorithm(format!(
                "primal-dual steps violate γ₀·γ₁·‖K‖² < 1 (got {product})"
            )));
        }
        if self.primal_update == PrimalUpdate::Proximal {
            let probe = Array1::zeros(target.dim());
            if target.prox_potential(probe.view(), self.primal_step).is_none() {
                return Err(LangevinError::algorithm(
                    "proximal primal update needs a closed-form prox of the smooth term",
                ));
            }
        }
        Ok(())
    }
}

/// One PDHG iteration, shared by the sampler and the MAP solver. `perturbation` is the
/// already-scaled primal noise `√(2γ₀)ξ`, absent for deterministic optimization.
pub(crate) fn primal_dual_iteration<T>(
    config: &PrimalDualConfig,
    state: &mut Array1<f64>,
    dual: &mut Array1<f64>,
    target: &T,
    perturbation: Option<&Array1<f64>>,
) where
    T: SmoothPotential + SplitOperator + ?Sized,
{
    let op = target.operator();
    let g0 = config.primal_step;
    let g1 = config.dual_step;

    let mut shifted = state.clone();
    shifted.scaled_add(-g0, &op.adjoint(dual.view()));
    let mut next = match config.primal_update {
        PrimalUpdate::Proximal => target
            .prox_potential(shifted.view(), g0)
            .unwrap_or_else(|| explicit_step(&shifted, state.view(), g0, target)),
        PrimalUpdate::Gradient => explicit_step(&shifted, state.view(), g0, target),
    };
    if let Some(p) = perturbation {
        next += p;
    }

    let mut extrapolated = next.clone();
    extrapolated.scaled_add(config.extrapolation, &(&next - &*state));

    let mut ascent = dual.clone();
    ascent.scaled_add(g1, &op.forward(extrapolated.view()));
    *dual = prox_conjugate(target.regularizer(), ascent.view(), g1);
    *state = next;
}

fn explicit_step<T: SmoothPotential + ?Sized>(
    shifted: &Array1<f64>,
    x: ArrayView1<f64>,
    g0: f64,
    target: &T,
) -> Array1<f64> {
    let mut out = shifted.clone();
    out.scaled_add(-g0, &target.potential_gradient(x));
    out
}

/// The ULPDA sampler. Owns the dual variable, which is reset to zero at run start.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimalDualLangevin {
    config: PrimalDualConfig,
    dual: Array1<f64>,
}

impl PrimalDualLangevin {
    /// Builds the sampler for `target`, failing with
    /// [`LangevinError::InvalidAlgorithmConfiguration`] when the steps are unstable.
    pub fn new<T>(config: PrimalDualConfig, target: &T) -> Result<Self>
    where
        T: SmoothPotential + SplitOperator + ?Sized,
    {
        config.validate_for(target)?;
        Ok(Self {
            config,
            dual: Array1::zeros(target.operator().output_dim()),
        })
    }

    pub fn config(&self) -> &PrimalDualConfig {
        &self.config
    }

    /// Current dual iterate `z`.
    pub fn dual(&self) -> &Array1<f64> {
        &self.dual
    }
}

impl<T: SmoothPotential + SplitOperator + ?Sized> StepStrategy<T> for PrimalDualLangevin {
    fn name(&self) -> &'static str {
        "ULPDA"
    }

    fn validate(&self, target: &T, _dim: usize) -> Result<()> {
        self.config.validate_for(target)
    }

    fn reset(&mut self, _initial: ArrayView1<f64>, target: &T) {
        self.dual = Array1::zeros(target.operator().output_dim());
    }

    fn step(&mut self, state: &mut Array1<f64>, target: &T, noise: &mut NoiseSource) -> Transition {
        let perturbation =
            noise.standard_normal(state.len()) * (2.0 * self.config.primal_step).sqrt();
        primal_dual_iteration(&self.config, state, &mut self.dual, target, Some(&perturbation));
        Transition::unadjusted()
    }
}
