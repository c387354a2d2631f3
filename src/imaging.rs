/*!
Bayesian deconvolution: a Gaussian blur likelihood with a total-variation prior.

The posterior `π(x | y) ∝ exp(−‖Ax − y‖²/(2σ²) − τ TV(x))` is exposed to the samplers in
two ways. Through [`Proximal`] it serves MYULA, with the TV prox evaluated iteratively.
Through [`SplitOperator`] it serves ULPDA and PDHG, which only need the closed-form
prox of the mixed norm applied to the discrete gradient.

The MC-TV and ME-TV posteriors of [`ImagingPosterior::nonconvex`] subtract a Moreau
envelope of the prior from the data term (see [`NonconvexTv`]); the samplers see them
through the same two traits.

Images are `rows × cols` matrices; samplers work on their row-major flattening (see
[`flatten`] and [`unflatten`]). File decoding is left to the caller.

# Examples

```rust
use prox_langevin::algorithm::SubSolverConfig;
use prox_langevin::imaging::{flatten, synthesize_observation, BlurLikelihood, ImagingPosterior};
use prox_langevin::operators::{Convolution2D, TotalVariation};
use prox_langevin::distributions::SmoothPotential;
use ndarray::Array2;

let truth = Array2::from_shape_fn((8, 8), |(r, c)| if r > 2 && c > 2 { 1.0 } else { 0.0 });
let blur = Convolution2D::uniform(8, 8, 3).unwrap();
let observed = synthesize_observation(&truth, &blur, 0.01, 3).unwrap();
let likelihood = BlurLikelihood::new(blur, flatten(&observed), 0.01).unwrap();
let tv = TotalVariation::new(8, 8, 10.0, true, SubSolverConfig::new(100, 1e-6).unwrap()).unwrap();
let posterior = ImagingPosterior::new(likelihood, tv).unwrap();
assert_eq!(posterior.dim(), 64);
```
*/

use ndarray::{Array1, Array2, ArrayView1, Zip};

use crate::algorithm::SubSolverConfig;
use crate::core::{ChainDriver, RunConfig};
use crate::distributions::{Proximal, SmoothPotential, SplitOperator};
use crate::error::{ensure_positive_parameter, ensure_positive_step, LangevinError, Result};
use crate::langevin::StepStrategy;
use crate::noise::NoiseSource;
use crate::operators::{Convolution2D, Gradient2D, LinearOperator, TotalVariation};
use crate::optimize::{ForwardBackward, PrimalDualSolver};
use crate::primal_dual::{PrimalDualConfig, PrimalDualLangevin};
use crate::prox::MixedNorm;
use crate::proximal::ProximalLangevin;
use crate::stats::{RecordMode, RunSummary, RunningMoments};

/// Row-major flattening of an image into a state vector.
pub fn flatten(image: &Array2<f64>) -> Array1<f64> {
    image.iter().copied().collect()
}

/// Inverse of [`flatten`].
pub fn unflatten(state: &Array1<f64>, rows: usize, cols: usize) -> Result<Array2<f64>> {
    Array2::from_shape_vec((rows, cols), state.to_vec()).map_err(|e| {
        LangevinError::model(format!(
            "state of length {} is not a {rows}x{cols} image: {e}",
            state.len()
        ))
    })
}

/// `y = Ax + σε` for a reference image `x`.
pub fn synthesize_observation(
    image: &Array2<f64>,
    blur: &Convolution2D,
    noise_std: f64,
    seed: u64,
) -> Result<Array2<f64>> {
    ensure_positive_parameter("noise standard deviation", noise_std)?;
    let (rows, cols) = blur.shape();
    if image.dim() != (rows, cols) {
        return Err(LangevinError::model(format!(
            "image is {:?}, blur expects {rows}x{cols}",
            image.dim()
        )));
    }
    let mut noise = NoiseSource::new(seed);
    let mut y = blur.forward(flatten(image).view());
    y.scaled_add(noise_std, &noise.standard_normal(y.len()));
    unflatten(&y, rows, cols)
}

fn check_same_shape(reference: &Array2<f64>, estimate: &Array2<f64>) -> Result<()> {
    if reference.dim() != estimate.dim() {
        return Err(LangevinError::model(format!(
            "images differ in shape: {:?} vs {:?}",
            reference.dim(),
            estimate.dim()
        )));
    }
    Ok(())
}

/// Mean squared error between two images.
pub fn mse(reference: &Array2<f64>, estimate: &Array2<f64>) -> Result<f64> {
    check_same_shape(reference, estimate)?;
    let total = Zip::from(reference)
        .and(estimate)
        .fold(0.0, |acc, &r, &e| acc + (r - e) * (r - e));
    Ok(total / reference.len() as f64)
}

/// Signal-to-noise ratio `20 log₁₀(‖x‖ / ‖x̂ − x‖)` in dB.
pub fn snr(reference: &Array2<f64>, estimate: &Array2<f64>) -> Result<f64> {
    let err = mse(reference, estimate)?.sqrt();
    let signal = (reference.mapv(|v| v * v).sum() / reference.len() as f64).sqrt();
    Ok(20.0 * (signal / err).log10())
}

/// Peak signal-to-noise ratio `10 log₁₀(range² / MSE)` in dB.
pub fn psnr(reference: &Array2<f64>, estimate: &Array2<f64>, data_range: f64) -> Result<f64> {
    ensure_positive_parameter("data range", data_range)?;
    let err = mse(reference, estimate)?;
    Ok(10.0 * (data_range * data_range / err).log10())
}

/// `f(x) = ‖Ax − y‖² / (2σ²)` for a circular blur `A`.
#[derive(Debug, Clone)]
pub struct BlurLikelihood {
    blur: Convolution2D,
    observed: Array1<f64>,
    noise_std: f64,
    adjoint_observed: Array1<f64>,
}

impl BlurLikelihood {
    pub fn new(blur: Convolution2D, observed: Array1<f64>, noise_std: f64) -> Result<Self> {
        ensure_positive_parameter("noise standard deviation", noise_std)?;
        if observed.len() != blur.input_dim() {
            return Err(LangevinError::model(format!(
                "observation has {} pixels, blur acts on {}",
                observed.len(),
                blur.input_dim()
            )));
        }
        if observed.iter().any(|v| !v.is_finite()) {
            return Err(LangevinError::model("observation must be finite"));
        }
        let adjoint_observed = blur.adjoint(observed.view());
        Ok(Self {
            blur,
            observed,
            noise_std,
            adjoint_observed,
        })
    }

    pub fn blur(&self) -> &Convolution2D {
        &self.blur
    }

    pub fn observed(&self) -> &Array1<f64> {
        &self.observed
    }

    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }

    /// `‖A‖² / σ²`, the Lipschitz constant of the gradient.
    pub fn lipschitz_constant(&self) -> f64 {
        self.blur.norm_squared() / (self.noise_std * self.noise_std)
    }

    fn residual(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.blur.forward(x) - &self.observed
    }
}

impl SmoothPotential for BlurLikelihood {
    fn dim(&self) -> usize {
        self.observed.len()
    }

    fn potential(&self, x: ArrayView1<f64>) -> f64 {
        let r = self.residual(x);
        r.dot(&r) / (2.0 * self.noise_std * self.noise_std)
    }

    fn potential_gradient(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.blur.adjoint(self.residual(x).view()) / (self.noise_std * self.noise_std)
    }

    /// `(I + (γ/σ²)AᵀA)⁻¹(x + (γ/σ²)Aᵀy)`, exact in the Fourier domain.
    fn prox_potential(&self, x: ArrayView1<f64>, step: f64) -> Option<Array1<f64>> {
        let c = step / (self.noise_std * self.noise_std);
        let mut rhs = x.to_owned();
        rhs.scaled_add(c, &self.adjoint_observed);
        Some(self.blur.regularized_inverse(rhs.view(), c))
    }
}

/// Which Moreau envelope is subtracted from the data term of a nonconvex TV posterior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TvCorrection {
    /// MC-TV: `e(x) = env_γ(τ‖·‖)(Kx)`, so the prior acts like a minimax-concave penalty on
    /// each gradient magnitude and stops growing past `τγ`.
    MoreauCorrected,
    /// ME-TV: `e(x) = env_γ(τ TV)(x)`, evaluated with the iterative TV prox.
    MoreauEnvelope,
}

/**
Nonconvex TV: the posterior potential becomes `f(x) − e(x) + τ TV(x)`, where the concave
correction `−e` is folded into the smooth part. `gamma` controls the nonconvexity; as it
grows, `e` and its gradient vanish and plain TV is recovered.

`solver` bounds the fixed-point iteration `u ← prox_{tf}(x + t∇e(u))` used for the prox
of the smooth part. That iteration contracts only for `t · Lip(∇e) < 1`; for larger
steps the smooth part reports no prox.
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonconvexTv {
    correction: TvCorrection,
    gamma: f64,
    solver: SubSolverConfig,
}

impl NonconvexTv {
    pub fn new(correction: TvCorrection, gamma: f64, solver: SubSolverConfig) -> Result<Self> {
        ensure_positive_parameter("nonconvex TV gamma", gamma)?;
        solver.validate()?;
        Ok(Self {
            correction,
            gamma,
            solver,
        })
    }

    pub fn correction(&self) -> TvCorrection {
        self.correction
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    fn lipschitz_constant(&self, prior: &TotalVariation) -> f64 {
        match self.correction {
            TvCorrection::MoreauCorrected => prior.gradient().norm_squared() / self.gamma,
            TvCorrection::MoreauEnvelope => 1.0 / self.gamma,
        }
    }

    /// `(e(x), ∇e(x))`.
    fn envelope(&self, x: ArrayView1<f64>, prior: &TotalVariation) -> (f64, Array1<f64>) {
        let gamma = self.gamma;
        match self.correction {
            TvCorrection::MoreauCorrected => {
                let u = prior.gradient().forward(x);
                let p = prior.norm().prox_nonsmooth(u.view(), gamma);
                let r = &u - &p;
                let value = prior.norm().nonsmooth_value(p.view()) + r.dot(&r) / (2.0 * gamma);
                (value, prior.gradient().adjoint(r.view()) / gamma)
            }
            TvCorrection::MoreauEnvelope => {
                let p = prior.prox_nonsmooth(x, gamma);
                let r = &x - &p;
                let value = prior.nonsmooth_value(p.view()) + r.dot(&r) / (2.0 * gamma);
                (value, r / gamma)
            }
        }
    }
}

/// Blur likelihood plus `τ TV(x)`, optionally made nonconvex by a [`NonconvexTv`]
/// correction.
#[derive(Debug, Clone)]
pub struct ImagingPosterior {
    likelihood: BlurLikelihood,
    prior: TotalVariation,
    correction: Option<NonconvexTv>,
}

impl ImagingPosterior {
    pub fn new(likelihood: BlurLikelihood, prior: TotalVariation) -> Result<Self> {
        if likelihood.blur().shape() != prior.gradient().shape() {
            return Err(LangevinError::model(format!(
                "blur acts on {:?} images, TV prior on {:?}",
                likelihood.blur().shape(),
                prior.gradient().shape()
            )));
        }
        Ok(Self {
            likelihood,
            prior,
            correction: None,
        })
    }

    /// MC-TV or ME-TV posterior.
    pub fn nonconvex(
        likelihood: BlurLikelihood,
        prior: TotalVariation,
        correction: NonconvexTv,
    ) -> Result<Self> {
        let mut posterior = Self::new(likelihood, prior)?;
        posterior.correction = Some(correction);
        Ok(posterior)
    }

    pub fn likelihood(&self) -> &BlurLikelihood {
        &self.likelihood
    }

    pub fn prior(&self) -> &TotalVariation {
        &self.prior
    }

    pub fn correction(&self) -> Option<&NonconvexTv> {
        self.correction.as_ref()
    }

    pub fn prior_name(&self) -> &'static str {
        match self.correction.map(|c| c.correction) {
            None => "TV",
            Some(TvCorrection::MoreauCorrected) => "MC-TV",
            Some(TvCorrection::MoreauEnvelope) => "ME-TV",
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.likelihood.blur().shape()
    }

    /// Lipschitz constant of the smooth part's gradient, correction included.
    pub fn smooth_lipschitz_constant(&self) -> f64 {
        let correction = self.correction.map_or(0.0, |c| c.lipschitz_constant(&self.prior));
        self.likelihood.lipschitz_constant() + correction
    }

    /// `1 / (L + 1/λ)`, the largest stable MYULA step for smoothing `λ`.
    pub fn moreau_yosida_step_bound(&self, smoothing: f64) -> f64 {
        1.0 / (self.smooth_lipschitz_constant() + 1.0 / smoothing)
    }

    /// `prox_{t(f − e)}(x)` as the fixed point of `u = prox_{tf}(x + t∇e(u))`.
    fn corrected_prox(
        &self,
        correction: &NonconvexTv,
        x: ArrayView1<f64>,
        step: f64,
    ) -> Option<Array1<f64>> {
        if step * correction.lipschitz_constant(&self.prior) >= 1.0 {
            return None;
        }
        let mut u = self.likelihood.prox_potential(x, step)?;
        for _ in 0..correction.solver.max_iterations {
            let (_, grad) = correction.envelope(u.view(), &self.prior);
            let mut shifted = x.to_owned();
            shifted.scaled_add(step, &grad);
            let next = self.likelihood.prox_potential(shifted.view(), step)?;
            let change = (&next - &u).fold(0.0_f64, |m, v| m.max(v.abs()));
            u = next;
            if change <= correction.solver.tolerance {
                break;
            }
        }
        Some(u)
    }
}

impl SmoothPotential for ImagingPosterior {
    fn dim(&self) -> usize {
        self.likelihood.dim()
    }

    fn potential(&self, x: ArrayView1<f64>) -> f64 {
        let data = self.likelihood.potential(x);
        match &self.correction {
            None => data,
            Some(c) => data - c.envelope(x, &self.prior).0,
        }
    }

    fn potential_gradient(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let grad = self.likelihood.potential_gradient(x);
        match &self.correction {
            None => grad,
            Some(c) => grad - c.envelope(x, &self.prior).1,
        }
    }

    fn prox_potential(&self, x: ArrayView1<f64>, step: f64) -> Option<Array1<f64>> {
        match &self.correction {
            None => self.likelihood.prox_potential(x, step),
            Some(c) => self.corrected_prox(c, x, step),
        }
    }
}

impl Proximal for ImagingPosterior {
    fn nonsmooth_value(&self, x: ArrayView1<f64>) -> f64 {
        self.prior.nonsmooth_value(x)
    }

    fn prox_nonsmooth(&self, x: ArrayView1<f64>, step: f64) -> Array1<f64> {
        self.prior.prox_nonsmooth(x, step)
    }

    fn nonsmooth_dim(&self) -> Option<usize> {
        self.prior.nonsmooth_dim()
    }
}

impl SplitOperator for ImagingPosterior {
    type Operator = Gradient2D;
    type Regularizer = MixedNorm;

    fn operator(&self) -> &Gradient2D {
        self.prior.gradient()
    }

    fn regularizer(&self) -> &MixedNorm {
        self.prior.norm()
    }
}

/// Sampler used for the posterior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImagingSampler {
    /// ULPDA.
    PrimalDual(PrimalDualConfig),
    /// MYULA with the iterative TV prox.
    MoreauYosida { step_size: f64, smoothing: f64 },
}

impl ImagingSampler {
    fn build(
        &self,
        posterior: &ImagingPosterior,
    ) -> Result<Box<dyn StepStrategy<ImagingPosterior>>> {
        Ok(match self {
            ImagingSampler::PrimalDual(config) => {
                Box::new(PrimalDualLangevin::new(*config, posterior)?)
            }
            ImagingSampler::MoreauYosida {
                step_size,
                smoothing,
            } => Box::new(ProximalLangevin::moreau_yosida(*step_size, *smoothing)?),
        })
    }
}

/// Deterministic solver for the MAP reference image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapSolver {
    ForwardBackward(ForwardBackward),
    PrimalDual(PrimalDualSolver),
}

/// A deconvolution run: sampler, budget, seed and optional MAP solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeconvolutionConfig {
    pub sampler: ImagingSampler,
    /// Iterations averaged into the posterior moments.
    pub iterations: usize,
    /// Iterations discarded before averaging.
    pub burn_in: usize,
    pub seed: u64,
    pub map: Option<MapSolver>,
}

impl DeconvolutionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(LangevinError::algorithm(
                "deconvolution needs a positive number of averaged iterations",
            ));
        }
        match self.sampler {
            ImagingSampler::PrimalDual(config) => config.validate(),
            ImagingSampler::MoreauYosida {
                step_size,
                smoothing,
            } => {
                ensure_positive_step("MYULA step size", step_size)?;
                ensure_positive_step("MYULA smoothing", smoothing)
            }
        }
    }
}

/// The MAP reference and its objective trace.
#[derive(Debug, Clone, PartialEq)]
pub struct MapImage {
    pub image: Array2<f64>,
    pub objective: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeconvolutionResult {
    pub posterior_mean: Array2<f64>,
    pub posterior_variance: Array2<f64>,
    pub map: Option<MapImage>,
    /// Summary over every iteration, burn-in included.
    pub summary: RunSummary,
}

/// Samples the posterior starting from the observation, keeping only running moments of
/// the post-burn-in states, then optionally computes a MAP estimate.
///
/// Sampler stability is checked before the first iteration.
pub fn run_deconvolution(
    posterior: &ImagingPosterior,
    config: &DeconvolutionConfig,
) -> Result<DeconvolutionResult> {
    config.validate()?;
    let (rows, cols) = posterior.shape();
    let strategy = config.sampler.build(posterior)?;
    let run = RunConfig::new(config.burn_in + config.iterations, config.seed, RecordMode::Moments)?;
    let start = posterior.likelihood().observed().clone();
    let mut chain = ChainDriver::new(posterior, strategy, start, &run)?;

    log::info!(
        "deconvolving a {rows}x{cols} image under {} with {}: {} burn-in + {} iterations",
        posterior.prior_name(),
        chain.strategy().name(),
        config.burn_in,
        config.iterations
    );
    let mut moments = RunningMoments::new(posterior.dim());
    for k in 0..run.iterations {
        chain.step()?;
        if k >= config.burn_in {
            moments.push(chain.state().view());
        }
    }

    let map = match &config.map {
        None => None,
        Some(solver) => {
            let x0 = posterior.likelihood().observed().clone();
            let estimate = match solver {
                MapSolver::ForwardBackward(fb) => fb.solve(posterior, x0)?,
                MapSolver::PrimalDual(pdhg) => pdhg.solve(posterior, x0)?,
            };
            Some(MapImage {
                image: unflatten(&estimate.estimate, rows, cols)?,
                objective: estimate.objective,
            })
        }
    };

    Ok(DeconvolutionResult {
        posterior_mean: unflatten(moments.mean(), rows, cols)?,
        posterior_variance: unflatten(&moments.variance(), rows, cols)?,
        map,
        summary: chain.summary(),
    })
}
