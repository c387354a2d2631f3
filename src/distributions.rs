/*!
Sampling targets: the traits each update rule needs, and the Gaussian-mixture model.

A target's potential `U = U₁ + U₂` is split into a smooth part `U₁`, exposed through
[`SmoothPotential`] (and optionally its Hessian through [`Curvature`]), and a
nonsmooth part `U₂`, exposed through its proximal operator by [`Proximal`]. Targets
whose nonsmooth term is `g(Kx)` for a linear operator `K` additionally implement
[`SplitOperator`], which is what the primal-dual sampler consumes.

# Examples

```rust
use prox_langevin::distributions::{Composite, GaussianMixture, SmoothPotential};
use prox_langevin::prox::LaplacePrior;
use ndarray::{arr1, arr2};

let mixture = GaussianMixture::new(
    vec![0.5, 0.5],
    vec![arr1(&[-2.0, 0.0]), arr1(&[2.0, 0.0])],
    vec![arr2(&[[1.0, 0.0], [0.0, 1.0]]), arr2(&[[1.0, 0.0], [0.0, 1.0]])],
)
.unwrap();
let target = Composite::new(mixture, LaplacePrior::centered(0.1, 2).unwrap()).unwrap();
let g = target.potential_gradient(arr1(&[0.5, -0.5]).view());
assert_eq!(g.len(), 2);
```
*/

use approx::abs_diff_eq;
use ndarray::{Array1, Array2, ArrayView1, Zip};
use std::f64::consts::PI;

use crate::error::{LangevinError, Result};
use crate::linalg::spd_factor;
use crate::operators::LinearOperator;

/// The smooth part `U₁` of a potential (negative log-density up to a constant).
pub trait SmoothPotential {
    /// State dimension.
    fn dim(&self) -> usize;

    /// `U₁(x)`.
    fn potential(&self, x: ArrayView1<f64>) -> f64;

    /// `∇U₁(x)`.
    fn potential_gradient(&self, x: ArrayView1<f64>) -> Array1<f64>;

    /// Closed-form `prox_{step·U₁}(x)`, when the smooth part has one.
    fn prox_potential(&self, _x: ArrayView1<f64>, _step: f64) -> Option<Array1<f64>> {
        None
    }
}

/// Smooth potentials that can report their Hessian.
pub trait Curvature: SmoothPotential {
    /// `∇²U₁(x)`, a `dim × dim` symmetric matrix.
    fn potential_hessian(&self, x: ArrayView1<f64>) -> Array2<f64>;
}

/// A nonsmooth (or merely prox-friendly) term `U₂`.
pub trait Proximal {
    /// `U₂(x)`; may be `+∞` outside the term's domain.
    fn nonsmooth_value(&self, x: ArrayView1<f64>) -> f64;

    /// `prox_{step·U₂}(x) = argmin_u { U₂(u) + ‖u − x‖² / (2·step) }` for `step ≥ 0`.
    fn prox_nonsmooth(&self, x: ArrayView1<f64>, step: f64) -> Array1<f64>;

    /// Dimension the term is tied to, if any.
    fn nonsmooth_dim(&self) -> Option<usize> {
        None
    }
}

/// Left Bregman proximal operator of `U₂` under the hyperbolic-entropy mirror map
/// with per-coordinate scale `scale`.
pub trait BregmanProximal {
    fn left_bregman_prox(&self, x: ArrayView1<f64>, scale: ArrayView1<f64>, step: f64)
        -> Array1<f64>;
}

/// Targets whose nonsmooth part is `g(Kx)` for a linear regularization operator `K`.
pub trait SplitOperator {
    type Operator: LinearOperator;
    type Regularizer: Proximal;

    /// The operator `K`.
    fn operator(&self) -> &Self::Operator;

    /// The function `g` acting on the range of `K`.
    fn regularizer(&self) -> &Self::Regularizer;

    /// `g(Kx)`.
    fn regularization_value(&self, x: ArrayView1<f64>) -> f64 {
        let kx = self.operator().forward(x);
        self.regularizer().nonsmooth_value(kx.view())
    }
}

/// `U₁(x) + U₂(x)`.
pub fn total_potential<T>(target: &T, x: ArrayView1<f64>) -> f64
where
    T: SmoothPotential + Proximal + ?Sized,
{
    target.potential(x) + target.nonsmooth_value(x)
}

/// A smooth potential paired with a nonsmooth term.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite<S, N> {
    pub smooth: S,
    pub nonsmooth: N,
}

impl<S: SmoothPotential, N: Proximal> Composite<S, N> {
    /// Pairs the two terms, checking that their dimensions agree.
    pub fn new(smooth: S, nonsmooth: N) -> Result<Self> {
        if let Some(d) = nonsmooth.nonsmooth_dim() {
            if d != smooth.dim() {
                return Err(LangevinError::model(format!(
                    "nonsmooth term has dimension {d}, smooth term has dimension {}",
                    smooth.dim()
                )));
            }
        }
        Ok(Self { smooth, nonsmooth })
    }
}

impl<S: SmoothPotential, N> SmoothPotential for Composite<S, N> {
    fn dim(&self) -> usize {
        self.smooth.dim()
    }

    fn potential(&self, x: ArrayView1<f64>) -> f64 {
        self.smooth.potential(x)
    }

    fn potential_gradient(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.smooth.potential_gradient(x)
    }

    fn prox_potential(&self, x: ArrayView1<f64>, step: f64) -> Option<Array1<f64>> {
        self.smooth.prox_potential(x, step)
    }
}

impl<S: Curvature, N> Curvature for Composite<S, N> {
    fn potential_hessian(&self, x: ArrayView1<f64>) -> Array2<f64> {
        self.smooth.potential_hessian(x)
    }
}

impl<S, N: Proximal> Proximal for Composite<S, N> {
    fn nonsmooth_value(&self, x: ArrayView1<f64>) -> f64 {
        self.nonsmooth.nonsmooth_value(x)
    }

    fn prox_nonsmooth(&self, x: ArrayView1<f64>, step: f64) -> Array1<f64> {
        self.nonsmooth.prox_nonsmooth(x, step)
    }

    fn nonsmooth_dim(&self) -> Option<usize> {
        self.nonsmooth.nonsmooth_dim()
    }
}

impl<S, N: BregmanProximal> BregmanProximal for Composite<S, N> {
    fn left_bregman_prox(
        &self,
        x: ArrayView1<f64>,
        scale: ArrayView1<f64>,
        step: f64,
    ) -> Array1<f64> {
        self.nonsmooth.left_bregman_prox(x, scale, step)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Component {
    log_weight: f64,
    mean: Array1<f64>,
    precision: Array2<f64>,
    log_normalizer: f64,
}

impl Component {
    /// `log wᵢ + log N(x; μᵢ, Σᵢ)` and the score term `Pᵢ(x − μᵢ)`.
    fn log_term(&self, x: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let diff = &x - &self.mean;
        let score = self.precision.dot(&diff);
        let quad = diff.dot(&score);
        (self.log_weight + self.log_normalizer - 0.5 * quad, score)
    }
}

/**
A finite mixture of multivariate Gaussians, `p(x) = Σᵢ wᵢ N(x; μᵢ, Σᵢ)`.

Covariances are factorized once at construction; evaluations reuse the precisions and
log-normalizers. All log-density sums go through log-sum-exp, so points far from every
component still produce finite gradients.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture {
    dim: usize,
    weights: Array1<f64>,
    components: Vec<Component>,
}

impl GaussianMixture {
    /// Builds a mixture from weights, means and covariance matrices.
    ///
    /// Fails with [`LangevinError::InvalidModelConfiguration`] if the weights are not
    /// nonnegative and summing to one, if the lists have different lengths, if means
    /// and covariances disagree in dimension, or if a covariance is not SPD.
    pub fn new(
        weights: Vec<f64>,
        means: Vec<Array1<f64>>,
        covariances: Vec<Array2<f64>>,
    ) -> Result<Self> {
        if weights.is_empty() {
            return Err(LangevinError::model("mixture needs at least one component"));
        }
        if weights.len() != means.len() || weights.len() != covariances.len() {
            return Err(LangevinError::model(format!(
                "got {} weights, {} means and {} covariances",
                weights.len(),
                means.len(),
                covariances.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(LangevinError::model("mixture weights must be nonnegative"));
        }
        let total: f64 = weights.iter().sum();
        if !abs_diff_eq!(total, 1.0, epsilon = 1e-9) {
            return Err(LangevinError::model(format!(
                "mixture weights must sum to one, got {total}"
            )));
        }

        let dim = means[0].len();
        if dim == 0 {
            return Err(LangevinError::model("mixture components must have dimension ≥ 1"));
        }
        let mut components = Vec::with_capacity(weights.len());
        for (i, ((&w, mean), cov)) in weights.iter().zip(means).zip(covariances).enumerate() {
            if mean.len() != dim || cov.dim() != (dim, dim) {
                return Err(LangevinError::model(format!(
                    "component {i} does not have dimension {dim}"
                )));
            }
            if mean.iter().any(|v| !v.is_finite()) {
                return Err(LangevinError::model(format!("component {i} has a non-finite mean")));
            }
            let factor = spd_factor(&cov).ok_or_else(|| {
                LangevinError::model(format!(
                    "covariance of component {i} is not symmetric positive definite"
                ))
            })?;
            components.push(Component {
                log_weight: w.ln(),
                mean,
                precision: factor.inverse,
                log_normalizer: -0.5 * (dim as f64 * (2.0 * PI).ln() + factor.log_det),
            });
        }

        Ok(Self {
            dim,
            weights: Array1::from(weights),
            components,
        })
    }

    /// Equal-weight mixture of isotropic components `N(μᵢ, variance·I)`.
    pub fn isotropic(means: Vec<Array1<f64>>, variance: f64) -> Result<Self> {
        crate::error::ensure_positive_parameter("variance", variance)?;
        let n = means.len();
        if n == 0 {
            return Err(LangevinError::model("mixture needs at least one component"));
        }
        let covariances = means
            .iter()
            .map(|m| Array2::eye(m.len()) * variance)
            .collect();
        Self::new(vec![1.0 / n as f64; n], means, covariances)
    }

    /// The 2-D benchmark mixtures with `n ∈ 1..=5` equally weighted, correlated components.
    pub fn benchmark(n: usize) -> Result<Self> {
        let table: [([f64; 2], [[f64; 2]; 2]); 5] = [
            ([0.0, 0.0], [[1.0, -0.5], [-0.5, 1.0]]),
            ([-2.0, 3.0], [[0.5, 0.2], [0.2, 0.7]]),
            ([2.0, -3.0], [[0.5, 0.1], [0.1, 0.9]]),
            ([3.0, 3.0], [[0.8, 0.02], [0.02, 0.3]]),
            ([-2.0, -2.0], [[1.2, 0.05], [0.05, 0.8]]),
        ];
        let picked: Vec<usize> = match n {
            1 => vec![0],
            2 => vec![0, 1],
            3 => vec![0, 1, 2],
            4 => vec![1, 2, 3, 4],
            5 => vec![0, 1, 2, 3, 4],
            _ => {
                return Err(LangevinError::model(format!(
                    "benchmark mixtures have 1 to 5 components, got {n}"
                )))
            }
        };
        let means = picked.iter().map(|&i| Array1::from(table[i].0.to_vec())).collect();
        let covs = picked
            .iter()
            .map(|&i| Array2::from_shape_fn((2, 2), |(r, c)| table[i].1[r][c]))
            .collect();
        Self::new(vec![1.0 / n as f64; n], means, covs)
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn means(&self) -> impl Iterator<Item = &Array1<f64>> {
        self.components.iter().map(|c| &c.mean)
    }

    /// Per-component log terms and scores, plus their log-sum-exp.
    fn evaluate(&self, x: ArrayView1<f64>) -> (Vec<f64>, Vec<Array1<f64>>, f64) {
        let (logs, scores): (Vec<f64>, Vec<Array1<f64>>) =
            self.components.iter().map(|c| c.log_term(x)).unzip();
        let max = logs.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let lse = if max.is_finite() {
            max + logs.iter().map(|&l| (l - max).exp()).sum::<f64>().ln()
        } else {
            max
        };
        (logs, scores, lse)
    }

    /// Normalized log-density `log p(x)`.
    pub fn log_density(&self, x: ArrayView1<f64>) -> f64 {
        self.evaluate(x).2
    }

    /// Posterior component probabilities `rᵢ(x)`.
    pub fn responsibilities(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let (logs, _, lse) = self.evaluate(x);
        Array1::from_iter(logs.iter().map(|&l| (l - lse).exp()))
    }
}

impl SmoothPotential for GaussianMixture {
    fn dim(&self) -> usize {
        self.dim
    }

    fn potential(&self, x: ArrayView1<f64>) -> f64 {
        -self.log_density(x)
    }

    fn potential_gradient(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let (logs, scores, lse) = self.evaluate(x);
        let mut grad = Array1::zeros(self.dim);
        for (l, score) in logs.iter().zip(&scores) {
            let r = (l - lse).exp();
            if r > 0.0 {
                grad.scaled_add(r, score);
            }
        }
        grad
    }
}

impl Curvature for GaussianMixture {
    fn potential_hessian(&self, x: ArrayView1<f64>) -> Array2<f64> {
        let (logs, scores, lse) = self.evaluate(x);
        let mut hess = Array2::zeros((self.dim, self.dim));
        let mut grad = Array1::<f64>::zeros(self.dim);
        for ((l, score), comp) in logs.iter().zip(&scores).zip(&self.components) {
            let r = (l - lse).exp();
            if r == 0.0 {
                continue;
            }
            grad.scaled_add(r, score);
            Zip::indexed(&mut hess).for_each(|(i, j), h| {
                *h += r * (comp.precision[[i, j]] - score[i] * score[j]);
            });
        }
        Zip::indexed(&mut hess).for_each(|(i, j), h| *h += grad[i] * grad[j]);
        hess
    }
}
