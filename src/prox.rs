//! Closed-form proximal operators.
//!
//! Everything here implements [`Proximal`]: the Laplace prior used by the mixture
//! experiments, a catalogue of separable scalar penalties, mixed norms on stacked
//! operator outputs, and the trivial zero term. The iterative total-variation prox lives
//! with the gradient operator in [`crate::operators`].

use ndarray::{Array1, ArrayView1, Zip};

use crate::distributions::{BregmanProximal, Proximal};
use crate::error::{ensure_positive_parameter, LangevinError, Result};

/// `sign(x) · max(|x| − threshold, 0)`.
pub fn soft_threshold(x: f64, threshold: f64) -> f64 {
    x.signum() * (x.abs() - threshold).max(0.0)
}

/// `prox_{step·h*}(v) = v − step · prox_{h/step}(v / step)` by the Moreau identity.
pub fn prox_conjugate<P: Proximal + ?Sized>(
    term: &P,
    v: ArrayView1<f64>,
    step: f64,
) -> Array1<f64> {
    let scaled = &v / step;
    let inner = term.prox_nonsmooth(scaled.view(), 1.0 / step);
    &v - &(inner * step)
}

/// Left Bregman prox of `step·|u|` under `φ(u) = u asinh(u/β) − √(u² + β²)`.
pub fn hyperbolic_l1_left_prox(x: f64, beta: f64, step: f64) -> f64 {
    let bound = beta * step.sinh();
    if x > bound {
        beta * ((x / beta).asinh() - step).sinh()
    } else if x < -bound {
        beta * ((x / beta).asinh() + step).sinh()
    } else {
        0.0
    }
}

/// The zero term: identity prox, zero value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Unregularized;

impl Proximal for Unregularized {
    fn nonsmooth_value(&self, _x: ArrayView1<f64>) -> f64 {
        0.0
    }

    fn prox_nonsmooth(&self, x: ArrayView1<f64>, _step: f64) -> Array1<f64> {
        x.to_owned()
    }
}

impl BregmanProximal for Unregularized {
    fn left_bregman_prox(
        &self,
        x: ArrayView1<f64>,
        _scale: ArrayView1<f64>,
        _step: f64,
    ) -> Array1<f64> {
        x.to_owned()
    }
}

/// Laplace prior `U₂(x) = rate · ‖x − location‖₁`.
#[derive(Debug, Clone, PartialEq)]
pub struct LaplacePrior {
    rate: f64,
    location: Array1<f64>,
}

impl LaplacePrior {
    pub fn new(rate: f64, location: Array1<f64>) -> Result<Self> {
        ensure_positive_parameter("Laplace rate", rate)?;
        if location.is_empty() || location.iter().any(|v| !v.is_finite()) {
            return Err(LangevinError::model(
                "Laplace location must be a non-empty finite vector",
            ));
        }
        Ok(Self { rate, location })
    }

    /// Prior centred at the origin.
    pub fn centered(rate: f64, dim: usize) -> Result<Self> {
        Self::new(rate, Array1::zeros(dim))
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn location(&self) -> &Array1<f64> {
        &self.location
    }
}

impl Proximal for LaplacePrior {
    fn nonsmooth_value(&self, x: ArrayView1<f64>) -> f64 {
        self.rate
            * Zip::from(&x)
                .and(&self.location)
                .fold(0.0, |acc, &xi, &mi| acc + (xi - mi).abs())
    }

    fn prox_nonsmooth(&self, x: ArrayView1<f64>, step: f64) -> Array1<f64> {
        let threshold = step * self.rate;
        Zip::from(&x)
            .and(&self.location)
            .map_collect(|&xi, &mi| mi + soft_threshold(xi - mi, threshold))
    }

    fn nonsmooth_dim(&self) -> Option<usize> {
        Some(self.location.len())
    }
}

impl BregmanProximal for LaplacePrior {
    /// Applied to the deviation from `location`, with threshold `step · rate`.
    fn left_bregman_prox(
        &self,
        x: ArrayView1<f64>,
        scale: ArrayView1<f64>,
        step: f64,
    ) -> Array1<f64> {
        let threshold = step * self.rate;
        Zip::from(&x)
            .and(&self.location)
            .and(&scale)
            .map_collect(|&xi, &mi, &bi| mi + hyperbolic_l1_left_prox(xi - mi, bi, threshold))
    }
}

/// Scalar penalties `h(u)`: negative log-densities of common one-dimensional priors.
///
/// Most have a closed-form `prox_{γh}`. Weibull, generalized inverse Gaussian and
/// Pearson type I are solved by bisection on the monotone optimality condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarPenalty {
    /// `|u|`.
    Laplace,
    /// `u²`.
    Gaussian,
    /// `|u|^p` for `p ∈ {4/3, 3/2, 3, 4}`.
    GeneralizedGaussian { p: f64 },
    /// `τu²` for `|u| ≤ 1/√(2τ)`, `√(2τ)|u| − 1/2` beyond.
    Huber { tau: f64 },
    /// Indicator of `[−ω, ω]`.
    Uniform { omega: f64 },
    /// `ω|u| + τu² + κ|u|^p`, with `p` as for the generalized Gaussian.
    MaximumEntropy { omega: f64, tau: f64, kappa: f64, p: f64 },
    /// `|u| − ln(1 + |u|)`.
    SmoothedLaplace,
    /// `ωu` on `u ≥ 0`.
    Exponential { omega: f64 },
    /// `ωu − κ ln u` on `u > 0`.
    Gamma { omega: f64, kappa: f64 },
    /// `u²/2 − κ ln u` on `u > 0`.
    Chi { kappa: f64 },
    /// `−ln(1 − u/lower)` on `(lower, 0]` and `−ln(1 − u/upper)` on `(0, upper)`,
    /// for `lower < 0 < upper`.
    Triangular { lower: f64, upper: f64 },
    /// `ωu^p − κ ln u` on `u > 0`, `p ≥ 1`.
    Weibull { omega: f64, kappa: f64, p: f64 },
    /// `ωu − κ ln u + ρ/u` on `u > 0`.
    GeneralizedInverseGaussian { omega: f64, kappa: f64, rho: f64 },
    /// `−κ₁ ln(u − lower) − κ₂ ln(upper − u)` on `(lower, upper)`.
    PearsonI { kappa1: f64, kappa2: f64, lower: f64, upper: f64 },
}

const GG_EXPONENTS: [f64; 4] = [4.0 / 3.0, 1.5, 3.0, 4.0];

fn check_exponent(p: f64) -> Result<()> {
    if GG_EXPONENTS.iter().any(|&q| (q - p).abs() < 1e-12) {
        Ok(())
    } else {
        Err(LangevinError::model(format!(
            "generalized Gaussian prox has closed forms only for p in {{4/3, 3/2, 3, 4}}, got {p}"
        )))
    }
}

/// `−ln u` on `u > 0`, `+∞` elsewhere.
fn neg_log(u: f64) -> f64 {
    if u > 0.0 {
        -u.ln()
    } else {
        f64::INFINITY
    }
}

impl ScalarPenalty {
    fn validate(&self) -> Result<()> {
        match *self {
            ScalarPenalty::GeneralizedGaussian { p } => check_exponent(p),
            ScalarPenalty::Huber { tau } => ensure_positive_parameter("Huber tau", tau),
            ScalarPenalty::Uniform { omega } => {
                ensure_positive_parameter("uniform half-width", omega)
            }
            ScalarPenalty::MaximumEntropy { omega, tau, kappa, p } => {
                ensure_positive_parameter("maximum-entropy omega", omega)?;
                ensure_positive_parameter("maximum-entropy tau", tau)?;
                ensure_positive_parameter("maximum-entropy kappa", kappa)?;
                check_exponent(p)
            }
            ScalarPenalty::Exponential { omega } => {
                ensure_positive_parameter("exponential rate", omega)
            }
            ScalarPenalty::Gamma { omega, kappa } => {
                ensure_positive_parameter("gamma omega", omega)?;
                ensure_positive_parameter("gamma kappa", kappa)
            }
            ScalarPenalty::Chi { kappa } => ensure_positive_parameter("chi kappa", kappa),
            ScalarPenalty::Triangular { lower, upper } => {
                ensure_positive_parameter("triangular upper end", upper)?;
                ensure_positive_parameter("triangular lower end (negated)", -lower)
            }
            ScalarPenalty::Weibull { omega, kappa, p } => {
                ensure_positive_parameter("Weibull omega", omega)?;
                ensure_positive_parameter("Weibull kappa", kappa)?;
                if p >= 1.0 && p.is_finite() {
                    Ok(())
                } else {
                    Err(LangevinError::model(format!(
                        "Weibull exponent must be at least 1, got {p}"
                    )))
                }
            }
            ScalarPenalty::GeneralizedInverseGaussian { omega, kappa, rho } => {
                ensure_positive_parameter("GIG omega", omega)?;
                ensure_positive_parameter("GIG kappa", kappa)?;
                ensure_positive_parameter("GIG rho", rho)
            }
            ScalarPenalty::PearsonI {
                kappa1,
                kappa2,
                lower,
                upper,
            } => {
                ensure_positive_parameter("Pearson kappa1", kappa1)?;
                ensure_positive_parameter("Pearson kappa2", kappa2)?;
                if lower.is_finite() && upper.is_finite() && lower < upper {
                    Ok(())
                } else {
                    Err(LangevinError::model(format!(
                        "Pearson support must be a bounded interval, got ({lower}, {upper})"
                    )))
                }
            }
            ScalarPenalty::Laplace | ScalarPenalty::Gaussian | ScalarPenalty::SmoothedLaplace => {
                Ok(())
            }
        }
    }

    pub fn value(&self, u: f64) -> f64 {
        match *self {
            ScalarPenalty::Laplace => u.abs(),
            ScalarPenalty::Gaussian => u * u,
            ScalarPenalty::GeneralizedGaussian { p } => u.abs().powf(p),
            ScalarPenalty::Huber { tau } => {
                let knee = 1.0 / (2.0 * tau).sqrt();
                if u.abs() <= knee {
                    tau * u * u
                } else {
                    (2.0 * tau).sqrt() * u.abs() - 0.5
                }
            }
            ScalarPenalty::Uniform { omega } => {
                if u.abs() <= omega {
                    0.0
                } else {
                    f64::INFINITY
                }
            }
            ScalarPenalty::MaximumEntropy { omega, tau, kappa, p } => {
                omega * u.abs() + tau * u * u + kappa * u.abs().powf(p)
            }
            ScalarPenalty::SmoothedLaplace => u.abs() - u.abs().ln_1p(),
            ScalarPenalty::Exponential { omega } => {
                if u >= 0.0 {
                    omega * u
                } else {
                    f64::INFINITY
                }
            }
            ScalarPenalty::Gamma { omega, kappa } => omega * u + kappa * neg_log(u),
            ScalarPenalty::Chi { kappa } => 0.5 * u * u + kappa * neg_log(u),
            ScalarPenalty::Triangular { lower, upper } => {
                if u <= 0.0 {
                    neg_log(1.0 - u / lower)
                } else {
                    neg_log(1.0 - u / upper)
                }
            }
            ScalarPenalty::Weibull { omega, kappa, p } => {
                let log = neg_log(u);
                if log.is_infinite() {
                    log
                } else {
                    omega * u.powf(p) + kappa * log
                }
            }
            ScalarPenalty::GeneralizedInverseGaussian { omega, kappa, rho } => {
                let log = neg_log(u);
                if log.is_infinite() {
                    log
                } else {
                    omega * u + kappa * log + rho / u
                }
            }
            ScalarPenalty::PearsonI {
                kappa1,
                kappa2,
                lower,
                upper,
            } => kappa1 * neg_log(u - lower) + kappa2 * neg_log(upper - u),
        }
    }

    /// `prox_{γh}(x)`; the identity for `γ = 0`.
    pub fn prox(&self, x: f64, gamma: f64) -> f64 {
        if gamma == 0.0 {
            return x;
        }
        match *self {
            ScalarPenalty::Laplace => soft_threshold(x, gamma),
            ScalarPenalty::Gaussian => x / (2.0 * gamma + 1.0),
            ScalarPenalty::GeneralizedGaussian { p } => generalized_gaussian_prox(x, gamma, p),
            ScalarPenalty::Huber { tau } => {
                let slope = (2.0 * tau).sqrt();
                let shrink = 1.0 + 2.0 * gamma * tau;
                if x.abs() <= shrink / slope {
                    x / shrink
                } else {
                    x - gamma * slope * x.signum()
                }
            }
            ScalarPenalty::Uniform { omega } => x.clamp(-omega, omega),
            ScalarPenalty::MaximumEntropy { omega, tau, kappa, p } => {
                let shrink = 1.0 + 2.0 * gamma * tau;
                let thresholded = (x.abs() - gamma * omega).max(0.0) / shrink;
                x.signum() * generalized_gaussian_prox(thresholded, gamma * kappa / shrink, p)
            }
            ScalarPenalty::SmoothedLaplace => {
                let a = x.abs();
                let b = a - gamma - 1.0;
                x.signum() * (b + (b * b + 4.0 * a).sqrt()) / 2.0
            }
            ScalarPenalty::Exponential { omega } => (x - gamma * omega).max(0.0),
            ScalarPenalty::Gamma { omega, kappa } => {
                let a = x - gamma * omega;
                (a + (a * a + 4.0 * gamma * kappa).sqrt()) / 2.0
            }
            ScalarPenalty::Chi { kappa } => {
                let c = 1.0 + gamma;
                (x + (x * x + 4.0 * c * gamma * kappa).sqrt()) / (2.0 * c)
            }
            ScalarPenalty::Triangular { lower, upper } => {
                if x < gamma / lower {
                    (x + lower + ((x - lower).powi(2) + 4.0 * gamma).sqrt()) / 2.0
                } else if x > gamma / upper {
                    (x + upper - ((x - upper).powi(2) + 4.0 * gamma).sqrt()) / 2.0
                } else {
                    0.0
                }
            }
            ScalarPenalty::Weibull { omega, kappa, p } => increasing_root(
                |u| gamma * (omega * p * u.powf(p - 1.0) - kappa / u) + u - x,
                0.0,
                f64::INFINITY,
            ),
            ScalarPenalty::GeneralizedInverseGaussian { omega, kappa, rho } => increasing_root(
                |u| gamma * (omega - kappa / u - rho / (u * u)) + u - x,
                0.0,
                f64::INFINITY,
            ),
            ScalarPenalty::PearsonI {
                kappa1,
                kappa2,
                lower,
                upper,
            } => increasing_root(
                |u| gamma * (kappa2 / (upper - u) - kappa1 / (u - lower)) + u - x,
                lower,
                upper,
            ),
        }
    }
}

/// Zero of a strictly increasing `g` on the open interval `(lo, hi)`, which `g` crosses
/// from below; `hi` may be `+∞`.
fn increasing_root(g: impl Fn(f64) -> f64, lo: f64, hi: f64) -> f64 {
    let mut lo = lo;
    let mut hi = hi;
    if hi.is_infinite() {
        hi = lo + 1.0;
        for _ in 0..1100 {
            if g(hi) >= 0.0 {
                break;
            }
            hi = lo + 2.0 * (hi - lo);
        }
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if g(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

fn generalized_gaussian_prox(x: f64, gamma: f64, p: f64) -> f64 {
    if (p - 4.0 / 3.0).abs() < 1e-12 {
        let xi = (x * x + 256.0 * gamma.powi(3) / 729.0).sqrt();
        x + 4.0 * gamma / (3.0 * 2.0_f64.cbrt()) * ((xi - x).cbrt() - (xi + x).cbrt())
    } else if (p - 1.5).abs() < 1e-12 {
        let g2 = gamma * gamma;
        x + 9.0 * g2 * x.signum() * (1.0 - (1.0 + 16.0 * x.abs() / (9.0 * g2)).sqrt()) / 8.0
    } else if (p - 3.0).abs() < 1e-12 {
        x.signum() * ((1.0 + 12.0 * gamma * x.abs()).sqrt() - 1.0) / (6.0 * gamma)
    } else {
        let xi = (x * x + 1.0 / (27.0 * gamma)).sqrt();
        ((xi + x) / (8.0 * gamma)).cbrt() - ((xi - x) / (8.0 * gamma)).cbrt()
    }
}

/// `weight · Σᵢ h(xᵢ)` for a scalar penalty `h`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeparablePrior {
    penalty: ScalarPenalty,
    weight: f64,
}

impl SeparablePrior {
    pub fn new(penalty: ScalarPenalty, weight: f64) -> Result<Self> {
        penalty.validate()?;
        ensure_positive_parameter("penalty weight", weight)?;
        Ok(Self { penalty, weight })
    }

    pub fn penalty(&self) -> ScalarPenalty {
        self.penalty
    }
}

impl Proximal for SeparablePrior {
    fn nonsmooth_value(&self, x: ArrayView1<f64>) -> f64 {
        let sum: f64 = x.iter().map(|&u| self.penalty.value(u)).sum();
        if sum.is_infinite() {
            sum
        } else {
            self.weight * sum
        }
    }

    fn prox_nonsmooth(&self, x: ArrayView1<f64>, step: f64) -> Array1<f64> {
        let gamma = step * self.weight;
        x.mapv(|u| self.penalty.prox(u, gamma))
    }
}

/// `weight · ‖z‖` on a vector of `groups` stacked blocks of equal length.
///
/// Isotropic: the sum over positions `i` of the Euclidean norm of
/// `(z[i], z[n + i], ..)` (an ℓ₂,₁ norm). Anisotropic: plain ℓ₁.
#[derive(Debug, Clone, PartialEq)]
pub struct MixedNorm {
    weight: f64,
    groups: usize,
    isotropic: bool,
}

impl MixedNorm {
    pub fn new(weight: f64, groups: usize, isotropic: bool) -> Result<Self> {
        ensure_positive_parameter("regularization weight", weight)?;
        if groups == 0 {
            return Err(LangevinError::model("mixed norm needs at least one group"));
        }
        Ok(Self {
            weight,
            groups,
            isotropic,
        })
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn is_isotropic(&self) -> bool {
        self.isotropic
    }

    /// Euclidean norm of each position's group.
    pub(crate) fn group_norms(&self, z: ArrayView1<f64>) -> Array1<f64> {
        let n = z.len() / self.groups;
        Array1::from_shape_fn(n, |i| {
            (0..self.groups)
                .map(|g| z[g * n + i].powi(2))
                .sum::<f64>()
                .sqrt()
        })
    }

    /// Projection onto the dual-norm ball of radius `weight`, the set whose indicator
    /// is the conjugate of this norm.
    pub fn project_dual_ball(&self, z: ArrayView1<f64>) -> Array1<f64> {
        let radius = self.weight;
        if !self.isotropic {
            return z.mapv(|v| v.clamp(-radius, radius));
        }
        let n = z.len() / self.groups;
        let scale = self
            .group_norms(z)
            .mapv(|norm| if norm > radius { radius / norm } else { 1.0 });
        Array1::from_shape_fn(z.len(), |k| z[k] * scale[k % n])
    }
}

impl Proximal for MixedNorm {
    fn nonsmooth_value(&self, z: ArrayView1<f64>) -> f64 {
        if self.isotropic {
            self.weight * self.group_norms(z).sum()
        } else {
            self.weight * z.iter().map(|v| v.abs()).sum::<f64>()
        }
    }

    fn prox_nonsmooth(&self, z: ArrayView1<f64>, step: f64) -> Array1<f64> {
        let threshold = step * self.weight;
        if !self.isotropic {
            return z.mapv(|v| soft_threshold(v, threshold));
        }
        let n = z.len() / self.groups;
        let shrink = self
            .group_norms(z)
            .mapv(|norm| if norm > threshold { 1.0 - threshold / norm } else { 0.0 });
        Array1::from_shape_fn(z.len(), |k| z[k] * shrink[k % n])
    }
}
