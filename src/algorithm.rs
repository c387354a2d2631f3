/*!
Explicit algorithm configuration and dispatch to step strategies.

An [`AlgorithmConfig`] names one of the mixture-experiment samplers together with all
of its parameters; nothing falls back to a process-wide default. [`AlgorithmConfig::build`]
validates the configuration and returns the matching boxed [`StepStrategy`].

# Examples

```rust
use prox_langevin::algorithm::{Algorithm, AlgorithmConfig};
use prox_langevin::distributions::{Composite, GaussianMixture};
use prox_langevin::prox::LaplacePrior;

type Target = Composite<GaussianMixture, LaplacePrior>;

let config = AlgorithmConfig::new(Algorithm::Myula { smoothing: 0.1 }, 0.05);
let strategy = config.build::<Target>(2).unwrap();
assert_eq!(strategy.name(), "MYULA");

let bad = AlgorithmConfig::new(Algorithm::Ula, 0.0);
assert!(bad.build::<Target>(2).is_err());
```
*/

use ndarray::{Array1, Array2};

use crate::distributions::{BregmanProximal, Curvature, Proximal};
use crate::error::{ensure_positive_step, LangevinError, Result};
use crate::langevin::{
    HessianPreconditionedLangevin, MetropolisAdjustedLangevin, StepStrategy, UnadjustedLangevin,
};
use crate::mirror::{BregmanMoreauLangevin, MirrorLangevin};
use crate::proximal::{ForwardBackwardLangevin, PreconditionedProximalLangevin, ProximalLangevin};

/// Iteration budget of an inner solver (metric prox, TV prox).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubSolverConfig {
    pub max_iterations: usize,
    /// Stop once successive iterates differ by at most this much in the sup norm.
    pub tolerance: f64,
}

impl SubSolverConfig {
    pub fn new(max_iterations: usize, tolerance: f64) -> Result<Self> {
        let config = Self {
            max_iterations,
            tolerance,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(LangevinError::algorithm(
                "sub-solver needs at least one iteration",
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(LangevinError::algorithm(format!(
                "sub-solver tolerance must be finite and nonnegative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// The samplers available for targets described by a smooth potential with curvature
/// and a (Bregman-)proximable nonsmooth term.
#[derive(Debug, Clone, PartialEq)]
pub enum Algorithm {
    Ula,
    Mala,
    Pula {
        preconditioner: Array2<f64>,
    },
    Ihpula {
        eigenvalue_floor: f64,
        refresh_interval: usize,
    },
    Mla {
        mirror_scale: Array1<f64>,
    },
    Pgld {
        prox_step: f64,
    },
    Myula {
        smoothing: f64,
    },
    Mymala {
        smoothing: f64,
    },
    Ppula {
        preconditioner: Array2<f64>,
        prox_metric: Array2<f64>,
        smoothing: f64,
        solver: SubSolverConfig,
    },
    Fbula {
        smoothing: f64,
    },
    Lbmumla {
        smoothing: f64,
        mirror_scale: Array1<f64>,
        prior_scale: Array1<f64>,
    },
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Ula => "ULA",
            Algorithm::Mala => "MALA",
            Algorithm::Pula { .. } => "PULA",
            Algorithm::Ihpula { .. } => "IHPULA",
            Algorithm::Mla { .. } => "MLA",
            Algorithm::Pgld { .. } => "PGLD",
            Algorithm::Myula { .. } => "MYULA",
            Algorithm::Mymala { .. } => "MYMALA",
            Algorithm::Ppula { .. } => "PPULA",
            Algorithm::Fbula { .. } => "FBULA",
            Algorithm::Lbmumla { .. } => "LBMUMLA",
        }
    }

    /// Whether the strategy carries a Metropolis correction.
    pub fn is_adjusted(&self) -> bool {
        matches!(self, Algorithm::Mala | Algorithm::Mymala { .. })
    }
}

/// An algorithm and its step size `γ`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmConfig {
    pub algorithm: Algorithm,
    pub step_size: f64,
}

impl AlgorithmConfig {
    pub fn new(algorithm: Algorithm, step_size: f64) -> Self {
        Self {
            algorithm,
            step_size,
        }
    }

    /// Checks the step size and the shapes of any matrices or scales against `dim`.
    pub fn validate(&self, dim: usize) -> Result<()> {
        ensure_positive_step(&format!("{} step size", self.algorithm.name()), self.step_size)?;
        let check_matrix = |what: &str, m: &Array2<f64>| {
            if m.dim() == (dim, dim) {
                Ok(())
            } else {
                Err(LangevinError::algorithm(format!(
                    "{what} must be {dim}x{dim}, got {:?}",
                    m.dim()
                )))
            }
        };
        let check_vector = |what: &str, v: &Array1<f64>| {
            if v.len() == dim {
                Ok(())
            } else {
                Err(LangevinError::algorithm(format!(
                    "{what} must have length {dim}, got {}",
                    v.len()
                )))
            }
        };
        match &self.algorithm {
            Algorithm::Pula { preconditioner } => check_matrix("preconditioner", preconditioner),
            Algorithm::Ppula {
                preconditioner,
                prox_metric,
                ..
            } => {
                check_matrix("preconditioner", preconditioner)?;
                check_matrix("prox metric", prox_metric)
            }
            Algorithm::Mla { mirror_scale } => check_vector("mirror scale", mirror_scale),
            Algorithm::Lbmumla {
                mirror_scale,
                prior_scale,
                ..
            } => {
                check_vector("mirror scale", mirror_scale)?;
                check_vector("prior scale", prior_scale)
            }
            _ => Ok(()),
        }
    }

    /// Validates the configuration for targets of dimension `dim` and builds its strategy.
    pub fn build<T>(&self, dim: usize) -> Result<Box<dyn StepStrategy<T>>>
    where
        T: Curvature + Proximal + BregmanProximal + ?Sized,
    {
        self.validate(dim)?;
        let gamma = self.step_size;
        let strategy: Box<dyn StepStrategy<T>> = match &self.algorithm {
            Algorithm::Ula => Box::new(UnadjustedLangevin::new(gamma)?),
            Algorithm::Mala => Box::new(MetropolisAdjustedLangevin::new(gamma)?),
            Algorithm::Pula { preconditioner } => {
                Box::new(UnadjustedLangevin::preconditioned(gamma, preconditioner.clone())?)
            }
            Algorithm::Ihpula {
                eigenvalue_floor,
                refresh_interval,
            } => Box::new(HessianPreconditionedLangevin::new(
                gamma,
                *eigenvalue_floor,
                *refresh_interval,
            )?),
            Algorithm::Mla { mirror_scale } => {
                Box::new(MirrorLangevin::new(gamma, mirror_scale.clone())?)
            }
            Algorithm::Pgld { prox_step } => {
                Box::new(ProximalLangevin::proximal_gradient(gamma, *prox_step)?)
            }
            Algorithm::Myula { smoothing } => {
                Box::new(ProximalLangevin::moreau_yosida(gamma, *smoothing)?)
            }
            Algorithm::Mymala { smoothing } => {
                Box::new(MetropolisAdjustedLangevin::moreau_yosida(gamma, *smoothing)?)
            }
            Algorithm::Ppula {
                preconditioner,
                prox_metric,
                smoothing,
                solver,
            } => Box::new(PreconditionedProximalLangevin::new(
                gamma,
                *smoothing,
                preconditioner.clone(),
                prox_metric.clone(),
                *solver,
            )?),
            Algorithm::Fbula { smoothing } => {
                Box::new(ForwardBackwardLangevin::new(gamma, *smoothing)?)
            }
            Algorithm::Lbmumla {
                smoothing,
                mirror_scale,
                prior_scale,
            } => Box::new(BregmanMoreauLangevin::new(
                gamma,
                *smoothing,
                mirror_scale.clone(),
                prior_scale.clone(),
            )?),
        };
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Composite, GaussianMixture};
    use crate::prox::LaplacePrior;
    use ndarray::arr1;

    type Target = Composite<GaussianMixture, LaplacePrior>;

    fn every_algorithm() -> Vec<Algorithm> {
        vec![
            Algorithm::Ula,
            Algorithm::Mala,
            Algorithm::Pula {
                preconditioner: Array2::eye(2) * 0.5,
            },
            Algorithm::Ihpula {
                eigenvalue_floor: 0.1,
                refresh_interval: 5,
            },
            Algorithm::Mla {
                mirror_scale: arr1(&[1.0, 1.0]),
            },
            Algorithm::Pgld { prox_step: 0.1 },
            Algorithm::Myula { smoothing: 0.1 },
            Algorithm::Mymala { smoothing: 0.1 },
            Algorithm::Ppula {
                preconditioner: Array2::eye(2),
                prox_metric: Array2::eye(2),
                smoothing: 0.1,
                solver: SubSolverConfig::new(50, 1e-8).unwrap(),
            },
            Algorithm::Fbula { smoothing: 0.1 },
            Algorithm::Lbmumla {
                smoothing: 0.1,
                mirror_scale: arr1(&[1.0, 1.0]),
                prior_scale: arr1(&[0.5, 0.5]),
            },
        ]
    }

    #[test]
    fn every_algorithm_builds_under_its_own_name() {
        for algorithm in every_algorithm() {
            let name = algorithm.name();
            let strategy = AlgorithmConfig::new(algorithm, 0.05).build::<Target>(2).unwrap();
            assert_eq!(strategy.name(), name);
        }
    }

    #[test]
    fn non_positive_step_is_rejected_for_every_algorithm() {
        for algorithm in every_algorithm() {
            for bad in [0.0, -0.1, f64::NAN] {
                let result = AlgorithmConfig::new(algorithm.clone(), bad).build::<Target>(2);
                assert!(matches!(
                    result,
                    Err(LangevinError::InvalidAlgorithmConfiguration { .. })
                ));
            }
        }
    }

    #[test]
    fn shapes_are_checked_against_dimension() {
        let config = AlgorithmConfig::new(
            Algorithm::Mla {
                mirror_scale: arr1(&[1.0, 1.0, 1.0]),
            },
            0.1,
        );
        assert!(config.build::<Target>(2).is_err());
        let config = AlgorithmConfig::new(
            Algorithm::Pula {
                preconditioner: Array2::eye(3),
            },
            0.1,
        );
        assert!(config.validate(2).is_err());
    }

    #[test]
    fn sub_solver_budget_is_validated() {
        assert!(SubSolverConfig::new(0, 1e-6).is_err());
        assert!(SubSolverConfig::new(10, -1.0).is_err());
        assert!(SubSolverConfig::new(10, 0.0).is_ok());
    }

    #[test]
    fn only_metropolis_variants_are_adjusted() {
        let adjusted: Vec<&str> = every_algorithm()
            .iter()
            .filter(|a| a.is_adjusted())
            .map(|a| a.name())
            .collect();
        assert_eq!(adjusted, vec!["MALA", "MYMALA"]);
    }
}
