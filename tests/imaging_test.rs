//! Deconvolution end to end: stability checking, posterior sampling and MAP references
//! on a small synthetic image, under convex and nonconvex TV priors.

use ndarray::Array2;
use prox_langevin::algorithm::SubSolverConfig;
use prox_langevin::distributions::SmoothPotential;
use prox_langevin::imaging::{
    flatten, mse, run_deconvolution, synthesize_observation, BlurLikelihood, DeconvolutionConfig,
    ImagingPosterior, ImagingSampler, MapSolver, NonconvexTv, TvCorrection,
};
use prox_langevin::operators::{Convolution2D, TotalVariation};
use prox_langevin::optimize::{ForwardBackward, PrimalDualSolver};
use prox_langevin::primal_dual::{PrimalDualConfig, PrimalUpdate};
use prox_langevin::LangevinError;

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: usize = 16;
    const NOISE_STD: f64 = 0.02;

    fn square() -> Array2<f64> {
        Array2::from_shape_fn((SIZE, SIZE), |(r, c)| {
            if (4..12).contains(&r) && (4..12).contains(&c) {
                1.0
            } else {
                0.0
            }
        })
    }

    fn setup() -> (Array2<f64>, Array2<f64>, ImagingPosterior) {
        let truth = square();
        let blur = Convolution2D::uniform(SIZE, SIZE, 5).unwrap();
        let observed = synthesize_observation(&truth, &blur, NOISE_STD, 11).unwrap();
        let likelihood = BlurLikelihood::new(blur, flatten(&observed), NOISE_STD).unwrap();
        let solver = SubSolverConfig::new(30, 1e-5).unwrap();
        let tv = TotalVariation::new(SIZE, SIZE, 20.0, true, solver).unwrap();
        let posterior = ImagingPosterior::new(likelihood, tv).unwrap();
        (truth, observed, posterior)
    }

    fn primal_dual() -> PrimalDualConfig {
        PrimalDualConfig::new(1e-3, 100.0, 1.0, PrimalUpdate::Proximal).unwrap()
    }

    #[test]
    fn unstable_primal_dual_steps_fail_before_sampling() {
        let (_, _, posterior) = setup();
        let config = DeconvolutionConfig {
            sampler: ImagingSampler::PrimalDual(
                PrimalDualConfig::new(0.1, 2.0, 1.0, PrimalUpdate::Gradient).unwrap(),
            ),
            iterations: 10,
            burn_in: 0,
            seed: 1,
            map: None,
        };
        assert!(matches!(
            run_deconvolution(&posterior, &config),
            Err(LangevinError::InvalidAlgorithmConfiguration { .. })
        ));
    }

    #[test]
    fn zero_averaged_iterations_are_rejected() {
        let (_, _, posterior) = setup();
        let config = DeconvolutionConfig {
            sampler: ImagingSampler::PrimalDual(primal_dual()),
            iterations: 0,
            burn_in: 10,
            seed: 1,
            map: None,
        };
        assert!(run_deconvolution(&posterior, &config).is_err());
    }

    #[test]
    fn primal_dual_posterior_mean_and_map_improve_on_the_observation() {
        let (truth, observed, posterior) = setup();
        let config = DeconvolutionConfig {
            sampler: ImagingSampler::PrimalDual(primal_dual()),
            iterations: 1_500,
            burn_in: 500,
            seed: 5,
            map: Some(MapSolver::PrimalDual(PrimalDualSolver::new(primal_dual(), 2_000).unwrap())),
        };
        let result = run_deconvolution(&posterior, &config).unwrap();

        assert_eq!(result.summary.algorithm, "ULPDA");
        assert_eq!(result.summary.iterations, 2_000);
        assert_eq!(result.posterior_mean.dim(), (SIZE, SIZE));
        assert!(result.posterior_mean.iter().all(|v| v.is_finite()));
        assert!(result.posterior_variance.iter().all(|&v| v >= 0.0));

        let baseline = mse(&truth, &observed).unwrap();
        let mean_error = mse(&truth, &result.posterior_mean).unwrap();
        let map = result.map.unwrap();
        let map_error = mse(&truth, &map.image).unwrap();
        assert!(mean_error < baseline, "posterior mean {mean_error} vs observation {baseline}");
        assert!(map_error < baseline, "MAP {map_error} vs observation {baseline}");
        assert_eq!(map.objective.len(), 2_000);
    }

    #[test]
    fn moreau_yosida_run_with_forward_backward_map() {
        let (_, _, posterior) = setup();
        let smoothing = 1e-3;
        let step_size = posterior.moreau_yosida_step_bound(smoothing);
        let lipschitz = posterior.likelihood().lipschitz_constant();
        let config = DeconvolutionConfig {
            sampler: ImagingSampler::MoreauYosida { step_size, smoothing },
            iterations: 50,
            burn_in: 10,
            seed: 2,
            map: Some(MapSolver::ForwardBackward(
                ForwardBackward::new(1.0 / lipschitz, 20, true).unwrap(),
            )),
        };
        let result = run_deconvolution(&posterior, &config).unwrap();
        assert_eq!(result.summary.algorithm, "MYULA");
        assert_eq!(result.summary.iterations, 60);
        assert!(result.posterior_mean.iter().all(|v| v.is_finite()));

        let map = result.map.unwrap();
        let first = map.objective[0];
        let last = *map.objective.last().unwrap();
        assert!(last <= first, "objective went from {first} to {last}");
        assert_eq!(posterior.dim(), SIZE * SIZE);
    }

    fn nonconvex(correction: TvCorrection, gamma: f64) -> ImagingPosterior {
        let (_, _, convex) = setup();
        let solver = SubSolverConfig::new(30, 1e-8).unwrap();
        let correction = NonconvexTv::new(correction, gamma, solver).unwrap();
        ImagingPosterior::nonconvex(
            convex.likelihood().clone(),
            convex.prior().clone(),
            correction,
        )
        .unwrap()
    }

    #[test]
    fn moreau_corrected_tv_posterior_mean_improves_on_the_observation() {
        let (truth, observed, _) = setup();
        // unit-height edges exceed τγ = 0.4, so they are penalised at a flat rate
        let posterior = nonconvex(TvCorrection::MoreauCorrected, 0.02);
        let config = DeconvolutionConfig {
            sampler: ImagingSampler::PrimalDual(primal_dual()),
            iterations: 1_500,
            burn_in: 500,
            seed: 5,
            map: None,
        };
        let result = run_deconvolution(&posterior, &config).unwrap();
        assert_eq!(result.summary.algorithm, "ULPDA");
        assert!(result.posterior_mean.iter().all(|v| v.is_finite()));
        let baseline = mse(&truth, &observed).unwrap();
        let mean_error = mse(&truth, &result.posterior_mean).unwrap();
        assert!(mean_error < baseline, "posterior mean {mean_error} vs observation {baseline}");
    }

    #[test]
    fn moreau_envelope_tv_runs_with_myula() {
        let posterior = nonconvex(TvCorrection::MoreauEnvelope, 0.5);
        assert_eq!(posterior.prior_name(), "ME-TV");
        let smoothing = 1e-3;
        let step_size = posterior.moreau_yosida_step_bound(smoothing);
        let (_, _, convex) = setup();
        assert!(step_size < convex.moreau_yosida_step_bound(smoothing));
        let config = DeconvolutionConfig {
            sampler: ImagingSampler::MoreauYosida { step_size, smoothing },
            iterations: 50,
            burn_in: 10,
            seed: 4,
            map: None,
        };
        let result = run_deconvolution(&posterior, &config).unwrap();
        assert_eq!(result.summary.algorithm, "MYULA");
        assert!(result.posterior_mean.iter().all(|v| v.is_finite()));
    }
}
