//! Runs every mixture sampler on the five-component 2-D benchmark with a mild Laplace
//! prior, several chains each, and prints posterior means, acceptance rates and R-hat.

use ndarray::{arr1, Array2};
use prox_langevin::algorithm::{Algorithm, AlgorithmConfig, SubSolverConfig};
use prox_langevin::core::{run_chains_with_progress, ChainDriver, RunConfig};
use prox_langevin::distributions::{Composite, GaussianMixture};
use prox_langevin::noise::NoiseSource;
use prox_langevin::prox::LaplacePrior;
use prox_langevin::stats::{max_potential_scale_reduction, RecordMode, RunSummary};
use std::error::Error;

type Target = Composite<GaussianMixture, LaplacePrior>;

fn main() -> Result<(), Box<dyn Error>> {
    const ITERATIONS: usize = 20_000;
    const N_CHAINS: usize = 4;
    const SEED: u64 = 42;
    const STEP_SIZE: f64 = 0.01;

    let mixture = GaussianMixture::benchmark(5)?;
    let target: Target = Composite::new(mixture, LaplacePrior::centered(0.1, 2)?)?;

    let algorithms = vec![
        Algorithm::Ula,
        Algorithm::Mala,
        Algorithm::Pula {
            preconditioner: Array2::eye(2) * 0.5,
        },
        Algorithm::Ihpula {
            eigenvalue_floor: 0.2,
            refresh_interval: 10,
        },
        Algorithm::Mla {
            mirror_scale: arr1(&[3.0, 3.0]),
        },
        Algorithm::Pgld { prox_step: STEP_SIZE },
        Algorithm::Myula { smoothing: 0.05 },
        Algorithm::Mymala { smoothing: 0.05 },
        Algorithm::Ppula {
            preconditioner: Array2::eye(2),
            prox_metric: Array2::eye(2) * 2.0,
            smoothing: 0.05,
            solver: SubSolverConfig::new(200, 1e-10)?,
        },
        Algorithm::Fbula { smoothing: 0.05 },
        Algorithm::Lbmumla {
            smoothing: 0.05,
            mirror_scale: arr1(&[3.0, 3.0]),
            prior_scale: arr1(&[1.0, 1.0]),
        },
    ];

    let run = RunConfig::new(ITERATIONS, SEED, RecordMode::Trajectory)?;
    for algorithm in algorithms {
        let config = AlgorithmConfig::new(algorithm, STEP_SIZE);
        let mut drivers = Vec::with_capacity(N_CHAINS);
        for i in 0..N_CHAINS {
            let start = NoiseSource::new(SEED + 1000 + i as u64).standard_normal(2) * 3.0;
            let strategy = config.build::<Target>(2)?;
            drivers.push(ChainDriver::new(
                &target,
                strategy,
                start,
                &run.with_seed_offset(i as u64),
            )?);
        }

        let summaries: Vec<RunSummary> = run_chains_with_progress(&mut drivers)
            .into_iter()
            .collect::<Result<_, _>>()?;
        let refs: Vec<&RunSummary> = summaries.iter().collect();
        let rhat = max_potential_scale_reduction(&refs)?;
        for summary in &summaries {
            println!("{summary}");
        }
        println!("{}: max R-hat across {N_CHAINS} chains = {rhat:.3}\n", config.algorithm.name());
    }

    Ok(())
}
