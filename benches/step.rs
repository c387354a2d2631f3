use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::{arr1, Array1, Array2};
use prox_langevin::algorithm::{Algorithm, AlgorithmConfig, SubSolverConfig};
use prox_langevin::distributions::{Composite, GaussianMixture};
use prox_langevin::imaging::{flatten, synthesize_observation, BlurLikelihood, ImagingPosterior};
use prox_langevin::langevin::StepStrategy;
use prox_langevin::noise::NoiseSource;
use prox_langevin::operators::{Convolution2D, LinearOperator, TotalVariation};
use prox_langevin::primal_dual::{PrimalDualConfig, PrimalDualLangevin, PrimalUpdate};
use prox_langevin::prox::LaplacePrior;

type Mixture = Composite<GaussianMixture, LaplacePrior>;

fn mixture() -> Mixture {
    Composite::new(
        GaussianMixture::benchmark(5).unwrap(),
        LaplacePrior::centered(0.5, 2).unwrap(),
    )
    .unwrap()
}

fn bench_mixture_steps(c: &mut Criterion) {
    let target = mixture();
    let algorithms = [
        Algorithm::Ula,
        Algorithm::Mala,
        Algorithm::Ihpula {
            eigenvalue_floor: 0.1,
            refresh_interval: 1,
        },
        Algorithm::Myula { smoothing: 0.1 },
        Algorithm::Fbula { smoothing: 0.1 },
        Algorithm::Ppula {
            preconditioner: Array2::eye(2),
            prox_metric: Array2::eye(2) * 2.0,
            smoothing: 0.1,
            solver: SubSolverConfig::new(100, 1e-10).unwrap(),
        },
        Algorithm::Lbmumla {
            smoothing: 0.1,
            mirror_scale: arr1(&[2.0, 2.0]),
            prior_scale: arr1(&[1.0, 1.0]),
        },
    ];
    for algorithm in algorithms {
        let name = algorithm.name();
        let mut strategy = AlgorithmConfig::new(algorithm, 0.01).build::<Mixture>(2).unwrap();
        let mut noise = NoiseSource::new(42);
        let mut state = arr1(&[0.5, -0.5]);
        strategy.reset(state.view(), &target);
        c.bench_function(&format!("{name} step, 5-component mixture"), |b| {
            b.iter(|| strategy.step(black_box(&mut state), &target, &mut noise))
        });
    }
}

fn bench_imaging(c: &mut Criterion) {
    let (rows, cols) = (64, 64);
    let truth = Array2::from_shape_fn((rows, cols), |(r, col)| ((r / 16 + col / 16) % 2) as f64);
    let blur = Convolution2D::uniform(rows, cols, 7).unwrap();
    let observed = synthesize_observation(&truth, &blur, 0.01, 1).unwrap();

    c.bench_function("convolution forward 64x64", |b| {
        let x = flatten(&truth);
        b.iter(|| blur.forward(black_box(x.view())))
    });

    let likelihood = BlurLikelihood::new(blur, flatten(&observed), 0.01).unwrap();
    let solver = SubSolverConfig::new(50, 1e-6).unwrap();
    let tv = TotalVariation::new(rows, cols, 20.0, true, solver).unwrap();
    let posterior = ImagingPosterior::new(likelihood, tv).unwrap();
    let config = PrimalDualConfig::new(1e-3, 100.0, 1.0, PrimalUpdate::Proximal).unwrap();
    let mut ulpda = PrimalDualLangevin::new(config, &posterior).unwrap();
    let mut noise = NoiseSource::new(7);
    let mut state: Array1<f64> = posterior.likelihood().observed().clone();
    c.bench_function("ULPDA step 64x64", |b| {
        b.iter(|| ulpda.step(black_box(&mut state), &posterior, &mut noise))
    });
}

criterion_group!(benches, bench_mixture_steps, bench_imaging);
criterion_main!(benches);
