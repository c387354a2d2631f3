/*!
The chain driver: runs a [`StepStrategy`] against a target for a fixed iteration budget.

A chain moves through `Initialized → Running → Completed`, or ends in `Diverged` when a
step produces a non-finite state. Terminal chains refuse further iterations. Many
independent chains can be run in parallel with [`run_chains`]; each owns its state,
strategy and noise, and they share the target by reference.

# Examples

```rust
use prox_langevin::core::{ChainDriver, ChainStatus, RunConfig};
use prox_langevin::distributions::GaussianMixture;
use prox_langevin::langevin::UnadjustedLangevin;
use prox_langevin::stats::RecordMode;
use ndarray::arr1;

let target = GaussianMixture::isotropic(vec![arr1(&[1.0, -1.0])], 1.0).unwrap();
let config = RunConfig::new(2_000, 42, RecordMode::Trajectory).unwrap();
let ula = UnadjustedLangevin::new(0.1).unwrap();
let mut chain = ChainDriver::new(&target, ula, arr1(&[0.0, 0.0]), &config).unwrap();
let summary = chain.run().unwrap();

assert_eq!(chain.status(), &ChainStatus::Completed);
assert_eq!(chain.record().trajectory().unwrap().nrows(), 2_000);
assert_eq!(summary.algorithm, "ULA");
assert!(chain.step().is_err());
```
*/

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::Array1;
use rayon::prelude::*;

use crate::distributions::SmoothPotential;
use crate::error::{LangevinError, Result};
use crate::langevin::{StepStrategy, Transition};
use crate::noise::NoiseSource;
use crate::stats::{ChainRecord, RunSummary};

pub use crate::stats::RecordMode;

/// Lifecycle of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Initialized,
    Running,
    Completed,
    /// Iteration `iteration` (0-based) produced a non-finite state.
    Diverged { iteration: usize },
}

impl ChainStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainStatus::Completed | ChainStatus::Diverged { .. })
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStatus::Initialized => write!(f, "initialized"),
            ChainStatus::Running => write!(f, "running"),
            ChainStatus::Completed => write!(f, "completed"),
            ChainStatus::Diverged { iteration } => write!(f, "diverged at iteration {iteration}"),
        }
    }
}

/// Iteration budget, seed and recording mode of one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub iterations: usize,
    pub seed: u64,
    pub record: RecordMode,
}

impl RunConfig {
    pub fn new(iterations: usize, seed: u64, record: RecordMode) -> Result<Self> {
        let config = Self {
            iterations,
            seed,
            record,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(LangevinError::algorithm(
                "iteration budget must be a positive integer",
            ));
        }
        Ok(())
    }

    /// Same budget and mode with the seed shifted by `offset`, for the `i`-th of several
    /// independent chains.
    pub fn with_seed_offset(&self, offset: u64) -> Self {
        Self {
            seed: self.seed.wrapping_add(offset),
            ..*self
        }
    }
}

/// Owns the state of one chain and advances it with strategy `S` on target `T`.
pub struct ChainDriver<'a, T: ?Sized, S> {
    target: &'a T,
    strategy: S,
    state: Array1<f64>,
    noise: NoiseSource,
    record: ChainRecord,
    iterations: usize,
    completed: usize,
    status: ChainStatus,
}

impl<'a, T, S> ChainDriver<'a, T, S>
where
    T: SmoothPotential + ?Sized,
    S: StepStrategy<T>,
{
    /// Validates `config`, the initial state and the strategy against `target`, then
    /// seeds the noise source. No iteration runs here.
    pub fn new(
        target: &'a T,
        mut strategy: S,
        initial_state: Array1<f64>,
        config: &RunConfig,
    ) -> Result<Self> {
        config.validate()?;
        let dim = target.dim();
        if initial_state.len() != dim {
            return Err(LangevinError::algorithm(format!(
                "initial state has dimension {}, target has dimension {dim}",
                initial_state.len()
            )));
        }
        if initial_state.iter().any(|v| !v.is_finite()) {
            return Err(LangevinError::algorithm("initial state must be finite"));
        }
        strategy.validate(target, dim)?;
        strategy.reset(initial_state.view(), target);

        log::debug!(
            "initialized {} chain: dimension {dim}, {} iterations, seed {}",
            strategy.name(),
            config.iterations,
            config.seed
        );
        Ok(Self {
            target,
            strategy,
            state: initial_state,
            noise: NoiseSource::new(config.seed),
            record: ChainRecord::new(config.record, config.iterations, dim),
            iterations: config.iterations,
            completed: 0,
            status: ChainStatus::Initialized,
        })
    }

    fn ensure_active(&self) -> Result<()> {
        if self.status.is_terminal() {
            Err(LangevinError::ChainTerminated {
                status: self.status,
            })
        } else {
            Ok(())
        }
    }

    /// Runs exactly one iteration.
    pub fn step(&mut self) -> Result<Transition> {
        self.ensure_active()?;
        self.status = ChainStatus::Running;

        let transition = self.strategy.step(&mut self.state, self.target, &mut self.noise);
        if self.state.iter().any(|v| !v.is_finite()) {
            let iteration = self.completed;
            self.status = ChainStatus::Diverged { iteration };
            log::warn!(
                "{} diverged at iteration {iteration}; keeping {} recorded states",
                self.strategy.name(),
                self.record.len()
            );
            return Err(LangevinError::NumericalDivergence {
                algorithm: self.strategy.name().to_string(),
                iteration,
            });
        }

        self.record.push(self.state.view(), transition);
        self.completed += 1;
        if self.completed == self.iterations {
            self.status = ChainStatus::Completed;
            log::info!("chain complete: {}", self.summary());
        }
        Ok(transition)
    }

    /// Runs the remaining budget.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.ensure_active()?;
        while self.completed < self.iterations {
            self.step()?;
        }
        Ok(self.summary())
    }

    /// Runs the remaining budget while advancing `pb`, whose message shows the running
    /// acceptance rate for adjusted strategies.
    pub fn run_with_progress(&mut self, pb: &ProgressBar) -> Result<RunSummary> {
        self.ensure_active()?;
        pb.set_length(self.iterations as u64);
        pb.set_position(self.completed as u64);
        while self.completed < self.iterations {
            if let Err(e) = self.step() {
                pb.abandon_with_message(format!("{}", self.status));
                return Err(e);
            }
            pb.inc(1);
            if self.completed % 100 == 0 {
                if let Some(rate) = self.record.acceptance_rate() {
                    pb.set_message(format!("p(accept)≈{rate:.2}"));
                }
            }
        }
        pb.finish_with_message("Done!");
        Ok(self.summary())
    }

    /// Runs the remaining budget unless `cancel` is raised, checking it between
    /// iterations. Returns `Ok(None)` when cancelled; the chain may be resumed later.
    pub fn run_until(&mut self, cancel: &AtomicBool) -> Result<Option<RunSummary>> {
        self.ensure_active()?;
        while self.completed < self.iterations {
            if cancel.load(Ordering::Relaxed) {
                log::debug!(
                    "{} chain cancelled after {} of {} iterations",
                    self.strategy.name(),
                    self.completed,
                    self.iterations
                );
                return Ok(None);
            }
            self.step()?;
        }
        Ok(Some(self.summary()))
    }

    pub fn summary(&self) -> RunSummary {
        self.record.summary(self.strategy.name())
    }
}

impl<'a, T: ?Sized, S> ChainDriver<'a, T, S> {
    pub fn status(&self) -> &ChainStatus {
        &self.status
    }

    /// The current state. After a divergence it holds the offending non-finite values.
    pub fn state(&self) -> &Array1<f64> {
        &self.state
    }

    pub fn record(&self) -> &ChainRecord {
        &self.record
    }

    pub fn into_record(self) -> ChainRecord {
        self.record
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn completed_iterations(&self) -> usize {
        self.completed
    }

    pub fn remaining_iterations(&self) -> usize {
        self.iterations - self.completed
    }
}

/// Runs every driver to completion in parallel.
pub fn run_chains<T, S>(drivers: &mut [ChainDriver<'_, T, S>]) -> Vec<Result<RunSummary>>
where
    T: SmoothPotential + Sync + ?Sized,
    S: StepStrategy<T>,
{
    drivers.par_iter_mut().map(|driver| driver.run()).collect()
}

/// [`run_chains`] with one progress bar per chain.
pub fn run_chains_with_progress<T, S>(
    drivers: &mut [ChainDriver<'_, T, S>],
) -> Vec<Result<RunSummary>>
where
    T: SmoothPotential + Sync + ?Sized,
    S: StepStrategy<T>,
{
    let multi = MultiProgress::new();
    let pb_style = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

    drivers
        .par_iter_mut()
        .enumerate()
        .map(|(i, driver)| {
            let pb = multi.add(ProgressBar::new(driver.iterations as u64));
            pb.set_prefix(format!("{} {i}", driver.strategy.name()));
            pb.set_style(pb_style.clone());
            driver.run_with_progress(&pb)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::GaussianMixture;
    use crate::langevin::{MetropolisAdjustedLangevin, UnadjustedLangevin};
    use crate::distributions::Composite;
    use crate::prox::Unregularized;
    use ndarray::arr1;

    fn gaussian() -> GaussianMixture {
        GaussianMixture::isotropic(vec![arr1(&[0.5, -0.5])], 1.0).unwrap()
    }

    fn config(iterations: usize, seed: u64) -> RunConfig {
        RunConfig::new(iterations, seed, RecordMode::Trajectory).unwrap()
    }

    #[test]
    fn rejects_bad_budget_and_initial_state() {
        assert!(RunConfig::new(0, 1, RecordMode::Moments).is_err());
        let target = gaussian();
        let ula = || UnadjustedLangevin::new(0.1).unwrap();
        assert!(ChainDriver::new(&target, ula(), arr1(&[0.0]), &config(10, 0)).is_err());
        assert!(ChainDriver::new(&target, ula(), arr1(&[f64::NAN, 0.0]), &config(10, 0)).is_err());
    }

    #[test]
    fn same_seed_reproduces_the_chain() {
        let target = gaussian();
        let mut a = ChainDriver::new(
            &target,
            UnadjustedLangevin::new(0.1).unwrap(),
            arr1(&[0.0, 0.0]),
            &config(100, 9),
        )
        .unwrap();
        let mut b = ChainDriver::new(
            &target,
            UnadjustedLangevin::new(0.1).unwrap(),
            arr1(&[0.0, 0.0]),
            &config(100, 9),
        )
        .unwrap();
        a.run().unwrap();
        b.run().unwrap();
        assert_eq!(a.record().trajectory(), b.record().trajectory());
    }

    #[test]
    fn lifecycle_moves_to_completed_and_stays_there() {
        let target = gaussian();
        let mut chain = ChainDriver::new(
            &target,
            UnadjustedLangevin::new(0.1).unwrap(),
            arr1(&[0.0, 0.0]),
            &config(3, 1),
        )
        .unwrap();
        assert_eq!(chain.status(), &ChainStatus::Initialized);
        chain.step().unwrap();
        assert_eq!(chain.status(), &ChainStatus::Running);
        chain.run().unwrap();
        assert_eq!(chain.status(), &ChainStatus::Completed);
        assert!(matches!(
            chain.run(),
            Err(LangevinError::ChainTerminated {
                status: ChainStatus::Completed
            })
        ));
        assert_eq!(chain.record().len(), 3);
    }

    #[test]
    fn cancellation_leaves_a_resumable_chain() {
        let target = gaussian();
        let mut chain = ChainDriver::new(
            &target,
            UnadjustedLangevin::new(0.1).unwrap(),
            arr1(&[0.0, 0.0]),
            &config(50, 1),
        )
        .unwrap();
        for _ in 0..10 {
            chain.step().unwrap();
        }
        let cancel = AtomicBool::new(true);
        assert_eq!(chain.run_until(&cancel).unwrap(), None);
        assert_eq!(chain.record().len(), 10);
        assert_eq!(chain.remaining_iterations(), 40);
        cancel.store(false, Ordering::Relaxed);
        let summary = chain.run_until(&cancel).unwrap().unwrap();
        assert_eq!(summary.iterations, 50);
    }

    #[test]
    fn parallel_chains_with_offset_seeds_differ() {
        let target = Composite::new(gaussian(), Unregularized).unwrap();
        let base = config(200, 5);
        let mut drivers: Vec<_> = (0..4)
            .map(|i| {
                ChainDriver::new(
                    &target,
                    MetropolisAdjustedLangevin::new(0.5).unwrap(),
                    arr1(&[0.0, 0.0]),
                    &base.with_seed_offset(i),
                )
                .unwrap()
            })
            .collect();
        let summaries = run_chains(&mut drivers);
        assert!(summaries.iter().all(|s| s.is_ok()));
        let rates: Vec<f64> = summaries
            .into_iter()
            .map(|s| s.unwrap().acceptance_rate.unwrap())
            .collect();
        assert!(rates.iter().all(|&r| r > 0.0 && r < 1.0));
        assert_ne!(drivers[0].state(), drivers[1].state());
    }
}
