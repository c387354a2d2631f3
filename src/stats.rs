//! Chain records, running moments and convergence diagnostics.

use std::fmt;

use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_stats::QuantileExt;

use crate::error::{LangevinError, Result};
use crate::langevin::Transition;

/// What a chain keeps of the states it visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Every state, as a `K × d` matrix.
    Trajectory,
    /// Only running first and second moments (memory-bounded, for imaging).
    Moments,
}

/// Running mean and mean of squares, per coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningMoments {
    n: u64,
    mean: Array1<f64>,
    mean_sq: Array1<f64>,
}

impl RunningMoments {
    pub fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(dim),
            mean_sq: Array1::zeros(dim),
        }
    }

    pub fn push(&mut self, x: ArrayView1<f64>) {
        self.n += 1;
        let n = self.n as f64;
        Zip::from(&mut self.mean)
            .and(&mut self.mean_sq)
            .and(&x)
            .for_each(|m, s, &v| {
                *m = (*m * (n - 1.0) + v) / n;
                *s = (*s * (n - 1.0) + v * v) / n;
            });
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// `E[x²]` per coordinate.
    pub fn second_moment(&self) -> &Array1<f64> {
        &self.mean_sq
    }

    /// Unbiased sample variance; zero until two states were pushed.
    pub fn variance(&self) -> Array1<f64> {
        if self.n < 2 {
            return Array1::zeros(self.mean.len());
        }
        let n = self.n as f64;
        ((&self.mean_sq - &self.mean.mapv(|m| m * m)) * n / (n - 1.0)).mapv(|v| v.max(0.0))
    }
}

/**
Everything a chain keeps from its iterations: the trajectory (in
[`RecordMode::Trajectory`]), running moments, and the acceptance counter of adjusted
strategies.

Only finite states are ever appended, so after a divergence at iteration `j` the record
holds exactly the `j` states of iterations `0..j`.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRecord {
    mode: RecordMode,
    trajectory: Option<Array2<f64>>,
    moments: RunningMoments,
    len: usize,
    accepted: usize,
    proposals: usize,
}

impl ChainRecord {
    /// Empty record for up to `capacity` states of dimension `dim`.
    pub fn new(mode: RecordMode, capacity: usize, dim: usize) -> Self {
        let trajectory = match mode {
            RecordMode::Trajectory => Some(Array2::zeros((capacity, dim))),
            RecordMode::Moments => None,
        };
        Self {
            mode,
            trajectory,
            moments: RunningMoments::new(dim),
            len: 0,
            accepted: 0,
            proposals: 0,
        }
    }

    pub(crate) fn push(&mut self, state: ArrayView1<f64>, transition: Transition) {
        if let Some(traj) = self.trajectory.as_mut() {
            if self.len == traj.nrows() {
                // grow by doubling when a resumed chain outlives its budget
                let mut grown = Array2::zeros((2 * self.len.max(1), traj.ncols()));
                grown.slice_mut(s![..self.len, ..]).assign(traj);
                *traj = grown;
            }
            traj.row_mut(self.len).assign(&state);
        }
        self.moments.push(state);
        self.len += 1;
        if let Some(accepted) = transition.accepted {
            self.proposals += 1;
            self.accepted += accepted as usize;
        }
    }

    pub fn mode(&self) -> RecordMode {
        self.mode
    }

    /// Number of recorded states.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The recorded states, one per row, when the full trajectory is kept.
    pub fn trajectory(&self) -> Option<ArrayView2<f64>> {
        self.trajectory
            .as_ref()
            .map(|t| t.slice(s![..self.len, ..]))
    }

    pub fn moments(&self) -> &RunningMoments {
        &self.moments
    }

    /// Number of accepted proposals (adjusted strategies only).
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Fraction of accepted proposals, `None` for unadjusted strategies.
    pub fn acceptance_rate(&self) -> Option<f64> {
        if self.proposals == 0 {
            None
        } else {
            Some(self.accepted as f64 / self.proposals as f64)
        }
    }

    pub fn summary(&self, algorithm: &str) -> RunSummary {
        RunSummary {
            algorithm: algorithm.to_string(),
            iterations: self.len,
            mean: self.moments.mean().clone(),
            second_moment: self.moments.second_moment().clone(),
            variance: self.moments.variance(),
            acceptance_rate: self.acceptance_rate(),
        }
    }
}

/// Summary statistics of a finished chain.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub algorithm: String,
    pub iterations: usize,
    pub mean: Array1<f64>,
    pub second_moment: Array1<f64>,
    pub variance: Array1<f64>,
    pub acceptance_rate: Option<f64>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} iterations", self.algorithm, self.iterations)?;
        if let Some(rate) = self.acceptance_rate {
            write!(f, ", acceptance {:.3}", rate)?;
        }
        // imaging states have thousands of coordinates; keep the summary on one line
        if self.mean.len() <= 8 {
            write!(f, ", mean {:.4}, variance {:.4}", self.mean, self.variance)
        } else {
            write!(
                f,
                ", mean of means {:.4}, mean variance {:.4}",
                self.mean.mean().unwrap_or(f64::NAN),
                self.variance.mean().unwrap_or(f64::NAN)
            )
        }
    }
}

/// Potential scale reduction `R̂` per coordinate across independent runs, from each
/// run's mean, unbiased variance and length.
pub fn potential_scale_reduction(runs: &[&RunSummary]) -> Result<Array1<f64>> {
    if runs.len() < 2 {
        return Err(LangevinError::algorithm(
            "potential scale reduction needs at least two runs",
        ));
    }
    let dim = runs[0].mean.len();
    if runs.iter().any(|r| r.mean.len() != dim || r.iterations < 2) {
        return Err(LangevinError::algorithm(
            "runs must share a dimension and have at least two iterations each",
        ));
    }
    let means: Vec<ArrayView1<f64>> = runs.iter().map(|r| r.mean.view()).collect();
    let means = ndarray::stack(Axis(0), &means)
        .map_err(|e| LangevinError::algorithm(format!("cannot stack run means: {e}")))?;
    let variances: Vec<ArrayView1<f64>> = runs.iter().map(|r| r.variance.view()).collect();
    let variances = ndarray::stack(Axis(0), &variances)
        .map_err(|e| LangevinError::algorithm(format!("cannot stack run variances: {e}")))?;

    let n_runs = runs.len() as f64;
    let n = runs.iter().map(|r| r.iterations as f64).sum::<f64>() / n_runs;
    let global_mean = means.sum_axis(Axis(0)) / n_runs;
    let within = variances.sum_axis(Axis(0)) / n_runs;
    let between = (&means - &global_mean.insert_axis(Axis(0)))
        .mapv(|v| v * v)
        .sum_axis(Axis(0))
        * (n / (n_runs - 1.0));
    let pooled = &within * ((n - 1.0) / n) + &between / n;
    Ok((pooled / within).mapv(f64::sqrt))
}

/// Largest `R̂` over all coordinates.
pub fn max_potential_scale_reduction(runs: &[&RunSummary]) -> Result<f64> {
    let rhat = potential_scale_reduction(runs)?;
    rhat.max()
        .copied()
        .map_err(|e| LangevinError::algorithm(format!("no finite R-hat: {e}")))
}
