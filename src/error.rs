//! Error types for model construction, algorithm configuration and chain execution.
//!
//! Configuration problems are detected eagerly, before any iteration runs. The only
//! error a running chain can produce is [`LangevinError::NumericalDivergence`].

use thiserror::Error;

use crate::core::ChainStatus;

/// Main error type of the crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LangevinError {
    /// Malformed target: weights off the simplex, non-positive scales, bad blur kernel,
    /// singular covariances or mismatched dimensions between model parts.
    #[error("invalid model configuration: {message}")]
    InvalidModelConfiguration { message: String },

    /// Non-positive step sizes or iteration budgets, preconditioners of the wrong shape,
    /// or a violated primal-dual stability condition.
    #[error("invalid algorithm configuration: {message}")]
    InvalidAlgorithmConfiguration { message: String },

    /// A non-finite state was produced. `iteration` is the 0-based index of the
    /// iteration that produced it; every earlier iteration was recorded.
    #[error("{algorithm} diverged: non-finite state at iteration {iteration}")]
    NumericalDivergence { algorithm: String, iteration: usize },

    /// The chain already reached a terminal state.
    #[error("chain is {status} and accepts no further iterations")]
    ChainTerminated { status: ChainStatus },
}

impl LangevinError {
    pub(crate) fn model(message: impl Into<String>) -> Self {
        Self::InvalidModelConfiguration {
            message: message.into(),
        }
    }

    pub(crate) fn algorithm(message: impl Into<String>) -> Self {
        Self::InvalidAlgorithmConfiguration {
            message: message.into(),
        }
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, LangevinError>;

/// Checks that a step size (or any other algorithm scale) is finite and strictly positive.
pub(crate) fn ensure_positive_step(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(LangevinError::algorithm(format!(
            "{name} must be finite and positive, got {value}"
        )))
    }
}

/// Same check as [`ensure_positive_step`] for model parameters.
pub(crate) fn ensure_positive_parameter(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(LangevinError::model(format!(
            "{name} must be finite and positive, got {value}"
        )))
    }
}
