pub mod algorithm;
pub mod core;
pub mod distributions;
pub mod error;
pub mod imaging;
pub mod langevin;
mod linalg;
pub mod mirror;
pub mod noise;
pub mod operators;
pub mod optimize;
pub mod primal_dual;
pub mod prox;
pub mod proximal;
pub mod stats;

pub use error::{LangevinError, Result};
