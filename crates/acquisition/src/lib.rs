//! Acquisition layer: scalar scoring functions over candidate states.
//!
//! A [`Proxy`] wraps a fitted surrogate as the reward signal the external
//! sampler consumes. Every variant reloads the persisted checkpoint before
//! scoring, so a proxy never serves predictions from a surrogate that was
//! fit but not saved.

pub mod error;
pub mod qucb;
pub mod sobol;
pub mod ucb;

pub use error::AcquireError;
pub use qucb::{PosteriorModel, QuasiUcb};
pub use sobol::{sobol_normal, sobol_uniform};
pub use ucb::EnsembleUcb;

/// Scalar score per candidate state.
pub trait Proxy {
    fn score(&mut self, states: &[Vec<f64>]) -> Result<Vec<f64>, AcquireError>;
}

/// Which side of the confidence interval a proxy scores.
///
/// The pick direction depends on the stored-energy sign convention, and the
/// exploration bonus must point the same way: a largest-first pick chases
/// the upper bound, a smallest-first pick the lower. A positive bonus under
/// a smallest-first pick would penalize exactly the candidates worth
/// exploring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Upper,
    Lower,
}

impl Bound {
    /// Sign of the exploration term.
    pub fn sign(self) -> f64 {
        match self {
            Bound::Upper => 1.0,
            Bound::Lower => -1.0,
        }
    }
}
