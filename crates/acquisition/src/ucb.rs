//! Ensemble upper-confidence-bound proxy.

use surrogate::SurrogateRegressor;

use crate::error::AcquireError;
use crate::{Bound, Proxy};

/// Confidence bound over the regressor's sampled ensemble:
/// `score = mean(ensemble) ± kappa * std(ensemble)`, with the sign taken
/// from the [`Bound`].
///
/// Every call reloads the final checkpoint so the score always reflects the
/// most recently persisted surrogate rather than whatever happens to sit in
/// memory from an earlier round.
pub struct EnsembleUcb<R: SurrogateRegressor> {
    regressor: R,
    kappa: f64,
    num_samples: usize,
    bound: Bound,
}

impl<R: SurrogateRegressor> EnsembleUcb<R> {
    pub fn new(regressor: R, kappa: f64, num_samples: usize, bound: Bound) -> Self {
        Self { regressor, kappa, num_samples, bound }
    }
}

impl<R: SurrogateRegressor> Proxy for EnsembleUcb<R> {
    fn score(&mut self, states: &[Vec<f64>]) -> Result<Vec<f64>, AcquireError> {
        if states.is_empty() {
            return Err(AcquireError::EmptyBatch);
        }
        self.regressor.load_final()?;
        let ensemble = self.regressor.sample_ensemble(states, self.num_samples)?;
        Ok(ensemble
            .iter()
            .map(|draws| {
                let n = draws.len() as f64;
                let mean = draws.iter().sum::<f64>() / n;
                let var = draws.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / n;
                mean + self.bound.sign() * self.kappa * var.sqrt()
            })
            .collect())
    }
}
