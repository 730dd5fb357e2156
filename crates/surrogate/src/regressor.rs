//! The seam between surrogates and the acquisition layer.

use dataset::DataLoader;

use crate::error::SurrogateError;
use crate::metrics::EvalMetrics;

/// Gaussian summary of a predictive distribution, one entry per state.
#[derive(Debug, Clone)]
pub struct Posterior {
    pub mean: Vec<f64>,
    pub var: Vec<f64>,
}

/// Outcome of one fit.
#[derive(Debug, Clone)]
pub struct FitReport {
    pub epochs: usize,
    pub final_test_loss: f64,
    pub stop_reason: String,
}

/// Common surface of the regressor family.
///
/// Proxies hold a `dyn SurrogateRegressor` and never know whether the
/// uncertainty underneath comes from MC dropout or a GP posterior.
pub trait SurrogateRegressor {
    /// Train on the given splits until the family's convergence criterion
    /// triggers, checkpointing along the way.
    fn fit(&mut self, train: &DataLoader, test: &DataLoader) -> Result<FitReport, SurrogateError>;

    /// Predictive mean and variance per state.
    fn posterior(&self, states: &[Vec<f64>]) -> Result<Posterior, SurrogateError>;

    /// Predictive ensemble, `[batch][num_samples]`.
    fn sample_ensemble(
        &self,
        states: &[Vec<f64>],
        num_samples: usize,
    ) -> Result<Vec<Vec<f64>>, SurrogateError>;

    /// Full-split metrics over every batch of `loader`.
    fn evaluate(&self, loader: &DataLoader) -> Result<EvalMetrics, SurrogateError>;

    /// Reload the weights of the final checkpoint of the current context.
    ///
    /// Fails with [`SurrogateError::MissingCheckpoint`] when no fit has
    /// produced one; there is no fallback to a fresh model.
    fn load_final(&mut self) -> Result<(), SurrogateError>;
}

impl SurrogateRegressor for Box<dyn SurrogateRegressor> {
    fn fit(&mut self, train: &DataLoader, test: &DataLoader) -> Result<FitReport, SurrogateError> {
        (**self).fit(train, test)
    }

    fn posterior(&self, states: &[Vec<f64>]) -> Result<Posterior, SurrogateError> {
        (**self).posterior(states)
    }

    fn sample_ensemble(
        &self,
        states: &[Vec<f64>],
        num_samples: usize,
    ) -> Result<Vec<Vec<f64>>, SurrogateError> {
        (**self).sample_ensemble(states, num_samples)
    }

    fn evaluate(&self, loader: &DataLoader) -> Result<EvalMetrics, SurrogateError> {
        (**self).evaluate(loader)
    }

    fn load_final(&mut self) -> Result<(), SurrogateError> {
        (**self).load_final()
    }
}
