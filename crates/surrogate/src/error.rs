//! Error types for the surrogate family.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from surrogate construction, training, and checkpointing.
///
/// A missing checkpoint is fatal: proxies must score with the exact weights
/// the fit produced, never a stale or freshly initialized model.
#[derive(Debug, Error)]
pub enum SurrogateError {
    #[error("no checkpoint at {0}")]
    MissingCheckpoint(PathBuf),

    #[error("recorder error: {0}")]
    Recorder(String),

    /// Prediction was requested before any fit or checkpoint load.
    #[error("regressor used before fit or load")]
    NotFitted,

    /// Cholesky factorization failed even after jitter escalation.
    #[error("matrix not positive definite in {0}")]
    NotPositiveDefinite(&'static str),

    #[error("cannot fit on an empty {0} split")]
    EmptySplit(&'static str),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
