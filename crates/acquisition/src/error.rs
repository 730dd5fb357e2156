//! Acquisition error type.

use surrogate::SurrogateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("surrogate error: {0}")]
    Surrogate(#[from] SurrogateError),

    #[error("cannot score an empty candidate batch")]
    EmptyBatch,
}
