//! Error types for dataset construction and persistence.

use thiserror::Error;

/// Errors raised while building or updating the active-learning dataset.
///
/// All variants are fatal: a misconfigured split or a failed write leaves the
/// run in an undefined state, so callers abort rather than retry.
#[derive(Debug, Error)]
pub enum DataError {
    /// The configured split policy string is not one of the known policies.
    #[error("unknown split policy {0:?} (expected \"random\", \"all_train\" or \"given\")")]
    UnknownSplit(String),

    /// Split policy `given` was requested but the environment did not supply
    /// the named set.
    #[error("split policy \"given\" requires an explicit {0} set from the environment")]
    MissingSplit(&'static str),

    /// The environment produced no initial data at all.
    #[error("environment returned an empty initial dataset")]
    EmptyDataset,

    /// States and energies passed together have mismatched lengths.
    #[error("length mismatch: {states} states but {energies} energies")]
    LengthMismatch { states: usize, energies: usize },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
