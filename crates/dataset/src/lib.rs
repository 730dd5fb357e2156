//! Dataset layer for the multi-fidelity active-learning loop.
//!
//! Owns the train/test splits, their normalization, and everything that
//! persists to disk about the data. Surrogates see only [`DataLoader`]
//! batches; proxies and environments meet at the traits in [`env`].

pub mod env;
pub mod error;
pub mod handler;
pub mod loader;
pub mod logger;
pub mod scaling;

pub use env::{EnvCapabilities, Environment, InitialData, Oracle, OracleCapabilities, ProxyBatch, State};
pub use error::DataError;
pub use handler::{DataHandler, DataHandlerConfig, SplitPolicy};
pub use loader::{Batch, DataLoader};
pub use logger::RunLogger;
pub use scaling::{denormalize, normalize, Stats, TargetFactor};
