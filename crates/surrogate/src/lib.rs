//! Surrogate regressors over proxy-space rows.
//!
//! Two families share the [`SurrogateRegressor`] trait: an MC-dropout MLP
//! running on burn, and a sparse variational GP in `f64` linear algebra.
//! Both fit against [`dataset::DataLoader`] splits, checkpoint through
//! [`dataset::RunLogger`] paths, and report the same evaluation metrics.

pub mod bridge;
pub mod dropout;
pub mod error;
pub mod gp;
pub mod metrics;
pub mod mlp;
pub mod regressor;

pub use dropout::{DropoutRegressor, DropoutRegressorConfig, NetSpec, SurrogateNet};
pub use error::SurrogateError;
pub use gp::{FidelityHandling, SvgpConfig, SvgpRegressor};
pub use metrics::EvalMetrics;
pub use mlp::{HeadMode, Mlp, MlpConfig, MultiFidelityMlp, MultiFidelityMlpConfig};
pub use regressor::{FitReport, Posterior, SurrogateRegressor};
