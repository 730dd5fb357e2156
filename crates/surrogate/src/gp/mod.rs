//! Sparse variational GP surrogate: kernels, whitened variational state,
//! and the regressor built on top of them.

pub mod kernel;
pub mod regressor;
pub mod svgp;

pub use kernel::{ArdKernel, IndexKernel, KernelComposition, StationaryKind};
pub use regressor::{FidelityHandling, SvgpConfig, SvgpRegressor};
pub use svgp::Svgp;
