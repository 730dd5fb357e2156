//! Campaign glue: configuration, the round loop, and the synthetic test bed.

pub mod config;
pub mod grid;
pub mod pipeline;
pub mod sampler;
