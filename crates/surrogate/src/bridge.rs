//! Tensor bridge: conversions between the dataset layer's `f64` rows and
//! burn tensors.
//!
//! The dataset pipeline is framework-free and double precision; burn models
//! run in f32. This module is the only place that crossing happens.

use burn::prelude::*;
use burn::tensor::TensorData;

/// Convert a batch of proxy-space rows to a burn 2D tensor.
///
/// # Panics
/// Panics if `rows` is empty or the rows have inconsistent widths. Rows are
/// padded upstream by the dataloader, so a ragged batch here is a bug.
pub fn rows_to_tensor<B: Backend>(rows: &[Vec<f64>], device: &B::Device) -> Tensor<B, 2> {
    assert!(!rows.is_empty(), "rows must not be empty");
    let dim = rows[0].len();
    assert!(dim > 0, "row width must be > 0");
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row.len(), dim, "row {i} has width {}, expected {dim}", row.len());
    }

    let batch = rows.len();
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().map(|&v| v as f32)).collect();
    Tensor::from_data(TensorData::new(flat, [batch, dim]), device)
}

/// Convert a batch of energies to a burn 1D tensor.
pub fn energies_to_tensor<B: Backend>(energies: &[f64], device: &B::Device) -> Tensor<B, 1> {
    let flat: Vec<f32> = energies.iter().map(|&v| v as f32).collect();
    Tensor::from_data(TensorData::new(flat, [energies.len()]), device)
}

/// Extract f64 values from a burn 1D tensor.
pub fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 1>) -> Vec<f64> {
    let data = tensor.into_data();
    data.to_vec::<f32>()
        .unwrap()
        .into_iter()
        .map(|v| v as f64)
        .collect()
}
