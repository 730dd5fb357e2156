//! Evaluation metrics shared by the regressor family.
//!
//! Everything operates on predictive means/variances over a full split:
//! Gaussian NLL, RMSE, Spearman rank correlation, and quantile calibration
//! (expected calibration error plus signed occupancy difference).

use statrs::distribution::{ContinuousCDF, Normal};

/// Metrics of one full-split evaluation.
///
/// The GP-only fields stay `None` for the dropout regressor.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EvalMetrics {
    pub nll: f64,
    pub rmse: f64,
    pub spearman_rho: f64,
    /// Mean absolute gap between nominal and empirical interval coverage.
    pub ece: f64,
    /// Signed version of the same gap: positive means over-conservative.
    pub occ_diff: f64,
    pub mean_posterior_variance: f64,
    pub noise: Option<f64>,
    pub lengthscale: Option<Vec<f64>>,
    pub outputscale: Option<f64>,
}

/// Variance floor applied before any Gaussian density evaluation.
const VAR_FLOOR: f64 = 1e-12;

pub fn rmse(pred: &[f64], targets: &[f64]) -> f64 {
    debug_assert_eq!(pred.len(), targets.len());
    if pred.is_empty() {
        return 0.0;
    }
    let mse = pred
        .iter()
        .zip(targets)
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / pred.len() as f64;
    mse.sqrt()
}

/// Mean negative log likelihood of targets under independent Gaussians.
pub fn gaussian_nll(means: &[f64], vars: &[f64], targets: &[f64]) -> f64 {
    debug_assert_eq!(means.len(), targets.len());
    if means.is_empty() {
        return 0.0;
    }
    let n = means.len() as f64;
    means
        .iter()
        .zip(vars)
        .zip(targets)
        .map(|((&m, &v), &t)| {
            let v = v.max(VAR_FLOOR);
            0.5 * ((2.0 * std::f64::consts::PI * v).ln() + (t - m).powi(2) / v)
        })
        .sum::<f64>()
        / n
}

/// Average rank of each value, with ties sharing their mean rank.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let mean_rank = (i + j) as f64 / 2.0;
        for &idx in &order[i..=j] {
            out[idx] = mean_rank;
        }
        i = j + 1;
    }
    out
}

/// Spearman rank correlation: Pearson correlation of the rank vectors.
pub fn spearman(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.len() < 2 {
        return 0.0;
    }
    let ra = ranks(a);
    let rb = ranks(b);
    let n = a.len() as f64;
    let mean_a = ra.iter().sum::<f64>() / n;
    let mean_b = rb.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in ra.iter().zip(&rb) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Nominal coverage levels probed by [`quantile_calibration`].
fn coverage_grid() -> Vec<f64> {
    (1..20).map(|i| i as f64 * 0.05).collect()
}

/// Quantile calibration of a Gaussian predictive distribution.
///
/// For each nominal central-interval coverage `q`, the empirical occupancy is
/// the fraction of targets inside `mean ± z(q) * std`. Returns
/// `(ece, occ_diff)`: the mean absolute and mean signed occupancy gap.
pub fn quantile_calibration(means: &[f64], vars: &[f64], targets: &[f64]) -> (f64, f64) {
    debug_assert_eq!(means.len(), targets.len());
    if means.is_empty() {
        return (0.0, 0.0);
    }
    let standard = Normal::new(0.0, 1.0).expect("standard normal is valid");
    let n = means.len() as f64;
    let grid = coverage_grid();
    let mut abs_gap = 0.0;
    let mut signed_gap = 0.0;
    for &q in &grid {
        let z = standard.inverse_cdf(0.5 + q / 2.0);
        let occupancy = means
            .iter()
            .zip(vars)
            .zip(targets)
            .filter(|((&m, &v), &t)| (t - m).abs() <= z * v.max(VAR_FLOOR).sqrt())
            .count() as f64
            / n;
        abs_gap += (occupancy - q).abs();
        signed_gap += occupancy - q;
    }
    let levels = grid.len() as f64;
    (abs_gap / levels, signed_gap / levels)
}

/// Assemble the shared metric block from a full-split posterior.
pub fn regression_metrics(means: &[f64], vars: &[f64], targets: &[f64]) -> EvalMetrics {
    let (ece, occ_diff) = quantile_calibration(means, vars, targets);
    let mean_posterior_variance = if vars.is_empty() {
        0.0
    } else {
        vars.iter().sum::<f64>() / vars.len() as f64
    };
    EvalMetrics {
        nll: gaussian_nll(means, vars, targets),
        rmse: rmse(means, targets),
        spearman_rho: spearman(means, targets),
        ece,
        occ_diff,
        mean_posterior_variance,
        noise: None,
        lengthscale: None,
        outputscale: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rmse_known_value() {
        let r = rmse(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0]);
        assert!((r - (4.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_spearman_perfect_monotone() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![10.0, 20.0, 25.0, 100.0];
        assert!((spearman(&a, &b) - 1.0).abs() < 1e-12);
        let c: Vec<f64> = b.iter().map(|v| -v).collect();
        assert!((spearman(&a, &c) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_spearman_handles_ties() {
        let a = vec![1.0, 1.0, 2.0, 3.0];
        let b = vec![1.0, 1.0, 2.0, 3.0];
        assert!((spearman(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gaussian_nll_prefers_accurate_mean() {
        let targets = vec![0.0, 1.0, -1.0];
        let vars = vec![1.0, 1.0, 1.0];
        let good = gaussian_nll(&targets, &vars, &targets);
        let bad = gaussian_nll(&[5.0, 6.0, 4.0], &vars, &targets);
        assert!(good < bad);
    }

    #[test]
    fn test_quantile_calibration_zero_variance_misses_everything() {
        // Predictions far from targets with ~zero variance: no interval ever
        // covers, so every nominal level is missed completely.
        let means = vec![10.0; 50];
        let vars = vec![0.0; 50];
        let targets = vec![0.0; 50];
        let (ece, occ_diff) = quantile_calibration(&means, &vars, &targets);
        assert!((ece - 0.5).abs() < 1e-9);
        assert!((occ_diff + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_quantile_calibration_exact_mean_is_overcovered() {
        // Predictions equal to targets: every interval covers, occupancy 1.0
        // at all levels, so the signed gap is positive.
        let targets: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let vars = vec![1.0; 20];
        let (ece, occ_diff) = quantile_calibration(&targets, &vars, &targets);
        assert!(occ_diff > 0.0);
        assert!((ece - occ_diff).abs() < 1e-12);
    }

    #[test]
    fn test_regression_metrics_populates_shared_block() {
        let means = vec![0.1, 0.9, 2.1];
        let vars = vec![0.2, 0.2, 0.2];
        let targets = vec![0.0, 1.0, 2.0];
        let m = regression_metrics(&means, &vars, &targets);
        assert!(m.rmse > 0.0 && m.rmse < 0.2);
        assert!((m.spearman_rho - 1.0).abs() < 1e-12);
        assert!((m.mean_posterior_variance - 0.2).abs() < 1e-12);
        assert!(m.noise.is_none());
    }
}
