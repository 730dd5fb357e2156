//! Energy scaling: target-direction flipping and min-max normalization.
//!
//! Every energy entering the pipeline is first multiplied by the target
//! factor so that downstream code can always minimize. Normalization is
//! min-max over the current split and is recomputed from scratch after every
//! mutation of the split.

use serde::{Deserialize, Serialize};

/// Summary statistics of one split's energies.
///
/// `mean`/`std` are logged for diagnostics; `min`/`max` drive normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Stats::from_energies(&[])
    }
}

impl Stats {
    /// Compute statistics over a slice of energies.
    ///
    /// Empty input yields all-zero stats so that an empty test split stays
    /// representable without an `Option` at every call site.
    pub fn from_energies(energies: &[f64]) -> Self {
        if energies.is_empty() {
            return Self { mean: 0.0, std: 0.0, min: 0.0, max: 0.0 };
        }
        let n = energies.len() as f64;
        let mean = energies.iter().sum::<f64>() / n;
        let var = energies.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
        let min = energies.iter().copied().fold(f64::INFINITY, f64::min);
        let max = energies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self { mean, std: var.sqrt(), min, max }
    }

    /// Min-max range, zero for a degenerate (constant or empty) split.
    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

/// Min-max normalize energies into `[0, 1]` using `stats`.
///
/// A degenerate range maps everything to 0 so the round trip through
/// [`denormalize`] still recovers the original constant.
pub fn normalize(energies: &[f64], stats: &Stats) -> Vec<f64> {
    let range = stats.range();
    if range == 0.0 {
        return vec![0.0; energies.len()];
    }
    energies.iter().map(|e| (e - stats.min) / range).collect()
}

/// Inverse of [`normalize`].
pub fn denormalize(energies: &[f64], stats: &Stats) -> Vec<f64> {
    energies.iter().map(|e| e * stats.range() + stats.min).collect()
}

/// Sign applied to all oracle energies so the surrogate always minimizes.
///
/// The factor is fixed once per run from the oracle direction and the
/// acquisition family; applying it twice is the identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetFactor(f64);

impl TargetFactor {
    /// Resolve the factor from the oracle direction.
    ///
    /// Only the MES acquisition family needs raw scores flipped back when the
    /// oracle is a minimizer; everything else trains on energies as-is.
    pub fn resolve(maximize: bool, is_mes: bool) -> Self {
        if !maximize && is_mes {
            TargetFactor(-1.0)
        } else {
            TargetFactor(1.0)
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Multiply energies by the factor, canonicalizing `-0.0` to `0.0`.
    ///
    /// Without the canonicalization a flipped zero survives as `-0.0`, which
    /// round-trips badly through readable CSV output and equality checks.
    pub fn apply(&self, energies: &[f64]) -> Vec<f64> {
        energies
            .iter()
            .map(|e| {
                let v = e * self.0;
                if v == 0.0 {
                    0.0
                } else {
                    v
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = Stats::from_energies(&[1.0, 2.0, 3.0, 4.0]);
        assert!((stats.mean - 2.5).abs() < 1e-12);
        assert!((stats.min - 1.0).abs() < 1e-12);
        assert!((stats.max - 4.0).abs() < 1e-12);
        assert!((stats.std - (1.25f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_stats_empty() {
        let stats = Stats::from_energies(&[]);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.range(), 0.0);
    }

    #[test]
    fn test_normalize_round_trip() {
        let energies = vec![-3.2, 0.0, 1.5, 7.75, -0.25];
        let stats = Stats::from_energies(&energies);
        let normed = normalize(&energies, &stats);
        assert!(normed.iter().all(|&v| (0.0..=1.0).contains(&v)));
        let recovered = denormalize(&normed, &stats);
        for (orig, rec) in energies.iter().zip(&recovered) {
            assert!((orig - rec).abs() < 1e-9, "round trip lost {orig} -> {rec}");
        }
    }

    #[test]
    fn test_normalize_degenerate_range() {
        let energies = vec![2.0, 2.0, 2.0];
        let stats = Stats::from_energies(&energies);
        let normed = normalize(&energies, &stats);
        assert_eq!(normed, vec![0.0, 0.0, 0.0]);
        let recovered = denormalize(&normed, &stats);
        assert_eq!(recovered, energies);
    }

    #[test]
    fn test_target_factor_resolution() {
        assert_eq!(TargetFactor::resolve(true, false).value(), 1.0);
        assert_eq!(TargetFactor::resolve(true, true).value(), 1.0);
        assert_eq!(TargetFactor::resolve(false, false).value(), 1.0);
        assert_eq!(TargetFactor::resolve(false, true).value(), -1.0);
    }

    #[test]
    fn test_target_factor_double_application_is_identity() {
        let factor = TargetFactor::resolve(false, true);
        let energies = vec![-1.5, 0.0, 2.25, -0.0];
        let twice = factor.apply(&factor.apply(&energies));
        for (orig, back) in energies.iter().zip(&twice) {
            assert_eq!(*orig * 1.0, *back);
        }
    }

    #[test]
    fn test_negative_zero_canonicalized() {
        let factor = TargetFactor::resolve(false, true);
        let scaled = factor.apply(&[0.0]);
        assert_eq!(scaled[0], 0.0);
        assert!(scaled[0].is_sign_positive(), "-0.0 must be canonicalized");
    }
}
