//! Low-discrepancy base draws for quasi-Monte-Carlo acquisition.
//!
//! One-dimensional scrambled Sobol points (base-2 radical inverse with a
//! seed-derived digital XOR scramble), optionally pushed through the
//! standard normal inverse CDF. The same seed always yields the same
//! draws, which keeps acquisition scores deterministic across candidate
//! batches within a round.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{ContinuousCDF, Normal};

/// Bit-reverse the low 32 bits: the base-2 radical inverse in fixed point.
fn radical_inverse_bits(mut i: u32) -> u32 {
    i = (i << 16) | (i >> 16);
    i = ((i & 0x00ff_00ff) << 8) | ((i & 0xff00_ff00) >> 8);
    i = ((i & 0x0f0f_0f0f) << 4) | ((i & 0xf0f0_f0f0) >> 4);
    i = ((i & 0x3333_3333) << 2) | ((i & 0xcccc_cccc) >> 2);
    i = ((i & 0x5555_5555) << 1) | ((i & 0xaaaa_aaaa) >> 1);
    i
}

/// `n` scrambled Sobol points in the open unit interval.
///
/// The digital scramble XORs a fixed random mask into the inverted bits;
/// the half-bit offset keeps every point strictly inside (0, 1).
pub fn sobol_uniform(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let scramble: u32 = rng.gen();
    (0..n as u32)
        .map(|i| {
            let bits = radical_inverse_bits(i) ^ scramble;
            (bits as f64 + 0.5) / (1u64 << 32) as f64
        })
        .collect()
}

/// `n` standard normal quasi-random draws.
pub fn sobol_normal(n: usize, seed: u64) -> Vec<f64> {
    let standard = Normal::new(0.0, 1.0).expect("standard normal is valid");
    sobol_uniform(n, seed)
        .into_iter()
        .map(|u| standard.inverse_cdf(u))
        .collect()
}
