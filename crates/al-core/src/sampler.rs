//! Candidate sampler contract.
//!
//! The generative sampler's own training algorithm is out of scope; the loop
//! only needs something that can be (re)trained each round and then propose
//! candidate states. `RandomSampler` is the reference implementation used by
//! the binary and the integration tests.

use dataset::State;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// What the AL loop requires from a candidate sampler.
pub trait Sampler {
    /// One round of sampler training against the current proxy.
    fn train(&mut self);

    /// Propose `n` candidate states. Duplicates are allowed; the loop
    /// deduplicates before scoring.
    fn sample_batch(&mut self, n: usize) -> Vec<State>;
}

/// Uniform sampler over a hyper-grid, with a trailing fidelity coordinate
/// when more than one fidelity level exists.
pub struct RandomSampler {
    dim: usize,
    side: usize,
    n_fid: usize,
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(dim: usize, side: usize, n_fid: usize, seed: u64) -> Self {
        Self { dim, side, n_fid, rng: StdRng::seed_from_u64(seed) }
    }
}

impl Sampler for RandomSampler {
    fn train(&mut self) {
        tracing::debug!("Random sampler has nothing to train");
    }

    fn sample_batch(&mut self, n: usize) -> Vec<State> {
        (0..n)
            .map(|_| {
                let mut state: State = (0..self.dim)
                    .map(|_| self.rng.gen_range(0..self.side) as f64)
                    .collect();
                if self.n_fid > 1 {
                    state.push(self.rng.gen_range(0..self.n_fid) as f64);
                }
                state
            })
            .collect()
    }
}
