//! Minibatch iteration over proxy-space rows.
//!
//! Rows may be ragged; each batch is right-padded with zeros to its own
//! maximum width, so padding never leaks across batches. The train loader
//! reshuffles on every pass, the test loader preserves dataset order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// One padded minibatch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, width]` rows, padded with 0.0 to the batch max width.
    pub states: Vec<Vec<f64>>,
    pub energies: Vec<f64>,
    /// Width every row in this batch was padded to.
    pub width: usize,
}

/// Batched view over one split.
#[derive(Debug, Clone)]
pub struct DataLoader {
    states: Vec<Vec<f64>>,
    energies: Vec<f64>,
    batch_size: usize,
    shuffle: bool,
}

impl DataLoader {
    pub fn new(
        states: Vec<Vec<f64>>,
        energies: Vec<f64>,
        batch_size: usize,
        shuffle: bool,
    ) -> Self {
        debug_assert_eq!(states.len(), energies.len());
        Self { states, energies, batch_size: batch_size.max(1), shuffle }
    }

    /// Number of items in the underlying split.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    pub fn states(&self) -> &[Vec<f64>] {
        &self.states
    }

    /// Materialize one pass over the split.
    ///
    /// Shuffling (train only) draws from `rng`, so two passes over the same
    /// loader differ while a seeded run stays reproducible.
    pub fn batches(&self, rng: &mut StdRng) -> Vec<Batch> {
        let mut order: Vec<usize> = (0..self.states.len()).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        order
            .chunks(self.batch_size)
            .map(|chunk| {
                let width = chunk
                    .iter()
                    .map(|&i| self.states[i].len())
                    .max()
                    .unwrap_or(0);
                let states = chunk
                    .iter()
                    .map(|&i| {
                        let mut row = self.states[i].clone();
                        row.resize(width, 0.0);
                        row
                    })
                    .collect();
                let energies = chunk.iter().map(|&i| self.energies[i]).collect();
                Batch { states, energies, width }
            })
            .collect()
    }
}
