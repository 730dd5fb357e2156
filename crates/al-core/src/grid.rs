//! Synthetic hyper-grid environment and oracle.
//!
//! A deterministic test bed for end-to-end runs: states are integer grid
//! coordinates, the oracle is a smooth multimodal energy over the unit cube,
//! and lower fidelities see a biased version of it at a lower query cost.

use dataset::{
    EnvCapabilities, Environment, InitialData, Oracle, OracleCapabilities, ProxyBatch, State,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::GridSection;

/// Ground-truth energy at normalized coordinates. Lower is better.
fn truth(u: &[f64]) -> f64 {
    u.iter()
        .map(|&c| (c - 0.35) * (c - 0.35) + 0.1 * (6.0 * std::f64::consts::PI * c).cos())
        .sum()
}

/// Bias seen by fidelity `fid` out of `n_fid`; the best fidelity is exact.
fn fidelity_bias(fid: usize, n_fid: usize, magnitude: f64) -> f64 {
    if n_fid <= 1 {
        return 0.0;
    }
    magnitude * (n_fid - 1 - fid) as f64 / (n_fid - 1) as f64
}

/// Split a grid state into normalized coordinates and a fidelity index.
/// The trailing column is the fidelity only when more than one level exists.
fn split_state(state: &State, spec: &GridSection) -> (Vec<f64>, usize) {
    let denom = (spec.side - 1).max(1) as f64;
    if spec.n_fid > 1 {
        let (coords, fid) = state.split_at(state.len() - 1);
        (coords.iter().map(|&c| c / denom).collect(), fid[0] as usize)
    } else {
        (state.iter().map(|&c| c / denom).collect(), spec.n_fid - 1)
    }
}

/// Hyper-grid environment over `side^dim` cells.
pub struct GridEnv {
    spec: GridSection,
}

impl GridEnv {
    pub fn new(spec: GridSection) -> Self {
        Self { spec }
    }
}

impl Environment for GridEnv {
    fn capabilities(&self) -> EnvCapabilities {
        EnvCapabilities {
            n_fid: self.spec.n_fid,
            per_state_cost: self.spec.n_fid > 1,
        }
    }

    fn statebatch2proxy(&self, states: &[State]) -> ProxyBatch {
        if self.spec.n_fid > 1 {
            let mut features = Vec::with_capacity(states.len());
            let mut fids = Vec::with_capacity(states.len());
            for state in states {
                let (coords, fid) = split_state(state, &self.spec);
                features.push(coords);
                fids.push(vec![fid as f64]);
            }
            ProxyBatch::Pair(features, fids)
        } else {
            ProxyBatch::Tensor(
                states
                    .iter()
                    .map(|state| split_state(state, &self.spec).0)
                    .collect(),
            )
        }
    }

    fn state2readable(&self, state: &State) -> String {
        if self.spec.n_fid > 1 {
            let (coords, fid) = state.split_at(state.len() - 1);
            format!("{coords:?};{}", fid[0] as usize)
        } else {
            format!("{state:?}")
        }
    }

    fn initialize_dataset(&self, n_samples: usize, seed: u64) -> InitialData {
        let mut rng = StdRng::seed_from_u64(seed);
        let oracle = GridOracle::new(self.spec.clone());
        let states: Vec<State> = (0..n_samples)
            .map(|_| {
                let mut state: State = (0..self.spec.dim)
                    .map(|_| rng.gen_range(0..self.spec.side) as f64)
                    .collect();
                if self.spec.n_fid > 1 {
                    state.push(rng.gen_range(0..self.spec.n_fid) as f64);
                }
                state
            })
            .collect();
        let energies = oracle.score(&states);
        InitialData { pool_states: states, pool_energies: energies, train: None, test: None }
    }

    fn state_costs(&self, states: &[State]) -> Option<Vec<f64>> {
        if self.spec.n_fid <= 1 {
            return None;
        }
        Some(
            states
                .iter()
                .map(|state| self.spec.costs[split_state(state, &self.spec).1])
                .collect(),
        )
    }
}

/// Oracle over the same grid: exact at the best fidelity, biased below it.
pub struct GridOracle {
    spec: GridSection,
}

impl GridOracle {
    pub fn new(spec: GridSection) -> Self {
        Self { spec }
    }
}

impl Oracle for GridOracle {
    fn capabilities(&self) -> OracleCapabilities {
        OracleCapabilities {
            cost: *self.spec.costs.last().unwrap_or(&1.0),
            maximize: false,
        }
    }

    fn score(&self, states: &[State]) -> Vec<f64> {
        states
            .iter()
            .map(|state| {
                let (coords, fid) = split_state(state, &self.spec);
                truth(&coords) + fidelity_bias(fid, self.spec.n_fid, self.spec.fidelity_bias)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(n_fid: usize) -> GridSection {
        GridSection {
            dim: 2,
            side: 10,
            n_fid,
            costs: (1..=n_fid).map(|f| f as f64 / n_fid as f64).collect(),
            fidelity_bias: 0.2,
        }
    }

    #[test]
    fn test_single_fidelity_proxy_is_unit_cube() {
        let env = GridEnv::new(spec(1));
        let rows = env
            .statebatch2proxy(&[vec![0.0, 9.0], vec![3.0, 3.0]])
            .into_rows();
        assert_eq!(rows[0], vec![0.0, 1.0]);
        for row in rows {
            assert_eq!(row.len(), 2);
            assert!(row.iter().all(|&c| (0.0..=1.0).contains(&c)));
        }
    }

    #[test]
    fn test_multi_fidelity_proxy_appends_raw_fid_column() {
        let env = GridEnv::new(spec(3));
        let rows = env.statebatch2proxy(&[vec![9.0, 0.0, 2.0]]).into_rows();
        assert_eq!(rows[0], vec![1.0, 0.0, 2.0]);
    }

    #[test]
    fn test_lower_fidelity_is_biased_and_cheaper() {
        let env = GridEnv::new(spec(3));
        let oracle = GridOracle::new(spec(3));
        let low = vec![4.0, 4.0, 0.0];
        let high = vec![4.0, 4.0, 2.0];
        let scores = oracle.score(&[low.clone(), high.clone()]);
        assert!((scores[0] - scores[1] - 0.2).abs() < 1e-12);

        let costs = env.state_costs(&[low, high]).unwrap();
        assert!(costs[0] < costs[1]);
    }

    #[test]
    fn test_initialize_dataset_is_seeded_and_scored() {
        let env = GridEnv::new(spec(2));
        let a = env.initialize_dataset(50, 4);
        let b = env.initialize_dataset(50, 4);
        assert_eq!(a.pool_states, b.pool_states);
        assert_eq!(a.pool_energies.len(), 50);
        assert!(a.pool_energies.iter().all(|e| e.is_finite()));
    }
}
