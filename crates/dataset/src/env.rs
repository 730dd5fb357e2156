//! Environment and oracle protocol traits.
//!
//! The dataset layer never knows what a state means; it only needs the
//! environment to project states into proxy-space rows and readable strings,
//! and the oracle to score batches. Capabilities are resolved once at
//! construction into plain structs instead of probed ad hoc at call sites.

/// A single state in environment representation. Rows may be ragged; the
/// dataloader pads per batch.
pub type State = Vec<f64>;

/// Static facts about an environment, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct EnvCapabilities {
    /// Number of fidelity levels. 1 means single-fidelity.
    pub n_fid: usize,
    /// Whether [`Environment::state_costs`] returns per-state costs.
    pub per_state_cost: bool,
}

/// Static facts about an oracle, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct OracleCapabilities {
    /// Flat cost of one oracle call per state, used when the environment has
    /// no per-state costs.
    pub cost: f64,
    /// True when higher oracle scores are better.
    pub maximize: bool,
}

/// Proxy-space projection of a state batch.
///
/// Environments differ in what `statebatch2proxy` naturally produces; all
/// three shapes funnel through [`ProxyBatch::into_rows`] before the dataset
/// stores anything.
#[derive(Debug, Clone)]
pub enum ProxyBatch {
    /// Uniform-width rows, already stackable.
    Tensor(Vec<Vec<f64>>),
    /// Ragged rows, padded later by the dataloader.
    List(Vec<Vec<f64>>),
    /// Two aligned row sets to concatenate feature-wise (state features plus
    /// a fidelity block, typically).
    Pair(Vec<Vec<f64>>, Vec<Vec<f64>>),
}

impl ProxyBatch {
    /// Collapse into plain rows.
    pub fn into_rows(self) -> Vec<Vec<f64>> {
        match self {
            ProxyBatch::Tensor(rows) | ProxyBatch::List(rows) => rows,
            ProxyBatch::Pair(left, right) => left
                .into_iter()
                .zip(right)
                .map(|(mut l, r)| {
                    l.extend(r);
                    l
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ProxyBatch::Tensor(rows) | ProxyBatch::List(rows) => rows.len(),
            ProxyBatch::Pair(left, _) => left.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Seed data produced by [`Environment::initialize_dataset`].
///
/// `pool` feeds the `random` and `all_train` split policies; the explicit
/// `train`/`test` sets feed the `given` policy and are otherwise ignored.
#[derive(Debug, Clone, Default)]
pub struct InitialData {
    pub pool_states: Vec<State>,
    pub pool_energies: Vec<f64>,
    pub train: Option<(Vec<State>, Vec<f64>)>,
    pub test: Option<(Vec<State>, Vec<f64>)>,
}

/// The environment side of the protocol: state representation and seed data.
pub trait Environment {
    fn capabilities(&self) -> EnvCapabilities;

    /// Project a batch of states into proxy space.
    fn statebatch2proxy(&self, states: &[State]) -> ProxyBatch;

    /// Human-readable projection of one state, persisted to the split CSVs.
    fn state2readable(&self, state: &State) -> String;

    /// Produce the seed dataset for round zero.
    fn initialize_dataset(&self, n_samples: usize, seed: u64) -> InitialData;

    /// Per-state oracle costs, `None` when the environment only has the
    /// oracle's flat cost.
    fn state_costs(&self, _states: &[State]) -> Option<Vec<f64>> {
        None
    }
}

/// The oracle side of the protocol: ground-truth scoring.
///
/// Scores may contain NaN for states the oracle cannot evaluate; the caller
/// filters those rows out locally.
pub trait Oracle {
    fn capabilities(&self) -> OracleCapabilities;

    fn score(&self, states: &[State]) -> Vec<f64>;
}
