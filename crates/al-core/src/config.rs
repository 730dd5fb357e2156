//! TOML config loading for the AL loop binary.
//!
//! Deserializes a run config with `[run]`, `[data]`, `[regressor]`,
//! `[acquisition]` and `[grid]` sections into plain structs threaded down
//! through the pipeline constructors.

use std::path::{Path, PathBuf};

use dataset::DataHandlerConfig;
use serde::Deserialize;

/// Top-level structure matching the run config TOML.
#[derive(Debug, Deserialize)]
pub struct AlToml {
    pub run: RunConfig,
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub regressor: RegressorSection,
    #[serde(default)]
    pub acquisition: AcquisitionSection,
    #[serde(default)]
    pub grid: GridSection,
}

/// Campaign-level parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// States picked (and queried) per round.
    pub n_samples: usize,
    /// Rounds used to derive the default budget when `budget` is absent.
    pub al_n_rounds: usize,
    /// Total oracle cost the campaign may spend. Defaults to
    /// `al_n_rounds * oracle_cost * n_samples`.
    pub budget: Option<f64>,
    #[serde(default)]
    pub seed: u64,
    /// Run directory for dataset CSVs, checkpoints, and cumulative stats.
    pub out_dir: PathBuf,
    /// Periodic checkpoint cadence in epochs; final checkpoints are always
    /// written.
    #[serde(default)]
    pub proxy_period: Option<usize>,
}

/// `[data]` section, converted into [`DataHandlerConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub split: String,
    pub train_fraction: f64,
    pub n_samples: usize,
    pub batch_size: usize,
    pub normalize: bool,
}

impl Default for DataSection {
    fn default() -> Self {
        let d = DataHandlerConfig::default();
        Self {
            split: d.split,
            train_fraction: d.train_fraction,
            n_samples: d.n_samples,
            batch_size: d.batch_size,
            normalize: d.normalize,
        }
    }
}

impl DataSection {
    pub fn to_handler_config(&self, seed: u64) -> DataHandlerConfig {
        DataHandlerConfig {
            split: self.split.clone(),
            train_fraction: self.train_fraction,
            n_samples: self.n_samples,
            batch_size: self.batch_size,
            normalize: self.normalize,
            seed,
        }
    }
}

/// Which surrogate family the round builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressorChoice {
    Dropout,
    Gp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegressorSection {
    pub kind: RegressorChoice,
    /// Hidden width of the dropout MLP.
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub dropout: f64,
    pub num_dropout_samples: usize,
    /// Inducing point count for the GP family.
    pub n_inducing: usize,
    pub max_epochs: usize,
}

impl Default for RegressorSection {
    fn default() -> Self {
        Self {
            kind: RegressorChoice::Dropout,
            hidden_dim: 128,
            num_layers: 2,
            dropout: 0.1,
            num_dropout_samples: 10,
            n_inducing: 32,
            max_epochs: 50,
        }
    }
}

/// Which proxy wraps the fitted regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyChoice {
    Ucb,
    Qucb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionSection {
    pub proxy: ProxyChoice,
    pub kappa: f64,
    /// Ensemble size behind the posterior estimate.
    pub num_ensemble: usize,
    /// Quasi-MC base draws for the qUCB functional.
    pub num_mc_samples: usize,
    pub sobol_seed: u64,
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            proxy: ProxyChoice::Ucb,
            kappa: 1.0,
            num_ensemble: 10,
            num_mc_samples: 128,
            sobol_seed: 0,
        }
    }
}

/// Synthetic hyper-grid environment parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridSection {
    pub dim: usize,
    /// Cells per dimension.
    pub side: usize,
    /// Fidelity levels; 1 runs single-fidelity.
    pub n_fid: usize,
    /// Per-fidelity oracle cost, lowest fidelity first. Length must be
    /// `n_fid`; the last entry is the flat cost of the best oracle.
    pub costs: Vec<f64>,
    /// Low-fidelity bias magnitude.
    pub fidelity_bias: f64,
}

impl Default for GridSection {
    fn default() -> Self {
        Self { dim: 2, side: 20, n_fid: 1, costs: vec![1.0], fidelity_bias: 0.2 }
    }
}

/// Load and deserialize an [`AlToml`] from a TOML file.
pub fn load_al_toml(path: &Path) -> anyhow::Result<AlToml> {
    let contents = std::fs::read_to_string(path)?;
    let config: AlToml = toml::from_str(&contents)?;
    if config.grid.costs.len() != config.grid.n_fid {
        anyhow::bail!(
            "grid.costs must have one entry per fidelity ({} != {})",
            config.grid.costs.len(),
            config.grid.n_fid
        );
    }
    tracing::info!(path = %path.display(), "Loaded AL config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_toml() {
        let toml_str = r#"
[run]
n_samples = 10
al_n_rounds = 5
budget = 120.0
seed = 7
out_dir = "runs/demo"

[data]
split = "random"
train_fraction = 0.8
n_samples = 200
batch_size = 32
normalize = true

[regressor]
kind = "gp"
n_inducing = 24
max_epochs = 30

[acquisition]
proxy = "qucb"
kappa = 2.0
num_mc_samples = 256

[grid]
dim = 3
side = 10
n_fid = 2
costs = [0.25, 1.0]
"#;
        let config: AlToml = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.n_samples, 10);
        assert_eq!(config.run.budget, Some(120.0));
        assert_eq!(config.data.n_samples, 200);
        assert_eq!(config.regressor.kind, RegressorChoice::Gp);
        assert_eq!(config.regressor.n_inducing, 24);
        assert_eq!(config.acquisition.proxy, ProxyChoice::Qucb);
        assert!((config.acquisition.kappa - 2.0).abs() < 1e-12);
        assert_eq!(config.grid.n_fid, 2);
        assert_eq!(config.grid.costs, vec![0.25, 1.0]);
    }

    #[test]
    fn test_optional_sections_default() {
        // Only [run] present; everything else falls back to defaults.
        let toml_str = r#"
[run]
n_samples = 5
al_n_rounds = 3
out_dir = "runs/min"
"#;
        let config: AlToml = toml::from_str(toml_str).unwrap();
        assert!(config.run.budget.is_none());
        assert_eq!(config.data.split, "random");
        assert_eq!(config.regressor.kind, RegressorChoice::Dropout);
        assert_eq!(config.acquisition.proxy, ProxyChoice::Ucb);
        assert_eq!(config.grid.n_fid, 1);
    }

    #[test]
    fn test_data_section_to_handler_config() {
        let section = DataSection { split: "all_train".into(), ..DataSection::default() };
        let handler = section.to_handler_config(9);
        assert_eq!(handler.split, "all_train");
        assert_eq!(handler.seed, 9);
    }
}
