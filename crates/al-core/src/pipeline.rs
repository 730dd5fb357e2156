//! The active-learning round loop.
//!
//! Per round: build a fresh surrogate against the current dataset, fit it,
//! wrap it in the configured proxy, train the sampler, score an oversampled
//! deduplicated candidate batch, query the oracle on the top picks, drop NaN
//! rows, account cost against the budget, and fold the batch back through
//! `update_dataset`. Cumulative picks and spend persist as JSON after every
//! round.

use std::path::Path;

use acquisition::{Bound, EnsembleUcb, Proxy, QuasiUcb};
use dataset::{DataHandler, Environment, Oracle, RunLogger, State};
use serde::Serialize;
use surrogate::SurrogateRegressor;

use crate::config::{AcquisitionSection, ProxyChoice, RunConfig};
use crate::sampler::Sampler;

/// Builds a fresh regressor each round; surrogates are never warm-started
/// across rounds.
pub type RegressorFactory = Box<dyn Fn(RunLogger) -> Box<dyn SurrogateRegressor>>;

/// Everything sampled so far, persisted after every round.
#[derive(Debug, Default, Serialize)]
pub struct CumulativeStats {
    pub samples: Vec<String>,
    pub energies: Vec<f64>,
    pub cost: f64,
    pub rounds: usize,
}

pub struct Pipeline<E: Environment, O: Oracle, S: Sampler> {
    handler: DataHandler<E>,
    oracle: O,
    sampler: S,
    run: RunConfig,
    acquisition: AcquisitionSection,
    base_logger: RunLogger,
    factory: RegressorFactory,
    cumulative: CumulativeStats,
}

/// Candidate ordering with duplicates removed; scoring the same state twice
/// wastes proxy calls and can double-pick it.
fn dedupe_states(mut states: Vec<State>) -> Vec<State> {
    states.sort_by(|a, b| {
        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
    });
    states.dedup();
    states
}

impl<E: Environment, O: Oracle, S: Sampler> Pipeline<E, O, S> {
    pub fn new(
        handler: DataHandler<E>,
        oracle: O,
        sampler: S,
        run: RunConfig,
        acquisition: AcquisitionSection,
        base_logger: RunLogger,
        factory: RegressorFactory,
    ) -> Self {
        Self {
            handler,
            oracle,
            sampler,
            run,
            acquisition,
            base_logger,
            factory,
            cumulative: CumulativeStats::default(),
        }
    }

    pub fn cumulative(&self) -> &CumulativeStats {
        &self.cumulative
    }

    pub fn handler(&self) -> &DataHandler<E> {
        &self.handler
    }

    /// Whether higher proxy scores mean better candidates. The stored
    /// energies are target-scaled, so the sign convention depends on both
    /// the oracle direction and the factor.
    fn pick_descending(&self) -> bool {
        let maximize = self.oracle.capabilities().maximize;
        if self.handler.target_factor().value() < 0.0 {
            !maximize
        } else {
            maximize
        }
    }

    /// Confidence bound matching the pick direction: descending picks chase
    /// the upper bound, ascending picks the lower. Either way the
    /// exploration term pushes uncertain candidates toward selection.
    fn exploration_bound(&self) -> Bound {
        if self.pick_descending() {
            Bound::Upper
        } else {
            Bound::Lower
        }
    }

    /// Run rounds until the oracle budget is spent.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let budget = self.run.budget.unwrap_or_else(|| {
            self.run.al_n_rounds as f64
                * self.oracle.capabilities().cost
                * self.run.n_samples as f64
        });
        tracing::info!(budget, n_samples = self.run.n_samples, "Starting AL campaign");

        let mut round = 1;
        while self.cumulative.cost < budget {
            let picked = self.round(round)?;
            if picked == 0 {
                tracing::warn!(round, "Round produced no usable samples, stopping");
                break;
            }
            round += 1;
        }
        tracing::info!(
            rounds = self.cumulative.rounds,
            cost = self.cumulative.cost,
            sampled = self.cumulative.energies.len(),
            "AL campaign finished"
        );
        Ok(())
    }

    /// One AL round; returns how many states survived the NaN filter.
    fn round(&mut self, round: usize) -> anyhow::Result<usize> {
        tracing::info!(round, "Starting active-learning round");
        let mut logger = self.base_logger.clone();
        logger.set_context(format!("round{round}_"));

        // Fresh surrogate every round; warm starts overfit the early rounds.
        let mut regressor = (self.factory)(logger);
        let (train, test) = self.handler.get_dataloader();
        let report = regressor.fit(&train, &test)?;
        tracing::info!(
            round,
            epochs = report.epochs,
            reason = report.stop_reason,
            "Surrogate fit"
        );
        if !test.is_empty() {
            let metrics = regressor.evaluate(&test)?;
            tracing::info!(
                round,
                rmse = format!("{:.4}", metrics.rmse),
                nll = format!("{:.4}", metrics.nll),
                spearman = format!("{:.4}", metrics.spearman_rho),
                "Surrogate held-out metrics"
            );
        }

        self.sampler.train();
        let candidates = dedupe_states(self.sampler.sample_batch(self.run.n_samples * 5));
        if candidates.is_empty() {
            return Ok(0);
        }
        let rows = self.handler.env().statebatch2proxy(&candidates).into_rows();

        let bound = self.exploration_bound();
        let mut proxy: Box<dyn Proxy> = match self.acquisition.proxy {
            ProxyChoice::Ucb => Box::new(EnsembleUcb::new(
                regressor,
                self.acquisition.kappa,
                self.acquisition.num_ensemble,
                bound,
            )),
            ProxyChoice::Qucb => Box::new(QuasiUcb::new(
                regressor,
                self.acquisition.kappa,
                self.acquisition.num_ensemble,
                self.acquisition.num_mc_samples,
                self.acquisition.sobol_seed,
                bound,
            )),
        };
        let scores = proxy.score(&rows)?;

        let descending = self.pick_descending();
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| {
            let cmp = scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal);
            if descending { cmp.reverse() } else { cmp }
        });
        let num_pick = self.run.n_samples.min(candidates.len());
        let picked: Vec<State> = order[..num_pick]
            .iter()
            .map(|&i| candidates[i].clone())
            .collect();

        let energies = self.oracle.score(&picked);

        // The oracle may refuse individual states with NaN; those rows are
        // dropped from both sides, never stored or charged.
        let mut kept_states = Vec::with_capacity(picked.len());
        let mut kept_energies = Vec::with_capacity(picked.len());
        for (state, energy) in picked.into_iter().zip(energies) {
            if energy.is_nan() {
                continue;
            }
            kept_states.push(state);
            kept_energies.push(energy);
        }
        let dropped = num_pick - kept_states.len();
        if dropped > 0 {
            tracing::info!(round, dropped, "Oracle returned NaN for some picks");
        }
        if kept_states.is_empty() {
            return Ok(0);
        }

        let round_cost = match self.handler.env().state_costs(&kept_states) {
            Some(costs) => costs.iter().sum::<f64>(),
            None => self.oracle.capabilities().cost * kept_states.len() as f64,
        };

        self.handler.update_dataset(&kept_states, &kept_energies)?;

        self.cumulative.cost += round_cost;
        self.cumulative.rounds = round;
        self.cumulative
            .samples
            .extend(kept_states.iter().map(|s| self.handler.env().state2readable(s)));
        self.cumulative.energies.extend(kept_energies.iter().copied());
        self.persist_cumulative()?;

        tracing::info!(
            round,
            picked = kept_states.len(),
            cost = round_cost,
            cumulative_cost = self.cumulative.cost,
            "Round complete"
        );
        Ok(kept_states.len())
    }

    fn persist_cumulative(&self) -> anyhow::Result<()> {
        let path = self.run.out_dir.join("cumulative_stats.json");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        serde_json::to_writer_pretty(std::fs::File::create(&path)?, &self.cumulative)?;
        Ok(())
    }
}

/// Load persisted cumulative stats, for inspection after a run.
pub fn read_cumulative(out_dir: &Path) -> anyhow::Result<serde_json::Value> {
    let contents = std::fs::read_to_string(out_dir.join("cumulative_stats.json"))?;
    Ok(serde_json::from_str(&contents)?)
}
