//! Dataset ownership for the active-learning loop.
//!
//! The handler owns the train/test splits in proxy space, keeps their
//! statistics current, and is the only place allowed to mutate them. All
//! energies it stores are target-scaled; normalization is an invertible view
//! applied on top and always undone before appending new data.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::env::{Environment, State};
use crate::error::DataError;
use crate::loader::DataLoader;
use crate::logger::RunLogger;
use crate::scaling::{denormalize, normalize, Stats, TargetFactor};

/// How the seed pool is divided into train and test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Shuffle the pool, first `train_fraction` goes to train.
    Random,
    /// Everything to train, test split stays empty.
    AllTrain,
    /// The environment supplies explicit train and test sets.
    Given,
}

impl SplitPolicy {
    pub fn parse(s: &str) -> Result<Self, DataError> {
        match s {
            "random" => Ok(SplitPolicy::Random),
            "all_train" => Ok(SplitPolicy::AllTrain),
            "given" => Ok(SplitPolicy::Given),
            other => Err(DataError::UnknownSplit(other.to_string())),
        }
    }
}

/// Construction parameters for [`DataHandler`].
#[derive(Debug, Clone)]
pub struct DataHandlerConfig {
    /// Split policy name, parsed with [`SplitPolicy::parse`].
    pub split: String,
    /// Fraction of the pool routed to train under the `random` policy.
    pub train_fraction: f64,
    /// Seed pool size requested from the environment.
    pub n_samples: usize,
    pub batch_size: usize,
    /// Min-max normalize stored energies.
    pub normalize: bool,
    pub seed: u64,
}

impl Default for DataHandlerConfig {
    fn default() -> Self {
        Self {
            split: "random".to_string(),
            train_fraction: 0.9,
            n_samples: 100,
            batch_size: 64,
            normalize: true,
            seed: 0,
        }
    }
}

/// One split's storage: proxy rows plus (possibly normalized) energies.
#[derive(Debug, Clone, Default)]
struct Split {
    states: Vec<Vec<f64>>,
    energies: Vec<f64>,
    stats: Stats,
}

/// Owns the train/test datasets for one run.
#[derive(Debug)]
pub struct DataHandler<E: Environment> {
    env: E,
    logger: RunLogger,
    policy: SplitPolicy,
    batch_size: usize,
    normalize: bool,
    target_factor: TargetFactor,
    rng: StdRng,
    train: Split,
    /// `None` under `all_train`; new data is then routed entirely to train.
    test: Option<Split>,
}

/// Probability that a freshly queried item lands in the test split.
const TEST_ROUTE_P: f64 = 1.0 / 10.0;

impl<E: Environment> DataHandler<E> {
    /// Build the handler and its seed dataset.
    ///
    /// Energies are target-scaled before any split-dependent transform, so
    /// both splits and all statistics live on the same sign convention.
    pub fn new(
        env: E,
        maximize: bool,
        is_mes: bool,
        config: &DataHandlerConfig,
        logger: RunLogger,
    ) -> Result<Self, DataError> {
        let policy = SplitPolicy::parse(&config.split)?;
        let target_factor = TargetFactor::resolve(maximize, is_mes);
        let mut rng = StdRng::seed_from_u64(config.seed);

        let data = env.initialize_dataset(config.n_samples, config.seed);

        let (train_raw, test_raw) = match policy {
            SplitPolicy::Random => {
                if data.pool_states.is_empty() {
                    return Err(DataError::EmptyDataset);
                }
                let scaled = target_factor.apply(&data.pool_energies);
                let mut index: Vec<usize> = (0..data.pool_states.len()).collect();
                use rand::seq::SliceRandom;
                index.shuffle(&mut rng);
                let cut = (data.pool_states.len() as f64 * config.train_fraction) as usize;
                let pick = |idx: &[usize]| -> (Vec<State>, Vec<f64>) {
                    (
                        idx.iter().map(|&i| data.pool_states[i].clone()).collect(),
                        idx.iter().map(|&i| scaled[i]).collect(),
                    )
                };
                (pick(&index[..cut]), Some(pick(&index[cut..])))
            }
            SplitPolicy::AllTrain => {
                if data.pool_states.is_empty() {
                    return Err(DataError::EmptyDataset);
                }
                let scaled = target_factor.apply(&data.pool_energies);
                ((data.pool_states.clone(), scaled), None)
            }
            SplitPolicy::Given => {
                let (train_states, train_energies) =
                    data.train.clone().ok_or(DataError::MissingSplit("train"))?;
                let (test_states, test_energies) =
                    data.test.clone().ok_or(DataError::MissingSplit("test"))?;
                (
                    (train_states, target_factor.apply(&train_energies)),
                    Some((test_states, target_factor.apply(&test_energies))),
                )
            }
        };

        let mut handler = Self {
            env,
            logger,
            policy,
            batch_size: config.batch_size,
            normalize: config.normalize,
            target_factor,
            rng,
            train: Split::default(),
            test: None,
        };

        handler.train = handler.build_split(train_raw, "train")?;
        if let Some(test_raw) = test_raw {
            let split = handler.build_split(test_raw, "test")?;
            handler.test = Some(split);
        }
        handler.log_stats();
        Ok(handler)
    }

    /// Persist the readable projection, project to proxy space, then apply
    /// [`Self::preprocess`].
    fn build_split(
        &self,
        (states, energies): (Vec<State>, Vec<f64>),
        name: &'static str,
    ) -> Result<Split, DataError> {
        let readable: Vec<(String, f64)> = states
            .iter()
            .zip(&energies)
            .map(|(s, &e)| (self.env.state2readable(s), e))
            .collect();
        self.logger.save_dataset(&readable, name)?;

        let rows = self.env.statebatch2proxy(&states).into_rows();
        let (stored, stats) = self.preprocess(&energies);
        Ok(Split { states: rows, energies: stored, stats })
    }

    /// Pure preprocessing step: compute statistics, normalize if configured.
    ///
    /// Never touches handler state; callers decide where the result lands.
    pub fn preprocess(&self, energies: &[f64]) -> (Vec<f64>, Stats) {
        let stats = Stats::from_energies(energies);
        let stored = if self.normalize {
            normalize(energies, &stats)
        } else {
            energies.to_vec()
        };
        (stored, stats)
    }

    /// Fold freshly queried states and oracle energies into the dataset.
    ///
    /// Routing is per-item Bernoulli(1/10) into test. The stored energies are
    /// denormalized with the stale statistics, appended in target-scaled
    /// space, and only then re-normalized with freshly computed statistics;
    /// skipping the denormalization step would mix two different scales.
    pub fn update_dataset(
        &mut self,
        states: &[State],
        energies: &[f64],
    ) -> Result<(), DataError> {
        if states.len() != energies.len() {
            return Err(DataError::LengthMismatch {
                states: states.len(),
                energies: energies.len(),
            });
        }

        // Raw oracle energies for the sampled-history CSV.
        let sampled: Vec<(String, f64)> = states
            .iter()
            .zip(energies)
            .map(|(s, &e)| (self.env.state2readable(s), e))
            .collect();
        self.logger.save_dataset(&sampled, "sampled")?;

        let scaled = self.target_factor.apply(energies);
        let rows = self.env.statebatch2proxy(states).into_rows();

        let mut train_add: Vec<(Vec<f64>, f64, String)> = Vec::new();
        let mut test_add: Vec<(Vec<f64>, f64, String)> = Vec::new();
        for ((row, &energy), state) in rows.into_iter().zip(&scaled).zip(states) {
            let readable = self.env.state2readable(state);
            let to_test = self.test.is_some() && self.rng.gen::<f64>() < TEST_ROUTE_P;
            if to_test {
                test_add.push((row, energy, readable));
            } else {
                train_add.push((row, energy, readable));
            }
        }

        // Back to target-scaled space before appending.
        if self.normalize {
            self.train.energies = denormalize(&self.train.energies, &self.train.stats);
            if let Some(test) = self.test.as_mut() {
                test.energies = denormalize(&test.energies, &test.stats);
            }
        }

        let append = |split: &mut Split, add: Vec<(Vec<f64>, f64, String)>| -> Vec<(String, f64)> {
            let mut readable = Vec::with_capacity(add.len());
            for (row, energy, text) in add {
                split.states.push(row);
                split.energies.push(energy);
                readable.push((text, energy));
            }
            readable
        };
        let train_readable = append(&mut self.train, train_add);
        let test_readable = self
            .test
            .as_mut()
            .map(|test| append(test, test_add))
            .unwrap_or_default();

        // Fresh statistics over the grown splits, then back to the
        // normalized view.
        self.train.stats = Stats::from_energies(&self.train.energies);
        if self.normalize {
            self.train.energies = normalize(&self.train.energies, &self.train.stats);
        }
        if let Some(test) = self.test.as_mut() {
            test.stats = Stats::from_energies(&test.energies);
            if self.normalize {
                test.energies = normalize(&test.energies, &test.stats);
            }
        }

        if !train_readable.is_empty() {
            self.logger.save_dataset(&train_readable, "train")?;
        }
        if !test_readable.is_empty() {
            self.logger.save_dataset(&test_readable, "test")?;
        }
        self.log_stats();
        Ok(())
    }

    /// Train and test loaders over the current splits.
    ///
    /// Train reshuffles every pass; test keeps dataset order so repeated
    /// evaluations see identical batches.
    pub fn get_dataloader(&self) -> (DataLoader, DataLoader) {
        let train = DataLoader::new(
            self.train.states.clone(),
            self.train.energies.clone(),
            self.batch_size,
            true,
        );
        let (test_states, test_energies) = match &self.test {
            Some(test) => (test.states.clone(), test.energies.clone()),
            None => (Vec::new(), Vec::new()),
        };
        let test = DataLoader::new(test_states, test_energies, self.batch_size, false);
        (train, test)
    }

    fn log_stats(&self) {
        self.logger
            .log_dataset_stats("train", &self.train.stats, self.train.energies.len());
        if let Some(test) = &self.test {
            self.logger
                .log_dataset_stats("test", &test.stats, test.energies.len());
        }
    }

    pub fn train_len(&self) -> usize {
        self.train.energies.len()
    }

    pub fn test_len(&self) -> usize {
        self.test.as_ref().map_or(0, |t| t.energies.len())
    }

    pub fn train_stats(&self) -> &Stats {
        &self.train.stats
    }

    pub fn test_stats(&self) -> Option<&Stats> {
        self.test.as_ref().map(|t| &t.stats)
    }

    pub fn target_factor(&self) -> TargetFactor {
        self.target_factor
    }

    pub fn split_policy(&self) -> SplitPolicy {
        self.policy
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }
}
