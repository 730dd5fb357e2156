//! MC-dropout neural regressor.
//!
//! A fresh network is initialized on every fit: retraining round N's weights
//! on round N+1's grown dataset overweights the earliest queries (primacy
//! bias), so the model always restarts from scratch on the full data.
//! Predictive uncertainty comes from keeping dropout active at inference and
//! treating repeated forward passes as an ensemble.

use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use dataset::{DataLoader, RunLogger};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bridge::{energies_to_tensor, rows_to_tensor, tensor_to_vec};
use crate::error::SurrogateError;
use crate::metrics::{self, EvalMetrics};
use crate::mlp::{Mlp, MlpConfig, MultiFidelityMlp, MultiFidelityMlpConfig};
use crate::regressor::{FitReport, Posterior, SurrogateRegressor};

/// Network architecture behind the dropout regressor.
#[derive(Debug, Clone)]
pub enum NetSpec {
    Plain(MlpConfig),
    MultiFidelity(MultiFidelityMlpConfig),
}

/// The network itself; both variants share the `(batch, width) -> (batch,)`
/// forward contract.
#[derive(Module, Debug)]
pub enum SurrogateNet<B: Backend> {
    Plain(Mlp<B>),
    MultiFidelity(MultiFidelityMlp<B>),
}

impl<B: Backend> SurrogateNet<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            SurrogateNet::Plain(net) => net.forward(x),
            SurrogateNet::MultiFidelity(net) => net.forward(x),
        }
    }
}

/// Training hyperparameters for [`DropoutRegressor`].
#[derive(Config, Debug)]
pub struct DropoutRegressorConfig {
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 0.0)]
    pub weight_decay: f64,
    #[config(default = 0.9)]
    pub beta1: f64,
    #[config(default = 0.999)]
    pub beta2: f64,
    #[config(default = 200)]
    pub max_epochs: usize,
    /// Convergence window length in epochs; must not exceed `max_epochs`.
    #[config(default = 5)]
    pub history: usize,
    /// Relative flatness threshold on the held-out error window.
    #[config(default = 0.01)]
    pub eps: f64,
    /// Also stop when the held-out error rises strictly across the window.
    /// Off by default: a rising holdout error is noisy evidence at these
    /// dataset sizes and routinely fires on the first noisy window.
    #[config(default = false)]
    pub stop_on_rising_holdout: bool,
    /// Ensemble size of `forward_with_uncertainty`.
    #[config(default = 10)]
    pub num_dropout_samples: usize,
    #[config(default = 0)]
    pub seed: u64,
}

/// Checkpoint sidecar, one per checkpoint directory.
#[derive(serde::Serialize, serde::Deserialize, Debug)]
struct CheckpointMeta {
    epoch: usize,
    test_loss: f64,
}

/// Decide whether training has converged at `epoch`.
///
/// Criteria, mirroring the window indexing of the fit loop:
/// (a) every error in the window after the anchor is strictly above the
///     anchor (enabled by `stop_on_rising_holdout`),
/// (b) the anchor sits within `eps` relative distance of the window mean,
/// (c) `epoch` reached `max_epochs`.
pub fn check_convergence(
    err_test_hist: &[f64],
    epoch: usize,
    history: usize,
    eps: f64,
    max_epochs: usize,
    stop_on_rising_holdout: bool,
) -> Option<&'static str> {
    if err_test_hist.len() >= history {
        let window = &err_test_hist[err_test_hist.len() - history..];
        let anchor = window[0];
        if stop_on_rising_holdout && window[1..].iter().all(|&l| l > anchor) {
            return Some("test loss rising");
        }
        if anchor != 0.0 {
            let avg = window.iter().sum::<f64>() / history as f64;
            if ((anchor - avg) / anchor).abs() < eps {
                return Some("test loss flat");
            }
        }
    }
    if epoch >= max_epochs {
        return Some("max epochs");
    }
    None
}

/// MLP regressor with MC-dropout uncertainty.
pub struct DropoutRegressor<B: AutodiffBackend> {
    spec: NetSpec,
    config: DropoutRegressorConfig,
    logger: RunLogger,
    device: B::Device,
    model: Option<SurrogateNet<B>>,
}

impl<B: AutodiffBackend> DropoutRegressor<B> {
    pub fn new(
        spec: NetSpec,
        config: DropoutRegressorConfig,
        logger: RunLogger,
        device: B::Device,
    ) -> Self {
        assert!(config.history <= config.max_epochs);
        Self { spec, config, logger, device, model: None }
    }

    fn init_net(&self) -> SurrogateNet<B> {
        match &self.spec {
            NetSpec::Plain(cfg) => SurrogateNet::Plain(cfg.init(&self.device)),
            NetSpec::MultiFidelity(cfg) => SurrogateNet::MultiFidelity(cfg.init(&self.device)),
        }
    }

    /// Mean squared error over a full split, dropout disabled.
    fn split_mse(&self, model: &SurrogateNet<B>, loader: &DataLoader) -> f64 {
        let valid = model.valid();
        // Unshuffled loaders ignore the rng.
        let mut rng = StdRng::seed_from_u64(0);
        let mut total = 0.0;
        let mut count = 0usize;
        for batch in loader.batches(&mut rng) {
            let x = rows_to_tensor::<B::InnerBackend>(&batch.states, &self.device);
            let y = energies_to_tensor::<B::InnerBackend>(&batch.energies, &self.device);
            let se: f64 = (valid.forward(x) - y)
                .powf_scalar(2.0)
                .sum()
                .into_scalar()
                .elem::<f32>() as f64;
            total += se;
            count += batch.energies.len();
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    fn save_checkpoint(
        &self,
        model: &SurrogateNet<B>,
        optimizer_record: impl burn::record::Record<B>,
        tag: &str,
        epoch: usize,
        test_loss: f64,
    ) -> Result<(), SurrogateError> {
        let dir = self.logger.proxy_checkpoint_dir(tag);
        std::fs::create_dir_all(&dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        model
            .clone()
            .save_file(dir.join("model"), &recorder)
            .map_err(|e| SurrogateError::Recorder(e.to_string()))?;
        recorder
            .record(optimizer_record, dir.join("optimizer"))
            .map_err(|e| SurrogateError::Recorder(e.to_string()))?;
        serde_json::to_writer(
            std::fs::File::create(dir.join("meta.json"))?,
            &CheckpointMeta { epoch, test_loss },
        )?;
        tracing::debug!(tag, epoch, "Saved regressor checkpoint");
        Ok(())
    }

    /// MC-dropout ensemble: repeated stochastic forward passes.
    ///
    /// Runs on the autodiff module, where dropout stays active; `valid()`
    /// would silently collapse the ensemble to its mean.
    pub fn forward_with_uncertainty(
        &self,
        states: &[Vec<f64>],
        num_samples: usize,
    ) -> Result<Vec<Vec<f64>>, SurrogateError> {
        let model = self.model.as_ref().ok_or(SurrogateError::NotFitted)?;
        let x = rows_to_tensor::<B>(states, &self.device);
        let mut ensemble = vec![Vec::with_capacity(num_samples); states.len()];
        for _ in 0..num_samples {
            let pred = tensor_to_vec(model.forward(x.clone()).inner());
            for (row, value) in ensemble.iter_mut().zip(pred) {
                row.push(value);
            }
        }
        Ok(ensemble)
    }
}

impl<B: AutodiffBackend> SurrogateRegressor for DropoutRegressor<B> {
    fn fit(&mut self, train: &DataLoader, test: &DataLoader) -> Result<FitReport, SurrogateError> {
        if train.is_empty() {
            return Err(SurrogateError::EmptySplit("train"));
        }

        let mut model = self.init_net();
        let mut optim_config = AdamWConfig::new()
            .with_beta_1(self.config.beta1 as f32)
            .with_beta_2(self.config.beta2 as f32);
        if self.config.weight_decay > 0.0 {
            optim_config = optim_config.with_weight_decay(self.config.weight_decay as f32);
        }
        let mut optimizer = optim_config.init();
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut err_test_hist: Vec<f64> = Vec::new();
        let mut stop_reason: Option<&'static str> = None;
        let mut last_epoch = 0;

        for epoch in 1..=self.config.max_epochs {
            last_epoch = epoch;

            // Held-out error first, then checkpoint, then the training step:
            // the checkpoint at epoch N reflects the weights the error was
            // measured on. Without a test split the train error stands in.
            let test_loss = if test.is_empty() {
                self.split_mse(&model, train)
            } else {
                self.split_mse(&model, test)
            };
            err_test_hist.push(test_loss);

            if self.logger.should_save_proxy(epoch, false) {
                self.save_checkpoint(
                    &model,
                    optimizer.to_record(),
                    &RunLogger::epoch_tag(epoch),
                    epoch,
                    test_loss,
                )?;
            }

            let mut train_loss = 0.0;
            let mut batches = 0usize;
            for batch in train.batches(&mut rng) {
                let x = rows_to_tensor::<B>(&batch.states, &self.device);
                let y = energies_to_tensor::<B>(&batch.energies, &self.device);
                let loss = (model.forward(x) - y).powf_scalar(2.0).mean();
                train_loss += loss.clone().into_scalar().elem::<f32>() as f64;
                batches += 1;
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(self.config.lr, model, grads);
            }

            if epoch > self.config.history {
                stop_reason = check_convergence(
                    &err_test_hist,
                    epoch,
                    self.config.history,
                    self.config.eps,
                    self.config.max_epochs,
                    self.config.stop_on_rising_holdout,
                );
            }
            if let Some(reason) = stop_reason {
                tracing::info!(
                    epoch,
                    reason,
                    test_mse = format!("{test_loss:.6}"),
                    "Regressor converged"
                );
                self.save_checkpoint(&model, optimizer.to_record(), "final", epoch, test_loss)?;
                break;
            }
            tracing::debug!(
                epoch,
                train_mse = format!("{:.6}", train_loss / batches.max(1) as f64),
                test_mse = format!("{test_loss:.6}"),
                "Epoch complete"
            );
        }

        let reason = match stop_reason {
            Some(reason) => reason,
            None => {
                // max_epochs below the history window: the criterion never
                // ran, so close out here.
                let last = err_test_hist.last().copied().unwrap_or(f64::NAN);
                self.save_checkpoint(&model, optimizer.to_record(), "final", last_epoch, last)?;
                "max epochs"
            }
        };

        let final_test_loss = err_test_hist.last().copied().unwrap_or(f64::NAN);
        self.model = Some(model);
        Ok(FitReport {
            epochs: last_epoch,
            final_test_loss,
            stop_reason: reason.to_string(),
        })
    }

    fn posterior(&self, states: &[Vec<f64>]) -> Result<Posterior, SurrogateError> {
        let ensemble = self.forward_with_uncertainty(states, self.config.num_dropout_samples)?;
        let mut mean = Vec::with_capacity(ensemble.len());
        let mut var = Vec::with_capacity(ensemble.len());
        for row in &ensemble {
            let n = row.len() as f64;
            let m = row.iter().sum::<f64>() / n;
            mean.push(m);
            var.push(row.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n);
        }
        Ok(Posterior { mean, var })
    }

    fn sample_ensemble(
        &self,
        states: &[Vec<f64>],
        num_samples: usize,
    ) -> Result<Vec<Vec<f64>>, SurrogateError> {
        self.forward_with_uncertainty(states, num_samples)
    }

    fn evaluate(&self, loader: &DataLoader) -> Result<EvalMetrics, SurrogateError> {
        let mut rng = StdRng::seed_from_u64(0);
        let mut means = Vec::with_capacity(loader.len());
        let mut vars = Vec::with_capacity(loader.len());
        let mut targets = Vec::with_capacity(loader.len());
        for batch in loader.batches(&mut rng) {
            let posterior = self.posterior(&batch.states)?;
            means.extend(posterior.mean);
            vars.extend(posterior.var);
            targets.extend(batch.energies);
        }
        assert_eq!(means.len(), loader.len(), "evaluation must cover the whole split");
        Ok(metrics::regression_metrics(&means, &vars, &targets))
    }

    fn load_final(&mut self) -> Result<(), SurrogateError> {
        let dir = self.logger.final_checkpoint_dir();
        if !dir.join("model.mpk").exists() {
            return Err(SurrogateError::MissingCheckpoint(dir));
        }
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let model = self
            .init_net()
            .load_file(dir.join("model"), &recorder, &self.device)
            .map_err(|e| SurrogateError::Recorder(e.to_string()))?;
        self.model = Some(model);
        tracing::debug!(dir = %dir.display(), "Loaded final regressor checkpoint");
        Ok(())
    }
}
