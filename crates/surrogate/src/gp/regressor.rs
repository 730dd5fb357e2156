//! Variational GP regressor: feature encoder, param groups, fit loop,
//! early stopping.
//!
//! Learnable parameters are partitioned into named groups (encoder, kernel
//! hyperparameters, noise, inducing points), each stepped by its own Adam at
//! its own learning rate; joint optimization at a single rate is unstable
//! once an encoder sits in front of the kernel. Gradients are central finite
//! differences of the negative ELBO. The variational distribution itself is
//! never a gradient parameter: it is refreshed in closed form every epoch.

use dataset::{DataLoader, RunLogger};
use nalgebra::{DMatrix, DVector};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::error::SurrogateError;
use crate::gp::kernel::{ArdKernel, IndexKernel, KernelComposition, StationaryKind};
use crate::gp::svgp::Svgp;
use crate::metrics::{self, EvalMetrics};
use crate::regressor::{FitReport, Posterior, SurrogateRegressor};

/// How the fidelity column of the input rows enters the covariance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FidelityHandling {
    /// Single-fidelity: the whole row is kernel (or encoder) input.
    None,
    /// The fidelity index is one more raw feature, fed to the shared
    /// encoder/kernel like any other column.
    AsInput,
    /// Product of a state kernel and a rank-`rank` index kernel over the
    /// trailing fidelity column; the column bypasses the encoder.
    ProductIndex { rank: usize },
}

/// Configuration for [`SvgpRegressor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvgpConfig {
    pub kind: StationaryKind,
    pub fidelity: FidelityHandling,
    /// Number of fidelity levels; only read under `ProductIndex`.
    pub n_fid: usize,
    pub n_inducing: usize,
    /// Deep-kernel feature width; `None` runs the kernel on raw rows.
    pub encoder_dim: Option<usize>,
    pub noise_init: f64,
    pub noise_lb: f64,
    /// KL weight in the ELBO.
    pub mll_beta: f64,
    pub max_epochs: usize,
    /// Held-out evaluation every this many epochs.
    pub eval_period: usize,
    /// Early-stopping patience, counted in evaluation periods.
    pub patience: usize,
    pub lr_encoder: f64,
    pub lr_hypers: f64,
    pub lr_noise: f64,
    pub lr_inducing: f64,
    pub seed: u64,
}

impl Default for SvgpConfig {
    fn default() -> Self {
        Self {
            kind: StationaryKind::Matern52,
            fidelity: FidelityHandling::None,
            n_fid: 1,
            n_inducing: 32,
            encoder_dim: None,
            noise_init: 1e-2,
            noise_lb: 1e-4,
            mll_beta: 1.0,
            max_epochs: 50,
            eval_period: 5,
            patience: 3,
            lr_encoder: 0.01,
            lr_hypers: 0.05,
            lr_noise: 0.02,
            lr_inducing: 0.01,
            seed: 0,
        }
    }
}

/// One-layer tanh feature map in front of the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearEncoder {
    /// `out × in` weights.
    w: DMatrix<f64>,
    b: DVector<f64>,
}

impl LinearEncoder {
    fn new(in_dim: usize, out_dim: usize, rng: &mut StdRng) -> Self {
        let scale = (1.0 / in_dim as f64).sqrt();
        Self {
            w: DMatrix::from_fn(out_dim, in_dim, |_, _| (rng.gen::<f64>() * 2.0 - 1.0) * scale),
            b: DVector::zeros(out_dim),
        }
    }

    pub fn out_dim(&self) -> usize {
        self.w.nrows()
    }

    /// `z = tanh(x Wᵀ + b)`, row-wise.
    fn encode(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut z = x * self.w.transpose();
        for i in 0..z.nrows() {
            for j in 0..z.ncols() {
                z[(i, j)] = (z[(i, j)] + self.b[j]).tanh();
            }
        }
        z
    }

    fn params(&self) -> Vec<f64> {
        let mut p: Vec<f64> = self.w.iter().copied().collect();
        p.extend(self.b.iter().copied());
        p
    }

    fn set_params(&mut self, p: &[f64]) {
        let nw = self.w.len();
        debug_assert_eq!(p.len(), nw + self.b.len());
        for (dst, &src) in self.w.iter_mut().zip(&p[..nw]) {
            *dst = src;
        }
        for (dst, &src) in self.b.iter_mut().zip(&p[nw..]) {
            *dst = src;
        }
    }
}

/// Named parameter group with its own learning rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamGroupId {
    Encoder,
    Hypers,
    Noise,
    Inducing,
}

/// Per-group Adam state.
///
/// Plain scalar Adam over a flat parameter vector; moments are lazily sized
/// on the first step.
struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: usize,
}

impl Adam {
    fn new(lr: f64) -> Self {
        Self { lr, beta1: 0.9, beta2: 0.999, epsilon: 1e-8, m: Vec::new(), v: Vec::new(), t: 0 }
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64]) {
        debug_assert_eq!(params.len(), grads.len());
        if self.m.len() != params.len() {
            self.m = vec![0.0; params.len()];
            self.v = vec![0.0; params.len()];
            self.t = 0;
        }
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        for i in 0..params.len() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grads[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grads[i] * grads[i];
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

/// Checkpoint payload persisted as JSON.
#[derive(Serialize, Deserialize)]
struct GpCheckpoint {
    config: SvgpConfig,
    gp: Svgp,
    encoder: Option<LinearEncoder>,
    epoch: usize,
    best_nll: f64,
}

/// Fitted state, snapshot as one unit for best-weights tracking.
#[derive(Clone)]
struct GpState {
    gp: Svgp,
    encoder: Option<LinearEncoder>,
}

impl GpState {
    /// Kernel-space features for raw proxy rows. Under `ProductIndex` the
    /// trailing fidelity column bypasses the encoder and is re-appended.
    fn features(
        &self,
        fidelity: FidelityHandling,
        x: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, SurrogateError> {
        let encoder = match &self.encoder {
            None => return Ok(x.clone()),
            Some(e) => e,
        };
        match fidelity {
            FidelityHandling::None | FidelityHandling::AsInput => Ok(encoder.encode(x)),
            FidelityHandling::ProductIndex { .. } => {
                if x.ncols() < 2 {
                    return Err(SurrogateError::Shape(
                        "product kernel input needs features plus a fidelity column".to_string(),
                    ));
                }
                let state = x.columns(0, x.ncols() - 1).into_owned();
                let z = encoder.encode(&state);
                let mut out = DMatrix::zeros(x.nrows(), z.ncols() + 1);
                out.columns_mut(0, z.ncols()).copy_from(&z);
                out.column_mut(z.ncols()).copy_from(&x.column(x.ncols() - 1));
                Ok(out)
            }
        }
    }

    fn elbo(
        &self,
        fidelity: FidelityHandling,
        x_raw: &DMatrix<f64>,
        y: &DVector<f64>,
        n_total: usize,
        mll_beta: f64,
    ) -> Result<f64, SurrogateError> {
        let z = self.features(fidelity, x_raw)?;
        self.gp.elbo(&z, y, n_total, mll_beta)
    }

    fn group_params(&self, id: ParamGroupId) -> Vec<f64> {
        match id {
            ParamGroupId::Encoder => self.encoder.as_ref().map(LinearEncoder::params).unwrap_or_default(),
            ParamGroupId::Hypers => self.gp.kernel.params(),
            ParamGroupId::Noise => vec![self.gp.log_noise],
            ParamGroupId::Inducing => self.gp.inducing.iter().copied().collect(),
        }
    }

    fn set_group_params(&mut self, id: ParamGroupId, values: &[f64]) {
        match id {
            ParamGroupId::Encoder => {
                if let Some(encoder) = &mut self.encoder {
                    encoder.set_params(values);
                }
            }
            ParamGroupId::Hypers => self.gp.kernel.set_params(values),
            ParamGroupId::Noise => self.gp.log_noise = values[0],
            ParamGroupId::Inducing => {
                for (dst, &src) in self.gp.inducing.iter_mut().zip(values) {
                    *dst = src;
                }
            }
        }
    }

    /// Central finite-difference gradient of the negative ELBO for one group.
    fn group_grad(
        &mut self,
        id: ParamGroupId,
        fidelity: FidelityHandling,
        x_raw: &DMatrix<f64>,
        y: &DVector<f64>,
        n_total: usize,
        mll_beta: f64,
    ) -> Result<Vec<f64>, SurrogateError> {
        let base = self.group_params(id);
        let mut grads = vec![0.0; base.len()];
        for i in 0..base.len() {
            let h = 1e-4 * base[i].abs().max(1.0);
            let mut up = base.clone();
            up[i] += h;
            self.set_group_params(id, &up);
            let f_up = self.elbo(fidelity, x_raw, y, n_total, mll_beta)?;
            let mut down = base.clone();
            down[i] -= h;
            self.set_group_params(id, &down);
            let f_down = self.elbo(fidelity, x_raw, y, n_total, mll_beta)?;
            grads[i] = -(f_up - f_down) / (2.0 * h);
        }
        self.set_group_params(id, &base);
        Ok(grads)
    }
}

/// Sparse variational GP regressor over proxy-space rows, optionally with a
/// learned feature encoder in front of the kernel.
pub struct SvgpRegressor {
    config: SvgpConfig,
    logger: RunLogger,
    state: Option<GpState>,
}

impl SvgpRegressor {
    pub fn new(config: SvgpConfig, logger: RunLogger) -> Self {
        Self { config, logger, state: None }
    }

    pub fn gp(&self) -> Option<&Svgp> {
        self.state.as_ref().map(|s| &s.gp)
    }

    fn rows_to_matrix(states: &[Vec<f64>]) -> Result<DMatrix<f64>, SurrogateError> {
        if states.is_empty() {
            return Err(SurrogateError::Shape("empty state batch".to_string()));
        }
        let width = states[0].len();
        if states.iter().any(|r| r.len() != width) {
            return Err(SurrogateError::Shape("ragged state batch".to_string()));
        }
        Ok(DMatrix::from_fn(states.len(), width, |i, j| states[i][j]))
    }

    /// Kernel over the feature space the encoder (if any) produces.
    fn build_kernel(&self, raw_width: usize) -> KernelComposition {
        match self.config.fidelity {
            FidelityHandling::None | FidelityHandling::AsInput => {
                let dims = self.config.encoder_dim.unwrap_or(raw_width);
                KernelComposition::Stationary(ArdKernel::new(self.config.kind, dims))
            }
            FidelityHandling::ProductIndex { rank } => {
                let dims = self.config.encoder_dim.unwrap_or(raw_width - 1);
                KernelComposition::ProductFidelity {
                    state: ArdKernel::new(self.config.kind, dims),
                    index: IndexKernel::new(self.config.n_fid, rank),
                }
            }
        }
    }

    /// Closed-form variational refresh over the full training set.
    ///
    /// The product-index composition runs the batched per-task path, wrapping
    /// the noise as a diagonal operator over the batch; the stationary
    /// compositions use the uniform scalar path.
    fn refresh_variational(
        &self,
        state: &mut GpState,
        x_raw: &DMatrix<f64>,
        y: &DVector<f64>,
    ) -> Result<(), SurrogateError> {
        let z = state.features(self.config.fidelity, x_raw)?;
        match state.gp.kernel {
            KernelComposition::ProductFidelity { .. } => {
                let diag = DVector::from_element(z.nrows(), state.gp.noise());
                state.gp.initialize_var_dist_sgpr(&z, y, Some(&diag))
            }
            KernelComposition::Stationary(_) => state.gp.initialize_var_dist_sgpr(&z, y, None),
        }
    }

    /// Held-out NLL, the early-stopping signal.
    fn holdout_nll(&self, state: &GpState, loader: &DataLoader) -> Result<f64, SurrogateError> {
        let x = Self::rows_to_matrix(loader.states())?;
        let z = state.features(self.config.fidelity, &x)?;
        let (mean, var) = state.gp.posterior(&z)?;
        let means: Vec<f64> = mean.iter().copied().collect();
        let noise = state.gp.noise();
        let vars: Vec<f64> = var.iter().map(|v| v + noise).collect();
        Ok(metrics::gaussian_nll(&means, &vars, loader.energies()))
    }

    fn save_checkpoint(
        &self,
        state: &GpState,
        epoch: usize,
        best_nll: f64,
    ) -> Result<(), SurrogateError> {
        let dir = self.logger.final_checkpoint_dir();
        std::fs::create_dir_all(&dir)?;
        serde_json::to_writer(
            std::fs::File::create(dir.join("gp.json"))?,
            &GpCheckpoint {
                config: self.config.clone(),
                gp: state.gp.clone(),
                encoder: state.encoder.clone(),
                epoch,
                best_nll,
            },
        )?;
        tracing::debug!(epoch, "Saved GP checkpoint");
        Ok(())
    }
}

impl SurrogateRegressor for SvgpRegressor {
    fn fit(&mut self, train: &DataLoader, test: &DataLoader) -> Result<FitReport, SurrogateError> {
        if train.is_empty() {
            return Err(SurrogateError::EmptySplit("train"));
        }
        let x_train = Self::rows_to_matrix(train.states())?;
        let y_train = DVector::from_column_slice(train.energies());
        let n_total = train.len();
        let raw_width = x_train.ncols();

        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let encoder = self.config.encoder_dim.map(|out_dim| {
            let in_dim = match self.config.fidelity {
                FidelityHandling::None | FidelityHandling::AsInput => raw_width,
                FidelityHandling::ProductIndex { .. } => raw_width - 1,
            };
            LinearEncoder::new(in_dim, out_dim, &mut rng)
        });
        let kernel = self.build_kernel(raw_width);

        // Inducing locations start on a random subset of the training rows,
        // mapped into feature space.
        let mut state = GpState {
            gp: Svgp::new(
                kernel,
                DMatrix::zeros(0, 0),
                self.config.noise_init,
                self.config.noise_lb,
            ),
            encoder,
        };
        let z_train = state.features(self.config.fidelity, &x_train)?;
        let m = self.config.n_inducing.min(n_total);
        let mut idx: Vec<usize> = (0..n_total).collect();
        idx.shuffle(&mut rng);
        state.gp.inducing = DMatrix::from_fn(m, z_train.ncols(), |i, j| z_train[(idx[i], j)]);
        self.refresh_variational(&mut state, &x_train, &y_train)?;

        let groups: Vec<(ParamGroupId, f64)> = vec![
            (ParamGroupId::Encoder, self.config.lr_encoder),
            (ParamGroupId::Hypers, self.config.lr_hypers),
            (ParamGroupId::Noise, self.config.lr_noise),
            (ParamGroupId::Inducing, self.config.lr_inducing),
        ];
        let mut optimizers: Vec<Adam> = groups.iter().map(|&(_, lr)| Adam::new(lr)).collect();

        let holdout = if test.is_empty() { train } else { test };
        let mut best = state.clone();
        let mut best_nll = self.holdout_nll(&state, holdout)?;
        let mut bad_evals = 0usize;
        let mut last_epoch = 0;
        let mut stop_reason = "max epochs";

        for epoch in 1..=self.config.max_epochs {
            last_epoch = epoch;
            for batch in train.batches(&mut rng) {
                let x = Self::rows_to_matrix(&batch.states)?;
                let y = DVector::from_column_slice(&batch.energies);
                for (&(id, _), adam) in groups.iter().zip(&mut optimizers) {
                    let mut params = state.group_params(id);
                    if params.is_empty() {
                        continue;
                    }
                    let grads = state.group_grad(
                        id,
                        self.config.fidelity,
                        &x,
                        &y,
                        n_total,
                        self.config.mll_beta,
                    )?;
                    adam.step(&mut params, &grads);
                    state.set_group_params(id, &params);
                }
            }
            // Closed-form variational refresh under the updated
            // hyperparameters and encoder.
            self.refresh_variational(&mut state, &x_train, &y_train)?;

            if epoch % self.config.eval_period == 0 {
                let nll = self.holdout_nll(&state, holdout)?;
                tracing::debug!(epoch, nll = format!("{nll:.6}"), "GP holdout evaluation");
                if nll < best_nll {
                    best_nll = nll;
                    best = state.clone();
                    bad_evals = 0;
                } else {
                    bad_evals += 1;
                    if bad_evals > self.config.patience {
                        stop_reason = "early stopping";
                        break;
                    }
                }
            }
        }

        // Best weights win; the final refresh rebuilds the variational state
        // against the full training set under those weights, so subsequent
        // posterior calls are consistent with the snapshot.
        state = best;
        self.refresh_variational(&mut state, &x_train, &y_train)?;
        self.save_checkpoint(&state, last_epoch, best_nll)?;
        tracing::info!(
            epochs = last_epoch,
            reason = stop_reason,
            nll = format!("{best_nll:.6}"),
            "GP fit complete"
        );
        self.state = Some(state);
        Ok(FitReport {
            epochs: last_epoch,
            final_test_loss: best_nll,
            stop_reason: stop_reason.to_string(),
        })
    }

    fn posterior(&self, states: &[Vec<f64>]) -> Result<Posterior, SurrogateError> {
        let state = self.state.as_ref().ok_or(SurrogateError::NotFitted)?;
        let x = Self::rows_to_matrix(states)?;
        let z = state.features(self.config.fidelity, &x)?;
        let (mean, var) = state.gp.posterior(&z)?;
        let noise = state.gp.noise();
        Ok(Posterior {
            mean: mean.iter().copied().collect(),
            var: var.iter().map(|v| v + noise).collect(),
        })
    }

    fn sample_ensemble(
        &self,
        states: &[Vec<f64>],
        num_samples: usize,
    ) -> Result<Vec<Vec<f64>>, SurrogateError> {
        let posterior = self.posterior(states)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let standard = Normal::new(0.0, 1.0).expect("standard normal is valid");
        Ok(posterior
            .mean
            .iter()
            .zip(&posterior.var)
            .map(|(&m, &v)| {
                let std = v.sqrt();
                (0..num_samples)
                    .map(|_| m + std * standard.sample(&mut rng))
                    .collect()
            })
            .collect())
    }

    fn evaluate(&self, loader: &DataLoader) -> Result<EvalMetrics, SurrogateError> {
        let state = self.state.as_ref().ok_or(SurrogateError::NotFitted)?;
        let mut rng = StdRng::seed_from_u64(0);
        let mut means = Vec::with_capacity(loader.len());
        let mut vars = Vec::with_capacity(loader.len());
        let mut targets = Vec::with_capacity(loader.len());
        // Every composition emits one posterior row per input row, so batch
        // results concatenate along axis 0.
        for batch in loader.batches(&mut rng) {
            let x = Self::rows_to_matrix(&batch.states)?;
            let z = state.features(self.config.fidelity, &x)?;
            let (mean, var) = state.gp.posterior(&z)?;
            let noise = state.gp.noise();
            means.extend(mean.iter().copied());
            vars.extend(var.iter().map(|v| v + noise));
            targets.extend(batch.energies);
        }
        assert_eq!(means.len(), loader.len(), "evaluation must cover the whole split");

        let mut out = metrics::regression_metrics(&means, &vars, &targets);
        out.noise = Some(state.gp.noise());
        out.lengthscale = Some(state.gp.kernel.stationary().lengthscales());
        out.outputscale = Some(state.gp.kernel.stationary().outputscale());
        Ok(out)
    }

    fn load_final(&mut self) -> Result<(), SurrogateError> {
        let path = self.logger.final_checkpoint_dir().join("gp.json");
        if !path.exists() {
            return Err(SurrogateError::MissingCheckpoint(path));
        }
        let checkpoint: GpCheckpoint = serde_json::from_reader(std::fs::File::open(&path)?)?;
        self.state = Some(GpState { gp: checkpoint.gp, encoder: checkpoint.encoder });
        tracing::debug!(path = %path.display(), "Loaded GP checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sine_loaders(n: usize) -> (DataLoader, DataLoader) {
        let states: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64 / n as f64]).collect();
        let energies: Vec<f64> = states.iter().map(|s| (4.0 * s[0]).sin()).collect();
        let train: Vec<usize> = (0..n).filter(|i| i % 5 != 0).collect();
        let test: Vec<usize> = (0..n).filter(|i| i % 5 == 0).collect();
        let pick = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
            (
                idx.iter().map(|&i| states[i].clone()).collect(),
                idx.iter().map(|&i| energies[i]).collect(),
            )
        };
        let (ts, te) = pick(&train);
        let (vs, ve) = pick(&test);
        (DataLoader::new(ts, te, 16, true), DataLoader::new(vs, ve, 16, false))
    }

    fn quick_config() -> SvgpConfig {
        SvgpConfig {
            n_inducing: 10,
            max_epochs: 4,
            eval_period: 2,
            patience: 2,
            ..SvgpConfig::default()
        }
    }

    #[test]
    fn test_fit_predict_and_reload() {
        let dir = TempDir::new().unwrap();
        let logger = RunLogger::new(dir.path(), None).unwrap();
        let mut regressor = SvgpRegressor::new(quick_config(), logger);
        let (train, test) = sine_loaders(50);
        let report = regressor.fit(&train, &test).unwrap();
        assert!(report.epochs <= 4);
        assert!(report.final_test_loss.is_finite());

        let posterior = regressor.posterior(&[vec![0.4], vec![0.9]]).unwrap();
        assert_eq!(posterior.mean.len(), 2);
        assert!(posterior.var.iter().all(|&v| v > 0.0));

        let mut reloaded =
            SvgpRegressor::new(quick_config(), RunLogger::new(dir.path(), None).unwrap());
        reloaded.load_final().unwrap();
        let again = reloaded.posterior(&[vec![0.4], vec![0.9]]).unwrap();
        for (a, b) in posterior.mean.iter().zip(&again.mean) {
            assert!((a - b).abs() < 1e-9, "reloaded GP predicts differently");
        }
    }

    #[test]
    fn test_fit_interpolates_smooth_target() {
        let dir = TempDir::new().unwrap();
        let logger = RunLogger::new(dir.path(), None).unwrap();
        let mut regressor = SvgpRegressor::new(
            SvgpConfig { n_inducing: 20, max_epochs: 2, ..quick_config() },
            logger,
        );
        let (train, test) = sine_loaders(60);
        regressor.fit(&train, &test).unwrap();
        let metrics = regressor.evaluate(&test).unwrap();
        assert!(metrics.rmse < 0.3, "GP failed to track a smooth sine: rmse {}", metrics.rmse);
        assert!(metrics.spearman_rho > 0.8);
        assert!(metrics.noise.is_some());
        assert!(metrics.lengthscale.as_ref().unwrap().len() == 1);
    }

    #[test]
    fn test_deep_kernel_encoder_trains_and_reloads() {
        let dir = TempDir::new().unwrap();
        let logger = RunLogger::new(dir.path(), None).unwrap();
        let config = SvgpConfig { encoder_dim: Some(3), ..quick_config() };
        let mut regressor = SvgpRegressor::new(config.clone(), logger);
        let (train, test) = sine_loaders(40);
        let before = {
            let mut rng = StdRng::seed_from_u64(config.seed);
            LinearEncoder::new(1, 3, &mut rng).params()
        };
        regressor.fit(&train, &test).unwrap();
        let after = regressor.state.as_ref().unwrap().encoder.as_ref().unwrap().params();
        assert_eq!(before.len(), after.len());
        assert!(
            before.iter().zip(&after).any(|(a, b)| (a - b).abs() > 1e-8),
            "encoder parameters never moved"
        );

        // ARD runs over encoder features, so three lengthscales.
        let metrics = regressor.evaluate(&test).unwrap();
        assert_eq!(metrics.lengthscale.unwrap().len(), 3);

        let mut reloaded =
            SvgpRegressor::new(config, RunLogger::new(dir.path(), None).unwrap());
        reloaded.load_final().unwrap();
        assert!(reloaded.state.as_ref().unwrap().encoder.is_some());
    }

    #[test]
    fn test_fidelity_as_input_feeds_shared_encoder() {
        let dir = TempDir::new().unwrap();
        let logger = RunLogger::new(dir.path(), None).unwrap();
        let config = SvgpConfig {
            fidelity: FidelityHandling::AsInput,
            n_fid: 2,
            encoder_dim: Some(3),
            n_inducing: 12,
            max_epochs: 2,
            eval_period: 1,
            ..SvgpConfig::default()
        };
        let mut regressor = SvgpRegressor::new(config.clone(), logger);

        // The fidelity index rides along as one more raw feature.
        let n = 40;
        let states: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![(i / 2) as f64 / 20.0, (i % 2) as f64])
            .collect();
        let energies: Vec<f64> = states
            .iter()
            .map(|s| (3.0 * s[0]).sin() + 0.2 * s[1])
            .collect();
        let train = DataLoader::new(states.clone(), energies.clone(), 16, true);
        let test = DataLoader::new(states[..10].to_vec(), energies[..10].to_vec(), 16, false);

        regressor.fit(&train, &test).unwrap();
        // Both columns feed the encoder: ARD runs over its three features,
        // not over the two raw columns.
        let metrics = regressor.evaluate(&test).unwrap();
        assert!(metrics.rmse.is_finite());
        assert_eq!(metrics.lengthscale.unwrap().len(), 3);

        let mut reloaded =
            SvgpRegressor::new(config, RunLogger::new(dir.path(), None).unwrap());
        reloaded.load_final().unwrap();
        let posterior = reloaded.posterior(&[vec![0.3, 0.0], vec![0.3, 1.0]]).unwrap();
        assert_eq!(posterior.mean.len(), 2);
        assert!(posterior.var.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_multi_fidelity_product_fit() {
        let dir = TempDir::new().unwrap();
        let logger = RunLogger::new(dir.path(), None).unwrap();
        let config = SvgpConfig {
            fidelity: FidelityHandling::ProductIndex { rank: 1 },
            n_fid: 2,
            n_inducing: 12,
            max_epochs: 2,
            eval_period: 1,
            ..SvgpConfig::default()
        };
        let mut regressor = SvgpRegressor::new(config, logger);

        // Low fidelity is a shifted copy of high fidelity.
        let n = 40;
        let states: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![(i / 2) as f64 / 20.0, (i % 2) as f64])
            .collect();
        let energies: Vec<f64> = states
            .iter()
            .map(|s| (3.0 * s[0]).sin() + if s[1] > 0.5 { 0.2 } else { 0.0 })
            .collect();
        let train = DataLoader::new(states.clone(), energies.clone(), 16, true);
        let test = DataLoader::new(states[..10].to_vec(), energies[..10].to_vec(), 16, false);

        regressor.fit(&train, &test).unwrap();
        let metrics = regressor.evaluate(&test).unwrap();
        assert!(metrics.rmse.is_finite());
        // ARD over state features only: one lengthscale, not two.
        assert_eq!(metrics.lengthscale.unwrap().len(), 1);
    }

    #[test]
    fn test_missing_checkpoint_is_fatal() {
        let dir = TempDir::new().unwrap();
        let logger = RunLogger::new(dir.path(), None).unwrap();
        let mut regressor = SvgpRegressor::new(quick_config(), logger);
        assert!(matches!(
            regressor.load_final().unwrap_err(),
            SurrogateError::MissingCheckpoint(_)
        ));
    }

    #[test]
    fn test_ensemble_is_deterministic_per_regressor() {
        let dir = TempDir::new().unwrap();
        let logger = RunLogger::new(dir.path(), None).unwrap();
        let mut regressor = SvgpRegressor::new(quick_config(), logger);
        let (train, test) = sine_loaders(40);
        regressor.fit(&train, &test).unwrap();
        let a = regressor.sample_ensemble(&[vec![0.3]], 8).unwrap();
        let b = regressor.sample_ensemble(&[vec![0.3]], 8).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
    }

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut adam = Adam::new(0.1);
        let mut params = vec![1.0, -1.0];
        adam.step(&mut params, &[1.0, -1.0]);
        assert!(params[0] < 1.0);
        assert!(params[1] > -1.0);
    }
}
