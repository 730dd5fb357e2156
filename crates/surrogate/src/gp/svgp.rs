//! Whitened stochastic variational GP.
//!
//! The variational distribution lives in whitened coordinates: with
//! `L = chol(K_uu)`, inducing values are `u = L w` and `q(w) = N(m̄, S̄)`.
//! All linear algebra runs in `f64`; the predictive posterior and the ELBO
//! are plain triangular solves.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

use crate::error::SurrogateError;
use crate::gp::kernel::KernelComposition;

/// Jitter added to `K_uu` during the closed-form variational
/// initialization, matching the looser tolerance that solve needs.
const INIT_JITTER: f64 = 1e-4;

/// Whitened variational GP state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Svgp {
    pub kernel: KernelComposition,
    /// `m × d` inducing locations (trailing fidelity column included when
    /// the composition requires it).
    pub inducing: DMatrix<f64>,
    pub log_noise: f64,
    /// Observation noise floor; `noise()` never reports below this.
    pub noise_lb: f64,
    /// Whitened variational mean `m̄`.
    pub var_mean: DVector<f64>,
    /// Lower Cholesky factor of the whitened variational covariance `S̄`.
    pub var_chol: DMatrix<f64>,
    /// Base jitter for Cholesky factorizations.
    pub jitter: f64,
}

/// Cholesky with escalating jitter; three decades before giving up.
fn chol_jittered(
    mat: &DMatrix<f64>,
    base_jitter: f64,
    label: &'static str,
) -> Result<Cholesky<f64, Dyn>, SurrogateError> {
    let mut jitter = base_jitter;
    for _ in 0..4 {
        let mut j = mat.clone();
        for i in 0..j.nrows() {
            j[(i, i)] += jitter;
        }
        if let Some(chol) = Cholesky::new(j) {
            return Ok(chol);
        }
        jitter *= 10.0;
    }
    Err(SurrogateError::NotPositiveDefinite(label))
}

impl Svgp {
    /// Identity whitened prior: `m̄ = 0`, `S̄ = I`.
    pub fn new(
        kernel: KernelComposition,
        inducing: DMatrix<f64>,
        noise_init: f64,
        noise_lb: f64,
    ) -> Self {
        let m = inducing.nrows();
        Self {
            kernel,
            inducing,
            log_noise: noise_init.ln(),
            noise_lb,
            var_mean: DVector::zeros(m),
            var_chol: DMatrix::identity(m, m),
            jitter: 1e-6,
        }
    }

    pub fn num_inducing(&self) -> usize {
        self.inducing.nrows()
    }

    /// Observation noise variance, clamped from below.
    pub fn noise(&self) -> f64 {
        self.log_noise.exp().max(self.noise_lb)
    }

    fn chol_kuu(&self) -> Result<Cholesky<f64, Dyn>, SurrogateError> {
        let kuu = self.kernel.gram(&self.inducing, &self.inducing);
        chol_jittered(&kuu, self.jitter, "K_uu")
    }

    /// Predictive mean and variance at `x`, `(n,)` each.
    pub fn posterior(&self, x: &DMatrix<f64>) -> Result<(DVector<f64>, DVector<f64>), SurrogateError> {
        let l = self.chol_kuu()?.l();
        let kxu = self.kernel.gram(x, &self.inducing);

        // A = K_xu L^{-T}, computed as (L^{-1} K_ux)ᵀ.
        let a_t = l
            .solve_lower_triangular(&kxu.transpose())
            .ok_or(SurrogateError::NotPositiveDefinite("K_uu solve"))?;
        let a = a_t.transpose();

        let mean = &a * &self.var_mean;

        // var_i = k_ii − |a_i|² + |a_i L_S|².
        let kdiag = self.kernel.diag(x);
        let al = &a * &self.var_chol;
        let mut var = DVector::zeros(x.nrows());
        for i in 0..x.nrows() {
            let prior = kdiag[i];
            let removed: f64 = a.row(i).iter().map(|v| v * v).sum();
            let added: f64 = al.row(i).iter().map(|v| v * v).sum();
            var[i] = (prior - removed + added).max(0.0);
        }
        Ok((mean, var))
    }

    /// Minibatch ELBO with the expected log likelihood rescaled to the full
    /// dataset size and the KL term weighted by `mll_beta`.
    pub fn elbo(
        &self,
        x: &DMatrix<f64>,
        y: &DVector<f64>,
        n_total: usize,
        mll_beta: f64,
    ) -> Result<f64, SurrogateError> {
        let (mean, var) = self.posterior(x)?;
        let noise = self.noise();
        let batch = x.nrows() as f64;

        let mut exp_ll = 0.0;
        for i in 0..x.nrows() {
            let resid = y[i] - mean[i];
            exp_ll += -0.5 * (2.0 * std::f64::consts::PI * noise).ln()
                - (resid * resid + var[i]) / (2.0 * noise);
        }
        exp_ll *= n_total as f64 / batch;

        // KL(q(w) ‖ N(0, I)) in whitened coordinates.
        let m = self.num_inducing() as f64;
        let trace: f64 = self.var_chol.iter().map(|v| v * v).sum();
        let logdet: f64 = (0..self.num_inducing())
            .map(|i| 2.0 * self.var_chol[(i, i)].abs().max(1e-300).ln())
            .sum();
        let kl = 0.5 * (self.var_mean.norm_squared() + trace - m - logdet);

        Ok(exp_ll - mll_beta * kl)
    }

    /// Closed-form whitened variational initialization (SGPR optimum):
    ///
    /// ```text
    /// S̄ = Lᵀ (K_uu + K_uv D⁻¹ K_vu)⁻¹ L
    /// m̄ = S̄ L⁻¹ (K_uv D⁻¹ y)
    /// ```
    ///
    /// `D` is the observation noise as a diagonal operator over the data
    /// points. The uniform path passes `None` and uses `noise()` everywhere;
    /// the batched per-task path supplies one entry per point.
    pub fn initialize_var_dist_sgpr(
        &mut self,
        x: &DMatrix<f64>,
        y: &DVector<f64>,
        noise_diag: Option<&DVector<f64>>,
    ) -> Result<(), SurrogateError> {
        let n = x.nrows();
        if let Some(d) = noise_diag {
            debug_assert_eq!(d.len(), n);
        }
        let uniform = self.noise();
        let inv_noise =
            DVector::from_fn(n, |i, _| 1.0 / noise_diag.map_or(uniform, |d| d[i].max(self.noise_lb)));

        let kuu = self.kernel.gram(&self.inducing, &self.inducing);
        let l = chol_jittered(&kuu, INIT_JITTER, "K_uu")?.l();
        let kuv = self.kernel.gram(&self.inducing, x);

        // K_uv D⁻¹ K_vu without materializing D.
        let mut kuv_scaled = kuv.clone();
        for j in 0..n {
            let w = inv_noise[j];
            for i in 0..self.num_inducing() {
                kuv_scaled[(i, j)] *= w;
            }
        }
        let inner = &kuu + &kuv_scaled * kuv.transpose();
        let c = chol_jittered(&inner, INIT_JITTER, "SGPR inner")?.l();

        // S̄ = Wᵀ W with W = C⁻¹ L.
        let w = c
            .solve_lower_triangular(&l)
            .ok_or(SurrogateError::NotPositiveDefinite("SGPR inner solve"))?;
        let s_bar = w.transpose() * &w;

        // m̄ = S̄ L⁻¹ (K_uv D⁻¹ y).
        let rhs = &kuv_scaled * y;
        let t = l
            .solve_lower_triangular(&rhs)
            .ok_or(SurrogateError::NotPositiveDefinite("K_uu rhs solve"))?;
        self.var_mean = &s_bar * t;
        self.var_chol = chol_jittered(&s_bar, self.jitter, "S_bar")?.l();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::kernel::{ArdKernel, IndexKernel, StationaryKind};
    use nalgebra::{DMatrix, DVector};

    fn toy_gp(m: usize) -> Svgp {
        let kernel = KernelComposition::Stationary(ArdKernel::new(StationaryKind::Rbf, 1));
        let inducing = DMatrix::from_fn(m, 1, |i, _| i as f64 / (m - 1) as f64);
        Svgp::new(kernel, inducing, 1e-2, 1e-4)
    }

    fn toy_data(n: usize) -> (DMatrix<f64>, DVector<f64>) {
        let x = DMatrix::from_fn(n, 1, |i, _| i as f64 / (n - 1) as f64);
        let y = DVector::from_fn(n, |i, _| (2.5 * x[(i, 0)]).sin());
        (x, y)
    }

    /// Exact GP posterior mean at `xs` for comparison.
    fn exact_posterior_mean(
        kernel: &KernelComposition,
        x: &DMatrix<f64>,
        y: &DVector<f64>,
        noise: f64,
        xs: &DMatrix<f64>,
    ) -> DVector<f64> {
        let mut kxx = kernel.gram(x, x);
        for i in 0..kxx.nrows() {
            kxx[(i, i)] += noise;
        }
        let chol = Cholesky::new(kxx).unwrap();
        let alpha = chol.solve(y);
        kernel.gram(xs, x) * alpha
    }

    #[test]
    fn test_prior_posterior_is_zero_mean_unit_variance() {
        let gp = toy_gp(8);
        let (x, _) = toy_data(5);
        let (mean, var) = gp.posterior(&x).unwrap();
        for i in 0..5 {
            assert!(mean[i].abs() < 1e-9);
            // Whitened identity prior reproduces the prior marginal k_ii.
            assert!((var[i] - 1.0).abs() < 1e-6, "prior var {} at {i}", var[i]);
        }
    }

    #[test]
    fn test_sgpr_init_matches_exact_gp_with_inducing_on_data() {
        // With inducing points exactly at the data, the SGPR optimum equals
        // the exact GP posterior.
        let (x, y) = toy_data(9);
        let kernel = KernelComposition::Stationary(ArdKernel::new(StationaryKind::Rbf, 1));
        let mut gp = Svgp::new(kernel.clone(), x.clone(), 1e-2, 1e-6);
        gp.initialize_var_dist_sgpr(&x, &y, None).unwrap();

        let (mean, _) = gp.posterior(&x).unwrap();
        let exact = exact_posterior_mean(&kernel, &x, &y, gp.noise(), &x);
        for i in 0..x.nrows() {
            assert!(
                (mean[i] - exact[i]).abs() < 1e-3,
                "posterior mean off at {i}: {} vs {}",
                mean[i],
                exact[i]
            );
        }
    }

    #[test]
    fn test_sgpr_init_shrinks_variance_at_data() {
        let (x, y) = toy_data(9);
        let mut gp = toy_gp(9);
        let (_, prior_var) = gp.posterior(&x).unwrap();
        gp.initialize_var_dist_sgpr(&x, &y, None).unwrap();
        let (_, post_var) = gp.posterior(&x).unwrap();
        for i in 0..x.nrows() {
            assert!(
                post_var[i] < prior_var[i],
                "variance did not shrink at {i}: {} vs {}",
                post_var[i],
                prior_var[i]
            );
        }
    }

    #[test]
    fn test_elbo_improves_after_sgpr_init() {
        let (x, y) = toy_data(12);
        let mut gp = toy_gp(6);
        let before = gp.elbo(&x, &y, 12, 1.0).unwrap();
        gp.initialize_var_dist_sgpr(&x, &y, None).unwrap();
        let after = gp.elbo(&x, &y, 12, 1.0).unwrap();
        assert!(after > before, "ELBO got worse: {before} -> {after}");
    }

    #[test]
    fn test_elbo_minibatch_scaling() {
        let (x, y) = toy_data(10);
        let mut gp = toy_gp(5);
        gp.initialize_var_dist_sgpr(&x, &y, None).unwrap();

        // The full-batch ELBO and a "minibatch" over the same rows with
        // n_total = n must agree.
        let full = gp.elbo(&x, &y, 10, 1.0).unwrap();
        let again = gp.elbo(&x, &y, 10, 1.0).unwrap();
        assert!((full - again).abs() < 1e-12);

        // Doubling n_total doubles only the likelihood term.
        let kl_only = gp.elbo(&x, &y, 10, 1.0).unwrap() - gp.elbo(&x, &y, 10, 0.0).unwrap();
        let doubled = gp.elbo(&x, &y, 20, 0.0).unwrap();
        let single = gp.elbo(&x, &y, 10, 0.0).unwrap();
        assert!((doubled - 2.0 * single).abs() < 1e-9);
        assert!(kl_only < 0.0, "KL must subtract from the ELBO");
    }

    #[test]
    fn test_batched_noise_diag_path() {
        // Per-point noise through the diagonal operator: uniform entries must
        // reproduce the uniform path.
        let (x, y) = toy_data(10);
        let mut uniform = toy_gp(5);
        uniform.initialize_var_dist_sgpr(&x, &y, None).unwrap();

        let mut diag = toy_gp(5);
        let noise_vec = DVector::from_element(10, diag.noise());
        diag.initialize_var_dist_sgpr(&x, &y, Some(&noise_vec)).unwrap();

        assert!((&uniform.var_mean - &diag.var_mean).abs().max() < 1e-9);
        assert!((&uniform.var_chol - &diag.var_chol).abs().max() < 1e-9);
    }

    #[test]
    fn test_product_kernel_sgpr_init_runs() {
        let n = 12;
        let mut x = DMatrix::from_fn(n, 3, |i, j| ((i * 3 + j) as f64 * 0.37).sin());
        for i in 0..n {
            x[(i, 2)] = (i % 2) as f64;
        }
        let y = DVector::from_fn(n, |i, _| (x[(i, 0)] + x[(i, 1)]).cos());
        let kernel = KernelComposition::ProductFidelity {
            state: ArdKernel::new(StationaryKind::Matern52, 2),
            index: IndexKernel::new(2, 1),
        };
        let mut gp = Svgp::new(kernel, x.clone(), 1e-2, 1e-4);
        let per_point = DVector::from_fn(n, |i, _| if i % 2 == 0 { 1e-2 } else { 2e-2 });
        gp.initialize_var_dist_sgpr(&x, &y, Some(&per_point)).unwrap();
        let (mean, var) = gp.posterior(&x).unwrap();
        assert!(mean.iter().all(|v| v.is_finite()));
        assert!(var.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_noise_lower_bound_clamps() {
        let mut gp = toy_gp(4);
        gp.log_noise = (1e-12f64).ln();
        assert!((gp.noise() - gp.noise_lb).abs() < 1e-18);
    }
}
