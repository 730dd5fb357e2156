//! Covariance kernels for the variational GP family.
//!
//! Stationary kernels are ARD with log-parameterized lengthscales and
//! outputscale. Multi-fidelity covariance is the product of a stationary
//! kernel over state features and a low-rank index kernel over the fidelity
//! column; the composition is a closed enum, fixed at construction.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Stationary kernel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationaryKind {
    Matern52,
    Rbf,
}

/// ARD stationary kernel with one lengthscale per input dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArdKernel {
    pub kind: StationaryKind,
    /// One log-lengthscale per input dimension.
    pub log_lengthscales: DVector<f64>,
    pub log_outputscale: f64,
}

impl ArdKernel {
    /// Unit lengthscales and outputscale.
    pub fn new(kind: StationaryKind, dims: usize) -> Self {
        Self {
            kind,
            log_lengthscales: DVector::zeros(dims),
            log_outputscale: 0.0,
        }
    }

    pub fn dims(&self) -> usize {
        self.log_lengthscales.len()
    }

    pub fn outputscale(&self) -> f64 {
        self.log_outputscale.exp()
    }

    pub fn lengthscales(&self) -> Vec<f64> {
        self.log_lengthscales.iter().map(|l| l.exp()).collect()
    }

    /// Squared ARD distance between two rows.
    fn dist2(&self, x: &[f64], y: &[f64]) -> f64 {
        debug_assert_eq!(x.len(), self.dims());
        debug_assert_eq!(y.len(), self.dims());
        x.iter()
            .zip(y)
            .zip(self.log_lengthscales.iter())
            .map(|((a, b), log_l)| {
                let d = (a - b) / log_l.exp();
                d * d
            })
            .sum()
    }

    fn value(&self, dist2: f64) -> f64 {
        let scale = self.outputscale();
        match self.kind {
            StationaryKind::Rbf => scale * (-0.5 * dist2).exp(),
            StationaryKind::Matern52 => {
                let r = dist2.sqrt();
                let sqrt5_r = 5.0f64.sqrt() * r;
                scale * (1.0 + sqrt5_r + 5.0 * dist2 / 3.0) * (-sqrt5_r).exp()
            }
        }
    }

    /// Cross-covariance matrix between row sets `x` and `y`.
    pub fn gram(&self, x: &DMatrix<f64>, y: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(x.nrows(), y.nrows());
        for i in 0..x.nrows() {
            let xi: Vec<f64> = x.row(i).iter().copied().collect();
            for j in 0..y.nrows() {
                let yj: Vec<f64> = y.row(j).iter().copied().collect();
                out[(i, j)] = self.value(self.dist2(&xi, &yj));
            }
        }
        out
    }

    fn params(&self) -> Vec<f64> {
        let mut p: Vec<f64> = self.log_lengthscales.iter().copied().collect();
        p.push(self.log_outputscale);
        p
    }

    fn set_params(&mut self, p: &[f64]) {
        debug_assert_eq!(p.len(), self.dims() + 1);
        for (dst, &src) in self.log_lengthscales.iter_mut().zip(p) {
            *dst = src;
        }
        self.log_outputscale = p[self.dims()];
    }
}

/// Low-rank plus diagonal covariance over discrete fidelity indices:
/// `B Bᵀ + diag(exp(log_v))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexKernel {
    /// `n_fid × rank` factor.
    pub b: DMatrix<f64>,
    /// Per-fidelity log diagonal.
    pub log_v: DVector<f64>,
}

impl IndexKernel {
    pub fn new(n_fid: usize, rank: usize) -> Self {
        // Small deterministic off-zero init so fidelities start correlated
        // but distinguishable.
        let b = DMatrix::from_fn(n_fid, rank, |i, j| 0.5 + 0.1 * ((i + j) as f64));
        Self { b, log_v: DVector::zeros(n_fid) }
    }

    pub fn n_fid(&self) -> usize {
        self.b.nrows()
    }

    /// Full `n_fid × n_fid` task covariance.
    pub fn covar(&self) -> DMatrix<f64> {
        let mut c = &self.b * self.b.transpose();
        for i in 0..self.n_fid() {
            c[(i, i)] += self.log_v[i].exp();
        }
        c
    }

    fn params(&self) -> Vec<f64> {
        let mut p: Vec<f64> = self.b.iter().copied().collect();
        p.extend(self.log_v.iter().copied());
        p
    }

    fn set_params(&mut self, p: &[f64]) {
        let nb = self.b.len();
        debug_assert_eq!(p.len(), nb + self.log_v.len());
        for (dst, &src) in self.b.iter_mut().zip(&p[..nb]) {
            *dst = src;
        }
        for (dst, &src) in self.log_v.iter_mut().zip(&p[nb..]) {
            *dst = src;
        }
    }
}

/// How covariance is assembled from an input row.
///
/// Under `ProductFidelity` the trailing column of every row is the fidelity
/// index and the remaining columns are state features; under `Stationary`
/// the whole row feeds the stationary kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KernelComposition {
    Stationary(ArdKernel),
    ProductFidelity { state: ArdKernel, index: IndexKernel },
}

impl KernelComposition {
    /// Cross-covariance between row sets (rows include the fidelity column
    /// under `ProductFidelity`).
    pub fn gram(&self, x: &DMatrix<f64>, y: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            KernelComposition::Stationary(k) => k.gram(x, y),
            KernelComposition::ProductFidelity { state, index } => {
                let (xf, xi) = split_fidelity(x);
                let (yf, yi) = split_fidelity(y);
                let mut out = state.gram(&xf, &yf);
                let task = index.covar();
                for i in 0..out.nrows() {
                    for j in 0..out.ncols() {
                        out[(i, j)] *= task[(xi[i], yi[j])];
                    }
                }
                out
            }
        }
    }

    /// `k(x_i, x_i)` for each row.
    pub fn diag(&self, x: &DMatrix<f64>) -> DVector<f64> {
        match self {
            KernelComposition::Stationary(k) => {
                DVector::from_element(x.nrows(), k.outputscale())
            }
            KernelComposition::ProductFidelity { state, index } => {
                let (_, xi) = split_fidelity(x);
                let task = index.covar();
                DVector::from_iterator(
                    x.nrows(),
                    xi.iter().map(|&f| state.outputscale() * task[(f, f)]),
                )
            }
        }
    }

    /// The stationary component, for reporting lengthscales and outputscale.
    pub fn stationary(&self) -> &ArdKernel {
        match self {
            KernelComposition::Stationary(k) => k,
            KernelComposition::ProductFidelity { state, .. } => state,
        }
    }

    pub fn params(&self) -> Vec<f64> {
        match self {
            KernelComposition::Stationary(k) => k.params(),
            KernelComposition::ProductFidelity { state, index } => {
                let mut p = state.params();
                p.extend(index.params());
                p
            }
        }
    }

    pub fn set_params(&mut self, p: &[f64]) {
        match self {
            KernelComposition::Stationary(k) => k.set_params(p),
            KernelComposition::ProductFidelity { state, index } => {
                let cut = state.dims() + 1;
                state.set_params(&p[..cut]);
                index.set_params(&p[cut..]);
            }
        }
    }
}

/// Split rows into state features and fidelity indices (trailing column).
fn split_fidelity(x: &DMatrix<f64>) -> (DMatrix<f64>, Vec<usize>) {
    debug_assert!(x.ncols() >= 2, "product kernel input needs features plus a fidelity column");
    let features = x.columns(0, x.ncols() - 1).into_owned();
    let fids = x
        .column(x.ncols() - 1)
        .iter()
        .map(|&f| f as usize)
        .collect();
    (features, fids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rng: &mut StdRng, n: usize, d: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, d, |_, _| rng.gen::<f64>() * 4.0 - 2.0)
    }

    fn is_psd(m: &DMatrix<f64>, jitter: f64) -> bool {
        let mut j = m.clone();
        for i in 0..j.nrows() {
            j[(i, i)] += jitter;
        }
        nalgebra::Cholesky::new(j).is_some()
    }

    #[test]
    fn test_ard_kernel_diagonal_is_outputscale() {
        let kernel = ArdKernel::new(StationaryKind::Matern52, 3);
        let x = DMatrix::from_row_slice(1, 3, &[0.5, -1.0, 2.0]);
        let k = kernel.gram(&x, &x);
        assert!((k[(0, 0)] - kernel.outputscale()).abs() < 1e-12);
    }

    #[test]
    fn test_kernel_decays_with_distance() {
        for kind in [StationaryKind::Matern52, StationaryKind::Rbf] {
            let kernel = ArdKernel::new(kind, 2);
            let x = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
            let near = DMatrix::from_row_slice(1, 2, &[0.1, 0.1]);
            let far = DMatrix::from_row_slice(1, 2, &[3.0, 3.0]);
            let k_near = kernel.gram(&x, &near)[(0, 0)];
            let k_far = kernel.gram(&x, &far)[(0, 0)];
            assert!(k_near > k_far, "{kind:?} did not decay");
            assert!(k_far > 0.0);
        }
    }

    #[test]
    fn test_ard_lengthscale_controls_dimension_relevance() {
        let mut kernel = ArdKernel::new(StationaryKind::Rbf, 2);
        // Long lengthscale in dim 1: movement there barely matters.
        kernel.log_lengthscales[1] = 3.0;
        let x = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let moved_relevant = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        let moved_irrelevant = DMatrix::from_row_slice(1, 2, &[0.0, 1.0]);
        let k_rel = kernel.gram(&x, &moved_relevant)[(0, 0)];
        let k_irr = kernel.gram(&x, &moved_irrelevant)[(0, 0)];
        assert!(k_irr > k_rel);
    }

    #[test]
    fn test_stationary_gram_is_psd() {
        let mut rng = StdRng::seed_from_u64(11);
        for kind in [StationaryKind::Matern52, StationaryKind::Rbf] {
            let kernel = KernelComposition::Stationary(ArdKernel::new(kind, 4));
            let x = random_matrix(&mut rng, 20, 4);
            let k = kernel.gram(&x, &x);
            assert!((k.clone() - k.transpose()).abs().max() < 1e-12);
            assert!(is_psd(&k, 1e-6), "{kind:?} gram not PSD");
        }
    }

    #[test]
    fn test_product_fidelity_gram_is_psd() {
        let mut rng = StdRng::seed_from_u64(5);
        let kernel = KernelComposition::ProductFidelity {
            state: ArdKernel::new(StationaryKind::Matern52, 3),
            index: IndexKernel::new(3, 1),
        };
        let mut x = random_matrix(&mut rng, 24, 4);
        for i in 0..x.nrows() {
            x[(i, 3)] = (i % 3) as f64;
        }
        let k = kernel.gram(&x, &x);
        assert!((k.clone() - k.transpose()).abs().max() < 1e-12);
        assert!(is_psd(&k, 1e-6), "product gram not PSD");

        let diag = kernel.diag(&x);
        for i in 0..x.nrows() {
            assert!((diag[i] - k[(i, i)]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_index_kernel_covar_shape_and_diag() {
        let index = IndexKernel::new(4, 2);
        let c = index.covar();
        assert_eq!(c.shape(), (4, 4));
        for i in 0..4 {
            // Diagonal dominates its own low-rank part by exp(log_v) > 0.
            let lr: f64 = (0..2).map(|j| index.b[(i, j)] * index.b[(i, j)]).sum();
            assert!(c[(i, i)] > lr);
        }
    }

    #[test]
    fn test_param_round_trip() {
        let mut kernel = KernelComposition::ProductFidelity {
            state: ArdKernel::new(StationaryKind::Rbf, 2),
            index: IndexKernel::new(2, 1),
        };
        let mut p = kernel.params();
        for (i, v) in p.iter_mut().enumerate() {
            *v += 0.01 * i as f64;
        }
        kernel.set_params(&p);
        assert_eq!(kernel.params(), p);
    }
}
