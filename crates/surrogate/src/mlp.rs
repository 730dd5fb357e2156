//! Feed-forward surrogate networks.
//!
//! Two variants share one forward signature: a plain MLP over proxy-space
//! rows, and a multi-fidelity MLP whose input carries the fidelity index in
//! its trailing column. The multi-fidelity head layout is chosen once at
//! construction and dispatched through a tagged enum, never rebound later.

use burn::module::Ignored;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for the plain MLP regressor.
///
/// ```text
/// (batch, input_dim)
///   → Linear(input_dim → hidden_dim) → ReLU → Dropout
///   → [Linear(hidden_dim → hidden_dim) → ReLU → Dropout] × num_layers
///   → Linear(hidden_dim → 1) → squeeze
///   → (batch,)
/// ```
#[derive(Config, Debug)]
pub struct MlpConfig {
    /// Proxy-space row width.
    pub input_dim: usize,
    /// Hidden layer width.
    #[config(default = 128)]
    pub hidden_dim: usize,
    /// Number of hidden-to-hidden layers.
    #[config(default = 2)]
    pub num_layers: usize,
    /// Dropout probability after each activation. Also the source of the
    /// MC-dropout predictive ensemble, so 0.0 disables uncertainty.
    #[config(default = 0.1)]
    pub dropout: f64,
}

/// Plain MLP mapping a proxy-space row to a scalar energy.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    input: Linear<B>,
    hidden: Vec<Linear<B>>,
    dropout: Dropout,
    output: Linear<B>,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Mlp<B> {
        Mlp {
            input: LinearConfig::new(self.input_dim, self.hidden_dim).init(device),
            hidden: (0..self.num_layers)
                .map(|_| LinearConfig::new(self.hidden_dim, self.hidden_dim).init(device))
                .collect(),
            dropout: DropoutConfig::new(self.dropout).init(),
            output: LinearConfig::new(self.hidden_dim, 1).init(device),
        }
    }
}

impl<B: Backend> Mlp<B> {
    /// Input `(batch, input_dim)`, output `(batch,)`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        let mut h = self.dropout.forward(burn::tensor::activation::relu(
            self.input.forward(x),
        ));
        for layer in &self.hidden {
            h = self
                .dropout
                .forward(burn::tensor::activation::relu(layer.forward(h)));
        }
        self.output.forward(h).squeeze::<1>(1)
    }
}

/// Output head layout of the multi-fidelity MLP.
///
/// Fixed at construction; `forward` dispatches on the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadMode {
    /// One head scores every fidelity.
    Shared,
    /// One head per fidelity, selected by the row's fidelity index.
    PerFidelity,
}

/// Configuration for the multi-fidelity MLP.
#[derive(Config, Debug)]
pub struct MultiFidelityMlpConfig {
    /// Width of the state features, excluding the fidelity column.
    pub input_dim: usize,
    /// Number of fidelity levels (one-hot width).
    pub n_fid: usize,
    #[config(default = 128)]
    pub hidden_dim: usize,
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = "HeadMode::Shared")]
    pub head: HeadMode,
}

/// MLP over `(state features, one-hot fidelity)` with shared or per-fidelity
/// output heads.
///
/// Input rows carry the fidelity index as their trailing column; the forward
/// pass splits it off and expands it to a one-hot block.
#[derive(Module, Debug)]
pub struct MultiFidelityMlp<B: Backend> {
    input: Linear<B>,
    hidden: Vec<Linear<B>>,
    dropout: Dropout,
    /// One entry under [`HeadMode::Shared`], `n_fid` entries otherwise.
    heads: Vec<Linear<B>>,
    head_mode: Ignored<HeadMode>,
    n_fid: Ignored<usize>,
}

impl MultiFidelityMlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MultiFidelityMlp<B> {
        let num_heads = match self.head {
            HeadMode::Shared => 1,
            HeadMode::PerFidelity => self.n_fid,
        };
        MultiFidelityMlp {
            input: LinearConfig::new(self.input_dim + self.n_fid, self.hidden_dim).init(device),
            hidden: (0..self.num_layers)
                .map(|_| LinearConfig::new(self.hidden_dim, self.hidden_dim).init(device))
                .collect(),
            dropout: DropoutConfig::new(self.dropout).init(),
            heads: (0..num_heads)
                .map(|_| LinearConfig::new(self.hidden_dim, 1).init(device))
                .collect(),
            head_mode: Ignored(self.head),
            n_fid: Ignored(self.n_fid),
        }
    }
}

impl<B: Backend> MultiFidelityMlp<B> {
    /// Input `(batch, input_dim + 1)` with the fidelity index in the last
    /// column, output `(batch,)`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch, width] = x.dims();
        let n_fid = *self.n_fid;
        let features = x.clone().slice([0..batch, 0..width - 1]);
        let fid_col = x.slice([0..batch, width - 1..width]);

        // One-hot fidelity block built from equality masks, `(batch, n_fid)`.
        let masks: Vec<Tensor<B, 2>> = (0..n_fid)
            .map(|k| fid_col.clone().equal_elem(k as f64).float())
            .collect();
        let one_hot = Tensor::cat(masks.clone(), 1);

        let mut h = self.dropout.forward(burn::tensor::activation::relu(
            self.input.forward(Tensor::cat(vec![features, one_hot], 1)),
        ));
        for layer in &self.hidden {
            h = self
                .dropout
                .forward(burn::tensor::activation::relu(layer.forward(h)));
        }

        match *self.head_mode {
            HeadMode::Shared => self.heads[0].forward(h).squeeze::<1>(1),
            HeadMode::PerFidelity => {
                // Each row picks exactly one head via its fidelity mask.
                let mut out: Tensor<B, 1> = Tensor::zeros([batch], &h.device());
                for (k, head) in self.heads.iter().enumerate() {
                    let scores = head.forward(h.clone()).squeeze::<1>(1);
                    out = out + scores * masks[k].clone().squeeze::<1>(1);
                }
                out
            }
        }
    }
}
