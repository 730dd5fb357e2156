use std::path::PathBuf;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use al_core::config::{load_al_toml, RegressorChoice};
use al_core::grid::{GridEnv, GridOracle};
use al_core::pipeline::{Pipeline, RegressorFactory};
use al_core::sampler::RandomSampler;
use dataset::{DataHandler, Oracle, RunLogger};
use surrogate::{
    DropoutRegressor, DropoutRegressorConfig, FidelityHandling, MlpConfig,
    MultiFidelityMlpConfig, NetSpec, SurrogateRegressor, SvgpConfig, SvgpRegressor,
};

type TrainBackend = Autodiff<NdArray<f32>>;

/// al-loop: active-learning campaign over the synthetic hyper-grid.
#[derive(Parser)]
#[command(name = "al-loop", version, about)]
struct Cli {
    /// Path to the run config TOML file.
    #[arg(long, default_value = "configs/run.toml")]
    config: PathBuf,
    /// Override the campaign seed.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_al_toml(&cli.config)?;
    if let Some(seed) = cli.seed {
        config.run.seed = seed;
    }

    let logger = RunLogger::new(&config.run.out_dir, config.run.proxy_period)?;
    let env = GridEnv::new(config.grid.clone());
    let oracle = GridOracle::new(config.grid.clone());
    let maximize = oracle.capabilities().maximize;
    let handler = DataHandler::new(
        env,
        maximize,
        false,
        &config.data.to_handler_config(config.run.seed),
        logger.clone(),
    )?;

    let dim = config.grid.dim;
    let n_fid = config.grid.n_fid;
    let reg = config.regressor.clone();
    let factory: RegressorFactory = match reg.kind {
        RegressorChoice::Dropout => Box::new(move |logger| -> Box<dyn SurrogateRegressor> {
            let spec = if n_fid > 1 {
                NetSpec::MultiFidelity(
                    MultiFidelityMlpConfig::new(dim, n_fid)
                        .with_hidden_dim(reg.hidden_dim)
                        .with_num_layers(reg.num_layers)
                        .with_dropout(reg.dropout),
                )
            } else {
                NetSpec::Plain(
                    MlpConfig::new(dim)
                        .with_hidden_dim(reg.hidden_dim)
                        .with_num_layers(reg.num_layers)
                        .with_dropout(reg.dropout),
                )
            };
            let train_config = DropoutRegressorConfig::new()
                .with_max_epochs(reg.max_epochs)
                .with_num_dropout_samples(reg.num_dropout_samples);
            Box::new(DropoutRegressor::<TrainBackend>::new(
                spec,
                train_config,
                logger,
                Default::default(),
            ))
        }),
        RegressorChoice::Gp => Box::new(move |logger| -> Box<dyn SurrogateRegressor> {
            let gp_config = SvgpConfig {
                fidelity: if n_fid > 1 {
                    FidelityHandling::ProductIndex { rank: 1 }
                } else {
                    FidelityHandling::None
                },
                n_fid,
                n_inducing: reg.n_inducing,
                max_epochs: reg.max_epochs,
                ..SvgpConfig::default()
            };
            Box::new(SvgpRegressor::new(gp_config, logger))
        }),
    };

    let sampler = RandomSampler::new(dim, config.grid.side, n_fid, config.run.seed);
    let mut pipeline = Pipeline::new(
        handler,
        oracle,
        sampler,
        config.run.clone(),
        config.acquisition.clone(),
        logger,
        factory,
    );
    pipeline.run()
}
