use std::path::PathBuf;

use clap::{ArgAction, Parser};
use serde::Serialize;
use thiserror::Error;

use crate::datasets::DatasetName;
use crate::nn::ModelKind;
use crate::samplers::SamplerKind;

/// Startup errors. All of them are raised before any dataset is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown dataset name: {0:?} (expected \"flickr\" or \"reddit\")")]
    UnknownDataset(String),

    #[error("unknown sampler type: {0:?} (expected \"rw\", \"rn\", \"re\" or \"full\")")]
    UnknownSampler(String),

    #[error("unknown gcn type: {0:?} (expected \"sage\" or \"gat\")")]
    UnknownModel(String),

    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("loss normalization needs a positive --sample-coverage")]
    NormWithoutCoverage,

    #[error("hidden width {hidden} is not divisible by {heads} attention heads")]
    HeadsMismatch { hidden: usize, heads: usize },
}

#[derive(Parser, Debug, Clone, Serialize)]
#[command(name = "candle-saint")]
#[command(about = "Train GraphSAGE / GAT on Flickr or Reddit with GraphSAINT sampling", long_about = None)]
pub struct Args {
    /// Dataset name (flickr, reddit)
    #[arg(long, default_value = "flickr")]
    pub dataset: String,

    /// Sampler type (rw, rn, re, full)
    #[arg(long, default_value = "rw")]
    pub sampler: String,

    /// Network type (sage, gat)
    #[arg(long = "gcn-type", default_value = "sage")]
    pub gcn_type: String,

    /// Walk roots (rw), nodes (rn) or edges (re) per batch
    #[arg(long, default_value_t = 2000)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 50)]
    pub epochs: usize,

    #[arg(long, default_value_t = 2)]
    pub walk_length: usize,

    /// Batches per epoch; defaults to 5 for rw and N / batch_size otherwise
    #[arg(long)]
    pub num_steps: Option<usize>,

    /// Average number of times each node is sampled when estimating the
    /// normalization statistics (0 disables them)
    #[arg(long, default_value_t = 1000)]
    pub sample_coverage: usize,

    #[arg(long, default_value_t = 256)]
    pub hidden: usize,

    /// Attention heads of the first GAT layer
    #[arg(long, default_value_t = 8)]
    pub heads: usize,

    #[arg(long, default_value_t = 0.2)]
    pub dropout: f32,

    #[arg(long, default_value_t = 0.001)]
    pub lr: f64,

    #[arg(long, default_value_t = 1)]
    pub log_interval: usize,

    /// Train on sampled subgraphs instead of the full graph
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub train_sample: bool,

    /// Evaluate on sampled subgraphs instead of the full graph
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub eval_sample: bool,

    /// Reweight the loss and edges with the GraphSAINT normalization
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub loss_norm: bool,

    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub use_gpu: bool,

    /// Also write the log to <log-dir>/<run name>.log
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub save_log: bool,

    /// Background sampling threads (0 samples on the training thread)
    #[arg(long, default_value_t = 0)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    #[arg(long, default_value = "summary")]
    pub summary_dir: PathBuf,
}

/// Validated run configuration.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub dataset: DatasetName,
    pub sampler: SamplerKind,
    pub model: ModelKind,
    pub batch_size: usize,
    pub epochs: usize,
    pub walk_length: usize,
    pub num_steps: Option<usize>,
    pub sample_coverage: usize,
    pub hidden: usize,
    pub heads: usize,
    pub dropout: f32,
    pub lr: f64,
    pub log_interval: usize,
    pub train_sample: bool,
    pub eval_sample: bool,
    pub loss_norm: bool,
    pub use_gpu: bool,
    pub save_log: bool,
    pub num_workers: usize,
    pub seed: u64,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub summary_dir: PathBuf,
}

impl TryFrom<Args> for RunConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, ConfigError> {
        let dataset: DatasetName = args.dataset.parse()?;
        let sampler: SamplerKind = args.sampler.parse()?;
        let model: ModelKind = args.gcn_type.parse()?;

        if args.batch_size == 0 {
            return Err(ConfigError::NotPositive("--batch-size"));
        }
        if args.log_interval == 0 {
            return Err(ConfigError::NotPositive("--log-interval"));
        }
        if args.hidden == 0 {
            return Err(ConfigError::NotPositive("--hidden"));
        }
        if args.num_steps == Some(0) {
            return Err(ConfigError::NotPositive("--num-steps"));
        }
        if model == ModelKind::Gat && (args.heads == 0 || args.hidden % args.heads != 0) {
            return Err(ConfigError::HeadsMismatch {
                hidden: args.hidden,
                heads: args.heads,
            });
        }

        // full-graph mode bypasses the sampler for both phases
        let (train_sample, eval_sample) = match sampler {
            SamplerKind::Full => (false, false),
            _ => (args.train_sample, args.eval_sample),
        };
        if args.loss_norm && (train_sample || eval_sample) && args.sample_coverage == 0 {
            return Err(ConfigError::NormWithoutCoverage);
        }

        Ok(Self {
            dataset,
            sampler,
            model,
            batch_size: args.batch_size,
            epochs: args.epochs,
            walk_length: args.walk_length,
            num_steps: args.num_steps,
            sample_coverage: args.sample_coverage,
            hidden: args.hidden,
            heads: args.heads,
            dropout: args.dropout,
            lr: args.lr,
            log_interval: args.log_interval,
            train_sample,
            eval_sample,
            loss_norm: args.loss_norm,
            use_gpu: args.use_gpu,
            save_log: args.save_log,
            num_workers: args.num_workers,
            seed: args.seed,
            data_dir: args.data_dir,
            log_dir: args.log_dir,
            summary_dir: args.summary_dir,
        })
    }
}

impl RunConfig {
    /// Name shared by the log file and the summary archive.
    pub fn log_name(&self, prefix: &str) -> String {
        format!(
            "{}_{}_{}_{}_bs{}_trs{}_evs{}_ln{}",
            prefix,
            self.dataset,
            self.sampler,
            self.model,
            self.batch_size,
            self.train_sample as u8,
            self.eval_sample as u8,
            self.loss_norm as u8,
        )
    }

    pub fn needs_sampler(&self) -> bool {
        self.train_sample || self.eval_sample
    }

    pub fn needs_full_graph(&self) -> bool {
        !self.train_sample || !self.eval_sample
    }

    /// Normalization statistics are only worth computing when a sampled phase uses them.
    pub fn needs_norm(&self) -> bool {
        self.loss_norm && self.needs_sampler()
    }
}
