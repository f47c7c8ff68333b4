use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use tracing::info;

use crate::config::RunConfig;
use crate::datasets::FullBatchLoader;
use crate::metrics::Split;
use crate::nn::utils::reset_parameters;
use crate::samplers::{LoaderOptions, SaintLoader};
use crate::summary::RunSummary;
use crate::trainer::Trainer;

/// Prefix of the log and summary file names.
pub const LOG_PREFIX: &str = "test";

pub fn device(use_gpu: bool) -> Result<Device> {
    if use_gpu {
        Ok(Device::cuda_if_available(0)?)
    } else {
        Ok(Device::Cpu)
    }
}

/// Loads the dataset, trains for `config.epochs` epochs and writes the summary archive.
pub fn run(config: &RunConfig) -> Result<RunSummary> {
    let log_name = config.log_name(LOG_PREFIX);
    let device = device(config.use_gpu)?;

    let graph = config
        .dataset
        .load(&config.data_dir)
        .with_context(|| format!("failed to load dataset {}", config.dataset))?;
    info!("Dataset: {}", config.dataset);
    info!(
        num_nodes = graph.num_nodes(),
        num_edges = graph.num_edges(),
        num_features = graph.num_features(),
        num_classes = graph.num_classes(),
        "graph loaded"
    );

    info!("Use {}", config.sampler.description());
    let mut loader = match config.sampler.build(&graph, config.batch_size, config.walk_length) {
        Some(sampler) if config.needs_sampler() => {
            let num_steps = config.num_steps.unwrap_or_else(|| {
                config
                    .sampler
                    .default_num_steps(graph.num_nodes(), config.batch_size)
            });
            let options = LoaderOptions {
                num_steps,
                sample_coverage: if config.needs_norm() { config.sample_coverage } else { 0 },
                num_workers: config.num_workers,
                seed: config.seed,
                save_dir: Some(config.dataset.processed_dir(&config.data_dir)),
            };
            Some(SaintLoader::new(&graph, sampler, options, &device)?)
        }
        _ => None,
    };
    let full = if config.needs_full_graph() {
        FullBatchLoader::new(&graph, &device).next().transpose()?
    } else {
        None
    };

    info!("GCN type: {}", config.model);
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = config.model.build(
        graph.num_features(),
        config.hidden,
        graph.num_classes(),
        config.heads,
        config.dropout,
        config.seed.wrapping_add(1),
        vs,
    )?;
    reset_parameters(&varmap, config.seed)?;
    let mut trainer = Trainer::new(model, &varmap, config.lr)?;

    let mut summary = RunSummary::default();
    for epoch in 1..=config.epochs {
        let loss = match (config.train_sample, loader.as_mut(), full.as_ref()) {
            (true, Some(loader), _) => trainer.train_sample(loader, config.loss_norm)?,
            (false, _, Some(full)) => trainer.train_full(full)?,
            _ => anyhow::bail!("no batch source for training"),
        };
        let report = match (config.eval_sample, loader.as_mut(), full.as_ref()) {
            (true, Some(loader), _) => trainer.eval_sample(loader, config.loss_norm)?,
            (false, _, Some(full)) => trainer.eval_full(full)?,
            _ => anyhow::bail!("no batch source for evaluation"),
        };
        if epoch % config.log_interval == 0 {
            info!(
                "Epoch: {:02}, Loss: {:.4}; Train-acc: {:.4}, Train-f1: {:.4}; Test-acc: {:.4}, Test-f1: {:.4};",
                epoch,
                loss,
                report.acc(Split::Train),
                report.f1(Split::Train),
                report.acc(Split::Test),
                report.f1(Split::Test),
            );
        }
        summary.push(loss, report);
    }

    summary.log_results(&log_name);
    summary.save(config.summary_dir.join(format!("{log_name}.npz")))?;
    Ok(summary)
}
