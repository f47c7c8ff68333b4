use anyhow::{Context, Result};
use candle_core::{Tensor, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use tracing::debug;

use crate::datasets::GraphBatch;
use crate::metrics::{EvalReport, ReportAverager, Split};
use crate::nn::{Aggregation, GnnModel};
use crate::samplers::SaintLoader;

/// Negative log-likelihood of every node's label.
pub fn node_nll(log_probs: &Tensor, y: &Tensor) -> candle_core::Result<Tensor> {
    log_probs.gather(&y.unsqueeze(1)?, 1)?.squeeze(1)?.neg()
}

/// Owns the model and its optimizer and runs the train/eval passes.
pub struct Trainer {
    model: Box<dyn GnnModel>,
    optimizer: AdamW,
}

impl Trainer {
    pub fn new(model: Box<dyn GnnModel>, varmap: &VarMap, lr: f64) -> Result<Self> {
        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;
        Ok(Self { model, optimizer })
    }

    pub fn model(&self) -> &dyn GnnModel {
        self.model.as_ref()
    }

    fn edge_weight(batch: &GraphBatch, norm_loss: bool) -> Result<Option<Tensor>> {
        if norm_loss {
            let weight = batch
                .normalized_edge_weight()?
                .context("loss normalization requires GraphSAINT statistics")?;
            Ok(Some(weight))
        } else {
            Ok(None)
        }
    }

    /// One optimizer step per sampled batch. Returns the node-weighted mean loss.
    pub fn train_sample(&mut self, loader: &mut SaintLoader, norm_loss: bool) -> Result<f32> {
        self.model.set_aggr(Aggregation::Sum);
        let mut total_loss = 0.0;
        let mut total_examples = 0;
        for batch in loader.epoch() {
            let batch = batch?;
            let train_index = batch.split_index(Split::Train);
            if batch.split_nodes(Split::Train).is_empty() {
                debug!(num_nodes = batch.num_nodes(), "skipping batch without train nodes");
                continue;
            }
            let edge_weight = Self::edge_weight(&batch, norm_loss)?;
            let out = self
                .model
                .forward_t(&batch.x, &batch.edge_index, edge_weight.as_ref(), true)?;
            let nll = node_nll(&out, &batch.y)?;
            let loss = if norm_loss {
                let node_norm = batch
                    .node_norm
                    .as_ref()
                    .context("loss normalization requires GraphSAINT statistics")?;
                nll.mul(node_norm)?.index_select(train_index, 0)?.sum_all()?
            } else {
                nll.index_select(train_index, 0)?.mean_all()?
            };
            self.optimizer.backward_step(&loss)?;
            total_loss += loss.to_scalar::<f32>()? as f64 * batch.num_nodes() as f64;
            total_examples += batch.num_nodes();
        }
        if total_examples == 0 {
            return Ok(f32::NAN);
        }
        Ok((total_loss / total_examples as f64) as f32)
    }

    /// One optimizer step over the whole graph with mean aggregation.
    pub fn train_full(&mut self, graph: &GraphBatch) -> Result<f32> {
        self.model.set_aggr(Aggregation::Mean);
        let out = self
            .model
            .forward_t(&graph.x, &graph.edge_index, None, true)?;
        let loss = node_nll(&out, &graph.y)?
            .index_select(graph.split_index(Split::Train), 0)?
            .mean_all()?;
        self.optimizer.backward_step(&loss)?;
        Ok(loss.to_scalar::<f32>()?)
    }

    fn predict(&self, batch: &GraphBatch, edge_weight: Option<&Tensor>) -> Result<Vec<u32>> {
        let out = self.model.forward(&batch.x, &batch.edge_index, edge_weight)?;
        Ok(out.argmax(D::Minus1)?.to_vec1::<u32>()?)
    }

    /// Scores every sampled batch and averages the per-batch metrics.
    pub fn eval_sample(&mut self, loader: &mut SaintLoader, norm_loss: bool) -> Result<EvalReport> {
        self.model.set_aggr(Aggregation::Sum);
        let mut averager = ReportAverager::default();
        for batch in loader.epoch() {
            let batch = batch?;
            let edge_weight = Self::edge_weight(&batch, norm_loss)?;
            let pred = self.predict(&batch, edge_weight.as_ref())?;
            averager.push(&EvalReport::from_predictions(&pred, &batch.labels, |split| {
                batch.split_nodes(split)
            }));
        }
        Ok(averager.finish())
    }

    /// Scores a single pass over the whole graph with mean aggregation.
    pub fn eval_full(&mut self, graph: &GraphBatch) -> Result<EvalReport> {
        self.model.set_aggr(Aggregation::Mean);
        let pred = self.predict(graph, None)?;
        Ok(EvalReport::from_predictions(&pred, &graph.labels, |split| {
            graph.split_nodes(split)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::graph::tests::toy_graph;
    use crate::datasets::{Dataset, Graph};
    use crate::nn::{utils::reset_parameters, ModelKind};
    use crate::samplers::{LoaderOptions, NodeSampler};
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    fn trainer(graph: &Graph, kind: ModelKind, seed: u64) -> Result<Trainer> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = kind.build(graph.num_features(), 16, graph.num_classes(), 2, 0.2, seed, vs)?;
        reset_parameters(&varmap, seed)?;
        Trainer::new(model, &varmap, 0.01)
    }

    fn full_batch(graph: &Graph) -> Result<GraphBatch> {
        graph.induced_subgraph(graph.all_nodes()?, &Device::Cpu)
    }

    #[test]
    fn nll_picks_the_label_column() -> Result<()> {
        let log_probs = Tensor::new(&[[-0.1f32, -2.0], [-3.0, -0.05]], &Device::Cpu)?;
        let y = Tensor::new(&[1u32, 1], &Device::Cpu)?;
        assert_eq!(node_nll(&log_probs, &y)?.to_vec1::<f32>()?, vec![2.0, 0.05]);
        Ok(())
    }

    #[test]
    fn full_training_is_reproducible() -> Result<()> {
        let graph = toy_graph(50, 3);
        let batch = full_batch(&graph)?;
        let run = |kind| -> Result<(f32, EvalReport)> {
            let mut trainer = trainer(&graph, kind, 42)?;
            let loss = trainer.train_full(&batch)?;
            Ok((loss, trainer.eval_full(&batch)?))
        };
        for kind in [ModelKind::Sage, ModelKind::Gat] {
            let (loss, report) = run(kind)?;
            assert!(loss.is_finite());
            assert_eq!((loss, report), run(kind)?);
        }
        Ok(())
    }

    #[test]
    fn full_training_lowers_the_loss() -> Result<()> {
        let graph = toy_graph(60, 4);
        let batch = full_batch(&graph)?;
        let mut trainer = trainer(&graph, ModelKind::Sage, 0)?;
        let first = trainer.train_full(&batch)?;
        let mut last = first;
        for _ in 0..30 {
            last = trainer.train_full(&batch)?;
        }
        assert!(last < first);
        assert_eq!(trainer.model().aggr(), Aggregation::Mean);
        Ok(())
    }

    #[test]
    fn sampled_passes_with_and_without_normalization() -> Result<()> {
        let graph = toy_graph(80, 5);
        for (coverage, norm_loss) in [(0, false), (20, true)] {
            let options = LoaderOptions {
                num_steps: 3,
                sample_coverage: coverage,
                num_workers: 0,
                seed: 1,
                save_dir: None,
            };
            let sampler = Box::new(NodeSampler::new(30));
            let mut loader = SaintLoader::new(&graph, sampler, options, &Device::Cpu)?;
            let mut trainer = trainer(&graph, ModelKind::Sage, 1)?;
            let loss = trainer.train_sample(&mut loader, norm_loss)?;
            assert!(loss.is_finite() && loss > 0.0);
            assert_eq!(trainer.model().aggr(), Aggregation::Sum);
            let report = trainer.eval_sample(&mut loader, norm_loss)?;
            for split in Split::ALL {
                assert!((0.0..=1.0).contains(&report.acc(split)));
                assert!((0.0..=1.0).contains(&report.f1(split)));
            }
        }
        Ok(())
    }

    #[test]
    fn normalization_without_statistics_is_an_error() -> Result<()> {
        let graph = toy_graph(40, 2);
        let options = LoaderOptions {
            num_steps: 1,
            sample_coverage: 0,
            num_workers: 0,
            seed: 0,
            save_dir: None,
        };
        let mut loader = SaintLoader::new(&graph, Box::new(NodeSampler::new(40)), options, &Device::Cpu)?;
        let mut trainer = trainer(&graph, ModelKind::Sage, 0)?;
        assert!(trainer.train_sample(&mut loader, true).is_err());
        Ok(())
    }
}
