use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::Result;
use candle_core::Device;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::info;

use super::{sample_in_workers, SaintNorm, SubgraphSampler};
use crate::datasets::{Graph, GraphBatch};

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub num_steps: usize,
    /// 0 skips the normalization statistics.
    pub sample_coverage: usize,
    pub num_workers: usize,
    pub seed: u64,
    /// Directory for the normalization cache.
    pub save_dir: Option<PathBuf>,
}

/// Restartable source of GraphSAINT batches: every call to [`SaintLoader::epoch`]
/// yields `num_steps` freshly sampled subgraphs.
pub struct SaintLoader<'g> {
    graph: &'g Graph,
    sampler: Box<dyn SubgraphSampler>,
    num_steps: usize,
    num_workers: usize,
    norm: Option<SaintNorm>,
    device: Device,
    rng: StdRng,
}

impl<'g> SaintLoader<'g> {
    pub fn new(
        graph: &'g Graph,
        sampler: Box<dyn SubgraphSampler>,
        options: LoaderOptions,
        device: &Device,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let norm = if options.sample_coverage > 0 {
            let cache = options.save_dir.as_ref().map(|dir| {
                dir.join(format!("{}_{}_norm.npz", sampler.key(), options.sample_coverage))
            });
            Some(SaintNorm::load_or_estimate(
                cache.as_deref(),
                graph,
                sampler.as_ref(),
                options.num_steps,
                options.sample_coverage,
                options.num_workers,
                &mut rng,
            )?)
        } else {
            None
        };
        info!(
            "{} batches per epoch, normalization {}",
            options.num_steps,
            if norm.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            graph,
            sampler,
            num_steps: options.num_steps,
            num_workers: options.num_workers,
            norm,
            device: device.clone(),
            rng,
        })
    }

    pub fn len(&self) -> usize {
        self.num_steps
    }

    pub fn is_empty(&self) -> bool {
        self.num_steps == 0
    }

    pub fn norm(&self) -> Option<&SaintNorm> {
        self.norm.as_ref()
    }

    /// Starts a new pass over `num_steps` sampled batches. With workers the
    /// node sets are drawn up front in the background; otherwise lazily.
    pub fn epoch(&mut self) -> Epoch<'_, 'g> {
        let prefetched = if self.num_workers > 0 {
            let (graph, sampler) = (self.graph, self.sampler.as_ref());
            sample_in_workers(self.num_steps, self.num_workers, self.rng.gen(), |rng| {
                sampler.sample_nodes(graph, rng)
            })
            .into()
        } else {
            VecDeque::new()
        };
        Epoch {
            remaining: self.num_steps,
            prefetched,
            loader: self,
        }
    }
}

pub struct Epoch<'l, 'g> {
    loader: &'l mut SaintLoader<'g>,
    prefetched: VecDeque<Vec<u32>>,
    remaining: usize,
}

impl Iterator for Epoch<'_, '_> {
    type Item = Result<GraphBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let loader = &mut *self.loader;
        let nodes = match self.prefetched.pop_front() {
            Some(nodes) => nodes,
            None => loader.sampler.sample_nodes(loader.graph, &mut loader.rng),
        };
        let sub = loader.graph.subgraph(&nodes);
        Some(
            loader
                .graph
                .to_batch(&sub, loader.norm.as_ref(), &loader.device)
                .map_err(Into::into),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Epoch<'_, '_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::graph::tests::toy_graph;
    use crate::samplers::{NodeSampler, RandomWalkSampler};

    fn options(num_steps: usize, sample_coverage: usize, num_workers: usize) -> LoaderOptions {
        LoaderOptions {
            num_steps,
            sample_coverage,
            num_workers,
            seed: 17,
            save_dir: None,
        }
    }

    #[test]
    fn every_epoch_yields_num_steps_batches() -> Result<()> {
        let graph = toy_graph(100, 1);
        let sampler = Box::new(NodeSampler::new(25));
        let mut loader = SaintLoader::new(&graph, sampler, options(4, 0, 0), &Device::Cpu)?;
        for _ in 0..3 {
            let batches = loader.epoch().collect::<Result<Vec<_>>>()?;
            assert_eq!(batches.len(), 4);
            assert!(batches.iter().all(|b| b.num_nodes() == 25));
            assert!(batches.iter().all(|b| b.node_norm.is_none()));
        }
        Ok(())
    }

    #[test]
    fn batches_carry_normalization() -> Result<()> {
        let graph = toy_graph(80, 6);
        let sampler = Box::new(RandomWalkSampler::new(8, 2));
        let mut loader = SaintLoader::new(&graph, sampler, options(3, 20, 2), &Device::Cpu)?;
        assert!(loader.norm().is_some());
        for batch in loader.epoch() {
            let batch = batch?;
            let node_norm = batch.node_norm.as_ref().unwrap();
            assert_eq!(node_norm.dims(), &[batch.num_nodes()]);
            let weight = batch.normalized_edge_weight()?.unwrap();
            assert_eq!(weight.dims(), batch.edge_attr.dims());
        }
        Ok(())
    }

    #[test]
    fn same_seed_same_epochs() -> Result<()> {
        let graph = toy_graph(60, 2);
        let labels = |workers| -> Result<Vec<Vec<u32>>> {
            let sampler = Box::new(NodeSampler::new(10));
            let mut loader = SaintLoader::new(&graph, sampler, options(3, 0, workers), &Device::Cpu)?;
            loader.epoch().map(|b| Ok(b?.labels)).collect()
        };
        assert_eq!(labels(0)?, labels(0)?);
        assert_eq!(labels(2)?, labels(2)?);
        Ok(())
    }
}
