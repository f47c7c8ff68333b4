use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, Rng};
use tracing::{debug, info};

use super::{sample_in_workers, SubgraphSampler};
use crate::datasets::Graph;

/// GraphSAINT normalization factors estimated from how often each node and
/// edge shows up in sampled subgraphs.
#[derive(Debug, Clone, PartialEq)]
pub struct SaintNorm {
    /// Loss weight per node.
    pub node_norm: Vec<f32>,
    /// Aggregation weight per edge (multiplied with `edge_attr`).
    pub edge_norm: Vec<f32>,
}

impl SaintNorm {
    /// Samples batches in rounds of `num_steps` until `graph.num_nodes() * sample_coverage`
    /// nodes have been drawn, then derives the factors from the counts.
    pub fn estimate(
        graph: &Graph,
        sampler: &dyn SubgraphSampler,
        num_steps: usize,
        sample_coverage: usize,
        num_workers: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut node_count = vec![0u32; graph.num_nodes()];
        let mut edge_count = vec![0u32; graph.num_edges()];
        let target = graph.num_nodes() * sample_coverage;
        let mut total_sampled_nodes = 0;
        let mut num_samples = 0;

        let pbar = ProgressBar::new(target as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len}")
        {
            pbar.set_style(style.progress_chars("#>-"));
        }
        pbar.set_message("Compute GraphSAINT normalization");

        while total_sampled_nodes < target {
            let subgraphs = sample_in_workers(num_steps, num_workers, rng.gen(), |rng| {
                let nodes = sampler.sample_nodes(graph, rng);
                graph.subgraph(&nodes)
            });
            for sub in subgraphs {
                for &u in &sub.nodes {
                    node_count[u as usize] += 1;
                }
                for &e in &sub.edge_ids {
                    edge_count[e] += 1;
                }
                total_sampled_nodes += sub.nodes.len();
            }
            num_samples += num_steps;
            pbar.set_position(total_sampled_nodes.min(target) as u64);
            if total_sampled_nodes == 0 {
                // nothing can ever be sampled from this graph
                break;
            }
        }
        pbar.finish_and_clear();
        debug!(num_samples, total_sampled_nodes, "normalization counts collected");

        Self::from_counts(graph, &node_count, &edge_count, num_samples)
    }

    pub fn from_counts(
        graph: &Graph,
        node_count: &[u32],
        edge_count: &[u32],
        num_samples: usize,
    ) -> Self {
        let edge_norm = graph
            .edges()
            .map(|(u, _, e)| {
                let (t, c) = (node_count[u as usize], edge_count[e]);
                match (t, c) {
                    (0, 0) => 0.1,
                    (_, 0) => 1e4,
                    (t, c) => (t as f32 / c as f32).min(1e4),
                }
            })
            .collect();
        let num_nodes = graph.num_nodes() as f32;
        let node_norm = node_count
            .iter()
            .map(|&c| {
                let c = if c == 0 { 0.1 } else { c as f32 };
                num_samples as f32 / c / num_nodes
            })
            .collect();
        Self {
            node_norm,
            edge_norm,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let device = Device::Cpu;
        let node_norm = Tensor::new(self.node_norm.as_slice(), &device)?;
        let edge_norm = Tensor::new(self.edge_norm.as_slice(), &device)?;
        Tensor::write_npz(
            &[("node_norm", &node_norm), ("edge_norm", &edge_norm)],
            path.as_ref(),
        )?;
        Ok(())
    }

    /// Reads cached factors; `None` when they do not fit `graph`.
    pub fn load<P: AsRef<Path>>(path: P, graph: &Graph) -> Result<Option<Self>> {
        let path = path.as_ref();
        let mut arrays: HashMap<String, Tensor> = HashMap::from_iter(Tensor::read_npz(path)?);
        let mut take = |name: &str| -> Result<Vec<f32>> {
            Ok(arrays
                .remove(name)
                .with_context(|| format!("{} has no array {:?}", path.display(), name))?
                .to_dtype(DType::F32)?
                .to_vec1::<f32>()?)
        };
        let norm = Self {
            node_norm: take("node_norm")?,
            edge_norm: take("edge_norm")?,
        };
        if norm.node_norm.len() != graph.num_nodes() || norm.edge_norm.len() != graph.num_edges() {
            return Ok(None);
        }
        Ok(Some(norm))
    }

    /// Loads the factors from `cache` when present, otherwise estimates and stores them.
    pub fn load_or_estimate(
        cache: Option<&Path>,
        graph: &Graph,
        sampler: &dyn SubgraphSampler,
        num_steps: usize,
        sample_coverage: usize,
        num_workers: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if let Some(path) = cache.filter(|path| path.exists()) {
            if let Some(norm) = Self::load(path, graph)? {
                info!("Loaded GraphSAINT normalization from {}", path.display());
                return Ok(norm);
            }
            info!("Ignoring stale normalization cache {}", path.display());
        }
        let norm = Self::estimate(graph, sampler, num_steps, sample_coverage, num_workers, rng);
        if let Some(path) = cache {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            norm.save(path)?;
            info!("Saved GraphSAINT normalization to {}", path.display());
        }
        Ok(norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::graph::tests::toy_graph;
    use crate::samplers::{NodeSampler, RandomWalkSampler};
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn factors_follow_the_counts() {
        // 0 -> 1, 1 -> 0, 1 -> 2
        let masks = [vec![true; 3], vec![false; 3], vec![false; 3]];
        let graph = Graph::new(vec![0.0; 3], 1, vec![0, 1, 0], &[0, 1, 1], &[1, 0, 2], masks)
            .unwrap();
        let norm = SaintNorm::from_counts(&graph, &[4, 2, 0], &[2, 0, 0], 10);
        assert_relative_eq!(norm.node_norm[0], 10.0 / 4.0 / 3.0);
        assert_relative_eq!(norm.node_norm[2], 10.0 / 0.1 / 3.0, max_relative = 1e-5);
        // edge 0 -> 1: 4 / 2; edge 1 -> 0 never sampled: clamped; 1 -> 2 likewise
        assert_eq!(norm.edge_norm, vec![2.0, 1e4, 1e4]);

        let norm = SaintNorm::from_counts(&graph, &[0, 0, 0], &[0, 0, 0], 1);
        assert_eq!(norm.edge_norm, vec![0.1, 0.1, 0.1]);
    }

    #[test]
    fn normalized_sums_estimate_the_full_mean() {
        let graph = toy_graph(300, 11);
        let sampler = NodeSampler::new(60);
        let mut rng = StdRng::seed_from_u64(5);
        let norm = SaintNorm::estimate(&graph, &sampler, 5, 200, 0, &mut rng);

        // per-node "loss" values; the weighted batch sum must track their mean
        let loss: Vec<f32> = (0..300).map(|u| (u % 7) as f32).collect();
        let full_mean = loss.iter().sum::<f32>() / 300.0;

        let num_batches = 400;
        let mut weight_sum = 0.0;
        let mut estimate = 0.0;
        for _ in 0..num_batches {
            let nodes = sampler.sample_nodes(&graph, &mut rng);
            for &u in &nodes {
                weight_sum += norm.node_norm[u as usize];
                estimate += norm.node_norm[u as usize] * loss[u as usize];
            }
        }
        assert_relative_eq!(weight_sum / num_batches as f32, 1.0, max_relative = 0.05);
        assert_relative_eq!(estimate / num_batches as f32, full_mean, max_relative = 0.05);
    }

    #[test]
    fn workers_cover_the_same_ground() {
        let graph = toy_graph(120, 8);
        let sampler = RandomWalkSampler::new(10, 2);
        let norm = SaintNorm::estimate(&graph, &sampler, 4, 50, 3, &mut StdRng::seed_from_u64(1));
        assert_eq!(norm.node_norm.len(), 120);
        assert!(norm.node_norm.iter().all(|&w| w.is_finite() && w > 0.0));
        let again = SaintNorm::estimate(&graph, &sampler, 4, 50, 3, &mut StdRng::seed_from_u64(1));
        assert_eq!(norm, again);
    }

    #[test]
    fn cache_round_trips_and_detects_mismatch() -> Result<()> {
        let graph = toy_graph(60, 2);
        let sampler = NodeSampler::new(30);
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rn_30_10_norm.npz");
        let mut rng = StdRng::seed_from_u64(0);
        let norm =
            SaintNorm::load_or_estimate(Some(&path), &graph, &sampler, 2, 10, 0, &mut rng)?;
        assert!(path.exists());
        assert_eq!(SaintNorm::load(&path, &graph)?, Some(norm));
        assert_eq!(SaintNorm::load(&path, &toy_graph(61, 2))?, None);
        Ok(())
    }
}
