use rand::{distributions::WeightedIndex, prelude::Distribution, RngCore};

use super::SubgraphSampler;
use crate::datasets::Graph;

/// Draws `batch_size` edges with probability proportional to
/// `1 / deg(source) + 1 / deg(target)` and keeps their endpoints.
#[derive(Debug, Clone)]
pub struct EdgeSampler {
    batch_size: usize,
    // None for an edgeless graph
    distribution: Option<WeightedIndex<f64>>,
}

impl EdgeSampler {
    pub fn new(graph: &Graph, batch_size: usize) -> Self {
        let inv_degree = |u: u32| 1.0 / graph.out_degree(u).max(1) as f64;
        let weights = graph.edges().map(|(u, v, _)| inv_degree(u) + inv_degree(v));
        Self {
            batch_size,
            distribution: WeightedIndex::new(weights).ok(),
        }
    }
}

impl SubgraphSampler for EdgeSampler {
    fn key(&self) -> String {
        format!("re_{}", self.batch_size)
    }

    fn sample_nodes(&self, graph: &Graph, rng: &mut dyn RngCore) -> Vec<u32> {
        let Some(distribution) = &self.distribution else {
            return Vec::new();
        };
        let mut nodes = Vec::with_capacity(2 * self.batch_size);
        for _ in 0..self.batch_size {
            let e = distribution.sample(rng);
            nodes.push(graph.edge_source(e));
            nodes.push(graph.edge_target(e));
        }
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }
}
