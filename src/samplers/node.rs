use rand::{seq::index, RngCore};

use super::SubgraphSampler;
use crate::datasets::Graph;

/// Draws `batch_size` distinct nodes uniformly at random.
#[derive(Debug, Clone)]
pub struct NodeSampler {
    batch_size: usize,
}

impl NodeSampler {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }
}

impl SubgraphSampler for NodeSampler {
    fn key(&self) -> String {
        format!("rn_{}", self.batch_size)
    }

    fn sample_nodes(&self, graph: &Graph, rng: &mut dyn RngCore) -> Vec<u32> {
        let num_nodes = graph.num_nodes();
        let amount = self.batch_size.min(num_nodes);
        let mut nodes: Vec<u32> = index::sample(rng, num_nodes, amount)
            .into_iter()
            .map(|u| u as u32)
            .collect();
        nodes.sort_unstable();
        nodes
    }
}
