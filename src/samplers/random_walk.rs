use rand::{Rng, RngCore};

use super::SubgraphSampler;
use crate::datasets::Graph;

/// Unions the nodes visited by `batch_size` short random walks from uniform roots.
#[derive(Debug, Clone)]
pub struct RandomWalkSampler {
    batch_size: usize,
    walk_length: usize,
}

impl RandomWalkSampler {
    pub fn new(batch_size: usize, walk_length: usize) -> Self {
        Self {
            batch_size,
            walk_length,
        }
    }
}

impl SubgraphSampler for RandomWalkSampler {
    fn key(&self) -> String {
        format!("rw_{}_{}", self.batch_size, self.walk_length)
    }

    fn sample_nodes(&self, graph: &Graph, rng: &mut dyn RngCore) -> Vec<u32> {
        let num_nodes = graph.num_nodes() as u32;
        if num_nodes == 0 {
            return Vec::new();
        }
        let mut nodes = Vec::with_capacity(self.batch_size * (self.walk_length + 1));
        for _ in 0..self.batch_size {
            let mut u = rng.gen_range(0..num_nodes);
            nodes.push(u);
            for _ in 0..self.walk_length {
                let neighbors = graph.neighbors(u);
                // a node without out-edges keeps the walk in place
                if !neighbors.is_empty() {
                    u = neighbors[rng.gen_range(0..neighbors.len())];
                }
                nodes.push(u);
            }
        }
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }
}
