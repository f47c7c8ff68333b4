//! GraphSAINT subgraph samplers.
//!
//! A sampler only picks node sets; [`SaintLoader`] turns them into induced
//! subgraph batches and attaches the normalization factors.

use std::fmt;
use std::str::FromStr;

use rand::{rngs::StdRng, RngCore, SeedableRng};
use serde::Serialize;

use crate::config::ConfigError;
use crate::datasets::Graph;

mod edge;
pub use edge::EdgeSampler;

mod loader;
pub use loader::{Epoch, LoaderOptions, SaintLoader};

mod node;
pub use node::NodeSampler;

mod norm;
pub use norm::SaintNorm;

mod random_walk;
pub use random_walk::RandomWalkSampler;

pub trait SubgraphSampler: Send + Sync {
    /// Identifies the sampler and its parameters in cache file names.
    fn key(&self) -> String;
    /// Node ids of one batch, sorted and unique.
    fn sample_nodes(&self, graph: &Graph, rng: &mut dyn RngCore) -> Vec<u32>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SamplerKind {
    #[serde(rename = "rw")]
    RandomWalk,
    #[serde(rename = "rn")]
    Node,
    #[serde(rename = "re")]
    Edge,
    #[serde(rename = "full")]
    Full,
}

impl SamplerKind {
    /// `None` in full-graph mode.
    pub fn build(
        &self,
        graph: &Graph,
        batch_size: usize,
        walk_length: usize,
    ) -> Option<Box<dyn SubgraphSampler>> {
        match self {
            Self::RandomWalk => Some(Box::new(RandomWalkSampler::new(batch_size, walk_length))),
            Self::Node => Some(Box::new(NodeSampler::new(batch_size))),
            Self::Edge => Some(Box::new(EdgeSampler::new(graph, batch_size))),
            Self::Full => None,
        }
    }

    /// Batches per epoch when not given explicitly.
    pub fn default_num_steps(&self, num_nodes: usize, batch_size: usize) -> usize {
        match self {
            Self::RandomWalk => 5,
            _ => num_nodes.div_ceil(batch_size).max(1),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::RandomWalk => "GraphSaint randomwalk sampler",
            Self::Node => "random node sampler",
            Self::Edge => "GraphSaint edge sampler",
            Self::Full => "full-graph batches",
        }
    }
}

impl FromStr for SamplerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "rw" => Ok(Self::RandomWalk),
            "rn" => Ok(Self::Node),
            "re" => Ok(Self::Edge),
            "full" => Ok(Self::Full),
            _ => Err(ConfigError::UnknownSampler(s.to_owned())),
        }
    }
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::RandomWalk => write!(f, "rw"),
            Self::Node => write!(f, "rn"),
            Self::Edge => write!(f, "re"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Runs `f` `count` times, split over `num_workers` threads (0 runs inline).
///
/// Worker `i` owns an rng seeded with `seed + i` and produces a contiguous
/// chunk, so the output only depends on `seed` and `num_workers`.
pub(crate) fn sample_in_workers<T, F>(count: usize, num_workers: usize, seed: u64, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&mut StdRng) -> T + Sync,
{
    if num_workers == 0 {
        let mut rng = StdRng::seed_from_u64(seed);
        return (0..count).map(|_| f(&mut rng)).collect();
    }
    let chunk = count.div_ceil(num_workers);
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..num_workers)
            .map(|i| {
                let f = &f;
                let len = chunk.min(count.saturating_sub(i * chunk));
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                    (0..len).map(|_| f(&mut rng)).collect::<Vec<T>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    })
}
