use std::collections::HashMap;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Device, Tensor};

use super::traits::Dataset;
use crate::metrics::Split;
use crate::samplers::SaintNorm;

/// Node-classification graph held in host memory.
///
/// Edges are stored as a coalesced CSR adjacency indexed by the source node;
/// the position of an edge in `indices` is its edge id.
#[derive(Debug, Clone)]
pub struct Graph {
    num_features: usize,
    num_classes: usize,
    x: Vec<f32>,
    y: Vec<u32>,
    indptr: Vec<usize>,
    indices: Vec<u32>,
    edge_attr: Vec<f32>,
    masks: [Vec<bool>; 3],
}

/// Node-induced subgraph in host memory, before it is moved to a device.
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    /// Global ids of the kept nodes, sorted and unique.
    pub nodes: Vec<u32>,
    /// Local endpoints of the kept edges.
    pub source: Vec<u32>,
    pub target: Vec<u32>,
    /// Global ids of the kept edges.
    pub edge_ids: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct GraphBatch {
    pub x: Tensor,
    pub edge_index: Tensor,
    pub y: Tensor,
    pub edge_attr: Tensor,
    pub node_norm: Option<Tensor>,
    pub edge_norm: Option<Tensor>,
    /// Host copy of `y` for the metrics.
    pub labels: Vec<u32>,
    split_nodes: [Vec<u32>; 3],
    split_index: [Tensor; 3],
}

impl GraphBatch {
    pub fn num_nodes(&self) -> usize {
        self.labels.len()
    }
    pub fn split_nodes(&self, split: Split) -> &[u32] {
        &self.split_nodes[split as usize]
    }
    /// Local indices of the nodes in `split` (the torch-style mask as an index tensor).
    pub fn split_index(&self, split: Split) -> &Tensor {
        &self.split_index[split as usize]
    }
    /// `edge_norm * edge_attr`, or `None` without normalization statistics.
    pub fn normalized_edge_weight(&self) -> candle_core::Result<Option<Tensor>> {
        self.edge_norm
            .as_ref()
            .map(|edge_norm| edge_norm.mul(&self.edge_attr))
            .transpose()
    }
}

impl Graph {
    /// Builds a graph from an edge list; duplicate edges are dropped.
    pub fn new(
        x: Vec<f32>,
        num_features: usize,
        y: Vec<u32>,
        source: &[u32],
        target: &[u32],
        masks: [Vec<bool>; 3],
    ) -> Result<Self> {
        let num_nodes = y.len();
        ensure!(
            x.len() == num_nodes * num_features,
            "feature matrix has {} values, expected {} x {}",
            x.len(),
            num_nodes,
            num_features
        );
        ensure!(source.len() == target.len(), "edge endpoint arrays differ in length");
        ensure!(
            source.iter().chain(target).all(|&u| (u as usize) < num_nodes),
            "edge endpoint out of range"
        );
        for mask in &masks {
            ensure!(mask.len() == num_nodes, "mask length does not match node count");
        }
        let num_classes = y.iter().max().map_or(0, |&c| c as usize + 1);

        let (indptr, indices) = coalesce(num_nodes, source, target);

        // edge_attr = 1 / in_degree(target)
        let mut in_degree = vec![0u32; num_nodes];
        for &v in &indices {
            in_degree[v as usize] += 1;
        }
        let edge_attr = indices
            .iter()
            .map(|&v| 1.0 / in_degree[v as usize] as f32)
            .collect();

        Ok(Self {
            num_features,
            num_classes,
            x,
            y,
            indptr,
            indices,
            edge_attr,
            masks,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.y.len()
    }
    pub fn num_edges(&self) -> usize {
        self.indices.len()
    }
    pub fn num_features(&self) -> usize {
        self.num_features
    }
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
    pub fn labels(&self) -> &[u32] {
        &self.y
    }
    pub fn features(&self, u: u32) -> &[f32] {
        let start = u as usize * self.num_features;
        &self.x[start..start + self.num_features]
    }
    pub fn neighbors(&self, u: u32) -> &[u32] {
        let u = u as usize;
        &self.indices[self.indptr[u]..self.indptr[u + 1]]
    }
    pub fn out_degree(&self, u: u32) -> usize {
        let u = u as usize;
        self.indptr[u + 1] - self.indptr[u]
    }
    pub fn edge_attr(&self) -> &[f32] {
        &self.edge_attr
    }
    pub fn mask(&self, split: Split) -> &[bool] {
        &self.masks[split as usize]
    }
    /// Source node of edge `e`.
    pub fn edge_source(&self, e: usize) -> u32 {
        (self.indptr.partition_point(|&p| p <= e) - 1) as u32
    }
    /// Target node of edge `e`.
    pub fn edge_target(&self, e: usize) -> u32 {
        self.indices[e]
    }
    /// `(source, target, edge id)` in edge-id order.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32, usize)> + '_ {
        (0..self.num_nodes()).flat_map(move |u| {
            (self.indptr[u]..self.indptr[u + 1]).map(move |e| (u as u32, self.indices[e], e))
        })
    }

    /// Node-induced subgraph over `nodes`, which must be sorted and unique.
    pub fn subgraph(&self, nodes: &[u32]) -> Subgraph {
        let mut local = vec![u32::MAX; self.num_nodes()];
        for (i, &u) in nodes.iter().enumerate() {
            local[u as usize] = i as u32;
        }
        let mut sub = Subgraph {
            nodes: nodes.to_vec(),
            ..Default::default()
        };
        for (i, &u) in nodes.iter().enumerate() {
            let u = u as usize;
            for e in self.indptr[u]..self.indptr[u + 1] {
                let j = local[self.indices[e] as usize];
                if j != u32::MAX {
                    sub.source.push(i as u32);
                    sub.target.push(j);
                    sub.edge_ids.push(e);
                }
            }
        }
        sub
    }

    /// Moves a subgraph to `device`, attaching the normalization factors when given.
    pub fn to_batch(
        &self,
        sub: &Subgraph,
        norm: Option<&SaintNorm>,
        device: &Device,
    ) -> candle_core::Result<GraphBatch> {
        let num_nodes = sub.nodes.len();
        let num_edges = sub.edge_ids.len();

        let mut x = Vec::with_capacity(num_nodes * self.num_features);
        for &u in &sub.nodes {
            x.extend_from_slice(self.features(u));
        }
        let x = Tensor::from_vec(x, (num_nodes, self.num_features), device)?;

        let mut edge_index = Vec::with_capacity(2 * num_edges);
        edge_index.extend_from_slice(&sub.source);
        edge_index.extend_from_slice(&sub.target);
        let edge_index = Tensor::from_vec(edge_index, (2, num_edges), device)?;

        let labels: Vec<u32> = sub.nodes.iter().map(|&u| self.y[u as usize]).collect();
        let y = Tensor::new(labels.as_slice(), device)?;

        let split_nodes = Split::ALL.map(|split| {
            let mask = self.mask(split);
            sub.nodes
                .iter()
                .enumerate()
                .filter_map(|(i, &u)| mask[u as usize].then_some(i as u32))
                .collect::<Vec<u32>>()
        });
        let split_index = [
            Tensor::new(split_nodes[0].as_slice(), device)?,
            Tensor::new(split_nodes[1].as_slice(), device)?,
            Tensor::new(split_nodes[2].as_slice(), device)?,
        ];

        let edge_attr =
            Tensor::from_iter(sub.edge_ids.iter().map(|&e| self.edge_attr[e]), device)?;
        let (node_norm, edge_norm) = match norm {
            Some(norm) => (
                Some(Tensor::from_iter(
                    sub.nodes.iter().map(|&u| norm.node_norm[u as usize]),
                    device,
                )?),
                Some(Tensor::from_iter(
                    sub.edge_ids.iter().map(|&e| norm.edge_norm[e]),
                    device,
                )?),
            ),
            None => (None, None),
        };

        Ok(GraphBatch {
            x,
            edge_index,
            y,
            edge_attr,
            node_norm,
            edge_norm,
            labels,
            split_nodes,
            split_index,
        })
    }

    /// Writes the graph as `x`, `edge_index`, `y` and the three masks.
    pub fn save_processed<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::from_slice(&self.x, (self.num_nodes(), self.num_features), &device)?;
        let mut edge_index = Vec::with_capacity(2 * self.num_edges());
        edge_index.extend(self.edges().map(|(u, _, _)| u));
        edge_index.extend_from_slice(&self.indices);
        let edge_index = Tensor::from_vec(edge_index, (2, self.num_edges()), &device)?;
        let y = Tensor::new(self.y.as_slice(), &device)?;
        let [train_mask, val_mask, test_mask] = self.masks.clone().map(|mask| {
            Tensor::from_iter(mask.into_iter().map(u8::from), &device)
        });
        Tensor::write_npz(
            &[
                ("x", &x),
                ("edge_index", &edge_index),
                ("y", &y),
                ("train_mask", &train_mask?),
                ("val_mask", &val_mask?),
                ("test_mask", &test_mask?),
            ],
            path.as_ref(),
        )?;
        Ok(())
    }

    pub fn load_processed<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut arrays: HashMap<String, Tensor> = HashMap::from_iter(
            Tensor::read_npz(path).with_context(|| format!("reading {}", path.display()))?,
        );
        let mut take = |name: &str| {
            arrays
                .remove(name)
                .with_context(|| format!("{} has no array {:?}", path.display(), name))
        };

        let x = take("x")?.to_dtype(DType::F32)?;
        let (_, num_features) = x.dims2()?;
        let x = x.flatten_all()?.to_vec1::<f32>()?;
        let edge_index = take("edge_index")?.to_dtype(DType::U32)?.to_vec2::<u32>()?;
        ensure!(edge_index.len() == 2, "edge_index must have two rows");
        let y = take("y")?.to_dtype(DType::U32)?.to_vec1::<u32>()?;
        let mut mask = |name: &str| -> Result<Vec<bool>> {
            Ok(take(name)?
                .to_dtype(DType::U8)?
                .to_vec1::<u8>()?
                .into_iter()
                .map(|m| m != 0)
                .collect())
        };
        let masks = [mask("train_mask")?, mask("val_mask")?, mask("test_mask")?];
        Self::new(x, num_features, y, &edge_index[0], &edge_index[1], masks)
    }
}

impl Dataset for Graph {
    type Batch = GraphBatch;
    type NodeSelector = Vec<u32>;

    fn all_nodes(&self) -> Result<Vec<u32>> {
        Ok((0..self.num_nodes() as u32).collect())
    }
    fn induced_subgraph(&self, nodes: Vec<u32>, device: &Device) -> Result<GraphBatch> {
        Ok(self.to_batch(&self.subgraph(&nodes), None, device)?)
    }
}

/// CSR from an edge list: rows sorted by target, duplicates removed.
fn coalesce(num_nodes: usize, source: &[u32], target: &[u32]) -> (Vec<usize>, Vec<u32>) {
    let mut indptr = vec![0usize; num_nodes + 1];
    for &u in source {
        indptr[u as usize + 1] += 1;
    }
    for u in 0..num_nodes {
        indptr[u + 1] += indptr[u];
    }
    let mut cursor = indptr.clone();
    let mut indices = vec![0u32; source.len()];
    for (&u, &v) in source.iter().zip(target) {
        indices[cursor[u as usize]] = v;
        cursor[u as usize] += 1;
    }

    let mut coalesced = Vec::with_capacity(indices.len());
    let mut new_indptr = Vec::with_capacity(num_nodes + 1);
    new_indptr.push(0);
    for u in 0..num_nodes {
        let row = &mut indices[indptr[u]..indptr[u + 1]];
        row.sort_unstable();
        let start = coalesced.len();
        for &v in row.iter() {
            if coalesced.len() == start || coalesced.last() != Some(&v) {
                coalesced.push(v);
            }
        }
        new_indptr.push(coalesced.len());
    }
    (new_indptr, coalesced)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Two-community graph whose labels are recoverable from the features.
    pub(crate) fn toy_graph(num_nodes: usize, seed: u64) -> Graph {
        let mut rng = StdRng::seed_from_u64(seed);
        let num_features = 8;
        let y: Vec<u32> = (0..num_nodes).map(|u| (u % 2) as u32).collect();
        let mut x = Vec::with_capacity(num_nodes * num_features);
        for &c in &y {
            for f in 0..num_features {
                let signal = if f % 2 == c as usize { 1.0 } else { 0.0 };
                x.push(signal + rng.gen_range(-0.1..0.1));
            }
        }
        let mut source = Vec::new();
        let mut target = Vec::new();
        for u in 0..num_nodes as u32 {
            for _ in 0..3 {
                let v = rng.gen_range(0..num_nodes as u32);
                if v != u {
                    source.extend([u, v]);
                    target.extend([v, u]);
                }
            }
        }
        let masks = [
            (0..num_nodes).map(|u| u % 5 < 3).collect(),
            (0..num_nodes).map(|u| u % 5 == 3).collect(),
            (0..num_nodes).map(|u| u % 5 == 4).collect(),
        ];
        Graph::new(x, num_features, y, &source, &target, masks).unwrap()
    }

    fn path_graph() -> Graph {
        // 0 -> 1 -> 2 -> 3, plus a duplicate 0 -> 1 and 3 -> 1
        let source = [0, 1, 2, 0, 3];
        let target = [1, 2, 3, 1, 1];
        let masks = [
            vec![true, true, false, false],
            vec![false, false, true, false],
            vec![false, false, false, true],
        ];
        Graph::new(vec![0.0; 8], 2, vec![0, 1, 0, 1], &source, &target, masks).unwrap()
    }

    #[test]
    fn coalesces_duplicate_edges() {
        let graph = path_graph();
        assert_eq!(graph.num_nodes(), 4);
        assert_eq!(graph.num_edges(), 4);
        assert_eq!(graph.num_classes(), 2);
        assert_eq!(graph.neighbors(0), &[1]);
        assert_eq!(graph.neighbors(3), &[1]);
        let edges: Vec<_> = graph.edges().collect();
        assert_eq!(edges, vec![(0, 1, 0), (1, 2, 1), (2, 3, 2), (3, 1, 3)]);
        assert_eq!(graph.edge_source(2), 2);
        assert_eq!(graph.edge_target(3), 1);
    }

    #[test]
    fn edge_attr_is_inverse_in_degree() {
        let graph = path_graph();
        // node 1 receives from 0 and 3
        assert_eq!(graph.edge_attr(), &[0.5, 1.0, 1.0, 0.5]);
    }

    #[test]
    fn subgraph_keeps_only_internal_edges() {
        let graph = path_graph();
        let sub = graph.subgraph(&[1, 2, 3]);
        assert_eq!(sub.source, vec![0, 1, 2]);
        assert_eq!(sub.target, vec![1, 2, 0]);
        assert_eq!(sub.edge_ids, vec![1, 2, 3]);
    }

    #[test]
    fn batch_carries_local_masks() -> Result<()> {
        let graph = path_graph();
        let batch = graph.induced_subgraph(vec![1, 2, 3], &Device::Cpu)?;
        assert_eq!(batch.num_nodes(), 3);
        assert_eq!(batch.labels, vec![1, 0, 1]);
        assert_eq!(batch.split_nodes(Split::Train), &[0]);
        assert_eq!(batch.split_nodes(Split::Val), &[1]);
        assert_eq!(batch.split_index(Split::Test).to_vec1::<u32>()?, vec![2]);
        assert_eq!(batch.edge_index.dims(), &[2, 3]);
        assert!(batch.normalized_edge_weight()?.is_none());
        Ok(())
    }

    #[test]
    fn processed_archive_round_trips() -> Result<()> {
        let graph = toy_graph(40, 3);
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.npz");
        graph.save_processed(&path)?;
        let loaded = Graph::load_processed(&path)?;
        assert_eq!(loaded.num_nodes(), graph.num_nodes());
        assert_eq!(loaded.num_edges(), graph.num_edges());
        assert_eq!(loaded.labels(), graph.labels());
        assert_eq!(loaded.features(7), graph.features(7));
        assert_eq!(loaded.mask(Split::Val), graph.mask(Split::Val));
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_edges() {
        let masks = [vec![true], vec![false], vec![false]];
        assert!(Graph::new(vec![0.0], 1, vec![0], &[0], &[1], masks).is_err());
    }
}
