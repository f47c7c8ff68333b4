use std::{fs::create_dir_all, path::Path};

use anyhow::{ensure, Result};
use tracing::info;

use super::graph::Graph;
use super::utils::{download_and_extract, npz_ids, npz_matrix, open_npz};

/// Reddit post graph (GraphSAGE paper): 232,965 nodes, 41 classes, 602 features.
pub struct Reddit;

impl Reddit {
    pub const NUM_FEATURES: usize = 602;
    pub const NUM_CLASSES: usize = 41;
    pub const NUM_NODES: usize = 232965;

    const URL: &'static str = "https://data.dgl.ai/dataset/reddit.zip";

    pub fn prepare_data<P: AsRef<Path>>(root: P) -> Result<()> {
        let processed = root.as_ref().join("processed");
        if processed.join(super::PROCESSED_FILE).exists() {
            return Ok(());
        }
        let raw = root.as_ref().join("raw");
        if !raw.join("reddit_data.npz").exists() || !raw.join("reddit_graph.npz").exists() {
            create_dir_all(&raw)?;
            download_and_extract(Self::URL, &raw)?;
        }

        info!("Processing {}", raw.display());
        let graph = Self::from_raw(&raw)?;
        create_dir_all(&processed)?;
        graph.save_processed(processed.join(super::PROCESSED_FILE))
    }

    pub fn from_raw<P: AsRef<Path>>(raw: P) -> Result<Graph> {
        let raw = raw.as_ref();

        let mut data = open_npz(raw.join("reddit_data.npz"))?;
        let (x, num_nodes, num_features) = npz_matrix(&mut data, "feature")?;
        let y = npz_ids(&mut data, "label")?;
        // 1 = train, 2 = val, 3 = test
        let node_types = npz_ids(&mut data, "node_types")?;
        ensure!(
            y.len() == num_nodes && node_types.len() == num_nodes,
            "reddit_data.npz arrays disagree on the node count"
        );
        let masks = [1, 2, 3].map(|t| node_types.iter().map(|&n| n == t).collect());

        // scipy COO adjacency
        let mut adj = open_npz(raw.join("reddit_graph.npz"))?;
        let row = npz_ids(&mut adj, "row")?;
        let col = npz_ids(&mut adj, "col")?;

        Graph::new(x, num_features, y, &row, &col, masks)
    }

    pub fn from_processed<P: AsRef<Path>>(root: P) -> Result<Graph> {
        Graph::load_processed(root.as_ref().join("processed").join(super::PROCESSED_FILE))
    }

    pub fn new<P: AsRef<Path>>(root: P) -> Result<Graph> {
        let root = root.as_ref();
        Self::prepare_data(root)?;
        Self::from_processed(root)
    }
}
