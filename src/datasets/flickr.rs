use std::{
    collections::HashMap,
    fs::{create_dir_all, File},
    io::BufReader,
    path::Path,
};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use tracing::info;

use super::graph::Graph;
use super::utils::{download, npz_ids, open_npz, read_npy_matrix};

/// Flickr image graph from the GraphSAINT paper: 89,250 nodes, 7 classes,
/// 500 features, fixed train/val/test roles.
pub struct Flickr;

#[derive(Deserialize)]
struct Role {
    tr: Vec<u32>,
    va: Vec<u32>,
    te: Vec<u32>,
}

impl Flickr {
    pub const NUM_FEATURES: usize = 500;
    pub const NUM_CLASSES: usize = 7;
    pub const NUM_NODES: usize = 89250;

    // Google Drive ids of the raw GraphSAINT files
    const RAW_FILES: [(&'static str, &'static str); 4] = [
        ("adj_full.npz", "1crmsTbd1-2sEXsGwa2IKnIB7Zd3TmUsy"),
        ("feats.npy", "1join-XdvX3anJU_MLVtick7MgeAQiWIZ"),
        ("class_map.json", "1uxIkbtg5drHTsKt-PAsZZ4_yJmgFmle9"),
        ("role.json", "1htXCtuktuCW8TR8KiKfrFDAxUgekQoV7"),
    ];

    pub fn prepare_data<P: AsRef<Path>>(root: P) -> Result<()> {
        let processed = root.as_ref().join("processed");
        if processed.join(super::PROCESSED_FILE).exists() {
            return Ok(());
        }
        let raw = root.as_ref().join("raw");
        create_dir_all(&raw)?;
        for (name, id) in Self::RAW_FILES {
            let path = raw.join(name);
            if !path.exists() {
                let url = format!("https://drive.usercontent.google.com/download?id={id}&confirm=t");
                download(&url, &path)?;
            }
        }

        info!("Processing {}", raw.display());
        let graph = Self::from_raw(&raw)?;
        create_dir_all(&processed)?;
        graph.save_processed(processed.join(super::PROCESSED_FILE))
    }

    pub fn from_raw<P: AsRef<Path>>(raw: P) -> Result<Graph> {
        let raw = raw.as_ref();

        // scipy CSR adjacency
        let mut adj = open_npz(raw.join("adj_full.npz"))?;
        let indptr = npz_ids(&mut adj, "indptr")?;
        let indices = npz_ids(&mut adj, "indices")?;
        ensure!(!indptr.is_empty(), "adj_full.npz has an empty indptr");
        let num_nodes = indptr.len() - 1;
        let mut source = Vec::with_capacity(indices.len());
        for (u, w) in indptr.windows(2).enumerate() {
            source.extend(std::iter::repeat(u as u32).take((w[1] - w[0]) as usize));
        }
        ensure!(source.len() == indices.len(), "adj_full.npz indptr does not cover indices");

        let (x, rows, num_features) = read_npy_matrix(raw.join("feats.npy"))?;
        ensure!(rows == num_nodes, "feats.npy has {} rows for {} nodes", rows, num_nodes);

        let class_map: HashMap<String, u32> = serde_json::from_reader(BufReader::new(
            File::open(raw.join("class_map.json")).context("opening class_map.json")?,
        ))?;
        let mut y = vec![0u32; num_nodes];
        for (key, class) in class_map {
            let u: usize = key.parse()?;
            ensure!(u < num_nodes, "class_map.json names node {} of {}", u, num_nodes);
            y[u] = class;
        }

        let role: Role = serde_json::from_reader(BufReader::new(
            File::open(raw.join("role.json")).context("opening role.json")?,
        ))?;
        let mut masks = [vec![false; num_nodes], vec![false; num_nodes], vec![false; num_nodes]];
        for (mask, ids) in masks.iter_mut().zip([&role.tr, &role.va, &role.te]) {
            for &u in ids {
                ensure!((u as usize) < num_nodes, "role.json names node {} of {}", u, num_nodes);
                mask[u as usize] = true;
            }
        }

        Graph::new(x, num_features, y, &source, &indices, masks)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Split;
    use ndarray::array;
    use ndarray_npy::{NpzWriter, WriteNpyExt};

    #[test]
    fn converts_graphsaint_raw_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let raw = dir.path().join("raw");
        create_dir_all(&raw)?;

        // 0 <-> 1, 1 <-> 2
        let mut adj = NpzWriter::new(File::create(raw.join("adj_full.npz"))?);
        adj.add_array("indptr", &array![0i32, 1, 3, 4])?;
        adj.add_array("indices", &array![1i32, 0, 2, 1])?;
        adj.add_array("data", &array![1.0f32, 1.0, 1.0, 1.0])?;
        adj.finish()?;
        array![[1.0f64, 0.0], [0.0, 1.0], [1.0, 1.0]].write_npy(File::create(raw.join("feats.npy"))?)?;
        std::fs::write(raw.join("class_map.json"), r#"{"0": 2, "1": 0, "2": 1}"#)?;
        std::fs::write(raw.join("role.json"), r#"{"tr": [0], "va": [1], "te": [2]}"#)?;

        Flickr::prepare_data(dir.path())?;
        let graph = Flickr::from_processed(dir.path())?;
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.num_edges(), 4);
        assert_eq!(graph.num_classes(), 3);
        assert_eq!(graph.labels(), &[2, 0, 1]);
        assert_eq!(graph.features(2), &[1.0, 1.0]);
        assert_eq!(graph.neighbors(1), &[0, 2]);
        assert_eq!(graph.mask(Split::Val), &[false, true, false]);
        Ok(())
    }
}
