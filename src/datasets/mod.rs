use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use serde::Serialize;

use crate::config::ConfigError;

mod flickr;
pub use flickr::*;

mod reddit;
pub use reddit::*;

pub(crate) mod graph;
pub use graph::{Graph, GraphBatch, Subgraph};

mod full_batch_loader;
pub use full_batch_loader::*;

mod traits;
pub use traits::*;

mod utils;
pub use utils::{download, download_and_extract, RemoteFile};

/// File name of the converted dataset inside `<root>/processed`.
pub const PROCESSED_FILE: &str = "data.npz";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetName {
    Flickr,
    Reddit,
}

impl DatasetName {
    /// Directory of the dataset below the data root.
    pub fn root(&self, data_dir: &Path) -> PathBuf {
        match self {
            Self::Flickr => data_dir.join("Flickr"),
            Self::Reddit => data_dir.join("Reddit"),
        }
    }

    pub fn processed_dir(&self, data_dir: &Path) -> PathBuf {
        self.root(data_dir).join("processed")
    }

    /// Loads the dataset, downloading and converting it on first use.
    pub fn load(&self, data_dir: &Path) -> Result<Graph> {
        let root = self.root(data_dir);
        match self {
            Self::Flickr => Flickr::new(root),
            Self::Reddit => Reddit::new(root),
        }
    }
}

impl FromStr for DatasetName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "flickr" => Ok(Self::Flickr),
            "reddit" => Ok(Self::Reddit),
            _ => Err(ConfigError::UnknownDataset(s.to_owned())),
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Flickr => write!(f, "flickr"),
            Self::Reddit => write!(f, "reddit"),
        }
    }
}
