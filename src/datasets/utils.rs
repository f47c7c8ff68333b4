use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2};
use ndarray_npy::{NpzReader, ReadNpyExt};
use tracing::info;
use zip::ZipArchive;

#[allow(dead_code)]
pub struct RemoteFile {
    url: String,
    response: reqwest::blocking::Response,
    total_size: Option<u64>,
    current_size: u64,
    pbar: Option<ProgressBar>,
}
impl RemoteFile {
    pub fn with_pbar(url: &str) -> Result<Self> {
        Self::with_config(url, 3600, true)
    }
    pub fn with_config(url: &str, timeout: u64, pbar: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(url)
            .timeout(std::time::Duration::from_secs(timeout))
            .send()?
            .error_for_status()?;
        let total_size = response.content_length();

        let pbar = if pbar {
            let pbar = match total_size {
                Some(total_size) => {
                    let pbar = ProgressBar::new(total_size);
                    pbar.set_style(ProgressStyle::default_bar()
                        .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
                        .progress_chars("#>-"));
                    pbar
                }
                None => ProgressBar::new_spinner(),
            };
            pbar.set_message(format!("Downloading {}", url));
            Some(pbar)
        } else {
            None
        };
        Ok(Self {
            url: url.to_owned(),
            response,
            current_size: 0,
            total_size,
            pbar,
        })
    }
    fn update(&mut self, size: usize) {
        self.current_size += size as u64;
        if let Some(pbar) = &self.pbar {
            pbar.set_position(self.current_size);
        }
    }
}

impl std::io::Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.response.read(buf)?;
        self.update(size);
        if size == 0 {
            if let Some(pbar) = &self.pbar {
                pbar.finish_and_clear();
            }
        }
        Ok(size)
    }
}

pub fn download<P: AsRef<Path>>(url: &str, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Downloading {} to {}", url, path.display());
    let mut remote_file = RemoteFile::with_pbar(url)?;
    let mut local_file = tempfile::NamedTempFile::new_in(
        path.parent().context("download target has no parent directory")?,
    )?;
    std::io::copy(&mut remote_file, &mut local_file)?;
    local_file.persist(path)?;
    Ok(())
}

pub fn download_and_extract<P: AsRef<Path>>(url: &str, path: P) -> Result<()> {
    info!("Downloading {} to {}", url, path.as_ref().display());
    let mut remote_file = RemoteFile::with_pbar(url)?;
    let mut archive = tempfile::tempfile()?;
    std::io::copy(&mut remote_file, &mut archive)?;
    archive.seek(SeekFrom::Start(0))?;

    let mut archive = ZipArchive::new(&archive)?;
    archive.extract(path)?;
    Ok(())
}

//
// Raw NumPy arrays come with whatever dtype the dataset authors saved.
// The readers below accept the common ones and convert.
//

pub(crate) fn read_npy_matrix<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, usize, usize)> {
    let path = path.as_ref();
    let open = || File::open(path).with_context(|| format!("opening {}", path.display()));
    let array = match Array2::<f32>::read_npy(open()?) {
        Ok(array) => array,
        Err(_) => Array2::<f64>::read_npy(open()?)
            .with_context(|| format!("reading {}", path.display()))?
            .mapv(|v| v as f32),
    };
    let (rows, cols) = array.dim();
    Ok((array.iter().copied().collect(), rows, cols))
}

pub(crate) fn npz_matrix(npz: &mut NpzReader<File>, name: &str) -> Result<(Vec<f32>, usize, usize)> {
    let array = match npz.by_name::<ndarray::OwnedRepr<f32>, ndarray::Ix2>(name) {
        Ok(array) => array,
        Err(_) => npz
            .by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix2>(name)
            .with_context(|| format!("reading {}", name))?
            .mapv(|v| v as f32),
    };
    let (rows, cols) = array.dim();
    Ok((array.iter().copied().collect(), rows, cols))
}

/// Reads a 1-d integer array (ids, labels) as `u32`.
pub(crate) fn npz_ids(npz: &mut NpzReader<File>, name: &str) -> Result<Vec<u32>> {
    if let Ok(array) = npz.by_name::<ndarray::OwnedRepr<i64>, ndarray::Ix1>(name) {
        return Ok(array.iter().map(|&v| v as u32).collect());
    }
    if let Ok(array) = npz.by_name::<ndarray::OwnedRepr<u32>, ndarray::Ix1>(name) {
        return Ok(array.to_vec());
    }
    let array: Array1<i32> = npz
        .by_name(name)
        .with_context(|| format!("reading {}", name))?;
    Ok(array.iter().map(|&v| v as u32).collect())
}

pub(crate) fn open_npz<P: AsRef<Path>>(path: P) -> Result<NpzReader<File>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    NpzReader::new(file).with_context(|| format!("reading {}", path.display()))
}
