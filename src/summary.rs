use std::collections::HashMap;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Device, Tensor};
use tracing::info;

use crate::metrics::{EvalReport, Split};

/// Best test score of a run and the score paired with it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BestEpoch {
    /// 1-based.
    pub epoch: usize,
    pub value: f32,
    pub paired: f32,
}

/// Per-epoch loss and metrics of one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub losses: Vec<f32>,
    pub reports: Vec<EvalReport>,
}

impl RunSummary {
    pub fn push(&mut self, loss: f32, report: EvalReport) {
        self.losses.push(loss);
        self.reports.push(report);
    }

    pub fn num_epochs(&self) -> usize {
        self.reports.len()
    }

    pub fn series(&self, split: Split, f1: bool) -> Vec<f32> {
        self.reports
            .iter()
            .map(|r| if f1 { r.f1(split) } else { r.acc(split) })
            .collect()
    }

    fn best_by(&self, key: impl Fn(&EvalReport) -> f32, paired: impl Fn(&EvalReport) -> f32) -> Option<BestEpoch> {
        let mut best: Option<BestEpoch> = None;
        for (i, report) in self.reports.iter().enumerate() {
            let value = key(report);
            if value.is_nan() {
                continue;
            }
            if best.map_or(true, |b| value > b.value) {
                best = Some(BestEpoch {
                    epoch: i + 1,
                    value,
                    paired: paired(report),
                });
            }
        }
        best
    }

    /// Epoch with the highest test accuracy, paired with its test F1.
    pub fn best_acc(&self) -> Option<BestEpoch> {
        self.best_by(|r| r.acc(Split::Test), |r| r.f1(Split::Test))
    }

    /// Epoch with the highest test F1, paired with its test accuracy.
    pub fn best_f1(&self) -> Option<BestEpoch> {
        self.best_by(|r| r.f1(Split::Test), |r| r.acc(Split::Test))
    }

    pub fn log_results(&self, log_name: &str) {
        info!("Experiment Results:");
        info!("Experiment setting: {log_name}");
        if let Some(best) = self.best_acc() {
            info!(
                "Best acc: {:.4}, epoch: {}, f1-macro: {:.4}",
                best.value, best.epoch, best.paired
            );
        }
        if let Some(best) = self.best_f1() {
            info!(
                "Best f1-macro: {:.4}, epoch: {}, acc: {:.4}",
                best.value, best.epoch, best.paired
            );
        }
    }

    /// Writes `train_acc`, `test_acc`, `train_f1` and `test_f1` as f32 arrays.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let device = Device::Cpu;
        let array = |split, f1| Tensor::new(self.series(split, f1).as_slice(), &device);
        let train_acc = array(Split::Train, false)?;
        let test_acc = array(Split::Test, false)?;
        let train_f1 = array(Split::Train, true)?;
        let test_f1 = array(Split::Test, true)?;
        Tensor::write_npz(
            &[
                ("train_acc", &train_acc),
                ("test_acc", &test_acc),
                ("train_f1", &train_f1),
                ("test_f1", &test_f1),
            ],
            path,
        )
        .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Save summary to {}", path.display());
        Ok(())
    }

    /// Reads the four arrays written by [`RunSummary::save`] by name.
    pub fn load_arrays<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Vec<f32>>> {
        let path = path.as_ref();
        let arrays = Tensor::read_npz(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let arrays = arrays
            .into_iter()
            .map(|(name, t)| Ok((name, t.to_dtype(DType::F32)?.to_vec1::<f32>()?)))
            .collect::<Result<HashMap<_, _>>>()?;
        for name in ["train_acc", "test_acc", "train_f1", "test_f1"] {
            ensure!(arrays.contains_key(name), "{} has no array {:?}", path.display(), name);
        }
        Ok(arrays)
    }
}
