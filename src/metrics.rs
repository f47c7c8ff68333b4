use std::collections::BTreeMap;
use std::fmt;

use itertools::izip;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Train = 0,
    Val = 1,
    Test = 2,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Val => write!(f, "val"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Fraction of `index` whose prediction matches the label. `None` for an empty index.
pub fn accuracy(pred: &[u32], labels: &[u32], index: &[u32]) -> Option<f32> {
    if index.is_empty() {
        return None;
    }
    let correct = index
        .iter()
        .filter(|&&i| pred[i as usize] == labels[i as usize])
        .count();
    Some(correct as f32 / index.len() as f32)
}

/// Macro-averaged F1 over the classes present in the labels or predictions of `index`.
///
/// A class with no true positives scores 0. `None` for an empty index.
pub fn macro_f1(pred: &[u32], labels: &[u32], index: &[u32]) -> Option<f32> {
    if index.is_empty() {
        return None;
    }
    // class -> (tp, fp, fn)
    let mut counts: BTreeMap<u32, (u32, u32, u32)> = BTreeMap::new();
    for &i in index {
        let (p, t) = (pred[i as usize], labels[i as usize]);
        if p == t {
            counts.entry(t).or_default().0 += 1;
        } else {
            counts.entry(p).or_default().1 += 1;
            counts.entry(t).or_default().2 += 1;
        }
    }
    let total: f64 = counts
        .values()
        .map(|&(tp, fp, fn_)| {
            let denom = 2 * tp + fp + fn_;
            if denom == 0 {
                0.0
            } else {
                2.0 * tp as f64 / denom as f64
            }
        })
        .sum();
    Some((total / counts.len() as f64) as f32)
}

/// Accuracy and macro-F1 for the train, val and test masks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EvalReport {
    pub accs: [f32; 3],
    pub f1s: [f32; 3],
}

impl EvalReport {
    /// Scores the predictions of one graph or batch; an empty split scores NaN.
    pub fn from_predictions<'a>(
        pred: &[u32],
        labels: &[u32],
        split_nodes: impl Fn(Split) -> &'a [u32],
    ) -> Self {
        let mut report = Self {
            accs: [f32::NAN; 3],
            f1s: [f32::NAN; 3],
        };
        for split in Split::ALL {
            let index = split_nodes(split);
            if let Some(acc) = accuracy(pred, labels, index) {
                report.accs[split as usize] = acc;
            }
            if let Some(f1) = macro_f1(pred, labels, index) {
                report.f1s[split as usize] = f1;
            }
        }
        report
    }

    pub fn acc(&self, split: Split) -> f32 {
        self.accs[split as usize]
    }
    pub fn f1(&self, split: Split) -> f32 {
        self.f1s[split as usize]
    }
}

/// Running mean of per-batch reports; NaN entries (empty masks) are skipped.
#[derive(Clone, Debug, Default)]
pub struct ReportAverager {
    acc_sums: [f64; 3],
    f1_sums: [f64; 3],
    counts: [usize; 3],
}

impl ReportAverager {
    pub fn push(&mut self, report: &EvalReport) {
        for (acc_sum, f1_sum, count, &acc, &f1) in izip!(
            &mut self.acc_sums,
            &mut self.f1_sums,
            &mut self.counts,
            &report.accs,
            &report.f1s
        ) {
            if acc.is_nan() {
                continue;
            }
            *acc_sum += acc as f64;
            *f1_sum += f1 as f64;
            *count += 1;
        }
    }

    pub fn finish(&self) -> EvalReport {
        let mean = |sum: f64, count: usize| {
            if count == 0 {
                f32::NAN
            } else {
                (sum / count as f64) as f32
            }
        };
        EvalReport {
            accs: [0, 1, 2].map(|i| mean(self.acc_sums[i], self.counts[i])),
            f1s: [0, 1, 2].map(|i| mean(self.f1_sums[i], self.counts[i])),
        }
    }
}
