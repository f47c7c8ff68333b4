use std::path::Path;

use anyhow::Result;
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};

use candle_saint::datasets::{DatasetName, Graph, PROCESSED_FILE};
use candle_saint::summary::RunSummary;
use candle_saint::{Args, ConfigError, RunConfig};

/// Writes a small three-class graph where Flickr's processed archive would be.
fn write_processed_flickr(data_dir: &Path) -> Result<Graph> {
    let num_nodes = 300;
    let num_features = 12;
    let mut rng = StdRng::seed_from_u64(9);
    let y: Vec<u32> = (0..num_nodes).map(|u| (u % 3) as u32).collect();
    let x: Vec<f32> = y
        .iter()
        .flat_map(|&c| (0..num_features).map(move |f| (f % 3 == c as usize) as u8 as f32))
        .map(|v| v + rng.gen_range(-0.2..0.2))
        .collect();
    let mut source = Vec::new();
    let mut target = Vec::new();
    for u in 0..num_nodes as u32 {
        for _ in 0..4 {
            let v = rng.gen_range(0..num_nodes as u32);
            source.extend([u, v]);
            target.extend([v, u]);
        }
    }
    let masks = [
        (0..num_nodes).map(|u| u % 2 == 0).collect(),
        (0..num_nodes).map(|u| u % 4 == 1).collect(),
        (0..num_nodes).map(|u| u % 4 == 3).collect(),
    ];
    let graph = Graph::new(x, num_features, y, &source, &target, masks)?;
    let processed = DatasetName::Flickr.processed_dir(data_dir);
    std::fs::create_dir_all(&processed)?;
    graph.save_processed(processed.join(PROCESSED_FILE))?;
    Ok(graph)
}

fn config(dir: &Path, extra: &[&str]) -> Result<RunConfig> {
    let data_dir = dir.join("data");
    let summary_dir = dir.join("summary");
    let mut argv = vec![
        "candle-saint".to_owned(),
        "--data-dir".to_owned(),
        data_dir.display().to_string(),
        "--summary-dir".to_owned(),
        summary_dir.display().to_string(),
        "--hidden".to_owned(),
        "16".to_owned(),
        "--heads".to_owned(),
        "2".to_owned(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    Ok(RunConfig::try_from(Args::try_parse_from(argv)?)?)
}

#[test]
fn node_sampler_run_writes_summary() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_processed_flickr(&dir.path().join("data"))?;
    let config = config(
        dir.path(),
        &[
            "--dataset", "flickr", "--sampler", "rn", "--batch-size", "1000", "--epochs", "2",
            "--sample-coverage", "5",
        ],
    )?;
    let summary = candle_saint::run(&config)?;

    assert_eq!(summary.losses.len(), 2);
    assert!(summary.losses.iter().all(|l| l.is_finite()));
    assert_eq!(summary.num_epochs(), 2);
    for report in &summary.reports {
        assert!(report.accs.iter().chain(&report.f1s).all(|v| (0.0..=1.0).contains(v)));
    }

    let name = "test_flickr_rn_sage_bs1000_trs1_evs1_ln1.npz";
    let arrays = RunSummary::load_arrays(dir.path().join("summary").join(name))?;
    for key in ["train_acc", "test_acc", "train_f1", "test_f1"] {
        assert_eq!(arrays[key].len(), 2);
    }
    let cache = DatasetName::Flickr
        .processed_dir(&dir.path().join("data"))
        .join("rn_1000_5_norm.npz");
    assert!(cache.exists());
    Ok(())
}

#[test]
fn full_graph_gat_run_is_reproducible() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_processed_flickr(&dir.path().join("data"))?;
    let config = config(
        dir.path(),
        &["--sampler", "full", "--gcn-type", "gat", "--epochs", "2", "--seed", "3"],
    )?;
    assert!(!config.train_sample && !config.eval_sample);
    let first = candle_saint::run(&config)?;
    let second = candle_saint::run(&config)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn unknown_names_fail_before_any_data_is_read() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let err = config(dir.path(), &["--dataset", "cora"]).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::UnknownDataset("cora".into()))
    );
    let err = config(dir.path(), &["--sampler", "neighbor"]).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::UnknownSampler("neighbor".into()))
    );
    assert!(!dir.path().join("data").exists());
    Ok(())
}
