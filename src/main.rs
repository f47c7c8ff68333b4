use anyhow::Result;
use clap::Parser;
use tracing::info;

use candle_saint::driver::LOG_PREFIX;
use candle_saint::{logging, Args, RunConfig};

fn main() -> Result<()> {
    let args = Args::parse();
    let setting = serde_json::to_string(&args)?;
    let config = RunConfig::try_from(args)?;

    let log_name = config.log_name(LOG_PREFIX);
    let log_file = config
        .save_log
        .then(|| config.log_dir.join(format!("{log_name}.log")));
    logging::init(log_file.as_deref())?;
    info!("Model setting: {setting}");

    candle_saint::run(&config)?;
    if let Some(path) = log_file {
        info!("Save logs to {}", path.display());
    }
    Ok(())
}
