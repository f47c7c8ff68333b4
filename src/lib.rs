pub mod config;
pub mod datasets;
pub mod driver;
pub mod logging;
pub mod metrics;
pub mod nn;
pub mod samplers;
pub mod summary;
pub mod trainer;

pub use config::{Args, ConfigError, RunConfig};
pub use driver::run;
