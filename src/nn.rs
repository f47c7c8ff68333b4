use std::fmt;
use std::str::FromStr;

use candle_core::Result;
use candle_nn::VarBuilder;
use serde::Serialize;

use crate::config::ConfigError;

mod traits;
pub use traits::*;
pub mod utils;

mod gat;
pub use gat::{GatConv, GatNet};
mod sage;
pub use sage::{SageConv, SageNet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Sage,
    Gat,
}

impl ModelKind {
    /// Two-layer network mapping `in_dim` features to `out_dim` log-probabilities.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        in_dim: usize,
        hidden_dim: usize,
        out_dim: usize,
        heads: usize,
        dropout: f32,
        seed: u64,
        vs: VarBuilder,
    ) -> Result<Box<dyn GnnModel>> {
        Ok(match self {
            Self::Sage => Box::new(SageNet::new(
                in_dim,
                hidden_dim,
                out_dim,
                utils::Dropout::new(dropout, seed),
                vs,
            )?),
            Self::Gat => Box::new(GatNet::new(
                in_dim, hidden_dim, out_dim, heads, dropout, seed, vs,
            )?),
        })
    }
}

impl FromStr for ModelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, ConfigError> {
        match s {
            "sage" => Ok(Self::Sage),
            "gat" => Ok(Self::Gat),
            _ => Err(ConfigError::UnknownModel(s.to_owned())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Sage => write!(f, "sage"),
            Self::Gat => write!(f, "gat"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::VarMap;

    #[test]
    fn parses_model_names() {
        assert_eq!("sage".parse::<ModelKind>(), Ok(ModelKind::Sage));
        assert_eq!("gat".parse::<ModelKind>(), Ok(ModelKind::Gat));
        assert_eq!(
            "gin".parse::<ModelKind>(),
            Err(ConfigError::UnknownModel("gin".into()))
        );
        assert_eq!(ModelKind::Gat.to_string(), "gat");
    }

    #[test]
    fn built_models_switch_aggregation() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::randn(0f32, 1., (4, 5), &device)?;
        let edge_index = Tensor::new(&[[0u32, 1, 2], [1, 2, 3]], &device)?;
        for kind in [ModelKind::Sage, ModelKind::Gat] {
            let varmap = VarMap::new();
            let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let mut model = kind.build(5, 8, 3, 2, 0.0, 0, vs)?;
            assert_eq!(model.aggr(), Aggregation::Mean);
            model.set_aggr(Aggregation::Sum);
            assert_eq!(model.aggr(), Aggregation::Sum);
            assert_eq!(model.forward(&x, &edge_index, None)?.dims(), &[4, 3]);
        }
        Ok(())
    }
}
