use std::cell::RefCell;

use candle_core::{DType, Result, Tensor};
use candle_nn::{Init, Linear, VarBuilder, VarMap};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::traits::Aggregation;

/// Number of incoming edges per node, at least 1.
pub fn in_degree(target: &Tensor, num_nodes: usize, dtype: DType) -> Result<Tensor> {
    let ones = Tensor::ones(target.dims1()?, dtype, target.device())?;
    Tensor::zeros(num_nodes, dtype, target.device())?
        .index_add(target, &ones, 0)?
        .maximum(1.0)
}

/// Reduces per-edge `messages` (first dim = edges) onto their `target` nodes.
pub fn aggregate(
    messages: &Tensor,
    target: &Tensor,
    num_nodes: usize,
    aggr: Aggregation,
) -> Result<Tensor> {
    let mut dims = messages.dims().to_vec();
    dims[0] = num_nodes;
    let out = Tensor::zeros(dims.as_slice(), messages.dtype(), messages.device())?
        .index_add(target, messages, 0)?;
    match aggr {
        Aggregation::Sum => Ok(out),
        Aggregation::Mean => {
            let mut shape = vec![1; dims.len()];
            shape[0] = num_nodes;
            let degree = in_degree(target, num_nodes, messages.dtype())?.reshape(shape)?;
            out.broadcast_div(&degree)
        }
    }
}

/// Linear layer in torch layout (`weight` is `out x in`). Created as zeros;
/// the values come from [`reset_parameters`].
pub(crate) fn linear(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Linear> {
    let ws = vs.get_with_hints((out_dim, in_dim), "weight", Init::Const(0.0))?;
    let bs = vs.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(ws, Some(bs)))
}
pub(crate) fn linear_no_bias(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Linear> {
    let ws = vs.get_with_hints((out_dim, in_dim), "weight", Init::Const(0.0))?;
    Ok(Linear::new(ws, None))
}

/// Dropout driven by a seeded generator so that training runs repeat exactly.
pub struct Dropout {
    drop_p: f32,
    rng: RefCell<StdRng>,
}

impl Dropout {
    pub fn new(drop_p: f32, seed: u64) -> Self {
        Self {
            drop_p,
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.drop_p <= 0.0 {
            return Ok(xs.clone());
        }
        if self.drop_p >= 1.0 {
            return xs.zeros_like();
        }
        let scale = 1.0 / (1.0 - self.drop_p);
        let mut rng = self.rng.borrow_mut();
        let mask: Vec<f32> = (0..xs.elem_count())
            .map(|_| if rng.gen::<f32>() < self.drop_p { 0.0 } else { scale })
            .collect();
        let mask = Tensor::from_vec(mask, xs.shape(), xs.device())?.to_dtype(xs.dtype())?;
        xs.mul(&mask)
    }
}

/// Re-initialises every variable from `seed`, visiting them in name order:
/// Glorot-uniform for matrices and higher-rank tensors, zeros for vectors.
pub fn reset_parameters(varmap: &VarMap, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let vars = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(e.to_string()))?;
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();
    for name in names {
        let var = &vars[name];
        let dims = var.dims().to_vec();
        let values: Vec<f32> = match dims.as_slice() {
            [.., fan_in, fan_out] => {
                let bound = (6.0 / (fan_in + fan_out) as f32).sqrt();
                (0..var.elem_count())
                    .map(|_| rng.gen_range(-bound..=bound))
                    .collect()
            }
            _ => vec![0.0; var.elem_count()],
        };
        let value = Tensor::from_vec(values, dims, var.device())?.to_dtype(var.dtype())?;
        var.set(&value)?;
    }
    Ok(())
}
