use candle_core::{DType, IndexOp, Result, Tensor, D};
use candle_nn::{ops, Init, VarBuilder};

use super::traits::{Aggregation, GnnModel, GnnModule};
use super::utils::{aggregate, Dropout};

/// Multi-head graph attention with self-loops; head outputs are concatenated.
pub struct GatConv {
    in_dim: usize,
    head_dim: usize,
    num_heads: usize,
    negative_slope: f64,
    weight: Tensor,
    att_src: Tensor,
    att_dst: Tensor,
    bias: Tensor,
    attention_dropout: Dropout,
    aggr: Aggregation,
}
impl GatConv {
    pub fn new(
        in_dim: usize,
        head_dim: usize,
        num_heads: usize,
        negative_slope: f64,
        attention_dropout: Dropout,
        vs: VarBuilder,
    ) -> Result<Self> {
        let out_dim = head_dim * num_heads;
        // values are filled in by `reset_parameters`
        let init = Init::Const(0.0);
        Ok(Self {
            in_dim,
            head_dim,
            num_heads,
            negative_slope,
            weight: vs.get_with_hints((in_dim, out_dim), "weight", init)?,
            att_src: vs.get_with_hints((1, num_heads, head_dim), "att_src", init)?,
            att_dst: vs.get_with_hints((1, num_heads, head_dim), "att_dst", init)?,
            bias: vs.get_with_hints(out_dim, "bias", init)?,
            attention_dropout,
            aggr: Aggregation::default(),
        })
    }

    pub fn out_dim(&self) -> usize {
        self.head_dim * self.num_heads
    }
}
impl GnnModule for GatConv {
    fn forward_t(
        &self,
        x: &Tensor,
        edge_index: &Tensor,
        edge_weight: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (num_nodes, in_dim) = x.dims2()?;
        if in_dim != self.in_dim {
            candle_core::bail!("GatConv expects {} input features, got {}", self.in_dim, in_dim)
        }
        let h = x
            .matmul(&self.weight)?
            .reshape((num_nodes, self.num_heads, self.head_dim))?;

        // every node also attends to itself
        let loops = Tensor::arange(0u32, num_nodes as u32, x.device())?;
        let source = Tensor::cat(&[&edge_index.i((0, ..))?, &loops], 0)?;
        let target = Tensor::cat(&[&edge_index.i((1, ..))?, &loops], 0)?;

        let attention = {
            let a_src = h.broadcast_mul(&self.att_src)?.sum_keepdim(D::Minus1)?;
            let a_dst = h.broadcast_mul(&self.att_dst)?.sum_keepdim(D::Minus1)?;
            let logits = ops::leaky_relu(
                &(a_src.index_select(&source, 0)? + a_dst.index_select(&target, 0)?)?,
                self.negative_slope,
            )?;
            let shift = segment_max(&logits, &target, num_nodes)?.index_select(&target, 0)?;
            let a_edge = logits.sub(&shift)?.exp()?;
            let a_sum = Tensor::zeros((num_nodes, self.num_heads, 1), x.dtype(), x.device())?
                .index_add(&target, &a_edge, 0)?;
            let alpha = a_edge.broadcast_div(&a_sum.index_select(&target, 0)?)?;
            self.attention_dropout.forward(&alpha, train)?
        };
        let attention = match edge_weight {
            Some(weight) => {
                let ones = Tensor::ones(num_nodes, weight.dtype(), weight.device())?;
                let weight = Tensor::cat(&[weight, &ones], 0)?.reshape(((), 1, 1))?;
                attention.broadcast_mul(&weight)?
            }
            None => attention,
        };

        let messages = h.index_select(&source, 0)?.broadcast_mul(&attention)?;
        aggregate(&messages, &target, num_nodes, self.aggr)?
            .reshape((num_nodes, self.out_dim()))?
            .broadcast_add(&self.bias)
    }
}

/// Per-node, per-head maximum of `(E, H, 1)` edge scores grouped by `target`.
/// The result carries no gradient; it only shifts the softmax.
fn segment_max(scores: &Tensor, target: &Tensor, num_nodes: usize) -> Result<Tensor> {
    let (_, num_heads, _) = scores.dims3()?;
    let values = scores.squeeze(2)?.to_dtype(DType::F32)?.to_vec2::<f32>()?;
    let mut max = vec![f32::NEG_INFINITY; num_nodes * num_heads];
    for (row, t) in values.iter().zip(target.to_vec1::<u32>()?) {
        let slot = &mut max[t as usize * num_heads..(t as usize + 1) * num_heads];
        for (m, &v) in slot.iter_mut().zip(row) {
            *m = m.max(v);
        }
    }
    // nodes without any score never get indexed
    for m in max.iter_mut().filter(|m| m.is_infinite()) {
        *m = 0.0;
    }
    Tensor::from_vec(max, (num_nodes, num_heads, 1), scores.device())?.to_dtype(scores.dtype())
}

impl GnnModel for GatConv {
    fn set_aggr(&mut self, aggr: Aggregation) {
        self.aggr = aggr;
    }
    fn aggr(&self) -> Aggregation {
        self.aggr
    }
}

/// Two attention layers: `heads` heads of `hidden / heads` features, then a
/// single head producing the class scores.
pub struct GatNet {
    conv1: GatConv,
    conv2: GatConv,
    dropout: Dropout,
}
impl GatNet {
    pub fn new(
        in_dim: usize,
        hidden_dim: usize,
        out_dim: usize,
        heads: usize,
        drop_p: f32,
        seed: u64,
        vs: VarBuilder,
    ) -> Result<Self> {
        if heads == 0 || hidden_dim % heads != 0 {
            candle_core::bail!("hidden width {hidden_dim} is not divisible by {heads} heads")
        }
        let negative_slope = 0.2;
        Ok(Self {
            conv1: GatConv::new(
                in_dim,
                hidden_dim / heads,
                heads,
                negative_slope,
                Dropout::new(drop_p, seed.wrapping_add(1)),
                vs.pp("conv1"),
            )?,
            conv2: GatConv::new(
                hidden_dim,
                out_dim,
                1,
                negative_slope,
                Dropout::new(drop_p, seed.wrapping_add(2)),
                vs.pp("conv2"),
            )?,
            dropout: Dropout::new(drop_p, seed),
        })
    }
}
impl GnnModule for GatNet {
    fn forward_t(
        &self,
        x: &Tensor,
        edge_index: &Tensor,
        edge_weight: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let h = self
            .conv1
            .forward_t(x, edge_index, edge_weight, train)?
            .elu(1.0)?;
        let h = self.dropout.forward(&h, train)?;
        let h = self.conv2.forward_t(&h, edge_index, edge_weight, train)?;
        ops::log_softmax(&h, D::Minus1)
    }
}
impl GnnModel for GatNet {
    fn set_aggr(&mut self, aggr: Aggregation) {
        self.conv1.set_aggr(aggr);
        self.conv2.set_aggr(aggr);
    }
    fn aggr(&self) -> Aggregation {
        self.conv1.aggr()
    }
}
