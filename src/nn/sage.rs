use candle_core::{IndexOp, Result, Tensor, D};
use candle_nn::{ops, Linear, Module, VarBuilder};

use super::traits::{Aggregation, GnnModel, GnnModule};
use super::utils::{aggregate, linear, linear_no_bias, Dropout};

/// GraphSAGE convolution: `lin_l(aggr_j w_ji x_j) + lin_r(x_i)`.
pub struct SageConv {
    lin_l: Linear,
    lin_r: Linear,
    aggr: Aggregation,
}
impl SageConv {
    pub fn new(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Self> {
        Ok(Self {
            lin_l: linear(in_dim, out_dim, vs.pp("lin_l"))?,
            lin_r: linear_no_bias(in_dim, out_dim, vs.pp("lin_r"))?,
            aggr: Aggregation::default(),
        })
    }
}
impl GnnModule for SageConv {
    fn forward_t(
        &self,
        x: &Tensor,
        edge_index: &Tensor,
        edge_weight: Option<&Tensor>,
        _train: bool,
    ) -> Result<Tensor> {
        let source = edge_index.i((0, ..))?;
        let target = edge_index.i((1, ..))?;
        let num_nodes = x.dims()[0];
        let mut messages = x.index_select(&source, 0)?;
        if let Some(weight) = edge_weight {
            messages = messages.broadcast_mul(&weight.unsqueeze(1)?)?;
        }
        let h = aggregate(&messages, &target, num_nodes, self.aggr)?;
        self.lin_l.forward(&h)? + self.lin_r.forward(x)?
    }
}
impl GnnModel for SageConv {
    fn set_aggr(&mut self, aggr: Aggregation) {
        self.aggr = aggr;
    }
    fn aggr(&self) -> Aggregation {
        self.aggr
    }
}

/// Two GraphSAGE layers with ReLU and dropout in between.
pub struct SageNet {
    conv1: SageConv,
    conv2: SageConv,
    dropout: Dropout,
}
impl SageNet {
    pub fn new(
        in_dim: usize,
        hidden_dim: usize,
        out_dim: usize,
        dropout: Dropout,
        vs: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            conv1: SageConv::new(in_dim, hidden_dim, vs.pp("conv1"))?,
            conv2: SageConv::new(hidden_dim, out_dim, vs.pp("conv2"))?,
            dropout,
        })
    }
}
impl GnnModule for SageNet {
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
            .relu()?;
        let h = self.dropout.forward(&h, train)?;
        let h = self.conv2.forward_t(&h, edge_index, edge_weight, train)?;
        ops::log_softmax(&h, D::Minus1)
    }
}
impl GnnModel for SageNet {
    fn set_aggr(&mut self, aggr: Aggregation) {
        self.conv1.set_aggr(aggr);
        self.conv2.set_aggr(aggr);
    }
    fn aggr(&self) -> Aggregation {
        self.conv1.aggr()
    }
}
