use candle_core::{Result, Tensor};

/// Neighbour reduction of a message-passing layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Aggregation {
    /// Sum of (weighted) messages; used with GraphSAINT-normalized edge weights.
    Sum,
    /// Mean over the in-neighbours; used for full-graph passes.
    #[default]
    Mean,
}

/// `edge_index` is a `(2, E)` u32 tensor of `[source; target]` rows;
/// messages flow from source to target.
pub trait GnnModule {
    fn forward_t(
        &self,
        x: &Tensor,
        edge_index: &Tensor,
        edge_weight: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor>;

    fn forward(&self, x: &Tensor, edge_index: &Tensor, edge_weight: Option<&Tensor>) -> Result<Tensor> {
        self.forward_t(x, edge_index, edge_weight, false)
    }
}

/// A full network whose layers share one aggregation mode.
pub trait GnnModel: GnnModule {
    fn set_aggr(&mut self, aggr: Aggregation);
    fn aggr(&self) -> Aggregation;
}
