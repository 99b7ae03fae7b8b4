use candle_core::{Result, Tensor};

/// Message-passing module over a graph given as a `(2, num_edges)` edge index.
pub trait GnnModule {
    fn forward_t(&self, x: &Tensor, edge_index: &Tensor, train: bool) -> Result<Tensor>;
    fn forward(&self, x: &Tensor, edge_index: &Tensor) -> Result<Tensor> {
        self.forward_t(x, edge_index, false)
    }
}
