use anyhow::Result;
use candle_core::Device;

use crate::graph::Graph;

pub trait Dataset {
    type Batch;
    fn graph(&self) -> &Graph;
    fn all_nodes(&self) -> Vec<u32> {
        (0..self.graph().num_nodes() as u32).collect()
    }
    /// Gathers the subgraph induced by `nodes`, with node data, onto `device`.
    fn induced_subgraph(&self, nodes: &[u32], device: &Device) -> Result<Self::Batch>;
}
