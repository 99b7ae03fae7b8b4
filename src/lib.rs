pub mod datasets;
pub mod graph;
pub mod metrics;
pub mod nn;
pub mod optim;
pub mod partition;
pub mod sampler;
pub mod train;
pub mod utils;
