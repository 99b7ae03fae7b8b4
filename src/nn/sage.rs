use candle_core::{Error, Result, Tensor};
use candle_nn::{Activation, Dropout, Linear, Module, VarBuilder};

use super::{
    traits::GnnModule,
    utils::{mean_agg, xavier_linear},
};

/// GraphSAGE convolution with the mean aggregator.
///
/// `h'_v = W_self h_v + b + W_neigh mean({h_u : u -> v})`
///
/// https://arxiv.org/abs/1706.02216
pub struct SageConv {
    in_dim: usize,
    out_dim: usize,
    fc_self: Linear,
    fc_neigh: Linear,
}
impl SageConv {
    pub fn new(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Self> {
        let gain = 2f64.sqrt();
        Ok(Self {
            in_dim,
            out_dim,
            fc_self: xavier_linear(in_dim, out_dim, gain, true, vs.pp("fc_self"))?,
            fc_neigh: xavier_linear(in_dim, out_dim, gain, false, vs.pp("fc_neigh"))?,
        })
    }
}
impl GnnModule for SageConv {
    fn forward_t(&self, xs: &Tensor, edge_index: &Tensor, _train: bool) -> Result<Tensor> {
        let (num_nodes, in_dim) = xs.dims2()?;
        if in_dim != self.in_dim {
            return Err(Error::UnexpectedShape {
                msg: "SageConv input features".to_owned(),
                expected: (num_nodes, self.in_dim).into(),
                got: xs.shape().clone(),
            }
            .bt());
        }
        // the mean commutes with the projection, so aggregate in the narrower space
        let h_neigh = if self.in_dim > self.out_dim {
            mean_agg(&self.fc_neigh.forward(xs)?, edge_index)?
        } else {
            self.fc_neigh.forward(&mean_agg(xs, edge_index)?)?
        };
        self.fc_self.forward(xs)? + h_neigh
    }
}

pub struct SageParams {
    pub dropout_rate: f32,
    pub activation_fn: Activation,
}
impl Default for SageParams {
    fn default() -> Self {
        Self {
            dropout_rate: 0.5,
            activation_fn: Activation::Relu,
        }
    }
}

/// Stack of [`SageConv`] layers with activation and dropout between them.
pub struct Sage {
    layers: Vec<SageConv>,
    dropout: Dropout,
    activation_fn: Activation,
}
impl Sage {
    pub fn new(layer_sizes: &[usize], vs: VarBuilder) -> Result<Self> {
        Self::with_params(layer_sizes, SageParams::default(), vs)
    }
    pub fn with_params(layer_sizes: &[usize], params: SageParams, vs: VarBuilder) -> Result<Self> {
        let mut layers = Vec::new();
        for i in 1..layer_sizes.len() {
            layers.push(SageConv::new(
                layer_sizes[i - 1],
                layer_sizes[i],
                vs.pp(format!("layer_{}", i - 1)),
            )?);
        }
        Ok(Self {
            layers,
            dropout: Dropout::new(params.dropout_rate),
            activation_fn: params.activation_fn,
        })
    }
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
impl GnnModule for Sage {
    fn forward_t(&self, x: &Tensor, edge_index: &Tensor, train: bool) -> Result<Tensor> {
        let mut h = x.clone();
        for (l, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h, edge_index)?;
            if l + 1 != self.layers.len() {
                h = self.activation_fn.forward(&h)?;
                h = self.dropout.forward(&h, train)?;
            }
        }
        Ok(h)
    }
}
