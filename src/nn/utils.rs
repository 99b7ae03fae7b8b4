//! Neighbourhood aggregation over an edge index whose row 0 holds sources and row 1
//! destinations. Messages flow from source to destination.
use candle_core::{DType, IndexOp, Result, Tensor};
use candle_nn::{Init, Linear, VarBuilder};

/// Number of incoming edges of every node, as `dtype`.
pub fn in_degree(edge_index: &Tensor, num_nodes: usize, dtype: DType) -> Result<Tensor> {
    let degree = Tensor::zeros(num_nodes, dtype, edge_index.device())?;
    let target = edge_index.i(1)?;
    if target.elem_count() == 0 {
        return Ok(degree);
    }
    let ones = Tensor::ones(target.elem_count(), dtype, edge_index.device())?;
    degree.index_add(&target, &ones, 0)
}

/// `out[v] = sum of xs[u] over edges u -> v`, for `num_nodes` destinations.
pub fn sum_agg(xs: &Tensor, edge_index: &Tensor, num_nodes: usize) -> Result<Tensor> {
    let (_, dim) = xs.dims2()?;
    let out = Tensor::zeros((num_nodes, dim), xs.dtype(), xs.device())?;
    if edge_index.dim(1)? == 0 {
        return Ok(out);
    }
    let source = edge_index.i(0)?;
    let target = edge_index.i(1)?;
    out.index_add(&target, &xs.index_select(&source, 0)?, 0)
}

/// Mean over in-neighbours; nodes without in-neighbours get zeros.
pub fn mean_agg(xs: &Tensor, edge_index: &Tensor) -> Result<Tensor> {
    let num_nodes = xs.dim(0)?;
    let sum = sum_agg(xs, edge_index, num_nodes)?;
    let degree = in_degree(edge_index, num_nodes, xs.dtype())?
        .maximum(1.0)?
        .unsqueeze(1)?;
    sum.broadcast_div(&degree)
}

//
// Linear layer with Xavier-uniform weights scaled by `gain` and a zero bias
//
//   bound = gain * sqrt(6 / (fan_in + fan_out)), gain = sqrt(2) for ReLU
//
pub(crate) fn xavier_linear(
    in_dim: usize,
    out_dim: usize,
    gain: f64,
    bias: bool,
    vs: VarBuilder,
) -> Result<Linear> {
    let bound = gain * (6.0 / (in_dim + out_dim) as f64).sqrt();
    let ws = vs.get_with_hints(
        (out_dim, in_dim),
        "weight",
        Init::Uniform {
            lo: -bound,
            up: bound,
        },
    )?;
    let bs = if bias {
        Some(vs.get_with_hints(out_dim, "bias", Init::Const(0.0))?)
    } else {
        None
    };
    Ok(Linear::new(ws, bs))
}
