use candle_core::{Result, Tensor};

/// Indices of the non-zero entries of a `u8` mask tensor.
pub fn mask_to_index(mask: &Tensor) -> Result<Vec<u32>> {
    Ok(mask
        .to_dtype(candle_core::DType::U8)?
        .to_vec1()?
        .into_iter()
        .enumerate()
        .filter_map(|(idx, m): (_, u8)| if m == 0 { None } else { Some(idx as u32) })
        .collect())
}

/// Boolean mask of length `n` with the given positions set, like `zeros(n).index_fill_(idx, true)`.
pub fn index_to_mask(index: &[u32], n: usize) -> anyhow::Result<Vec<bool>> {
    let mut mask = vec![false; n];
    for &i in index {
        match mask.get_mut(i as usize) {
            Some(m) => *m = true,
            None => anyhow::bail!("index {i} out of range for {n} nodes"),
        }
    }
    Ok(mask)
}

/// Positions of the set entries of a host mask restricted to `nodes`, in local numbering.
pub(crate) fn local_index(mask: &[bool], nodes: &[u32]) -> Vec<u32> {
    nodes
        .iter()
        .enumerate()
        .filter_map(|(i, &v)| mask[v as usize].then_some(i as u32))
        .collect()
}
