use anyhow::{bail, Result};
use itertools::izip;

/// Which edges of an edge list end up in the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EdgeDirection {
    Forward,
    Reverse,
    #[default]
    Both,
}
impl EdgeDirection {
    pub fn has_forward_edges(&self) -> bool {
        matches!(self, Self::Forward | Self::Both)
    }
    pub fn has_reverse_edges(&self) -> bool {
        matches!(self, Self::Reverse | Self::Both)
    }
}

/// Compressed sparse rows: the neighbours of row `v` are
/// `indices[offsets[v]..offsets[v + 1]]`.
#[derive(Debug, Clone, Default)]
pub struct Csr {
    offsets: Vec<usize>,
    indices: Vec<u32>,
}
impl Csr {
    /// Builds the adjacency `row -> col` for every pair, keeping the input order per row.
    pub fn from_pairs(num_rows: usize, rows: &[u32], cols: &[u32]) -> Self {
        let mut offsets = vec![0usize; num_rows + 1];
        for &r in rows {
            offsets[r as usize + 1] += 1;
        }
        for i in 0..num_rows {
            offsets[i + 1] += offsets[i];
        }
        let mut cursor = offsets.clone();
        let mut indices = vec![0u32; rows.len()];
        for (&r, &c) in rows.iter().zip(cols) {
            indices[cursor[r as usize]] = c;
            cursor[r as usize] += 1;
        }
        Self { offsets, indices }
    }
    pub fn num_rows(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
    pub fn num_entries(&self) -> usize {
        self.indices.len()
    }
    pub fn row(&self, v: usize) -> &[u32] {
        &self.indices[self.offsets[v]..self.offsets[v + 1]]
    }
    pub fn degree(&self, v: usize) -> usize {
        self.offsets[v + 1] - self.offsets[v]
    }
    fn sort_dedup_rows(self) -> Self {
        let mut offsets = Vec::with_capacity(self.offsets.len());
        let mut indices = Vec::with_capacity(self.indices.len());
        offsets.push(0);
        for v in 0..self.num_rows() {
            let mut row = self.row(v).to_vec();
            row.sort_unstable();
            row.dedup();
            indices.extend(row);
            offsets.push(indices.len());
        }
        Self { offsets, indices }
    }
}

/// Node subset together with the edges among it, relabelled to local ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InducedSubgraph {
    /// Global id of local node `i`.
    pub nodes: Vec<u32>,
    pub src: Vec<u32>,
    pub dst: Vec<u32>,
}
impl InducedSubgraph {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }
}

/// Directed graph held in host memory.
///
/// Messages flow from `src` to `dst`; `in_adj` lists, for every node, the sources of its
/// incoming edges. `sym_adj` is the deduplicated undirected view without self loops,
/// which is what partitioning works on.
#[derive(Debug, Clone)]
pub struct Graph {
    num_nodes: usize,
    src: Vec<u32>,
    dst: Vec<u32>,
    in_adj: Csr,
    sym_adj: Csr,
}
impl Graph {
    pub fn new(num_nodes: usize, src: Vec<u32>, dst: Vec<u32>) -> Result<Self> {
        if src.len() != dst.len() {
            bail!(
                "edge endpoints differ in length: {} sources, {} destinations",
                src.len(),
                dst.len()
            );
        }
        if let Some(&v) = src.iter().chain(&dst).find(|&&v| v as usize >= num_nodes) {
            bail!("edge endpoint {v} out of range for {num_nodes} nodes");
        }
        let in_adj = Csr::from_pairs(num_nodes, &dst, &src);

        let (rows, cols): (Vec<u32>, Vec<u32>) = izip!(&src, &dst)
            .filter(|(u, v)| u != v)
            .flat_map(|(&u, &v)| [(u, v), (v, u)])
            .unzip();
        let sym_adj = Csr::from_pairs(num_nodes, &rows, &cols).sort_dedup_rows();

        Ok(Self {
            num_nodes,
            src,
            dst,
            in_adj,
            sym_adj,
        })
    }

    /// Builds a graph from an edge list, adding forward and/or reverse copies.
    pub fn from_edges(
        num_nodes: usize,
        edges: impl IntoIterator<Item = (u32, u32)>,
        direction: EdgeDirection,
    ) -> Result<Self> {
        let mut src = Vec::new();
        let mut dst = Vec::new();
        for (u, v) in edges {
            if direction.has_forward_edges() {
                src.push(u);
                dst.push(v);
            }
            if direction.has_reverse_edges() {
                src.push(v);
                dst.push(u);
            }
        }
        Self::new(num_nodes, src, dst)
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }
    pub fn edges(&self) -> (&[u32], &[u32]) {
        (&self.src, &self.dst)
    }
    pub fn in_neighbors(&self, v: usize) -> &[u32] {
        self.in_adj.row(v)
    }
    pub fn in_degree(&self, v: usize) -> usize {
        self.in_adj.degree(v)
    }
    /// Undirected neighbours, sorted and without duplicates or `v` itself.
    pub fn neighbors(&self, v: usize) -> &[u32] {
        self.sym_adj.row(v)
    }
    pub fn degree(&self, v: usize) -> usize {
        self.sym_adj.degree(v)
    }
    /// Number of undirected edges in the symmetric view.
    pub fn num_undirected_edges(&self) -> usize {
        self.sym_adj.num_entries() / 2
    }

    /// Keeps `nodes` (in the given order) and every edge whose endpoints are both kept.
    pub fn induced_subgraph(&self, nodes: &[u32]) -> Result<InducedSubgraph> {
        let mut local = vec![u32::MAX; self.num_nodes];
        for (i, &v) in nodes.iter().enumerate() {
            match local.get_mut(v as usize) {
                None => bail!("node {v} out of range for {} nodes", self.num_nodes),
                Some(slot) if *slot != u32::MAX => bail!("node {v} selected twice"),
                Some(slot) => *slot = i as u32,
            }
        }
        let mut src = Vec::new();
        let mut dst = Vec::new();
        for (i, &v) in nodes.iter().enumerate() {
            for &u in self.in_neighbors(v as usize) {
                let j = local[u as usize];
                if j != u32::MAX {
                    src.push(j);
                    dst.push(i as u32);
                }
            }
        }
        Ok(InducedSubgraph {
            nodes: nodes.to_vec(),
            src,
            dst,
        })
    }
}
