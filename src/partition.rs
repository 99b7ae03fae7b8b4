//! Node partitioning for cluster-based minibatching.
//!
//! A [`Partitioning`] splits the node set into `k` disjoint, non-empty parts. ClusterGCN
//! wants parts with few edges between them so that the induced subgraph of a handful of
//! parts loses little of the neighbourhood structure.
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::graph::Graph;

const UNASSIGNED: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitioning {
    num_parts: usize,
    assignment: Vec<u32>,
    node_ids: Vec<u32>,
    offsets: Vec<usize>,
}
impl Partitioning {
    /// Groups nodes by part; within a part nodes stay sorted by id.
    pub fn from_assignment(assignment: Vec<u32>, num_parts: usize) -> Result<Self> {
        let mut offsets = vec![0usize; num_parts + 1];
        for (v, &p) in assignment.iter().enumerate() {
            if p as usize >= num_parts {
                bail!("node {v} assigned to part {p}, but there are {num_parts} parts");
            }
            offsets[p as usize + 1] += 1;
        }
        for i in 0..num_parts {
            offsets[i + 1] += offsets[i];
        }
        let mut cursor = offsets.clone();
        let mut node_ids = vec![0u32; assignment.len()];
        for (v, &p) in assignment.iter().enumerate() {
            node_ids[cursor[p as usize]] = v as u32;
            cursor[p as usize] += 1;
        }
        Ok(Self {
            num_parts,
            assignment,
            node_ids,
            offsets,
        })
    }
    pub fn num_parts(&self) -> usize {
        self.num_parts
    }
    pub fn num_nodes(&self) -> usize {
        self.assignment.len()
    }
    pub fn assignment(&self) -> &[u32] {
        &self.assignment
    }
    pub fn part(&self, p: usize) -> &[u32] {
        &self.node_ids[self.offsets[p]..self.offsets[p + 1]]
    }
    pub fn part_sizes(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }
    /// Undirected edges whose endpoints lie in different parts.
    pub fn edge_cut(&self, graph: &Graph) -> usize {
        (0..graph.num_nodes())
            .map(|v| {
                graph
                    .neighbors(v)
                    .iter()
                    .filter(|&&u| u as usize > v && self.assignment[u as usize] != self.assignment[v])
                    .count()
            })
            .sum()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let n = self.assignment.len();
        Tensor::from_slice(&self.assignment, n, &Device::Cpu)?.write_npy(path.as_ref())?;
        Ok(())
    }
    pub fn load<P: AsRef<Path>>(path: P, num_parts: usize) -> Result<Self> {
        let path = path.as_ref();
        let assignment = Tensor::read_npy(path)
            .with_context(|| format!("reading partition cache {}", path.display()))?
            .to_dtype(DType::U32)?
            .to_vec1::<u32>()?;
        let partitioning = Self::from_assignment(assignment, num_parts)?;
        if let Some(p) = partitioning.part_sizes().iter().position(|&s| s == 0) {
            bail!("part {p} of {num_parts} is empty in {}", path.display());
        }
        Ok(partitioning)
    }
}

pub trait Partitioner {
    fn partition(&self, graph: &Graph, num_parts: usize) -> Result<Partitioning>;
    /// Distinguishes cached assignments of different methods and settings.
    fn cache_key(&self) -> String;
}

fn check_num_parts(graph: &Graph, num_parts: usize) -> Result<()> {
    if num_parts == 0 {
        bail!("number of partitions must be positive");
    }
    if num_parts > graph.num_nodes() {
        bail!(
            "cannot split {} nodes into {num_parts} non-empty partitions",
            graph.num_nodes()
        );
    }
    Ok(())
}

/// Breadth-first graph growing followed by greedy boundary refinement.
///
/// Part `i` is grown from the lowest unassigned node id until it holds `n / k` nodes (one
/// more for the first `n % k` parts), jumping to a new seed when its frontier runs dry.
/// Refinement then moves single nodes to the neighbouring part holding most of their
/// neighbours whenever that strictly lowers the edge cut, no part grows beyond
/// `(1 + imbalance) * n / k` and no part is emptied.
#[derive(Debug, Clone)]
pub struct GraphGrowing {
    pub refine_passes: usize,
    pub imbalance: f64,
}
impl Default for GraphGrowing {
    fn default() -> Self {
        Self {
            refine_passes: 4,
            imbalance: 0.05,
        }
    }
}
impl GraphGrowing {
    fn grow(graph: &Graph, num_parts: usize) -> Vec<u32> {
        let n = graph.num_nodes();
        let (base, extra) = (n / num_parts, n % num_parts);
        let mut assignment = vec![UNASSIGNED; n];
        let mut next_seed = 0usize;
        let mut queue = VecDeque::new();
        for part in 0..num_parts {
            let target = base + usize::from(part < extra);
            let mut size = 0;
            queue.clear();
            while size < target {
                let v = match queue.pop_front() {
                    Some(v) => v,
                    None => {
                        while assignment[next_seed] != UNASSIGNED {
                            next_seed += 1;
                        }
                        next_seed
                    }
                };
                if assignment[v] != UNASSIGNED {
                    continue;
                }
                assignment[v] = part as u32;
                size += 1;
                queue.extend(
                    graph
                        .neighbors(v)
                        .iter()
                        .map(|&u| u as usize)
                        .filter(|&u| assignment[u] == UNASSIGNED),
                );
            }
        }
        assignment
    }

    fn refine(&self, graph: &Graph, num_parts: usize, assignment: &mut [u32]) -> usize {
        let n = graph.num_nodes();
        let max_size = ((1.0 + self.imbalance) * n as f64 / num_parts as f64).ceil() as usize;
        let mut sizes = vec![0usize; num_parts];
        for &p in assignment.iter() {
            sizes[p as usize] += 1;
        }
        let mut counts: HashMap<u32, usize> = HashMap::new();
        let mut total_moves = 0;
        for pass in 0..self.refine_passes {
            let mut moves = 0;
            for v in 0..n {
                let own = assignment[v];
                if sizes[own as usize] <= 1 {
                    continue;
                }
                counts.clear();
                for &u in graph.neighbors(v) {
                    *counts.entry(assignment[u as usize]).or_default() += 1;
                }
                let internal = counts.get(&own).copied().unwrap_or(0);
                let best = counts
                    .iter()
                    .filter(|&(&p, _)| p != own && sizes[p as usize] < max_size)
                    .max_by_key(|&(&p, &c)| (c, Reverse(p)));
                if let Some((&p, &c)) = best {
                    if c > internal {
                        assignment[v] = p;
                        sizes[own as usize] -= 1;
                        sizes[p as usize] += 1;
                        moves += 1;
                    }
                }
            }
            tracing::debug!(pass, moves, "refinement pass");
            total_moves += moves;
            if moves == 0 {
                break;
            }
        }
        total_moves
    }
}
impl Partitioner for GraphGrowing {
    fn partition(&self, graph: &Graph, num_parts: usize) -> Result<Partitioning> {
        check_num_parts(graph, num_parts)?;
        let mut assignment = Self::grow(graph, num_parts);
        self.refine(graph, num_parts, &mut assignment);
        Partitioning::from_assignment(assignment, num_parts)
    }
    fn cache_key(&self) -> String {
        "growing".to_owned()
    }
}

/// Balanced uniform random assignment.
#[derive(Debug, Clone, Default)]
pub struct RandomPartitioner {
    pub seed: u64,
}
impl Partitioner for RandomPartitioner {
    fn partition(&self, graph: &Graph, num_parts: usize) -> Result<Partitioning> {
        check_num_parts(graph, num_parts)?;
        let mut order: Vec<u32> = (0..graph.num_nodes() as u32).collect();
        order.shuffle(&mut StdRng::seed_from_u64(self.seed));
        let mut assignment = vec![0u32; order.len()];
        for (i, &v) in order.iter().enumerate() {
            assignment[v as usize] = (i % num_parts) as u32;
        }
        Partitioning::from_assignment(assignment, num_parts)
    }
    fn cache_key(&self) -> String {
        format!("random-{}", self.seed)
    }
}

/// Cache file for `partitioner` and `num_parts` next to `base`:
/// `cluster_gcn.npy` becomes `cluster_gcn.growing.1000.npy`.
pub fn cache_path(base: &Path, partitioner: &dyn Partitioner, num_parts: usize) -> PathBuf {
    let stem = base
        .file_stem()
        .map_or_else(|| "partition".into(), |s| s.to_string_lossy());
    base.with_file_name(format!(
        "{stem}.{}.{num_parts}.npy",
        partitioner.cache_key()
    ))
}

/// Reuses the assignment cached under `cache` (see [`cache_path`]) when it fits `graph`
/// and `num_parts` with no empty part, otherwise partitions and writes the cache.
pub fn load_or_compute(
    partitioner: &dyn Partitioner,
    graph: &Graph,
    num_parts: usize,
    cache: Option<&Path>,
) -> Result<Partitioning> {
    let cache = cache.map(|base| cache_path(base, partitioner, num_parts));
    if let Some(path) = cache.as_deref().filter(|p| p.exists()) {
        match Partitioning::load(path, num_parts) {
            Ok(p) if p.num_nodes() == graph.num_nodes() => {
                tracing::info!(path = %path.display(), "loaded cached partitioning");
                return Ok(p);
            }
            Ok(p) => tracing::warn!(
                path = %path.display(),
                cached_nodes = p.num_nodes(),
                "partition cache does not match the graph, recomputing"
            ),
            Err(e) => tracing::warn!(path = %path.display(), "ignoring partition cache: {e:#}"),
        }
    }
    let start = std::time::Instant::now();
    let partitioning = partitioner.partition(graph, num_parts)?;
    tracing::info!(
        num_parts,
        edge_cut = partitioning.edge_cut(graph),
        undirected_edges = graph.num_undirected_edges(),
        elapsed = ?start.elapsed(),
        "partitioned graph"
    );
    if let Some(path) = &cache {
        partitioning.save(path)?;
    }
    Ok(partitioning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeDirection;

    fn clique_edges(nodes: &[u32]) -> Vec<(u32, u32)> {
        let mut edges = Vec::new();
        for (i, &u) in nodes.iter().enumerate() {
            for &v in &nodes[i + 1..] {
                edges.push((u, v));
            }
        }
        edges
    }

    #[test]
    fn path_is_cut_into_contiguous_runs() {
        let g = Graph::from_edges(12, (0..11).map(|i| (i, i + 1)), EdgeDirection::Both).unwrap();
        let p = GraphGrowing::default().partition(&g, 3).unwrap();
        assert_eq!(p.part(0), &[0, 1, 2, 3]);
        assert_eq!(p.part(1), &[4, 5, 6, 7]);
        assert_eq!(p.part(2), &[8, 9, 10, 11]);
        assert_eq!(p.edge_cut(&g), 2);
    }

    #[test]
    fn sizes_are_balanced_and_non_empty() {
        let g = Graph::from_edges(9, (0..8).map(|i| (i, i + 1)), EdgeDirection::Both).unwrap();
        let p = GraphGrowing {
            refine_passes: 0,
            imbalance: 0.0,
        }
        .partition(&g, 4)
        .unwrap();
        assert_eq!(p.part_sizes(), vec![3, 2, 2, 2]);

        let p = RandomPartitioner { seed: 7 }.partition(&g, 4).unwrap();
        let mut sizes = p.part_sizes();
        sizes.sort();
        assert_eq!(sizes, vec![2, 2, 2, 3]);
    }

    #[test]
    fn refinement_separates_interleaved_cliques() {
        let evens = [0, 2, 4, 6, 8];
        let odds = [1, 3, 5, 7, 9];
        let mut edges = clique_edges(&evens);
        edges.extend(clique_edges(&odds));
        edges.push((0, 1));
        let g = Graph::from_edges(10, edges, EdgeDirection::Both).unwrap();

        let grown = GraphGrowing {
            refine_passes: 0,
            imbalance: 0.05,
        }
        .partition(&g, 2)
        .unwrap();
        assert!(grown.edge_cut(&g) > 1);

        let refined = GraphGrowing::default().partition(&g, 2).unwrap();
        assert_eq!(refined.edge_cut(&g), 1);
        assert_eq!(refined.part(0), &evens);
        assert_eq!(refined.part(1), &odds);
    }

    #[test]
    fn every_node_lands_in_exactly_one_part() {
        let g = Graph::from_edges(50, (0..49).map(|i| (i, (i * 7 + 3) % 50)), EdgeDirection::Both)
            .unwrap();
        let p = GraphGrowing::default().partition(&g, 6).unwrap();
        let mut seen: Vec<u32> = (0..6).flat_map(|i| p.part(i).to_vec()).collect();
        seen.sort();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        assert!(p.part_sizes().iter().all(|&s| s > 0));
    }

    #[test]
    fn invalid_part_counts_are_rejected() {
        let g = Graph::from_edges(3, [(0, 1)], EdgeDirection::Both).unwrap();
        assert!(GraphGrowing::default().partition(&g, 0).is_err());
        assert!(RandomPartitioner::default().partition(&g, 4).is_err());
        assert!(Partitioning::from_assignment(vec![0, 2], 2).is_err());
    }

    #[test]
    fn cache_is_reused_only_when_it_fits() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("parts.npy");
        let g = Graph::from_edges(8, (0..7).map(|i| (i, i + 1)), EdgeDirection::Both).unwrap();

        let random = RandomPartitioner { seed: 1 };
        let first = load_or_compute(&random, &g, 2, Some(&base)).unwrap();
        assert!(dir.path().join("parts.random-1.2.npy").exists());
        let cached = load_or_compute(&random, &g, 2, Some(&base)).unwrap();
        assert_eq!(first, cached);

        // another method never picks up the random assignment
        let grown = load_or_compute(&GraphGrowing::default(), &g, 2, Some(&base)).unwrap();
        assert_eq!(grown.part(0), &[0, 1, 2, 3]);
        assert!(dir.path().join("parts.growing.2.npy").exists());

        let bigger = Graph::from_edges(10, (0..9).map(|i| (i, i + 1)), EdgeDirection::Both).unwrap();
        let fresh = load_or_compute(&GraphGrowing::default(), &bigger, 2, Some(&base)).unwrap();
        assert_eq!(fresh.num_nodes(), 10);
        assert_eq!(fresh.part(0), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn cache_with_fewer_parts_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("parts.npy");
        let g = Graph::from_edges(20, (0..19).map(|i| (i, i + 1)), EdgeDirection::Both).unwrap();
        let growing = GraphGrowing::default();
        load_or_compute(&growing, &g, 2, Some(&base)).unwrap();

        // a two-part assignment stored where the four-part one is expected
        std::fs::copy(
            cache_path(&base, &growing, 2),
            cache_path(&base, &growing, 4),
        )
        .unwrap();
        assert!(Partitioning::load(cache_path(&base, &growing, 4), 4).is_err());

        let p = load_or_compute(&growing, &g, 4, Some(&base)).unwrap();
        assert_eq!(p.part_sizes(), vec![5, 5, 5, 5]);
        let reloaded = Partitioning::load(cache_path(&base, &growing, 4), 4).unwrap();
        assert_eq!(reloaded, p);
    }
}
