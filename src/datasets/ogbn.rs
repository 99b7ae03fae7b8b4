use std::{collections::HashMap, fmt, path::Path};

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};

use super::traits::Dataset;
use super::utils::{column_u32, download_and_extract, read_csv_gz, table_f32};
use crate::graph::{EdgeDirection, Graph};
use crate::utils::{index_to_mask, local_index, mask_to_index};

/// OGB node property prediction datasets that ship as plain CSV archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OgbnName {
    Products,
    Arxiv,
}
impl OgbnName {
    fn short_name(&self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Arxiv => "arxiv",
        }
    }
    fn split_name(&self) -> &'static str {
        match self {
            Self::Products => "sales_ranking",
            Self::Arxiv => "time",
        }
    }
    /// Undirected datasets store each edge once; their reverse copies are added on load.
    pub fn edge_direction(&self) -> EdgeDirection {
        match self {
            Self::Products => EdgeDirection::Both,
            Self::Arxiv => EdgeDirection::Forward,
        }
    }
    pub fn url(&self) -> String {
        format!(
            "http://snap.stanford.edu/ogb/data/nodeproppred/{}.zip",
            self.short_name()
        )
    }
}
impl fmt::Display for OgbnName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ogbn-{}", self.short_name())
    }
}

/// Node ids of the train / validation / test sets.
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub train: Vec<u32>,
    pub valid: Vec<u32>,
    pub test: Vec<u32>,
}

/// Induced subgraph of a node set with everything needed for a training or evaluation step.
#[derive(Debug, Clone)]
pub struct SubgraphBatch {
    /// Global id of each local node.
    pub node_ids: Vec<u32>,
    pub xs: Tensor,
    /// `(2, num_edges)`, row 0 sources and row 1 destinations, in local ids.
    pub edge_index: Tensor,
    pub ys: Tensor,
    pub train_index: Tensor,
    pub valid_index: Tensor,
    pub test_index: Tensor,
}
impl SubgraphBatch {
    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }
    pub fn num_edges(&self) -> usize {
        self.edge_index.dims().get(1).copied().unwrap_or(0)
    }
}

/// Node classification dataset held in host memory.
#[derive(Debug, Clone)]
pub struct NodePropPredDataset {
    pub num_features: usize,
    pub num_classes: usize,
    graph: Graph,
    x: Tensor,
    labels: Vec<u32>,
    train_mask: Vec<bool>,
    valid_mask: Vec<bool>,
    test_mask: Vec<bool>,
}
impl NodePropPredDataset {
    /// Loads `name` from `root`, downloading it first when absent.
    pub fn new<P: AsRef<Path>>(name: OgbnName, root: P) -> Result<Self> {
        let root = root.as_ref();
        let dir = root.join(name.short_name());
        if !dir.exists() {
            tracing::info!(dataset = %name, root = %root.display(), "dataset not found, downloading");
            Self::download(name, root)?;
        }
        Self::load(name, dir)
    }
    pub fn download<P: AsRef<Path>>(name: OgbnName, root: P) -> Result<()> {
        std::fs::create_dir_all(root.as_ref())?;
        download_and_extract(&name.url(), root)
    }

    /// Reads an extracted OGB directory (`raw/` and `split/<split>/`).
    pub fn load<P: AsRef<Path>>(name: OgbnName, dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let raw = dir.join("raw");

        let edge_df = read_csv_gz(raw.join("edge.csv.gz"))?;
        if edge_df.width() != 2 {
            bail!("edge.csv.gz has {} columns, expected 2", edge_df.width());
        }
        let source = column_u32(&edge_df.get_columns()[0])?;
        let target = column_u32(&edge_df.get_columns()[1])?;

        let feat_df = read_csv_gz(raw.join("node-feat.csv.gz"))?;
        let (num_nodes, num_features) = feat_df.shape();
        let x = Tensor::from_vec(table_f32(&feat_df)?, (num_nodes, num_features), &Device::Cpu)?;

        let label_df = read_csv_gz(raw.join("node-label.csv.gz"))?;
        let labels = column_u32(&label_df.get_columns()[0])?;

        let split_dir = dir.join("split").join(name.split_name());
        let read_split = |file: &str| -> Result<Vec<u32>> {
            let df = read_csv_gz(split_dir.join(file))?;
            column_u32(&df.get_columns()[0])
        };
        let split = Split {
            train: read_split("train.csv.gz")?,
            valid: read_split("valid.csv.gz")?,
            test: read_split("test.csv.gz")?,
        };

        let edges = source.into_iter().zip(target);
        let graph = Graph::from_edges(num_nodes, edges, name.edge_direction())?;
        let dataset = Self::with_graph(graph, x, labels, split)?;
        tracing::info!(
            dataset = %name,
            nodes = dataset.graph.num_nodes(),
            edges = dataset.graph.num_edges(),
            features = dataset.num_features,
            classes = dataset.num_classes,
            "loaded dataset"
        );
        Ok(dataset)
    }

    // ```python
    // data = {
    //     "x": x.numpy(),
    //     "edge_index": edge_index.numpy(),
    //     "y": y.numpy(),
    //     "train_indices": split["train"].numpy(),
    //     "val_indices": split["valid"].numpy(),
    //     "test_indices": split["test"].numpy(),
    // }
    // np.savez("products.npz", **data)
    // ```
    /// Loads an npz export. Splits are read from `*_indices` or, failing that, `*_mask`.
    pub fn from_npz<P: AsRef<Path>>(path: P, direction: EdgeDirection) -> Result<Self> {
        let path = path.as_ref();
        let mut hashmap: HashMap<String, Tensor> = HashMap::from_iter(
            Tensor::read_npz(path).with_context(|| format!("reading {}", path.display()))?,
        );
        let mut take = |key: &str| {
            hashmap
                .remove(key)
                .with_context(|| format!("{} has no array named {key}", path.display()))
        };

        let x = take("x")?.to_dtype(DType::F32)?;
        let edge_index = take("edge_index")?.to_dtype(DType::U32)?.to_vec2::<u32>()?;
        let labels = take("y")?.flatten_all()?.to_dtype(DType::U32)?.to_vec1::<u32>()?;
        let mut read_split = |name: &str| -> Result<Vec<u32>> {
            match take(format!("{name}_indices").as_str()) {
                Ok(index) => Ok(index.flatten_all()?.to_dtype(DType::U32)?.to_vec1::<u32>()?),
                Err(_) => Ok(mask_to_index(&take(format!("{name}_mask").as_str())?.flatten_all()?)?),
            }
        };
        let split = Split {
            train: read_split("train")?,
            valid: read_split("val")?,
            test: read_split("test")?,
        };
        let [source, target]: [Vec<u32>; 2] = edge_index
            .try_into()
            .map_err(|rows: Vec<_>| anyhow::anyhow!("edge_index has {} rows, expected 2", rows.len()))?;
        Self::from_parts(x, source, target, labels, split, direction)
    }

    /// Builds a dataset from in-memory arrays; `x` is `(num_nodes, num_features)`.
    pub fn from_parts(
        x: Tensor,
        source: Vec<u32>,
        target: Vec<u32>,
        labels: Vec<u32>,
        split: Split,
        direction: EdgeDirection,
    ) -> Result<Self> {
        let (num_nodes, _) = x.dims2()?;
        let edges = source.into_iter().zip(target);
        let graph = Graph::from_edges(num_nodes, edges, direction)?;
        Self::with_graph(graph, x, labels, split)
    }

    fn with_graph(graph: Graph, x: Tensor, labels: Vec<u32>, split: Split) -> Result<Self> {
        let num_nodes = graph.num_nodes();
        let (rows, num_features) = x.dims2()?;
        if rows != num_nodes || labels.len() != num_nodes {
            bail!(
                "{num_nodes} nodes, but {rows} feature rows and {} labels",
                labels.len()
            );
        }
        let num_classes = labels.iter().max().map_or(0, |&y| y as usize + 1);
        Ok(Self {
            num_features,
            num_classes,
            x: x.to_device(&Device::Cpu)?,
            labels,
            train_mask: index_to_mask(&split.train, num_nodes).context("train split")?,
            valid_mask: index_to_mask(&split.valid, num_nodes).context("valid split")?,
            test_mask: index_to_mask(&split.test, num_nodes).context("test split")?,
            graph,
        })
    }

    pub fn features(&self) -> &Tensor {
        &self.x
    }
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }
    pub fn train_mask(&self) -> &[bool] {
        &self.train_mask
    }
    pub fn valid_mask(&self) -> &[bool] {
        &self.valid_mask
    }
    pub fn test_mask(&self) -> &[bool] {
        &self.test_mask
    }
}

impl Dataset for NodePropPredDataset {
    type Batch = SubgraphBatch;

    fn graph(&self) -> &Graph {
        &self.graph
    }
    fn induced_subgraph(&self, nodes: &[u32], device: &Device) -> Result<SubgraphBatch> {
        let sg = self.graph.induced_subgraph(nodes)?;
        let n = sg.num_nodes();
        let e = sg.num_edges();

        let index = Tensor::from_slice(&sg.nodes, n, &Device::Cpu)?;
        let xs = self.x.index_select(&index, 0)?.to_device(device)?;
        let edge_index = Tensor::from_vec([sg.src, sg.dst].concat(), (2, e), device)?;
        let ys = Tensor::from_iter(sg.nodes.iter().map(|&v| self.labels[v as usize]), device)?;

        let to_tensor = |mask: &[bool]| {
            let index = local_index(mask, &sg.nodes);
            let len = index.len();
            Tensor::from_vec(index, len, device)
        };
        Ok(SubgraphBatch {
            train_index: to_tensor(&self.train_mask)?,
            valid_index: to_tensor(&self.valid_mask)?,
            test_index: to_tensor(&self.test_mask)?,
            node_ids: sg.nodes,
            xs,
            edge_index,
            ys,
        })
    }
}
