use std::path::PathBuf;

use candle_core::Device;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use cluster_sage::datasets::{Dataset, NodePropPredDataset, OgbnName};
use cluster_sage::graph::EdgeDirection;
use cluster_sage::partition::{self, GraphGrowing, Partitioner, RandomPartitioner};
use cluster_sage::sampler::{ClusterGcnSampler, LoaderConfig};
use cluster_sage::train::{TrainConfig, Trainer};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PartitionMethod {
    /// BFS graph growing with boundary refinement.
    Growing,
    /// Balanced random clusters.
    Random,
}

#[derive(Parser, Debug)]
#[command(name = "cluster-gcn")]
#[command(about = "Train GraphSAGE on an OGB node classification graph with Cluster-GCN batches")]
struct Args {
    #[arg(long, value_enum, default_value = "products")]
    dataset: OgbnName,

    /// Directory holding (or receiving) the extracted OGB dataset
    #[arg(long, default_value = "dataset")]
    root: PathBuf,

    /// Load an npz export instead of the OGB directory
    #[arg(long)]
    npz: Option<PathBuf>,

    #[arg(long, default_value_t = 1000)]
    num_partitions: usize,

    #[arg(long, value_enum, default_value = "growing")]
    partition_method: PartitionMethod,

    /// Base name of the partition cache; the method and part count are appended
    #[arg(long, default_value = "cluster_gcn.npy")]
    partition_cache: PathBuf,

    #[arg(long)]
    no_partition_cache: bool,

    /// Partitions per batch
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    #[arg(long)]
    drop_last: bool,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 256)]
    hidden_dim: usize,

    #[arg(long, default_value_t = 3, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    num_layers: usize,

    #[arg(long, default_value_t = 0.5)]
    dropout: f32,

    #[arg(long, default_value_t = 0.001)]
    lr: f64,

    #[arg(long, default_value_t = 5e-4)]
    weight_decay: f64,

    #[arg(long, default_value_t = 20)]
    log_every: usize,

    /// Epochs excluded from the timing summary
    #[arg(long, default_value_t = 4)]
    warmup_epochs: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Run on the CPU even when a GPU is available
    #[arg(long)]
    cpu: bool,
}

// cargo run --release --features cuda --bin cluster-gcn
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    tracing::info!(?device, "selected device");

    // load dataset
    let dataset = match &args.npz {
        Some(path) => NodePropPredDataset::from_npz(path, EdgeDirection::Forward)?,
        None => NodePropPredDataset::new(args.dataset, &args.root)?,
    };

    // partition the graph
    let partitioner: Box<dyn Partitioner> = match args.partition_method {
        PartitionMethod::Growing => Box::new(GraphGrowing::default()),
        PartitionMethod::Random => Box::new(RandomPartitioner { seed: args.seed }),
    };
    let cache = (!args.no_partition_cache).then_some(args.partition_cache.as_path());
    let partitioning = partition::load_or_compute(
        partitioner.as_ref(),
        dataset.graph(),
        args.num_partitions,
        cache,
    )?;
    let sampler = ClusterGcnSampler::new(&dataset, partitioning)?;

    // training loop
    let config = TrainConfig {
        hidden_dim: args.hidden_dim,
        num_layers: args.num_layers,
        dropout: args.dropout,
        lr: args.lr,
        weight_decay: args.weight_decay,
        epochs: args.epochs,
        loader: LoaderConfig {
            batch_size: args.batch_size,
            shuffle: true,
            drop_last: args.drop_last,
        },
        log_every: args.log_every,
        warmup_epochs: args.warmup_epochs,
        seed: args.seed,
    };
    let mut trainer = Trainer::new(dataset.num_features, dataset.num_classes, config, device)?;
    let report = trainer.fit(&sampler)?;

    if let Some(last) = report.epochs.last() {
        println!(
            "Validation acc: {:.4} Test acc: {:.4}",
            last.eval.valid.value().unwrap_or(f64::NAN),
            last.eval.test.value().unwrap_or(f64::NAN),
        );
    }
    if let Some((mean, std)) = report.durations.summary() {
        println!("{mean} {std}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_layers_are_rejected() {
        assert!(Args::try_parse_from(["cluster-gcn", "--num-layers", "0"]).is_err());
        let args = Args::try_parse_from(["cluster-gcn", "--num-layers", "1"]).unwrap();
        assert_eq!(args.num_layers, 1);
        assert_eq!(Args::try_parse_from(["cluster-gcn"]).unwrap().num_layers, 3);
    }
}
