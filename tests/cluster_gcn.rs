use candle_core::{Device, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

use cluster_sage::datasets::{Dataset, NodePropPredDataset, Split};
use cluster_sage::graph::EdgeDirection;
use cluster_sage::partition::{GraphGrowing, Partitioner, Partitioning};
use cluster_sage::sampler::{ClusterGcnSampler, LoaderConfig};
use cluster_sage::train::{TrainConfig, Trainer};

const NUM_CLASSES: usize = 3;
const PER_CLASS: usize = 20;

// Three communities, dense inside and sparsely linked, with features hinting at the class.
fn planted_partition(seed: u64) -> NodePropPredDataset {
    planted_partition_with_split(seed, |i| match i {
        0..=11 => 0,
        12..=15 => 1,
        _ => 2,
    })
}

// `role(i)` puts the i-th node of each class into train (0), valid (1) or test (2).
fn planted_partition_with_split(seed: u64, role: impl Fn(usize) -> u8) -> NodePropPredDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = NUM_CLASSES * PER_CLASS;
    let labels: Vec<u32> = (0..n).map(|v| (v / PER_CLASS) as u32).collect();

    let mut source = Vec::new();
    let mut target = Vec::new();
    for u in 0..n {
        for v in u + 1..n {
            let p = if labels[u] == labels[v] { 0.3 } else { 0.01 };
            if rng.gen_bool(p) {
                source.push(u as u32);
                target.push(v as u32);
            }
        }
    }

    let mut features = Vec::with_capacity(n * (NUM_CLASSES + 1));
    for &y in &labels {
        for c in 0..NUM_CLASSES as u32 {
            let signal = if c == y { 1.0 } else { 0.0 };
            features.push(signal + rng.gen_range(-0.2f32..0.2));
        }
        features.push(1.0);
    }
    let x = Tensor::from_vec(features, (n, NUM_CLASSES + 1), &Device::Cpu).unwrap();

    let mut split = Split::default();
    for v in 0..n as u32 {
        match role(v as usize % PER_CLASS) {
            0 => split.train.push(v),
            1 => split.valid.push(v),
            _ => split.test.push(v),
        }
    }
    NodePropPredDataset::from_parts(x, source, target, labels, split, EdgeDirection::Both).unwrap()
}

fn small_config() -> TrainConfig {
    TrainConfig {
        hidden_dim: 16,
        num_layers: 2,
        dropout: 0.0,
        lr: 0.02,
        weight_decay: 0.0,
        epochs: 40,
        loader: LoaderConfig {
            batch_size: 2,
            shuffle: true,
            drop_last: false,
        },
        log_every: 1,
        warmup_epochs: 2,
        seed: 3,
    }
}

#[test]
fn cluster_batches_learn_planted_communities() {
    let dataset = planted_partition(11);
    assert_eq!(dataset.num_classes, NUM_CLASSES);

    let partitioning = GraphGrowing::default().partition(dataset.graph(), 6).unwrap();
    let sampler = ClusterGcnSampler::new(&dataset, partitioning).unwrap();
    let mut trainer = Trainer::new(
        dataset.num_features,
        dataset.num_classes,
        small_config(),
        Device::Cpu,
    )
    .unwrap();
    let report = trainer.fit(&sampler).unwrap();

    assert_eq!(report.epochs.len(), 40);
    assert_eq!(report.durations.durations().len(), 40);
    assert!(report.durations.summary().is_some());

    let first = &report.epochs[0];
    let last = report.epochs.last().unwrap();
    assert_eq!(first.train.steps + first.train.skipped, 3);
    assert!(last.train.loss.unwrap() < first.train.loss.unwrap());

    // every validation and test node is scored exactly once per evaluation
    assert_eq!(last.eval.valid.total, NUM_CLASSES * 4);
    assert_eq!(last.eval.test.total, NUM_CLASSES * 4);
    assert!(last.eval.valid.value().unwrap() >= 0.9, "{:?}", last.eval);
    assert!(last.eval.test.value().unwrap() >= 0.9, "{:?}", last.eval);
}

#[test]
fn evaluation_without_training_covers_all_split_nodes() {
    let dataset = planted_partition(5);
    let partitioning = GraphGrowing::default().partition(dataset.graph(), 4).unwrap();
    let sampler = ClusterGcnSampler::new(&dataset, partitioning).unwrap();
    let mut trainer = Trainer::new(
        dataset.num_features,
        dataset.num_classes,
        small_config(),
        Device::Cpu,
    )
    .unwrap();
    let eval = trainer.evaluate(&sampler).unwrap();
    assert_eq!(eval.valid.total, 12);
    assert_eq!(eval.test.total, 12);
}

#[test]
fn clusters_without_training_nodes_are_skipped() {
    // training nodes only in the first half of each class
    let dataset = planted_partition_with_split(7, |i| match i {
        0..=7 => 0,
        8..=13 => 1,
        _ => 2,
    });
    // part p holds nodes 10p..10p + 10, so odd parts have no training node
    let assignment = (0..(NUM_CLASSES * PER_CLASS) as u32).map(|v| v / 10).collect();
    let partitioning = Partitioning::from_assignment(assignment, 6).unwrap();
    let sampler = ClusterGcnSampler::new(&dataset, partitioning).unwrap();
    let config = TrainConfig {
        epochs: 3,
        loader: LoaderConfig {
            batch_size: 1,
            shuffle: true,
            drop_last: false,
        },
        ..small_config()
    };
    let mut trainer = Trainer::new(dataset.num_features, dataset.num_classes, config, Device::Cpu).unwrap();
    let report = trainer.fit(&sampler).unwrap();

    for record in &report.epochs {
        assert_eq!(record.train.skipped, 3);
        assert_eq!(record.train.steps, 3);
        assert!(record.train.loss.unwrap().is_finite());
        assert_eq!(record.train.accuracy.total, NUM_CLASSES * 8);
        assert_eq!(record.eval.valid.total, NUM_CLASSES * 6);
        assert_eq!(record.eval.test.total, NUM_CLASSES * 6);
    }
}
