use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use candle_core::{DType, Device};
use candle_nn::{loss, Optimizer, VarBuilder, VarMap};
use rand::{rngs::StdRng, SeedableRng};

use crate::datasets::{Dataset, SubgraphBatch};
use crate::metrics::{Accuracy, DurationStats};
use crate::nn::{GnnModule, Sage, SageParams};
use crate::optim::{Adam, ParamsAdam};
use crate::sampler::{ClusterGcnSampler, LoaderConfig};

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub hidden_dim: usize,
    /// Number of SAGE layers, the last one producing class scores.
    pub num_layers: usize,
    pub dropout: f32,
    pub lr: f64,
    pub weight_decay: f64,
    pub epochs: usize,
    pub loader: LoaderConfig,
    pub log_every: usize,
    /// Epochs left out of the timing summary.
    pub warmup_epochs: usize,
    pub seed: u64,
}
impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 256,
            num_layers: 3,
            dropout: 0.5,
            lr: 0.001,
            weight_decay: 5e-4,
            epochs: 10,
            loader: LoaderConfig::default(),
            log_every: 20,
            warmup_epochs: 4,
            seed: 0,
        }
    }
}
impl TrainConfig {
    pub fn layer_sizes(&self, num_features: usize, num_classes: usize) -> Vec<usize> {
        let mut sizes = vec![num_features];
        sizes.extend(std::iter::repeat(self.hidden_dim).take(self.num_layers.saturating_sub(1)));
        sizes.push(num_classes);
        sizes
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainStats {
    pub duration: Duration,
    /// Mean loss over the batches that had training nodes.
    pub loss: Option<f32>,
    pub accuracy: Accuracy,
    pub steps: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EvalStats {
    pub valid: Accuracy,
    pub test: Accuracy,
}

#[derive(Debug, Clone)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train: TrainStats,
    pub eval: EvalStats,
}

#[derive(Debug, Clone)]
pub struct FitReport {
    pub epochs: Vec<EpochRecord>,
    pub durations: DurationStats,
}

pub struct Trainer {
    config: TrainConfig,
    varmap: VarMap,
    model: Sage,
    optimizer: Adam,
    rng: StdRng,
    device: Device,
}
impl Trainer {
    pub fn new(
        num_features: usize,
        num_classes: usize,
        config: TrainConfig,
        device: Device,
    ) -> Result<Self> {
        if config.num_layers == 0 {
            bail!("at least one SAGE layer is required");
        }
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = Sage::with_params(
            &config.layer_sizes(num_features, num_classes),
            SageParams {
                dropout_rate: config.dropout,
                ..Default::default()
            },
            vs.pp("sage"),
        )?;
        let optimizer = Adam::new(
            varmap.all_vars(),
            ParamsAdam {
                lr: config.lr,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            varmap,
            model,
            optimizer,
            device,
        })
    }
    pub fn model(&self) -> &Sage {
        &self.model
    }
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// One pass over all partitions with parameter updates. Batches without training
    /// nodes are skipped.
    pub fn train_epoch<D>(&mut self, sampler: &ClusterGcnSampler<D>) -> Result<TrainStats>
    where
        D: Dataset<Batch = SubgraphBatch>,
    {
        let start = Instant::now();
        let mut stats = TrainStats::default();
        let mut loss_sum = 0f32;
        let loader = sampler.loader(&self.config.loader, &mut self.rng, &self.device);
        for (it, batch) in loader.enumerate() {
            let batch = batch?;
            if batch.train_index.elem_count() == 0 {
                stats.skipped += 1;
                tracing::debug!(it, nodes = batch.num_nodes(), "no training nodes in batch");
                continue;
            }
            let logits = self
                .model
                .forward_t(&batch.xs, &batch.edge_index, true)?
                .index_select(&batch.train_index, 0)?;
            let ys = batch.ys.index_select(&batch.train_index, 0)?;
            let loss = loss::cross_entropy(&logits, &ys)?;
            self.optimizer.backward_step(&loss)?;

            let loss = loss.to_scalar::<f32>()?;
            let acc = Accuracy::from_logits(&logits, &ys)?;
            loss_sum += loss;
            stats.steps += 1;
            stats.accuracy.merge(acc);
            if it % self.config.log_every.max(1) == 0 {
                tracing::info!(
                    it,
                    loss,
                    acc = acc.value().unwrap_or_default(),
                    nodes = batch.num_nodes(),
                    edges = batch.num_edges(),
                    "train"
                );
            }
        }
        stats.duration = start.elapsed();
        stats.loss = (stats.steps > 0).then(|| loss_sum / stats.steps as f32);
        Ok(stats)
    }

    /// Accuracy on validation and test nodes, predicted within each batch's subgraph.
    pub fn evaluate<D>(&mut self, sampler: &ClusterGcnSampler<D>) -> Result<EvalStats>
    where
        D: Dataset<Batch = SubgraphBatch>,
    {
        let mut stats = EvalStats::default();
        let loader = sampler.loader(&self.config.loader, &mut self.rng, &self.device);
        for batch in loader {
            let batch = batch?;
            let logits = self.model.forward_t(&batch.xs, &batch.edge_index, false)?;
            for (index, acc) in [
                (&batch.valid_index, &mut stats.valid),
                (&batch.test_index, &mut stats.test),
            ] {
                if index.elem_count() > 0 {
                    acc.update(&logits.index_select(index, 0)?, &batch.ys.index_select(index, 0)?)?;
                }
            }
        }
        Ok(stats)
    }

    /// Trains for the configured number of epochs, evaluating after each one.
    pub fn fit<D>(&mut self, sampler: &ClusterGcnSampler<D>) -> Result<FitReport>
    where
        D: Dataset<Batch = SubgraphBatch>,
    {
        let mut durations = DurationStats::new(self.config.warmup_epochs);
        let mut epochs = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            let train = self.train_epoch(sampler)?;
            tracing::info!(
                epoch,
                seconds = train.duration.as_secs_f64(),
                loss = train.loss.unwrap_or(f32::NAN),
                skipped = train.skipped,
                "epoch trained"
            );
            durations.push(train.duration);

            let eval = self.evaluate(sampler)?;
            tracing::info!(
                epoch,
                valid_acc = eval.valid.value().unwrap_or(f64::NAN),
                test_acc = eval.test.value().unwrap_or(f64::NAN),
                "evaluated"
            );
            epochs.push(EpochRecord { epoch, train, eval });
        }
        match durations.summary() {
            Some((mean, std)) => tracing::info!(mean, std, "epoch time after warm-up (s)"),
            None => tracing::info!(
                warmup = self.config.warmup_epochs,
                "too few epochs for a timing summary"
            ),
        }
        Ok(FitReport { epochs, durations })
    }
}
