//! Cluster-GCN minibatches: each batch is the subgraph induced by a union of partitions.
//!
//! https://arxiv.org/abs/1905.07953
use anyhow::{bail, Result};
use candle_core::Device;
use itertools::Itertools;
use rand::{seq::SliceRandom, Rng};

use crate::datasets::Dataset;
use crate::partition::Partitioning;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Partitions per batch.
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
}
impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            shuffle: true,
            drop_last: false,
        }
    }
}

pub struct ClusterGcnSampler<'a, D> {
    dataset: &'a D,
    partitioning: Partitioning,
}
impl<'a, D: Dataset> ClusterGcnSampler<'a, D> {
    pub fn new(dataset: &'a D, partitioning: Partitioning) -> Result<Self> {
        if partitioning.num_nodes() != dataset.graph().num_nodes() {
            bail!(
                "partitioning covers {} nodes, graph has {}",
                partitioning.num_nodes(),
                dataset.graph().num_nodes()
            );
        }
        Ok(Self {
            dataset,
            partitioning,
        })
    }
    pub fn dataset(&self) -> &'a D {
        self.dataset
    }
    pub fn partitioning(&self) -> &Partitioning {
        &self.partitioning
    }
    pub fn num_parts(&self) -> usize {
        self.partitioning.num_parts()
    }

    /// Induced subgraph of the union of `partition_ids`, nodes ordered part by part.
    pub fn sample(&self, partition_ids: &[usize], device: &Device) -> Result<D::Batch> {
        if let Some(&p) = partition_ids.iter().find(|&&p| p >= self.num_parts()) {
            bail!("partition {p} out of range for {} partitions", self.num_parts());
        }
        let nodes = partition_ids
            .iter()
            .flat_map(|&p| self.partitioning.part(p).iter().copied())
            .collect_vec();
        self.dataset.induced_subgraph(&nodes, device)
    }

    /// One epoch of batches over all partitions.
    pub fn loader<'s, R: Rng>(
        &'s self,
        config: &LoaderConfig,
        rng: &mut R,
        device: &'s Device,
    ) -> ClusterLoader<'s, 'a, D> {
        let mut order = (0..self.num_parts()).collect_vec();
        if config.shuffle {
            order.shuffle(rng);
        }
        let batch_size = config.batch_size.max(1);
        if config.drop_last {
            order.truncate(order.len() - order.len() % batch_size);
        }
        ClusterLoader {
            sampler: self,
            order,
            batch_size,
            position: 0,
            device,
        }
    }
}

pub struct ClusterLoader<'s, 'a, D> {
    sampler: &'s ClusterGcnSampler<'a, D>,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
    device: &'s Device,
}
impl<D> ClusterLoader<'_, '_, D> {
    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }
}

impl<'s, 'a, D: Dataset> Iterator for ClusterLoader<'s, 'a, D> {
    type Item = Result<D::Batch>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let ids = &self.order[self.position..end];
        self.position = end;
        Some(self.sampler.sample(ids, self.device))
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}
impl<'s, 'a, D: Dataset> ExactSizeIterator for ClusterLoader<'s, 'a, D> {}
