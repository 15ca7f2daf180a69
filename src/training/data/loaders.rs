//! Epoch-wise batch iteration over an [`ImageDataset`]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::datasets::{select_rows, ImageDataset};
use crate::error::{Error, Result};
use crate::training::config::TrainingParams;
use candle_core::Tensor;

/// Configuration for DataLoader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoaderConfig {
    /// Batch size
    pub batch_size: usize,
    /// Whether to shuffle sample order every epoch
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Seed for the shuffling generator
    pub seed: u64,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            seed: 42,
        }
    }
}

impl From<&TrainingParams> for DataLoaderConfig {
    fn from(params: &TrainingParams) -> Self {
        Self {
            batch_size: params.batch_size,
            shuffle: params.shuffle,
            drop_last: false,
            seed: params.seed,
        }
    }
}

impl DataLoaderConfig {
    /// Loader settings for two unpaired domains trained in lockstep.
    ///
    /// Both drop their trailing partial batch so every zipped pair has the
    /// configured batch size. Domain B shuffles from the next seed.
    pub fn domain_pair(params: &TrainingParams) -> (Self, Self) {
        let a = Self {
            drop_last: true,
            ..Self::from(params)
        };
        let b = Self {
            seed: a.seed.wrapping_add(1),
            ..a.clone()
        };
        (a, b)
    }
}

/// Restartable batch source: every call to [`DataLoader::epoch`] starts a new pass
pub struct DataLoader {
    dataset: ImageDataset,
    config: DataLoaderConfig,
    rng: StdRng,
    epoch: usize,
}

impl DataLoader {
    /// Create a new DataLoader
    pub fn new(dataset: ImageDataset, config: DataLoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::invalid_input("batch size must be greater than 0"));
        }
        debug!(
            "Creating DataLoader over {} samples with batch_size={}, shuffle={}, drop_last={}",
            dataset.len(),
            config.batch_size,
            config.shuffle,
            config.drop_last
        );
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            dataset,
            config,
            rng,
            epoch: 0,
        })
    }

    /// Get the number of batches per epoch
    pub fn num_batches(&self) -> usize {
        let dataset_size = self.dataset.len();
        if self.config.drop_last {
            dataset_size / self.config.batch_size
        } else {
            dataset_size.div_ceil(self.config.batch_size)
        }
    }

    /// Underlying dataset
    pub fn dataset(&self) -> &ImageDataset {
        &self.dataset
    }

    /// Configured batch size
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Number of passes started so far
    pub fn epochs_started(&self) -> usize {
        self.epoch
    }

    /// Start a new pass over the data
    pub fn epoch(&mut self) -> EpochBatches {
        self.epoch += 1;
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            indices.shuffle(&mut self.rng);
        }
        let batches = self.create_batches(indices);
        debug!("Epoch pass {} with {} batches", self.epoch, batches.len());
        EpochBatches {
            images: self.dataset.images().clone(),
            batches: batches.into_iter(),
        }
    }

    fn create_batches(&self, indices: Vec<usize>) -> Vec<Vec<usize>> {
        let mut batches = Vec::new();
        for chunk in indices.chunks(self.config.batch_size) {
            if self.config.drop_last && chunk.len() < self.config.batch_size {
                break;
            }
            batches.push(chunk.to_vec());
        }
        batches
    }
}

/// One pass of batches; owns a handle to the samples so the loader stays free
pub struct EpochBatches {
    images: Tensor,
    batches: std::vec::IntoIter<Vec<usize>>,
}

impl Iterator for EpochBatches {
    type Item = Result<Tensor>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.batches.next()?;
        Some(select_rows(&self.images, &indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.batches.size_hint()
    }
}

impl ExactSizeIterator for EpochBatches {}
