//! Image data for training
//!
//! An [`ImageDataset`] is a finite tensor of samples with a leading batch
//! dimension. A [`DataLoader`] turns it into a restartable, optionally shuffled
//! sequence of batches, one pass per epoch.

pub mod datasets;
pub mod loaders;

pub use datasets::ImageDataset;
pub use loaders::{DataLoader, DataLoaderConfig, EpochBatches};
