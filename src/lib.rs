//! gentrain - training harnesses for generative image models on candle
//!
//! Two trainers share one stack of datasets, losses, optimizers, metrics and
//! checkpoints:
//!
//! - [`training::VaeTrainer`] fits an encoder/decoder pair with a
//!   reconstruction plus KL objective, decays the learning rate on plateau and
//!   keeps the best snapshot.
//! - [`training::CycleGanTrainer`] alternates discriminator and generator
//!   updates over two unpaired image domains.
//!
//! Reference architectures live in [`models`]; anything implementing
//! [`models::VaeFactory`] or producing [`models::ModelHandle`]s can be trained.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod error;
pub mod logging;
pub mod models;
pub mod training;

// Re-exports
pub use error::{Error, Result};
pub use models::{ConvGanFactory, DenseVaeFactory, ModelHandle, VaeFactory};
pub use training::{
    CycleGanTrainer, CycleGanTrainingConfig, DataLoader, DataLoaderConfig, ImageDataset,
    VaeTrainer, VaeTrainingConfig,
};
