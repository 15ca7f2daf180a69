//! Training infrastructure for the VAE and CycleGAN harnesses
//!
//! # Main Components
//!
//! - **Configuration**: serde configs with file and environment layering
//! - **Trainers**: [`VaeTrainer`] and [`CycleGanTrainer`]
//! - **Data**: in-memory image datasets and shuffling batch loaders
//! - **Checkpoints**: safetensors snapshots with a JSON index
//! - **Metrics**: running means, per-epoch history, CSV and JSON exporters
//! - **Optimizers**: Adam, AdamW and SGD with reduce-on-plateau control
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use gentrain::models::DenseVaeFactory;
//! use gentrain::training::{DataLoader, DataLoaderConfig, ImageDataset, VaeTrainer, VaeTrainingConfig};
//!
//! let config = VaeTrainingConfig::default();
//! let device = config.runtime.device()?;
//! let train = ImageDataset::from_safetensors("mnist.safetensors", "train", &device)?;
//! let valid = ImageDataset::from_safetensors("mnist.safetensors", "valid", &device)?;
//!
//! let shape = train.sample_shape().to_vec();
//! let mut trainer = VaeTrainer::new(config.clone(), &DenseVaeFactory::default(), &shape, device)?;
//! let mut train = DataLoader::new(train, DataLoaderConfig::from(&config.training))?;
//! let mut valid = DataLoader::new(valid, DataLoaderConfig::from(&config.training))?;
//! let result = trainer.train(&mut train, &mut valid)?;
//! ```

pub mod checkpoints;
pub mod config;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod optimizers;
pub mod trainer;
pub mod trainers;
pub mod visualization;

// Tests module
#[cfg(test)]
pub mod tests;

// Configuration re-exports
pub use config::{
    CheckpointingConfig, ConfigFile, CycleGanTrainingConfig, CycleGanVariant, DeviceType,
    GanModelConfig, LogLevel, LoggingConfig, LossWeights, OptimizerConfig, OptimizerType,
    PlateauConfig, RuntimeConfig, SamplingConfig, TrainingParams, VaeModelConfig,
    VaeTrainingConfig,
};

// Trainer re-exports
pub use trainer::{EventSink, TrainingEvent, TrainingResult, TrainingState, TrainingStatus};
pub use trainers::{CycleGanModels, CycleGanPipeline, CycleGanTrainer, VaeTrainer};

// Data re-exports
pub use data::{DataLoader, DataLoaderConfig, EpochBatches, ImageDataset};

// Checkpoint re-exports
pub use checkpoints::{CheckpointIndex, CheckpointInfo, CheckpointManager, CheckpointMetadata};

// Metrics re-exports
pub use metrics::{CsvEpochLogger, EpochRow, JsonHistoryExporter, MeanMetric, TrainingHistory};

// Optimizer re-exports
pub use optimizers::{create_optimizer, ModelOptimizer, PlateauState, ReduceOnPlateau, UpdateMode};

// Visualization re-exports
pub use visualization::{ImageGridRenderer, SampleRenderer, ValueRange};
