//! Concrete trainers
//!
//! - [`vae`]: encoder/decoder training with plateau control and checkpoints
//! - [`pipeline`]: the composite CycleGAN graph
//! - [`cyclegan`]: alternating discriminator and generator updates

pub mod cyclegan;
pub mod pipeline;
pub mod vae;

pub use cyclegan::{CycleGanTrainer, DiscriminatorLosses, StepLosses};
pub use pipeline::{CycleGanModels, CycleGanOutputs, CycleGanPipeline, GeneratorLosses};
pub use vae::{EpochSummary, VaeTrainer};
