//! Metrics for the training loops
//!
//! Per-batch scalars are accumulated in [`MeanMetric`]s; once per epoch the
//! results are appended to a [`TrainingHistory`] and optionally exported.

pub mod aggregators;
pub mod exporters;
pub mod tracker;

pub use aggregators::MeanMetric;
pub use exporters::{CsvEpochLogger, EpochRow, JsonHistoryExporter};
pub use tracker::TrainingHistory;

/// Metric names recorded by the VAE trainer
pub mod vae_metrics {
    /// Mean training loss
    pub const LOSS: &str = "loss";
    /// Mean validation loss
    pub const VALID_LOSS: &str = "v_loss";
    /// Best validation loss so far
    pub const BEST_LOSS: &str = "best_loss";
    /// Learning rate in effect during the epoch
    pub const LEARNING_RATE: &str = "l_rate";

    /// All of the above
    pub const ALL: [&str; 4] = [LOSS, VALID_LOSS, BEST_LOSS, LEARNING_RATE];
}

/// Metric names recorded by the CycleGAN trainer
pub mod cyclegan_metrics {
    /// Summed discriminator loss
    pub const D_LOSS: &str = "d_loss";
    /// Mean discriminator accuracy
    pub const D_ACCURACY: &str = "d_accuracy";
    /// Summed generator loss
    pub const G_LOSS: &str = "g_loss";
    /// Summed weighted adversarial component
    pub const VALIDITY_LOSS: &str = "validity_loss";
    /// Summed weighted cycle component
    pub const CYCLE_LOSS: &str = "cycle_loss";
    /// Summed weighted identity component
    pub const IDENTITY_LOSS: &str = "identity_loss";

    /// All of the above
    pub const ALL: [&str; 6] = [D_LOSS, D_ACCURACY, G_LOSS, VALIDITY_LOSS, CYCLE_LOSS, IDENTITY_LOSS];
}
