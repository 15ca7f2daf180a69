//! Checkpoint metadata and the directory index

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::training::optimizers::SchedulerStateDict;

/// Sidecar written next to every snapshot as `ckp-<n>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Global training step at save time
    pub step: u64,

    /// Epoch the snapshot was taken after
    pub epoch: usize,

    /// Validation loss that triggered the save
    pub valid_loss: f64,

    /// Learning rate in effect
    pub learning_rate: f64,

    /// Save time
    pub timestamp: DateTime<Utc>,

    /// Names of the models whose parameters the snapshot holds
    pub models: Vec<String>,

    /// Scheduler state at save time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_state: Option<SchedulerStateDict>,
}

impl CheckpointMetadata {
    /// Metadata stamped with the current time
    pub fn new(step: u64, epoch: usize, valid_loss: f64, learning_rate: f64) -> Self {
        Self {
            step,
            epoch,
            valid_loss,
            learning_rate,
            timestamp: Utc::now(),
            models: Vec::new(),
            scheduler_state: None,
        }
    }

    /// Attach scheduler state
    pub fn with_scheduler_state(mut self, state: SchedulerStateDict) -> Self {
        self.scheduler_state = Some(state);
        self
    }
}

/// Contents of `checkpoint.json`: which snapshot is the latest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointIndex {
    /// File name of the latest snapshot
    pub latest: Option<String>,

    /// Every snapshot written, oldest first
    pub all: Vec<String>,

    /// Sequence number of the last snapshot
    pub save_counter: usize,
}
