//! State, events and results shared by both trainers
//!
//! Trainers run synchronously. Progress can be observed through an unbounded
//! channel of [`TrainingEvent`]s; sending never blocks and a dropped receiver
//! is ignored.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::training::metrics::TrainingHistory;

/// Training state tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    /// Epochs completed
    pub epoch: usize,

    /// Optimizer steps across all epochs
    pub global_step: u64,

    /// Best validation loss so far
    pub best_score: Option<f64>,

    /// Training start time
    pub start_time: DateTime<Utc>,

    /// Training status
    pub status: TrainingStatus,

    /// Current learning rate
    pub current_lr: f64,
}

impl TrainingState {
    /// Fresh state at `lr`
    pub fn new(lr: f64) -> Self {
        Self {
            epoch: 0,
            global_step: 0,
            best_score: None,
            start_time: Utc::now(),
            status: TrainingStatus::NotStarted,
            current_lr: lr,
        }
    }

    /// Share of `total_epochs` completed, in percent
    pub fn progress_percentage(&self, total_epochs: usize) -> f64 {
        if total_epochs == 0 {
            return 100.0;
        }
        self.epoch as f64 / total_epochs as f64 * 100.0
    }
}

/// Training status enumeration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TrainingStatus {
    /// Built but not trained yet
    NotStarted,
    /// Inside `train`
    Running,
    /// Every epoch finished
    Completed,
    /// Stopped by an error
    Failed {
        /// Rendered error
        error: String,
    },
}

/// Training events for monitoring
#[derive(Debug, Clone)]
pub enum TrainingEvent {
    /// `train` was entered
    TrainingStarted {
        /// `"vae"` or `"cyclegan"`
        trainer: &'static str,
        /// Configured epoch count
        epochs: usize,
    },
    /// An epoch is about to run
    EpochStarted {
        /// Epoch index
        epoch: usize,
    },
    /// One optimizer step finished
    StepCompleted {
        /// Global step after the update
        step: u64,
        /// Training loss of the step
        loss: f64,
    },
    /// An epoch finished and its metrics were recorded
    EpochCompleted {
        /// Epoch index
        epoch: usize,
        /// Values appended to the history
        metrics: BTreeMap<String, f64>,
    },
    /// The plateau schedule lowered the learning rate
    LearningRateChanged {
        /// New learning rate
        lr: f64,
    },
    /// A checkpoint was written
    CheckpointSaved {
        /// Checkpoint file
        path: PathBuf,
    },
    /// Sample grids were written
    SamplesRendered {
        /// Grid files
        paths: Vec<PathBuf>,
    },
    /// `train` returned successfully
    TrainingCompleted {
        /// Optimizer steps taken
        total_steps: u64,
    },
    /// `train` failed
    Error {
        /// Rendered error
        error: String,
    },
}

/// Training result information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    /// Per-epoch history
    pub history: TrainingHistory,

    /// Training state at completion
    pub final_state: TrainingState,

    /// Path to best model checkpoint
    pub best_checkpoint_path: Option<PathBuf>,

    /// Training duration
    pub training_duration: Duration,

    /// Total training steps
    pub total_steps: u64,
}

/// Optional event channel
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TrainingEvent>>,
}

impl EventSink {
    /// Send events to `tx`
    pub fn new(tx: mpsc::UnboundedSender<TrainingEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Forward an event if anyone listens
    pub fn send(&self, event: TrainingEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
