//! Reduce-on-plateau learning-rate control
//!
//! The decision itself is the pure function [`reduce_lr`]; [`ReduceOnPlateau`]
//! only carries its state from one epoch to the next.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::training::config::PlateauConfig;

/// One plateau decision.
///
/// If `current < best` the counter resets and the rate is kept. Otherwise the
/// counter grows; once it reaches `patience` the rate is multiplied by
/// `factor`, floored at `min_rate`, and the counter resets.
pub fn reduce_lr(
    best: f64,
    current: f64,
    counter: usize,
    rate: f64,
    patience: usize,
    factor: f64,
    min_rate: f64,
) -> (usize, f64) {
    if current < best {
        return (0, rate);
    }
    let counter = counter + 1;
    if counter >= patience {
        (0, (rate * factor).max(min_rate))
    } else {
        (counter, rate)
    }
}

/// Rate plus consecutive non-improving epochs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauState {
    /// Current learning rate
    pub learning_rate: f64,
    /// Consecutive epochs without improvement
    pub counter: usize,
}

/// Scheduler state dictionary for checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStateDict {
    /// Scheduler type
    pub scheduler_type: String,

    /// Epochs observed
    pub step_count: usize,

    /// Current learning rate
    pub current_lr: f64,

    /// Base learning rate
    pub base_lr: f64,

    /// Scheduler-specific state
    pub state: HashMap<String, f64>,

    /// Hyperparameters
    pub hyperparameters: HashMap<String, f64>,
}

/// Stateful wrapper around [`reduce_lr`]
#[derive(Debug, Clone)]
pub struct ReduceOnPlateau {
    base_lr: f64,
    config: PlateauConfig,
    state: PlateauState,
    step_count: usize,
}

impl ReduceOnPlateau {
    /// Start at `base_lr` with a zero counter
    pub fn new(base_lr: f64, config: PlateauConfig) -> Self {
        Self {
            base_lr,
            config,
            state: PlateauState {
                learning_rate: base_lr,
                counter: 0,
            },
            step_count: 0,
        }
    }

    /// Feed one epoch's validation loss against the best loss seen before it;
    /// returns the rate for the next epoch
    pub fn step(&mut self, best: f64, current: f64) -> f64 {
        let (counter, rate) = reduce_lr(
            best,
            current,
            self.state.counter,
            self.state.learning_rate,
            self.config.patience,
            self.config.factor,
            self.config.min_lr,
        );
        if rate < self.state.learning_rate {
            info!("Reducing learning rate to {}", rate);
        }
        self.state = PlateauState {
            learning_rate: rate,
            counter,
        };
        self.step_count += 1;
        rate
    }

    /// Current rate and counter
    pub fn state(&self) -> PlateauState {
        self.state
    }

    /// Snapshot for checkpoint metadata
    pub fn state_dict(&self) -> SchedulerStateDict {
        let mut state = HashMap::new();
        state.insert("counter".to_string(), self.state.counter as f64);

        let mut hyperparameters = HashMap::new();
        hyperparameters.insert("patience".to_string(), self.config.patience as f64);
        hyperparameters.insert("factor".to_string(), self.config.factor);
        hyperparameters.insert("min_lr".to_string(), self.config.min_lr);

        SchedulerStateDict {
            scheduler_type: "reduce_on_plateau".to_string(),
            step_count: self.step_count,
            current_lr: self.state.learning_rate,
            base_lr: self.base_lr,
            state,
            hyperparameters,
        }
    }
}
