//! Running aggregates over batches

use serde::{Deserialize, Serialize};

/// Running mean of the values fed since the last reset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeanMetric {
    name: String,
    total: f64,
    count: usize,
}

impl MeanMetric {
    /// Create an empty metric
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total: 0.0,
            count: 0,
        }
    }

    /// Metric name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add one observation
    pub fn update(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    /// Mean of the observations, 0.0 when there were none
    pub fn result(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    /// Number of observations
    pub fn count(&self) -> usize {
        self.count
    }

    /// Forget all observations
    pub fn reset(&mut self) {
        self.total = 0.0;
        self.count = 0;
    }
}
