//! Per-epoch training history

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metric name -> one value per completed epoch
///
/// Append-only. Every call to [`TrainingHistory::record_epoch`] appends exactly
/// one value to every tracked metric, so all series always have equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingHistory {
    series: BTreeMap<String, Vec<f64>>,
}

impl TrainingHistory {
    /// Track the given metrics, all starting empty
    pub fn new(metrics: &[&str]) -> Self {
        Self {
            series: metrics.iter().map(|m| (m.to_string(), Vec::new())).collect(),
        }
    }

    /// Append one epoch; `values` must name each tracked metric exactly once
    pub fn record_epoch(&mut self, values: &[(&str, f64)]) -> Result<()> {
        if values.len() != self.series.len() {
            return Err(Error::internal(format!(
                "epoch record has {} values for {} tracked metrics",
                values.len(),
                self.series.len()
            )));
        }
        for (name, _) in values {
            if !self.series.contains_key(*name) {
                return Err(Error::internal(format!("metric {name} is not tracked")));
            }
        }
        for (name, value) in values {
            if let Some(series) = self.series.get_mut(*name) {
                series.push(*value);
            }
        }
        Ok(())
    }

    /// Values of one metric
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }

    /// Latest value of one metric
    pub fn last(&self, name: &str) -> Option<f64> {
        self.series.get(name).and_then(|s| s.last().copied())
    }

    /// Number of recorded epochs
    pub fn epochs(&self) -> usize {
        self.series.values().next().map_or(0, Vec::len)
    }

    /// Tracked metric names, sorted
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Write the history as a JSON object
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
