//! Persistent epoch logs

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::TrainingHistory;
use crate::error::Result;

/// One VAE epoch as it is logged
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRow {
    /// Epoch index
    pub epoch: usize,
    /// Mean training loss
    pub loss: f64,
    /// Mean validation loss
    pub v_loss: f64,
    /// Best validation loss so far
    pub best_loss: f64,
    /// Learning rate in effect during the epoch
    pub l_rate: f64,
}

/// Appends headerless `index,epoch,loss,v_loss,best_loss,l_rate` rows
///
/// Each row is written as its own single-row frame, so the leading index
/// column is always 0. The file is opened in append mode for every row and is
/// never rewritten.
#[derive(Debug, Clone)]
pub struct CsvEpochLogger {
    path: PathBuf,
}

impl CsvEpochLogger {
    /// Log to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row
    pub fn append(&self, row: &EpochRow) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(
            OpenOptions::new().create(true).append(true).open(&self.path)?,
        );
        writer.write_record([
            "0".to_string(),
            row.epoch.to_string(),
            row.loss.to_string(),
            row.v_loss.to_string(),
            row.best_loss.to_string(),
            row.l_rate.to_string(),
        ])?;
        writer.flush()?;
        debug!("Appended epoch {} to {}", row.epoch, self.path.display());
        Ok(())
    }
}

/// Writes the full history as JSON at the end of a run
#[derive(Debug, Clone)]
pub struct JsonHistoryExporter {
    output_dir: PathBuf,
}

impl JsonHistoryExporter {
    /// File name of the export
    pub const FILE_NAME: &'static str = "history.json";

    /// Export into `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write `history` and return the file path
    pub fn export(&self, history: &TrainingHistory) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(Self::FILE_NAME);
        history.save_json(&path)?;
        Ok(path)
    }
}
