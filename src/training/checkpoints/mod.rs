//! Best-only parameter checkpointing
//!
//! A checkpoint directory holds numbered snapshots `ckp-<n>.safetensors`, each
//! with a `ckp-<n>.json` metadata sidecar, and an index file `checkpoint.json`
//! naming the latest one. Parameters are keyed `<model>.<param>`; the global
//! step is stored alongside them under [`STEP_KEY`].

pub mod metadata;

pub use metadata::{CheckpointIndex, CheckpointMetadata};

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::models::ParameterSet;

/// Index file naming the latest snapshot
pub const INDEX_FILE: &str = "checkpoint.json";

/// Snapshot file prefix
pub const CHECKPOINT_PREFIX: &str = "ckp";

/// Tensor key of the step counter
pub const STEP_KEY: &str = "__step__";

/// A snapshot on disk together with its metadata
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    /// Path of the parameter file
    pub path: PathBuf,
    /// Step read back from the snapshot
    pub step: u64,
    /// Sidecar metadata, if it was found
    pub metadata: Option<CheckpointMetadata>,
}

/// Writes and restores snapshots in one directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Manage `dir`; it is created on the first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the index; a missing directory or index yields an empty one
    pub fn index(&self) -> Result<CheckpointIndex> {
        let path = self.dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(CheckpointIndex::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Path of the latest snapshot, if any
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.index()?.latest.map(|name| self.dir.join(name)))
    }

    /// Write a new snapshot of `models` and make it the latest
    #[instrument(skip(self, models, metadata), fields(dir = %self.dir.display()))]
    pub fn save(&self, models: &[&dyn ParameterSet], mut metadata: CheckpointMetadata) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let mut index = self.index()?;
        let number = index.save_counter + 1;
        let name = format!("{CHECKPOINT_PREFIX}-{number}.safetensors");
        let path = self.dir.join(&name);

        let mut tensors = std::collections::HashMap::new();
        for model in models {
            tensors.extend(model.named_tensors()?);
        }
        let step = i64::try_from(metadata.step)
            .map_err(|_| Error::checkpoint(format!("step {} does not fit a checkpoint", metadata.step)))?;
        tensors.insert(STEP_KEY.to_string(), Tensor::new(&[step], &Device::Cpu)?);
        candle_core::safetensors::save(&tensors, &path)?;

        metadata.models = models.iter().map(|m| m.set_name().to_string()).collect();
        std::fs::write(
            path.with_extension("json"),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        index.save_counter = number;
        index.latest = Some(name.clone());
        index.all.push(name);
        std::fs::write(self.dir.join(INDEX_FILE), serde_json::to_string_pretty(&index)?)?;

        info!("Saved checkpoint {} (step {}, valid_loss {:.6})", path.display(), metadata.step, metadata.valid_loss);
        Ok(path)
    }

    /// Load a snapshot into `models`
    pub fn restore(&self, path: &Path, models: &[&dyn ParameterSet], device: &Device) -> Result<CheckpointInfo> {
        let tensors = candle_core::safetensors::load(path, device)?;
        for model in models {
            model.load_named_tensors(&tensors)?;
        }
        let step = match tensors.get(STEP_KEY) {
            Some(t) => t.to_dtype(DType::I64)?.to_vec1::<i64>()?.first().copied().unwrap_or(0),
            None => return Err(Error::checkpoint(format!("{} has no step counter", path.display()))),
        };
        let step = u64::try_from(step)
            .map_err(|_| Error::checkpoint(format!("negative step {step} in {}", path.display())))?;

        let metadata_path = path.with_extension("json");
        let metadata = if metadata_path.exists() {
            Some(serde_json::from_str(&std::fs::read_to_string(&metadata_path)?)?)
        } else {
            None
        };

        debug!("Restored {} models from {}", models.len(), path.display());
        Ok(CheckpointInfo {
            path: path.to_path_buf(),
            step,
            metadata,
        })
    }

    /// Restore the latest snapshot, if the directory has one
    pub fn restore_latest(&self, models: &[&dyn ParameterSet], device: &Device) -> Result<Option<CheckpointInfo>> {
        match self.latest()? {
            Some(path) => {
                let info = self.restore(&path, models, device)?;
                info!("Restored checkpoint {} at step {}", info.path.display(), info.step);
                Ok(Some(info))
            }
            None => {
                debug!("No checkpoint found in {}", self.dir.display());
                Ok(None)
            }
        }
    }
}
