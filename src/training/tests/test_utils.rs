//! Common utilities for testing the training pipeline

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use candle_core::{DType, Device, Tensor};

use crate::error::Result;
use crate::training::config::{
    CheckpointingConfig, CycleGanTrainingConfig, CycleGanVariant, OptimizerConfig, SamplingConfig,
    TrainingParams, VaeModelConfig, VaeTrainingConfig,
};
use crate::training::data::{DataLoader, DataLoaderConfig, ImageDataset};
use crate::training::visualization::SampleRenderer;

/// Create a test device (CPU for CI compatibility)
pub fn create_test_device() -> Device {
    Device::Cpu
}

/// Small VAE run writing into `dir`
pub fn create_test_vae_config(dir: &Path, num_epochs: usize) -> VaeTrainingConfig {
    VaeTrainingConfig {
        model: VaeModelConfig {
            latent_dim: 2,
            hidden_dim: 16,
        },
        optimizer: OptimizerConfig {
            learning_rate: 1e-3,
            ..Default::default()
        },
        training: TrainingParams {
            num_epochs,
            batch_size: 4,
            shuffle: true,
            seed: 7,
        },
        checkpointing: CheckpointingConfig {
            save_path: dir.to_path_buf(),
            restore_checkpoint: true,
        },
        sampling: SamplingConfig {
            sample_count: 4,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Small CycleGAN run on 16x16 images writing into `dir`
pub fn create_test_cyclegan_config(dir: &Path, num_epochs: usize) -> CycleGanTrainingConfig {
    let mut config = CycleGanTrainingConfig {
        variant: CycleGanVariant::Identity {
            patch_shape: vec![1, 1, 1],
        },
        training: TrainingParams {
            num_epochs,
            batch_size: 2,
            shuffle: false,
            seed: 7,
        },
        sampling: SamplingConfig {
            sample_count: 2,
            sample_interval: 1,
            results_dir: dir.join("results"),
            invert: false,
        },
        output_dir: dir.join("models"),
        ..Default::default()
    };
    config.model.filters = 2;
    config
}

/// `n` random images of shape `(channels, size, size)` in `[0, 1]`
pub fn create_image_dataset(n: usize, channels: usize, size: usize) -> Result<ImageDataset> {
    let images = Tensor::rand(0f32, 1f32, (n, channels, size, size), &create_test_device())?;
    ImageDataset::new(images)
}

/// Loader without shuffling
pub fn sequential_loader(dataset: ImageDataset, batch_size: usize) -> Result<DataLoader> {
    DataLoader::new(
        dataset,
        DataLoaderConfig {
            batch_size,
            shuffle: false,
            ..Default::default()
        },
    )
}

/// Assert two tensors are element-wise within `tolerance`
pub fn assert_tensor_close(a: &Tensor, b: &Tensor, tolerance: f32) {
    assert_eq!(a.dims(), b.dims(), "tensor shapes differ");
    let a: Vec<f32> = a.to_dtype(DType::F32).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    let b: Vec<f32> = b.to_dtype(DType::F32).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!((x - y).abs() <= tolerance, "element {i}: {x} vs {y}");
    }
}

/// Renderer that records what it was asked to draw instead of writing files
#[derive(Debug, Clone, Default)]
pub struct RenderCounter {
    calls: Arc<Mutex<Vec<(PathBuf, Vec<usize>, usize)>>>,
}

impl RenderCounter {
    /// Paths rendered so far, in order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().iter().map(|(p, _, _)| p.clone()).collect()
    }

    /// Image batch shapes and column counts, in order
    pub fn grids(&self) -> Vec<(Vec<usize>, usize)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, dims, columns)| (dims.clone(), *columns))
            .collect()
    }
}

impl SampleRenderer for RenderCounter {
    fn render(&self, images: &Tensor, columns: usize, path: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_path_buf(), images.dims().to_vec(), columns));
        Ok(())
    }
}
