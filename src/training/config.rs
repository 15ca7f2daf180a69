//! Training configuration for the VAE and CycleGAN harnesses
//!
//! Configurations are plain serde structs with sensible defaults. They can be
//! read from YAML or JSON files and layered with `GENTRAIN__...` environment
//! overrides, and must pass `validate()` before a trainer is built.

use std::path::{Path, PathBuf};

use candle_core::Device;
use config::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix for environment overrides, e.g. `GENTRAIN__TRAINING__NUM_EPOCHS=20`
pub const ENV_PREFIX: &str = "GENTRAIN";

/// VAE training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaeTrainingConfig {
    /// Reference model settings
    pub model: VaeModelConfig,

    /// Optimization configuration
    pub optimizer: OptimizerConfig,

    /// Training parameters
    pub training: TrainingParams,

    /// Learning-rate plateau control
    pub plateau: PlateauConfig,

    /// Checkpointing configuration
    pub checkpointing: CheckpointingConfig,

    /// Reconstruction sampling
    pub sampling: SamplingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Runtime configuration
    pub runtime: RuntimeConfig,
}

/// CycleGAN training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleGanTrainingConfig {
    /// Loss weighting and patch-shape variant
    pub variant: CycleGanVariant,

    /// Per-output loss weights
    pub loss_weights: LossWeights,

    /// Reference model settings
    pub model: GanModelConfig,

    /// Optimization configuration, shared by all four models
    pub optimizer: OptimizerConfig,

    /// Training parameters
    pub training: TrainingParams,

    /// Sample translation rendering
    pub sampling: SamplingConfig,

    /// Where trained models are written
    pub output_dir: PathBuf,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Runtime configuration
    pub runtime: RuntimeConfig,
}

/// Reference VAE architecture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaeModelConfig {
    /// Latent dimensionality
    pub latent_dim: usize,

    /// Hidden layer width
    pub hidden_dim: usize,
}

/// Reference GAN architecture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GanModelConfig {
    /// Base filter count of generators and discriminators
    pub filters: usize,
}

/// How the composite generator loss is weighted and how patch labels are shaped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleGanVariant {
    /// Identity outputs weighted by the cycle weight; patch shape derived from
    /// the discriminator input resolution
    Classic,
    /// Dedicated identity weight and an explicit patch shape
    Identity {
        /// Per-sample discriminator output shape
        patch_shape: Vec<usize>,
    },
}

/// Loss weights of the composite generator objective
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    /// Adversarial (validity) weight
    pub validation: f64,

    /// Cycle reconstruction weight
    pub reconstruction: f64,

    /// Identity mapping weight, only used by the identity variant
    pub identity: f64,
}

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Optimizer type
    pub optimizer_type: OptimizerType,

    /// Initial learning rate
    pub learning_rate: f64,

    /// Beta1 parameter for Adam-based optimizers
    pub beta1: f64,

    /// Beta2 parameter for Adam-based optimizers
    pub beta2: f64,

    /// Epsilon for numerical stability
    pub epsilon: f64,

    /// Weight decay coefficient (AdamW only)
    pub weight_decay: f64,
}

/// Optimizer types
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerType {
    /// Adam, i.e. AdamW without weight decay
    Adam,
    /// AdamW with decoupled weight decay
    AdamW,
    /// Plain stochastic gradient descent
    Sgd,
}

/// Core training parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Number of training epochs
    pub num_epochs: usize,

    /// Batch size
    pub batch_size: usize,

    /// Shuffle training batches every epoch
    pub shuffle: bool,

    /// Seed for shuffling
    pub seed: u64,
}

/// Reduce-on-plateau settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    /// Non-improving epochs before the rate is decayed
    pub patience: usize,

    /// Multiplicative decay factor
    pub factor: f64,

    /// Rate floor
    pub min_lr: f64,
}

/// Checkpointing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointingConfig {
    /// Run directory; checkpoints go to `<save_path>/ckp`
    pub save_path: PathBuf,

    /// Restore the latest checkpoint on construction
    pub restore_checkpoint: bool,
}

/// Sample rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Number of images per rendered grid
    pub sample_count: usize,

    /// Render every `sample_interval` epochs (CycleGAN)
    pub sample_interval: usize,

    /// Directory for rendered grids (CycleGAN; the VAE writes to its save path)
    pub results_dir: PathBuf,

    /// Render dark-on-light
    pub invert: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-step detail
    Trace,
    /// Allocation and batching notes
    Debug,
    /// Epoch summaries
    Info,
    /// Recoverable problems only
    Warn,
    /// Failures only
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Device type
    pub device_type: DeviceType,

    /// Device ordinal for accelerators
    pub device_id: usize,
}

/// Device types
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Host CPU
    Cpu,
    /// CUDA GPU, needs the `cuda` feature
    Cuda,
    /// Apple GPU, needs the `metal` feature
    Metal,
}

impl RuntimeConfig {
    /// Open the configured device
    pub fn device(&self) -> Result<Device> {
        Ok(match self.device_type {
            DeviceType::Cpu => Device::Cpu,
            DeviceType::Cuda => Device::new_cuda(self.device_id)?,
            DeviceType::Metal => Device::new_metal(self.device_id)?,
        })
    }
}

/// File and environment loading shared by both training configurations
pub trait ConfigFile: Serialize + DeserializeOwned + Default {
    /// Load from a YAML or JSON file, chosen by extension
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = if is_json(path) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(config)
    }

    /// Save to a YAML or JSON file, chosen by extension
    fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Defaults, then an optional file, then `GENTRAIN__...` environment overrides
    fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = serde_json::to_string(&Self::default())?;
        let mut builder = Config::builder().add_source(File::from_str(&defaults, FileFormat::Json));
        if let Some(path) = path {
            let format = if is_json(path) { FileFormat::Json } else { FileFormat::Yaml };
            let content = std::fs::read_to_string(path)?;
            builder = builder.add_source(File::from_str(&content, format));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("json")
}

impl ConfigFile for VaeTrainingConfig {}
impl ConfigFile for CycleGanTrainingConfig {}

impl VaeTrainingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.model.latent_dim == 0 {
            return Err(Error::config("Latent dimension must be greater than 0"));
        }
        if self.model.hidden_dim == 0 {
            return Err(Error::config("Hidden dimension must be greater than 0"));
        }
        if self.sampling.sample_count == 0 {
            return Err(Error::config("Sample count must be greater than 0"));
        }
        self.training.validate()?;
        self.optimizer.validate()?;
        self.plateau.validate()
    }
}

impl CycleGanTrainingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let CycleGanVariant::Identity { patch_shape } = &self.variant {
            if patch_shape.is_empty() || patch_shape.contains(&0) {
                return Err(Error::config("Patch shape must be non-empty with positive dims"));
            }
        }
        let w = &self.loss_weights;
        if [w.validation, w.reconstruction, w.identity].iter().any(|&x| x < 0.0) {
            return Err(Error::config("Loss weights must be non-negative"));
        }
        if self.model.filters == 0 {
            return Err(Error::config("Filter count must be greater than 0"));
        }
        if self.sampling.sample_interval == 0 {
            return Err(Error::config("Sample interval must be greater than 0"));
        }
        if self.sampling.sample_count == 0 {
            return Err(Error::config("Sample count must be greater than 0"));
        }
        self.training.validate()?;
        self.optimizer.validate()
    }
}

impl TrainingParams {
    fn validate(&self) -> Result<()> {
        if self.num_epochs == 0 {
            return Err(Error::config("Number of epochs must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("Batch size must be greater than 0"));
        }
        Ok(())
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<()> {
        if self.learning_rate <= 0.0 {
            return Err(Error::config("Learning rate must be positive"));
        }
        if self.weight_decay < 0.0 {
            return Err(Error::config("Weight decay must be non-negative"));
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err(Error::config("Betas must be in [0.0, 1.0)"));
        }
        Ok(())
    }
}

impl PlateauConfig {
    fn validate(&self) -> Result<()> {
        if self.patience == 0 {
            return Err(Error::config("Plateau patience must be greater than 0"));
        }
        if self.factor <= 0.0 || self.factor >= 1.0 {
            return Err(Error::config("Plateau factor must be in (0.0, 1.0)"));
        }
        if self.min_lr < 0.0 {
            return Err(Error::config("Minimum learning rate must be non-negative"));
        }
        Ok(())
    }
}

impl Default for VaeTrainingConfig {
    fn default() -> Self {
        Self {
            model: VaeModelConfig::default(),
            optimizer: OptimizerConfig::default(),
            training: TrainingParams::default(),
            plateau: PlateauConfig::default(),
            checkpointing: CheckpointingConfig::default(),
            sampling: SamplingConfig {
                sample_count: 100,
                ..SamplingConfig::default()
            },
            logging: LoggingConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for CycleGanTrainingConfig {
    fn default() -> Self {
        Self {
            variant: CycleGanVariant::default(),
            loss_weights: LossWeights::default(),
            model: GanModelConfig::default(),
            optimizer: OptimizerConfig {
                learning_rate: 2e-4,
                beta1: 0.5,
                ..OptimizerConfig::default()
            },
            training: TrainingParams {
                batch_size: 1,
                ..TrainingParams::default()
            },
            sampling: SamplingConfig {
                sample_count: 25,
                ..SamplingConfig::default()
            },
            output_dir: PathBuf::from("./models"),
            logging: LoggingConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for VaeModelConfig {
    fn default() -> Self {
        Self {
            latent_dim: 100,
            hidden_dim: 512,
        }
    }
}

impl Default for GanModelConfig {
    fn default() -> Self {
        Self { filters: 32 }
    }
}

impl Default for CycleGanVariant {
    fn default() -> Self {
        CycleGanVariant::Identity {
            patch_shape: vec![1, 4, 4],
        }
    }
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            validation: 1.0,
            reconstruction: 10.0,
            identity: 9.0,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optimizer_type: OptimizerType::Adam,
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            weight_decay: 0.0,
        }
    }
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            num_epochs: 100,
            batch_size: 32,
            shuffle: true,
            seed: 42,
        }
    }
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            patience: 5,
            factor: 0.2,
            min_lr: 1e-5,
        }
    }
}

impl Default for CheckpointingConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("./runs/vae"),
            restore_checkpoint: true,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_count: 100,
            sample_interval: 10,
            results_dir: PathBuf::from("./results"),
            invert: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Cpu,
            device_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_configs_validate() {
        assert!(VaeTrainingConfig::default().validate().is_ok());
        assert!(CycleGanTrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_cyclegan_defaults() {
        let config = CycleGanTrainingConfig::default();
        assert_eq!(config.optimizer.learning_rate, 2e-4);
        assert_eq!(config.optimizer.beta1, 0.5);
        assert_eq!(config.loss_weights.identity, 9.0);
    }

    #[test]
    fn test_config_file_operations() {
        let dir = TempDir::new().unwrap();
        let mut config = VaeTrainingConfig::default();
        config.training.num_epochs = 7;

        let json = dir.path().join("vae.json");
        config.to_file(&json).unwrap();
        let loaded = VaeTrainingConfig::from_file(&json).unwrap();
        assert_eq!(loaded.training.num_epochs, 7);

        let yaml = dir.path().join("vae.yaml");
        config.to_file(&yaml).unwrap();
        let loaded = VaeTrainingConfig::from_file(&yaml).unwrap();
        assert_eq!(loaded.training.num_epochs, 7);
    }

    #[test]
    fn test_variant_serialization() {
        let mut config = CycleGanTrainingConfig::default();
        config.variant = CycleGanVariant::Classic;
        let yaml = serde_yaml::to_string(&config).unwrap();
        let loaded: CycleGanTrainingConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(loaded.variant, CycleGanVariant::Classic);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.yaml");
        std::fs::write(&path, "training:\n  num_epochs: 3\n").unwrap();

        let loaded = VaeTrainingConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.training.num_epochs, 3);
        assert_eq!(loaded.training.batch_size, 32);
        assert_eq!(loaded.model.latent_dim, 100);
    }

    #[test]
    fn test_config_validation() {
        let mut config = VaeTrainingConfig::default();
        config.training.batch_size = 0;
        assert!(config.validate().is_err());

        config = VaeTrainingConfig::default();
        config.optimizer.learning_rate = -0.1;
        assert!(config.validate().is_err());

        config = VaeTrainingConfig::default();
        config.plateau.factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = CycleGanTrainingConfig::default();
        config.variant = CycleGanVariant::Identity { patch_shape: vec![] };
        assert!(config.validate().is_err());
    }
}
