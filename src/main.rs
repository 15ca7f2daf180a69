use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gentrain::logging::init_logging;
use gentrain::models::{ConvGanFactory, DenseVaeFactory};
use gentrain::training::config::{ConfigFile, LoggingConfig};
use gentrain::training::{
    CycleGanModels, CycleGanTrainer, CycleGanTrainingConfig, DataLoader, DataLoaderConfig,
    ImageDataset, TrainingEvent, TrainingResult, VaeTrainer, VaeTrainingConfig,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "gentrain")]
#[command(about = "Train variational autoencoders and CycleGANs on candle", long_about = None)]
struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a VAE on a safetensors file with `train` and `valid` tensors
    Vae {
        /// Image tensors
        #[arg(short, long)]
        data: PathBuf,

        /// Configuration file (YAML or JSON); defaults otherwise
        #[arg(short, long, env = "GENTRAIN_CONFIG")]
        config: Option<PathBuf>,

        /// Tensor holding the training images
        #[arg(long, default_value = "train")]
        train_key: String,

        /// Tensor holding the validation images
        #[arg(long, default_value = "valid")]
        valid_key: String,
    },

    /// Train a CycleGAN on a safetensors file with `a` and `b` tensors
    Cyclegan {
        /// Image tensors, scaled to [-1, 1]
        #[arg(short, long)]
        data: PathBuf,

        /// Configuration file (YAML or JSON); defaults otherwise
        #[arg(short, long, env = "GENTRAIN_CONFIG")]
        config: Option<PathBuf>,

        /// Tensor holding domain A
        #[arg(long, default_value = "a")]
        a_key: String,

        /// Tensor holding domain B
        #[arg(long, default_value = "b")]
        b_key: String,
    },

    /// Validate a configuration file, or write the defaults to it
    Config {
        /// Configuration file
        #[arg(short, long)]
        file: PathBuf,

        /// Which trainer the file configures
        #[arg(short, long, value_enum, default_value_t = ConfigKind::Vae)]
        kind: ConfigKind,

        /// Write the default configuration instead of validating
        #[arg(long)]
        write_default: bool,
    },

    /// Show system information
    Info,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigKind {
    Vae,
    Cyclegan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Vae {
            data,
            config,
            train_key,
            valid_key,
        } => {
            let config = VaeTrainingConfig::load(config.as_deref())
                .context("Failed to load VAE configuration")?;
            init_logging(&config.logging, cli.verbose, cli.quiet)?;
            train_vae(config, data, train_key, valid_key).await?;
        }

        Commands::Cyclegan {
            data,
            config,
            a_key,
            b_key,
        } => {
            let config = CycleGanTrainingConfig::load(config.as_deref())
                .context("Failed to load CycleGAN configuration")?;
            init_logging(&config.logging, cli.verbose, cli.quiet)?;
            train_cyclegan(config, data, a_key, b_key).await?;
        }

        Commands::Config {
            file,
            kind,
            write_default,
        } => {
            init_logging(&LoggingConfig::default(), cli.verbose, cli.quiet)?;
            if write_default {
                write_default_config(&file, kind)?;
            } else {
                validate_config(&file, kind)?;
            }
        }

        Commands::Info => {
            show_system_info();
        }
    }

    Ok(())
}

/// Log trainer events until the sender is dropped
fn spawn_event_monitor() -> (mpsc::UnboundedSender<TrainingEvent>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                TrainingEvent::TrainingStarted { trainer, epochs } => {
                    info!("Started {} training for {} epochs", trainer, epochs)
                }
                TrainingEvent::CheckpointSaved { path } => info!("Checkpoint: {}", path.display()),
                TrainingEvent::LearningRateChanged { lr } => info!("Learning rate now {}", lr),
                TrainingEvent::SamplesRendered { paths } => debug!("Rendered {:?}", paths),
                TrainingEvent::Error { error } => error!("Training failed: {}", error),
                _ => {}
            }
        }
    });
    (tx, handle)
}

fn summarize(result: &TrainingResult) {
    info!(
        "Finished {} epochs, {} steps in {:.1}s",
        result.final_state.epoch,
        result.total_steps,
        result.training_duration.as_secs_f64()
    );
    if let Some(path) = &result.best_checkpoint_path {
        info!("Best checkpoint: {}", path.display());
    }
}

async fn train_vae(config: VaeTrainingConfig, data: PathBuf, train_key: String, valid_key: String) -> Result<()> {
    info!("Starting VAE training");
    let device = config.runtime.device().context("Failed to open device")?;
    let train = ImageDataset::from_safetensors(&data, &train_key, &device)
        .context("Failed to load training images")?;
    let valid = ImageDataset::from_safetensors(&data, &valid_key, &device)
        .context("Failed to load validation images")?;
    let input_shape = train.sample_shape().to_vec();

    let (tx, monitor) = spawn_event_monitor();
    let result = tokio::task::spawn_blocking(move || -> Result<TrainingResult> {
        let factory = DenseVaeFactory {
            hidden_dim: config.model.hidden_dim,
        };
        let loader_config = DataLoaderConfig::from(&config.training);
        let mut trainer = VaeTrainer::new(config, &factory, &input_shape, device)
            .context("Failed to build VAE trainer")?
            .with_event_monitoring(tx);
        let mut train = DataLoader::new(train, loader_config.clone())?;
        let mut valid = DataLoader::new(
            valid,
            DataLoaderConfig {
                shuffle: false,
                ..loader_config
            },
        )?;
        Ok(trainer.train(&mut train, &mut valid)?)
    })
    .await
    .context("Training task panicked")??;

    monitor.await.context("Event monitor panicked")?;
    summarize(&result);
    Ok(())
}

async fn train_cyclegan(config: CycleGanTrainingConfig, data: PathBuf, a_key: String, b_key: String) -> Result<()> {
    info!("Starting CycleGAN training");
    let device = config.runtime.device().context("Failed to open device")?;
    let domain_a = ImageDataset::from_safetensors(&data, &a_key, &device)
        .context("Failed to load domain A images")?;
    let domain_b = ImageDataset::from_safetensors(&data, &b_key, &device)
        .context("Failed to load domain B images")?;
    if domain_a.sample_shape() != domain_b.sample_shape() {
        anyhow::bail!(
            "domain shapes differ: {:?} vs {:?}",
            domain_a.sample_shape(),
            domain_b.sample_shape()
        );
    }
    let input_shape = domain_a.sample_shape().to_vec();

    let (tx, monitor) = spawn_event_monitor();
    let result = tokio::task::spawn_blocking(move || -> Result<TrainingResult> {
        let factory = ConvGanFactory {
            filters: config.model.filters,
        };
        let models = CycleGanModels::build(&factory, &input_shape, &device)
            .context("Failed to build CycleGAN models")?;
        let (a_config, b_config) = DataLoaderConfig::domain_pair(&config.training);
        let output_dir = config.output_dir.clone();

        let mut trainer = CycleGanTrainer::new(config, models, device)
            .context("Failed to build CycleGAN trainer")?
            .with_event_monitoring(tx);
        let mut a = DataLoader::new(domain_a, a_config)?;
        let mut b = DataLoader::new(domain_b, b_config)?;
        let result = trainer.train(&mut a, &mut b)?;
        trainer
            .save_models(&output_dir)
            .context("Failed to save models")?;
        Ok(result)
    })
    .await
    .context("Training task panicked")??;

    monitor.await.context("Event monitor panicked")?;
    summarize(&result);
    Ok(())
}

fn validate_config(path: &Path, kind: ConfigKind) -> Result<()> {
    info!("Validating configuration file: {}", path.display());
    match kind {
        ConfigKind::Vae => {
            let config = VaeTrainingConfig::from_file(path).context("Failed to load configuration file")?;
            config.validate().context("Invalid VAE configuration")?;
            info!("Configuration is valid");
            info!("  - Latent dim: {}", config.model.latent_dim);
            info!("  - Epochs: {}, batch size: {}", config.training.num_epochs, config.training.batch_size);
            info!("  - Save path: {}", config.checkpointing.save_path.display());
        }
        ConfigKind::Cyclegan => {
            let config =
                CycleGanTrainingConfig::from_file(path).context("Failed to load configuration file")?;
            config.validate().context("Invalid CycleGAN configuration")?;
            info!("Configuration is valid");
            info!("  - Variant: {:?}", config.variant);
            info!("  - Epochs: {}, batch size: {}", config.training.num_epochs, config.training.batch_size);
            info!("  - Output dir: {}", config.output_dir.display());
        }
    }
    Ok(())
}

fn write_default_config(path: &Path, kind: ConfigKind) -> Result<()> {
    match kind {
        ConfigKind::Vae => VaeTrainingConfig::default().to_file(path),
        ConfigKind::Cyclegan => CycleGanTrainingConfig::default().to_file(path),
    }
    .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn show_system_info() {
    println!("gentrain - generative model training on candle");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Trainers:");
    println!("  vae       dense encoder/decoder, BCE + KL, reduce-on-plateau, checkpoints");
    println!("  cyclegan  two generators, two patch discriminators, cycle and identity losses");
    println!();
    println!("Hardware support:");

    #[cfg(feature = "cuda")]
    println!("  CUDA: enabled");
    #[cfg(not(feature = "cuda"))]
    println!("  CUDA: not compiled in (enable the `cuda` feature)");

    #[cfg(feature = "metal")]
    println!("  Metal: enabled");
    #[cfg(not(feature = "metal"))]
    println!("  Metal: not compiled in (enable the `metal` feature)");

    println!();
    println!("Environment overrides use the GENTRAIN__ prefix, e.g. GENTRAIN__TRAINING__NUM_EPOCHS=20");
}
