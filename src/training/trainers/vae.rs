//! Variational autoencoder trainer
//!
//! Each epoch runs every training batch through encoder and decoder with one
//! optimizer step per batch, then evaluates the validation batches without
//! updates. Afterwards the learning rate is adjusted on plateau, a grid of
//! reconstructions is rendered, the snapshot is kept if validation improved,
//! and one row is appended to `process.csv`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{Device, Tensor};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::models::{ParameterSet, VaeFactory, VaeModels};
use crate::training::checkpoints::{CheckpointManager, CheckpointMetadata};
use crate::training::config::VaeTrainingConfig;
use crate::training::data::DataLoader;
use crate::training::loss::{kl_loss, reconstruction_loss, scalar};
use crate::training::metrics::{
    vae_metrics, CsvEpochLogger, EpochRow, JsonHistoryExporter, MeanMetric, TrainingHistory,
};
use crate::training::optimizers::{create_optimizer, ModelOptimizer, ReduceOnPlateau, UpdateMode};
use crate::training::trainer::{
    EventSink, TrainingEvent, TrainingResult, TrainingState, TrainingStatus,
};
use crate::training::visualization::{ImageGridRenderer, SampleRenderer, ValueRange};

/// Checkpoint subdirectory of the save path
pub const CHECKPOINT_DIR: &str = "ckp";

/// Epoch log file in the save path
pub const PROCESS_LOG: &str = "process.csv";

/// Losses and rate of one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    /// Mean training loss
    pub train_loss: f64,
    /// Mean validation loss
    pub valid_loss: f64,
    /// Learning rate in effect during the epoch
    pub learning_rate: f64,
}

/// A checkpoint is written only for a strictly better validation loss
pub fn should_checkpoint(best_loss: f64, valid_loss: f64) -> bool {
    valid_loss < best_loss
}

/// Trainer for an encoder/decoder pair
pub struct VaeTrainer {
    config: VaeTrainingConfig,
    models: VaeModels,
    optimizer: ModelOptimizer,
    scheduler: ReduceOnPlateau,
    checkpoints: CheckpointManager,
    csv_logger: CsvEpochLogger,
    renderer: Box<dyn SampleRenderer + Send>,
    train_loss: MeanMetric,
    valid_loss: MeanMetric,
    best_loss: f64,
    best_checkpoint: Option<PathBuf>,
    history: TrainingHistory,
    state: TrainingState,
    device: Device,
    events: EventSink,
}

impl VaeTrainer {
    /// Build models for samples of `input_shape` and optionally restore the
    /// latest checkpoint from `<save_path>/ckp`
    pub fn new(
        config: VaeTrainingConfig,
        factory: &dyn VaeFactory,
        input_shape: &[usize],
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        let models = factory.build(input_shape, config.model.latent_dim, &device)?;

        let mut vars = models.encoder.trainable_vars();
        vars.extend(models.decoder.trainable_vars());
        let optimizer = create_optimizer(vars, &config.optimizer)?;
        let scheduler = ReduceOnPlateau::new(config.optimizer.learning_rate, config.plateau.clone());

        let save_path = config.checkpointing.save_path.clone();
        let checkpoints = CheckpointManager::new(save_path.join(CHECKPOINT_DIR));
        let csv_logger = CsvEpochLogger::new(save_path.join(PROCESS_LOG));
        let renderer = Box::new(ImageGridRenderer::new(ValueRange::UnitInterval, config.sampling.invert));

        let mut state = TrainingState::new(config.optimizer.learning_rate);
        if config.checkpointing.restore_checkpoint {
            let sets: [&dyn ParameterSet; 2] = [&models.encoder, &models.decoder];
            if let Some(restored) = checkpoints.restore_latest(&sets, &device)? {
                state.global_step = restored.step;
            }
        }

        info!(
            "VAE trainer ready: input {:?}, latent {}, {} parameters",
            input_shape,
            config.model.latent_dim,
            optimizer.parameter_count()
        );

        Ok(Self {
            config,
            models,
            optimizer,
            scheduler,
            checkpoints,
            csv_logger,
            renderer,
            train_loss: MeanMetric::new("train_loss"),
            valid_loss: MeanMetric::new("valid_loss"),
            best_loss: f64::INFINITY,
            best_checkpoint: None,
            history: TrainingHistory::new(&vae_metrics::ALL),
            state,
            device,
            events: EventSink::default(),
        })
    }

    /// Replace the reconstruction renderer
    pub fn with_renderer(mut self, renderer: Box<dyn SampleRenderer + Send>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Set up event monitoring
    pub fn with_event_monitoring(mut self, tx: tokio::sync::mpsc::UnboundedSender<TrainingEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    fn forward_loss(&self, batch: &Tensor) -> Result<Tensor> {
        let encoded = self.models.encoder.encode(batch)?;
        let reconstructed = self.models.decoder.forward(&encoded.z)?;
        let rec_loss = reconstruction_loss(batch, &reconstructed)?;
        let kl = kl_loss(&encoded.log_var, &encoded.mean)?;
        Ok((rec_loss + kl)?)
    }

    /// One optimizer step on a batch; returns the batch loss
    pub fn train_step(&mut self, batch: &Tensor) -> Result<f64> {
        let loss = self.forward_loss(batch)?;
        self.optimizer.backward_step(&loss, UpdateMode::Update)?;
        let value = scalar(&loss)?;
        self.train_loss.update(value);
        self.state.global_step += 1;
        self.events.send(TrainingEvent::StepCompleted {
            step: self.state.global_step,
            loss: value,
        });
        Ok(value)
    }

    /// Loss on a batch without touching parameters
    pub fn valid_step(&mut self, batch: &Tensor) -> Result<f64> {
        let loss = self.forward_loss(&batch.detach())?;
        let value = scalar(&loss)?;
        self.valid_loss.update(value);
        Ok(value)
    }

    /// All training batches, then all validation batches
    pub fn epoch(&mut self, train: &mut DataLoader, valid: &mut DataLoader) -> Result<EpochSummary> {
        for batch in train.epoch() {
            self.train_step(&batch?)?;
        }
        for batch in valid.epoch() {
            self.valid_step(&batch?)?;
        }
        Ok(EpochSummary {
            train_loss: self.train_loss.result(),
            valid_loss: self.valid_loss.result(),
            learning_rate: self.optimizer.learning_rate(),
        })
    }

    /// Decode the encoder's latent sample for `images`
    pub fn reconstruct(&self, images: &Tensor) -> Result<Tensor> {
        let encoded = self.models.encoder.encode(images)?;
        self.models.decoder.forward(&encoded.z)
    }

    /// Run the configured number of epochs
    #[instrument(skip_all, fields(epochs = self.config.training.num_epochs))]
    pub fn train(&mut self, train: &mut DataLoader, valid: &mut DataLoader) -> Result<TrainingResult> {
        let epochs = self.config.training.num_epochs;
        let started = Instant::now();
        self.state.status = TrainingStatus::Running;
        self.events.send(TrainingEvent::TrainingStarted { trainer: "vae", epochs });

        for epoch in 0..epochs {
            if let Err(e) = self.run_epoch(epoch, train, valid) {
                self.state.status = TrainingStatus::Failed { error: e.to_string() };
                self.events.send(TrainingEvent::Error { error: e.to_string() });
                return Err(e);
            }
        }

        JsonHistoryExporter::new(&self.config.checkpointing.save_path).export(&self.history)?;
        self.state.status = TrainingStatus::Completed;
        self.events.send(TrainingEvent::TrainingCompleted {
            total_steps: self.state.global_step,
        });
        info!("Training completed in {:?}", started.elapsed());

        Ok(TrainingResult {
            history: self.history.clone(),
            final_state: self.state.clone(),
            best_checkpoint_path: self.best_checkpoint.clone(),
            training_duration: started.elapsed(),
            total_steps: self.state.global_step,
        })
    }

    fn run_epoch(&mut self, epoch: usize, train: &mut DataLoader, valid: &mut DataLoader) -> Result<()> {
        self.events.send(TrainingEvent::EpochStarted { epoch });
        let summary = self.epoch(train, valid)?;

        let lr = self.scheduler.step(self.best_loss, summary.valid_loss);
        if lr != summary.learning_rate {
            self.events.send(TrainingEvent::LearningRateChanged { lr });
        }
        self.optimizer.set_learning_rate(lr);
        self.state.current_lr = lr;

        let samples = valid.dataset().head(self.config.sampling.sample_count)?;
        let grid_path = self.render_reconstructions(&samples, epoch)?;
        self.events.send(TrainingEvent::SamplesRendered { paths: vec![grid_path] });

        if should_checkpoint(self.best_loss, summary.valid_loss) {
            self.best_loss = summary.valid_loss;
            self.state.best_score = Some(summary.valid_loss);
            let path = self.save_checkpoint(epoch, &summary)?;
            self.events.send(TrainingEvent::CheckpointSaved { path: path.clone() });
            self.best_checkpoint = Some(path);
        }

        self.state.epoch = epoch + 1;
        info!(
            "* {} ({:.0}%) * loss: {:.6}, v_loss: {:.6}, best_loss: {:.6}, l_rate: {}, lr_count: {}",
            epoch,
            self.state.progress_percentage(self.config.training.num_epochs),
            summary.train_loss,
            summary.valid_loss,
            self.best_loss,
            summary.learning_rate,
            self.scheduler.state().counter
        );
        self.csv_logger.append(&EpochRow {
            epoch,
            loss: summary.train_loss,
            v_loss: summary.valid_loss,
            best_loss: self.best_loss,
            l_rate: summary.learning_rate,
        })?;

        let record = [
            (vae_metrics::LOSS, summary.train_loss),
            (vae_metrics::VALID_LOSS, summary.valid_loss),
            (vae_metrics::BEST_LOSS, self.best_loss),
            (vae_metrics::LEARNING_RATE, summary.learning_rate),
        ];
        self.history.record_epoch(&record)?;
        self.events.send(TrainingEvent::EpochCompleted {
            epoch,
            metrics: record.iter().map(|(k, v)| (k.to_string(), *v)).collect::<BTreeMap<_, _>>(),
        });

        self.train_loss.reset();
        self.valid_loss.reset();
        Ok(())
    }

    fn render_reconstructions(&self, samples: &Tensor, epoch: usize) -> Result<PathBuf> {
        let reconstructed = self.reconstruct(samples)?;
        let columns = (samples.dim(0)? as f64).sqrt().ceil().max(1.0) as usize;
        let path = self
            .config
            .checkpointing
            .save_path
            .join(format!("rec_img_{epoch}.png"));
        self.renderer.render(&reconstructed, columns, &path)?;
        debug!("Rendered reconstructions to {}", path.display());
        Ok(path)
    }

    fn save_checkpoint(&self, epoch: usize, summary: &EpochSummary) -> Result<PathBuf> {
        let metadata = CheckpointMetadata::new(
            self.state.global_step,
            epoch,
            summary.valid_loss,
            summary.learning_rate,
        )
        .with_scheduler_state(self.scheduler.state_dict());
        let sets: [&dyn ParameterSet; 2] = [&self.models.encoder, &self.models.decoder];
        self.checkpoints.save(&sets, metadata)
    }

    /// Per-epoch history
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Get current training state
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Best validation loss so far
    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    /// Current optimizer learning rate
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Encoder and decoder
    pub fn models(&self) -> &VaeModels {
        &self.models
    }

    /// Checkpoint directory manager
    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Run directory
    pub fn save_path(&self) -> &Path {
        &self.config.checkpointing.save_path
    }

    /// Device the models live on
    pub fn device(&self) -> &Device {
        &self.device
    }
}
