//! CycleGAN trainer
//!
//! Every batch pair runs two phases. In the discriminator phase each
//! discriminator is stepped on real images labelled valid and then on detached
//! translations labelled fake. In the generator phase the composite pipeline is
//! stepped once with both discriminators frozen.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use tracing::{debug, info, instrument};

use super::pipeline::{CycleGanModels, CycleGanPipeline, GeneratorLosses};
use crate::error::{Error, Result};
use crate::models::{save_models, ModelHandle};
use crate::training::config::{CycleGanTrainingConfig, CycleGanVariant};
use crate::training::data::{DataLoader, ImageDataset};
use crate::training::loss::{binary_accuracy, mse, patch_shape_from_input, scalar, PatchLabels};
use crate::training::metrics::{cyclegan_metrics, JsonHistoryExporter, MeanMetric, TrainingHistory};
use crate::training::optimizers::{create_optimizer, ModelOptimizer, UpdateMode};
use crate::training::trainer::{
    EventSink, TrainingEvent, TrainingResult, TrainingState, TrainingStatus,
};
use crate::training::visualization::{ImageGridRenderer, SampleRenderer, ValueRange};

/// File names written by [`CycleGanTrainer::save_models`]
pub const COMPOSITE_FILE: &str = "cyclegan.safetensors";

/// Discriminator losses of one batch pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiscriminatorLosses {
    /// Mean of D_a's real and fake losses
    pub d_a: f64,
    /// Mean of D_b's real and fake losses
    pub d_b: f64,
    /// `0.5 * (d_a + d_b)`
    pub d_loss: f64,
    /// Binary accuracy averaged the same way
    pub accuracy: f64,
}

/// Both phases of one batch pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLosses {
    /// Discriminator phase
    pub discriminator: DiscriminatorLosses,
    /// Generator phase
    pub generator: GeneratorLosses,
}

/// Trainer owning both generators and both discriminators
pub struct CycleGanTrainer {
    config: CycleGanTrainingConfig,
    pipeline: CycleGanPipeline,
    generator_optimizer: ModelOptimizer,
    discriminator_a_optimizer: ModelOptimizer,
    discriminator_b_optimizer: ModelOptimizer,
    patch_shape: Vec<usize>,
    labels: PatchLabels,
    renderer: Box<dyn SampleRenderer + Send>,
    history: TrainingHistory,
    state: TrainingState,
    device: Device,
    events: EventSink,
}

impl CycleGanTrainer {
    /// Assemble the composite pipeline over pre-built models
    pub fn new(config: CycleGanTrainingConfig, models: CycleGanModels, device: Device) -> Result<Self> {
        config.validate()?;
        let patch_shape = match &config.variant {
            CycleGanVariant::Classic => patch_shape_from_input(models.discriminator_a.input_shape())?,
            CycleGanVariant::Identity { patch_shape } => patch_shape.clone(),
        };
        for discriminator in [&models.discriminator_a, &models.discriminator_b] {
            check_patch_shape(discriminator, &patch_shape, &device)?;
        }
        let labels = PatchLabels::new(config.training.batch_size, &patch_shape, &device)?;

        let discriminator_a_optimizer =
            create_optimizer(models.discriminator_a.trainable_vars(), &config.optimizer)?;
        let discriminator_b_optimizer =
            create_optimizer(models.discriminator_b.trainable_vars(), &config.optimizer)?;
        let pipeline = CycleGanPipeline::new(models, &config.variant, &config.loss_weights);
        let generator_optimizer = create_optimizer(pipeline.generator_vars(), &config.optimizer)?;

        let renderer = Box::new(ImageGridRenderer::new(ValueRange::Symmetric, config.sampling.invert));
        info!(
            "CycleGAN trainer ready: patch {:?}, weights {:?}",
            patch_shape,
            pipeline.loss_weights()
        );

        Ok(Self {
            state: TrainingState::new(config.optimizer.learning_rate),
            config,
            pipeline,
            generator_optimizer,
            discriminator_a_optimizer,
            discriminator_b_optimizer,
            patch_shape,
            labels,
            renderer,
            history: TrainingHistory::new(&cyclegan_metrics::ALL),
            device,
            events: EventSink::default(),
        })
    }

    /// Replace the sample renderer
    pub fn with_renderer(mut self, renderer: Box<dyn SampleRenderer + Send>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Set up event monitoring
    pub fn with_event_monitoring(mut self, tx: tokio::sync::mpsc::UnboundedSender<TrainingEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    /// Labels matching a batch of `batch_size`
    fn labels_for(&mut self, batch_size: usize) -> Result<PatchLabels> {
        if self.labels.shape().first() != Some(&batch_size) {
            debug!("Allocating patch labels for batch size {}", batch_size);
            self.labels = PatchLabels::new(batch_size, &self.patch_shape, &self.device)?;
        }
        Ok(self.labels.clone())
    }

    /// Discriminator phase: both discriminators updated, generators untouched
    pub fn discriminator_step(&mut self, a: &Tensor, b: &Tensor) -> Result<DiscriminatorLosses> {
        let labels = self.labels_for(a.dim(0)?)?;
        let fake_b = self.pipeline.translate_ab(a)?.detach();
        let fake_a = self.pipeline.translate_ba(b)?.detach();

        let models = self.pipeline.models();
        let (real_a, acc_real_a) =
            fit_discriminator(&models.discriminator_a, &mut self.discriminator_a_optimizer, a, &labels.valid)?;
        let (fake_a_loss, acc_fake_a) =
            fit_discriminator(&models.discriminator_a, &mut self.discriminator_a_optimizer, &fake_a, &labels.fake)?;
        let (real_b, acc_real_b) =
            fit_discriminator(&models.discriminator_b, &mut self.discriminator_b_optimizer, b, &labels.valid)?;
        let (fake_b_loss, acc_fake_b) =
            fit_discriminator(&models.discriminator_b, &mut self.discriminator_b_optimizer, &fake_b, &labels.fake)?;

        let d_a = 0.5 * (real_a + fake_a_loss);
        let d_b = 0.5 * (real_b + fake_b_loss);
        let accuracy = 0.5 * (0.5 * (acc_real_a + acc_fake_a) + 0.5 * (acc_real_b + acc_fake_b));
        Ok(DiscriminatorLosses {
            d_a,
            d_b,
            d_loss: 0.5 * (d_a + d_b),
            accuracy,
        })
    }

    /// Generator phase: one step of both generators, discriminators frozen
    pub fn generator_step(&mut self, a: &Tensor, b: &Tensor) -> Result<GeneratorLosses> {
        let labels = self.labels_for(a.dim(0)?)?;
        let outputs = self.pipeline.forward(a, b)?;
        let targets = [&labels.valid, &labels.valid, a, b, a, b];
        let (total, losses) = self.pipeline.generator_loss(&outputs, targets)?;

        let grads = total.backward()?;
        self.generator_optimizer.step(&grads, UpdateMode::Update)?;
        self.discriminator_a_optimizer.step(&grads, UpdateMode::Frozen)?;
        self.discriminator_b_optimizer.step(&grads, UpdateMode::Frozen)?;
        Ok(losses)
    }

    /// Both phases on one batch pair
    pub fn train_step(&mut self, a: &Tensor, b: &Tensor) -> Result<StepLosses> {
        if a.dim(0)? != b.dim(0)? {
            return Err(Error::invalid_input(format!(
                "domain batches differ in size: {} vs {}",
                a.dim(0)?,
                b.dim(0)?
            )));
        }
        let discriminator = self.discriminator_step(a, b)?;
        let generator = self.generator_step(a, b)?;
        self.state.global_step += 1;
        self.events.send(TrainingEvent::StepCompleted {
            step: self.state.global_step,
            loss: generator.total,
        });
        Ok(StepLosses {
            discriminator,
            generator,
        })
    }

    /// Train for the configured number of epochs.
    ///
    /// Batches of the two domains are zipped, so the shorter domain bounds
    /// every epoch. A pair whose batch sizes differ ends the epoch.
    #[instrument(skip_all, fields(epochs = self.config.training.num_epochs))]
    pub fn train(&mut self, domain_a: &mut DataLoader, domain_b: &mut DataLoader) -> Result<TrainingResult> {
        let epochs = self.config.training.num_epochs;
        let started = Instant::now();
        if domain_a.num_batches() != domain_b.num_batches() {
            debug!(
                "Domain batch counts differ ({} vs {}); epochs stop at the shorter",
                domain_a.num_batches(),
                domain_b.num_batches()
            );
        }
        self.state.status = TrainingStatus::Running;
        self.events.send(TrainingEvent::TrainingStarted { trainer: "cyclegan", epochs });

        if let Err(e) = self.run_epochs(epochs, domain_a, domain_b) {
            self.state.status = TrainingStatus::Failed { error: e.to_string() };
            self.events.send(TrainingEvent::Error { error: e.to_string() });
            return Err(e);
        }

        JsonHistoryExporter::new(&self.config.sampling.results_dir).export(&self.history)?;
        self.state.status = TrainingStatus::Completed;
        self.events.send(TrainingEvent::TrainingCompleted {
            total_steps: self.state.global_step,
        });
        info!("Training completed in {:?}", started.elapsed());

        Ok(TrainingResult {
            history: self.history.clone(),
            final_state: self.state.clone(),
            best_checkpoint_path: None,
            training_duration: started.elapsed(),
            total_steps: self.state.global_step,
        })
    }

    fn run_epochs(&mut self, epochs: usize, domain_a: &mut DataLoader, domain_b: &mut DataLoader) -> Result<()> {
        self.sample_images(domain_a.dataset(), domain_b.dataset(), 0)?;
        for epoch in 1..=epochs {
            self.run_epoch(epoch, domain_a, domain_b)?;
        }
        Ok(())
    }

    fn run_epoch(&mut self, epoch: usize, domain_a: &mut DataLoader, domain_b: &mut DataLoader) -> Result<()> {
        info!("* epoch {}/{}", epoch, self.config.training.num_epochs);
        self.events.send(TrainingEvent::EpochStarted { epoch });

        let mut d_loss = 0.0;
        let mut g = GeneratorLosses::default();
        let mut accuracy = MeanMetric::new("d_accuracy");
        for (a, b) in domain_a.epoch().zip(domain_b.epoch()) {
            let (a, b) = (a?, b?);
            if a.dim(0)? != b.dim(0)? {
                debug!(
                    "Stopping epoch {} at a partial batch pair ({} vs {})",
                    epoch,
                    a.dim(0)?,
                    b.dim(0)?
                );
                break;
            }
            let step = self.train_step(&a, &b)?;
            d_loss += step.discriminator.d_loss;
            accuracy.update(step.discriminator.accuracy);
            g.validity += step.generator.validity;
            g.cycle += step.generator.cycle;
            g.identity += step.generator.identity;
            g.total += step.generator.total;
        }

        let record = [
            (cyclegan_metrics::D_LOSS, d_loss),
            (cyclegan_metrics::D_ACCURACY, accuracy.result()),
            (cyclegan_metrics::G_LOSS, g.total),
            (cyclegan_metrics::VALIDITY_LOSS, g.validity),
            (cyclegan_metrics::CYCLE_LOSS, g.cycle),
            (cyclegan_metrics::IDENTITY_LOSS, g.identity),
        ];
        self.history.record_epoch(&record)?;
        info!(
            "d_loss: {:.6}, d_acc: {:.3}, g_loss: {:.6} (validity {:.6}, cycle {:.6}, identity {:.6}) over {} batches",
            d_loss,
            accuracy.result(),
            g.total,
            g.validity,
            g.cycle,
            g.identity,
            accuracy.count()
        );
        self.events.send(TrainingEvent::EpochCompleted {
            epoch,
            metrics: record.iter().map(|(k, v)| (k.to_string(), *v)).collect::<BTreeMap<_, _>>(),
        });
        self.state.epoch = epoch;
        info!(
            "Epoch {}/{} done ({:.0}%)",
            epoch,
            self.config.training.num_epochs,
            self.state.progress_percentage(self.config.training.num_epochs)
        );

        if epoch % self.config.sampling.sample_interval == 0 {
            self.sample_images(domain_a.dataset(), domain_b.dataset(), epoch)?;
        }
        Ok(())
    }

    /// Render originals above their translations for both directions
    pub fn sample_images(&self, domain_a: &ImageDataset, domain_b: &ImageDataset, epoch: usize) -> Result<Vec<PathBuf>> {
        let dir = &self.config.sampling.results_dir;
        let count = self.config.sampling.sample_count;
        let mut paths = Vec::with_capacity(2);
        for (name, dataset, generator) in [
            ("ab", domain_a, &self.pipeline.models().generator_ab),
            ("ba", domain_b, &self.pipeline.models().generator_ba),
        ] {
            let originals = dataset.head(count)?;
            let columns = originals.dim(0)?;
            if columns == 0 {
                continue;
            }
            let translated = generator.forward(&originals)?;
            let grid = Tensor::cat(&[&originals, &translated], 0)?;
            let path = dir.join(format!("img_{name}_{epoch}.png"));
            self.renderer.render(&grid, columns, &path)?;
            paths.push(path);
        }
        self.events.send(TrainingEvent::SamplesRendered { paths: paths.clone() });
        Ok(paths)
    }

    /// Write the composite and each model to `dir`
    pub fn save_models(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let models = self.pipeline.models();
        let composite = dir.join(COMPOSITE_FILE);
        save_models(&models.parameter_sets(), &composite)?;

        let mut paths = vec![composite];
        let named: [(&str, &ModelHandle); 4] = [
            ("generator_ab", &models.generator_ab),
            ("generator_ba", &models.generator_ba),
            ("discriminator_a", &models.discriminator_a),
            ("discriminator_b", &models.discriminator_b),
        ];
        for (name, model) in named {
            let path = dir.join(format!("{name}.safetensors"));
            model.save(&path)?;
            paths.push(path);
        }
        info!("Saved {} model files to {}", paths.len(), dir.display());
        Ok(paths)
    }

    /// The composite pipeline
    pub fn pipeline(&self) -> &CycleGanPipeline {
        &self.pipeline
    }

    /// Patch shape used for the adversarial labels
    pub fn patch_shape(&self) -> &[usize] {
        &self.patch_shape
    }

    /// Per-epoch history
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Get current training state
    pub fn state(&self) -> &TrainingState {
        &self.state
    }
}

/// Reject a patch shape that differs from what `discriminator` emits for one
/// sample
fn check_patch_shape(discriminator: &ModelHandle, patch_shape: &[usize], device: &Device) -> Result<()> {
    let mut shape = Vec::with_capacity(discriminator.input_shape().len() + 1);
    shape.push(1);
    shape.extend_from_slice(discriminator.input_shape());
    let output = discriminator.forward(&Tensor::zeros(shape, DType::F32, device)?)?;
    let emitted = &output.dims()[1..];
    if emitted != patch_shape {
        return Err(Error::config(format!(
            "patch shape {:?} does not match the {:?} output of {}",
            patch_shape,
            emitted,
            discriminator.name()
        )));
    }
    Ok(())
}

/// One optimizer step of a discriminator; returns the loss before the update
/// and the accuracy of that prediction
fn fit_discriminator(
    discriminator: &ModelHandle,
    optimizer: &mut ModelOptimizer,
    images: &Tensor,
    labels: &Tensor,
) -> Result<(f64, f64)> {
    let predictions = discriminator.forward(images)?;
    let loss = mse(&predictions, labels)?;
    optimizer.backward_step(&loss, UpdateMode::Update)?;
    Ok((scalar(&loss)?, binary_accuracy(&predictions, labels)?))
}
