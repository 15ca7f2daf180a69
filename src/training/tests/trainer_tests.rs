//! Tests for trainer functionality

use anyhow::Result;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::models::{ConvGanFactory, DenseVaeFactory, ParameterSet};
use crate::training::config::{CycleGanTrainingConfig, CycleGanVariant};
use crate::training::data::{DataLoader, DataLoaderConfig};
use crate::training::metrics::{cyclegan_metrics, vae_metrics, JsonHistoryExporter};
use crate::training::trainer::{TrainingEvent, TrainingStatus};
use crate::training::trainers::vae::{CHECKPOINT_DIR, PROCESS_LOG};
use crate::training::trainers::{CycleGanModels, CycleGanTrainer, VaeTrainer};
use crate::training::visualization::MockSampleRenderer;

use super::test_utils::{
    assert_tensor_close, create_image_dataset, create_test_cyclegan_config, create_test_device,
    create_test_vae_config, sequential_loader, RenderCounter,
};

fn gan_models(filters: usize) -> Result<CycleGanModels> {
    gan_models_for(filters, 16)
}

fn gan_models_for(filters: usize, size: usize) -> Result<CycleGanModels> {
    Ok(CycleGanModels::build(
        &ConvGanFactory { filters },
        &[1, size, size],
        &create_test_device(),
    )?)
}

fn snapshot(set: &dyn ParameterSet) -> Result<Vec<(String, candle_core::Tensor)>> {
    let mut tensors = set
        .named_tensors()?
        .into_iter()
        .map(|(k, t)| Ok((k, t.copy()?)))
        .collect::<Result<Vec<_>>>()?;
    tensors.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(tensors)
}

fn changed(before: &[(String, candle_core::Tensor)], set: &dyn ParameterSet) -> Result<bool> {
    let after = snapshot(set)?;
    for ((_, a), (_, b)) in before.iter().zip(after.iter()) {
        let diff = (a - b)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        if diff > 0.0 {
            return Ok(true);
        }
    }
    Ok(false)
}

#[test]
fn test_vae_training_writes_run_directory() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = create_test_vae_config(temp_dir.path(), 3);
    let train = create_image_dataset(8, 1, 4)?;
    let valid = create_image_dataset(4, 1, 4)?;

    let mut trainer = VaeTrainer::new(
        config,
        &DenseVaeFactory { hidden_dim: 8 },
        train.sample_shape(),
        create_test_device(),
    )?;
    let mut train = sequential_loader(train, 4)?;
    let mut valid = sequential_loader(valid, 4)?;
    let result = trainer.train(&mut train, &mut valid)?;

    assert_eq!(result.final_state.status, TrainingStatus::Completed);
    assert_eq!(result.final_state.epoch, 3);
    assert_eq!(result.total_steps, 6);
    assert_eq!(result.history.epochs(), 3);
    for name in vae_metrics::ALL {
        assert_eq!(result.history.get(name).map(|v| v.len()), Some(3));
    }

    let csv = std::fs::read_to_string(temp_dir.path().join(PROCESS_LOG))?;
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows.len(), 3);
    for (epoch, row) in rows.iter().enumerate() {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "0");
        assert_eq!(fields[1], epoch.to_string());
    }

    for epoch in 0..3 {
        assert!(temp_dir.path().join(format!("rec_img_{epoch}.png")).exists());
    }
    assert!(temp_dir.path().join(CHECKPOINT_DIR).exists());
    assert!(temp_dir.path().join(JsonHistoryExporter::FILE_NAME).exists());
    Ok(())
}

#[test]
fn test_vae_reconstruction_grid_is_square() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut config = create_test_vae_config(temp_dir.path(), 2);
    config.sampling.sample_count = 5;
    let train = create_image_dataset(4, 1, 4)?;
    let valid = create_image_dataset(8, 1, 4)?;

    let counter = RenderCounter::default();
    let mut trainer = VaeTrainer::new(
        config,
        &DenseVaeFactory { hidden_dim: 8 },
        train.sample_shape(),
        create_test_device(),
    )?
    .with_renderer(Box::new(counter.clone()));
    let mut train = sequential_loader(train, 4)?;
    let mut valid = sequential_loader(valid, 4)?;
    trainer.train(&mut train, &mut valid)?;

    let grids = counter.grids();
    assert_eq!(grids.len(), 2);
    for (dims, columns) in grids {
        assert_eq!(dims, vec![5, 1, 4, 4]);
        assert_eq!(columns, 3);
    }
    let paths = counter.paths();
    assert!(paths[1].ends_with("rec_img_1.png"));
    Ok(())
}

#[test]
fn test_vae_events() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = create_test_vae_config(temp_dir.path(), 2);
    let train = create_image_dataset(4, 1, 4)?;
    let valid = create_image_dataset(4, 1, 4)?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut trainer = VaeTrainer::new(
        config,
        &DenseVaeFactory { hidden_dim: 8 },
        train.sample_shape(),
        create_test_device(),
    )?
    .with_renderer(Box::new(RenderCounter::default()))
    .with_event_monitoring(tx);
    let mut train = sequential_loader(train, 4)?;
    let mut valid = sequential_loader(valid, 4)?;
    trainer.train(&mut train, &mut valid)?;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(TrainingEvent::TrainingStarted { trainer: "vae", epochs: 2 })));
    assert!(matches!(events.last(), Some(TrainingEvent::TrainingCompleted { total_steps: 2 })));
    let completed = events
        .iter()
        .filter(|e| matches!(e, TrainingEvent::EpochCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
    assert!(events.iter().any(|e| matches!(e, TrainingEvent::CheckpointSaved { .. })));
    Ok(())
}

#[test]
fn test_cyclegan_renders_initial_and_every_interval() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = create_test_cyclegan_config(temp_dir.path(), 2);
    let mut renderer = MockSampleRenderer::new();
    renderer
        .expect_render()
        .withf(|images, columns, _| images.dims() == [4, 1, 16, 16] && *columns == 2)
        .times(6)
        .returning(|_, _, _| Ok(()));

    let mut trainer = CycleGanTrainer::new(config, gan_models(2)?, create_test_device())?
        .with_renderer(Box::new(renderer));
    let mut a = sequential_loader(create_image_dataset(4, 1, 16)?, 2)?;
    let mut b = sequential_loader(create_image_dataset(4, 1, 16)?, 2)?;
    trainer.train(&mut a, &mut b)?;
    Ok(())
}

#[test]
fn test_cyclegan_sample_interval() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut config = create_test_cyclegan_config(temp_dir.path(), 3);
    config.sampling.sample_interval = 2;
    let counter = RenderCounter::default();

    let mut trainer = CycleGanTrainer::new(config, gan_models(2)?, create_test_device())?
        .with_renderer(Box::new(counter.clone()));
    let mut a = sequential_loader(create_image_dataset(2, 1, 16)?, 2)?;
    let mut b = sequential_loader(create_image_dataset(2, 1, 16)?, 2)?;
    trainer.train(&mut a, &mut b)?;

    let names: Vec<String> = counter
        .paths()
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(names, vec!["img_ab_0.png", "img_ba_0.png", "img_ab_2.png", "img_ba_2.png"]);
    Ok(())
}

#[test]
fn test_cyclegan_epoch_stops_at_shorter_domain() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = create_test_cyclegan_config(temp_dir.path(), 2);
    let mut trainer = CycleGanTrainer::new(config, gan_models(2)?, create_test_device())?
        .with_renderer(Box::new(RenderCounter::default()));

    let mut a = sequential_loader(create_image_dataset(6, 1, 16)?, 2)?;
    let mut b = sequential_loader(create_image_dataset(2, 1, 16)?, 2)?;
    let result = trainer.train(&mut a, &mut b)?;

    assert_eq!(result.total_steps, 2);
    assert_eq!(result.history.epochs(), 2);
    for name in cyclegan_metrics::ALL {
        assert_eq!(result.history.get(name).map(|v| v.len()), Some(2));
    }
    let accuracy = result.history.last(cyclegan_metrics::D_ACCURACY).unwrap_or(-1.0);
    assert!((0.0..=1.0).contains(&accuracy));
    assert!(temp_dir.path().join("results").join(JsonHistoryExporter::FILE_NAME).exists());
    Ok(())
}

#[test]
fn test_cyclegan_uneven_domains_with_cli_loaders() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = create_test_cyclegan_config(temp_dir.path(), 2);
    let (a_config, b_config) = DataLoaderConfig::domain_pair(&config.training);
    let mut trainer = CycleGanTrainer::new(config, gan_models(2)?, create_test_device())?
        .with_renderer(Box::new(RenderCounter::default()));

    let mut a = DataLoader::new(create_image_dataset(5, 1, 16)?, a_config)?;
    let mut b = DataLoader::new(create_image_dataset(6, 1, 16)?, b_config)?;
    let result = trainer.train(&mut a, &mut b)?;

    assert_eq!(result.total_steps, 4);
    assert_eq!(result.history.epochs(), 2);
    assert_eq!(result.final_state.status, TrainingStatus::Completed);
    Ok(())
}

#[test]
fn test_cyclegan_partial_batch_pair_ends_epoch() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = create_test_cyclegan_config(temp_dir.path(), 2);
    let loader_config = DataLoaderConfig::from(&config.training);
    let mut trainer = CycleGanTrainer::new(config, gan_models(2)?, create_test_device())?
        .with_renderer(Box::new(RenderCounter::default()));

    // A yields batches of 2, 2, 1 and B of 2, 2, 2
    let mut a = DataLoader::new(create_image_dataset(5, 1, 16)?, loader_config.clone())?;
    let mut b = DataLoader::new(create_image_dataset(6, 1, 16)?, loader_config)?;
    let result = trainer.train(&mut a, &mut b)?;

    assert_eq!(result.total_steps, 4);
    assert_eq!(result.history.epochs(), 2);
    Ok(())
}

#[test]
fn test_cyclegan_default_patch_must_match_discriminator() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut config = create_test_cyclegan_config(temp_dir.path(), 1);
    config.variant = CycleGanTrainingConfig::default().variant;

    // 32x32 inputs give a 2x2 patch, not the default 4x4
    match CycleGanTrainer::new(config.clone(), gan_models_for(2, 32)?, create_test_device()) {
        Err(Error::Config(message)) => assert!(message.contains("[1, 2, 2]"), "{message}"),
        Err(e) => panic!("expected a configuration error, got {e}"),
        Ok(_) => panic!("mismatched patch shape was accepted"),
    }

    let trainer = CycleGanTrainer::new(config.clone(), gan_models_for(2, 64)?, create_test_device())?;
    assert_eq!(trainer.patch_shape(), &[1, 4, 4]);

    config.variant = CycleGanVariant::Identity {
        patch_shape: vec![1, 2, 2],
    };
    let trainer = CycleGanTrainer::new(config, gan_models_for(2, 32)?, create_test_device())?;
    assert_eq!(trainer.patch_shape(), &[1, 2, 2]);
    Ok(())
}

#[test]
fn test_cyclegan_phases_touch_only_their_models() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = create_test_cyclegan_config(temp_dir.path(), 1);
    let mut trainer = CycleGanTrainer::new(config, gan_models(2)?, create_test_device())?;
    let a = create_image_dataset(2, 1, 16)?.images().clone();
    let b = create_image_dataset(2, 1, 16)?.images().clone();

    let models = trainer.pipeline().models();
    let g_ab = snapshot(&models.generator_ab)?;
    let d_a = snapshot(&models.discriminator_a)?;
    let d_b = snapshot(&models.discriminator_b)?;

    trainer.discriminator_step(&a, &b)?;
    let models = trainer.pipeline().models();
    assert!(!changed(&g_ab, &models.generator_ab)?);
    assert!(changed(&d_a, &models.discriminator_a)?);
    assert!(changed(&d_b, &models.discriminator_b)?);

    let d_a = snapshot(&models.discriminator_a)?;
    let d_b = snapshot(&models.discriminator_b)?;
    trainer.generator_step(&a, &b)?;
    let models = trainer.pipeline().models();
    assert!(changed(&g_ab, &models.generator_ab)?);
    assert!(!changed(&d_a, &models.discriminator_a)?);
    assert!(!changed(&d_b, &models.discriminator_b)?);
    Ok(())
}

#[test]
fn test_cyclegan_rejects_mismatched_batches() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = create_test_cyclegan_config(temp_dir.path(), 1);
    let mut trainer = CycleGanTrainer::new(config, gan_models(2)?, create_test_device())?;
    let a = create_image_dataset(2, 1, 16)?.images().clone();
    let b = create_image_dataset(1, 1, 16)?.images().clone();
    assert!(trainer.train_step(&a, &b).is_err());
    Ok(())
}

#[test]
fn test_cyclegan_classic_variant_derives_patch() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut config = create_test_cyclegan_config(temp_dir.path(), 1);
    config.variant = CycleGanVariant::Classic;
    let trainer = CycleGanTrainer::new(config, gan_models(2)?, create_test_device())?;
    assert_eq!(trainer.patch_shape(), &[1, 1, 1]);
    assert_eq!(trainer.pipeline().loss_weights()[4], 10.0);
    Ok(())
}

#[test]
fn test_cyclegan_save_models() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = create_test_cyclegan_config(temp_dir.path(), 1);
    let output_dir = config.output_dir.clone();
    let trainer = CycleGanTrainer::new(config, gan_models(2)?, create_test_device())?;

    let paths = trainer.save_models(&output_dir)?;
    assert_eq!(paths.len(), 5);
    for path in &paths {
        assert!(path.exists(), "{} missing", path.display());
    }

    let composite = candle_core::safetensors::load(&paths[0], &create_test_device())?;
    let generator = candle_core::safetensors::load(&paths[1], &create_test_device())?;
    let models = trainer.pipeline().models();
    for (key, tensor) in models.generator_ab.named_tensors()? {
        assert_tensor_close(&tensor, &composite[&key], 0.0);
    }
    assert_eq!(generator.len(), models.generator_ab.named_tensors()?.len());
    Ok(())
}
