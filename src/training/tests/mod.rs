//! Test suite for the training infrastructure
//!
//! Unit tests live next to their modules; this tree covers behaviour that
//! spans several components: loaders feeding trainers, checkpoints written by
//! the VAE trainer, and sample rendering driven by the CycleGAN trainer.

pub mod trainer_tests;

// Utility modules for testing
pub mod test_utils;

// Re-export commonly used test utilities
pub use test_utils::{
    assert_tensor_close, create_image_dataset, create_test_cyclegan_config, create_test_device,
    create_test_vae_config, RenderCounter,
};
