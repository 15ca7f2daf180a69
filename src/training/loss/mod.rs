//! Loss functions for the generative training harnesses
//!
//! - **Reconstruction**: binary cross-entropy scaled to a per-sample sum,
//!   plus the element-wise regression losses used by CycleGAN
//! - **Regularization**: closed-form KL divergence against a unit-normal prior
//! - **Adversarial**: patch label construction and discriminator accuracy
//!
//! Every function returns a scalar tensor that stays attached to the graph, so
//! the caller can call `backward()` on it or read it with [`scalar`].

pub mod adversarial;
pub mod reconstruction;
pub mod regularization;

pub use adversarial::{binary_accuracy, patch_shape_from_input, PatchLabels};
pub use reconstruction::{binary_cross_entropy, mae, mse, reconstruction_loss};
pub use regularization::kl_loss;

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Element-wise regression losses, reduced by the mean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    /// Mean squared error
    Mse,
    /// Mean absolute error
    Mae,
}

impl LossKind {
    /// Compute this loss between `predictions` and `targets`
    pub fn compute(&self, predictions: &Tensor, targets: &Tensor) -> Result<Tensor> {
        match self {
            LossKind::Mse => mse(predictions, targets),
            LossKind::Mae => mae(predictions, targets),
        }
    }
}

/// Read a scalar loss tensor back to the host
pub fn scalar(loss: &Tensor) -> Result<f64> {
    Ok(loss.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}
