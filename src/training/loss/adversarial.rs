//! Patch-based adversarial supervision

use candle_core::{DType, Device, Tensor};

use crate::error::{Error, Result};
use crate::models::gan::DISCRIMINATOR_DOWNSAMPLING_STAGES;

/// Constant "valid" (ones) and "fake" (zeros) targets for a patch discriminator
#[derive(Debug, Clone)]
pub struct PatchLabels {
    /// Filled with 1.0
    pub valid: Tensor,
    /// Filled with 0.0
    pub fake: Tensor,
}

impl PatchLabels {
    /// Labels of shape `(batch_size,) + patch_shape`
    pub fn new(batch_size: usize, patch_shape: &[usize], device: &Device) -> Result<Self> {
        let mut shape = Vec::with_capacity(patch_shape.len() + 1);
        shape.push(batch_size);
        shape.extend_from_slice(patch_shape);
        Ok(Self {
            valid: Tensor::ones(shape.as_slice(), DType::F32, device)?,
            fake: Tensor::zeros(shape.as_slice(), DType::F32, device)?,
        })
    }

    /// Full label shape, including the batch dimension
    pub fn shape(&self) -> &[usize] {
        self.valid.dims()
    }
}

/// Patch grid of a discriminator from its declared `(C, H, W)` input shape:
/// `(1, H / 2^4, W / 2^4)`
pub fn patch_shape_from_input(input_shape: &[usize]) -> Result<Vec<usize>> {
    let factor = 2usize.pow(DISCRIMINATOR_DOWNSAMPLING_STAGES);
    match input_shape {
        [_, h, w] if *h >= factor && *w >= factor => Ok(vec![1, h / factor, w / factor]),
        _ => Err(Error::invalid_input(format!(
            "cannot derive a patch grid from discriminator input {input_shape:?}"
        ))),
    }
}

/// Fraction of scores on the right side of 0.5 for binary labels
pub fn binary_accuracy(predictions: &Tensor, labels: &Tensor) -> Result<f64> {
    let predicted = predictions.gt(0.5f32)?.to_dtype(DType::F32)?;
    let hits = predicted.eq(labels)?.to_dtype(DType::F64)?;
    Ok(hits.mean_all()?.to_scalar::<f64>()?)
}
