//! Reference dense VAE

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder, VarMap};
use tracing::debug;

use super::{Encoder, EncoderOutput, ModelHandle, VaeFactory};
use crate::error::{Error, Result};

/// Encoder and decoder built for one data shape
pub struct VaeModels {
    /// Image -> (log_var, mean, z)
    pub encoder: ModelHandle<dyn Encoder + Send + Sync>,
    /// z -> image, values in [0, 1]
    pub decoder: ModelHandle,
}

/// Builds a fully connected encoder/decoder pair
#[derive(Debug, Clone)]
pub struct DenseVaeFactory {
    /// Width of the single hidden layer on each side
    pub hidden_dim: usize,
}

impl Default for DenseVaeFactory {
    fn default() -> Self {
        Self { hidden_dim: 512 }
    }
}

impl VaeFactory for DenseVaeFactory {
    fn build(&self, input_shape: &[usize], latent_dim: usize, device: &Device) -> Result<VaeModels> {
        if input_shape.is_empty() || input_shape.iter().any(|&d| d == 0) {
            return Err(Error::invalid_input(format!(
                "VAE input shape must be non-empty with positive dims, got {input_shape:?}"
            )));
        }
        if latent_dim == 0 {
            return Err(Error::invalid_input("latent_dim must be > 0"));
        }
        let features: usize = input_shape.iter().product();

        let encoder_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&encoder_vars, DType::F32, device);
        let encoder = DenseEncoder {
            hidden: linear(features, self.hidden_dim, vb.pp("hidden"))?,
            mean: linear(self.hidden_dim, latent_dim, vb.pp("z_mean"))?,
            log_var: linear(self.hidden_dim, latent_dim, vb.pp("z_log_var"))?,
        };

        let decoder_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&decoder_vars, DType::F32, device);
        let decoder = DenseDecoder {
            hidden: linear(latent_dim, self.hidden_dim, vb.pp("hidden"))?,
            output: linear(self.hidden_dim, features, vb.pp("output"))?,
            output_shape: input_shape.to_vec(),
        };

        debug!(
            "Built dense VAE: {} features, hidden {}, latent {}",
            features, self.hidden_dim, latent_dim
        );

        Ok(VaeModels {
            encoder: ModelHandle::new("encoder", input_shape.to_vec(), encoder_vars, Box::new(encoder)),
            decoder: ModelHandle::new("decoder", vec![latent_dim], decoder_vars, Box::new(decoder)),
        })
    }
}

struct DenseEncoder {
    hidden: Linear,
    mean: Linear,
    log_var: Linear,
}

impl Encoder for DenseEncoder {
    fn encode(&self, xs: &Tensor) -> candle_core::Result<EncoderOutput> {
        let h = self.hidden.forward(&xs.flatten_from(1)?)?.relu()?;
        let mean = self.mean.forward(&h)?;
        let log_var = self.log_var.forward(&h)?;
        let z = sample_latent(&mean, &log_var)?;
        Ok(EncoderOutput { log_var, mean, z })
    }
}

struct DenseDecoder {
    hidden: Linear,
    output: Linear,
    output_shape: Vec<usize>,
}

impl Module for DenseDecoder {
    fn forward(&self, z: &Tensor) -> candle_core::Result<Tensor> {
        let batch = z.dim(0)?;
        let h = self.hidden.forward(z)?.relu()?;
        let flat = candle_nn::ops::sigmoid(&self.output.forward(&h)?)?;
        let mut shape = Vec::with_capacity(self.output_shape.len() + 1);
        shape.push(batch);
        shape.extend_from_slice(&self.output_shape);
        flat.reshape(shape)
    }
}

/// Reparameterization trick: `mean + exp(0.5 * log_var) * eps`, `eps ~ N(0, 1)`
pub fn sample_latent(mean: &Tensor, log_var: &Tensor) -> candle_core::Result<Tensor> {
    let eps = mean.randn_like(0.0, 1.0)?;
    let std = (log_var * 0.5)?.exp()?;
    mean + std.mul(&eps)?
}
