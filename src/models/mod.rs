//! Model handles and the factory seam
//!
//! Architectures are supplied from outside the training core. A trainer only
//! sees a [`ModelHandle`]: a forward function plus the `VarMap` that owns its
//! trainable parameters. The reference builders in [`vae`] and [`gan`] exist so
//! the harness can run end to end.

pub mod gan;
pub mod vae;

pub use gan::ConvGanFactory;
pub use vae::{DenseVaeFactory, VaeModels};

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor, Var};
use candle_nn::{Module, VarMap};
use tracing::debug;

use crate::error::{Error, Result};

/// Outputs of a VAE encoder, in the order the encoder produces them
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Log-variance of the latent Gaussian
    pub log_var: Tensor,
    /// Mean of the latent Gaussian
    pub mean: Tensor,
    /// Sample drawn with the reparameterization trick
    pub z: Tensor,
}

/// A VAE encoder maps a batch of images to a latent Gaussian and a sample from it
pub trait Encoder {
    /// Encode a batch
    fn encode(&self, xs: &Tensor) -> candle_core::Result<EncoderOutput>;
}

/// A trainable model: forward function, declared input shape and owned parameters
pub struct ModelHandle<M: ?Sized + Send + Sync = dyn Module + Send + Sync> {
    name: String,
    input_shape: Vec<usize>,
    vars: VarMap,
    module: Box<M>,
}

impl<M: ?Sized + Send + Sync> ModelHandle<M> {
    /// Wrap a built module together with the `VarMap` its parameters live in
    pub fn new(
        name: impl Into<String>,
        input_shape: Vec<usize>,
        vars: VarMap,
        module: Box<M>,
    ) -> Self {
        Self {
            name: name.into(),
            input_shape,
            vars,
            module,
        }
    }

    /// Model name, used as the parameter prefix in checkpoints
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-sample input shape (without the batch dimension)
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// All trainable variables, for building an optimizer
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.vars.all_vars()
    }

    /// Total number of scalar parameters
    pub fn parameter_count(&self) -> usize {
        self.vars.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Serialize this model's parameters to a safetensors file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vars.save(path.as_ref())?;
        Ok(())
    }
}

/// Anything whose parameters can be snapshotted into, and restored from, a
/// flat name -> tensor map
pub trait ParameterSet {
    /// Prefix used for this set's keys
    fn set_name(&self) -> &str;

    /// Snapshot of the parameters keyed `<name>.<param>`
    fn named_tensors(&self) -> Result<HashMap<String, Tensor>>;

    /// Overwrite parameters from a map keyed `<name>.<param>`
    ///
    /// Every parameter of this set must be present in `tensors`.
    fn load_named_tensors(&self, tensors: &HashMap<String, Tensor>) -> Result<()>;
}

impl<M: ?Sized + Send + Sync> ParameterSet for ModelHandle<M> {
    fn set_name(&self) -> &str {
        &self.name
    }

    fn named_tensors(&self) -> Result<HashMap<String, Tensor>> {
        let data = self
            .vars
            .data()
            .lock()
            .map_err(|_| Error::internal(format!("parameter store of {} is poisoned", self.name)))?;
        Ok(data
            .iter()
            .map(|(key, var)| (format!("{}.{}", self.name, key), var.as_tensor().clone()))
            .collect())
    }

    fn load_named_tensors(&self, tensors: &HashMap<String, Tensor>) -> Result<()> {
        let data = self
            .vars
            .data()
            .lock()
            .map_err(|_| Error::internal(format!("parameter store of {} is poisoned", self.name)))?;
        for (key, var) in data.iter() {
            let full_key = format!("{}.{}", self.name, key);
            let tensor = tensors.get(&full_key).ok_or_else(|| {
                Error::checkpoint(format!("missing parameter {full_key} in snapshot"))
            })?;
            var.set(tensor)?;
        }
        debug!("Restored {} parameters into {}", data.len(), self.name);
        Ok(())
    }
}

impl ModelHandle {
    /// Run the forward function
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.module.forward(xs)?)
    }
}

impl ModelHandle<dyn Encoder + Send + Sync> {
    /// Run the encoder
    pub fn encode(&self, xs: &Tensor) -> Result<EncoderOutput> {
        Ok(self.module.encode(xs)?)
    }
}

/// Builds a VAE encoder/decoder pair for a given data shape
pub trait VaeFactory {
    /// Build models for per-sample `input_shape` and a `latent_dim`-dimensional code
    fn build(&self, input_shape: &[usize], latent_dim: usize, device: &Device) -> Result<VaeModels>;
}

/// Save several models into a single safetensors file
pub fn save_models<P: AsRef<Path>>(models: &[&dyn ParameterSet], path: P) -> Result<()> {
    let mut tensors = HashMap::new();
    for model in models {
        tensors.extend(model.named_tensors()?);
    }
    candle_core::safetensors::save(&tensors, path.as_ref())?;
    Ok(())
}
