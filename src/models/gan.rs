//! Reference convolutional generator and patch discriminator
//!
//! The discriminator downsamples by 2 four times, so an `H x W` input yields an
//! `(1, H/16, W/16)` patch grid of scores.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder, VarMap};
use tracing::debug;

use super::ModelHandle;
use crate::error::{Error, Result};

/// Number of stride-2 stages in the patch discriminator
pub const DISCRIMINATOR_DOWNSAMPLING_STAGES: u32 = 4;

/// Builds generators and discriminators for `(channels, height, width)` images
#[derive(Debug, Clone)]
pub struct ConvGanFactory {
    /// Base number of filters
    pub filters: usize,
}

impl Default for ConvGanFactory {
    fn default() -> Self {
        Self { filters: 32 }
    }
}

impl ConvGanFactory {
    /// Shape-preserving image-to-image generator with a `tanh` output
    pub fn generator(&self, name: &str, input_shape: &[usize], device: &Device) -> Result<ModelHandle> {
        let (channels, _, _) = image_dims(input_shape)?;
        let vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&vars, DType::F32, device);
        let same = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let layers = vec![
            conv2d(channels, self.filters, 3, same, vb.pp("conv0"))?,
            conv2d(self.filters, self.filters, 3, same, vb.pp("conv1"))?,
            conv2d(self.filters, channels, 3, same, vb.pp("conv2"))?,
        ];
        debug!("Built generator {} for {:?}", name, input_shape);
        Ok(ModelHandle::new(
            name,
            input_shape.to_vec(),
            vars,
            Box::new(ConvGenerator { layers }),
        ))
    }

    /// Patch discriminator producing unbounded scores on a `H/16 x W/16` grid
    pub fn discriminator(&self, name: &str, input_shape: &[usize], device: &Device) -> Result<ModelHandle> {
        let (channels, height, width) = image_dims(input_shape)?;
        let factor = 2usize.pow(DISCRIMINATOR_DOWNSAMPLING_STAGES);
        if height % factor != 0 || width % factor != 0 || height < factor || width < factor {
            return Err(Error::invalid_input(format!(
                "discriminator input {height}x{width} must be a positive multiple of {factor}"
            )));
        }
        let vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&vars, DType::F32, device);
        let down = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        let mut layers = Vec::new();
        let mut in_channels = channels;
        for stage in 0..DISCRIMINATOR_DOWNSAMPLING_STAGES {
            let out_channels = self.filters * 2usize.pow(stage);
            layers.push(conv2d(in_channels, out_channels, 4, down, vb.pp(format!("down{stage}")))?);
            in_channels = out_channels;
        }
        let head = conv2d(
            in_channels,
            1,
            3,
            Conv2dConfig {
                padding: 1,
                ..Default::default()
            },
            vb.pp("head"),
        )?;
        debug!("Built discriminator {} for {:?}", name, input_shape);
        Ok(ModelHandle::new(
            name,
            input_shape.to_vec(),
            vars,
            Box::new(PatchDiscriminator { layers, head }),
        ))
    }
}

fn image_dims(shape: &[usize]) -> Result<(usize, usize, usize)> {
    match shape {
        [c, h, w] if *c > 0 && *h > 0 && *w > 0 => Ok((*c, *h, *w)),
        _ => Err(Error::invalid_input(format!(
            "expected a (channels, height, width) image shape, got {shape:?}"
        ))),
    }
}

struct ConvGenerator {
    layers: Vec<Conv2d>,
}

impl Module for ConvGenerator {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut h = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            h = if i == last { h.tanh()? } else { h.relu()? };
        }
        Ok(h)
    }
}

struct PatchDiscriminator {
    layers: Vec<Conv2d>,
    head: Conv2d,
}

impl Module for PatchDiscriminator {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = xs.clone();
        for layer in &self.layers {
            h = candle_nn::ops::leaky_relu(&layer.forward(&h)?, 0.2)?;
        }
        self.head.forward(&h)
    }
}
