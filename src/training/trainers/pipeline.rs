//! The composite CycleGAN graph as an explicit object
//!
//! For inputs `(a, b)` the pipeline produces, in order,
//! `[valid_a, valid_b, reco_a, reco_b, ident_a, ident_b]`, each paired with a
//! loss kind and a weight. Discriminator parameters take part in the graph but
//! are only moved by their own optimizers.

use candle_core::{Device, Tensor, Var};

use crate::error::Result;
use crate::models::{ConvGanFactory, ModelHandle, ParameterSet};
use crate::training::config::{CycleGanVariant, LossWeights};
use crate::training::loss::{scalar, LossKind};

/// Number of composite outputs
pub const NUM_OUTPUTS: usize = 6;

/// Loss of each composite output
pub const OUTPUT_LOSSES: [LossKind; NUM_OUTPUTS] = [
    LossKind::Mse,
    LossKind::Mse,
    LossKind::Mae,
    LossKind::Mae,
    LossKind::Mae,
    LossKind::Mae,
];

/// Generators and discriminators of both domains
pub struct CycleGanModels {
    /// Translates domain A into domain B
    pub generator_ab: ModelHandle,
    /// Translates domain B into domain A
    pub generator_ba: ModelHandle,
    /// Scores domain A images
    pub discriminator_a: ModelHandle,
    /// Scores domain B images
    pub discriminator_b: ModelHandle,
}

impl CycleGanModels {
    /// Build the reference architecture for `(C, H, W)` images
    pub fn build(factory: &ConvGanFactory, input_shape: &[usize], device: &Device) -> Result<Self> {
        Ok(Self {
            generator_ab: factory.generator("generator_ab", input_shape, device)?,
            generator_ba: factory.generator("generator_ba", input_shape, device)?,
            discriminator_a: factory.discriminator("discriminator_a", input_shape, device)?,
            discriminator_b: factory.discriminator("discriminator_b", input_shape, device)?,
        })
    }

    /// All four models, generators first
    pub fn parameter_sets(&self) -> [&dyn ParameterSet; 4] {
        [
            &self.generator_ab,
            &self.generator_ba,
            &self.discriminator_a,
            &self.discriminator_b,
        ]
    }
}

/// Which generator loss component an output feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossComponent {
    Validity,
    Cycle,
    Identity,
}

/// Component of each composite output
pub const OUTPUT_COMPONENTS: [LossComponent; NUM_OUTPUTS] = [
    LossComponent::Validity,
    LossComponent::Validity,
    LossComponent::Cycle,
    LossComponent::Cycle,
    LossComponent::Identity,
    LossComponent::Identity,
];

/// All composite outputs for one batch pair
#[derive(Debug, Clone)]
pub struct CycleGanOutputs {
    /// `D_a(G_ba(b))`
    pub valid_a: Tensor,
    /// `D_b(G_ab(a))`
    pub valid_b: Tensor,
    /// `G_ba(G_ab(a))`
    pub reco_a: Tensor,
    /// `G_ab(G_ba(b))`
    pub reco_b: Tensor,
    /// `G_ba(a)`
    pub ident_a: Tensor,
    /// `G_ab(b)`
    pub ident_b: Tensor,
}

impl CycleGanOutputs {
    /// Outputs in composite order
    pub fn as_array(&self) -> [&Tensor; NUM_OUTPUTS] {
        [
            &self.valid_a,
            &self.valid_b,
            &self.reco_a,
            &self.reco_b,
            &self.ident_a,
            &self.ident_b,
        ]
    }
}

/// Weighted generator loss, split by component
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeneratorLosses {
    /// Weighted adversarial terms
    pub validity: f64,
    /// Weighted cycle terms
    pub cycle: f64,
    /// Weighted identity terms
    pub identity: f64,
    /// Sum of the above
    pub total: f64,
}

/// Composite of two generators and two discriminators
pub struct CycleGanPipeline {
    models: CycleGanModels,
    weights: [f64; NUM_OUTPUTS],
}

impl CycleGanPipeline {
    /// Assemble the pipeline; `variant` decides how identity outputs are weighted
    pub fn new(models: CycleGanModels, variant: &CycleGanVariant, weights: &LossWeights) -> Self {
        let identity = match variant {
            CycleGanVariant::Classic => weights.reconstruction,
            CycleGanVariant::Identity { .. } => weights.identity,
        };
        Self {
            models,
            weights: [
                weights.validation,
                weights.validation,
                weights.reconstruction,
                weights.reconstruction,
                identity,
                identity,
            ],
        }
    }

    /// Per-output loss weights in composite order
    pub fn loss_weights(&self) -> [f64; NUM_OUTPUTS] {
        self.weights
    }

    /// Underlying models
    pub fn models(&self) -> &CycleGanModels {
        &self.models
    }

    /// Trainable variables of both generators
    pub fn generator_vars(&self) -> Vec<Var> {
        let mut vars = self.models.generator_ab.trainable_vars();
        vars.extend(self.models.generator_ba.trainable_vars());
        vars
    }

    /// Translate domain A images into domain B
    pub fn translate_ab(&self, a: &Tensor) -> Result<Tensor> {
        self.models.generator_ab.forward(a)
    }

    /// Translate domain B images into domain A
    pub fn translate_ba(&self, b: &Tensor) -> Result<Tensor> {
        self.models.generator_ba.forward(b)
    }

    /// Compute every composite output
    pub fn forward(&self, a: &Tensor, b: &Tensor) -> Result<CycleGanOutputs> {
        let m = &self.models;
        let fake_b = m.generator_ab.forward(a)?;
        let fake_a = m.generator_ba.forward(b)?;
        Ok(CycleGanOutputs {
            reco_a: m.generator_ba.forward(&fake_b)?,
            reco_b: m.generator_ab.forward(&fake_a)?,
            ident_a: m.generator_ba.forward(a)?,
            ident_b: m.generator_ab.forward(b)?,
            valid_a: m.discriminator_a.forward(&fake_a)?,
            valid_b: m.discriminator_b.forward(&fake_b)?,
        })
    }

    /// Weighted sum of the per-output losses against `targets`
    pub fn generator_loss(
        &self,
        outputs: &CycleGanOutputs,
        targets: [&Tensor; NUM_OUTPUTS],
    ) -> Result<(Tensor, GeneratorLosses)> {
        let mut terms = Vec::with_capacity(NUM_OUTPUTS);
        let mut losses = GeneratorLosses::default();
        for (i, output) in outputs.as_array().into_iter().enumerate() {
            let term = (OUTPUT_LOSSES[i].compute(output, targets[i])? * self.weights[i])?;
            let value = scalar(&term)?;
            match OUTPUT_COMPONENTS[i] {
                LossComponent::Validity => losses.validity += value,
                LossComponent::Cycle => losses.cycle += value,
                LossComponent::Identity => losses.identity += value,
            }
            terms.push(term);
        }
        losses.total = losses.validity + losses.cycle + losses.identity;
        let total = Tensor::stack(&terms, 0)?.sum_all()?;
        Ok((total, losses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> CycleGanModels {
        CycleGanModels::build(&ConvGanFactory { filters: 2 }, &[1, 16, 16], &Device::Cpu).unwrap()
    }

    #[test]
    fn test_identity_variant_weights() {
        let pipeline = CycleGanPipeline::new(
            models(),
            &CycleGanVariant::Identity { patch_shape: vec![1, 1, 1] },
            &LossWeights::default(),
        );
        assert_eq!(pipeline.loss_weights(), [1.0, 1.0, 10.0, 10.0, 9.0, 9.0]);
    }

    #[test]
    fn test_classic_variant_weights() {
        let pipeline = CycleGanPipeline::new(models(), &CycleGanVariant::Classic, &LossWeights::default());
        assert_eq!(pipeline.loss_weights(), [1.0, 1.0, 10.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_output_shapes() {
        let pipeline = CycleGanPipeline::new(models(), &CycleGanVariant::Classic, &LossWeights::default());
        let a = Tensor::randn(0f32, 1f32, (2, 1, 16, 16), &Device::Cpu).unwrap();
        let b = Tensor::randn(0f32, 1f32, (2, 1, 16, 16), &Device::Cpu).unwrap();
        let out = pipeline.forward(&a, &b).unwrap();
        assert_eq!(out.valid_a.dims(), &[2, 1, 1, 1]);
        assert_eq!(out.valid_b.dims(), &[2, 1, 1, 1]);
        for image in [&out.reco_a, &out.reco_b, &out.ident_a, &out.ident_b] {
            assert_eq!(image.dims(), &[2, 1, 16, 16]);
        }
    }

    #[test]
    fn test_generator_loss_components_sum() {
        let pipeline = CycleGanPipeline::new(models(), &CycleGanVariant::Classic, &LossWeights::default());
        let a = Tensor::randn(0f32, 1f32, (2, 1, 16, 16), &Device::Cpu).unwrap();
        let b = Tensor::randn(0f32, 1f32, (2, 1, 16, 16), &Device::Cpu).unwrap();
        let valid = Tensor::ones((2, 1, 1, 1), candle_core::DType::F32, &Device::Cpu).unwrap();
        let out = pipeline.forward(&a, &b).unwrap();
        let (total, losses) = pipeline
            .generator_loss(&out, [&valid, &valid, &a, &b, &a, &b])
            .unwrap();
        let total = scalar(&total).unwrap();
        assert!((total - losses.total).abs() < 1e-3 * total.max(1.0));
        assert!(losses.validity > 0.0 && losses.cycle > 0.0 && losses.identity > 0.0);
    }
}
