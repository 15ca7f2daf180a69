//! Optimizers and learning-rate control
//!
//! Parameter updates are delegated to `candle_nn`'s AdamW and SGD. Each model
//! gets its own [`ModelOptimizer`], and every step is told explicitly whether
//! its parameters may move ([`UpdateMode`]).

pub mod schedulers;

pub use schedulers::{reduce_lr, PlateauState, ReduceOnPlateau, SchedulerStateDict};

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW, SGD};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::training::config::{OptimizerConfig, OptimizerType};

/// Whether a step may change a model's parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Apply the gradients
    Update,
    /// Keep the parameters as they are
    Frozen,
}

enum Inner {
    AdamW(AdamW),
    Sgd(SGD),
}

/// Optimizer over one model's trainable variables
pub struct ModelOptimizer {
    /// Optimizer name
    name: &'static str,

    inner: Inner,

    /// Steps that actually updated parameters
    step_count: usize,

    /// Scalar parameters covered
    parameter_count: usize,
}

impl ModelOptimizer {
    /// Build the configured optimizer over `vars`
    pub fn new(vars: Vec<Var>, config: &OptimizerConfig) -> Result<Self> {
        let parameter_count = vars.iter().map(|v| v.elem_count()).sum();
        let (name, inner) = match config.optimizer_type {
            OptimizerType::Adam | OptimizerType::AdamW => {
                let weight_decay = if config.optimizer_type == OptimizerType::Adam {
                    0.0
                } else {
                    config.weight_decay
                };
                let params = ParamsAdamW {
                    lr: config.learning_rate,
                    beta1: config.beta1,
                    beta2: config.beta2,
                    eps: config.epsilon,
                    weight_decay,
                };
                let name = if weight_decay == 0.0 { "adam" } else { "adamw" };
                (name, Inner::AdamW(AdamW::new(vars, params)?))
            }
            OptimizerType::Sgd => ("sgd", Inner::Sgd(SGD::new(vars, config.learning_rate)?)),
        };
        debug!("Created {} optimizer over {} parameters", name, parameter_count);
        Ok(Self {
            name,
            inner,
            step_count: 0,
            parameter_count,
        })
    }

    /// Optimizer name
    pub fn name(&self) -> &str {
        self.name
    }

    /// Apply gradients unless the model is frozen for this phase
    pub fn step(&mut self, grads: &GradStore, mode: UpdateMode) -> Result<()> {
        if mode == UpdateMode::Frozen {
            return Ok(());
        }
        match &mut self.inner {
            Inner::AdamW(opt) => opt.step(grads)?,
            Inner::Sgd(opt) => opt.step(grads)?,
        }
        self.step_count += 1;
        Ok(())
    }

    /// Backpropagate `loss` and apply the gradients
    pub fn backward_step(&mut self, loss: &Tensor, mode: UpdateMode) -> Result<()> {
        if mode == UpdateMode::Frozen {
            return Ok(());
        }
        let grads = loss.backward()?;
        self.step(&grads, mode)
    }

    /// Get current learning rate
    pub fn learning_rate(&self) -> f64 {
        match &self.inner {
            Inner::AdamW(opt) => opt.learning_rate(),
            Inner::Sgd(opt) => opt.learning_rate(),
        }
    }

    /// Set learning rate
    pub fn set_learning_rate(&mut self, lr: f64) {
        match &mut self.inner {
            Inner::AdamW(opt) => opt.set_learning_rate(lr),
            Inner::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }

    /// Number of applied updates
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Number of scalar parameters this optimizer moves
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }
}

/// Create an optimizer from configuration
pub fn create_optimizer(vars: Vec<Var>, config: &OptimizerConfig) -> Result<ModelOptimizer> {
    ModelOptimizer::new(vars, config)
}
