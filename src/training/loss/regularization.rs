//! Latent regularization

use candle_core::Tensor;

use crate::error::Result;

/// Closed-form KL divergence of `N(mean, exp(log_var))` from `N(0, 1)`:
/// `-0.5 * mean(1 + log_var - mean^2 - exp(log_var))`
pub fn kl_loss(log_var: &Tensor, mean: &Tensor) -> Result<Tensor> {
    let term = ((log_var + 1.0)? - mean.sqr()?)?;
    let term = term.sub(&log_var.exp()?)?;
    Ok((term.mean_all()? * -0.5)?)
}
