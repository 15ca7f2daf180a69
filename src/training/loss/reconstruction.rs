//! Reconstruction losses

use candle_core::Tensor;

use crate::error::{Error, Result};

/// Probabilities are clamped to `[EPSILON, 1 - EPSILON]` before taking logs
pub const EPSILON: f32 = 1e-7;

/// Mean binary cross-entropy over every element
pub fn binary_cross_entropy(targets: &Tensor, probabilities: &Tensor) -> Result<Tensor> {
    let p = probabilities.clamp(EPSILON, 1.0f32 - EPSILON)?;
    let positive = targets.mul(&p.log()?)?;
    let negative = targets.affine(-1.0, 1.0)?.mul(&p.affine(-1.0, 1.0)?.log()?)?;
    Ok((positive + negative)?.mean_all()?.neg()?)
}

/// VAE reconstruction term: mean BCE times the flattened per-sample feature count
pub fn reconstruction_loss(inputs: &Tensor, reconstructions: &Tensor) -> Result<Tensor> {
    if inputs.dims() != reconstructions.dims() {
        return Err(Error::invalid_input(format!(
            "reconstruction shape {:?} does not match input shape {:?}",
            reconstructions.dims(),
            inputs.dims()
        )));
    }
    let features: usize = inputs.dims().iter().skip(1).product();
    let bce = binary_cross_entropy(inputs, reconstructions)?;
    Ok((bce * features as f64)?)
}

/// Mean squared error
pub fn mse(predictions: &Tensor, targets: &Tensor) -> Result<Tensor> {
    Ok(predictions.sub(targets)?.sqr()?.mean_all()?)
}

/// Mean absolute error
pub fn mae(predictions: &Tensor, targets: &Tensor) -> Result<Tensor> {
    Ok(predictions.sub(targets)?.abs()?.mean_all()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::loss::scalar;
    use approx::assert_relative_eq;
    use candle_core::Device;

    #[test]
    fn test_bce_known_value() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[1f32, 0.0], &device).unwrap();
        let probs = Tensor::new(&[0.5f32, 0.5], &device).unwrap();
        let loss = scalar(&binary_cross_entropy(&targets, &probs).unwrap()).unwrap();
        assert_relative_eq!(loss, std::f64::consts::LN_2, epsilon = 1e-5);
    }

    #[test]
    fn test_bce_is_finite_at_saturation() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[1f32, 0.0], &device).unwrap();
        let probs = Tensor::new(&[0f32, 1.0], &device).unwrap();
        let loss = scalar(&binary_cross_entropy(&targets, &probs).unwrap()).unwrap();
        assert!(loss.is_finite());
        assert!(loss > 10.0);
    }

    #[test]
    fn test_reconstruction_loss_scales_by_features() {
        let device = Device::Cpu;
        let inputs = Tensor::full(1f32, (2, 1, 3, 3), &device).unwrap();
        let recon = Tensor::full(0.5f32, (2, 1, 3, 3), &device).unwrap();
        let bce = scalar(&binary_cross_entropy(&inputs, &recon).unwrap()).unwrap();
        let rec = scalar(&reconstruction_loss(&inputs, &recon).unwrap()).unwrap();
        assert_relative_eq!(rec, bce * 9.0, epsilon = 1e-5);
    }

    #[test]
    fn test_reconstruction_shape_mismatch() {
        let device = Device::Cpu;
        let a = Tensor::zeros((2, 4), candle_core::DType::F32, &device).unwrap();
        let b = Tensor::zeros((2, 5), candle_core::DType::F32, &device).unwrap();
        assert!(reconstruction_loss(&a, &b).is_err());
    }

    #[test]
    fn test_mse_and_mae() {
        let device = Device::Cpu;
        let p = Tensor::new(&[1f32, 3.0], &device).unwrap();
        let t = Tensor::new(&[0f32, 0.0], &device).unwrap();
        assert_relative_eq!(scalar(&mse(&p, &t).unwrap()).unwrap(), 5.0, epsilon = 1e-6);
        assert_relative_eq!(scalar(&mae(&p, &t).unwrap()).unwrap(), 2.0, epsilon = 1e-6);
    }
}
