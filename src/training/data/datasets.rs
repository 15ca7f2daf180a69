//! In-memory image datasets

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A finite set of same-shaped samples, stored as one `(N, ...)` tensor
#[derive(Debug, Clone)]
pub struct ImageDataset {
    /// All samples, first dimension indexes them
    images: Tensor,
}

impl ImageDataset {
    /// Wrap a tensor whose first dimension indexes samples
    pub fn new(images: Tensor) -> Result<Self> {
        if images.rank() < 2 {
            return Err(Error::invalid_input(format!(
                "dataset tensor needs a sample dimension and at least one feature dimension, got {:?}",
                images.dims()
            )));
        }
        Ok(Self {
            images: images.to_dtype(DType::F32)?,
        })
    }

    /// Load the tensor stored under `key` in a safetensors file
    pub fn from_safetensors<P: AsRef<Path>>(path: P, key: &str, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let mut tensors = candle_core::safetensors::load(path, device)?;
        let images = tensors.remove(key).ok_or_else(|| {
            Error::invalid_input(format!("no tensor named '{key}' in {}", path.display()))
        })?;
        let dataset = Self::new(images)?;
        info!(
            "Loaded {} samples of shape {:?} from {}:{}",
            dataset.len(),
            dataset.sample_shape(),
            path.display(),
            key
        );
        Ok(dataset)
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    /// Whether the dataset holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-sample shape, without the sample dimension
    pub fn sample_shape(&self) -> &[usize] {
        &self.images.dims()[1..]
    }

    /// The backing tensor
    pub fn images(&self) -> &Tensor {
        &self.images
    }

    /// Device the samples live on
    pub fn device(&self) -> &Device {
        self.images.device()
    }

    /// The first `n` samples (fewer if the dataset is smaller)
    pub fn head(&self, n: usize) -> Result<Tensor> {
        Ok(self.images.narrow(0, 0, n.min(self.len()))?)
    }

    /// Gather the samples at `indices`, in order
    pub fn select(&self, indices: &[usize]) -> Result<Tensor> {
        select_rows(&self.images, indices)
    }
}

pub(crate) fn select_rows(images: &Tensor, indices: &[usize]) -> Result<Tensor> {
    let ids = indices
        .iter()
        .map(|&i| u32::try_from(i).map_err(|_| Error::invalid_input(format!("sample index {i} overflows u32"))))
        .collect::<Result<Vec<u32>>>()?;
    debug!("Gathering {} samples", ids.len());
    let ids = Tensor::from_vec(ids, indices.len(), images.device())?;
    Ok(images.index_select(&ids, 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_dataset_shapes() {
        let images = Tensor::zeros((10, 1, 4, 4), DType::F32, &Device::Cpu).unwrap();
        let dataset = ImageDataset::new(images).unwrap();
        assert_eq!(dataset.len(), 10);
        assert_eq!(dataset.sample_shape(), &[1, 4, 4]);
        assert_eq!(dataset.head(3).unwrap().dims(), &[3, 1, 4, 4]);
        assert_eq!(dataset.head(50).unwrap().dims(), &[10, 1, 4, 4]);
    }

    #[test]
    fn test_select_preserves_order() {
        let images = Tensor::arange(0f32, 6f32, &Device::Cpu)
            .unwrap()
            .reshape((6, 1))
            .unwrap();
        let dataset = ImageDataset::new(images).unwrap();
        let picked = dataset.select(&[4, 1, 3]).unwrap();
        assert_eq!(picked.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![4.0, 1.0, 3.0]);
    }

    #[test]
    fn test_rejects_rank_one() {
        let images = Tensor::zeros(5, DType::F32, &Device::Cpu).unwrap();
        assert!(ImageDataset::new(images).is_err());
    }

    #[test]
    fn test_from_safetensors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.safetensors");
        let mut tensors = HashMap::new();
        tensors.insert(
            "train".to_string(),
            Tensor::ones((3, 1, 2, 2), DType::F32, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let dataset = ImageDataset::from_safetensors(&path, "train", &Device::Cpu).unwrap();
        assert_eq!(dataset.len(), 3);
        assert!(ImageDataset::from_safetensors(&path, "valid", &Device::Cpu).is_err());
    }
}
