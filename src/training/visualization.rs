//! Sample grid rendering
//!
//! Trainers hand a batch of images to a [`SampleRenderer`] and never read
//! anything back. [`ImageGridRenderer`] is the built-in implementation: it
//! tiles the batch into a grayscale grid and saves it in the format named by
//! the file extension (`.png` by default).

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Persists a batch of images as one grid
#[cfg_attr(test, mockall::automock)]
pub trait SampleRenderer {
    /// Render `images` (`(N, C, H, W)` or `(N, H, W)`) as a grid `columns`
    /// images wide and write it to `path`
    fn render(&self, images: &Tensor, columns: usize, path: &Path) -> Result<()>;
}

/// Value range of the images a renderer receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRange {
    /// Already in `[0, 1]`, e.g. sigmoid decoder outputs
    UnitInterval,
    /// In `[-1, 1]`, e.g. `tanh` generator outputs; mapped with `0.5 * (x + 1)`
    Symmetric,
}

/// Writes grayscale grids through the `image` encoders
#[derive(Debug, Clone)]
pub struct ImageGridRenderer {
    range: ValueRange,
    invert: bool,
    padding: usize,
}

impl ImageGridRenderer {
    /// Renderer for images in `range`; `invert` draws dark on light
    pub fn new(range: ValueRange, invert: bool) -> Self {
        Self {
            range,
            invert,
            padding: 1,
        }
    }

    /// Grayscale pixel intensities in `[0, 1]`, shape `(N, H, W)`
    fn intensities(&self, images: &Tensor) -> Result<Vec<Vec<Vec<f32>>>> {
        let images = images.to_device(&Device::Cpu)?.to_dtype(DType::F32)?;
        let gray = match images.rank() {
            4 => images.mean(1)?,
            3 => images,
            _ => {
                return Err(Error::invalid_input(format!(
                    "cannot render images of shape {:?}",
                    images.dims()
                )))
            }
        };
        let gray = match self.range {
            ValueRange::UnitInterval => gray,
            ValueRange::Symmetric => gray.affine(0.5, 0.5)?,
        };
        let gray = gray.clamp(0f32, 1f32)?;
        let gray = if self.invert { gray.affine(-1.0, 1.0)? } else { gray };
        Ok(gray.to_vec3::<f32>()?)
    }
}

impl SampleRenderer for ImageGridRenderer {
    fn render(&self, images: &Tensor, columns: usize, path: &Path) -> Result<()> {
        if columns == 0 {
            return Err(Error::invalid_input("grid needs at least one column"));
        }
        let tiles = self.intensities(images)?;
        let (height, width) = match tiles.first() {
            Some(tile) => (tile.len(), tile.first().map_or(0, Vec::len)),
            None => return Err(Error::invalid_input("cannot render an empty batch")),
        };
        let rows = tiles.len().div_ceil(columns);
        let pad = self.padding;
        let grid_w = columns * width + (columns - 1) * pad;
        let grid_h = rows * height + (rows - 1) * pad;
        let background = if self.invert { 255u8 } else { 0u8 };
        let mut pixels = vec![background; grid_w * grid_h];

        for (n, tile) in tiles.iter().enumerate() {
            let top = (n / columns) * (height + pad);
            let left = (n % columns) * (width + pad);
            for (y, row) in tile.iter().enumerate() {
                for (x, value) in row.iter().enumerate() {
                    pixels[(top + y) * grid_w + left + x] = (value * 255.0).round() as u8;
                }
            }
        }

        let grid = GrayImage::from_raw(grid_w as u32, grid_h as u32, pixels)
            .ok_or_else(|| Error::internal(format!("grid buffer does not fit {grid_w}x{grid_h}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        grid.save(path)?;
        debug!("Rendered {} images to {}", tiles.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_gray(path: &Path) -> GrayImage {
        image::open(path).unwrap().to_luma8()
    }

    #[test]
    fn test_grid_dimensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grid.png");
        let images = Tensor::zeros((5, 1, 4, 3), DType::F32, &Device::Cpu).unwrap();
        ImageGridRenderer::new(ValueRange::UnitInterval, false)
            .render(&images, 2, &path)
            .unwrap();

        // 2 columns of width 3 plus 1 padding, 3 rows of height 4 plus 2 padding
        let grid = read_gray(&path);
        assert_eq!(grid.dimensions(), (7, 14));
        assert!(grid.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_symmetric_range_is_rescaled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.png");
        let images = Tensor::new(&[[[-1f32, 0.0, 1.0, 3.0]]], &Device::Cpu).unwrap();
        ImageGridRenderer::new(ValueRange::Symmetric, false)
            .render(&images, 1, &path)
            .unwrap();

        assert_eq!(read_gray(&path).into_raw(), vec![0, 128, 255, 255]);
    }

    #[test]
    fn test_invert() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inv.png");
        let images = Tensor::new(&[[[0f32, 1.0]]], &Device::Cpu).unwrap();
        ImageGridRenderer::new(ValueRange::UnitInterval, true)
            .render(&images, 1, &path)
            .unwrap();
        assert_eq!(read_gray(&path).into_raw(), vec![255, 0]);
    }

    #[test]
    fn test_padding_uses_background() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pad.png");
        let images = Tensor::ones((2, 1, 1), DType::F32, &Device::Cpu).unwrap();
        ImageGridRenderer::new(ValueRange::UnitInterval, false)
            .render(&images, 2, &path)
            .unwrap();
        assert_eq!(read_gray(&path).into_raw(), vec![255, 0, 255]);
    }

    #[test]
    fn test_format_follows_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("grid.pgm");
        let images = Tensor::new(&[[[0f32, 1.0]]], &Device::Cpu).unwrap();
        ImageGridRenderer::new(ValueRange::UnitInterval, false)
            .render(&images, 1, &path)
            .unwrap();

        assert!(std::fs::read(&path).unwrap().starts_with(b"P5"));
        assert_eq!(read_gray(&path).into_raw(), vec![0, 255]);
    }

    #[test]
    fn test_unknown_extension_is_an_image_error() {
        let dir = TempDir::new().unwrap();
        let images = Tensor::zeros((1, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let result = ImageGridRenderer::new(ValueRange::UnitInterval, false).render(
            &images,
            1,
            &dir.path().join("grid.unknown"),
        );
        assert!(matches!(result, Err(Error::Image(_))));
    }

    #[test]
    fn test_rejects_flat_batches() {
        let dir = TempDir::new().unwrap();
        let images = Tensor::zeros((2, 8), DType::F32, &Device::Cpu).unwrap();
        let result = ImageGridRenderer::new(ValueRange::UnitInterval, false).render(
            &images,
            2,
            &dir.path().join("x.png"),
        );
        assert!(result.is_err());
    }
}
