//! Raw input images
//!
//! Pixels are 8-bit samples stored plane after plane (`channels × height ×
//! width`), the same layout as feature maps. Files carry no header; their
//! geometry is declared by the caller.

use crate::error::{CnnError, Result};
use crate::shapes::MapGeometry;
use bytes::Bytes;
use std::path::Path;

/// Headerless 8-bit image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Columns
    pub width: usize,
    /// Rows
    pub height: usize,
    /// Planes
    pub channels: usize,
    /// Pixel data, `channels × height × width`
    pub pixels: Bytes,
}

impl RawImage {
    /// Wrap pixel data of the declared size
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the data length does not match.
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        pixels: impl Into<Bytes>,
    ) -> Result<Self> {
        let pixels = pixels.into();
        let expected = width * height * channels;
        if pixels.len() != expected {
            return Err(CnnError::invalid_config(format!(
                "image holds {} bytes, {channels}x{height}x{width} needs {expected}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    /// Read a headerless image file
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the path does not exist, `Io` if it cannot
    /// be read, and `InvalidConfig` if its size does not match.
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading image from: {}", path.display());

        if !path.exists() {
            return Err(CnnError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let data = std::fs::read(path)?;
        Self::new(width, height, channels, data)
    }

    /// Geometry of the image as feature maps
    pub const fn geometry(&self) -> MapGeometry {
        MapGeometry::new(self.channels, self.height, self.width)
    }

    /// Mean and contrast normalization
    ///
    /// Returns the float maps `(p - mean) / sqrt(variance)` together with
    /// the mean and (population) variance over all pixels. A flat image
    /// has zero variance and is only mean-shifted.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn mean_normalize(&self) -> (Vec<f32>, f32, f32) {
        if self.pixels.is_empty() {
            return (Vec::new(), 0.0, 0.0);
        }
        let n = self.pixels.len() as f64;
        let mean = self.pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / n;
        let variance = self
            .pixels
            .iter()
            .map(|&p| (f64::from(p) - mean).powi(2))
            .sum::<f64>()
            / n;

        let scale = if variance > 0.0 { variance.sqrt().recip() } else { 1.0 };
        let maps = self
            .pixels
            .iter()
            .map(|&p| ((f64::from(p) - mean) * scale) as f32)
            .collect();
        (maps, mean as f32, variance as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn normalized_image_has_zero_mean_unit_variance() {
        let img = RawImage::new(2, 2, 1, vec![0u8, 50, 100, 250]).unwrap();
        let (maps, mean, var) = img.mean_normalize();
        assert!((mean - 100.0).abs() < 1e-4);
        assert!((var - 8750.0).abs() < 1e-2);

        let m: f32 = maps.iter().sum::<f32>() / 4.0;
        let v: f32 = maps.iter().map(|x| (x - m).powi(2)).sum::<f32>() / 4.0;
        assert!(m.abs() < 1e-6);
        assert!((v - 1.0).abs() < 1e-5);
    }

    #[test]
    fn flat_image_is_only_shifted() {
        let img = RawImage::new(3, 1, 1, vec![7u8; 3]).unwrap();
        let (maps, mean, var) = img.mean_normalize();
        assert_eq!(maps, vec![0.0; 3]);
        assert_eq!((mean, var), (7.0, 0.0));
    }

    #[test]
    fn size_is_checked() {
        assert!(matches!(
            RawImage::new(4, 4, 1, vec![0u8; 15]),
            Err(CnnError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4, 5, 6]).unwrap();
        let img = RawImage::from_file(file.path(), 3, 1, 2).unwrap();
        assert_eq!(img.geometry(), MapGeometry::new(2, 1, 3));
        assert_eq!(&img.pixels[..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = RawImage::from_file(dir.path().join("absent.raw"), 1, 1, 1).unwrap_err();
        assert!(matches!(err, CnnError::FileNotFound { .. }));
    }
}
