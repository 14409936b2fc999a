//! Grayscale image samples and input/target pairs.
//!
//! Every image flowing through the pipeline is a single-channel
//! [`ImageSample`] with contiguous rows (stride == width).

use std::path::Path;

use image::{ImageFormat, Luma};
use imgref::ImgVec;

use crate::error::{Error, Result};

/// Single-channel floating-point image, row-major.
pub type ImageSample = ImgVec<f32>;

/// Input/target pair produced by the pipeline.
///
/// For clean pipelines both images are equal; for corrupted pipelines only
/// `input` is perturbed.
#[derive(Debug, Clone)]
pub struct ImagePair {
    /// Image fed to the model.
    pub input: ImageSample,
    /// Ground truth the reconstruction is scored against.
    pub target: ImageSample,
}

impl ImagePair {
    /// Create a pair whose input is a copy of the target.
    #[must_use]
    pub fn identity(target: ImageSample) -> Self {
        Self {
            input: target.clone(),
            target,
        }
    }
}

/// Image dimensions as (width, height).
#[must_use]
pub fn dimensions(img: &ImageSample) -> (usize, usize) {
    (img.width(), img.height())
}

/// Rescale an image in place so its values span exactly [0, 1].
///
/// Constant images have no range to stretch and are set to all zeros.
pub fn min_max_normalize(img: &mut ImageSample) {
    let (min, max) = min_max(img.buf());
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        img.buf_mut().iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    for v in img.buf_mut().iter_mut() {
        *v = (*v - min) / range;
    }
}

/// Minimum and maximum of a pixel buffer.
///
/// Returns `(+inf, -inf)` for an empty buffer.
#[must_use]
pub fn min_max(data: &[f32]) -> (f32, f32) {
    data.iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Write an image as an 8-bit grayscale JPEG.
///
/// Values are clamped to [0, 1] before quantization.
pub fn save_jpeg(img: &ImageSample, path: &Path) -> Result<()> {
    save_gray(img, path, ImageFormat::Jpeg)
}

/// Write an image as an 8-bit grayscale PNG.
pub fn save_png(img: &ImageSample, path: &Path) -> Result<()> {
    save_gray(img, path, ImageFormat::Png)
}

fn save_gray(img: &ImageSample, path: &Path, format: ImageFormat) -> Result<()> {
    let (w, h) = dimensions(img);
    let mut out = image::GrayImage::new(w as u32, h as u32);
    for (i, &v) in img.buf().iter().enumerate() {
        let val = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        out.put_pixel((i % w) as u32, (i / w) as u32, Luma([val]));
    }
    out.save_with_format(path, format)
        .map_err(|e| Error::ImageWrite {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_spans_unit_range() {
        let mut img = ImgVec::new(vec![2.0, 4.0, 6.0, 10.0], 2, 2);
        min_max_normalize(&mut img);
        assert_eq!(img.buf().as_slice(), &[0.0, 0.25, 0.5, 1.0]);
    }

    #[test]
    fn test_normalize_constant_image_is_zero() {
        let mut img = ImgVec::new(vec![0.7; 9], 3, 3);
        min_max_normalize(&mut img);
        assert!(img.buf().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_identity_pair_copies_target() {
        let pair = ImagePair::identity(ImgVec::new(vec![0.0, 1.0], 2, 1));
        assert_eq!(pair.input.buf(), pair.target.buf());
    }

    #[test]
    fn test_save_png_roundtrip_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let img = ImgVec::new(vec![0.0, 0.5, 1.0, 0.25, 0.75, 0.1], 3, 2);
        save_png(&img, &path).unwrap();

        let decoded = image::open(&path).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(2, 0)[0], 255);
        assert_eq!(decoded.get_pixel(0, 0)[0], 0);
    }
}
