//! Per-sample decoding: file → normalized grayscale [`ImageSample`].

use std::path::Path;

use image::imageops::{self, FilterType};
use imgref::ImgVec;

use crate::error::{Error, Result};
use crate::sample::{ImagePair, ImageSample, min_max_normalize};

/// Decode a file into a normalized single-channel image.
///
/// Colour images are converted to luma. When `resize` is set and differs from
/// `native`, the image is resized bilinearly to `(height, width)`. The result
/// is min-max normalized to [0, 1].
pub fn parse_image(
    path: &Path,
    resize: Option<(usize, usize)>,
    native: (usize, usize),
) -> Result<ImageSample> {
    let decoded = image::open(path).map_err(|e| Error::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut luma = decoded.to_luma32f();

    if let Some((h, w)) = resize {
        if (h, w) != native && luma.dimensions() != (w as u32, h as u32) {
            luma = imageops::resize(&luma, w as u32, h as u32, FilterType::Triangle);
        }
    }

    let (w, h) = luma.dimensions();
    if w == 0 || h == 0 {
        return Err(Error::Decode {
            path: path.to_path_buf(),
            reason: "image has no pixels".to_string(),
        });
    }

    let mut img = ImgVec::new(luma.into_raw(), w as usize, h as usize);
    min_max_normalize(&mut img);
    Ok(img)
}

/// Decode a file into an identity input/target pair.
pub fn parse_pair(
    path: &Path,
    resize: Option<(usize, usize)>,
    native: (usize, usize),
) -> Result<ImagePair> {
    parse_image(path, resize, native).map(ImagePair::identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage, Rgb};

    #[test]
    fn test_decode_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        let img = GrayImage::from_fn(4, 4, |x, y| Luma([(50 + 10 * (x + y)) as u8]));
        img.save(&path).unwrap();

        let sample = parse_image(&path, None, (256, 256)).unwrap();
        assert_eq!((sample.width(), sample.height()), (4, 4));
        let (lo, hi) = crate::sample::min_max(sample.buf());
        assert_eq!(lo, 0.0);
        assert!((hi - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_resizes_to_height_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        GrayImage::from_fn(16, 8, |x, _| Luma([(x * 16) as u8]))
            .save(&path)
            .unwrap();

        let sample = parse_image(&path, Some((4, 6)), (256, 256)).unwrap();
        assert_eq!(sample.width(), 6);
        assert_eq!(sample.height(), 4);
    }

    #[test]
    fn test_native_resolution_skips_resize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        GrayImage::from_fn(5, 3, |x, y| Luma([(x * 40 + y) as u8]))
            .save(&path)
            .unwrap();

        let sample = parse_image(&path, Some((8, 8)), (8, 8)).unwrap();
        assert_eq!((sample.width(), sample.height()), (5, 3));
    }

    #[test]
    fn test_colour_converted_to_single_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");
        RgbImage::from_fn(3, 3, |x, _| Rgb([(x * 100) as u8, 0, 0]))
            .save(&path)
            .unwrap();

        let sample = parse_image(&path, None, (256, 256)).unwrap();
        assert_eq!(sample.buf().len(), 9);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        let err = parse_image(&path, None, (256, 256)).unwrap_err();
        match err {
            Error::Decode { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pair_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.png");
        GrayImage::from_fn(2, 2, |x, y| Luma([(x * 200 + y * 20) as u8]))
            .save(&path)
            .unwrap();

        let pair = parse_pair(&path, None, (256, 256)).unwrap();
        assert_eq!(pair.input.buf(), pair.target.buf());
    }
}
