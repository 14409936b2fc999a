//! Image corruption primitives and stochastic augmentation.
//!
//! The primitives ([`dropout`], [`gaussian_noise`], [`cutout`],
//! [`gaussian_blur_3x3`]) operate on a single [`ImageSample`] in place.
//! [`Augmenter`] draws random corruption levels per call, and [`Corruption`]
//! applies caller-chosen levels for controlled inspection.
//!
//! All randomness comes from the generator passed in, so seeded runs are
//! reproducible.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sample::{ImagePair, ImageSample, min_max_normalize};

/// Kernel side of the blur corruption.
const BLUR_KERNEL_SIZE: usize = 3;

/// Zero each pixel with probability `rate`, scaling survivors by `1 / (1 - rate)`.
///
/// `rate` outside `(0, 1)` leaves the image untouched.
pub fn dropout<R: Rng + ?Sized>(img: &mut ImageSample, rate: f32, rng: &mut R) {
    if !(rate > 0.0 && rate < 1.0) {
        return;
    }
    let keep_scale = 1.0 / (1.0 - rate);
    for v in img.buf_mut().iter_mut() {
        if rng.gen_range(0.0f32..1.0) < rate {
            *v = 0.0;
        } else {
            *v *= keep_scale;
        }
    }
}

/// Add zero-mean Gaussian noise with standard deviation `std_dev`.
pub fn gaussian_noise<R: Rng + ?Sized>(img: &mut ImageSample, std_dev: f32, rng: &mut R) {
    if std_dev <= 0.0 {
        return;
    }
    for v in img.buf_mut().iter_mut() {
        let z: f64 = StandardNormal.sample(rng);
        *v += std_dev * z as f32;
    }
}

/// Zero a `size` x `size` square whose top-left corner is `(row, col)`.
///
/// The square is clipped to the image; pixels outside it are not modified.
pub fn cutout(img: &mut ImageSample, size: usize, offset: (usize, usize)) {
    let (w, h) = (img.width(), img.height());
    let (row, col) = offset;
    let row_end = row.saturating_add(size).min(h);
    let col_end = col.saturating_add(size).min(w);
    let buf = img.buf_mut();
    for y in row.min(h)..row_end {
        for x in col.min(w)..col_end {
            buf[y * w + x] = 0.0;
        }
    }
}

/// Blur with a 3x3 Gaussian kernel of the given sigma, reflecting at borders.
pub fn gaussian_blur_3x3(img: &mut ImageSample, sigma: f32) {
    if sigma <= 0.0 {
        return;
    }
    let kernel = gaussian_kernel(BLUR_KERNEL_SIZE, sigma);
    let (w, h) = (img.width(), img.height());
    let radius = (BLUR_KERNEL_SIZE / 2) as isize;

    let src = img.buf().clone();
    let mut rows = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            rows[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, kv)| kv * src[y * w + reflect(x as isize + k as isize - radius, w)])
                .sum();
        }
    }

    let out = img.buf_mut();
    for y in 0..h {
        for x in 0..w {
            out[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, kv)| kv * rows[reflect(y as isize + k as isize - radius, h) * w + x])
                .sum();
        }
    }
}

/// Normalized 1D Gaussian kernel centred on the middle tap.
pub(crate) fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let center = (size as f32 - 1.0) / 2.0;
    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - center;
            (-x * x / s2).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Mirror an out-of-range index back into `0..len` without repeating the edge.
fn reflect(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let n = len as isize;
    let period = 2 * (n - 1);
    let m = i.rem_euclid(period);
    (if m < n { m } else { period - m }) as usize
}

/// Random corruption applied to training inputs.
///
/// Each call draws a dropout rate and a noise level uniformly from
/// `[0, max_dropout)` and `[0, max_noise)`, then independently decides whether
/// to cut out a square and whether to blur.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Augmenter {
    /// Upper bound (exclusive) of the per-call dropout rate.
    pub max_dropout: f32,
    /// Upper bound (exclusive) of the per-call noise standard deviation.
    pub max_noise: f32,
    /// Probability of applying a cutout.
    pub cutout_probability: f32,
    /// Half-open range of cutout side lengths.
    pub cutout_size: (usize, usize),
    /// Half-open range of cutout offsets, shared by both axes.
    pub cutout_offset: (usize, usize),
    /// Probability of applying the blur.
    pub blur_probability: f32,
    /// Blur sigma.
    pub blur_sigma: f32,
}

impl Default for Augmenter {
    fn default() -> Self {
        Self {
            max_dropout: 0.04,
            max_noise: 0.04,
            cutout_probability: 0.2,
            cutout_size: (10, 40),
            cutout_offset: (10, 100),
            blur_probability: 0.1,
            blur_sigma: 0.6,
        }
    }
}

impl Augmenter {
    /// Corrupt the input of a pair. The target is returned untouched.
    pub fn apply<R: Rng + ?Sized>(&self, pair: ImagePair, rng: &mut R) -> ImagePair {
        let ImagePair { mut input, target } = pair;
        self.corrupt(&mut input, rng);
        ImagePair { input, target }
    }

    /// Corrupt a single image in place and renormalize it.
    pub fn corrupt<R: Rng + ?Sized>(&self, img: &mut ImageSample, rng: &mut R) {
        let rate = rng.gen_range(0.0..self.max_dropout.max(f32::EPSILON));
        let noise = rng.gen_range(0.0..self.max_noise.max(f32::EPSILON));
        dropout(img, rate, rng);
        gaussian_noise(img, noise, rng);

        let cut_draw = rng.gen_range(0.0f32..1.0);
        let blur_draw = rng.gen_range(0.0f32..1.0);
        if cut_draw < self.cutout_probability {
            let size = rng.gen_range(self.cutout_size.0..self.cutout_size.1);
            let offset = rng.gen_range(self.cutout_offset.0..self.cutout_offset.1);
            cutout(img, size, (offset, offset));
        }
        if blur_draw < self.blur_probability {
            gaussian_blur_3x3(img, self.blur_sigma);
        }

        min_max_normalize(img);
    }
}

/// Square cutout placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cutout {
    /// Side length in pixels.
    pub size: usize,
    /// Top-left corner as (row, column).
    pub offset: (usize, usize),
}

/// Caller-controlled corruption levels.
///
/// Unset fields are skipped. Applied in the order dropout, noise, cutout,
/// blur, followed by renormalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corruption {
    /// Dropout rate in `[0, 1)`.
    pub dropout: Option<f32>,
    /// Gaussian noise standard deviation.
    pub noise: Option<f32>,
    /// Square cutout.
    pub cutout: Option<Cutout>,
    /// Sigma of the 3x3 Gaussian blur.
    pub blur: Option<f32>,
}

impl Corruption {
    /// Check that every configured level is usable.
    pub fn validate(&self) -> Result<()> {
        if let Some(rate) = self.dropout {
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::Config(format!("dropout rate {rate} outside [0, 1)")));
            }
        }
        if let Some(noise) = self.noise {
            if !noise.is_finite() || noise < 0.0 {
                return Err(Error::Config(format!("noise level {noise} must be >= 0")));
            }
        }
        if let Some(sigma) = self.blur {
            if !sigma.is_finite() || sigma <= 0.0 {
                return Err(Error::Config(format!("blur sigma {sigma} must be > 0")));
            }
        }
        Ok(())
    }

    /// Whether no corruption is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dropout.is_none() && self.noise.is_none() && self.cutout.is_none() && self.blur.is_none()
    }

    /// Return a corrupted, renormalized copy of `img`.
    pub fn apply<R: Rng + ?Sized>(&self, img: &ImageSample, rng: &mut R) -> Result<ImageSample> {
        self.validate()?;
        let mut out = img.clone();
        if let Some(rate) = self.dropout {
            dropout(&mut out, rate, rng);
        }
        if let Some(noise) = self.noise {
            gaussian_noise(&mut out, noise, rng);
        }
        if let Some(Cutout { size, offset }) = self.cutout {
            cutout(&mut out, size, offset);
        }
        if let Some(sigma) = self.blur {
            gaussian_blur_3x3(&mut out, sigma);
        }
        min_max_normalize(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::ImgVec;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ramp(w: usize, h: usize) -> ImageSample {
        let n = w * h;
        ImgVec::new((0..n).map(|i| i as f32 / (n - 1) as f32).collect(), w, h)
    }

    #[test]
    fn test_cutout_top_left_block() {
        let mut img = ImgVec::new(vec![1.0f32; 16], 4, 4);
        cutout(&mut img, 2, (0, 0));
        #[rustfmt::skip]
        let expected = [
            0.0, 0.0, 1.0, 1.0,
            0.0, 0.0, 1.0, 1.0,
            1.0, 1.0, 1.0, 1.0,
            1.0, 1.0, 1.0, 1.0,
        ];
        assert_eq!(img.buf().as_slice(), &expected);
    }

    #[test]
    fn test_cutout_only_touches_square() {
        let original = ramp(8, 6);
        let mut img = original.clone();
        cutout(&mut img, 3, (2, 4));
        for y in 0..6 {
            for x in 0..8 {
                let v = img.buf()[y * 8 + x];
                if (2..5).contains(&y) && (4..7).contains(&x) {
                    assert_eq!(v, 0.0);
                } else {
                    assert_eq!(v, original.buf()[y * 8 + x]);
                }
            }
        }
    }

    #[test]
    fn test_cutout_clipped_at_border() {
        let mut img = ImgVec::new(vec![1.0f32; 16], 4, 4);
        cutout(&mut img, 10, (3, 3));
        assert_eq!(img.buf().iter().filter(|&&v| v == 0.0).count(), 1);
        assert_eq!(img.buf()[15], 0.0);
    }

    #[test]
    fn test_dropout_zero_rate_is_noop() {
        let mut rng = StdRng::seed_from_u64(1);
        let original = ramp(5, 5);
        let mut img = original.clone();
        dropout(&mut img, 0.0, &mut rng);
        assert_eq!(img.buf(), original.buf());
    }

    #[test]
    fn test_dropout_scales_survivors() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut img = ImgVec::new(vec![0.5f32; 400], 20, 20);
        dropout(&mut img, 0.5, &mut rng);
        let zeros = img.buf().iter().filter(|&&v| v == 0.0).count();
        assert!(zeros > 100 && zeros < 300, "zeros = {zeros}");
        assert!(img.buf().iter().all(|&v| v == 0.0 || (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_blur_preserves_constant_image() {
        let mut img = ImgVec::new(vec![0.25f32; 25], 5, 5);
        gaussian_blur_3x3(&mut img, 0.6);
        assert!(img.buf().iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_blur_spreads_impulse() {
        let mut data = vec![0.0f32; 25];
        data[12] = 1.0;
        let mut img = ImgVec::new(data, 5, 5);
        gaussian_blur_3x3(&mut img, 0.6);
        let buf = img.buf();
        assert!(buf[12] < 1.0);
        assert!(buf[11] > 0.0 && (buf[11] - buf[13]).abs() < 1e-6);
        assert_eq!(buf[0], 0.0);
        let total: f32 = buf.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_reflect_indices() {
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(2, 5), 2);
        assert_eq!(reflect(-1, 1), 0);
    }

    #[test]
    fn test_augmenter_leaves_target_untouched() {
        let mut rng = StdRng::seed_from_u64(7);
        let target = ramp(16, 16);
        let pair = Augmenter::default().apply(ImagePair::identity(target.clone()), &mut rng);
        assert_eq!(pair.target.buf(), target.buf());
    }

    #[test]
    fn test_augmenter_is_reproducible_with_seed() {
        let augmenter = Augmenter::default();
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            augmenter
                .apply(ImagePair::identity(ramp(32, 32)), &mut rng)
                .input
                .into_buf()
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn test_augmented_input_is_normalized() {
        let mut rng = StdRng::seed_from_u64(11);
        let pair = Augmenter::default().apply(ImagePair::identity(ramp(32, 32)), &mut rng);
        let (lo, hi) = crate::sample::min_max(pair.input.buf());
        assert!(lo.abs() < 1e-6);
        assert!((hi - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_corruption_order_and_renormalization() {
        let mut rng = StdRng::seed_from_u64(3);
        let corruption = Corruption {
            cutout: Some(Cutout { size: 2, offset: (0, 0) }),
            ..Corruption::default()
        };
        let img = ImgVec::new(vec![0.5f32; 16], 4, 4);
        let out = corruption.apply(&img, &mut rng).unwrap();
        // After cutout the image holds 0 and 0.5, which stretch to 0 and 1.
        assert_eq!(out.buf()[0], 0.0);
        assert_eq!(out.buf()[15], 1.0);
    }

    #[test]
    fn test_corruption_rejects_bad_levels() {
        let mut rng = StdRng::seed_from_u64(0);
        let img = ramp(4, 4);
        let bad = Corruption {
            dropout: Some(1.5),
            ..Corruption::default()
        };
        assert!(matches!(bad.apply(&img, &mut rng), Err(Error::Config(_))));
        let bad_blur = Corruption {
            blur: Some(0.0),
            ..Corruption::default()
        };
        assert!(matches!(bad_blur.validate(), Err(Error::Config(_))));
    }
}
