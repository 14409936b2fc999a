//! Reconstruction-quality metrics for comparing target and predicted images.
//!
//! Supported metrics, all computed on images normalized to [0, 1]:
//!
//! - **MSE**: mean squared error (lower is better, 0 = identical)
//! - **DSSIM**: structural dissimilarity `(1 - SSIM) / 2` (lower is better)
//! - **PSNR**: peak signal-to-noise ratio in dB (higher is better)
//!
//! ## PSNR of identical images
//!
//! PSNR is undefined when MSE is zero. [`psnr`] returns `f64::INFINITY` in
//! that case; aggregation in [`crate::eval`] counts such images separately
//! instead of folding infinities into the mean.

pub mod ssim;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sample::{ImageSample, dimensions};

pub use ssim::{dssim, ssim};

/// Peak value of normalized images.
pub const MAX_VAL: f64 = 1.0;

/// Metric identifiers, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Mean squared error.
    Mse,
    /// Structural dissimilarity.
    Dssim,
    /// Peak signal-to-noise ratio.
    Psnr,
}

impl MetricKind {
    /// All metrics in reporting order.
    pub const ALL: [Self; 3] = [Self::Mse, Self::Dssim, Self::Psnr];

    /// Lowercase metric name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Mse => "mse",
            Self::Dssim => "dssim",
            Self::Psnr => "psnr",
        }
    }

    /// Whether larger values mean a better reconstruction.
    #[must_use]
    pub fn higher_is_better(self) -> bool {
        matches!(self, Self::Psnr)
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Metrics for a single target/prediction pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageMetrics {
    /// Mean squared error.
    pub mse: f64,
    /// Structural dissimilarity.
    pub dssim: f64,
    /// PSNR in dB; infinite for a perfect reconstruction.
    pub psnr: f64,
}

impl ImageMetrics {
    /// Value of one metric.
    #[must_use]
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Mse => self.mse,
            MetricKind::Dssim => self.dssim,
            MetricKind::Psnr => self.psnr,
        }
    }
}

/// Compute all metrics between a target and its reconstruction.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the images have different dimensions.
pub fn compare(target: &ImageSample, predicted: &ImageSample) -> Result<ImageMetrics> {
    check_dimensions(target, predicted)?;
    let mse = mse_unchecked(target, predicted);
    Ok(ImageMetrics {
        mse,
        dssim: ssim::dssim_unchecked(target, predicted),
        psnr: psnr_from_mse(mse),
    })
}

/// Mean squared error over all pixels.
pub fn mse(target: &ImageSample, predicted: &ImageSample) -> Result<f64> {
    check_dimensions(target, predicted)?;
    Ok(mse_unchecked(target, predicted))
}

/// Peak signal-to-noise ratio relative to [`MAX_VAL`].
///
/// Returns `f64::INFINITY` if the images are identical.
pub fn psnr(target: &ImageSample, predicted: &ImageSample) -> Result<f64> {
    Ok(psnr_from_mse(mse(target, predicted)?))
}

/// PSNR for a known MSE: `20 log10(MAX_VAL) - 10 log10(mse)`.
#[must_use]
pub fn psnr_from_mse(mse: f64) -> f64 {
    if mse == 0.0 {
        f64::INFINITY
    } else {
        20.0 * MAX_VAL.log10() - 10.0 * mse.log10()
    }
}

pub(crate) fn check_dimensions(target: &ImageSample, predicted: &ImageSample) -> Result<()> {
    let expected = dimensions(target);
    let actual = dimensions(predicted);
    if expected != actual {
        return Err(Error::ShapeMismatch { expected, actual });
    }
    Ok(())
}

fn mse_unchecked(target: &ImageSample, predicted: &ImageSample) -> f64 {
    let n = target.buf().len();
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = target
        .buf()
        .iter()
        .zip(predicted.buf().iter())
        .map(|(&t, &p)| {
            let diff = f64::from(t) - f64::from(p);
            diff * diff
        })
        .sum();
    sum / n as f64
}
