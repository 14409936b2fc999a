//! Descriptive statistics over per-image metric values.
//!
//! Spread is the population standard deviation (N denominator): a summary
//! describes the test set it was computed on.

use serde::{Deserialize, Serialize};

/// Descriptive statistics for a set of measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of values.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Middle value; mean of the two middle values for even counts.
    pub median: f64,
}

impl Summary {
    /// Summarize `values`, or `None` if there are none.
    #[must_use]
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        Some(Self {
            count: sorted.len(),
            mean: mean(values),
            std_dev: std_dev(values),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            median: median_sorted(&sorted),
        })
    }

    /// Summarize the finite values and count the rest.
    ///
    /// Infinite values (PSNR of an exact reconstruction) are counted, not
    /// summarized.
    #[must_use]
    pub fn compute_finite(values: &[f64]) -> (Option<Self>, usize) {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let excluded = values.len() - finite.len();
        (Self::compute(&finite), excluded)
    }
}

/// Arithmetic mean; 0 for an empty slice.
///
/// # Example
///
/// ```
/// use recon_eval::stats::mean;
///
/// assert_eq!(mean(&[0.5, 1.5]), 1.0);
/// ```
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0 for fewer than two values.
///
/// # Example
///
/// ```
/// use recon_eval::stats::std_dev;
///
/// let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
/// assert!((std_dev(&values) - 2.0).abs() < 1e-12);
/// ```
#[must_use]
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (sum_sq / values.len() as f64).sqrt()
}

/// Median; 0 for an empty slice.
#[must_use]
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    median_sorted(&sorted)
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}
