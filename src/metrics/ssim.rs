//! Single-channel structural similarity.
//!
//! Standard SSIM with an 11x11 Gaussian window (sigma 1.5), K1 = 0.01,
//! K2 = 0.03 and dynamic range 1.0. Statistics are taken over valid window
//! positions only and the SSIM map is averaged. Images smaller than the
//! window use the largest odd window that fits.

use crate::error::Result;
use crate::sample::ImageSample;

use super::{MAX_VAL, check_dimensions};

const WINDOW_SIZE: usize = 11;
const WINDOW_SIGMA: f64 = 1.5;
const K1: f64 = 0.01;
const K2: f64 = 0.03;

/// Structural similarity index in [-1, 1]; 1 means identical.
pub fn ssim(target: &ImageSample, predicted: &ImageSample) -> Result<f64> {
    check_dimensions(target, predicted)?;
    Ok(ssim_unchecked(target, predicted))
}

/// Structural dissimilarity `(1 - SSIM) / 2` in [0, 1]; 0 means identical.
pub fn dssim(target: &ImageSample, predicted: &ImageSample) -> Result<f64> {
    Ok((1.0 - ssim(target, predicted)?) / 2.0)
}

pub(super) fn dssim_unchecked(target: &ImageSample, predicted: &ImageSample) -> f64 {
    (1.0 - ssim_unchecked(target, predicted)) / 2.0
}

fn ssim_unchecked(target: &ImageSample, predicted: &ImageSample) -> f64 {
    let (w, h) = (target.width(), target.height());
    if w == 0 || h == 0 {
        return 1.0;
    }

    let mut size = WINDOW_SIZE.min(w).min(h);
    if size % 2 == 0 {
        size -= 1;
    }
    let kernel = gaussian_window(size);

    let x: Vec<f64> = target.buf().iter().map(|&v| f64::from(v)).collect();
    let y: Vec<f64> = predicted.buf().iter().map(|&v| f64::from(v)).collect();
    let xx: Vec<f64> = x.iter().map(|v| v * v).collect();
    let yy: Vec<f64> = y.iter().map(|v| v * v).collect();
    let xy: Vec<f64> = x.iter().zip(&y).map(|(a, b)| a * b).collect();

    let mu_x = filter_valid(&x, w, h, &kernel);
    let mu_y = filter_valid(&y, w, h, &kernel);
    let e_xx = filter_valid(&xx, w, h, &kernel);
    let e_yy = filter_valid(&yy, w, h, &kernel);
    let e_xy = filter_valid(&xy, w, h, &kernel);

    let c1 = (K1 * MAX_VAL).powi(2);
    let c2 = (K2 * MAX_VAL).powi(2);

    let n = mu_x.len();
    let total: f64 = (0..n)
        .map(|i| {
            let (mx, my) = (mu_x[i], mu_y[i]);
            let var_x = e_xx[i] - mx * mx;
            let var_y = e_yy[i] - my * my;
            let cov = e_xy[i] - mx * my;
            let luminance = (2.0 * mx * my + c1) / (mx * mx + my * my + c1);
            let contrast_structure = (2.0 * cov + c2) / (var_x + var_y + c2);
            luminance * contrast_structure
        })
        .sum();
    total / n as f64
}

fn gaussian_window(size: usize) -> Vec<f64> {
    let center = (size as f64 - 1.0) / 2.0;
    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-0.5 * d * d / (WINDOW_SIGMA * WINDOW_SIGMA)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= sum);
    kernel
}

/// Separable filtering without padding; output is `(w-k+1) x (h-k+1)`.
fn filter_valid(data: &[f64], w: usize, h: usize, kernel: &[f64]) -> Vec<f64> {
    let k = kernel.len();
    let (ow, oh) = (w + 1 - k, h + 1 - k);

    let mut rows = vec![0.0; ow * h];
    for y in 0..h {
        let line = &data[y * w..(y + 1) * w];
        for x in 0..ow {
            rows[y * ow + x] = line[x..x + k].iter().zip(kernel).map(|(a, b)| a * b).sum();
        }
    }

    let mut out = vec![0.0; ow * oh];
    for y in 0..oh {
        for x in 0..ow {
            out[y * ow + x] = (0..k).map(|j| rows[(y + j) * ow + x] * kernel[j]).sum();
        }
    }
    out
}
