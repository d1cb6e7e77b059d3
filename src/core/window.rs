//! Window functions for the STFT.
//!
//! Provides Hann, Blackman-Harris, Kaiser-Bessel and approximate confined
//! Gaussian windows. Asymmetric variants move the window peak away from the
//! centre, and [`synthesis_window`] derives the matching synthesis window so
//! that overlapped analysis × synthesis products sum to exactly one.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::StretchError;

/// Blackman-Harris window coefficients (4-term).
const BH_A0: f64 = 0.35875;
const BH_A1: f64 = 0.48829;
const BH_A2: f64 = 0.14128;
const BH_A3: f64 = 0.01168;

/// Furthest the window peak can move from the centre, as a fraction of the length.
const MAX_PEAK_SHIFT: f64 = 0.4;

/// Floor for the per-phase sum of squared analysis weights.
const OVERLAP_SUM_EPSILON: f64 = 1e-9;

/// Window shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowShape {
    Hann,
    BlackmanHarris,
    Kaiser(u32),           // beta parameter scaled by 100 (e.g., 800 = 8.0)
    ConfinedGaussian(u32), // sigma scaled by 1000 (e.g., 250 = 0.25)
}

impl WindowShape {
    /// Kaiser window with a beta suited to `overlap` (block length / interval).
    ///
    /// Higher overlap allows a narrower main lobe in time, which buys lower
    /// sidelobes in frequency.
    pub fn for_overlap(overlap: f32) -> Self {
        let overlap = if overlap.is_finite() {
            overlap.max(1.0)
        } else {
            4.0
        };
        let beta = (2.5 + overlap).min(12.0);
        WindowShape::Kaiser((beta * 100.0).round() as u32)
    }

    /// Evaluates the shape at `x` in `[0, 1]`.
    fn value(self, x: f64) -> f64 {
        match self {
            WindowShape::Hann => 0.5 - 0.5 * (2.0 * PI * x).cos(),
            WindowShape::BlackmanHarris => {
                BH_A0 - BH_A1 * (2.0 * PI * x).cos() + BH_A2 * (4.0 * PI * x).cos()
                    - BH_A3 * (6.0 * PI * x).cos()
            }
            WindowShape::Kaiser(beta_100) => {
                let beta = beta_100 as f64 / 100.0;
                let t = 2.0 * x - 1.0;
                bessel_i0(beta * (1.0 - t * t).max(0.0).sqrt()) / bessel_i0(beta)
            }
            WindowShape::ConfinedGaussian(sigma_1000) => {
                let sigma = (sigma_1000 as f64 / 1000.0).max(0.01);
                let g = |t: f64| {
                    let d = (t - 0.5) / (2.0 * sigma);
                    (-d * d).exp()
                };
                g(x) - g(0.0) * (g(x + 1.0) + g(x - 1.0)) / (g(1.0) + g(-1.0))
            }
        }
    }
}

/// Generates a window of `length` samples.
///
/// Samples are taken at bin centres, so no sample is exactly zero.
/// `asymmetry` in `[-1, 1]` moves the peak towards the end (positive) or the
/// start (negative) of the window; out-of-range values are clamped and
/// non-finite values are treated as zero.
///
/// # Errors
/// Returns [`StretchError::InvalidWindowLength`] when `length` is 0 or 1.
pub fn generate_window(
    shape: WindowShape,
    asymmetry: f32,
    length: usize,
) -> Result<Vec<f32>, StretchError> {
    if length <= 1 {
        return Err(StretchError::InvalidWindowLength(length));
    }
    let asymmetry = if asymmetry.is_finite() {
        asymmetry.clamp(-1.0, 1.0) as f64
    } else {
        0.0
    };
    let peak = 0.5 + MAX_PEAK_SHIFT * asymmetry;
    let n = length as f64;
    Ok((0..length)
        .map(|i| {
            let x = (i as f64 + 0.5) / n;
            shape.value(warp(x, peak)).max(0.0) as f32
        })
        .collect())
}

/// Piecewise-linear remap of `[0, 1]` that sends `peak` to 0.5.
#[inline]
fn warp(x: f64, peak: f64) -> f64 {
    if x < peak {
        0.5 * x / peak
    } else {
        0.5 + 0.5 * (x - peak) / (1.0 - peak)
    }
}

/// Builds the synthesis window for `analysis` at the given hop.
///
/// Each sample is divided by the sum of squared analysis weights sharing its
/// phase modulo `interval`, so overlap-adding `analysis[n] * synthesis[n]`
/// at that hop gives exactly one everywhere.
pub fn synthesis_window(analysis: &[f32], interval: usize) -> Vec<f32> {
    let interval = interval.clamp(1, analysis.len().max(1));
    let mut sums = vec![0.0f64; interval];
    for (i, &a) in analysis.iter().enumerate() {
        sums[i % interval] += a as f64 * a as f64;
    }
    analysis
        .iter()
        .enumerate()
        .map(|(i, &a)| (a as f64 / sums[i % interval].max(OVERLAP_SUM_EPSILON)) as f32)
        .collect()
}

/// Largest deviation from one of the overlap-added window products.
pub fn cola_ripple(analysis: &[f32], synthesis: &[f32], interval: usize) -> f32 {
    let interval = interval.max(1);
    let mut sums = vec![0.0f64; interval];
    for (i, (&a, &s)) in analysis.iter().zip(synthesis.iter()).enumerate() {
        sums[i % interval] += a as f64 * s as f64;
    }
    sums.iter()
        .map(|&s| (s - 1.0).abs())
        .fold(0.0f64, f64::max) as f32
}

/// Centre of mass of the analysis × synthesis product, rounded to the
/// nearest sample boundary.
pub fn product_centre(analysis: &[f32], synthesis: &[f32]) -> usize {
    let mut weighted = 0.0f64;
    let mut total = 0.0f64;
    for (i, (&a, &s)) in analysis.iter().zip(synthesis.iter()).enumerate() {
        let p = a as f64 * s as f64;
        weighted += (i as f64 + 0.5) * p;
        total += p;
    }
    if total <= 0.0 {
        return analysis.len() / 2;
    }
    ((weighted / total).round() as usize).min(analysis.len().saturating_sub(1))
}

/// Maximum number of series terms for Bessel I0 convergence.
const BESSEL_MAX_TERMS: usize = 50;
/// Relative convergence threshold for Bessel I0 series.
const BESSEL_CONVERGENCE: f64 = 1e-15;

/// Zeroth-order modified Bessel function of the first kind.
/// Computed via series expansion.
#[inline]
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let x_half = x / 2.0;
    for k in 1..BESSEL_MAX_TERMS {
        term *= (x_half / k as f64) * (x_half / k as f64);
        sum += term;
        if term < BESSEL_CONVERGENCE * sum {
            break;
        }
    }
    sum
}
