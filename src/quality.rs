//! Shape-quality metrics for resolved peak regions.
//!
//! Scores combine asymmetry, smoothness, goodness of Gaussian fit,
//! peakedness, and tailing into a single comparable number. They drive
//! parameter calibration but are also useful on their own for ranking or
//! filtering resolved peaks.
use cfg_if::cfg_if;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::trace::{PeakInterval, Trace};

const EPS: f64 = 1e-12;

/// Relative weights of the positive score components.
///
/// Asymmetry always contributes with unit weight, and the zigzag and extra
/// maxima penalties are always subtracted in full.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScoreWeights {
    pub gaussian: f64,
    pub kurtosis: f64,
    pub tailing: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            gaussian: 0.5,
            kurtosis: 0.5,
            tailing: 0.5,
        }
    }
}

/// The per-metric breakdown of a region's shape quality
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QualityScore {
    /// 2 minus the deviation of the apex-to-mean-edge ratio from 1
    pub asymmetry: f64,
    /// 0.2 per slope sign change across the region
    pub zigzag_penalty: f64,
    /// R^2 of a quadratic fit to the log-intensities, clamped to [0, 1]
    pub gaussian_r2: f64,
    /// Closeness of the Pearson kurtosis to the Gaussian value of 3
    pub kurtosis_score: f64,
    /// Closeness of the 5%-height tailing factor to 1
    pub tailing_score: f64,
    /// 0.5 per prominent local maximum beyond the apex
    pub maxima_penalty: f64,
}

impl QualityScore {
    /// Collapse the metrics into one number using the default weights
    pub fn combined(&self) -> f64 {
        self.combined_with(&ScoreWeights::default())
    }

    pub fn combined_with(&self, weights: &ScoreWeights) -> f64 {
        self.asymmetry + weights.gaussian * self.gaussian_r2
            + weights.kurtosis * self.kurtosis_score
            + weights.tailing * self.tailing_score
            - self.zigzag_penalty
            - self.maxima_penalty
    }
}

/// Score the region of `trace` covered by `interval`
pub fn score_interval(trace: &Trace<'_, '_>, interval: &PeakInterval) -> QualityScore {
    let range = trace.index_range(interval);
    if range.is_empty() {
        return QualityScore::default();
    }
    score_region(&trace.x, &trace.y, range.start, range.end - 1)
}

/// Score the inclusive sample region `[start, end]`
pub fn score_region(x: &[f64], y: &[f64], start: usize, end: usize) -> QualityScore {
    if end <= start {
        return QualityScore::default();
    }
    let (apex_idx, apex) = y[start..=end]
        .iter()
        .enumerate()
        .fold((start, 0.0f64), |(bi, bv), (i, &v)| {
            if v > bv {
                (start + i, v)
            } else {
                (bi, bv)
            }
        });
    if apex <= 0.0 {
        return QualityScore::default();
    }

    let mean_edge = (y[start] + y[end]) / 2.0;
    let asym_ratio = if mean_edge > 0.0 { apex / mean_edge } else { 1.0 };
    let asymmetry = 2.0 - (asym_ratio - 1.0).abs();

    // slope reversals, ignoring runs flatter than the noise floor
    let mut zigzag = 0usize;
    let mut prev_slope = 0.0f64;
    for i in (start + 1)..=end {
        let slope = y[i] - y[i - 1];
        if prev_slope != 0.0 && slope * prev_slope < 0.0 {
            zigzag += 1;
        }
        if slope.abs() > 1e-7 {
            prev_slope = slope;
        }
    }

    let extra_maxima = prominent_maxima(y, start, end)
        .iter()
        .filter(|&&i| i != apex_idx)
        .count();

    let kurt = kurtosis(y, start, end);
    let kurtosis_score = (2.0 - (kurt - 3.0).abs() / 3.0).max(0.0);

    let tf = tailing_factor(x, y, start, end, apex_idx, apex);
    let tailing_score = (2.0 - (tf - 1.0).abs()).max(0.0);

    QualityScore {
        asymmetry,
        zigzag_penalty: 0.2 * zigzag as f64,
        gaussian_r2: gaussian_fit_r2(x, y, start, end),
        kurtosis_score,
        tailing_score,
        maxima_penalty: 0.5 * extra_maxima as f64,
    }
}

/// Interior local maxima of `[start, end]` reaching at least half the
/// region's apex intensity
fn prominent_maxima(y: &[f64], start: usize, end: usize) -> Vec<usize> {
    let apex = y[start..=end].iter().fold(0.0f64, |a, &b| a.max(b));
    let mut maxima = Vec::new();
    for i in (start + 1)..end {
        if y[i] > y[i - 1] && y[i] > y[i + 1] && y[i] >= 0.5 * apex {
            maxima.push(i);
        }
    }
    maxima
}

/// Pearson kurtosis of the intensity values in `[start, end]`.
///
/// Degenerate regions (fewer than four samples, or essentially constant)
/// report the Gaussian reference value of 3 rather than an unstable
/// estimate.
pub fn kurtosis(y: &[f64], start: usize, end: usize) -> f64 {
    let n = end - start + 1;
    if n < 4 {
        return 3.0;
    }
    let values = &y[start..=end];
    let mean = values.iter().sum::<f64>() / n as f64;
    let mut s2 = 0.0;
    let mut s4 = 0.0;
    for &v in values {
        let d = v - mean;
        s2 += d * d;
        s4 += d * d * d * d;
    }
    let variance = s2 / (n - 1) as f64;
    if variance < EPS {
        return 3.0;
    }
    (s4 / n as f64) / (variance * variance)
}

/// Ratio of the wider to the narrower side of the peak measured at 5% of
/// the apex height, in domain units.
///
/// Returns 1 for degenerate regions where either side has no width.
pub fn tailing_factor(
    x: &[f64],
    y: &[f64],
    start: usize,
    end: usize,
    apex_idx: usize,
    apex: f64,
) -> f64 {
    if apex < EPS {
        return 1.0;
    }
    let cutoff = 0.05 * apex;
    let mut left_edge = apex_idx;
    for i in (start..=apex_idx).rev() {
        if y[i] < cutoff {
            break;
        }
        left_edge = i;
    }
    let mut right_edge = apex_idx;
    for i in apex_idx..=end {
        if y[i] < cutoff {
            break;
        }
        right_edge = i;
    }
    let left_width = x[apex_idx] - x[left_edge];
    let right_width = x[right_edge] - x[apex_idx];
    if left_width.min(right_width) < EPS {
        return 1.0;
    }
    left_width.max(right_width) / left_width.min(right_width)
}

/// Coefficient of determination of a quadratic least-squares fit to the
/// log-intensities of `[start, end]`, which is exact when the region is a
/// sampled Gaussian.
///
/// Zero-intensity samples carry no information about the log-shape and are
/// skipped; fewer than three usable samples, or a singular system, score 0.
pub fn gaussian_fit_r2(x: &[f64], y: &[f64], start: usize, end: usize) -> f64 {
    if end + 1 - start < 3 {
        return 0.0;
    }
    let mut xs = Vec::with_capacity(end + 1 - start);
    let mut log_ys = Vec::with_capacity(end + 1 - start);
    for i in start..=end {
        if y[i] > 0.0 {
            xs.push(x[i]);
            log_ys.push(y[i].ln());
        }
    }
    if xs.len() < 3 {
        return 0.0;
    }
    let coeffs = match quadratic_regression(&xs, &log_ys) {
        Some(coeffs) => coeffs,
        None => return 0.0,
    };

    let mean = log_ys.iter().sum::<f64>() / log_ys.len() as f64;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (&xi, &li) in xs.iter().zip(log_ys.iter()) {
        let fitted = coeffs[0] + coeffs[1] * xi + coeffs[2] * xi * xi;
        ss_res += (li - fitted).powi(2);
        ss_tot += (li - mean).powi(2);
    }
    if ss_tot < EPS {
        return 0.0;
    }
    (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
}

cfg_if! {
    if #[cfg(feature = "ndarray")] {
        fn quadratic_regression(xs: &[f64], ys: &[f64]) -> Option<[f64; 3]> {
            use ndarray::{Array1, Array2};
            use ndarray_linalg::Inverse;

            let n = xs.len();
            let mut design = Array2::<f64>::zeros((n, 3));
            for (i, &xi) in xs.iter().enumerate() {
                design[[i, 0]] = 1.0;
                design[[i, 1]] = xi;
                design[[i, 2]] = xi * xi;
            }
            let observed = Array1::from(ys.to_vec());
            let xtx = design.t().dot(&design);
            let xty = design.t().dot(&observed);
            let inverse = xtx.inv().ok()?;
            let coeffs = inverse.dot(&xty);
            Some([coeffs[0], coeffs[1], coeffs[2]])
        }
    } else if #[cfg(feature = "nalgebra")] {
        fn quadratic_regression(xs: &[f64], ys: &[f64]) -> Option<[f64; 3]> {
            use nalgebra::{Matrix3, Vector3};

            let mut xtx = Matrix3::<f64>::zeros();
            let mut xty = Vector3::<f64>::zeros();
            for (&xi, &yi) in xs.iter().zip(ys.iter()) {
                let row = Vector3::new(1.0, xi, xi * xi);
                xtx += row * row.transpose();
                xty += row * yi;
            }
            if xtx.determinant().abs() < EPS {
                return None;
            }
            xtx.lu().solve(&xty).map(|c| [c[0], c[1], c[2]])
        }
    } else {
        compile_error!("At least one of the \"nalgebra\" or \"ndarray\" features must be enabled");
    }
}

/// Split the sample region `[start, end]` into sub-regions at the deepest
/// local minimum between consecutive prominent maxima.
///
/// A region with fewer than two prominent maxima is returned unchanged. The
/// emitted sub-regions never overlap and stay within `[start, end]`.
pub fn split_region(y: &[f64], start: usize, end: usize) -> Vec<(usize, usize)> {
    let maxima = prominent_maxima(y, start, end);
    if maxima.len() < 2 {
        return vec![(start, end)];
    }
    let mut regions = Vec::with_capacity(maxima.len());
    let mut current_start = start;
    for (m, &max_idx) in maxima.iter().enumerate() {
        let next_bound = if m + 1 < maxima.len() {
            maxima[m + 1]
        } else {
            end
        };
        let mut sub_end = lowest_between(y, max_idx, next_bound).unwrap_or(max_idx);
        if sub_end < current_start {
            sub_end = max_idx;
        }
        regions.push((current_start, sub_end));
        current_start = sub_end + 1;
    }
    if current_start < end {
        regions.push((current_start, end));
    }
    regions
}

/// Index of the lowest sample strictly between `from` and `to`
fn lowest_between(y: &[f64], from: usize, to: usize) -> Option<usize> {
    if from + 1 >= to {
        return None;
    }
    let mut best = from + 1;
    for i in (from + 2)..to {
        if y[i] < y[best] {
            best = i;
        }
    }
    Some(best)
}
