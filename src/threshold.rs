//! Robust noise floor estimation for intensity traces.
//!
//! Two strategies are provided. The global estimator follows the
//! lowest-decile rule used during parameter calibration: the noise floor is
//! the median of the lowest 10% of intensities, widened by a caller-supplied
//! multiple of the median absolute deviation over that same slice. The local
//! estimator computes the same statistic over a sliding window, producing a
//! per-sample threshold array for traces whose noise level drifts.
//!
//! All functions are pure and never mutate their input.

/// The median of `values`, computed over a sorted copy
pub fn median(values: &[f64]) -> f64 {
    let mut copy = values.to_vec();
    copy.sort_by(|a, b| a.total_cmp(b));
    sorted_median(&copy)
}

fn sorted_median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let mid = n / 2;
    if n % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// The median absolute deviation of `values` around `center`, a robust
/// spread estimator. Zero for constant input.
pub fn median_absolute_deviation(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

fn lowest_decile(y: &[f64]) -> Vec<f64> {
    let mut sorted = y.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let cut = ((sorted.len() as f64 * 0.1) as usize).max(1).min(sorted.len());
    sorted.truncate(cut);
    sorted
}

/// The baseline intensity of a trace: the median of the lowest 10% of
/// intensity values (at least one sample).
pub fn baseline(y: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    sorted_median(&lowest_decile(y))
}

/// A global noise threshold: `median + factor * MAD` over the lowest decile
/// of intensities. A zero-variance slice has MAD 0, so the threshold
/// degrades to the plain median.
pub fn global_threshold(y: &[f64], factor: f64) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let low = lowest_decile(y);
    let center = sorted_median(&low);
    center + factor * median_absolute_deviation(&low, center)
}

/// Per-sample noise thresholds: for each index, `median + factor * MAD` over
/// a centered window of `window_size` samples, clamped at the trace edges.
/// A `window_size` of zero or one degrades to the sample itself; one larger
/// than the trace clamps to the full trace.
pub fn local_thresholds(y: &[f64], window_size: usize, factor: f64) -> Vec<f64> {
    let n = y.len();
    let half = window_size / 2;
    let mut thresholds = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        let window = &y[lo..hi];
        let center = median(window);
        thresholds.push(center + factor * median_absolute_deviation(window, center));
    }
    thresholds
}

/// Copy `y`, zeroing every sample strictly below `threshold`
pub fn apply_threshold(y: &[f64], threshold: f64) -> Vec<f64> {
    y.iter()
        .map(|&v| if v < threshold { 0.0 } else { v })
        .collect()
}
