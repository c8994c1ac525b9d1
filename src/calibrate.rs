//! Data-driven calibration of the resolver parameters.
//!
//! A grid of candidate parameter combinations is derived from the traces
//! themselves, every combination is trialed by resolving all traces and
//! scoring the resulting peaks, and the best-scoring combination is frozen
//! into an immutable [`CalibratedParams`]. The same frozen parameters are
//! then applied uniformly to any number of traces, including traces that
//! took no part in calibration.
use std::borrow::Cow;

use log::{debug, info};

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::quality::score_interval;
use crate::resolver::{CancelToken, PeakResolver, ResolverError, ResolverParams};
use crate::threshold::{apply_threshold, baseline};
use crate::trace::{PeakInterval, Trace};

const WIDTH_FRACTIONS: [f64; 6] = [0.01, 0.02, 0.05, 0.1, 0.2, 0.3];
const THRESHOLD_FACTORS: [f64; 7] = [0.0, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];
const HEIGHT_FACTORS: [f64; 5] = [0.0, 0.5, 1.0, 2.0, 5.0];
const MIN_POINT_COUNTS: [usize; 5] = [3, 5, 7, 10, 15];

/// Knobs of the calibration search itself, as opposed to the resolver
/// parameters being searched over
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationConfig {
    /// Additive reward per resolved peak, breaking ties in favor of
    /// combinations that find more peaks of comparable quality
    pub score_bonus_per_peak: f64,
    /// Upper bound on the grid size; larger grids are thinned axis by axis
    pub max_combinations: usize,
    /// Traces shorter than this take no part in scoring
    pub min_trace_points: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            score_bonus_per_peak: 0.05,
            max_combinations: 4096,
            min_trace_points: 3,
        }
    }
}

impl CalibrationConfig {
    pub fn score_bonus_per_peak(mut self, score_bonus_per_peak: f64) -> Self {
        self.score_bonus_per_peak = score_bonus_per_peak;
        self
    }

    pub fn max_combinations(mut self, max_combinations: usize) -> Self {
        self.max_combinations = max_combinations;
        self
    }

    pub fn min_trace_points(mut self, min_trace_points: usize) -> Self {
        self.min_trace_points = min_trace_points;
        self
    }
}

/// A frozen, calibrated parameter set and the score it earned.
///
/// Once constructed it never changes; re-calibrating produces a new value
/// instead of mutating this one.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibratedParams {
    params: ResolverParams,
    score: f64,
}

impl CalibratedParams {
    pub fn params(&self) -> ResolverParams {
        self.params
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// Build a resolver carrying these parameters
    pub fn resolver(&self) -> PeakResolver {
        PeakResolver::new(self.params)
    }
}

/// Grid-search calibrator over a set of representative traces
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    pub config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    /// Derive the candidate parameter grid from the traces.
    ///
    /// Threshold and height axes scale with the baseline of the pooled
    /// intensities, the width axis with the widest trace span. The grid is
    /// thinned, largest axis first, until it fits under
    /// [`CalibrationConfig::max_combinations`]; the endpoints of each axis
    /// always survive thinning, so every axis keeps at least two entries
    /// and a cap below 2^5 is met best-effort.
    pub fn parameter_grid(&self, traces: &[Trace<'_, '_>]) -> Vec<ResolverParams> {
        let pooled: Vec<f64> = traces
            .iter()
            .flat_map(|t| t.y.iter().copied())
            .collect();
        let base = baseline(&pooled);
        let max_span = traces.iter().map(|t| t.span()).fold(0.0f64, f64::max);

        let mut thresholds: Vec<f64> = THRESHOLD_FACTORS.iter().map(|f| f * base).collect();
        let mut widths: Vec<f64> = WIDTH_FRACTIONS.iter().map(|f| f * max_span).collect();
        let mut ratios: Vec<f64> = (0..10).map(|i| 1.2 + 0.1 * i as f64).collect();
        let mut heights: Vec<f64> = HEIGHT_FACTORS.iter().map(|f| f * base).collect();
        let mut point_counts: Vec<usize> = MIN_POINT_COUNTS.to_vec();

        dedup_axis(&mut thresholds);
        dedup_axis(&mut widths);
        dedup_axis(&mut heights);

        loop {
            let lens = [
                thresholds.len(),
                widths.len(),
                ratios.len(),
                heights.len(),
                point_counts.len(),
            ];
            let total: usize = lens.iter().product();
            if total <= self.config.max_combinations {
                break;
            }
            let longest = lens
                .iter()
                .enumerate()
                .max_by_key(|(_, &len)| len)
                .map(|(i, _)| i)
                .unwrap_or(0);
            // once every axis is down to its two endpoints nothing can
            // shrink further
            if lens[longest] <= 2 {
                break;
            }
            match longest {
                0 => thin_axis(&mut thresholds),
                1 => thin_axis(&mut widths),
                2 => thin_axis(&mut ratios),
                3 => thin_axis(&mut heights),
                _ => thin_axis(&mut point_counts),
            }
        }

        let mut grid = Vec::with_capacity(
            thresholds.len() * widths.len() * ratios.len() * heights.len() * point_counts.len(),
        );
        for &threshold in thresholds.iter() {
            for &width in widths.iter() {
                for &ratio in ratios.iter() {
                    for &height in heights.iter() {
                        for &points in point_counts.iter() {
                            grid.push(
                                ResolverParams::default()
                                    .chrom_threshold(threshold)
                                    .search_width(width)
                                    .min_ratio(ratio)
                                    .min_height(height)
                                    .min_data_points(points),
                            );
                        }
                    }
                }
            }
        }
        grid
    }

    /// Search the parameter grid, trialing each combination on every trace,
    /// and freeze the best-scoring combination.
    ///
    /// Ties keep the earliest grid entry, so repeated runs over the same
    /// traces calibrate identically. Fails with
    /// [`ResolverError::CalibrationFailed`] when no combination resolves a
    /// single peak anywhere.
    pub fn calibrate(
        &self,
        traces: &[Trace<'_, '_>],
        token: &CancelToken,
    ) -> Result<CalibratedParams, ResolverError> {
        self.check_input(traces)?;
        let grid = self.parameter_grid(traces);
        info!(
            "calibrating over {} parameter combinations on {} traces",
            grid.len(),
            traces.len()
        );
        let mut best: Option<(f64, ResolverParams)> = None;
        for params in grid {
            if token.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }
            let score = self.score_combination(params, traces);
            debug!("combination {params:?} scored {score}");
            if score.is_finite() && best.map(|(b, _)| score > b).unwrap_or(true) {
                best = Some((score, params));
            }
        }
        self.freeze(best)
    }

    /// Like [`Calibrator::calibrate`], scoring combinations on the rayon
    /// thread pool.
    #[cfg(feature = "parallelism")]
    pub fn calibrate_parallel(
        &self,
        traces: &[Trace<'_, '_>],
        token: &CancelToken,
    ) -> Result<CalibratedParams, ResolverError> {
        self.check_input(traces)?;
        let grid = self.parameter_grid(traces);
        info!(
            "calibrating over {} parameter combinations on {} traces",
            grid.len(),
            traces.len()
        );
        let scores: Vec<f64> = grid
            .par_iter()
            .map(|&params| {
                if token.is_cancelled() {
                    return f64::NAN;
                }
                self.score_combination(params, traces)
            })
            .collect();
        if token.is_cancelled() {
            return Err(ResolverError::Cancelled);
        }
        let mut best: Option<(f64, ResolverParams)> = None;
        for (&score, &params) in scores.iter().zip(grid.iter()) {
            if score.is_finite() && best.map(|(b, _)| score > b).unwrap_or(true) {
                best = Some((score, params));
            }
        }
        self.freeze(best)
    }

    fn freeze(
        &self,
        best: Option<(f64, ResolverParams)>,
    ) -> Result<CalibratedParams, ResolverError> {
        match best {
            Some((score, params)) => {
                info!("calibrated to {params:?} with score {score}");
                Ok(CalibratedParams { params, score })
            }
            None => Err(ResolverError::CalibrationFailed),
        }
    }

    fn check_input(&self, traces: &[Trace<'_, '_>]) -> Result<(), ResolverError> {
        if traces.is_empty() {
            return Err(ResolverError::CalibrationFailed);
        }
        for trace in traces {
            trace.validate()?;
        }
        Ok(())
    }

    /// Mean over traces of the per-trace trial score, or negative infinity
    /// when the combination resolves nothing anywhere
    fn score_combination(&self, params: ResolverParams, traces: &[Trace<'_, '_>]) -> f64 {
        let resolver = PeakResolver::new(params);
        let mut total = 0.0;
        let mut scored = 0usize;
        for trace in traces {
            if trace.len() < self.config.min_trace_points {
                continue;
            }
            if let Some(score) = self.trial_on_trace(&resolver, trace) {
                total += score;
                scored += 1;
            }
        }
        if scored == 0 {
            f64::NEG_INFINITY
        } else {
            total / scored as f64
        }
    }

    /// Average peak quality on one trace plus the per-peak bonus, or `None`
    /// when the trace yields no peaks under these parameters.
    ///
    /// Quality is measured against the same threshold-zeroed intensities the
    /// segmentation saw, so interval edges the segmenter treated as zero
    /// stay zero for the asymmetry term.
    fn trial_on_trace(&self, resolver: &PeakResolver, trace: &Trace<'_, '_>) -> Option<f64> {
        let peaks = resolver.resolve(trace).ok()?;
        if peaks.is_empty() {
            return None;
        }
        let threshold = resolver.params.chrom_threshold;
        let scoring_trace = if threshold > 0.0 {
            Trace::new(
                Cow::Borrowed(trace.x.as_ref()),
                Cow::Owned(apply_threshold(&trace.y, threshold)),
            )
        } else {
            trace.borrow()
        };
        let total_quality: f64 = peaks
            .iter()
            .map(|peak| score_interval(&scoring_trace, peak).combined())
            .sum();
        Some(
            total_quality / peaks.len() as f64
                + self.config.score_bonus_per_peak * peaks.len() as f64,
        )
    }
}

fn dedup_axis(axis: &mut Vec<f64>) {
    axis.sort_by(|a, b| a.total_cmp(b));
    axis.dedup();
}

/// Drop every other interior element, keeping both endpoints
fn thin_axis<T: Copy + PartialEq>(axis: &mut Vec<T>) {
    if axis.len() <= 2 {
        return;
    }
    let last = axis[axis.len() - 1];
    let mut kept: Vec<T> = axis.iter().copied().step_by(2).collect();
    if *kept.last().unwrap() != last {
        kept.push(last);
    }
    *axis = kept;
}

/// A resolver that must be calibrated before use.
///
/// [`AutoResolver::resolve`] refuses to guess: calling it before a
/// successful [`AutoResolver::calibrate`] is an explicit
/// [`ResolverError::Uncalibrated`] error rather than a silent fallback.
#[derive(Debug, Clone, Default)]
pub struct AutoResolver {
    calibrator: Calibrator,
    calibrated: Option<CalibratedParams>,
}

impl AutoResolver {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            calibrator: Calibrator::new(config),
            calibrated: None,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated.is_some()
    }

    pub fn calibrated(&self) -> Option<&CalibratedParams> {
        self.calibrated.as_ref()
    }

    /// Calibrate against `traces`, replacing any previous calibration
    pub fn calibrate(
        &mut self,
        traces: &[Trace<'_, '_>],
        token: &CancelToken,
    ) -> Result<&CalibratedParams, ResolverError> {
        let calibrated = self.calibrator.calibrate(traces, token)?;
        Ok(self.calibrated.insert(calibrated))
    }

    #[cfg(feature = "parallelism")]
    pub fn calibrate_parallel(
        &mut self,
        traces: &[Trace<'_, '_>],
        token: &CancelToken,
    ) -> Result<&CalibratedParams, ResolverError> {
        let calibrated = self.calibrator.calibrate_parallel(traces, token)?;
        Ok(self.calibrated.insert(calibrated))
    }

    /// Resolve with the frozen calibrated parameters
    pub fn resolve(&self, trace: &Trace<'_, '_>) -> Result<Vec<PeakInterval>, ResolverError> {
        match self.calibrated.as_ref() {
            Some(calibrated) => calibrated.resolver().resolve(trace),
            None => Err(ResolverError::Uncalibrated),
        }
    }

    /// A conservative hand-tuned parameter set for `trace`, for callers
    /// that cannot afford a calibration pass
    pub fn fallback_params(trace: &Trace<'_, '_>) -> ResolverParams {
        ResolverParams::default()
            .chrom_threshold(0.0)
            .search_width(0.1 * trace.span())
            .min_ratio(1.2)
            .min_height(1000.0)
            .min_data_points(3)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data::bump_trace;

    fn training_traces() -> Vec<(Vec<f64>, Vec<f64>)> {
        [1.0, 0.9, 1.1]
            .iter()
            .map(|&scale| {
                bump_trace(
                    61,
                    &[(15.0, 3.0, 100.0 * scale), (45.0, 3.0, 100.0 * scale)],
                    1.0,
                )
            })
            .collect()
    }

    #[test_log::test]
    fn test_calibrate_and_resolve_held_out() {
        let data = training_traces();
        let traces: Vec<Trace> = data.iter().map(|(x, y)| Trace::wrap(x, y)).collect();

        let mut auto = AutoResolver::default();
        assert_eq!(
            auto.resolve(&traces[0]).unwrap_err(),
            ResolverError::Uncalibrated
        );

        let token = CancelToken::new();
        let calibrated = *auto.calibrate(&traces, &token).unwrap();
        assert!(auto.is_calibrated());
        assert!(calibrated.score().is_finite());

        // wide search widths keep the slowly decaying flanks intact, so the
        // search must settle on one of the larger grid values
        let params = calibrated.params();
        assert!(params.search_width >= 12.0, "width {}", params.search_width);

        let (hx, hy) = bump_trace(61, &[(15.0, 3.0, 95.0), (45.0, 3.0, 105.0)], 1.0);
        let held_out = Trace::wrap(&hx, &hy);
        let peaks = auto.resolve(&held_out).unwrap();
        assert_eq!(peaks.len(), 2);
        for (peak, (expected_start, expected_end)) in peaks.iter().zip([(5.0, 25.0), (35.0, 55.0)])
        {
            assert!((peak.start_x - expected_start).abs() <= 1.0, "{peak}");
            assert!((peak.end_x - expected_end).abs() <= 1.0, "{peak}");
        }
    }

    #[test]
    fn test_calibration_failed_on_flat_data() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y = vec![0.0; 20];
        let traces = vec![Trace::wrap(&x, &y)];
        let err = Calibrator::default()
            .calibrate(&traces, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, ResolverError::CalibrationFailed);
    }

    #[test]
    fn test_calibration_rejects_empty_input() {
        let err = Calibrator::default()
            .calibrate(&[], &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, ResolverError::CalibrationFailed);
    }

    #[test]
    fn test_calibration_cancelled() {
        let data = training_traces();
        let traces: Vec<Trace> = data.iter().map(|(x, y)| Trace::wrap(x, y)).collect();
        let token = CancelToken::new();
        token.cancel();
        let err = Calibrator::default()
            .calibrate(&traces, &token)
            .unwrap_err();
        assert_eq!(err, ResolverError::Cancelled);
    }

    #[test]
    fn test_grid_respects_cap() {
        let data = training_traces();
        let traces: Vec<Trace> = data.iter().map(|(x, y)| Trace::wrap(x, y)).collect();

        let calibrator = Calibrator::new(CalibrationConfig::default().max_combinations(64));
        let grid = calibrator.parameter_grid(&traces);
        assert!(!grid.is_empty());
        assert!(grid.len() <= 64, "grid size {}", grid.len());

        // endpoints of each axis survive thinning
        let widths: Vec<f64> = grid.iter().map(|p| p.search_width).collect();
        let max_width = widths.iter().fold(0.0f64, |a, &b| a.max(b));
        assert!((max_width - 0.3 * 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_grid_cap_below_axis_floor_terminates() {
        // an all-positive trace gives a positive baseline, keeping every
        // axis at two or more distinct values
        let x: Vec<f64> = (0..41).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| 5.0 + crate::test_data::gaussian(xi, 20.0, 3.0, 100.0))
            .collect();
        let traces = vec![Trace::wrap(&x, &y)];

        let calibrator = Calibrator::new(CalibrationConfig::default().max_combinations(16));
        let grid = calibrator.parameter_grid(&traces);
        // thinning bottoms out with two endpoints per axis
        assert_eq!(grid.len(), 32);
    }

    #[test]
    fn test_trial_scores_thresholded_copy() {
        let x: Vec<f64> = (0..9).map(|i| i as f64).collect();
        let y = vec![0.5, 0.5, 2.0, 8.0, 15.0, 8.0, 2.0, 0.5, 0.5];
        let trace = Trace::wrap(&x, &y);

        let resolver = PeakResolver::new(ResolverParams::default().chrom_threshold(1.0));
        let peaks = resolver.resolve(&trace).unwrap();
        assert_eq!(peaks, vec![PeakInterval::new(1.0, 7.0)]);

        // the interval edges were zeroed during segmentation, so scoring
        // must see them as zero as well
        let zeroed = apply_threshold(&y, 1.0);
        let zeroed_trace = Trace::wrap(&x, &zeroed);
        let edge_symmetric = score_interval(&zeroed_trace, &peaks[0]);
        assert!((edge_symmetric.asymmetry - 2.0).abs() < 1e-9);

        let calibrator = Calibrator::default();
        let score = calibrator.trial_on_trace(&resolver, &trace).unwrap();
        let reference =
            edge_symmetric.combined() + calibrator.config.score_bonus_per_peak;
        assert!((score - reference).abs() < 1e-9, "{score} vs {reference}");
    }

    #[test]
    #[cfg(feature = "parallelism")]
    fn test_parallel_matches_serial() {
        let data = training_traces();
        let traces: Vec<Trace> = data.iter().map(|(x, y)| Trace::wrap(x, y)).collect();
        let token = CancelToken::new();
        let calibrator = Calibrator::default();
        let serial = calibrator.calibrate(&traces, &token).unwrap();
        let parallel = calibrator.calibrate_parallel(&traces, &token).unwrap();
        assert_eq!(serial, parallel);
    }
}
