//! Local-minimum segmentation of a trace into peak regions.
//!
//! The resolver scans the intensity array a single time, growing a candidate
//! region while signal is sustained and finalizing it at a zero sample, the
//! end of the trace, or a local-minimum boundary once the scanned width
//! reaches the configured search width. Finalized candidates pass through
//! shape validation (data point count, absolute height, apex-to-edge ratio)
//! and accepted regions are expanded into adjacent zero samples so the
//! emitted intervals close visually for downstream integration.
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use thiserror::Error;

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::quality::split_region;
use crate::threshold::apply_threshold;
use crate::trace::{PeakInterval, Trace};

/// All the ways resolving a trace can fail
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolverError {
    #[error("The domain and intensity arrays do not match in length")]
    LengthMismatch,
    #[error("The trace contains no data points")]
    EmptyTrace,
    #[error("The domain array is not strictly increasing")]
    DomainNotSorted,
    #[error("The resolver has not been calibrated yet")]
    Uncalibrated,
    #[error("No parameter combination produced any peaks")]
    CalibrationFailed,
    #[error("The operation was cancelled")]
    Cancelled,
}

/// A cheap cloneable handle for cooperatively cancelling a long-running
/// resolution or calibration run from another thread.
///
/// Cancellation is checked between traces and between parameter
/// combinations. A cancelled run yields [`ResolverError::Cancelled`] and no
/// partial result.
#[derive(Debug, Default, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// One full tunable-parameter set for the segmentation algorithm.
///
/// Many of these are generated and scored during calibration; exactly one
/// survives and is applied uniformly to all traces.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResolverParams {
    /// Intensity floor; samples below it are zeroed on a private copy
    /// before segmentation
    pub chrom_threshold: f64,
    /// Domain distance to scan before a local-minimum boundary may finalize
    /// a region
    pub search_width: f64,
    /// Minimum apex-to-edge intensity ratio
    pub min_ratio: f64,
    /// Minimum admissible apex height
    pub min_height: f64,
    /// Minimum region length in samples
    pub min_data_points: usize,
}

impl Default for ResolverParams {
    fn default() -> Self {
        Self {
            chrom_threshold: 0.0,
            // An infinite width means only zero samples or the end of the
            // trace finalize a region
            search_width: f64::INFINITY,
            min_ratio: 1.2,
            min_height: 1.0,
            min_data_points: 3,
        }
    }
}

impl ResolverParams {
    pub fn chrom_threshold(mut self, chrom_threshold: f64) -> Self {
        self.chrom_threshold = chrom_threshold;
        self
    }

    pub fn search_width(mut self, search_width: f64) -> Self {
        self.search_width = search_width;
        self
    }

    pub fn min_ratio(mut self, min_ratio: f64) -> Self {
        self.min_ratio = min_ratio;
        self
    }

    pub fn min_height(mut self, min_height: f64) -> Self {
        self.min_height = min_height;
        self
    }

    pub fn min_data_points(mut self, min_data_points: usize) -> Self {
        self.min_data_points = min_data_points;
        self
    }
}

/// A peak resolver for chromatograms and mobilograms
#[derive(Debug, Clone, Default)]
pub struct PeakResolver {
    pub params: ResolverParams,
}

impl PeakResolver {
    pub fn new(params: ResolverParams) -> Self {
        Self { params }
    }

    /// Resolve `trace` into peak intervals, pushing them into
    /// `interval_accumulator`.
    ///
    /// Returns the number of intervals appended if successful. The caller's
    /// intensity array is never mutated; thresholding operates on a private
    /// copy.
    pub fn resolve_into(
        &self,
        trace: &Trace<'_, '_>,
        interval_accumulator: &mut Vec<PeakInterval>,
    ) -> Result<usize, ResolverError> {
        trace.validate()?;
        let m = interval_accumulator.len();

        let y: Cow<'_, [f64]> = if self.params.chrom_threshold > 0.0 {
            Cow::Owned(apply_threshold(&trace.y, self.params.chrom_threshold))
        } else {
            Cow::Borrowed(trace.y.as_ref())
        };
        let x = trace.x.as_ref();

        for (start, end) in self.segment(x, &y) {
            // a region may still cover multiple summits when no interior
            // sample fell to zero

            for (sub_start, sub_end) in split_region(&y, start, end) {
                interval_accumulator.push(PeakInterval::new(x[sub_start], x[sub_end]));
            }
        }

        let appended = interval_accumulator.len() - m;
        debug!(
            "resolved {} intervals from {} data points",
            appended,
            trace.len()
        );
        Ok(appended)
    }

    /// Resolve `trace` into a fresh list of peak intervals
    pub fn resolve(&self, trace: &Trace<'_, '_>) -> Result<Vec<PeakInterval>, ResolverError> {
        let mut acc = Vec::new();
        self.resolve_into(trace, &mut acc)?;
        Ok(acc)
    }

    /// Resolve every trace in order, checking `token` between traces.
    ///
    /// Each trace is independent; a cancelled run returns
    /// [`ResolverError::Cancelled`] and no partial result.
    pub fn resolve_all(
        &self,
        traces: &[Trace<'_, '_>],
        token: &CancelToken,
    ) -> Result<Vec<Vec<PeakInterval>>, ResolverError> {
        let mut results = Vec::with_capacity(traces.len());
        for trace in traces {
            if token.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }
            results.push(self.resolve(trace)?);
        }
        Ok(results)
    }

    /// Resolve every trace on the rayon thread pool, preserving input order
    /// in the result.
    #[cfg(feature = "parallelism")]
    pub fn resolve_all_parallel(
        &self,
        traces: &[Trace<'_, '_>],
        token: &CancelToken,
    ) -> Result<Vec<Vec<PeakInterval>>, ResolverError> {
        traces
            .par_iter()
            .map(|trace| {
                if token.is_cancelled() {
                    return Err(ResolverError::Cancelled);
                }
                self.resolve(trace)
            })
            .collect()
    }

    /// Scan the sample index once, emitting validated and boundary-adjusted
    /// index regions.
    fn segment(&self, x: &[f64], y: &[f64]) -> Vec<(usize, usize)> {
        let n = x.len();
        let mut regions = Vec::new();

        let mut start = 0;
        while start < n {
            if y[start] == 0.0 {
                start += 1;
                continue;
            }
            let sustained = start + 1 < n && y[start + 1] != 0.0;
            if !sustained {
                // An isolated non-zero sample bounded by zeros (or the trace
                // edge) forms a single-point region; anything else is the
                // trailing sample of a region already scanned.
                if start == 0 || y[start - 1] == 0.0 {
                    self.try_finalize(y, start, start, y[start], &mut regions);
                }
                start += 1;
                continue;
            }

            let mut apex = y[start];
            let mut end = start + 1;
            loop {
                apex = apex.max(y[end]);

                // Finalize at a zero sample or the end of the trace
                if end == n - 1 || y[end + 1] == 0.0 {
                    self.try_finalize(y, start, end, apex, &mut regions);
                    start = end;
                    break;
                }

                // Finalize at a local-minimum boundary once the search width
                // has been scanned
                if x[end] - x[start] >= self.params.search_width
                    && apex >= y[end] * self.params.min_ratio
                {
                    self.try_finalize(y, start, end, apex, &mut regions);
                    start = end;
                    break;
                }

                end += 1;
            }
        }
        regions
    }

    /// Validate the candidate region `[start, end]` and, if accepted, store
    /// it with its boundaries expanded into adjacent zero samples.
    fn try_finalize(
        &self,
        y: &[f64],
        start: usize,
        end: usize,
        apex: f64,
        regions: &mut Vec<(usize, usize)>,
    ) {
        let num_points = end - start + 1;
        if num_points < self.params.min_data_points || apex < self.params.min_height {
            return;
        }
        let left_edge = y[start];
        let right_edge = y[end];
        let ratio_left = if left_edge > 0.0 {
            apex / left_edge
        } else {
            f64::INFINITY
        };
        let ratio_right = if right_edge > 0.0 {
            apex / right_edge
        } else {
            f64::INFINITY
        };
        if ratio_left >= self.params.min_ratio && ratio_right >= self.params.min_ratio {
            regions.push(adjust_bounds(y, start, end));
        }
    }
}

/// Expand a region by one sample into an exactly-zero neighbor on either
/// side, capturing the true peak foot.
fn adjust_bounds(y: &[f64], mut start: usize, mut end: usize) -> (usize, usize) {
    if start > 0 && y[start] != 0.0 && y[start - 1] == 0.0 {
        start -= 1;
    }
    if end < y.len() - 1 && y[end] != 0.0 && y[end + 1] == 0.0 {
        end += 1;
    }
    (start, end)
}

/// Resolve a trace with the default parameter set
pub fn resolve_peaks(x: &[f64], y: &[f64]) -> Result<Vec<PeakInterval>, ResolverError> {
    PeakResolver::default().resolve(&Trace::wrap(x, y))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data::bump_trace;
    use rstest::rstest;

    fn scenario_a() -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let y = vec![0.0, 2.0, 8.0, 15.0, 8.0, 2.0, 0.0];
        (x, y)
    }

    #[test]
    fn test_single_bump() {
        let (x, y) = scenario_a();
        let peaks = resolve_peaks(&x, &y).expect("Should not encounter an error");
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0], PeakInterval::new(0.0, 6.0));
    }

    #[test]
    fn test_two_separated_bumps() {
        let x: Vec<f64> = (0..9).map(|i| i as f64).collect();
        let y = vec![0.0, 3.0, 9.0, 3.0, 0.0, 4.0, 12.0, 4.0, 0.0];
        let peaks = resolve_peaks(&x, &y).expect("Should not encounter an error");
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0], PeakInterval::new(0.0, 4.0));
        assert_eq!(peaks[1], PeakInterval::new(4.0, 8.0));
        assert!(!peaks[0].overlaps(&peaks[1]));
        // each interval covers its apex
        assert!(peaks[0].contains(2.0));
        assert!(peaks[1].contains(6.0));
    }

    #[test]
    fn test_low_ratio_bump_rejected() {
        // the trace never touches zero, so the apex/edge ratio is the only
        // gate: 8 / 5 = 1.6
        let x: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let y = vec![5.0, 6.0, 8.0, 6.0, 5.0];

        let resolver = PeakResolver::new(ResolverParams::default().min_ratio(1.7));
        let peaks = resolver.resolve(&Trace::wrap(&x, &y)).unwrap();
        assert!(peaks.is_empty());

        let resolver = PeakResolver::new(ResolverParams::default().min_ratio(1.5));
        let peaks = resolver.resolve(&Trace::wrap(&x, &y)).unwrap();
        assert_eq!(peaks, vec![PeakInterval::new(0.0, 4.0)]);
    }

    #[test]
    fn test_all_zero_trace() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y = vec![0.0; 10];
        let peaks = resolve_peaks(&x, &y).expect("Should not encounter an error");
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_isolated_sample() {
        let x = vec![0.0, 1.0, 2.0];
        let y = vec![0.0, 5.0, 0.0];
        // a single-point region has apex == edge, so the ratio gate must
        // admit flat regions for this case
        let resolver =
            PeakResolver::new(ResolverParams::default().min_data_points(1).min_ratio(1.0));
        let peaks = resolver.resolve(&Trace::wrap(&x, &y)).unwrap();
        assert_eq!(peaks, vec![PeakInterval::new(0.0, 2.0)]);

        // with the default minimum of three samples the blip is noise
        let peaks = resolve_peaks(&x, &y).unwrap();
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_invalid_input() {
        let x = vec![0.0, 1.0];
        let y = vec![0.0, 1.0, 0.0];
        assert_eq!(
            resolve_peaks(&x, &y).unwrap_err(),
            ResolverError::LengthMismatch
        );
        assert_eq!(
            resolve_peaks(&[], &[]).unwrap_err(),
            ResolverError::EmptyTrace
        );
        assert_eq!(
            resolve_peaks(&[0.0, 2.0, 1.0], &[0.0, 1.0, 0.0]).unwrap_err(),
            ResolverError::DomainNotSorted
        );
    }

    #[test]
    fn test_idempotent() {
        let (x, y) = bump_trace(61, &[(15.0, 3.0, 100.0), (45.0, 3.0, 80.0)], 1.0);
        let resolver = PeakResolver::default();
        let first = resolver.resolve(&Trace::wrap(&x, &y)).unwrap();
        let second = resolver.resolve(&Trace::wrap(&x, &y)).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_interval_invariants() {
        let (x, y) = bump_trace(
            101,
            &[(20.0, 2.5, 50.0), (48.0, 4.0, 120.0), (80.0, 3.0, 75.0)],
            1.0,
        );
        let peaks = resolve_peaks(&x, &y).unwrap();
        assert_eq!(peaks.len(), 3);
        for peak in peaks.iter() {
            assert!(x[0] <= peak.start_x);
            assert!(peak.end_x <= x[x.len() - 1]);
            assert!(peak.start_x <= peak.end_x);
        }
        for pair in peaks.windows(2) {
            assert!(pair[0].start_x <= pair[1].start_x);
            assert!(!pair[0].overlaps(&pair[1]));
        }
    }

    #[rstest]
    #[case::min_height(
        ResolverParams::default(),
        ResolverParams::default().min_height(100.0)
    )]
    #[case::min_ratio(
        ResolverParams::default().min_ratio(1.2),
        ResolverParams::default().min_ratio(3.5)
    )]
    fn test_threshold_monotonicity(#[case] loose: ResolverParams, #[case] strict: ResolverParams) {
        let (x, y) = bump_trace(
            101,
            &[(20.0, 2.5, 50.0), (48.0, 4.0, 120.0), (80.0, 3.0, 75.0)],
            1.0,
        );
        let trace = Trace::wrap(&x, &y);
        let loose_count = PeakResolver::new(loose).resolve(&trace).unwrap().len();
        let strict_count = PeakResolver::new(strict).resolve(&trace).unwrap().len();
        assert!(strict_count <= loose_count);
    }

    #[test]
    fn test_chrom_threshold_zeroes_copy() {
        let x: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let y = vec![0.5, 2.0, 8.0, 15.0, 8.0, 2.0, 0.5];
        let trace = Trace::wrap(&x, &y);

        let resolver = PeakResolver::new(ResolverParams::default().chrom_threshold(1.0));
        let peaks = resolver.resolve(&trace).unwrap();
        // the 0.5 samples are zeroed and become the expansion targets
        assert_eq!(peaks, vec![PeakInterval::new(0.0, 6.0)]);
        // the caller's array is untouched
        assert_eq!(y[0], 0.5);
        assert_eq!(trace.y[6], 0.5);
    }

    #[test]
    fn test_resolve_all_cancellation() {
        let (x, y) = bump_trace(61, &[(30.0, 3.0, 100.0)], 1.0);
        let traces = vec![Trace::wrap(&x, &y), Trace::wrap(&x, &y)];
        let resolver = PeakResolver::default();

        let token = CancelToken::new();
        let results = resolver.resolve_all(&traces, &token).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], results[1]);

        token.cancel();
        assert_eq!(
            resolver.resolve_all(&traces, &token).unwrap_err(),
            ResolverError::Cancelled
        );
    }

    #[test]
    #[cfg(feature = "parallelism")]
    fn test_resolve_all_parallel() {
        let (x, y) = bump_trace(61, &[(15.0, 3.0, 100.0), (45.0, 3.0, 80.0)], 1.0);
        let traces: Vec<Trace> = (0..8).map(|_| Trace::wrap(&x, &y)).collect();
        let resolver = PeakResolver::default();
        let token = CancelToken::new();

        let serial = resolver.resolve_all(&traces, &token).unwrap();
        let parallel = resolver.resolve_all_parallel(&traces, &token).unwrap();
        assert_eq!(serial, parallel);
    }
}
