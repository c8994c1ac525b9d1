//! Resolving chromatographic traces into peak intervals.
//!
//! A [`Trace`] pairs a sorted domain array (retention time or ion mobility)
//! with an intensity array. The [`PeakResolver`] segments a trace at local
//! minima and zero gaps, validates candidate regions by size, height, and
//! apex-to-edge ratio, and emits non-overlapping [`PeakInterval`] values in
//! domain units. [`quality`] scores resolved regions by shape, and the
//! [`Calibrator`] searches a data-derived parameter grid for the
//! combination whose resolved peaks score best.
//!
//! ```rust
//! use chromresolve::{PeakResolver, Trace};
//!
//! let time = [0.0f64, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let intensity = [0.0f64, 2.0, 8.0, 15.0, 8.0, 2.0, 0.0];
//!
//! let resolver = PeakResolver::default();
//! let peaks = resolver.resolve(&Trace::wrap(&time, &intensity))?;
//! assert_eq!(peaks.len(), 1);
//! assert_eq!(peaks[0].start_x, 0.0);
//! assert_eq!(peaks[0].end_x, 6.0);
//! # Ok::<(), chromresolve::ResolverError>(())
//! ```
//!
//! ## Features
//!
//! By default, the `nalgebra` feature is enabled, using the pure Rust
//! `nalgebra` library to solve the least-squares problem behind the
//! Gaussian-fit quality metric. The `openblas`, `netlib`, and `intel-mkl`
//! features instead select `ndarray` and `ndarray-linalg` with the
//! respective LAPACK implementation, which requires a BLAS library to link
//! against.
//!
//! The `parallelism` feature, also a default, adds `rayon`-powered
//! [`PeakResolver::resolve_all_parallel`] and
//! [`Calibrator::calibrate_parallel`].
pub mod calibrate;
pub mod quality;
pub mod resolver;
pub mod search;
pub mod threshold;
pub mod trace;

pub mod test_data;

pub use crate::calibrate::{
    AutoResolver, CalibratedParams, CalibrationConfig, Calibrator,
};
pub use crate::quality::{score_interval, QualityScore, ScoreWeights};
pub use crate::resolver::{
    resolve_peaks, CancelToken, PeakResolver, ResolverError, ResolverParams,
};
pub use crate::threshold::{apply_threshold, baseline, global_threshold, local_thresholds};
pub use crate::trace::{PeakInterval, Trace};
