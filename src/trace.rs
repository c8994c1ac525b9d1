//! The in-memory call contract: a borrowed or owned signal-over-domain array
//! pair coming in, and plain interval values going out.
use std::borrow::Cow;
use std::fmt;
use std::iter::FusedIterator;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::resolver::ResolverError;
use crate::search;

/// An iterator over the paired `(x, y)` points of a [`Trace`]
pub struct TraceIter<'a> {
    inner: std::iter::Zip<
        std::iter::Copied<std::slice::Iter<'a, f64>>,
        std::iter::Copied<std::slice::Iter<'a, f64>>,
    >,
}

impl<'a> TraceIter<'a> {
    pub fn new(
        inner: std::iter::Zip<
            std::iter::Copied<std::slice::Iter<'a, f64>>,
            std::iter::Copied<std::slice::Iter<'a, f64>>,
        >,
    ) -> Self {
        Self { inner }
    }
}

impl<'a> Iterator for TraceIter<'a> {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<'a> FusedIterator for TraceIter<'a> {}

impl<'a> ExactSizeIterator for TraceIter<'a> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// An ordered intensity-over-domain signal, either a chromatogram or a
/// mobilogram.
///
/// The domain array is expected to be strictly increasing and of the same
/// length as the intensity array. Construction does not enforce this, so
/// that cheap borrowing conversions stay infallible; [`Trace::validate`]
/// performs the checks and every resolving entry point calls it before
/// touching the data.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trace<'a, 'b> {
    /// The domain axis, retention time or ion mobility
    pub x: Cow<'a, [f64]>,
    /// The paired signal intensities
    pub y: Cow<'b, [f64]>,
}

impl<'c, 'd, 'a: 'c, 'b: 'd, 'e: 'c + 'd + 'a + 'b> Trace<'a, 'b> {
    pub fn new(x: Cow<'a, [f64]>, y: Cow<'b, [f64]>) -> Self {
        Self { x, y }
    }

    pub fn wrap(x: &'a [f64], y: &'b [f64]) -> Self {
        Self::new(Cow::Borrowed(x), Cow::Borrowed(y))
    }

    /// The number of data points
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Check the invariants the resolver depends upon: non-empty, matched
    /// array lengths, and a strictly increasing domain.
    pub fn validate(&self) -> Result<(), ResolverError> {
        if self.x.len() != self.y.len() {
            return Err(ResolverError::LengthMismatch);
        }
        if self.x.is_empty() {
            return Err(ResolverError::EmptyTrace);
        }
        if self.x.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ResolverError::DomainNotSorted);
        }
        Ok(())
    }

    /// The width of the domain covered by this trace
    pub fn span(&self) -> f64 {
        if self.x.is_empty() {
            return 0.0;
        }
        self.x.last().copied().unwrap_or_default() - self.x.first().copied().unwrap_or_default()
    }

    pub fn get(&self, index: usize) -> (f64, f64) {
        (self.x[index], self.y[index])
    }

    /// Find the index whose domain value is nearest to `value`
    pub fn find_index(&self, value: f64) -> usize {
        search::nearest(&self.x, value)
    }

    /// Map a closed domain interval onto the index range covering it
    pub fn index_range(&self, interval: &PeakInterval) -> Range<usize> {
        let start = self.find_index(interval.start_x);
        let end = self.find_index(interval.end_x);
        start..(end + 1).min(self.len())
    }

    /// Find the index where the intensity achieves its maximum value
    pub fn argmax(&self) -> usize {
        let mut ymax = 0.0;
        let mut ymax_i = 0;
        for (i, y) in self.y.iter().copied().enumerate() {
            if y > ymax {
                ymax = y;
                ymax_i = i;
            }
        }
        ymax_i
    }

    pub fn iter(&self) -> TraceIter<'_> {
        TraceIter::new(self.x.iter().copied().zip(self.y.iter().copied()))
    }

    /// Create a new [`Trace`] borrowing its data from this one
    pub fn borrow(&'e self) -> Trace<'c, 'd> {
        let x = match &self.x {
            Cow::Owned(v) => Cow::Borrowed(v.as_slice()),
            Cow::Borrowed(v) => Cow::Borrowed(*v),
        };
        let y = match &self.y {
            Cow::Owned(v) => Cow::Borrowed(v.as_slice()),
            Cow::Borrowed(v) => Cow::Borrowed(*v),
        };
        Trace::new(x, y)
    }
}

impl<'a, 'b> From<(&'a [f64], &'b [f64])> for Trace<'a, 'b> {
    fn from(pair: (&'a [f64], &'b [f64])) -> Self {
        Trace::wrap(pair.0, pair.1)
    }
}

impl From<(Vec<f64>, Vec<f64>)> for Trace<'static, 'static> {
    fn from(pair: (Vec<f64>, Vec<f64>)) -> Self {
        Trace::new(Cow::Owned(pair.0), Cow::Owned(pair.1))
    }
}

/// A closed interval `[start_x, end_x]` over the domain of a [`Trace`],
/// demarcating one resolved peak region.
///
/// Purely a value, carrying no reference back to the trace it was resolved
/// from. The downstream feature builder is responsible for materializing the
/// data points it covers.
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakInterval {
    pub start_x: f64,
    pub end_x: f64,
}

impl PeakInterval {
    /// Create a new interval, swapping the endpoints if they arrive reversed
    pub fn new(start_x: f64, end_x: f64) -> Self {
        if start_x > end_x {
            Self {
                start_x: end_x,
                end_x: start_x,
            }
        } else {
            Self { start_x, end_x }
        }
    }

    pub fn width(&self) -> f64 {
        self.end_x - self.start_x
    }

    pub fn contains(&self, x: f64) -> bool {
        self.start_x <= x && x <= self.end_x
    }

    /// Whether the interiors of two intervals intersect. Sharing a single
    /// boundary point does not count as overlap.
    pub fn overlaps(&self, other: &PeakInterval) -> bool {
        self.start_x < other.end_x && other.start_x < self.end_x
    }
}

impl fmt::Display for PeakInterval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PeakInterval({}, {})", self.start_x, self.end_x)
    }
}
