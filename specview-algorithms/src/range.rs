//! Global value range scanning.
//!
//! Two interchangeable strategies compute the `(min, max)` of one or more
//! band planes: a plain sequential fold and a rayon tree reduction. Both
//! skip non-finite samples and combine partial results with the same
//! associative, commutative merge, so they agree on every input.

use std::fmt;
use std::ops::Range;

use rayon::prelude::*;
use specview_core::{Normalization, Roi, SpectralImage, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Samples per parallel work item when splitting a contiguous slice.
const DEFAULT_CHUNK_LEN: usize = 1 << 16;

/// Observed value range.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DataRange {
    /// Smallest finite value seen.
    pub min: Value,
    /// Largest finite value seen.
    pub max: Value,
}

impl DataRange {
    /// Range of an empty input; the identity of [`DataRange::merge`].
    pub const EMPTY: DataRange = DataRange {
        min: Value::INFINITY,
        max: Value::NEG_INFINITY,
    };

    /// Creates a range.
    #[must_use]
    pub fn new(min: Value, max: Value) -> Self {
        Self { min, max }
    }

    /// Returns true if no finite value contributed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    /// Extends the range by one value; non-finite values are ignored.
    #[inline]
    #[must_use]
    pub fn include(self, value: Value) -> Self {
        if value.is_finite() {
            Self {
                min: self.min.min(value),
                max: self.max.max(value),
            }
        } else {
            self
        }
    }

    /// Combines two partial ranges.
    #[inline]
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Folds a slice of values.
    #[must_use]
    pub fn of(values: &[Value]) -> Self {
        values.iter().fold(Self::EMPTY, |acc, &v| acc.include(v))
    }

    /// Transform mapping this range onto `[0, domain_max]`.
    ///
    /// An empty range yields the identity.
    #[must_use]
    pub fn normalization(&self, domain_max: Value) -> Normalization {
        if self.is_empty() {
            Normalization::IDENTITY
        } else {
            Normalization::to_domain(self.min, self.max, domain_max)
        }
    }
}

/// Strategy interface for range scans.
pub trait RangeScanner: Send + Sync {
    /// Strategy name.
    fn name(&self) -> &'static str;

    /// Range of a contiguous slice.
    fn scan_values(&self, values: &[Value]) -> DataRange;

    /// Range of bands `bands` inside `roi` (whole image if `None`).
    ///
    /// Band indices past the image's band count are ignored.
    fn scan_bands(&self, image: &SpectralImage, bands: Range<usize>, roi: Option<Roi>)
        -> DataRange;

    /// Range of all bands inside `roi`.
    fn scan(&self, image: &SpectralImage, roi: Option<Roi>) -> DataRange {
        self.scan_bands(image, 0..image.band_count(), roi)
    }
}

/// Single-threaded fold.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialScanner;

impl RangeScanner for SequentialScanner {
    fn name(&self) -> &'static str {
        "Sequential"
    }

    fn scan_values(&self, values: &[Value]) -> DataRange {
        DataRange::of(values)
    }

    fn scan_bands(
        &self,
        image: &SpectralImage,
        bands: Range<usize>,
        roi: Option<Roi>,
    ) -> DataRange {
        row_slices(image, bands, roi)
            .into_iter()
            .fold(DataRange::EMPTY, |acc, row| acc.merge(DataRange::of(row)))
    }
}

/// Data-parallel tree reduction on the rayon pool.
#[derive(Debug, Clone, Copy)]
pub struct ParallelScanner {
    chunk_len: usize,
}

impl ParallelScanner {
    /// Create with the default chunk length.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_len: DEFAULT_CHUNK_LEN,
        }
    }

    /// Set the number of samples per work item (at least 1).
    #[must_use]
    pub fn with_chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len.max(1);
        self
    }
}

impl Default for ParallelScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeScanner for ParallelScanner {
    fn name(&self) -> &'static str {
        "Parallel"
    }

    fn scan_values(&self, values: &[Value]) -> DataRange {
        values
            .par_chunks(self.chunk_len)
            .map(DataRange::of)
            .reduce(|| DataRange::EMPTY, DataRange::merge)
    }

    fn scan_bands(
        &self,
        image: &SpectralImage,
        bands: Range<usize>,
        roi: Option<Roi>,
    ) -> DataRange {
        row_slices(image, bands, roi)
            .par_iter()
            .map(|row| self.scan_values(row))
            .reduce(|| DataRange::EMPTY, DataRange::merge)
    }
}

/// Runtime scanner selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScanStrategy {
    /// [`SequentialScanner`].
    Sequential,
    /// [`ParallelScanner`].
    #[default]
    Parallel,
}

impl ScanStrategy {
    /// Instantiates the selected scanner.
    #[must_use]
    pub fn scanner(self) -> Box<dyn RangeScanner> {
        match self {
            ScanStrategy::Sequential => Box::new(SequentialScanner),
            ScanStrategy::Parallel => Box::new(ParallelScanner::new()),
        }
    }
}

impl fmt::Display for ScanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStrategy::Sequential => write!(f, "sequential"),
            ScanStrategy::Parallel => write!(f, "parallel"),
        }
    }
}

/// Contiguous runs of samples covered by `bands` x `roi`.
///
/// A region spanning full rows collapses into one slice per band.
fn row_slices(image: &SpectralImage, bands: Range<usize>, roi: Option<Roi>) -> Vec<&[Value]> {
    let (width, height) = (image.width(), image.height());
    let roi = roi.map_or_else(|| Roi::full(width, height), |r| r.clip(width, height));
    let bands = bands.start.min(image.band_count())..bands.end.min(image.band_count());
    if roi.is_empty() {
        return Vec::new();
    }

    let mut rows = Vec::new();
    for d in bands {
        let plane = image.band(d);
        if roi.x == 0 && roi.width == width {
            rows.push(&plane[roi.y * width..(roi.y + roi.height) * width]);
        } else {
            for y in roi.y..roi.y + roi.height {
                let start = y * width + roi.x;
                rows.push(&plane[start..start + roi.width]);
            }
        }
    }
    rows
}
