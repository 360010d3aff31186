//! Linear quantization of pixel spectra into bin keys.

use std::borrow::Borrow;
use std::fmt;

use crate::error::{Error, Result};
use crate::image::Value;

/// Largest supported bin count (one byte per key dimension).
pub const MAX_BINS: usize = 256;

/// Quantized spectrum: one bin index per band.
///
/// Keys hash and compare as plain byte strings, so lookups can be done
/// with a borrowed `&[u8]` without allocating.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinKey(Box<[u8]>);

impl BinKey {
    /// Key bytes, one per dimension.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for a zero-dimensional key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for BinKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl From<Vec<u8>> for BinKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }
}

impl Borrow<[u8]> for BinKey {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for BinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BinKey").field(&&*self.0).finish()
    }
}

/// Maps values from `[minval, maxval]` onto `[0, nbins - 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    minval: Value,
    binsize: Value,
    nbins: usize,
}

impl Quantizer {
    /// Creates a quantizer with `binsize = (maxval - minval) / nbins`.
    ///
    /// # Errors
    /// Returns an error if `nbins` is outside `1..=256` or the range is invalid.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(minval: Value, maxval: Value, nbins: usize) -> Result<Self> {
        if nbins == 0 || nbins > MAX_BINS {
            return Err(Error::InvalidBinCount(nbins));
        }
        if !minval.is_finite() || !maxval.is_finite() || minval > maxval {
            return Err(Error::InvalidRange {
                min: minval,
                max: maxval,
            });
        }
        Ok(Self {
            minval,
            binsize: (maxval - minval) / nbins as Value,
            nbins,
        })
    }

    /// Width of one bin in value units.
    #[must_use]
    pub fn binsize(&self) -> Value {
        self.binsize
    }

    /// Number of bins per dimension.
    #[must_use]
    pub fn nbins(&self) -> usize {
        self.nbins
    }

    /// Bin index of a single value, clamped to `[0, nbins - 1]`.
    ///
    /// NaN maps to bin 0; a degenerate range puts everything in bin 0.
    #[inline]
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn index(&self, value: Value) -> u8 {
        if self.binsize <= 0.0 || value.is_nan() {
            return 0;
        }
        let pos = ((value - self.minval) / self.binsize).floor();
        pos.clamp(0.0, (self.nbins - 1) as Value) as u8
    }

    /// Writes the key of `pixel` into `out`, reusing its allocation.
    #[inline]
    pub fn key_into(&self, pixel: &[Value], out: &mut Vec<u8>) {
        out.clear();
        out.extend(pixel.iter().map(|&v| self.index(v)));
    }

    /// Returns the key of `pixel`.
    #[must_use]
    pub fn key(&self, pixel: &[Value]) -> BinKey {
        let mut out = Vec::with_capacity(pixel.len());
        self.key_into(pixel, &mut out);
        out.into()
    }

    /// Value at the center of bin `index`.
    #[must_use]
    pub fn bin_center(&self, index: u8) -> Value {
        self.minval + (Value::from(index) + 0.5) * self.binsize
    }
}
