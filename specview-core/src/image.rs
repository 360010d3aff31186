//! Multi-band spectral images.
//!
//! A [`SpectralImage`] stores one row-major plane per band. All planes share
//! the same spatial size and the same value domain `[minval, maxval]`.
//! Images are immutable once built; anything that changes the data or the
//! value domain produces a new image.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scalar type of a single spectral sample.
pub type Value = f32;

/// One pixel spectrum, one value per band.
pub type Pixel = Vec<Value>;

/// Lower clamp applied before taking the logarithm of a sample.
const LOG_FLOOR: Value = 1.0;

/// Wavelength information for one band.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BandDesc {
    range: Option<(f32, f32)>,
}

impl BandDesc {
    /// A band without wavelength information.
    #[must_use]
    pub fn unknown() -> Self {
        Self { range: None }
    }

    /// A band described by its center wavelength.
    #[must_use]
    pub fn center(wavelength: f32) -> Self {
        Self {
            range: Some((wavelength, wavelength)),
        }
    }

    /// A band described by the borders of its filter.
    #[must_use]
    pub fn range(start: f32, end: f32) -> Self {
        Self {
            range: Some((start, end)),
        }
    }

    /// Returns true if any wavelength information is present.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.range.is_some()
    }

    /// Returns the filter borders if they differ from the center.
    #[must_use]
    pub fn bounds(&self) -> Option<(f32, f32)> {
        self.range.filter(|(start, end)| start != end)
    }

    /// Center wavelength (midpoint of the filter borders when given).
    #[must_use]
    pub fn center_wavelength(&self) -> Option<f32> {
        self.range.map(|(start, end)| (start + end) / 2.0)
    }
}

/// Rectangular region of interest in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Roi {
    /// Left column.
    pub x: usize,
    /// Top row.
    pub y: usize,
    /// Width in columns.
    pub width: usize,
    /// Height in rows.
    pub height: usize,
}

impl Roi {
    /// Creates a new region.
    #[must_use]
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering a whole `width` x `height` image.
    #[must_use]
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Intersects the region with a `width` x `height` image.
    ///
    /// The result may be empty (zero width or height).
    #[must_use]
    pub fn clip(&self, width: usize, height: usize) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    /// Returns true if the region covers no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels in the region.
    #[must_use]
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// A multi-band raster image.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralImage {
    width: usize,
    height: usize,
    bands: Vec<Vec<Value>>,
    minval: Value,
    maxval: Value,
    meta: Vec<BandDesc>,
}

impl SpectralImage {
    /// Builds an image from row-major band planes.
    ///
    /// Band descriptors default to [`BandDesc::unknown`].
    ///
    /// # Errors
    /// Returns an error if `width * height` overflows, a plane is not
    /// `width * height` long or the value range is invalid.
    pub fn new(
        width: usize,
        height: usize,
        bands: Vec<Vec<Value>>,
        minval: Value,
        maxval: Value,
    ) -> Result<Self> {
        validate_range(minval, maxval)?;
        let expected = width
            .checked_mul(height)
            .ok_or(Error::ImageTooLarge { width, height })?;
        for (band, plane) in bands.iter().enumerate() {
            if plane.len() != expected {
                return Err(Error::BandSizeMismatch {
                    band,
                    expected,
                    found: plane.len(),
                });
            }
        }
        let meta = vec![BandDesc::unknown(); bands.len()];
        Ok(Self {
            width,
            height,
            bands,
            minval,
            maxval,
            meta,
        })
    }

    /// Builds an image by evaluating `f(x, y, band)` for every sample.
    ///
    /// # Errors
    /// Returns an error if `width * height` overflows or the value range is
    /// invalid.
    pub fn from_fn<F>(
        width: usize,
        height: usize,
        band_count: usize,
        minval: Value,
        maxval: Value,
        f: F,
    ) -> Result<Self>
    where
        F: Fn(usize, usize, usize) -> Value,
    {
        let pixels = width
            .checked_mul(height)
            .ok_or(Error::ImageTooLarge { width, height })?;
        let bands = (0..band_count)
            .map(|d| {
                (0..pixels)
                    .map(|i| f(i % width.max(1), i / width.max(1), d))
                    .collect()
            })
            .collect();
        Self::new(width, height, bands, minval, maxval)
    }

    /// Attaches band descriptors.
    ///
    /// # Errors
    /// Returns an error if the descriptor count differs from the band count.
    pub fn with_meta(mut self, meta: Vec<BandDesc>) -> Result<Self> {
        if meta.len() != self.bands.len() {
            return Err(Error::DescriptorMismatch {
                bands: self.bands.len(),
                descriptors: meta.len(),
            });
        }
        self.meta = meta;
        Ok(self)
    }

    /// Returns a new image generation with a different value domain.
    ///
    /// Sample data is left untouched; only the declared range changes.
    ///
    /// # Errors
    /// Returns an error if the range is invalid.
    pub fn with_range(mut self, minval: Value, maxval: Value) -> Result<Self> {
        validate_range(minval, maxval)?;
        self.minval = minval;
        self.maxval = maxval;
        Ok(self)
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of spectral bands.
    #[must_use]
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Number of pixels (`width * height`).
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Returns true if the image holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bands.is_empty() || self.pixel_count() == 0
    }

    /// Lower bound of the value domain.
    #[must_use]
    pub fn minval(&self) -> Value {
        self.minval
    }

    /// Upper bound of the value domain.
    #[must_use]
    pub fn maxval(&self) -> Value {
        self.maxval
    }

    /// Band descriptors, one per band.
    #[must_use]
    pub fn meta(&self) -> &[BandDesc] {
        &self.meta
    }

    /// Returns the row-major plane of band `d`.
    ///
    /// # Panics
    /// Panics if `d >= band_count()`.
    #[must_use]
    pub fn band(&self, d: usize) -> &[Value] {
        &self.bands[d]
    }

    /// All band planes.
    #[must_use]
    pub fn bands(&self) -> &[Vec<Value>] {
        &self.bands
    }

    /// Writes the spectrum of pixel `index` into `out`, reusing its allocation.
    ///
    /// # Panics
    /// Panics if `index >= pixel_count()`.
    #[inline]
    pub fn pixel_into(&self, index: usize, out: &mut Pixel) {
        out.clear();
        out.extend(self.bands.iter().map(|plane| plane[index]));
    }

    /// Returns the spectrum of pixel `index`.
    ///
    /// # Errors
    /// Returns an error if the index is outside the image.
    pub fn pixel(&self, index: usize) -> Result<Pixel> {
        if index >= self.pixel_count() {
            return Err(Error::PixelOutOfRange {
                index,
                pixels: self.pixel_count(),
            });
        }
        let mut out = Vec::with_capacity(self.bands.len());
        self.pixel_into(index, &mut out);
        Ok(out)
    }

    /// Computes the spectral gradient representation.
    ///
    /// Each sample is log-transformed (clamped below at 1) and adjacent bands
    /// are differenced, giving `band_count() - 1` bands in
    /// `[-ln(maxval), ln(maxval)]`.
    ///
    /// # Errors
    /// Returns an error if the image has fewer than two bands.
    pub fn spectral_gradient(&self) -> Result<Self> {
        if self.bands.len() < 2 {
            return Err(Error::ConfigError(
                "spectral gradient needs at least two bands".to_string(),
            ));
        }
        let logged: Vec<Vec<Value>> = self
            .bands
            .iter()
            .map(|plane| plane.iter().map(|v| v.max(LOG_FLOOR).ln()).collect())
            .collect();
        let bands = logged
            .windows(2)
            .map(|pair| {
                pair[1]
                    .iter()
                    .zip(&pair[0])
                    .map(|(next, cur)| next - cur)
                    .collect()
            })
            .collect();
        let meta = self
            .meta
            .windows(2)
            .map(|pair| match (pair[0].center_wavelength(), pair[1].center_wavelength()) {
                (Some(a), Some(b)) => BandDesc::center((a + b) / 2.0),
                _ => BandDesc::unknown(),
            })
            .collect();
        let extent = self.maxval.max(LOG_FLOOR).ln();
        Self::new(self.width, self.height, bands, -extent, extent)?.with_meta(meta)
    }
}

fn validate_range(minval: Value, maxval: Value) -> Result<()> {
    if !minval.is_finite() || !maxval.is_finite() || minval > maxval {
        return Err(Error::InvalidRange {
            min: minval,
            max: maxval,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_band_size_checked() {
        let result = SpectralImage::new(2, 2, vec![vec![0.0; 4], vec![0.0; 3]], 0.0, 1.0);
        assert!(matches!(
            result,
            Err(Error::BandSizeMismatch { band: 1, .. })
        ));
    }

    #[test]
    fn test_size_overflow_rejected() {
        let huge = 1usize << (usize::BITS / 2 + 1);
        assert!(matches!(
            SpectralImage::new(huge, huge, Vec::new(), 0.0, 1.0),
            Err(Error::ImageTooLarge { .. })
        ));
        assert!(matches!(
            SpectralImage::from_fn(huge, huge, 1, 0.0, 1.0, |_, _, _| 0.0),
            Err(Error::ImageTooLarge { .. })
        ));
    }

    #[test]
    fn test_invalid_range_rejected() {
        assert!(SpectralImage::new(1, 1, vec![vec![0.0]], 2.0, 1.0).is_err());
        assert!(SpectralImage::new(1, 1, vec![vec![0.0]], 0.0, f32::NAN).is_err());
    }

    #[test]
    fn test_descriptor_count_checked() {
        let img = SpectralImage::new(1, 1, vec![vec![0.0], vec![1.0]], 0.0, 1.0).unwrap();
        assert!(img.clone().with_meta(vec![BandDesc::unknown()]).is_err());
        let img = img
            .with_meta(vec![BandDesc::center(450.0), BandDesc::range(500.0, 520.0)])
            .unwrap();
        assert_eq!(img.meta()[1].center_wavelength(), Some(510.0));
        assert_eq!(img.meta()[0].bounds(), None);
    }

    #[test]
    fn test_pixel_access() {
        let img = SpectralImage::from_fn(3, 2, 2, 0.0, 100.0, |x, y, d| {
            (x + 10 * y + 50 * d) as f32
        })
        .unwrap();
        assert_eq!(img.pixel_count(), 6);
        assert_eq!(img.pixel(4).unwrap(), vec![11.0, 61.0]);
        assert!(img.pixel(6).is_err());
    }

    #[test]
    fn test_roi_clip() {
        let roi = Roi::new(3, 1, 10, 10).clip(5, 4);
        assert_eq!(roi, Roi::new(3, 1, 2, 3));
        assert!(Roi::new(9, 9, 2, 2).clip(5, 4).is_empty());
    }

    #[test]
    fn test_spectral_gradient() {
        let img = SpectralImage::new(
            1,
            1,
            vec![vec![10.0], vec![100.0], vec![0.5]],
            0.0,
            255.0,
        )
        .unwrap();
        let grad = img.spectral_gradient().unwrap();
        assert_eq!(grad.band_count(), 2);
        assert_relative_eq!(grad.band(0)[0], 10.0_f32.ln(), epsilon = 1e-5);
        assert_relative_eq!(grad.band(1)[0], -(100.0_f32.ln()), epsilon = 1e-5);
        assert_relative_eq!(grad.maxval(), 255.0_f32.ln(), epsilon = 1e-5);
        assert_relative_eq!(grad.minval(), -(255.0_f32.ln()), epsilon = 1e-5);
    }

    #[test]
    fn test_gradient_needs_two_bands() {
        let img = SpectralImage::new(1, 1, vec![vec![1.0]], 0.0, 1.0).unwrap();
        assert!(img.spectral_gradient().is_err());
    }
}
