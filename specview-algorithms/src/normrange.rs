//! Value range resolution for the band view.

use specview_core::{Representation, Result, Roi, SpectralImage, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::range::{DataRange, RangeScanner};

/// Largest value of the 8-bit display domain.
pub const DEFAULT_DOMAIN_MAX: Value = 255.0;

/// How the normalization range is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NormMode {
    /// Scan the data.
    #[default]
    Observed,
    /// Use the range the representation can take in principle.
    Theoretical,
    /// Use a given range.
    Fixed(DataRange),
}

/// Normalization range settings of one representation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NormRange {
    /// Resolution mode.
    pub mode: NormMode,
    /// Representation the range applies to.
    pub representation: Representation,
    /// Upper bound of the source value domain, used by theoretical ranges.
    pub domain_max: Value,
    /// Write the resolved range into the image's declared range.
    pub update: bool,
    /// Restrict observed scans to this region.
    pub roi: Option<Roi>,
}

impl Default for NormRange {
    fn default() -> Self {
        Self {
            mode: NormMode::default(),
            representation: Representation::default(),
            domain_max: DEFAULT_DOMAIN_MAX,
            update: true,
            roi: None,
        }
    }
}

impl NormRange {
    /// Settings for `representation` with the given mode.
    #[must_use]
    pub fn new(representation: Representation, mode: NormMode) -> Self {
        Self {
            mode,
            representation,
            ..Self::default()
        }
    }

    /// Sets the source domain maximum.
    #[must_use]
    pub fn with_domain_max(mut self, domain_max: Value) -> Self {
        self.domain_max = domain_max;
        self
    }

    /// Enables or disables writing the range back to the image.
    #[must_use]
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    /// Restricts observed scans to `roi`.
    #[must_use]
    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    /// Theoretical range of the representation, if it has one.
    ///
    /// PCA components have no a-priori bound.
    #[must_use]
    pub fn theoretical(&self) -> Option<DataRange> {
        match self.representation {
            Representation::Image => Some(DataRange::new(0.0, self.domain_max)),
            Representation::Gradient => {
                let extent = self.domain_max.max(1.0).ln();
                Some(DataRange::new(-extent, extent))
            }
            Representation::ImagePca | Representation::GradientPca => None,
        }
    }

    /// Resolves the range for `image`.
    ///
    /// Theoretical ranges without a bound fall back to an observed scan, and
    /// an observed scan without finite samples falls back to the image's
    /// declared range.
    pub fn resolve(&self, image: &SpectralImage, scanner: &dyn RangeScanner) -> DataRange {
        let observe = || {
            let range = scanner.scan(image, self.roi);
            if range.is_empty() {
                log::debug!("no finite samples in scan, keeping declared range");
                DataRange::new(image.minval(), image.maxval())
            } else {
                range
            }
        };
        match self.mode {
            NormMode::Observed => observe(),
            NormMode::Theoretical => self.theoretical().unwrap_or_else(observe),
            NormMode::Fixed(range) => range,
        }
    }

    /// Resolves the range and, with `update`, returns `image` with it as its
    /// declared range.
    ///
    /// # Errors
    /// Returns an error if the resolved range is invalid for an image.
    pub fn apply(
        &self,
        image: SpectralImage,
        scanner: &dyn RangeScanner,
    ) -> Result<(DataRange, SpectralImage)> {
        let range = self.resolve(&image, scanner);
        log::debug!(
            "{} range [{}, {}] ({:?}, {})",
            self.representation,
            range.min,
            range.max,
            self.mode,
            scanner.name()
        );
        let image = if self.update {
            image.with_range(range.min, range.max)?
        } else {
            image
        };
        Ok((range, image))
    }
}
