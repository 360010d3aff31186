//! Versioned viewport configuration.
//!
//! [`ViewportContext`] describes how the band view is currently binned.
//! [`SharedContext`] wraps it for concurrent use: every mutation produces a
//! new generation, so a rebuild that captured an older generation can tell
//! that its result is stale.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::{BandDesc, SpectralImage, Value};
use crate::quantize::Quantizer;

/// Name of label 0.
pub const UNLABELED_NAME: &str = "unlabeled";

/// Data representation shown in the band view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Representation {
    /// Raw image values.
    #[default]
    Image,
    /// Spectral gradient of the image.
    Gradient,
    /// Principal components of the image.
    ImagePca,
    /// Principal components of the gradient.
    GradientPca,
}

impl Representation {
    /// All representations in display order.
    pub const ALL: [Representation; 4] = [
        Representation::Image,
        Representation::Gradient,
        Representation::ImagePca,
        Representation::GradientPca,
    ];

    /// Returns true for representations derived from the gradient.
    #[must_use]
    pub fn is_gradient(self) -> bool {
        matches!(self, Representation::Gradient | Representation::GradientPca)
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Image => write!(f, "image"),
            Representation::Gradient => write!(f, "gradient"),
            Representation::ImagePca => write!(f, "image PCA"),
            Representation::GradientPca => write!(f, "gradient PCA"),
        }
    }
}

/// Binning configuration of one band view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportContext {
    dimensionality: usize,
    representation: Representation,
    meta: Vec<BandDesc>,
    labels: Vec<String>,
    illuminant_correction: bool,
    quantizer: Quantizer,
    minval: Value,
    maxval: Value,
}

impl ViewportContext {
    /// Creates a context over `dimensionality` bands.
    ///
    /// # Errors
    /// Returns an error if `nbins` is outside `1..=256` or the range is invalid.
    pub fn new(dimensionality: usize, nbins: usize, minval: Value, maxval: Value) -> Result<Self> {
        Ok(Self {
            dimensionality,
            representation: Representation::default(),
            meta: vec![BandDesc::unknown(); dimensionality],
            labels: vec![UNLABELED_NAME.to_string()],
            illuminant_correction: false,
            quantizer: Quantizer::new(minval, maxval, nbins)?,
            minval,
            maxval,
        })
    }

    /// Creates a context matching an image's bands and value range.
    ///
    /// # Errors
    /// Returns an error if `nbins` is outside `1..=256`.
    pub fn for_image(image: &SpectralImage, nbins: usize) -> Result<Self> {
        let mut ctx = Self::new(image.band_count(), nbins, image.minval(), image.maxval())?;
        ctx.meta = image.meta().to_vec();
        Ok(ctx)
    }

    /// Sets the representation.
    #[must_use]
    pub fn with_representation(mut self, representation: Representation) -> Self {
        self.representation = representation;
        self
    }

    /// Sets the label names; label 0 is always the unlabeled set.
    ///
    /// `names` lists labels 1.. only.
    #[must_use]
    pub fn with_labels<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.truncate(1);
        self.labels.extend(names.into_iter().map(Into::into));
        self
    }

    /// Enables or disables illuminant correction.
    #[must_use]
    pub fn with_illuminant_correction(mut self, enabled: bool) -> Self {
        self.illuminant_correction = enabled;
        self
    }

    /// Sets the band descriptors.
    ///
    /// # Errors
    /// Returns an error if the count differs from the dimensionality.
    pub fn with_meta(mut self, meta: Vec<BandDesc>) -> Result<Self> {
        if meta.len() != self.dimensionality {
            return Err(Error::DescriptorMismatch {
                bands: self.dimensionality,
                descriptors: meta.len(),
            });
        }
        self.meta = meta;
        Ok(self)
    }

    /// Changes the bin count, recomputing the bin size.
    ///
    /// # Errors
    /// Returns an error if `nbins` is outside `1..=256`.
    pub fn set_nbins(&mut self, nbins: usize) -> Result<()> {
        self.quantizer = Quantizer::new(self.minval, self.maxval, nbins)?;
        Ok(())
    }

    /// Changes the value range, recomputing the bin size.
    ///
    /// # Errors
    /// Returns an error if the range is invalid.
    pub fn set_range(&mut self, minval: Value, maxval: Value) -> Result<()> {
        self.quantizer = Quantizer::new(minval, maxval, self.quantizer.nbins())?;
        self.minval = minval;
        self.maxval = maxval;
        Ok(())
    }

    /// Changes the representation.
    pub fn set_representation(&mut self, representation: Representation) {
        self.representation = representation;
    }

    /// Changes dimensionality and descriptors, e.g. after switching to a
    /// representation with a different band count.
    ///
    /// # Errors
    /// Returns an error if the descriptor count differs from `dimensionality`.
    pub fn set_dimensionality(&mut self, dimensionality: usize, meta: Vec<BandDesc>) -> Result<()> {
        if meta.len() != dimensionality {
            return Err(Error::DescriptorMismatch {
                bands: dimensionality,
                descriptors: meta.len(),
            });
        }
        self.dimensionality = dimensionality;
        self.meta = meta;
        Ok(())
    }

    /// Enables or disables illuminant correction.
    pub fn set_illuminant_correction(&mut self, enabled: bool) {
        self.illuminant_correction = enabled;
    }

    /// Number of bands per pixel.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    /// Active representation.
    #[must_use]
    pub fn representation(&self) -> Representation {
        self.representation
    }

    /// Band descriptors.
    #[must_use]
    pub fn meta(&self) -> &[BandDesc] {
        &self.meta
    }

    /// Label names, index 0 being the unlabeled set.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of labels including the unlabeled set.
    #[must_use]
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Whether illuminant correction is active.
    #[must_use]
    pub fn illuminant_correction(&self) -> bool {
        self.illuminant_correction
    }

    /// Bins per dimension.
    #[must_use]
    pub fn nbins(&self) -> usize {
        self.quantizer.nbins()
    }

    /// Bin width in value units.
    #[must_use]
    pub fn binsize(&self) -> Value {
        self.quantizer.binsize()
    }

    /// Lower bound of the binned range.
    #[must_use]
    pub fn minval(&self) -> Value {
        self.minval
    }

    /// Upper bound of the binned range.
    #[must_use]
    pub fn maxval(&self) -> Value {
        self.maxval
    }

    /// Quantizer for the current range and bin count.
    #[must_use]
    pub fn quantizer(&self) -> Quantizer {
        self.quantizer
    }
}

/// A context together with the generation it was captured at.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    /// Generation at capture time.
    pub generation: u64,
    /// Captured configuration.
    pub context: Arc<ViewportContext>,
}

/// Shared, versioned [`ViewportContext`].
///
/// Two counters track rebuild state: `reset` is the current generation and
/// grows on every change; `wait` holds the generation still waiting for a
/// rebuild, or 0 when the published result is current.
#[derive(Debug)]
pub struct SharedContext {
    current: RwLock<Arc<ViewportContext>>,
    reset: AtomicU64,
    wait: AtomicU64,
}

impl SharedContext {
    /// Wraps `context` as generation 1, with a rebuild pending.
    #[must_use]
    pub fn new(context: ViewportContext) -> Self {
        Self {
            current: RwLock::new(Arc::new(context)),
            reset: AtomicU64::new(1),
            wait: AtomicU64::new(1),
        }
    }

    /// Captures the current configuration and its generation.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let current = self.current.read();
        ContextSnapshot {
            generation: self.reset.load(Ordering::Acquire),
            context: Arc::clone(&current),
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn get(&self) -> Arc<ViewportContext> {
        Arc::clone(&self.current.read())
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.reset.load(Ordering::Acquire)
    }

    /// Returns true if `generation` is no longer current.
    #[must_use]
    pub fn is_stale(&self, generation: u64) -> bool {
        self.generation() != generation
    }

    /// Returns true while a change has not been served by a rebuild.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.wait.load(Ordering::Acquire) != 0
    }

    /// Applies `f` to a copy of the configuration and publishes it as a new
    /// generation. Nothing changes if `f` fails.
    ///
    /// # Errors
    /// Propagates the error returned by `f`.
    pub fn update<F>(&self, f: F) -> Result<u64>
    where
        F: FnOnce(&mut ViewportContext) -> Result<()>,
    {
        let mut current = self.current.write();
        let mut next = ViewportContext::clone(&current);
        f(&mut next)?;
        *current = Arc::new(next);
        Ok(self.bump())
    }

    /// Starts a new generation without changing the configuration, e.g.
    /// when the underlying image or label mask was replaced.
    pub fn invalidate(&self) -> u64 {
        let _current = self.current.write();
        self.bump()
    }

    fn bump(&self) -> u64 {
        let generation = self.reset.fetch_add(1, Ordering::AcqRel) + 1;
        self.wait.store(generation, Ordering::Release);
        generation
    }

    /// Marks `generation` as served. Fails if a newer change arrived.
    pub fn complete(&self, generation: u64) -> bool {
        self.wait
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_binsize_follows_range_and_bins() {
        let mut ctx = ViewportContext::new(2, 3, 0.0, 30.0).unwrap();
        assert_relative_eq!(ctx.binsize(), 10.0);
        ctx.set_nbins(6).unwrap();
        assert_relative_eq!(ctx.binsize(), 5.0);
        ctx.set_range(0.0, 60.0).unwrap();
        assert_relative_eq!(ctx.binsize(), 10.0);
        assert!(ctx.set_range(10.0, 0.0).is_err());
        assert_relative_eq!(ctx.maxval(), 60.0);
    }

    #[test]
    fn test_labels_keep_unlabeled_first() {
        let ctx = ViewportContext::new(1, 4, 0.0, 1.0)
            .unwrap()
            .with_labels(["leaf", "bark"]);
        assert_eq!(ctx.labels(), ["unlabeled", "leaf", "bark"]);
        let ctx = ctx.with_labels(["sky"]);
        assert_eq!(ctx.label_count(), 2);
    }

    #[test]
    fn test_update_bumps_generation() {
        let shared = SharedContext::new(ViewportContext::new(2, 8, 0.0, 1.0).unwrap());
        let before = shared.snapshot();
        assert_eq!(before.generation, 1);

        let generation = shared
            .update(|ctx| {
                ctx.set_representation(Representation::Gradient);
                Ok(())
            })
            .unwrap();
        assert_eq!(generation, 2);
        assert!(shared.is_stale(before.generation));
        assert_eq!(before.context.representation(), Representation::Image);
        assert_eq!(shared.get().representation(), Representation::Gradient);
    }

    #[test]
    fn test_failed_update_changes_nothing() {
        let shared = SharedContext::new(ViewportContext::new(2, 8, 0.0, 1.0).unwrap());
        assert!(shared.update(|ctx| ctx.set_nbins(0)).is_err());
        assert_eq!(shared.generation(), 1);
        assert_eq!(shared.get().nbins(), 8);
    }

    #[test]
    fn test_complete_only_for_latest_generation() {
        let shared = SharedContext::new(ViewportContext::new(2, 8, 0.0, 1.0).unwrap());
        assert!(shared.is_pending());
        let stale = shared.generation();
        let latest = shared.invalidate();

        assert!(!shared.complete(stale));
        assert!(shared.is_pending());
        assert!(shared.complete(latest));
        assert!(!shared.is_pending());
    }

    #[test]
    fn test_representation_kinds() {
        assert!(Representation::GradientPca.is_gradient());
        assert!(!Representation::ImagePca.is_gradient());
        assert_eq!(Representation::ALL.len(), 4);
        assert_eq!(Representation::ImagePca.to_string(), "image PCA");
    }
}
