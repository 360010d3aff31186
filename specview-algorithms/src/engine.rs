//! Bin aggregation engine.
//!
//! The engine turns a [`SpectralImage`] and a [`LabelMask`] into one
//! [`BinSet`] per label and keeps them current:
//!
//! 1. **Full rebuild**: rows are split into chunks that rayon workers bin
//!    concurrently into fresh sets. The result is published only if the
//!    [`SharedContext`] generation captured at the start is still current;
//!    otherwise it is dropped silently.
//! 2. **Delta update**: a [`LabelChange`] moves one pixel from its old
//!    label's set to the new one, in place, on the published sets.
//!
//! Every applied delta advances a label epoch. A build records the epoch it
//! started at and is not published if a delta landed meanwhile, since its
//! mask may predate that delta. Callers hand [`AggregationEngine::build`] a
//! mask that already reflects every delta applied so far.
//!
//! Readers take an `Arc` to the published collection with
//! [`AggregationEngine::current`]; a rebuild swaps the whole collection, so a
//! reader never sees a half-built one.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use rayon::prelude::*;
use specview_core::{
    BinSet, ContextSnapshot, Error, LabelChange, LabelMask, Pixel, Result, SharedContext,
    SpectralImage, ViewportContext,
};

use crate::config::AggregationConfig;

/// Bin sets built for one context generation.
#[derive(Debug)]
pub struct PublishedSets {
    generation: u64,
    context: Arc<ViewportContext>,
    sets: Vec<BinSet>,
}

impl PublishedSets {
    /// Generation the sets were built for (0 before the first rebuild).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Context the sets were built with.
    #[must_use]
    pub fn context(&self) -> &Arc<ViewportContext> {
        &self.context
    }

    /// One set per label, indexed by label id.
    #[must_use]
    pub fn sets(&self) -> &[BinSet] {
        &self.sets
    }

    /// Set of `label`, if declared.
    #[must_use]
    pub fn set(&self, label: u8) -> Option<&BinSet> {
        self.sets.get(usize::from(label))
    }

    /// Total weight over all sets.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.sets.iter().map(BinSet::total_weight).sum()
    }
}

/// Counters of one full rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Pixels binned; excludes dropped pixels and skipped chunks.
    pub pixels: usize,
    /// Pixels dropped because a set hit its bin limit.
    pub dropped: usize,
    /// Row chunks skipped after the build went stale.
    pub skipped_chunks: usize,
}

/// Sets built for a snapshot but not yet published.
#[derive(Debug)]
pub struct Build {
    snapshot: ContextSnapshot,
    label_epoch: u64,
    sets: Vec<BinSet>,
    stats: RebuildStats,
}

impl Build {
    /// Generation the build was started for.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.snapshot.generation
    }

    /// Label epoch the build was started at.
    #[must_use]
    pub fn label_epoch(&self) -> u64 {
        self.label_epoch
    }

    /// Build counters.
    #[must_use]
    pub fn stats(&self) -> RebuildStats {
        self.stats
    }

    /// Built sets, indexed by label id.
    #[must_use]
    pub fn sets(&self) -> &[BinSet] {
        &self.sets
    }
}

/// Result of a full rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The new sets are now visible to readers.
    Published {
        /// Generation of the published sets.
        generation: u64,
        /// Build counters.
        stats: RebuildStats,
    },
    /// The context changed while building; the result was discarded.
    Stale {
        /// Generation the build started from.
        built: u64,
        /// Generation current at publish time.
        current: u64,
    },
    /// A delta was applied while building, so the build's mask is outdated;
    /// the result was discarded.
    LabelsChanged {
        /// Label epoch the build started at.
        built: u64,
        /// Label epoch at publish time.
        current: u64,
    },
}

impl RebuildOutcome {
    /// Returns true if the rebuild was published.
    #[must_use]
    pub fn is_published(&self) -> bool {
        matches!(self, RebuildOutcome::Published { .. })
    }
}

/// Result of one delta update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// The pixel moved between sets.
    Applied,
    /// Old and new label are the same.
    Unchanged,
    /// The pixel was not counted in its old label's set; nothing changed.
    Skipped,
}

/// Counters of a batch of delta updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    /// Deltas applied.
    pub applied: usize,
    /// No-op deltas.
    pub unchanged: usize,
    /// Deltas skipped as inconsistent.
    pub skipped: usize,
}

/// Builds, publishes and incrementally maintains per-label bin sets.
pub struct AggregationEngine {
    context: Arc<SharedContext>,
    config: AggregationConfig,
    pool: Option<rayon::ThreadPool>,
    published: RwLock<Arc<PublishedSets>>,
    label_epoch: AtomicU64,
}

impl AggregationEngine {
    /// Create an engine bound to `context`.
    ///
    /// # Errors
    /// Returns an error if a dedicated worker pool cannot be created.
    pub fn new(context: Arc<SharedContext>, config: AggregationConfig) -> Result<Self> {
        let pool = config
            .parallelism
            .map(|threads| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("specview-bin-{i}"))
                    .build()
                    .map_err(|e| Error::ConfigError(e.to_string()))
            })
            .transpose()?;
        let empty = PublishedSets {
            generation: 0,
            context: context.get(),
            sets: Vec::new(),
        };
        Ok(Self {
            context,
            config,
            pool,
            published: RwLock::new(Arc::new(empty)),
            label_epoch: AtomicU64::new(0),
        })
    }

    /// Shared context the engine follows.
    #[must_use]
    pub fn context(&self) -> &Arc<SharedContext> {
        &self.context
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Number of deltas applied so far.
    #[must_use]
    pub fn label_epoch(&self) -> u64 {
        self.label_epoch.load(Ordering::Acquire)
    }

    /// Currently published sets.
    #[must_use]
    pub fn current(&self) -> Arc<PublishedSets> {
        Arc::clone(&self.published.read())
    }

    /// Builds sets for the current context and publishes them if neither the
    /// context nor the labels changed meanwhile.
    ///
    /// # Errors
    /// Returns an error if image, mask and context disagree.
    pub fn rebuild(&self, image: &SpectralImage, labels: &LabelMask) -> Result<RebuildOutcome> {
        let snapshot = self.context.snapshot();
        let build = self.build(snapshot, image, labels)?;
        Ok(self.publish(build))
    }

    /// Runs [`AggregationEngine::rebuild`] on a background thread.
    pub fn spawn_rebuild(
        self: &Arc<Self>,
        image: Arc<SpectralImage>,
        labels: Arc<LabelMask>,
    ) -> JoinHandle<Result<RebuildOutcome>> {
        let engine = Arc::clone(self);
        thread::spawn(move || engine.rebuild(&image, &labels))
    }

    /// Bins every pixel of `image` into fresh sets for `snapshot`.
    ///
    /// Chunks that start after the context moved past `snapshot` are skipped;
    /// such a build can no longer be published. `labels` must include every
    /// delta applied before this call.
    ///
    /// # Errors
    /// Returns an error if image, mask and context disagree.
    pub fn build(
        &self,
        snapshot: ContextSnapshot,
        image: &SpectralImage,
        labels: &LabelMask,
    ) -> Result<Build> {
        let label_epoch = self.label_epoch();
        let ctx = &snapshot.context;
        check_inputs(ctx, image, labels)?;

        let bin_limit = self
            .config
            .resolve_bin_limit(ctx.dimensionality(), ctx.label_count())?;
        let sets = ctx
            .labels()
            .iter()
            .enumerate()
            .map(|(label, name)| {
                let label = u8::try_from(label).map_err(|_| {
                    Error::ConfigError(format!("{} labels exceed the 8-bit label range", ctx.label_count()))
                })?;
                Ok(BinSet::new(label, name.clone(), ctx.dimensionality())
                    .with_shards(self.config.shards)
                    .with_bin_limit(bin_limit))
            })
            .collect::<Result<Vec<BinSet>>>()?;

        let quantizer = ctx.quantizer();
        let width = image.width();
        let height = image.height();
        let rows = self.config.rows_per_chunk.max(1);
        let n_chunks = height.div_ceil(rows);
        let dimensionality = ctx.dimensionality();
        let mask = labels.as_slice();
        let visited = AtomicUsize::new(0);
        let dropped = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);

        let bin_chunk = |chunk: usize, buffers: &mut (Pixel, Vec<u8>)| -> Result<()> {
            if self.context.is_stale(snapshot.generation) {
                skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            let (pixel, key) = buffers;
            let start = chunk * rows * width;
            let end = ((chunk + 1) * rows).min(height) * width;
            visited.fetch_add(end - start, Ordering::Relaxed);
            for index in start..end {
                image.pixel_into(index, pixel);
                quantizer.key_into(pixel, key);
                match sets[usize::from(mask[index])].add(key, pixel) {
                    Ok(()) => {}
                    Err(Error::BinLimitExceeded { .. }) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        };
        let buffers = || {
            (
                Vec::with_capacity(dimensionality),
                Vec::with_capacity(dimensionality),
            )
        };

        if self.config.parallel {
            self.install(|| {
                (0..n_chunks)
                    .into_par_iter()
                    .try_for_each_init(buffers, |bufs, chunk| bin_chunk(chunk, bufs))
            })?;
        } else {
            let mut bufs = buffers();
            (0..n_chunks).try_for_each(|chunk| bin_chunk(chunk, &mut bufs))?;
        }

        let dropped = dropped.into_inner();
        let stats = RebuildStats {
            pixels: visited.into_inner() - dropped,
            dropped,
            skipped_chunks: skipped.into_inner(),
        };
        if stats.dropped > 0 {
            log::warn!(
                "bin limit reached: {} of {} pixels not binned",
                stats.dropped,
                image.pixel_count()
            );
        }
        Ok(Build {
            snapshot,
            label_epoch,
            sets,
            stats,
        })
    }

    /// Publishes `build` unless the context moved past its generation or a
    /// delta was applied since it started.
    pub fn publish(&self, build: Build) -> RebuildOutcome {
        // deltas hold the read lock, so the epoch cannot move while we check
        let mut published = self.published.write();
        let current = self.context.generation();
        let built = build.snapshot.generation;
        if built != current || built < published.generation {
            log::debug!("discarding stale rebuild (generation {built}, current {current})");
            return RebuildOutcome::Stale { built, current };
        }
        let epoch = self.label_epoch();
        if build.label_epoch != epoch {
            log::debug!(
                "discarding rebuild for generation {built}: labels changed (epoch {}, current {epoch})",
                build.label_epoch
            );
            return RebuildOutcome::LabelsChanged {
                built: build.label_epoch,
                current: epoch,
            };
        }

        *published = Arc::new(PublishedSets {
            generation: built,
            context: build.snapshot.context,
            sets: build.sets,
        });
        drop(published);
        self.context.complete(built);
        log::debug!(
            "published rebuild for generation {built} ({} pixels)",
            build.stats.pixels
        );
        RebuildOutcome::Published {
            generation: built,
            stats: build.stats,
        }
    }

    /// Moves one pixel between label sets of the published collection.
    ///
    /// # Errors
    /// Returns an error if the pixel or a label is out of range, if the image
    /// does not match the published context, or if the new label's set is at
    /// its bin limit (the pixel then stays in its old set).
    pub fn apply_delta(&self, image: &SpectralImage, change: LabelChange) -> Result<DeltaOutcome> {
        let published = self.published.read();
        let mut pixel = Vec::with_capacity(image.band_count());
        let mut key = Vec::with_capacity(image.band_count());
        let outcome = apply_one(&published, image, change, &mut pixel, &mut key)?;
        if outcome != DeltaOutcome::Unchanged {
            self.label_epoch.fetch_add(1, Ordering::AcqRel);
        }
        Ok(outcome)
    }

    /// Applies a batch of deltas in order.
    ///
    /// # Errors
    /// Stops at the first failing delta; earlier deltas stay applied.
    pub fn apply_deltas(&self, image: &SpectralImage, changes: &[LabelChange]) -> Result<DeltaStats> {
        let published = self.published.read();
        let mut pixel = Vec::with_capacity(image.band_count());
        let mut key = Vec::with_capacity(image.band_count());
        let mut stats = DeltaStats::default();
        for &change in changes {
            let outcome = apply_one(&published, image, change, &mut pixel, &mut key)?;
            match outcome {
                DeltaOutcome::Applied => stats.applied += 1,
                DeltaOutcome::Unchanged => stats.unchanged += 1,
                DeltaOutcome::Skipped => stats.skipped += 1,
            }
            if outcome != DeltaOutcome::Unchanged {
                self.label_epoch.fetch_add(1, Ordering::AcqRel);
            }
        }
        Ok(stats)
    }

    fn install<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

fn check_inputs(ctx: &ViewportContext, image: &SpectralImage, labels: &LabelMask) -> Result<()> {
    if image.band_count() != ctx.dimensionality() {
        return Err(Error::DimensionMismatch {
            expected: ctx.dimensionality(),
            found: image.band_count(),
        });
    }
    if labels.width() != image.width() || labels.height() != image.height() {
        return Err(Error::MaskSizeMismatch {
            width: image.width(),
            height: image.height(),
            mask_width: labels.width(),
            mask_height: labels.height(),
        });
    }
    if let Some(label) = labels.max_label() {
        if usize::from(label) >= ctx.label_count() {
            return Err(Error::LabelOutOfRange {
                label,
                labels: ctx.label_count(),
            });
        }
    }
    Ok(())
}

fn apply_one(
    published: &PublishedSets,
    image: &SpectralImage,
    change: LabelChange,
    pixel: &mut Pixel,
    key: &mut Vec<u8>,
) -> Result<DeltaOutcome> {
    let ctx = published.context();
    if image.band_count() != ctx.dimensionality() {
        return Err(Error::DimensionMismatch {
            expected: ctx.dimensionality(),
            found: image.band_count(),
        });
    }
    if change.pixel >= image.pixel_count() {
        return Err(Error::PixelOutOfRange {
            index: change.pixel,
            pixels: image.pixel_count(),
        });
    }
    let lookup = |label: u8| {
        published.set(label).ok_or(Error::LabelOutOfRange {
            label,
            labels: published.sets().len(),
        })
    };
    let from = lookup(change.from)?;
    let to = lookup(change.to)?;
    if change.from == change.to {
        return Ok(DeltaOutcome::Unchanged);
    }

    image.pixel_into(change.pixel, pixel);
    ctx.quantizer().key_into(pixel, key);

    if !from.remove(key, pixel) {
        log::warn!(
            "pixel {} not counted under label {}; ignoring move to label {}",
            change.pixel,
            change.from,
            change.to
        );
        return Ok(DeltaOutcome::Skipped);
    }
    if let Err(e) = to.add(key, pixel) {
        // the old bin is still allocated, so this cannot hit the limit
        from.add(key, pixel)?;
        return Err(e);
    }
    Ok(DeltaOutcome::Applied)
}
