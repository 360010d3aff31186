//! Concurrent per-label histogram.
//!
//! A [`BinSet`] maps quantized spectra ([`BinKey`]) to [`Bin`]s. The map is
//! split into independently locked shards, so workers touching different keys
//! rarely contend and never wait on a global lock, while two workers touching
//! the same key are serialized by that key's shard mutex.
//!
//! The set's total weight and per-dimension boundary are kept in atomics
//! beside the map and can be read without visiting any shard.
//!
//! Bins whose weight drops to zero stay in the map as tombstones until
//! [`BinSet::prune`] is called. Every read API skips them.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bin::Bin;
use crate::error::{Error, Result};
use crate::image::Value;
use crate::quantize::BinKey;

/// Default number of lock shards per set.
pub const DEFAULT_SHARDS: usize = 64;

type Shard = HashMap<BinKey, Bin>;

/// All bins belonging to one label.
#[derive(Debug)]
pub struct BinSet {
    label: u8,
    name: String,
    dimensionality: usize,
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
    total_weight: AtomicU64,
    boundary: Box<[(AtomicU8, AtomicU8)]>,
    slots: AtomicUsize,
    bin_limit: Option<usize>,
}

/// Locked access to one bin of a [`BinSet`].
///
/// Mutations through the entry keep the set's total weight in step. The
/// shard stays locked until the entry is dropped.
pub struct BinEntry<'a> {
    bin: MappedMutexGuard<'a, Bin>,
    total_weight: &'a AtomicU64,
}

impl BinEntry<'_> {
    /// Merges `pixel` into the bin.
    #[inline]
    pub fn add(&mut self, pixel: &[Value]) {
        self.bin.add(pixel);
        self.total_weight.fetch_add(1, Ordering::AcqRel);
    }

    /// Removes a previously merged `pixel`; false if the bin was empty.
    #[inline]
    pub fn sub(&mut self, pixel: &[Value]) -> bool {
        if self.bin.sub(pixel) {
            self.total_weight.fetch_sub(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }
}

impl Deref for BinEntry<'_> {
    type Target = Bin;

    fn deref(&self) -> &Bin {
        &self.bin
    }
}

impl BinSet {
    /// Creates an empty set for `label` over `dimensionality` bands.
    #[must_use]
    pub fn new(label: u8, name: impl Into<String>, dimensionality: usize) -> Self {
        Self {
            label,
            name: name.into(),
            dimensionality,
            shards: make_shards(DEFAULT_SHARDS),
            hasher: RandomState::new(),
            total_weight: AtomicU64::new(0),
            boundary: (0..dimensionality)
                .map(|_| (AtomicU8::new(u8::MAX), AtomicU8::new(0)))
                .collect(),
            slots: AtomicUsize::new(0),
            bin_limit: None,
        }
    }

    /// Sets the number of lock shards (at least 1).
    #[must_use]
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = make_shards(shards.max(1));
        self
    }

    /// Caps the number of bins the set may allocate.
    #[must_use]
    pub fn with_bin_limit(mut self, limit: Option<usize>) -> Self {
        self.bin_limit = limit;
        self
    }

    /// Label id.
    #[must_use]
    pub fn label(&self) -> u8 {
        self.label
    }

    /// Label name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key length expected by this set.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    /// Configured bin limit.
    #[must_use]
    pub fn bin_limit(&self) -> Option<usize> {
        self.bin_limit
    }

    /// Sum of all bin weights, read in O(1).
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.total_weight.load(Ordering::Acquire)
    }

    /// Number of allocated bins, tombstones included, read in O(1).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.load(Ordering::Acquire)
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn shard(&self, key: &[u8]) -> &Mutex<Shard> {
        let hash = self.hasher.hash_one(key);
        &self.shards[(hash % self.shards.len() as u64) as usize]
    }

    /// Returns the bin for `key`, creating an empty one on a miss.
    ///
    /// # Errors
    /// Returns an error if the key length does not match the set's
    /// dimensionality, or if creating the bin would exceed the bin limit.
    pub fn insert_or_get(&self, key: &[u8]) -> Result<BinEntry<'_>> {
        if key.len() != self.dimensionality {
            return Err(Error::DimensionMismatch {
                expected: self.dimensionality,
                found: key.len(),
            });
        }
        let guard = self.shard(key).lock();
        let bin = match MutexGuard::try_map(guard, |bins| bins.get_mut(key)) {
            Ok(bin) => bin,
            Err(guard) => {
                self.reserve_slot()?;
                self.widen_boundary(key);
                MutexGuard::map(guard, |bins| {
                    bins.entry(BinKey::from(key)).or_insert_with(Bin::new)
                })
            }
        };
        Ok(BinEntry {
            bin,
            total_weight: &self.total_weight,
        })
    }

    /// Merges `pixel` into the bin at `key`.
    ///
    /// # Errors
    /// See [`BinSet::insert_or_get`].
    #[inline]
    pub fn add(&self, key: &[u8], pixel: &[Value]) -> Result<()> {
        self.insert_or_get(key)?.add(pixel);
        Ok(())
    }

    /// Removes `pixel` from the bin at `key` without creating bins.
    ///
    /// Returns false if there is no non-empty bin at `key`.
    pub fn remove(&self, key: &[u8], pixel: &[Value]) -> bool {
        let mut bins = self.shard(key).lock();
        match bins.get_mut(key) {
            Some(bin) if !bin.is_empty() => {
                bin.sub(pixel);
                self.total_weight.fetch_sub(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    fn reserve_slot(&self) -> Result<()> {
        match self.bin_limit {
            None => {
                self.slots.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Some(limit) => self
                .slots
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < limit).then_some(n + 1)
                })
                .map(|_| ())
                .map_err(|_| Error::BinLimitExceeded { limit }),
        }
    }

    fn widen_boundary(&self, key: &[u8]) {
        for ((lo, hi), &idx) in self.boundary.iter().zip(key) {
            lo.fetch_min(idx, Ordering::AcqRel);
            hi.fetch_max(idx, Ordering::AcqRel);
        }
    }

    /// Per-dimension `(min, max)` bin index ever populated.
    ///
    /// The boundary only widens; removing pixels never shrinks it. A
    /// dimension with `min > max` has never been populated.
    #[must_use]
    pub fn boundary(&self) -> Vec<(u8, u8)> {
        self.boundary
            .iter()
            .map(|(lo, hi)| (lo.load(Ordering::Acquire), hi.load(Ordering::Acquire)))
            .collect()
    }

    /// Copy of the non-empty bin at `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Bin> {
        self.shard(key)
            .lock()
            .get(key)
            .filter(|bin| !bin.is_empty())
            .cloned()
    }

    /// Visits every non-empty bin, one shard lock at a time.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&BinKey, &Bin),
    {
        for shard in &*self.shards {
            for (key, bin) in shard.lock().iter().filter(|(_, bin)| !bin.is_empty()) {
                f(key, bin);
            }
        }
    }

    /// Snapshot of all non-empty bins, sorted by key.
    #[must_use]
    pub fn bins(&self) -> Vec<(BinKey, Bin)> {
        let mut out = Vec::new();
        self.for_each(|key, bin| out.push((key.clone(), bin.clone())));
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Number of non-empty bins.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut n = 0;
        self.for_each(|_, _| n += 1);
        n
    }

    /// Returns true if the set holds no non-empty bin.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_weight() == 0
    }

    /// Drops zero-weight bins and returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut removed = 0;
        for shard in &*self.shards {
            let mut bins = shard.lock();
            let before = bins.len();
            bins.retain(|_, bin| !bin.is_empty());
            removed += before - bins.len();
        }
        self.slots.fetch_sub(removed, Ordering::AcqRel);
        removed
    }

    /// Compact description for logs and reports.
    #[must_use]
    pub fn summary(&self) -> BinSetSummary {
        BinSetSummary {
            label: self.label,
            name: self.name.clone(),
            total_weight: self.total_weight(),
            bins: self.len(),
            boundary: self.boundary(),
        }
    }
}

fn make_shards(n: usize) -> Box<[Mutex<Shard>]> {
    (0..n).map(|_| Mutex::new(HashMap::new())).collect()
}

/// Summary of one bin set.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinSetSummary {
    /// Label id.
    pub label: u8,
    /// Label name.
    pub name: String,
    /// Total weight.
    pub total_weight: u64,
    /// Number of non-empty bins.
    pub bins: usize,
    /// Per-dimension boundary.
    pub boundary: Vec<(u8, u8)>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_insert_or_get_creates_once() {
        let set = BinSet::new(0, "unlabeled", 2);
        set.add(&[1, 0], &[12.0, 0.0]).unwrap();
        set.add(&[1, 0], &[14.0, 2.0]).unwrap();

        let bin = set.get(&[1, 0]).unwrap();
        assert_eq!(bin.weight(), 2.0);
        assert_eq!(bin.means(), vec![13.0, 1.0]);
        assert_eq!(set.total_weight(), 2);
        assert_eq!(set.slot_count(), 1);
    }

    #[test]
    fn test_dimension_checked() {
        let set = BinSet::new(0, "unlabeled", 3);
        assert!(matches!(
            set.insert_or_get(&[0, 0]),
            Err(Error::DimensionMismatch {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn test_boundary_tracks_extremes() {
        let set = BinSet::new(0, "unlabeled", 2);
        assert_eq!(set.boundary(), vec![(u8::MAX, 0), (u8::MAX, 0)]);
        set.add(&[3, 7], &[0.0, 0.0]).unwrap();
        set.add(&[5, 2], &[0.0, 0.0]).unwrap();
        assert_eq!(set.boundary(), vec![(3, 5), (2, 7)]);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let set = BinSet::new(0, "unlabeled", 1);
        set.add(&[4], &[40.0]).unwrap();
        assert!(set.remove(&[4], &[40.0]));
        assert!(!set.remove(&[4], &[40.0]));
        assert!(!set.remove(&[9], &[90.0]));

        assert_eq!(set.total_weight(), 0);
        assert!(set.get(&[4]).is_none());
        assert!(set.bins().is_empty());
        assert_eq!(set.slot_count(), 1);

        assert_eq!(set.prune(), 1);
        assert_eq!(set.slot_count(), 0);
    }

    #[test]
    fn test_tombstone_is_reused() {
        let set = BinSet::new(0, "unlabeled", 1).with_bin_limit(Some(1));
        set.add(&[4], &[40.0]).unwrap();
        assert!(set.remove(&[4], &[40.0]));
        set.add(&[4], &[41.0]).unwrap();
        assert_eq!(set.get(&[4]).unwrap().means(), vec![41.0]);
    }

    #[test]
    fn test_bin_limit_rejects_growth() {
        let set = BinSet::new(0, "unlabeled", 1).with_bin_limit(Some(2));
        set.add(&[0], &[0.0]).unwrap();
        set.add(&[1], &[1.0]).unwrap();
        assert!(matches!(
            set.add(&[2], &[2.0]),
            Err(Error::BinLimitExceeded { limit: 2 })
        ));
        // existing bins keep accepting pixels
        set.add(&[1], &[1.0]).unwrap();
        assert_eq!(set.total_weight(), 3);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_entry_updates_total() {
        let set = BinSet::new(0, "unlabeled", 1);
        {
            let mut entry = set.insert_or_get(&[2]).unwrap();
            assert!(entry.is_empty());
            entry.add(&[5.0]);
            entry.add(&[7.0]);
            assert!(entry.sub(&[5.0]));
            assert_eq!(entry.weight(), 1.0);
        }
        assert_eq!(set.total_weight(), 1);
    }

    #[test]
    fn test_concurrent_adds() {
        let set = Arc::new(BinSet::new(1, "a", 2).with_shards(4));
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    for i in 0..1000u32 {
                        let key = [(i % 16) as u8, t % 2];
                        set.add(&key, &[1.0, 2.0]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(set.total_weight(), 8000);
        assert_eq!(set.len(), 32);
        let sum: u64 = set.bins().iter().map(|(_, bin)| bin.count()).sum();
        assert_eq!(sum, 8000);
        assert_eq!(set.boundary(), vec![(0, 15), (0, 1)]);
    }

    #[test]
    fn test_summary() {
        let set = BinSet::new(2, "leaf", 1);
        set.add(&[3], &[1.0]).unwrap();
        let summary = set.summary();
        assert_eq!(summary.label, 2);
        assert_eq!(summary.name, "leaf");
        assert_eq!(summary.total_weight, 1);
        assert_eq!(summary.bins, 1);
        assert_eq!(summary.boundary, vec![(3, 3)]);
    }
}
