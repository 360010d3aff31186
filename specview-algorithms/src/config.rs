//! Aggregation engine configuration.

use specview_core::{Error, Result, DEFAULT_SHARDS};
use sysinfo::System;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fixed per-bin bookkeeping on top of key and sums (map entry, box and
/// vector headers).
const BIN_OVERHEAD_BYTES: usize = 80;

/// Configuration for [`crate::AggregationEngine`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AggregationConfig {
    /// Run full rebuilds on the rayon pool.
    pub parallel: bool,
    /// Image rows handed to a worker at a time.
    pub rows_per_chunk: usize,
    /// Lock shards per bin set.
    pub shards: usize,
    /// Explicit cap on bins per set. Takes precedence over `memory_fraction`.
    pub bin_limit: Option<usize>,
    /// Derive the bin cap from this fraction of available memory.
    pub memory_fraction: Option<f64>,
    /// Size of a dedicated worker pool; `None` uses the global rayon pool.
    pub parallelism: Option<usize>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            rows_per_chunk: 16,
            shards: DEFAULT_SHARDS,
            bin_limit: None,
            memory_fraction: None,
            parallelism: None,
        }
    }
}

impl AggregationConfig {
    /// Enable or disable parallel rebuilds.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the number of rows per work item (at least 1).
    #[must_use]
    pub fn with_rows_per_chunk(mut self, rows: usize) -> Self {
        self.rows_per_chunk = rows.max(1);
        self
    }

    /// Set the number of lock shards per bin set (at least 1).
    #[must_use]
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }

    /// Cap the number of bins per set.
    #[must_use]
    pub fn with_bin_limit(mut self, limit: usize) -> Self {
        self.bin_limit = Some(limit);
        self
    }

    /// Derive the bin cap from a fraction of available memory.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = Some(fraction);
        self
    }

    /// Use a dedicated pool with `threads` workers (at least 1).
    #[must_use]
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads.max(1));
        self
    }

    /// Approximate heap footprint of one bin over `dimensionality` bands.
    #[must_use]
    pub fn bytes_per_bin(dimensionality: usize) -> usize {
        dimensionality * (1 + std::mem::size_of::<f64>()) + BIN_OVERHEAD_BYTES
    }

    /// Resolve the per-set bin cap.
    ///
    /// With a memory fraction, available memory is split evenly across
    /// `label_count` sets.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is invalid or system memory
    /// cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_bin_limit(
        &self,
        dimensionality: usize,
        label_count: usize,
    ) -> Result<Option<usize>> {
        if let Some(limit) = self.bin_limit {
            return Ok(Some(limit));
        }
        let Some(fraction) = self.memory_fraction else {
            return Ok(None);
        };
        if !(0.0 < fraction && fraction <= 1.0) {
            return Err(Error::ConfigError(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::ConfigError(
                "available system memory reported as 0".to_string(),
            ));
        }
        let budget = (available as f64 * fraction) as usize;
        let per_set = budget / label_count.max(1);
        Ok(Some((per_set / Self::bytes_per_bin(dimensionality)).max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AggregationConfig::default();
        assert!(config.parallel);
        assert_eq!(config.shards, DEFAULT_SHARDS);
        assert_eq!(config.resolve_bin_limit(10, 2).unwrap(), None);
    }

    #[test]
    fn test_builders_clamp() {
        let config = AggregationConfig::default()
            .with_rows_per_chunk(0)
            .with_shards(0)
            .with_parallelism(0);
        assert_eq!(config.rows_per_chunk, 1);
        assert_eq!(config.shards, 1);
        assert_eq!(config.parallelism, Some(1));
    }

    #[test]
    fn test_explicit_limit_wins() {
        let config = AggregationConfig::default()
            .with_memory_fraction(0.5)
            .with_bin_limit(1000);
        assert_eq!(config.resolve_bin_limit(10, 4).unwrap(), Some(1000));
    }

    #[test]
    fn test_invalid_memory_fraction() {
        let config = AggregationConfig::default().with_memory_fraction(1.5);
        assert!(config.resolve_bin_limit(10, 1).is_err());
    }

    #[test]
    fn test_bytes_per_bin_grows_with_dimensionality() {
        assert!(AggregationConfig::bytes_per_bin(100) > AggregationConfig::bytes_per_bin(10));
    }
}
