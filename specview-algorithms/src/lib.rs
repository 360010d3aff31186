//! specview-algorithms: Bin aggregation and range scanning.
//!
//! This crate provides the parallel parts of the band view:
//! - **Aggregation engine** - full rebuilds on the rayon pool, generation
//!   checked publication, incremental label deltas
//! - **Range scanners** - sequential and parallel `(min, max)` reduction
//! - **Normalization ranges** - observed, theoretical or fixed
//!
#![warn(missing_docs)]

mod config;
mod engine;
mod normrange;
pub mod range;

pub use config::AggregationConfig;
pub use engine::{
    AggregationEngine, Build, DeltaOutcome, DeltaStats, PublishedSets, RebuildOutcome,
    RebuildStats,
};
pub use normrange::{NormMode, NormRange, DEFAULT_DOMAIN_MAX};
pub use range::{DataRange, ParallelScanner, RangeScanner, ScanStrategy, SequentialScanner};
