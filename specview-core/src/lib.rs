//! specview-core: Core types for spectral bin aggregation.
//!
//! This crate provides the data model shared by the aggregation engine,
//! the range scanners and the file readers: spectral images, label masks,
//! bins, concurrent bin sets, quantization and the versioned viewport
//! context.
//!

pub mod bin;
pub mod binset;
pub mod context;
pub mod error;
pub mod image;
pub mod labels;
pub mod normalize;
pub mod quantize;

pub use bin::Bin;
pub use binset::{BinEntry, BinSet, BinSetSummary, DEFAULT_SHARDS};
pub use context::{ContextSnapshot, Representation, SharedContext, ViewportContext, UNLABELED_NAME};
pub use error::{Error, Result};
pub use image::{BandDesc, Pixel, Roi, SpectralImage, Value};
pub use labels::{LabelChange, LabelMask, UNLABELED};
pub use normalize::Normalization;
pub use quantize::{BinKey, Quantizer, MAX_BINS};
