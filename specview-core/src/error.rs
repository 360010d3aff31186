//! Error types for specview-core.

use thiserror::Error;

/// Result type alias for specview operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for specview operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A band plane does not match the image's spatial size.
    #[error("band {band} has {found} values, expected {expected}")]
    BandSizeMismatch {
        band: usize,
        expected: usize,
        found: usize,
    },

    /// Pixel count of the requested size does not fit in memory addressing.
    #[error("image size {width}x{height} overflows")]
    ImageTooLarge { width: usize, height: usize },

    /// Band descriptors do not match the band count.
    #[error("{descriptors} band descriptors for {bands} bands")]
    DescriptorMismatch { bands: usize, descriptors: usize },

    /// Pixel dimensionality differs from what the consumer expects.
    #[error("dimensionality mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Value range with `min > max` or non-finite bounds.
    #[error("invalid value range: [{min}, {max}]")]
    InvalidRange { min: f32, max: f32 },

    /// Bin count outside `1..=256`.
    #[error("invalid bin count {0}: must be between 1 and 256")]
    InvalidBinCount(usize),

    /// A bin set refused to grow past its configured limit.
    #[error("bin limit of {limit} bins reached")]
    BinLimitExceeded { limit: usize },

    /// Label id without a matching bin set.
    #[error("label {label} out of range ({labels} labels declared)")]
    LabelOutOfRange { label: u8, labels: usize },

    /// Pixel index outside the image.
    #[error("pixel index {index} out of range ({pixels} pixels)")]
    PixelOutOfRange { index: usize, pixels: usize },

    /// Label mask and image disagree on spatial size.
    #[error("label mask is {mask_width}x{mask_height}, image is {width}x{height}")]
    MaskSizeMismatch {
        width: usize,
        height: usize,
        mask_width: usize,
        mask_height: usize,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
