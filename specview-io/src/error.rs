//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// LAN sample depth code other than 0 (8 bit) or 2 (16 bit).
    #[error("unsupported LAN sample depth code {0}")]
    UnsupportedDepth(u16),

    /// Band image decoding or encoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] specview_core::Error),
}
