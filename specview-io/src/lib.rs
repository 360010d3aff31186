//! specview-io: Memory-mapped file I/O for specview.
//!
//! This crate reads ERDAS LAN cubes through memory-mapped files via
//! memmap2, and reads and writes band file lists of grayscale images.
//!

mod error;
pub mod filelist;
mod reader;

pub use error::{Error, Result};
pub use filelist::{write_filelist, BandEncoding, FileList};
pub use reader::{
    read_label_mask, read_lan, LanHeader, LanReader, MappedFileReader, SampleDepth,
    LAN_HEADER_LEN,
};
