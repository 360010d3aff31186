//! Memory-mapped file readers.
//!

use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use specview_core::{LabelMask, Normalization, SpectralImage, Value};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Byte offset of the first sample in a LAN file.
pub const LAN_HEADER_LEN: usize = 128;

const LAN_TAGS: [&[u8; 6]; 2] = [b"HEADER", b"HEAD74"];

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without
/// loading the entire file into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sample width of a LAN file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDepth {
    /// One byte per sample.
    Bits8,
    /// Two little-endian bytes per sample.
    Bits16,
}

impl SampleDepth {
    fn from_code(code: u16) -> Result<Self> {
        match code {
            0 => Ok(SampleDepth::Bits8),
            2 => Ok(SampleDepth::Bits16),
            other => Err(Error::UnsupportedDepth(other)),
        }
    }

    /// Bytes per sample.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            SampleDepth::Bits8 => 1,
            SampleDepth::Bits16 => 2,
        }
    }

    /// Largest raw sample value.
    #[must_use]
    pub fn max_value(self) -> Value {
        match self {
            SampleDepth::Bits8 => Value::from(u8::MAX),
            SampleDepth::Bits16 => Value::from(u16::MAX),
        }
    }
}

/// Parsed LAN header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanHeader {
    /// Sample width.
    pub depth: SampleDepth,
    /// Number of bands.
    pub bands: usize,
    /// Columns (image width).
    pub cols: usize,
    /// Rows (image height).
    pub rows: usize,
}

impl LanHeader {
    /// Parses the fixed 128-byte header.
    ///
    /// # Errors
    /// Returns an error for an unknown tag, an unsupported depth or a file
    /// shorter than the header.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LAN_HEADER_LEN {
            return Err(Error::InvalidFormat(format!(
                "LAN header needs {LAN_HEADER_LEN} bytes, file has {}",
                bytes.len()
            )));
        }
        if !LAN_TAGS.iter().any(|tag| bytes.starts_with(&tag[..])) {
            return Err(Error::InvalidFormat(
                "missing HEADER/HEAD74 tag".to_string(),
            ));
        }
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let header = Self {
            depth: SampleDepth::from_code(u16_at(6))?,
            bands: usize::from(u16_at(8)),
            cols: u32_at(16) as usize,
            rows: u32_at(20) as usize,
        };
        if header.checked_payload_bytes().is_none() {
            return Err(Error::InvalidFormat(format!(
                "LAN dimensions overflow: {} bands of {}x{}",
                header.bands, header.cols, header.rows
            )));
        }
        Ok(header)
    }

    /// Payload size, or `None` if it is not addressable. The per-band plane
    /// size is checked on its own so a zero band count cannot hide it.
    fn checked_payload_bytes(&self) -> Option<usize> {
        self.cols
            .checked_mul(self.rows)?
            .checked_mul(self.depth.bytes())?
            .checked_mul(self.bands)
    }

    /// Bytes of one band line.
    #[must_use]
    pub fn line_bytes(&self) -> usize {
        self.cols.saturating_mul(self.depth.bytes())
    }

    /// Payload size implied by the header; saturates for headers that
    /// [`LanHeader::parse`] would reject.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        self.checked_payload_bytes().unwrap_or(usize::MAX)
    }
}

/// Reader for ERDAS LAN files (band interleaved by line).
pub struct LanReader {
    reader: MappedFileReader,
    header: LanHeader,
}

impl LanReader {
    /// Opens a LAN file and validates its header and size.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped, the header is invalid
    /// or the payload is truncated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        let header = LanHeader::parse(reader.as_bytes())?;
        let available = reader.len() - LAN_HEADER_LEN;
        if available < header.payload_bytes() {
            return Err(Error::InvalidFormat(format!(
                "truncated LAN payload in {}: expected {} bytes, found {}",
                reader.path().display(),
                header.payload_bytes(),
                available
            )));
        }
        log::info!(
            "{}: {} bands, {}x{} ({} bit)",
            reader.path().display(),
            header.bands,
            header.cols,
            header.rows,
            header.depth.bytes() * 8
        );
        Ok(Self { reader, header })
    }

    /// Parsed header.
    #[must_use]
    pub fn header(&self) -> &LanHeader {
        &self.header
    }

    /// File size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Decodes all bands, mapping raw samples onto `[minval, maxval]`.
    ///
    /// # Errors
    /// Returns an error if the target range is invalid.
    pub fn read(&self, minval: Value, maxval: Value) -> Result<SpectralImage> {
        let header = self.header;
        let payload = &self.reader.as_bytes()[LAN_HEADER_LEN..];
        let norm = Normalization::between((0.0, header.depth.max_value()), (minval, maxval));
        let line = header.line_bytes();
        let stride = header.bands * line;

        let bands: Vec<Vec<Value>> = (0..header.bands)
            .into_par_iter()
            .map(|d| {
                let mut plane = Vec::with_capacity(header.cols * header.rows);
                for y in 0..header.rows {
                    let start = y * stride + d * line;
                    decode_line(&payload[start..start + line], header.depth, norm, &mut plane);
                }
                plane
            })
            .collect();

        Ok(SpectralImage::new(
            header.cols,
            header.rows,
            bands,
            minval,
            maxval,
        )?)
    }
}

fn decode_line(bytes: &[u8], depth: SampleDepth, norm: Normalization, out: &mut Vec<Value>) {
    match depth {
        SampleDepth::Bits8 => out.extend(bytes.iter().map(|&b| norm.apply(Value::from(b)))),
        SampleDepth::Bits16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|pair| norm.apply(Value::from(u16::from_le_bytes([pair[0], pair[1]])))),
        ),
    }
}

/// Reads a LAN file in one call.
///
/// # Errors
/// See [`LanReader::open`] and [`LanReader::read`].
pub fn read_lan<P: AsRef<Path>>(path: P, minval: Value, maxval: Value) -> Result<SpectralImage> {
    LanReader::open(path)?.read(minval, maxval)
}

/// Reads a label mask: one byte per pixel, row-major.
///
/// Files with a `.png` or `.tif`/`.tiff` extension are decoded as
/// grayscale images; anything else is read as raw bytes.
///
/// # Errors
/// Returns an error if the file cannot be read or its size does not match.
pub fn read_label_mask<P: AsRef<Path>>(path: P, width: usize, height: usize) -> Result<LabelMask> {
    let path = path.as_ref();
    let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "tif" | "tiff"));
    let data = if is_image {
        image::open(path)?.to_luma8().into_raw()
    } else {
        MappedFileReader::open(path)?.as_bytes().to_vec()
    };
    if data.len() != width * height {
        return Err(Error::InvalidFormat(format!(
            "label mask {} has {} pixels, image has {}",
            path.display(),
            data.len(),
            width * height
        )));
    }
    Ok(LabelMask::from_vec(width, height, data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lan_bytes(tag: &[u8; 6], depth: u16, bands: u16, cols: u32, rows: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; LAN_HEADER_LEN];
        bytes[..6].copy_from_slice(tag);
        bytes[6..8].copy_from_slice(&depth.to_le_bytes());
        bytes[8..10].copy_from_slice(&bands.to_le_bytes());
        bytes[16..20].copy_from_slice(&cols.to_le_bytes());
        bytes[20..24].copy_from_slice(&rows.to_le_bytes());
        bytes
    }

    fn write_temp(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_mapped_file_reader() {
        let data: Vec<u8> = (0..64).collect();
        let file = write_temp(&data);

        let reader = MappedFileReader::open(file.path()).unwrap();
        assert_eq!(reader.len(), 64);
        assert!(!reader.is_empty());
        assert_eq!(reader.as_bytes(), &data[..]);
    }

    #[test]
    fn test_read_8bit_bil() {
        // 2 bands, 3x2; row 0: band0 [1 2 3] band1 [10 20 30]; row 1: band0 [4 5 6] band1 [40 50 60]
        let mut bytes = lan_bytes(b"HEAD74", 0, 2, 3, 2);
        bytes.extend([1, 2, 3, 10, 20, 30, 4, 5, 6, 40, 50, 60]);
        let file = write_temp(&bytes);

        let reader = LanReader::open(file.path()).unwrap();
        assert_eq!(reader.header().bands, 2);
        let img = reader.read(0.0, 255.0).unwrap();
        assert_eq!((img.width(), img.height(), img.band_count()), (3, 2, 2));
        assert_eq!(img.band(0), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(img.band(1), &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
    }

    #[test]
    fn test_read_16bit_rescaled() {
        let mut bytes = lan_bytes(b"HEADER", 2, 1, 2, 1);
        for v in [0u16, 65535] {
            bytes.extend(v.to_le_bytes());
        }
        let file = write_temp(&bytes);

        let img = read_lan(file.path(), 0.0, 255.0).unwrap();
        assert_relative_eq!(img.band(0)[0], 0.0);
        assert_relative_eq!(img.band(0)[1], 255.0, epsilon = 1e-3);
    }

    #[test]
    fn test_rejects_bad_tag() {
        let file = write_temp(&lan_bytes(b"NOTLAN", 0, 1, 1, 1));
        assert!(matches!(
            LanReader::open(file.path()),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rejects_unsupported_depth() {
        let file = write_temp(&lan_bytes(b"HEADER", 1, 1, 1, 1));
        assert!(matches!(
            LanReader::open(file.path()),
            Err(Error::UnsupportedDepth(1))
        ));
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let mut bytes = lan_bytes(b"HEADER", 0, 2, 4, 4);
        bytes.extend([0u8; 31]);
        let file = write_temp(&bytes);
        assert!(matches!(
            LanReader::open(file.path()),
            Err(Error::InvalidFormat(_))
        ));

        let short = write_temp(b"HEADER");
        assert!(LanReader::open(short.path()).is_err());
    }

    #[test]
    fn test_rejects_overflowing_dimensions() {
        let side = 1u32 << 31;
        let file = write_temp(&lan_bytes(b"HEADER", 2, 2, side, side));
        assert!(matches!(
            LanReader::open(file.path()),
            Err(Error::InvalidFormat(msg)) if msg.contains("overflow")
        ));

        // zero bands must not mask an oversized plane
        let header = lan_bytes(b"HEADER", 2, 0, u32::MAX, u32::MAX);
        assert!(LanHeader::parse(&header).is_err());
    }

    #[test]
    fn test_raw_label_mask() {
        let file = write_temp(&[0, 1, 2, 1]);
        let mask = read_label_mask(file.path(), 2, 2).unwrap();
        assert_eq!(mask.as_slice(), &[0, 1, 2, 1]);
        assert!(read_label_mask(file.path(), 3, 2).is_err());
    }
}
