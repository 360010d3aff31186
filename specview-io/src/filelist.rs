//! Band file lists.
//!
//! A file list names one grayscale image per band:
//!
//! ```text
//! 3
//! bands/
//! band00.png 450
//! band01.png 500 520
//! band02.png
//! ```
//!
//! The first token is the band count, the second the directory holding the
//! band images (relative to the list's own directory unless absolute). Each
//! following line carries a file name and optionally a center wavelength or
//! a wavelength range.

use crate::{Error, Result};
use image::{DynamicImage, ImageBuffer, Luma};
use rayon::prelude::*;
use specview_core::{BandDesc, Normalization, SpectralImage, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Parsed file list.
#[derive(Debug, Clone, PartialEq)]
pub struct FileList {
    /// Band image paths, in band order.
    pub files: Vec<PathBuf>,
    /// Band descriptors, one per file.
    pub descs: Vec<BandDesc>,
}

impl FileList {
    /// Reads and parses a file list.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is inconsistent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::parse(&text, dir)
    }

    /// Parses file list text; relative base directories resolve against
    /// `list_dir`.
    ///
    /// # Errors
    /// Returns an error if the count or base are missing, a line has no
    /// file name or fewer lines than announced are present.
    pub fn parse(text: &str, list_dir: &Path) -> Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let mut head = Vec::with_capacity(2);
        while head.len() < 2 {
            let line = lines
                .next()
                .ok_or_else(|| Error::InvalidFormat("file list header incomplete".to_string()))?;
            head.extend(line.split_whitespace().map(str::to_string));
        }
        let count: usize = head[0]
            .parse()
            .map_err(|_| Error::InvalidFormat(format!("invalid band count '{}'", head[0])))?;
        let base = Path::new(&head[1]);
        let base = if base.is_absolute() {
            base.to_path_buf()
        } else {
            list_dir.join(base)
        };

        let mut files = Vec::with_capacity(count);
        let mut descs = Vec::with_capacity(count);
        for n in 0..count {
            let line = lines.next().ok_or_else(|| {
                Error::InvalidFormat(format!("file list announces {count} bands, found {n}"))
            })?;
            let mut tokens = line.split_whitespace();
            let Some(name) = tokens.next() else {
                return Err(Error::InvalidFormat(format!("band {n} has no file name")));
            };
            files.push(base.join(name));
            let a = tokens.next().and_then(|t| t.parse::<f32>().ok());
            let b = tokens.next().and_then(|t| t.parse::<f32>().ok());
            descs.push(match (a, b) {
                (Some(a), Some(b)) => BandDesc::range(a, b),
                (Some(a), None) => BandDesc::center(a),
                _ => BandDesc::unknown(),
            });
        }
        Ok(Self { files, descs })
    }

    /// Number of bands listed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if no band is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Loads every band as a grayscale plane and maps raw samples onto
    /// `[minval, maxval]`.
    ///
    /// 16-bit images map from `[0, 65535]`, all others from `[0, 255]`.
    ///
    /// # Errors
    /// Returns an error if an image cannot be decoded or bands differ in size.
    pub fn load(&self, minval: Value, maxval: Value) -> Result<SpectralImage> {
        let planes = self
            .files
            .par_iter()
            .map(|file| load_plane(file, minval, maxval))
            .collect::<Result<Vec<_>>>()?;

        let (width, height) = planes.first().map_or((0, 0), |p| (p.0, p.1));
        let mut bands = Vec::with_capacity(planes.len());
        for (file, (w, h, plane)) in self.files.iter().zip(planes) {
            if (w, h) != (width, height) {
                return Err(Error::InvalidFormat(format!(
                    "{} is {w}x{h}, expected {width}x{height}",
                    file.display()
                )));
            }
            bands.push(plane);
        }
        log::info!("loaded {} bands of {width}x{height}", bands.len());
        Ok(SpectralImage::new(width, height, bands, minval, maxval)?.with_meta(self.descs.clone())?)
    }
}

fn load_plane(file: &Path, minval: Value, maxval: Value) -> Result<(usize, usize, Vec<Value>)> {
    let img = image::open(file)?;
    let color = img.color();
    let wide = color.bytes_per_pixel() > color.channel_count();
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = if wide {
        let norm = Normalization::between((0.0, Value::from(u16::MAX)), (minval, maxval));
        img.to_luma16()
            .into_raw()
            .into_iter()
            .map(|v| norm.apply(Value::from(v)))
            .collect()
    } else {
        let norm = Normalization::between((0.0, Value::from(u8::MAX)), (minval, maxval));
        img.to_luma8()
            .into_raw()
            .into_iter()
            .map(|v| norm.apply(Value::from(v)))
            .collect()
    };
    Ok((width, height, plane))
}

/// Sample width of written band images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BandEncoding {
    /// 8-bit grayscale PNG.
    #[default]
    Gray8,
    /// 16-bit grayscale PNG.
    Gray16,
}

/// Writes one PNG per band plus a file list `<base>.txt` next to them.
///
/// Band files are named `<base>NN.png`. Values are mapped from the image's
/// declared range onto the full sample range of `encoding`, so loading the
/// list with the same range restores them up to quantization.
///
/// # Errors
/// Returns an error if a file cannot be written.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn write_filelist<P: AsRef<Path>>(
    image: &SpectralImage,
    base: P,
    encoding: BandEncoding,
) -> Result<PathBuf> {
    let base = base.as_ref();
    let stem = base
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::InvalidFormat(format!("invalid output base {}", base.display())))?;
    let dir = base.parent().unwrap_or_else(|| Path::new(""));
    let width = u32::try_from(image.width())
        .map_err(|_| Error::InvalidFormat("image too wide".to_string()))?;
    let height = u32::try_from(image.height())
        .map_err(|_| Error::InvalidFormat("image too tall".to_string()))?;

    let mut list = format!("{}\n./\n", image.band_count());
    for (d, desc) in image.meta().iter().enumerate() {
        let name = format!("{stem}{d:02}.png");
        let plane = image.band(d);
        let encoded = match encoding {
            BandEncoding::Gray8 => {
                let norm = Normalization::to_u8_domain(image.minval(), image.maxval());
                let raw = plane.iter().map(|&v| norm.apply_u8(v)).collect();
                ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageLuma8)
            }
            BandEncoding::Gray16 => {
                let max = Value::from(u16::MAX);
                let norm = Normalization::to_domain(image.minval(), image.maxval(), max);
                let raw = plane
                    .iter()
                    .map(|&v| norm.apply(v).round().clamp(0.0, max) as u16)
                    .collect();
                ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, raw)
                    .map(DynamicImage::ImageLuma16)
            }
        }
        .ok_or_else(|| Error::InvalidFormat(format!("band {d} does not fit {width}x{height}")))?;
        encoded.save(dir.join(&name))?;

        list.push_str(&name);
        match (desc.bounds(), desc.center_wavelength()) {
            (Some((a, b)), _) => list.push_str(&format!(" {a} {b}")),
            (None, Some(center)) => list.push_str(&format!(" {center}")),
            (None, None) => {}
        }
        list.push('\n');
    }

    let list_path = dir.join(format!("{stem}.txt"));
    fs::write(&list_path, list)?;
    log::info!("wrote {} bands to {}", image.band_count(), list_path.display());
    Ok(list_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_descriptors() {
        let text = "3\nbands\nb0.png\nb1.png 500\nb2.png 500 520\n";
        let list = FileList::parse(text, Path::new("/data")).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.files[1], PathBuf::from("/data/bands/b1.png"));
        assert_eq!(list.descs[0], BandDesc::unknown());
        assert_eq!(list.descs[1], BandDesc::center(500.0));
        assert_eq!(list.descs[2], BandDesc::range(500.0, 520.0));
    }

    #[test]
    fn test_parse_absolute_base_and_single_line_header() {
        let list = FileList::parse("1 /abs\nx.png", Path::new("/ignored")).unwrap();
        assert_eq!(list.files[0], PathBuf::from("/abs/x.png"));
    }

    #[test]
    fn test_parse_inconsistent() {
        assert!(FileList::parse("", Path::new(".")).is_err());
        assert!(FileList::parse("two\n./\n", Path::new(".")).is_err());
        assert!(FileList::parse("2\n./\na.png\n", Path::new(".")).is_err());
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let image = SpectralImage::from_fn(4, 3, 2, 0.0, 100.0, |x, y, d| {
            (x * 10 + y * 20 + d * 5) as Value
        })
        .unwrap()
        .with_meta(vec![BandDesc::center(450.0), BandDesc::range(500.0, 520.0)])
        .unwrap();

        let list_path = write_filelist(&image, dir.path().join("cube"), BandEncoding::Gray16).unwrap();
        let list = FileList::open(&list_path).unwrap();
        assert_eq!(list.descs, image.meta());

        let loaded = list.load(0.0, 100.0).unwrap();
        assert_eq!((loaded.width(), loaded.height(), loaded.band_count()), (4, 3, 2));
        for d in 0..2 {
            for (a, b) in loaded.band(d).iter().zip(image.band(d)) {
                assert_relative_eq!(*a, *b, epsilon = 0.01);
            }
        }
    }

    #[test]
    fn test_load_rejects_mixed_sizes() {
        let dir = TempDir::new().unwrap();
        ImageBuffer::<Luma<u8>, Vec<u8>>::new(2, 2)
            .save(dir.path().join("a.png"))
            .unwrap();
        ImageBuffer::<Luma<u8>, Vec<u8>>::new(3, 2)
            .save(dir.path().join("b.png"))
            .unwrap();
        let list = FileList::parse("2\n./\na.png\nb.png\n", dir.path()).unwrap();
        assert!(matches!(list.load(0.0, 255.0), Err(Error::InvalidFormat(_))));
    }
}
