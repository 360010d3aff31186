//! Per-pixel label assignment.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Label id of pixels that carry no label.
pub const UNLABELED: u8 = 0;

/// One label id per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LabelMask {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl LabelMask {
    /// Creates a mask with every pixel unlabeled.
    #[must_use]
    pub fn unlabeled(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![UNLABELED; width * height],
        }
    }

    /// Wraps existing row-major label data.
    ///
    /// # Errors
    /// Returns an error if `data` is not `width * height` long.
    pub fn from_vec(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::ConfigError(format!(
                "label mask has {} entries, expected {}",
                data.len(),
                width * height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Label of pixel `index`, if inside the mask.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.data.get(index).copied()
    }

    /// Raw label data.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Highest label id present, or `None` for an empty mask.
    #[must_use]
    pub fn max_label(&self) -> Option<u8> {
        self.data.iter().copied().max()
    }

    /// Sets the label of pixel `index` and returns the change record.
    ///
    /// Returns `Ok(None)` if the pixel already carried `label`.
    ///
    /// # Errors
    /// Returns an error if the index is outside the mask.
    pub fn relabel(&mut self, index: usize, label: u8) -> Result<Option<LabelChange>> {
        let pixels = self.data.len();
        let slot = self
            .data
            .get_mut(index)
            .ok_or(Error::PixelOutOfRange { index, pixels })?;
        if *slot == label {
            return Ok(None);
        }
        let change = LabelChange::new(index, *slot, label);
        *slot = label;
        Ok(Some(change))
    }

    /// Relabels every pixel of `indices`, collecting the effective changes.
    ///
    /// # Errors
    /// Returns an error on the first index outside the mask; earlier
    /// changes stay applied and are lost to the caller.
    pub fn relabel_all<I>(&mut self, indices: I, label: u8) -> Result<Vec<LabelChange>>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut changes = Vec::new();
        for index in indices {
            if let Some(change) = self.relabel(index, label)? {
                changes.push(change);
            }
        }
        Ok(changes)
    }
}

/// "Pixel `pixel` changed from label `from` to label `to`."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LabelChange {
    /// Row-major pixel index.
    pub pixel: usize,
    /// Previous label.
    pub from: u8,
    /// New label.
    pub to: u8,
}

impl LabelChange {
    /// Creates a change record.
    #[must_use]
    pub fn new(pixel: usize, from: u8, to: u8) -> Self {
        Self { pixel, from, to }
    }
}
