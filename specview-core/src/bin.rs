//! Single histogram cell.

use crate::image::Value;

/// Accumulated pixel count and spectral sums of all pixels in one bin.
///
/// Sums are kept in `f64` and divided by the count on read, so adding and
/// then subtracting the same pixel restores the previous means.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bin {
    count: u64,
    sums: Vec<f64>,
}

impl Bin {
    /// Creates an empty bin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bin holding one pixel.
    #[must_use]
    pub fn from_pixel(pixel: &[Value]) -> Self {
        Self {
            count: 1,
            sums: pixel.iter().map(|&v| f64::from(v)).collect(),
        }
    }

    /// Number of pixels merged into this bin.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Pixel count as a weight.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn weight(&self) -> f64 {
        self.count as f64
    }

    /// Returns true once every pixel has been removed again.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Merges one pixel.
    #[inline]
    pub fn add(&mut self, pixel: &[Value]) {
        self.count += 1;
        if self.sums.is_empty() {
            self.sums.resize(pixel.len(), 0.0);
        }
        debug_assert_eq!(self.sums.len(), pixel.len());
        for (sum, &v) in self.sums.iter_mut().zip(pixel) {
            *sum += f64::from(v);
        }
    }

    /// Removes a pixel that was previously merged.
    ///
    /// Returns false, leaving the bin untouched, if the bin is already empty.
    #[inline]
    pub fn sub(&mut self, pixel: &[Value]) -> bool {
        debug_assert!(!self.is_empty(), "sub on an empty bin");
        if self.is_empty() {
            return false;
        }
        self.count -= 1;
        if self.is_empty() {
            // drop accumulated rounding noise
            self.sums.iter_mut().for_each(|sum| *sum = 0.0);
        } else {
            for (sum, &v) in self.sums.iter_mut().zip(pixel) {
                *sum -= f64::from(v);
            }
        }
        true
    }

    /// Per-band mean of the merged pixels; empty if the bin is empty.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn means(&self) -> Vec<Value> {
        if self.is_empty() {
            return Vec::new();
        }
        let weight = self.weight();
        self.sums.iter().map(|sum| (sum / weight) as Value).collect()
    }

    /// Mean of band `d`, if the bin is not empty.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn mean(&self, d: usize) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        self.sums.get(d).map(|sum| (sum / self.weight()) as Value)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_add_accumulates_mean() {
        let mut bin = Bin::from_pixel(&[20.0, 0.0]);
        bin.add(&[30.0, 0.0]);
        assert_eq!(bin.weight(), 2.0);
        assert_eq!(bin.means(), vec![25.0, 0.0]);
    }

    #[test]
    fn test_add_sub_round_trip() {
        let mut bin = Bin::new();
        bin.add(&[1.25, 7.5, 3.0]);
        bin.add(&[2.5, 0.1, 9.75]);
        let before = bin.clone();

        bin.add(&[100.3, 42.0, 0.7]);
        assert!(bin.sub(&[100.3, 42.0, 0.7]));

        assert_eq!(bin.weight(), before.weight());
        for (a, b) in bin.means().iter().zip(before.means()) {
            assert_relative_eq!(*a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_sub_to_empty_clears_means() {
        let mut bin = Bin::from_pixel(&[4.0, 2.0]);
        assert!(bin.sub(&[4.0, 2.0]));
        assert!(bin.is_empty());
        assert!(bin.means().is_empty());
        assert_eq!(bin.mean(0), None);
    }

    #[test]
    fn test_count_exact_past_f32_precision() {
        let pixels = (1u64 << 24) + 100;
        let mut bin = Bin::new();
        for _ in 0..pixels {
            bin.add(&[10.0]);
        }
        assert_eq!(bin.count(), pixels);
        assert_eq!(bin.weight(), 16_777_316.0);
        assert_eq!(bin.means(), vec![10.0]);

        assert!(bin.sub(&[10.0]));
        assert_eq!(bin.count(), pixels - 1);
        assert_eq!(bin.mean(0), Some(10.0));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "sub on an empty bin")]
    fn test_sub_on_empty_bin_is_contract_violation() {
        let mut bin = Bin::new();
        bin.sub(&[1.0]);
    }
}
