//! Linear value remapping.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::image::Value;

/// Pure linear transform `out = in * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Normalization {
    /// Multiplicative factor.
    pub scale: Value,
    /// Additive offset applied after scaling.
    pub offset: Value,
}

impl Normalization {
    /// The identity transform.
    pub const IDENTITY: Normalization = Normalization {
        scale: 1.0,
        offset: 0.0,
    };

    /// Maps `[src_min, src_max]` onto `[dst_min, dst_max]`.
    ///
    /// A degenerate source range maps everything onto `dst_min`.
    #[must_use]
    pub fn between(src: (Value, Value), dst: (Value, Value)) -> Self {
        let (src_min, src_max) = src;
        let (dst_min, dst_max) = dst;
        let span = src_max - src_min;
        if span == 0.0 || !span.is_finite() {
            return Self {
                scale: 0.0,
                offset: dst_min,
            };
        }
        let scale = (dst_max - dst_min) / span;
        Self {
            scale,
            offset: dst_min - src_min * scale,
        }
    }

    /// Maps `minval` to 0 and `maxval` to `domain_max`.
    #[must_use]
    pub fn to_domain(minval: Value, maxval: Value, domain_max: Value) -> Self {
        Self::between((minval, maxval), (0.0, domain_max))
    }

    /// Maps `[minval, maxval]` onto the 8-bit display domain.
    #[must_use]
    pub fn to_u8_domain(minval: Value, maxval: Value) -> Self {
        Self::to_domain(minval, maxval, Value::from(u8::MAX))
    }

    /// Transforms a single value.
    #[inline]
    #[must_use]
    pub fn apply(&self, value: Value) -> Value {
        value * self.scale + self.offset
    }

    /// Transforms every value of `values` in place.
    pub fn apply_in_place(&self, values: &mut [Value]) {
        for v in values {
            *v = self.apply(*v);
        }
    }

    /// Transforms and saturates to 8 bit, rounding to nearest.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn apply_u8(&self, value: Value) -> u8 {
        self.apply(value).round().clamp(0.0, Value::from(u8::MAX)) as u8
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::IDENTITY
    }
}
