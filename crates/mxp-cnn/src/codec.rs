//! Fixed-point codec
//!
//! Converts feature-map samples between `f32` and Q-format `i32` at a given
//! number of fractional bits. The fractional-bit count belongs to a buffer,
//! not to a sample; moving between two fixed buffers with different counts
//! goes through [`rescale`], never a reinterpretation.
//!
//! Rounding is half away from zero everywhere (quantize, rescale and the
//! convolution accumulator shift), so every path agrees on ties.

use crate::error::{CnnError, Result};

/// Number of fractional bits of a fixed-point buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FracBits(u8);

impl FracBits {
    /// Largest supported fractional-bit count (keeps one integer bit and
    /// the sign in an `i32`).
    pub const MAX: u8 = 30;

    /// Validate a fractional-bit count
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `bits` exceeds [`FracBits::MAX`].
    pub fn new(bits: u8) -> Result<Self> {
        if bits > Self::MAX {
            return Err(CnnError::invalid_config(format!(
                "{bits} fractional bits exceeds the maximum of {}",
                Self::MAX
            )));
        }
        Ok(Self(bits))
    }

    /// Raw bit count
    pub const fn get(self) -> u8 {
        self.0
    }

    /// `2^bits` as `f32` (exact for every valid count)
    #[allow(clippy::cast_precision_loss)]
    pub fn scale(self) -> f32 {
        (1u32 << self.0) as f32
    }

    /// Half an LSB, the round-trip tolerance of this format
    pub fn half_lsb(self) -> f32 {
        0.5 / self.scale()
    }
}

/// Q16, the word-width format of the reference coprocessor
impl Default for FracBits {
    fn default() -> Self {
        Self(16)
    }
}

impl std::fmt::Display for FracBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

/// Quantize one sample
#[allow(clippy::cast_possible_truncation)]
pub fn quantize_value(x: f32, frac: FracBits) -> i32 {
    // `as` saturates at the i32 range and maps NaN to 0.
    (x * frac.scale()).round() as i32
}

/// Dequantize one sample
#[allow(clippy::cast_precision_loss)]
pub fn dequantize_value(q: i32, frac: FracBits) -> f32 {
    q as f32 / frac.scale()
}

/// Quantize `src` into `dst` (float → fixed)
///
/// Only the first `min(src.len(), dst.len())` samples are written; callers
/// size both buffers to the same sample count.
pub fn quantize(src: &[f32], frac: FracBits, dst: &mut [i32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = quantize_value(s, frac);
    }
}

/// Dequantize `src` into `dst` (fixed → float)
pub fn dequantize(src: &[i32], frac: FracBits, dst: &mut [f32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = dequantize_value(s, frac);
    }
}

/// Rescale fixed samples in place from `from` to `to` fractional bits
///
/// Widening saturates at the `i32` range; narrowing rounds half away from
/// zero.
pub fn rescale(buf: &mut [i32], from: FracBits, to: FracBits) {
    match to.get().cmp(&from.get()) {
        std::cmp::Ordering::Equal => {}
        std::cmp::Ordering::Greater => {
            let shift = to.get() - from.get();
            for v in buf.iter_mut() {
                *v = saturate(i64::from(*v) << shift);
            }
        }
        std::cmp::Ordering::Less => {
            let shift = from.get() - to.get();
            for v in buf.iter_mut() {
                *v = saturate(round_shift(i64::from(*v), shift));
            }
        }
    }
}

/// Arithmetic right shift with round-half-away-from-zero
///
/// Saturates at the `i64` range, so `i64::MIN` and `i64::MAX` shift to the
/// same magnitude.
pub(crate) fn round_shift(acc: i64, shift: u8) -> i64 {
    if shift == 0 {
        return acc;
    }
    let half = 1i64 << (shift - 1);
    if acc >= 0 {
        acc.saturating_add(half) >> shift
    } else {
        -(acc.saturating_neg().saturating_add(half) >> shift)
    }
}

/// Clamp an accumulator into the `i32` sample range
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn saturate(acc: i64) -> i32 {
    acc.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
