//! Feature-map buffers and their encodings
//!
//! A [`MapBuffers`] holds both encodings of one logical feature-map stack.
//! Only one of them is meaningful at a time; which one is tracked outside
//! the buffer as an [`Encoding`], and switching is an explicit
//! [`MapBuffers::convert`].

use crate::codec::{self, FracBits};
use crate::error::{CnnError, Result};

/// Arithmetic a layer computes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithMode {
    /// `f32` samples
    Float,
    /// Q-format `i32` samples
    Fixed,
}

impl std::fmt::Display for ArithMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

/// Encoding of a live buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// `f32` samples
    Float,
    /// `i32` samples with the given fractional bits
    Fixed(FracBits),
}

impl Encoding {
    /// Arithmetic mode of this encoding
    pub const fn mode(self) -> ArithMode {
        match self {
            Self::Float => ArithMode::Float,
            Self::Fixed(_) => ArithMode::Fixed,
        }
    }

    /// Fractional bits, if fixed
    pub const fn frac_bits(self) -> Option<FracBits> {
        match self {
            Self::Float => None,
            Self::Fixed(frac) => Some(frac),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Fixed(frac) => write!(f, "fixed {frac}"),
        }
    }
}

/// Memory layout of the maps handed to a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapLayout {
    /// Planes stored one after another (`map, row, col`)
    #[default]
    Isolated,
    /// Maps interleaved per pixel (`row, col, map`)
    Interleaved,
}

/// Borrowed view of one encoding of a buffer
#[derive(Debug, Clone, Copy)]
pub enum MapRef<'a> {
    /// Float samples
    Float(&'a [f32]),
    /// Fixed samples and their fractional bits
    Fixed {
        /// Samples
        data: &'a [i32],
        /// Fractional bits of `data`
        frac_bits: FracBits,
    },
}

impl MapRef<'_> {
    /// Number of samples
    pub const fn len(&self) -> usize {
        match self {
            Self::Float(data) => data.len(),
            Self::Fixed { data, .. } => data.len(),
        }
    }

    /// Whether the view is empty
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoding of the view
    pub const fn encoding(&self) -> Encoding {
        match self {
            Self::Float(_) => Encoding::Float,
            Self::Fixed { frac_bits, .. } => Encoding::Fixed(*frac_bits),
        }
    }
}

/// Both encodings of a feature-map stack, allocated once
#[derive(Debug, Clone, Default)]
pub struct MapBuffers {
    float: Vec<f32>,
    fixed: Vec<i32>,
}

impl MapBuffers {
    /// Allocate zeroed buffers for `len` samples in each encoding
    ///
    /// # Errors
    ///
    /// Returns `AllocationFailed` if either buffer cannot be reserved.
    pub fn allocate(len: usize) -> Result<Self> {
        Ok(Self {
            float: alloc_zeroed(len)?,
            fixed: alloc_zeroed(len)?,
        })
    }

    /// Sample capacity of each encoding
    pub fn len(&self) -> usize {
        self.float.len()
    }

    /// Whether the buffers hold no samples
    pub fn is_empty(&self) -> bool {
        self.float.is_empty()
    }

    /// Float samples
    pub fn float(&self) -> &[f32] {
        &self.float
    }

    /// Fixed samples
    pub fn fixed(&self) -> &[i32] {
        &self.fixed
    }

    /// Mutable float samples
    pub fn float_mut(&mut self) -> &mut [f32] {
        &mut self.float
    }

    /// Mutable fixed samples
    pub fn fixed_mut(&mut self) -> &mut [i32] {
        &mut self.fixed
    }

    /// View of the first `len` samples in `encoding`
    pub fn view(&self, encoding: Encoding, len: usize) -> MapRef<'_> {
        match encoding {
            Encoding::Float => MapRef::Float(&self.float[..len]),
            Encoding::Fixed(frac_bits) => MapRef::Fixed {
                data: &self.fixed[..len],
                frac_bits,
            },
        }
    }

    /// Materialize the first `len` samples in `to`, reading them from `from`
    ///
    /// Float → fixed quantizes at the target fractional bits, fixed → float
    /// dequantizes at the source bits, fixed → fixed rescales in place.
    pub fn convert(&mut self, from: Encoding, to: Encoding, len: usize) {
        match (from, to) {
            (Encoding::Float, Encoding::Float) => {}
            (Encoding::Float, Encoding::Fixed(frac)) => {
                codec::quantize(&self.float[..len], frac, &mut self.fixed[..len]);
            }
            (Encoding::Fixed(frac), Encoding::Float) => {
                codec::dequantize(&self.fixed[..len], frac, &mut self.float[..len]);
            }
            (Encoding::Fixed(src), Encoding::Fixed(dst)) => {
                codec::rescale(&mut self.fixed[..len], src, dst);
            }
        }
    }
}

/// Reserve and zero a buffer, reporting allocation failure instead of aborting
pub(crate) fn alloc_zeroed<T: Copy + Default>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| CnnError::AllocationFailed {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    v.resize(len, T::default());
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(bits: u8) -> FracBits {
        FracBits::new(bits).unwrap()
    }

    #[test]
    fn allocate_zeroed() {
        let b = MapBuffers::allocate(12).unwrap();
        assert_eq!(b.len(), 12);
        assert!(b.float().iter().all(|&v| v == 0.0));
        assert!(b.fixed().iter().all(|&v| v == 0));
    }

    #[test]
    fn allocation_failure_is_reported() {
        let err = alloc_zeroed::<u64>(usize::MAX / 4).unwrap_err();
        assert!(matches!(err, CnnError::AllocationFailed { .. }));
    }

    #[test]
    fn float_fixed_float_twice_equals_once() {
        let mut b = MapBuffers::allocate(6).unwrap();
        b.float_mut()
            .copy_from_slice(&[0.1, -0.37, 1.234_567, -2.5, 0.0, 3.141_59]);
        let fixed = Encoding::Fixed(q(10));

        b.convert(Encoding::Float, fixed, 6);
        b.convert(fixed, Encoding::Float, 6);
        let once = b.float().to_vec();

        b.convert(Encoding::Float, fixed, 6);
        b.convert(fixed, Encoding::Float, 6);
        assert_eq!(b.float(), once.as_slice());
    }

    #[test]
    fn convert_only_touches_len() {
        let mut b = MapBuffers::allocate(4).unwrap();
        b.float_mut().copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        b.convert(Encoding::Float, Encoding::Fixed(q(4)), 2);
        assert_eq!(b.fixed(), &[16, 16, 0, 0]);
    }

    #[test]
    fn fixed_to_fixed_rescales() {
        let mut b = MapBuffers::allocate(2).unwrap();
        b.fixed_mut().copy_from_slice(&[1 << 12, -(3 << 11)]);
        b.convert(Encoding::Fixed(q(12)), Encoding::Fixed(q(8)), 2);
        assert_eq!(b.fixed(), &[1 << 8, -(3 << 7)]);
    }

    #[test]
    fn view_reports_encoding() {
        let b = MapBuffers::allocate(3).unwrap();
        let v = b.view(Encoding::Fixed(q(7)), 2);
        assert_eq!(v.len(), 2);
        assert_eq!(v.encoding(), Encoding::Fixed(q(7)));
        assert_eq!(b.view(Encoding::Float, 3).encoding(), Encoding::Float);
    }
}
