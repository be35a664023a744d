//! Feature-map geometry and the sliding-window shape formula
//!
//! Every layer with a spatial window (convolution, pooling) derives its
//! output size from [`window_output_dim`]; downstream buffer sizing depends
//! on this exact integer arithmetic.

/// Geometry of a stack of feature maps (`maps` planes of `height × width`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapGeometry {
    /// Number of planes
    pub maps: usize,
    /// Rows per plane
    pub height: usize,
    /// Columns per plane
    pub width: usize,
}

impl MapGeometry {
    /// Create new geometry
    pub const fn new(maps: usize, height: usize, width: usize) -> Self {
        Self {
            maps,
            height,
            width,
        }
    }

    /// Samples in one plane
    #[must_use]
    pub const fn plane_len(&self) -> usize {
        self.height * self.width
    }

    /// Total samples
    #[must_use]
    pub const fn len(&self) -> usize {
        self.maps * self.height * self.width
    }

    /// Whether the geometry holds no samples
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geometry after zero-padding `pad` samples on every spatial border
    #[must_use]
    pub const fn padded(&self, pad: usize) -> Self {
        Self::new(self.maps, self.height + 2 * pad, self.width + 2 * pad)
    }
}

impl std::fmt::Display for MapGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}×{}", self.maps, self.height, self.width)
    }
}

/// Output size of a sliding window along one dimension
///
/// `(in + 2·pad − window + 1 + stride − 1) / stride`, integer division.
/// Returns `None` when the window is empty, the stride is zero, or the
/// window does not fit the padded input.
pub const fn window_output_dim(
    in_dim: usize,
    pad: usize,
    window: usize,
    stride: usize,
) -> Option<usize> {
    let padded = in_dim + 2 * pad;
    if window == 0 || stride == 0 || window > padded {
        return None;
    }
    Some((padded - window + 1 + stride - 1) / stride)
}
