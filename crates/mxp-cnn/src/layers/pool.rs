//! Pooling
//!
//! Output size follows the same window formula as convolution. Padding
//! cells are never part of a window: max ignores them and average divides
//! by the number of real cells only.

use super::{check_input, expect_mode, Layer, LayerKind, LayerOutput};
use crate::buffers::{ArithMode, MapBuffers, MapRef};
use crate::error::{CnnError, Result};
use crate::shapes::{window_output_dim, MapGeometry};
use mxp_driver::VectorBackend;

/// Reduction applied over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolOp {
    /// Largest sample
    #[default]
    Max,
    /// Mean of the real (unpadded) samples
    Average,
}

/// Window parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolParams {
    /// Reduction
    pub op: PoolOp,
    /// Square window side
    pub window: usize,
    /// Window stride
    pub stride: usize,
    /// Padding on every side
    pub pad: usize,
}

impl PoolParams {
    /// Non-overlapping max pooling with window and stride `size`
    pub const fn max(size: usize) -> Self {
        Self {
            op: PoolOp::Max,
            window: size,
            stride: size,
            pad: 0,
        }
    }

    /// Non-overlapping average pooling with window and stride `size`
    pub const fn average(size: usize) -> Self {
        Self {
            op: PoolOp::Average,
            window: size,
            stride: size,
            pad: 0,
        }
    }

    /// Output geometry for `input`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the window does not fit, or padding would
    /// leave a window with no real cells.
    pub fn output_geometry(&self, input: MapGeometry) -> Result<MapGeometry> {
        if self.pad >= self.window {
            return Err(CnnError::invalid_config(format!(
                "pool padding {} must be smaller than window {}",
                self.pad, self.window
            )));
        }
        let dim = |d| window_output_dim(d, self.pad, self.window, self.stride);
        match (dim(input.height), dim(input.width)) {
            (Some(h), Some(w)) => Ok(MapGeometry::new(input.maps, h, w)),
            _ => Err(CnnError::invalid_config(format!(
                "pool window {} stride {} does not fit {input} padded by {}",
                self.window, self.stride, self.pad
            ))),
        }
    }
}

/// Pooling layer context
#[derive(Debug, Clone)]
pub struct PoolLayer {
    params: PoolParams,
    mode: ArithMode,
    input: MapGeometry,
    output_geometry: MapGeometry,
    output: MapBuffers,
}

impl PoolLayer {
    /// Build a pooling layer for `input`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a window that does not fit and
    /// `AllocationFailed` if the output cannot be allocated.
    pub fn new(params: PoolParams, mode: ArithMode, input: MapGeometry) -> Result<Self> {
        let output_geometry = params.output_geometry(input)?;
        Ok(Self {
            params,
            mode,
            input,
            output_geometry,
            output: MapBuffers::allocate(output_geometry.len())?,
        })
    }

    /// Window parameters
    pub const fn params(&self) -> &PoolParams {
        &self.params
    }

    /// Real cells of window `(r, c)`, clipped to the unpadded plane
    fn window_cells(&self, r: usize, c: usize) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let p = &self.params;
        let clip = |start: usize, len: usize| {
            let lo = start.saturating_sub(p.pad).min(len);
            let hi = (start + p.window).saturating_sub(p.pad).min(len);
            lo..hi
        };
        (
            clip(r * p.stride, self.input.height),
            clip(c * p.stride, self.input.width),
        )
    }

    fn pool<T: Copy>(
        &self,
        input: &[T],
        output: &mut [T],
        reduce: impl Fn(&mut dyn Iterator<Item = T>, usize) -> T,
    ) {
        let (inp, out) = (self.input, self.output_geometry);
        for m in 0..out.maps {
            let plane = &input[m * inp.plane_len()..(m + 1) * inp.plane_len()];
            for r in 0..out.height {
                for c in 0..out.width {
                    let (rows, cols) = self.window_cells(r, c);
                    let count = rows.len() * cols.len();
                    let mut cells = rows.flat_map(|y| {
                        let cols = cols.clone();
                        cols.map(move |x| plane[y * inp.width + x])
                    });
                    output[m * out.plane_len() + r * out.width + c] = reduce(&mut cells, count);
                }
            }
        }
    }
}

fn max_f32(cells: &mut dyn Iterator<Item = f32>, _count: usize) -> f32 {
    cells.fold(f32::NEG_INFINITY, f32::max)
}

#[allow(clippy::cast_precision_loss)]
fn avg_f32(cells: &mut dyn Iterator<Item = f32>, count: usize) -> f32 {
    cells.sum::<f32>() / count as f32
}

fn max_i32(cells: &mut dyn Iterator<Item = i32>, _count: usize) -> i32 {
    cells.max().unwrap_or(0)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn avg_i32(cells: &mut dyn Iterator<Item = i32>, count: usize) -> i32 {
    let sum: i64 = cells.map(i64::from).sum();
    let n = count as i64;
    // Round half away from zero, like the codec.
    let q = (sum.abs() + n / 2) / n;
    (if sum < 0 { -q } else { q }) as i32
}

impl Layer for PoolLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Pool
    }

    fn arith_mode(&self) -> ArithMode {
        self.mode
    }

    fn input_geometry(&self) -> MapGeometry {
        self.input
    }

    fn output_geometry(&self) -> MapGeometry {
        self.output_geometry
    }

    fn compute(
        &mut self,
        input: MapRef<'_>,
        geometry: MapGeometry,
        _coproc: &mut dyn VectorBackend,
    ) -> Result<LayerOutput> {
        check_input(LayerKind::Pool, self.input, geometry, &input)?;
        expect_mode(LayerKind::Pool, self.mode, &input)?;

        let mut output = std::mem::take(&mut self.output);
        let n = self.output_geometry.len();
        match (input, self.params.op) {
            (MapRef::Float(data), PoolOp::Max) => {
                self.pool(data, &mut output.float_mut()[..n], max_f32);
            }
            (MapRef::Float(data), PoolOp::Average) => {
                self.pool(data, &mut output.float_mut()[..n], avg_f32);
            }
            (MapRef::Fixed { data, .. }, PoolOp::Max) => {
                self.pool(data, &mut output.fixed_mut()[..n], max_i32);
            }
            (MapRef::Fixed { data, .. }, PoolOp::Average) => {
                self.pool(data, &mut output.fixed_mut()[..n], avg_i32);
            }
        }
        self.output = output;
        Ok(LayerOutput::new(self.output_geometry, input.encoding()))
    }

    fn output(&self) -> &MapBuffers {
        &self.output
    }

    fn output_mut(&mut self) -> &mut MapBuffers {
        &mut self.output
    }
}
