//! Softmax, the terminal classification stage
//!
//! Always computes in float. The maximum is subtracted before
//! exponentiation so large logits do not overflow.

use super::{check_input, expect_mode, Layer, LayerKind, LayerOutput};
use crate::buffers::{ArithMode, Encoding, MapBuffers, MapRef};
use crate::error::Result;
use crate::shapes::MapGeometry;
use mxp_driver::VectorBackend;

/// Softmax layer context
#[derive(Debug, Clone)]
pub struct SoftmaxLayer {
    geometry: MapGeometry,
    output: MapBuffers,
}

impl SoftmaxLayer {
    /// Build a softmax over every sample of `geometry`
    ///
    /// # Errors
    ///
    /// Returns `AllocationFailed` if the output cannot be allocated.
    pub fn new(geometry: MapGeometry) -> Result<Self> {
        Ok(Self {
            geometry,
            output: MapBuffers::allocate(geometry.len())?,
        })
    }
}

impl Layer for SoftmaxLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Softmax
    }

    fn arith_mode(&self) -> ArithMode {
        ArithMode::Float
    }

    fn input_geometry(&self) -> MapGeometry {
        self.geometry
    }

    fn output_geometry(&self) -> MapGeometry {
        self.geometry
    }

    fn compute(
        &mut self,
        input: MapRef<'_>,
        geometry: MapGeometry,
        _coproc: &mut dyn VectorBackend,
    ) -> Result<LayerOutput> {
        check_input(LayerKind::Softmax, self.geometry, geometry, &input)?;
        expect_mode(LayerKind::Softmax, ArithMode::Float, &input)?;
        if let MapRef::Float(data) = input {
            softmax(data, &mut self.output.float_mut()[..geometry.len()]);
        }
        Ok(LayerOutput::new(geometry, Encoding::Float))
    }

    fn output(&self) -> &MapBuffers {
        &self.output
    }

    fn output_mut(&mut self) -> &mut MapBuffers {
        &mut self.output
    }
}

/// Numerically stable softmax of `input` into `output`
pub fn softmax(input: &[f32], output: &mut [f32]) {
    let max = input.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (o, &x) in output.iter_mut().zip(input) {
        *o = (x - max).exp();
        sum += *o;
    }
    if sum > 0.0 {
        for o in output.iter_mut() {
            *o /= sum;
        }
    }
}
