//! Fully connected layer
//!
//! Flattens whatever geometry it is given and produces one row of
//! `outputs` samples, reported as `1 × 1 × outputs`.

use super::{check_input, expect_mode, Layer, LayerKind, LayerOutput};
use crate::buffers::{alloc_zeroed, ArithMode, Encoding, MapBuffers, MapRef};
use crate::codec::{self, FracBits};
use crate::conv::finish_fixed;
use crate::error::{CnnError, Result};
use crate::shapes::MapGeometry;
use mxp_driver::VectorBackend;

/// Number format of a fully connected layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerProductParams {
    /// Output count
    pub outputs: usize,
    /// Fractional bits of input, output and fixed bias
    pub map_frac_bits: FracBits,
    /// Fractional bits of the fixed weights
    pub weight_frac_bits: FracBits,
}

/// Fully connected layer context
#[derive(Debug, Clone)]
pub struct InnerProductLayer {
    params: InnerProductParams,
    mode: ArithMode,
    input: MapGeometry,
    weights_float: Vec<f32>,
    weights_fixed: Vec<i32>,
    bias_float: Vec<f32>,
    bias_fixed: Vec<i32>,
    output: MapBuffers,
}

impl InnerProductLayer {
    /// Build from float weights laid out `outputs × input.len()`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty layer or wrong weight lengths,
    /// and `AllocationFailed` if a buffer cannot be allocated.
    pub fn new(
        params: InnerProductParams,
        mode: ArithMode,
        input: MapGeometry,
        weights: &[f32],
        bias: &[f32],
    ) -> Result<Self> {
        let inputs = input.len();
        if params.outputs == 0 || inputs == 0 {
            return Err(CnnError::invalid_config(format!(
                "inner product {input} -> {} has no samples",
                params.outputs
            )));
        }
        if weights.len() != params.outputs * inputs {
            return Err(CnnError::invalid_config(format!(
                "inner product weights hold {} values, {}x{inputs} expected",
                weights.len(),
                params.outputs
            )));
        }
        if bias.len() != params.outputs {
            return Err(CnnError::invalid_config(format!(
                "inner product bias holds {} values, {} expected",
                bias.len(),
                params.outputs
            )));
        }

        let mut weights_fixed = alloc_zeroed(weights.len())?;
        codec::quantize(weights, params.weight_frac_bits, &mut weights_fixed);
        let mut bias_fixed = alloc_zeroed(bias.len())?;
        codec::quantize(bias, params.map_frac_bits, &mut bias_fixed);

        let mut weights_float = alloc_zeroed(weights.len())?;
        weights_float.copy_from_slice(weights);
        let mut bias_float = alloc_zeroed(bias.len())?;
        bias_float.copy_from_slice(bias);

        Ok(Self {
            params,
            mode,
            input,
            weights_float,
            weights_fixed,
            bias_float,
            bias_fixed,
            output: MapBuffers::allocate(params.outputs)?,
        })
    }

    /// Number format
    pub const fn params(&self) -> &InnerProductParams {
        &self.params
    }
}

impl Layer for InnerProductLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::InnerProduct
    }

    fn arith_mode(&self) -> ArithMode {
        self.mode
    }

    fn input_frac_bits(&self) -> Option<FracBits> {
        Some(self.params.map_frac_bits)
    }

    fn input_geometry(&self) -> MapGeometry {
        self.input
    }

    fn output_geometry(&self) -> MapGeometry {
        MapGeometry::new(1, 1, self.params.outputs)
    }

    fn compute(
        &mut self,
        input: MapRef<'_>,
        geometry: MapGeometry,
        _coproc: &mut dyn VectorBackend,
    ) -> Result<LayerOutput> {
        check_input(LayerKind::InnerProduct, self.input, geometry, &input)?;
        expect_mode(LayerKind::InnerProduct, self.mode, &input)?;

        let inputs = self.input.len();
        let outputs = self.params.outputs;
        let encoding = match input {
            MapRef::Float(data) => {
                let out = &mut self.output.float_mut()[..outputs];
                for (o, (dst, row)) in out
                    .iter_mut()
                    .zip(self.weights_float.chunks_exact(inputs))
                    .enumerate()
                {
                    let dot: f32 = row.iter().zip(data).map(|(w, x)| w * x).sum();
                    *dst = dot + self.bias_float[o];
                }
                Encoding::Float
            }
            MapRef::Fixed { data, frac_bits } => {
                if frac_bits != self.params.map_frac_bits {
                    return Err(CnnError::invalid_config(format!(
                        "inner product expects {} input, got {frac_bits}",
                        self.params.map_frac_bits
                    )));
                }
                let shift = self.params.weight_frac_bits.get();
                let out = &mut self.output.fixed_mut()[..outputs];
                for (o, (dst, row)) in out
                    .iter_mut()
                    .zip(self.weights_fixed.chunks_exact(inputs))
                    .enumerate()
                {
                    let acc = row.iter().zip(data).fold(0i64, |acc, (&w, &x)| {
                        acc.saturating_add(i64::from(w) * i64::from(x))
                    });
                    *dst = finish_fixed(acc, shift, self.bias_fixed[o]);
                }
                Encoding::Fixed(frac_bits)
            }
        };
        Ok(LayerOutput::new(self.output_geometry(), encoding))
    }

    fn output(&self) -> &MapBuffers {
        &self.output
    }

    fn output_mut(&mut self) -> &mut MapBuffers {
        &mut self.output
    }
}
