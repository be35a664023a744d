//! Element-wise activation

use super::{check_input, expect_mode, Layer, LayerKind, LayerOutput};
use crate::buffers::{ArithMode, MapBuffers, MapRef};
use crate::codec::{dequantize_value, quantize_value};
use crate::error::Result;
use crate::shapes::MapGeometry;
use mxp_driver::VectorBackend;

/// Activation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationFn {
    /// `max(0, x)`
    #[default]
    Relu,
    /// Logistic sigmoid
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
}

impl ActivationFn {
    /// Apply to one float sample
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Relu => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
        }
    }
}

/// Activation layer context
///
/// Geometry passes through unchanged. Fixed-point ReLU works on the raw
/// samples; the curved functions evaluate in float at the input's
/// fractional bits and requantize at the same bits.
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    func: ActivationFn,
    mode: ArithMode,
    geometry: MapGeometry,
    output: MapBuffers,
}

impl ActivationLayer {
    /// Build an activation over `geometry`
    ///
    /// # Errors
    ///
    /// Returns `AllocationFailed` if the output cannot be allocated.
    pub fn new(func: ActivationFn, mode: ArithMode, geometry: MapGeometry) -> Result<Self> {
        Ok(Self {
            func,
            mode,
            geometry,
            output: MapBuffers::allocate(geometry.len())?,
        })
    }

    /// Activation function
    pub const fn func(&self) -> ActivationFn {
        self.func
    }
}

impl Layer for ActivationLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Activation
    }

    fn arith_mode(&self) -> ArithMode {
        self.mode
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
        check_input(LayerKind::Activation, self.geometry, geometry, &input)?;
        expect_mode(LayerKind::Activation, self.mode, &input)?;

        let n = geometry.len();
        let func = self.func;
        match input {
            MapRef::Float(data) => {
                for (o, &x) in self.output.float_mut()[..n].iter_mut().zip(data) {
                    *o = func.apply(x);
                }
            }
            MapRef::Fixed { data, frac_bits } => {
                let out = &mut self.output.fixed_mut()[..n];
                if func == ActivationFn::Relu {
                    for (o, &x) in out.iter_mut().zip(data) {
                        *o = x.max(0);
                    }
                } else {
                    for (o, &x) in out.iter_mut().zip(data) {
                        *o = quantize_value(func.apply(dequantize_value(x, frac_bits)), frac_bits);
                    }
                }
            }
        }
        Ok(LayerOutput::new(geometry, input.encoding()))
    }

    fn output(&self) -> &MapBuffers {
        &self.output
    }

    fn output_mut(&mut self) -> &mut MapBuffers {
        &mut self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FracBits;
    use mxp_driver::SoftwareBackend;

    #[test]
    fn relu_float_and_fixed() {
        let mut coproc = SoftwareBackend::simulator().unwrap();
        let g = MapGeometry::new(1, 1, 4);

        let mut act = ActivationLayer::new(ActivationFn::Relu, ArithMode::Float, g).unwrap();
        act.compute(MapRef::Float(&[-1.0, 0.0, 2.5, -0.1]), g, &mut coproc).unwrap();
        assert_eq!(act.output().float(), &[0.0, 0.0, 2.5, 0.0]);

        let mut act = ActivationLayer::new(ActivationFn::Relu, ArithMode::Fixed, g).unwrap();
        let frac = FracBits::new(8).unwrap();
        act.compute(MapRef::Fixed { data: &[-3, 0, 7, i32::MIN], frac_bits: frac }, g, &mut coproc)
            .unwrap();
        assert_eq!(act.output().fixed(), &[0, 0, 7, 0]);
    }

    #[test]
    fn fixed_sigmoid_tracks_float() {
        let mut coproc = SoftwareBackend::simulator().unwrap();
        let g = MapGeometry::new(1, 1, 3);
        let frac = FracBits::new(12).unwrap();
        let xs = [-2.0f32, 0.0, 1.5];
        let fixed: Vec<i32> = xs.iter().map(|&x| quantize_value(x, frac)).collect();

        let mut act = ActivationLayer::new(ActivationFn::Sigmoid, ArithMode::Fixed, g).unwrap();
        act.compute(MapRef::Fixed { data: &fixed, frac_bits: frac }, g, &mut coproc).unwrap();
        for (&q, &x) in act.output().fixed().iter().zip(&xs) {
            let expected = ActivationFn::Sigmoid.apply(x);
            assert!((dequantize_value(q, frac) - expected).abs() <= frac.half_lsb());
        }
    }

    #[test]
    fn tanh_is_odd() {
        let f = ActivationFn::Tanh;
        assert!((f.apply(0.7) + f.apply(-0.7)).abs() < 1e-6);
    }
}
