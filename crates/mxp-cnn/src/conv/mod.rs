//! Convolution engine
//!
//! A [`ConvLayer`] owns everything one convolution needs: float and fixed
//! kernels and biases, both output encodings, a zero-padded input scratch
//! and, for the vector strategy, the [`ExtendedKernel`] table. All of it is
//! allocated when the layer is built; computing allocates nothing.
//!
//! Two strategies share one contract. [`ConvStrategy::Scalar`] is the six
//! nested loops; [`ConvStrategy::Vector`] drives the coprocessor block by
//! block. Both accumulate fixed-point products exactly before the final
//! shift, so their outputs are bit-identical.

mod extend;
mod scalar;
mod vector;

pub use extend::ExtendedKernel;
pub(crate) use scalar::finish_fixed;

use crate::buffers::{ArithMode, Encoding, MapBuffers, MapLayout, MapRef};
use crate::codec::{self, FracBits};
use crate::error::{CnnError, Result};
use crate::layers::{check_input, Layer, LayerKind, LayerOutput};
use crate::shapes::{window_output_dim, MapGeometry};
use mxp_driver::{ElementWidth, VectorBackend};
use tracing::debug;
use vector::LaneScratch;

/// Shape and number format of a convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams {
    /// Input maps
    pub in_maps: usize,
    /// Output maps
    pub out_maps: usize,
    /// Unpadded input height
    pub map_height: usize,
    /// Unpadded input width
    pub map_width: usize,
    /// Square kernel side `K`
    pub kernel_size: usize,
    /// Zero padding on every side
    pub pad: usize,
    /// Window stride
    pub stride: usize,
    /// Fractional bits of input and output maps (and of the fixed bias)
    pub map_frac_bits: FracBits,
    /// Fractional bits of the fixed kernel
    pub kernel_frac_bits: FracBits,
}

impl ConvParams {
    /// Unpadded input geometry
    pub const fn input_geometry(&self) -> MapGeometry {
        MapGeometry::new(self.in_maps, self.map_height, self.map_width)
    }

    /// Input geometry after padding
    pub const fn padded_geometry(&self) -> MapGeometry {
        self.input_geometry().padded(self.pad)
    }

    /// Coefficients in the kernel (`out × in × K × K`)
    pub const fn kernel_len(&self) -> usize {
        self.out_maps * self.in_maps * self.kernel_size * self.kernel_size
    }

    /// Output geometry
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the kernel does not fit the padded input
    /// or stride or kernel size is zero.
    pub fn output_geometry(&self) -> Result<MapGeometry> {
        let dim = |input| window_output_dim(input, self.pad, self.kernel_size, self.stride);
        match (dim(self.map_height), dim(self.map_width)) {
            (Some(height), Some(width)) => Ok(MapGeometry::new(self.out_maps, height, width)),
            _ => Err(CnnError::invalid_config(format!(
                "{k}x{k} kernel with stride {s} does not fit {g} padded by {p}",
                k = self.kernel_size,
                s = self.stride,
                g = self.input_geometry(),
                p = self.pad
            ))),
        }
    }

    /// Check the parameters and return the output geometry
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for empty maps or a kernel that does not fit.
    pub fn validate(&self) -> Result<MapGeometry> {
        if self.in_maps == 0 || self.out_maps == 0 || self.input_geometry().is_empty() {
            return Err(CnnError::invalid_config(format!(
                "convolution {} -> {} maps over {} has no samples",
                self.in_maps,
                self.out_maps,
                self.input_geometry()
            )));
        }
        self.output_geometry()
    }
}

/// How a convolution is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvStrategy {
    /// Six nested loops on the host
    #[default]
    Scalar,
    /// Block multiply-accumulates on the vector coprocessor
    Vector,
}

impl std::fmt::Display for ConvStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::Vector => write!(f, "vector"),
        }
    }
}

/// Convolution layer context
#[derive(Debug, Clone)]
pub struct ConvLayer {
    params: ConvParams,
    output_geometry: MapGeometry,
    mode: ArithMode,
    strategy: ConvStrategy,
    block_width: usize,

    kernel_float: Vec<f32>,
    kernel_fixed: Vec<i32>,
    bias_float: Vec<f32>,
    bias_fixed: Vec<i32>,
    extended: Option<ExtendedKernel>,

    output: MapBuffers,
    padded: MapBuffers,
    lanes: LaneScratch,
}

impl ConvLayer {
    /// Build a convolution from float weights
    ///
    /// The fixed kernel is quantized at the kernel's fractional bits and
    /// the fixed bias at the map's, so it adds directly to the shifted
    /// accumulator. The block width defaults to the output width.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for inconsistent parameters or weight
    /// lengths, and `AllocationFailed` if a buffer cannot be allocated.
    pub fn new(
        params: ConvParams,
        mode: ArithMode,
        strategy: ConvStrategy,
        kernel: &[f32],
        bias: &[f32],
    ) -> Result<Self> {
        let output_geometry = params.validate()?;
        let padded = if params.pad == 0 {
            MapBuffers::default()
        } else {
            MapBuffers::allocate(params.padded_geometry().len())?
        };

        let mut layer = Self {
            params,
            output_geometry,
            mode,
            strategy,
            block_width: output_geometry.width,
            kernel_float: crate::buffers::alloc_zeroed(params.kernel_len())?,
            kernel_fixed: crate::buffers::alloc_zeroed(params.kernel_len())?,
            bias_float: crate::buffers::alloc_zeroed(params.out_maps)?,
            bias_fixed: crate::buffers::alloc_zeroed(params.out_maps)?,
            extended: None,
            output: MapBuffers::allocate(output_geometry.len())?,
            padded,
            lanes: LaneScratch::default(),
        };
        layer.set_weights(kernel, bias)?;

        debug!(
            "conv {} -> {} ({}x{} s{} p{}), {} {}, block width {}",
            params.input_geometry(),
            output_geometry,
            params.kernel_size,
            params.kernel_size,
            params.stride,
            params.pad,
            mode,
            strategy,
            layer.block_width
        );
        Ok(layer)
    }

    /// Replace kernel and bias
    ///
    /// Rebuilds the extended kernel when the vector strategy is selected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the lengths do not match the parameters.
    pub fn set_weights(&mut self, kernel: &[f32], bias: &[f32]) -> Result<()> {
        if kernel.len() != self.params.kernel_len() {
            return Err(CnnError::invalid_config(format!(
                "convolution kernel holds {} coefficients, {} expected",
                kernel.len(),
                self.params.kernel_len()
            )));
        }
        if bias.len() != self.params.out_maps {
            return Err(CnnError::invalid_config(format!(
                "convolution bias holds {} values, {} expected",
                bias.len(),
                self.params.out_maps
            )));
        }

        self.kernel_float.copy_from_slice(kernel);
        self.bias_float.copy_from_slice(bias);
        codec::quantize(kernel, self.params.kernel_frac_bits, &mut self.kernel_fixed);
        codec::quantize(bias, self.params.map_frac_bits, &mut self.bias_fixed);
        self.rebuild_vector_state()
    }

    /// Switch strategy, building or dropping the extended kernel
    ///
    /// # Errors
    ///
    /// Returns `AllocationFailed` if the extended kernel cannot be built.
    pub fn set_strategy(&mut self, strategy: ConvStrategy) -> Result<()> {
        self.strategy = strategy;
        self.rebuild_vector_state()
    }

    /// Switch arithmetic mode
    pub fn set_arith_mode(&mut self, mode: ArithMode) {
        self.mode = mode;
    }

    /// Columns per vector block, `1..=output width`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` outside that range.
    pub fn set_block_width(&mut self, block_width: usize) -> Result<()> {
        if block_width == 0 || block_width > self.output_geometry.width {
            return Err(CnnError::invalid_config(format!(
                "block width {block_width} outside 1..={}",
                self.output_geometry.width
            )));
        }
        self.block_width = block_width;
        self.rebuild_vector_state()
    }

    fn rebuild_vector_state(&mut self) -> Result<()> {
        match self.strategy {
            ConvStrategy::Scalar => {
                self.extended = None;
                self.lanes = LaneScratch::default();
            }
            ConvStrategy::Vector => {
                self.extended = Some(ExtendedKernel::build(
                    &self.kernel_fixed,
                    self.params.in_maps,
                    self.params.out_maps,
                    self.params.kernel_size,
                    self.block_width,
                )?);
                self.lanes = LaneScratch::allocate(self.params.out_maps, self.block_width)?;
            }
        }
        Ok(())
    }

    /// Shape parameters
    pub const fn params(&self) -> &ConvParams {
        &self.params
    }

    /// Execution strategy
    pub const fn strategy(&self) -> ConvStrategy {
        self.strategy
    }

    /// Columns per vector block
    pub const fn block_width(&self) -> usize {
        self.block_width
    }

    /// Extended kernel, present only for the vector strategy
    pub const fn extended_kernel(&self) -> Option<&ExtendedKernel> {
        self.extended.as_ref()
    }

    /// Fixed kernel (`out × in × K × K`)
    pub fn kernel_fixed(&self) -> &[i32] {
        &self.kernel_fixed
    }

    /// Fixed bias at the map's fractional bits
    pub fn bias_fixed(&self) -> &[i32] {
        &self.bias_fixed
    }

    /// Convolve an input that is already zero-padded
    ///
    /// `input` must hold `in_maps × (H + 2p) × (W + 2p)` samples in the
    /// encoding of the layer's mode; only that encoding of the output is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFeature` for interleaved maps, `InvalidConfig`
    /// for a wrong input size or encoding, and `Coprocessor` if the vector
    /// unit rejects a tile.
    pub fn compute_padded(
        &mut self,
        input: MapRef<'_>,
        layout: MapLayout,
        coproc: &mut dyn VectorBackend,
    ) -> Result<LayerOutput> {
        if layout == MapLayout::Interleaved {
            return Err(CnnError::unsupported_feature(
                "interleaved map layout in convolution",
            ));
        }
        let padded_len = self.params.padded_geometry().len();
        if input.len() != padded_len {
            return Err(CnnError::invalid_config(format!(
                "padded convolution input holds {} samples, {padded_len} expected",
                input.len()
            )));
        }

        let out = self.output_geometry;
        let n = out.len();
        match (self.mode, input) {
            (ArithMode::Float, MapRef::Float(data)) => {
                if self.strategy == ConvStrategy::Vector {
                    debug!("vector unit is integer only, computing float convolution on the scalar path");
                }
                scalar::conv_float(
                    &self.params,
                    out,
                    data,
                    &self.kernel_float,
                    &self.bias_float,
                    &mut self.output.float_mut()[..n],
                );
                Ok(LayerOutput::new(out, Encoding::Float))
            }
            (ArithMode::Fixed, MapRef::Fixed { data, frac_bits })
                if frac_bits == self.params.map_frac_bits =>
            {
                match self.strategy {
                    ConvStrategy::Scalar => scalar::conv_fixed(
                        &self.params,
                        out,
                        data,
                        &self.kernel_fixed,
                        &self.bias_fixed,
                        &mut self.output.fixed_mut()[..n],
                    ),
                    ConvStrategy::Vector => self.compute_vector(data, coproc)?,
                }
                Ok(LayerOutput::new(out, Encoding::Fixed(self.params.map_frac_bits)))
            }
            (mode, other) => Err(CnnError::invalid_config(format!(
                "{mode} convolution with {} maps cannot read {} input",
                self.params.map_frac_bits,
                other.encoding()
            ))),
        }
    }

    fn compute_vector(&mut self, data: &[i32], coproc: &mut dyn VectorBackend) -> Result<()> {
        let Some(ext) = self.extended.as_ref() else {
            return Err(CnnError::invalid_config(
                "vector convolution without an extended kernel",
            ));
        };
        coproc.check_frac_bits(ElementWidth::Word, self.params.kernel_frac_bits.get())?;
        coproc.check_frac_bits(ElementWidth::Word, self.params.map_frac_bits.get())?;
        coproc.check_tile(vector::tile_bytes(self.params.out_maps, self.block_width))?;

        let n = self.output_geometry.len();
        vector::conv_vector(
            &self.params,
            self.output_geometry,
            ext,
            data,
            &self.bias_fixed,
            &mut self.output.fixed_mut()[..n],
            &mut self.lanes,
            coproc,
        )
    }
}

impl Layer for ConvLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Conv
    }

    fn arith_mode(&self) -> ArithMode {
        self.mode
    }

    fn input_frac_bits(&self) -> Option<FracBits> {
        Some(self.params.map_frac_bits)
    }

    fn input_geometry(&self) -> MapGeometry {
        self.params.input_geometry()
    }

    fn output_geometry(&self) -> MapGeometry {
        self.output_geometry
    }

    fn compute(
        &mut self,
        input: MapRef<'_>,
        geometry: MapGeometry,
        coproc: &mut dyn VectorBackend,
    ) -> Result<LayerOutput> {
        check_input(LayerKind::Conv, self.params.input_geometry(), geometry, &input)?;
        let pad = self.params.pad;
        if pad == 0 {
            return self.compute_padded(input, MapLayout::Isolated, coproc);
        }

        // Borders of the scratch were zeroed at allocation and are never
        // written, so only the interior is copied.
        let mut padded = std::mem::take(&mut self.padded);
        match input {
            MapRef::Float(src) => copy_interior(src, padded.float_mut(), geometry, pad),
            MapRef::Fixed { data, .. } => copy_interior(data, padded.fixed_mut(), geometry, pad),
        }
        let len = self.params.padded_geometry().len();
        let result = self.compute_padded(
            padded.view(input.encoding(), len),
            MapLayout::Isolated,
            coproc,
        );
        self.padded = padded;
        result
    }

    fn output(&self) -> &MapBuffers {
        &self.output
    }

    fn output_mut(&mut self) -> &mut MapBuffers {
        &mut self.output
    }
}

/// Copy unpadded planes into the interior of a padded buffer
fn copy_interior<T: Copy>(src: &[T], dst: &mut [T], geometry: MapGeometry, pad: usize) {
    let padded = geometry.padded(pad);
    for m in 0..geometry.maps {
        for r in 0..geometry.height {
            let from = m * geometry.plane_len() + r * geometry.width;
            let to = m * padded.plane_len() + (r + pad) * padded.width + pad;
            dst[to..to + geometry.width].copy_from_slice(&src[from..from + geometry.width]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mxp_driver::SoftwareBackend;

    fn params(k: usize, pad: usize, stride: usize) -> ConvParams {
        ConvParams {
            in_maps: 2,
            out_maps: 3,
            map_height: 6,
            map_width: 7,
            kernel_size: k,
            pad,
            stride,
            map_frac_bits: FracBits::new(12).unwrap(),
            kernel_frac_bits: FracBits::new(12).unwrap(),
        }
    }

    fn weights(p: &ConvParams) -> (Vec<f32>, Vec<f32>) {
        let kernel = (0..p.kernel_len())
            .map(|v| ((v * 7 % 11) as f32 - 5.0) / 8.0)
            .collect();
        let bias = (0..p.out_maps).map(|o| o as f32 * 0.25 - 0.25).collect();
        (kernel, bias)
    }

    #[test]
    fn output_geometry_uses_shape_formula() {
        assert_eq!(params(3, 0, 1).output_geometry().unwrap(), MapGeometry::new(3, 4, 5));
        assert_eq!(params(3, 1, 2).output_geometry().unwrap(), MapGeometry::new(3, 3, 4));
        assert!(params(9, 0, 1).validate().is_err());
        assert!(params(3, 0, 0).validate().is_err());
    }

    #[test]
    fn rejects_wrong_weight_lengths() {
        let p = params(3, 0, 1);
        let err = ConvLayer::new(p, ArithMode::Float, ConvStrategy::Scalar, &[0.0; 5], &[0.0; 3])
            .unwrap_err();
        assert!(matches!(err, CnnError::InvalidConfig { .. }));
    }

    #[test]
    fn extended_kernel_follows_strategy() {
        let p = params(3, 0, 1);
        let (k, b) = weights(&p);
        let mut conv = ConvLayer::new(p, ArithMode::Fixed, ConvStrategy::Scalar, &k, &b).unwrap();
        assert!(conv.extended_kernel().is_none());

        conv.set_strategy(ConvStrategy::Vector).unwrap();
        let ext = conv.extended_kernel().unwrap();
        assert_eq!(ext.block_width(), 5);
        assert_eq!(ext.get(1, 4, 2, 3), conv.kernel_fixed()[(2 * 2 + 1) * 9 + 4]);

        conv.set_block_width(2).unwrap();
        assert_eq!(conv.extended_kernel().unwrap().block_width(), 2);
        assert!(conv.set_block_width(6).is_err());
    }

    #[test]
    fn scalar_and_vector_agree_with_padding_and_stride() {
        let mut coproc = SoftwareBackend::simulator().unwrap();
        let p = params(3, 1, 2);
        let (k, b) = weights(&p);
        let geometry = p.input_geometry();
        let frac = p.map_frac_bits;
        let input: Vec<i32> = (0..geometry.len())
            .map(|v| codec::quantize_value(((v * 13 % 17) as f32 - 8.0) / 4.0, frac))
            .collect();
        let view = MapRef::Fixed { data: &input, frac_bits: frac };

        let mut scalar = ConvLayer::new(p, ArithMode::Fixed, ConvStrategy::Scalar, &k, &b).unwrap();
        scalar.compute(view, geometry, &mut coproc).unwrap();

        let mut vector = ConvLayer::new(p, ArithMode::Fixed, ConvStrategy::Vector, &k, &b).unwrap();
        vector.set_block_width(3).unwrap();
        let out = vector.compute(view, geometry, &mut coproc).unwrap();

        assert_eq!(out.encoding, Encoding::Fixed(frac));
        assert_eq!(scalar.output().fixed(), vector.output().fixed());
        assert!(coproc.stats().instructions > 0);
    }

    #[test]
    fn saturated_accumulators_agree_across_strategies() {
        let cfg = mxp_driver::CoprocConfig {
            frac: mxp_driver::FracWidths { word: 30, half: 15, byte: 4 },
            ..mxp_driver::CoprocConfig::SIMULATOR
        };
        let mut coproc = SoftwareBackend::init(cfg).unwrap();
        let q30 = FracBits::new(30).unwrap();
        let p = ConvParams {
            in_maps: 1,
            out_maps: 1,
            map_height: 3,
            map_width: 3,
            kernel_size: 3,
            pad: 0,
            stride: 1,
            map_frac_bits: q30,
            kernel_frac_bits: q30,
        };
        let input = vec![codec::quantize_value(1.5, q30); 9];
        let view = MapRef::Fixed { data: &input, frac_bits: q30 };

        for strategy in [ConvStrategy::Scalar, ConvStrategy::Vector] {
            let mut conv = ConvLayer::new(p, ArithMode::Fixed, strategy, &[1.5; 9], &[0.0]).unwrap();
            conv.compute(view, p.input_geometry(), &mut coproc).unwrap();
            assert_eq!(conv.output().fixed(), &[i32::MAX], "{strategy}");
        }
    }

    #[test]
    fn only_the_mode_encoding_is_written() {
        let mut coproc = SoftwareBackend::simulator().unwrap();
        let p = params(3, 0, 1);
        let (k, b) = weights(&p);
        let input = vec![0.5f32; p.input_geometry().len()];
        let mut conv = ConvLayer::new(p, ArithMode::Float, ConvStrategy::Scalar, &k, &b).unwrap();
        conv.compute(MapRef::Float(&input), p.input_geometry(), &mut coproc).unwrap();
        assert!(conv.output().float().iter().any(|&v| v != 0.0));
        assert!(conv.output().fixed().iter().all(|&v| v == 0));
    }

    #[test]
    fn interleaved_layout_is_unsupported() {
        let mut coproc = SoftwareBackend::simulator().unwrap();
        let p = params(3, 0, 1);
        let (k, b) = weights(&p);
        let input = vec![0.0f32; p.padded_geometry().len()];
        let mut conv = ConvLayer::new(p, ArithMode::Float, ConvStrategy::Scalar, &k, &b).unwrap();
        let err = conv
            .compute_padded(MapRef::Float(&input), MapLayout::Interleaved, &mut coproc)
            .unwrap_err();
        assert!(matches!(err, CnnError::UnsupportedFeature { .. }));
    }

    #[test]
    fn wrong_input_geometry_is_reported() {
        let mut coproc = SoftwareBackend::simulator().unwrap();
        let p = params(3, 0, 1);
        let (k, b) = weights(&p);
        let mut conv = ConvLayer::new(p, ArithMode::Float, ConvStrategy::Scalar, &k, &b).unwrap();
        let wrong = MapGeometry::new(2, 7, 6);
        let input = vec![0.0f32; wrong.len()];
        let err = conv.compute(MapRef::Float(&input), wrong, &mut coproc).unwrap_err();
        assert!(matches!(err, CnnError::GeometryMismatch { .. }));
    }

    #[test]
    fn oversized_tile_is_rejected() {
        let cfg = mxp_driver::CoprocConfig {
            scratchpad_kb: 1,
            ..mxp_driver::CoprocConfig::SIMULATOR
        };
        let mut coproc = SoftwareBackend::init(cfg).unwrap();
        let mut p = params(1, 0, 1);
        p.out_maps = 40;
        p.map_width = 16;
        let (k, b) = weights(&p);
        let input = vec![0; p.input_geometry().len()];
        let mut conv = ConvLayer::new(p, ArithMode::Fixed, ConvStrategy::Vector, &k, &b).unwrap();
        let err = conv
            .compute(
                MapRef::Fixed { data: &input, frac_bits: p.map_frac_bits },
                p.input_geometry(),
                &mut coproc,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CnnError::Coprocessor { source: mxp_driver::MxpError::ScratchpadOverflow { .. } }
        ));
    }
}
