//! Static model configuration and the layer context store
//!
//! A [`ModelConfig`] describes the network: input geometry, the encoding
//! the input arrives in, and an ordered list of [`LayerSpec`]s. Building a
//! [`Network`] from it propagates geometry through every layer and
//! allocates every buffer up front; running it afterwards allocates no
//! feature-map memory.

use crate::buffers::{ArithMode, Encoding, MapBuffers};
use crate::codec::FracBits;
use crate::conv::{ConvLayer, ConvParams, ConvStrategy};
use crate::error::{CnnError, Result};
use crate::layers::{
    ActivationFn, ActivationLayer, InnerProductLayer, InnerProductParams, LayerNode, PoolLayer,
    PoolParams, SoftmaxLayer,
};
use crate::shapes::MapGeometry;
use tracing::{debug, info, warn};

/// Convolution layer description
///
/// Input maps and size come from the previous stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvSpec {
    /// Output maps
    pub out_maps: usize,
    /// Kernel side `K`
    pub kernel_size: usize,
    /// Zero padding
    pub pad: usize,
    /// Stride
    pub stride: usize,
    /// Fractional bits of the maps
    pub map_frac_bits: FracBits,
    /// Fractional bits of the kernel
    pub kernel_frac_bits: FracBits,
    /// Arithmetic mode
    pub mode: ArithMode,
    /// Execution strategy
    pub strategy: ConvStrategy,
    /// Vector block width, output width if `None`
    pub block_width: Option<usize>,
    /// Float kernel, `out × in × K × K`
    pub kernel: Vec<f32>,
    /// Float bias, one per output map
    pub bias: Vec<f32>,
}

impl ConvSpec {
    /// Float scalar convolution, stride 1, no padding, Q16 maps and kernel
    pub fn new(out_maps: usize, kernel_size: usize, kernel: Vec<f32>, bias: Vec<f32>) -> Self {
        Self {
            out_maps,
            kernel_size,
            pad: 0,
            stride: 1,
            map_frac_bits: FracBits::default(),
            kernel_frac_bits: FracBits::default(),
            mode: ArithMode::Float,
            strategy: ConvStrategy::Scalar,
            block_width: None,
            kernel,
            bias,
        }
    }

    /// Set padding
    #[must_use]
    pub fn with_pad(mut self, pad: usize) -> Self {
        self.pad = pad;
        self
    }

    /// Set stride
    #[must_use]
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Set map and kernel fractional bits
    #[must_use]
    pub fn with_frac_bits(mut self, map: FracBits, kernel: FracBits) -> Self {
        self.map_frac_bits = map;
        self.kernel_frac_bits = kernel;
        self
    }

    /// Set arithmetic mode
    #[must_use]
    pub fn with_mode(mut self, mode: ArithMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set execution strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: ConvStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set vector block width
    #[must_use]
    pub fn with_block_width(mut self, block_width: usize) -> Self {
        self.block_width = Some(block_width);
        self
    }
}

/// Fully connected layer description
#[derive(Debug, Clone, PartialEq)]
pub struct InnerProductSpec {
    /// Output count
    pub outputs: usize,
    /// Fractional bits of the maps
    pub map_frac_bits: FracBits,
    /// Fractional bits of the weights
    pub weight_frac_bits: FracBits,
    /// Arithmetic mode
    pub mode: ArithMode,
    /// Float weights, `outputs × inputs`
    pub weights: Vec<f32>,
    /// Float bias
    pub bias: Vec<f32>,
}

impl InnerProductSpec {
    /// Float fully connected layer with Q16 formats
    pub fn new(outputs: usize, weights: Vec<f32>, bias: Vec<f32>) -> Self {
        Self {
            outputs,
            map_frac_bits: FracBits::default(),
            weight_frac_bits: FracBits::default(),
            mode: ArithMode::Float,
            weights,
            bias,
        }
    }

    /// Set map and weight fractional bits
    #[must_use]
    pub fn with_frac_bits(mut self, map: FracBits, weight: FracBits) -> Self {
        self.map_frac_bits = map;
        self.weight_frac_bits = weight;
        self
    }

    /// Set arithmetic mode
    #[must_use]
    pub fn with_mode(mut self, mode: ArithMode) -> Self {
        self.mode = mode;
        self
    }
}

/// One entry of the layer list
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSpec {
    /// Convolution
    Conv(ConvSpec),
    /// Pooling
    Pool {
        /// Window parameters
        params: PoolParams,
        /// Arithmetic mode
        mode: ArithMode,
    },
    /// Activation
    Activation {
        /// Function
        func: ActivationFn,
        /// Arithmetic mode
        mode: ArithMode,
    },
    /// Fully connected
    InnerProduct(InnerProductSpec),
    /// Softmax (always float)
    Softmax,
    /// Kind the engine does not implement
    Unknown {
        /// Kind tag as written in the configuration
        tag: String,
    },
}

impl LayerSpec {
    /// Pooling entry
    pub const fn pool(params: PoolParams, mode: ArithMode) -> Self {
        Self::Pool { params, mode }
    }

    /// Activation entry
    pub const fn activation(func: ActivationFn, mode: ArithMode) -> Self {
        Self::Activation { func, mode }
    }

    /// Entry for an unrecognized kind
    pub fn unknown(tag: impl Into<String>) -> Self {
        Self::Unknown { tag: tag.into() }
    }

    /// Kind tag of the entry
    pub fn tag(&self) -> &str {
        match self {
            Self::Conv(_) => "conv",
            Self::Pool { .. } => "pool",
            Self::Activation { .. } => "act",
            Self::InnerProduct(_) => "ip",
            Self::Softmax => "softmax",
            Self::Unknown { tag } => tag,
        }
    }
}

impl From<ConvSpec> for LayerSpec {
    fn from(spec: ConvSpec) -> Self {
        Self::Conv(spec)
    }
}

impl From<InnerProductSpec> for LayerSpec {
    fn from(spec: InnerProductSpec) -> Self {
        Self::InnerProduct(spec)
    }
}

/// Static description of a network
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Model name
    pub name: String,
    /// Geometry of the input maps
    pub input: MapGeometry,
    /// Encoding the input stage is loaded in
    pub initial_encoding: Encoding,
    /// Layers in execution order
    pub layers: Vec<LayerSpec>,
}

impl ModelConfig {
    /// Empty model over `input`, loaded as float
    pub fn new(input: MapGeometry) -> Self {
        Self {
            name: "model".into(),
            input,
            initial_encoding: Encoding::Float,
            layers: Vec::new(),
        }
    }

    /// Set model name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the encoding of the input stage
    #[must_use]
    pub fn with_initial_encoding(mut self, encoding: Encoding) -> Self {
        self.initial_encoding = encoding;
        self
    }

    /// Append a layer
    #[must_use]
    pub fn with_layer(mut self, layer: impl Into<LayerSpec>) -> Self {
        self.layers.push(layer.into());
        self
    }
}

/// Built network: input stage plus one context per layer
#[derive(Debug)]
pub struct Network {
    pub(crate) name: String,
    pub(crate) input_geometry: MapGeometry,
    pub(crate) initial_encoding: Encoding,
    pub(crate) initial_frac: FracBits,
    pub(crate) input: MapBuffers,
    pub(crate) layers: Vec<LayerNode>,
}

impl Network {
    /// Allocate every context and buffer of `config`
    ///
    /// Geometry is propagated layer by layer; an unrecognized kind is kept
    /// as [`LayerNode::Unknown`] and passes geometry through unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a layer does not fit its input or its
    /// weights have the wrong length, and `AllocationFailed` if a buffer
    /// cannot be allocated.
    pub fn build(config: &ModelConfig) -> Result<Self> {
        if config.input.is_empty() {
            return Err(CnnError::invalid_config(format!(
                "input geometry {} holds no samples",
                config.input
            )));
        }

        let input = MapBuffers::allocate(config.input.len())?;
        let mut layers = Vec::with_capacity(config.layers.len());
        let mut geometry = config.input;
        for (index, spec) in config.layers.iter().enumerate() {
            let node = build_node(spec, geometry).map_err(|e| at_layer(index, e))?;
            if let Some(layer) = node.as_layer() {
                debug!(
                    "layer {index} ({}): {} -> {}",
                    layer.kind(),
                    layer.input_geometry(),
                    layer.output_geometry()
                );
                geometry = layer.output_geometry();
            } else {
                warn!("layer {index}: unrecognized kind '{}', a run will stop here", spec.tag());
            }
            layers.push(node);
        }

        // Fixed frac-agnostic layers ahead of any frac-owning layer run at
        // the input's bits, or failing that the first layer's own.
        let initial_frac = config
            .initial_encoding
            .frac_bits()
            .or_else(|| {
                layers
                    .iter()
                    .filter_map(LayerNode::as_layer)
                    .find_map(|layer| layer.input_frac_bits())
            })
            .unwrap_or_default();

        info!(
            "Built network '{}': {} layers, {} -> {}",
            config.name,
            layers.len(),
            config.input,
            geometry
        );

        Ok(Self {
            name: config.name.clone(),
            input_geometry: config.input,
            initial_encoding: config.initial_encoding,
            initial_frac,
            input,
            layers,
        })
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input geometry
    pub const fn input_geometry(&self) -> MapGeometry {
        self.input_geometry
    }

    /// Encoding of the input stage
    pub const fn initial_encoding(&self) -> Encoding {
        self.initial_encoding
    }

    /// Geometry after the last recognized layer
    pub fn output_geometry(&self) -> MapGeometry {
        self.layers
            .iter()
            .rev()
            .find_map(LayerNode::as_layer)
            .map_or(self.input_geometry, |layer| layer.output_geometry())
    }

    /// Layer contexts in execution order
    pub fn layers(&self) -> &[LayerNode] {
        &self.layers
    }

    /// Layer context at `index`
    pub fn layer(&self, index: usize) -> Option<&LayerNode> {
        self.layers.get(index)
    }

    /// Mutable layer context at `index`
    pub fn layer_mut(&mut self, index: usize) -> Option<&mut LayerNode> {
        self.layers.get_mut(index)
    }

    /// Convolution context at `index`, if that layer is one
    pub fn conv_mut(&mut self, index: usize) -> Option<&mut ConvLayer> {
        match self.layers.get_mut(index) {
            Some(LayerNode::Conv(conv)) => Some(conv),
            _ => None,
        }
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the network has no layers
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Input stage buffers
    pub fn input(&self) -> &MapBuffers {
        &self.input
    }
}

fn build_node(spec: &LayerSpec, geometry: MapGeometry) -> Result<LayerNode> {
    Ok(match spec {
        LayerSpec::Conv(c) => {
            let params = ConvParams {
                in_maps: geometry.maps,
                out_maps: c.out_maps,
                map_height: geometry.height,
                map_width: geometry.width,
                kernel_size: c.kernel_size,
                pad: c.pad,
                stride: c.stride,
                map_frac_bits: c.map_frac_bits,
                kernel_frac_bits: c.kernel_frac_bits,
            };
            let mut conv = ConvLayer::new(params, c.mode, c.strategy, &c.kernel, &c.bias)?;
            if let Some(bw) = c.block_width {
                conv.set_block_width(bw)?;
            }
            LayerNode::Conv(conv)
        }
        LayerSpec::Pool { params, mode } => {
            LayerNode::Pool(PoolLayer::new(*params, *mode, geometry)?)
        }
        LayerSpec::Activation { func, mode } => {
            LayerNode::Activation(ActivationLayer::new(*func, *mode, geometry)?)
        }
        LayerSpec::InnerProduct(ip) => {
            let params = InnerProductParams {
                outputs: ip.outputs,
                map_frac_bits: ip.map_frac_bits,
                weight_frac_bits: ip.weight_frac_bits,
            };
            LayerNode::InnerProduct(InnerProductLayer::new(
                params, ip.mode, geometry, &ip.weights, &ip.bias,
            )?)
        }
        LayerSpec::Softmax => LayerNode::Softmax(SoftmaxLayer::new(geometry)?),
        LayerSpec::Unknown { tag } => LayerNode::Unknown(tag.clone()),
    })
}

fn at_layer(index: usize, err: CnnError) -> CnnError {
    match err {
        CnnError::InvalidConfig { reason } => {
            CnnError::invalid_config(format!("layer {index}: {reason}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(out_maps: usize, in_maps: usize, k: usize) -> ConvSpec {
        ConvSpec::new(
            out_maps,
            k,
            vec![0.1; out_maps * in_maps * k * k],
            vec![0.0; out_maps],
        )
    }

    #[test]
    fn geometry_propagates_through_every_kind() {
        let cfg = ModelConfig::new(MapGeometry::new(1, 12, 12))
            .with_layer(conv(4, 1, 3))
            .with_layer(LayerSpec::pool(PoolParams::max(2), ArithMode::Float))
            .with_layer(LayerSpec::activation(ActivationFn::Relu, ArithMode::Float))
            .with_layer(InnerProductSpec::new(3, vec![0.0; 3 * 4 * 5 * 5], vec![0.0; 3]))
            .with_layer(LayerSpec::Softmax);
        let net = Network::build(&cfg).unwrap();

        let shapes: Vec<MapGeometry> = net
            .layers()
            .iter()
            .map(|n| n.as_layer().unwrap().output_geometry())
            .collect();
        assert_eq!(
            shapes,
            vec![
                MapGeometry::new(4, 10, 10),
                MapGeometry::new(4, 5, 5),
                MapGeometry::new(4, 5, 5),
                MapGeometry::new(1, 1, 3),
                MapGeometry::new(1, 1, 3),
            ]
        );
        assert_eq!(net.output_geometry(), MapGeometry::new(1, 1, 3));
    }

    #[test]
    fn weight_mismatch_names_the_layer() {
        let cfg = ModelConfig::new(MapGeometry::new(2, 8, 8)).with_layer(conv(4, 1, 3));
        let err = Network::build(&cfg).unwrap_err();
        match err {
            CnnError::InvalidConfig { reason } => assert!(reason.starts_with("layer 0:")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn window_larger_than_input_is_rejected() {
        let cfg = ModelConfig::new(MapGeometry::new(1, 4, 4)).with_layer(conv(1, 1, 5));
        assert!(matches!(
            Network::build(&cfg),
            Err(CnnError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_kept() {
        let cfg = ModelConfig::new(MapGeometry::new(1, 6, 6))
            .with_layer(LayerSpec::unknown("lrn"))
            .with_layer(conv(2, 1, 3));
        let net = Network::build(&cfg).unwrap();
        assert!(matches!(net.layer(0), Some(LayerNode::Unknown(tag)) if tag == "lrn"));
        assert_eq!(net.output_geometry(), MapGeometry::new(2, 4, 4));
    }

    #[test]
    fn initial_frac_falls_back_to_first_owner() {
        let q = |b| FracBits::new(b).unwrap();
        let cfg = ModelConfig::new(MapGeometry::new(1, 6, 6))
            .with_layer(LayerSpec::activation(ActivationFn::Relu, ArithMode::Fixed))
            .with_layer(conv(2, 1, 3).with_frac_bits(q(11), q(9)));
        assert_eq!(Network::build(&cfg).unwrap().initial_frac, q(11));

        let cfg = cfg.with_initial_encoding(Encoding::Fixed(q(7)));
        assert_eq!(Network::build(&cfg).unwrap().initial_frac, q(7));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(Network::build(&ModelConfig::new(MapGeometry::new(0, 4, 4))).is_err());
    }
}
