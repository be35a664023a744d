//! Layer contexts and the uniform compute interface
//!
//! Every layer kind implements [`Layer`]; the orchestrator only ever sees a
//! [`LayerNode`] and dispatches through it. A node whose kind tag was not
//! recognized while building the network stays in the list as
//! [`LayerNode::Unknown`] and aborts the run when reached.

mod activation;
mod inner_product;
mod pool;
mod softmax;

pub use activation::{ActivationFn, ActivationLayer};
pub use inner_product::{InnerProductLayer, InnerProductParams};
pub use pool::{PoolLayer, PoolOp, PoolParams};
pub use softmax::SoftmaxLayer;

use crate::buffers::{ArithMode, Encoding, MapBuffers, MapRef};
use crate::codec::FracBits;
use crate::conv::ConvLayer;
use crate::error::{CnnError, Result};
use crate::shapes::MapGeometry;
use mxp_driver::VectorBackend;
use std::fmt::Debug;

/// Geometry and encoding of the maps a layer just produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerOutput {
    /// Output geometry
    pub geometry: MapGeometry,
    /// Encoding of the valid output buffer
    pub encoding: Encoding,
}

impl LayerOutput {
    /// Create a layer output descriptor
    pub const fn new(geometry: MapGeometry, encoding: Encoding) -> Self {
        Self { geometry, encoding }
    }
}

/// One stage of the network
pub trait Layer: Debug + Send {
    /// Layer kind
    fn kind(&self) -> LayerKind;

    /// Arithmetic the layer computes in
    fn arith_mode(&self) -> ArithMode;

    /// Fractional bits the layer requires of fixed input, if it owns them
    ///
    /// Frac-agnostic layers return `None` and take whatever the previous
    /// stage produced.
    fn input_frac_bits(&self) -> Option<FracBits> {
        None
    }

    /// Geometry the layer was built for
    fn input_geometry(&self) -> MapGeometry;

    /// Geometry the layer produces
    fn output_geometry(&self) -> MapGeometry;

    /// Compute the layer's output from `input`
    ///
    /// Only the output encoding matching the layer's mode is written.
    ///
    /// # Errors
    ///
    /// Returns `GeometryMismatch` if `geometry` is not the built input
    /// geometry, or any error of the layer's computation.
    fn compute(
        &mut self,
        input: MapRef<'_>,
        geometry: MapGeometry,
        coproc: &mut dyn VectorBackend,
    ) -> Result<LayerOutput>;

    /// Output buffers
    fn output(&self) -> &MapBuffers;

    /// Mutable output buffers, used for in-place encoding conversion
    fn output_mut(&mut self) -> &mut MapBuffers;
}

/// Layer kinds known to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Convolution
    Conv,
    /// Max or average pooling
    Pool,
    /// Element-wise activation
    Activation,
    /// Fully connected
    InnerProduct,
    /// Softmax
    Softmax,
}

impl LayerKind {
    /// All kinds
    pub const ALL: [Self; 5] = [
        Self::Conv,
        Self::Pool,
        Self::Activation,
        Self::InnerProduct,
        Self::Softmax,
    ];

    /// Parse a configuration tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "conv" | "convolution" => Some(Self::Conv),
            "pool" | "pooling" => Some(Self::Pool),
            "act" | "activation" => Some(Self::Activation),
            "ip" | "inner_product" | "fc" => Some(Self::InnerProduct),
            "softmax" => Some(Self::Softmax),
            _ => None,
        }
    }

    /// Canonical tag
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Conv => "conv",
            Self::Pool => "pool",
            Self::Activation => "act",
            Self::InnerProduct => "ip",
            Self::Softmax => "softmax",
        }
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A layer context in the network's list
#[derive(Debug)]
pub enum LayerNode {
    /// Convolution
    Conv(ConvLayer),
    /// Pooling
    Pool(PoolLayer),
    /// Activation
    Activation(ActivationLayer),
    /// Fully connected
    InnerProduct(InnerProductLayer),
    /// Softmax
    Softmax(SoftmaxLayer),
    /// Unrecognized kind tag
    Unknown(String),
}

impl LayerNode {
    /// The node as a layer, `None` for an unknown kind
    pub fn as_layer(&self) -> Option<&dyn Layer> {
        match self {
            Self::Conv(l) => Some(l),
            Self::Pool(l) => Some(l),
            Self::Activation(l) => Some(l),
            Self::InnerProduct(l) => Some(l),
            Self::Softmax(l) => Some(l),
            Self::Unknown(_) => None,
        }
    }

    /// The node as a mutable layer, `None` for an unknown kind
    pub fn as_layer_mut(&mut self) -> Option<&mut dyn Layer> {
        match self {
            Self::Conv(l) => Some(l),
            Self::Pool(l) => Some(l),
            Self::Activation(l) => Some(l),
            Self::InnerProduct(l) => Some(l),
            Self::Softmax(l) => Some(l),
            Self::Unknown(_) => None,
        }
    }

    /// The node as a layer, or the unsupported-layer error for position
    /// `index`
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedLayer` for an unknown kind.
    pub fn resolve(&self, index: usize) -> Result<&dyn Layer> {
        match self {
            Self::Unknown(tag) => Err(CnnError::UnsupportedLayer {
                index,
                tag: tag.clone(),
            }),
            other => other.as_layer().ok_or_else(|| CnnError::UnsupportedLayer {
                index,
                tag: String::new(),
            }),
        }
    }

    /// Mutable form of [`LayerNode::resolve`]
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedLayer` for an unknown kind.
    pub fn resolve_mut(&mut self, index: usize) -> Result<&mut dyn Layer> {
        match self {
            Self::Conv(l) => Ok(l),
            Self::Pool(l) => Ok(l),
            Self::Activation(l) => Ok(l),
            Self::InnerProduct(l) => Ok(l),
            Self::Softmax(l) => Ok(l),
            Self::Unknown(tag) => Err(CnnError::UnsupportedLayer {
                index,
                tag: tag.clone(),
            }),
        }
    }

    /// Kind tag of the node
    pub fn tag(&self) -> &str {
        match self {
            Self::Unknown(tag) => tag,
            other => other.as_layer().map_or("", |l| l.kind().tag()),
        }
    }
}

/// Check a layer's input against its built geometry
pub(crate) fn check_input(
    kind: LayerKind,
    expected: MapGeometry,
    geometry: MapGeometry,
    input: &MapRef<'_>,
) -> Result<()> {
    if geometry != expected {
        return Err(CnnError::geometry_mismatch(
            format!("{kind} input"),
            expected,
            geometry,
        ));
    }
    if input.len() != geometry.len() {
        return Err(CnnError::invalid_config(format!(
            "{kind} input holds {} samples, {geometry} needs {}",
            input.len(),
            geometry.len()
        )));
    }
    Ok(())
}

/// Check that `input` is in the encoding `mode` computes in
pub(crate) fn expect_mode(kind: LayerKind, mode: ArithMode, input: &MapRef<'_>) -> Result<()> {
    if input.encoding().mode() == mode {
        Ok(())
    } else {
        Err(CnnError::invalid_config(format!(
            "{mode} {kind} layer cannot read {} input",
            input.encoding()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for kind in LayerKind::ALL {
            assert_eq!(LayerKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(LayerKind::from_tag("Convolution"), Some(LayerKind::Conv));
        assert_eq!(LayerKind::from_tag("lrn"), None);
    }

    #[test]
    fn unknown_node_is_not_a_layer() {
        let node = LayerNode::Unknown("lrn".into());
        assert!(node.as_layer().is_none());
        assert_eq!(node.tag(), "lrn");
    }

    #[test]
    fn input_checks() {
        let g = MapGeometry::new(1, 2, 2);
        let data = [0.0f32; 4];
        assert!(check_input(LayerKind::Pool, g, g, &MapRef::Float(&data)).is_ok());
        assert!(matches!(
            check_input(LayerKind::Pool, g, MapGeometry::new(1, 1, 4), &MapRef::Float(&data)),
            Err(CnnError::GeometryMismatch { .. })
        ));
        assert!(check_input(LayerKind::Pool, g, g, &MapRef::Float(&data[..3])).is_err());
        assert!(expect_mode(LayerKind::Pool, ArithMode::Fixed, &MapRef::Float(&data)).is_err());
    }
}
