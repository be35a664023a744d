#![deny(unsafe_code)]

//! Static CNN inference with fixed/float arithmetic
//!
//! A network is a fixed list of layers (convolution, pooling, activation,
//! inner product, softmax) built once from a [`ModelConfig`]. Each layer
//! computes either in `f32` or in Q-format `i32`; the [`Pipeline`] converts
//! the live feature maps between encodings only where two adjacent layers
//! disagree. Convolutions run on the host ([`ConvStrategy::Scalar`]) or on
//! the MXP vector coprocessor ([`ConvStrategy::Vector`]) through an
//! [`mxp_driver::VectorBackend`].
//!
//! # Example
//!
//! ```
//! use mxp_cnn::prelude::*;
//! use mxp_cnn::zoo::{Xoshiro, ZooModel};
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let model = ZooModel::TinyLenet;
//! let mut net = Network::build(&model.config(42)?)?;
//! let mut coproc = select_backend(CoprocConfig::SIMULATOR)?;
//!
//! let input = Xoshiro::new(7).gen_f32(model.input().len());
//! let report = Pipeline::new().run(&mut net, coproc.as_mut(), &input, model.input())?;
//!
//! println!("class {:?} after {} layers", report.top_class(), report.layers_executed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod buffers;
pub mod codec;
pub mod conv;
mod error;
mod image;
pub mod layers;
mod model;
mod pipeline;
pub mod reference;
mod shapes;
pub mod zoo;

pub use buffers::{ArithMode, Encoding, MapBuffers, MapLayout, MapRef};
pub use codec::FracBits;
pub use conv::{ConvLayer, ConvParams, ConvStrategy, ExtendedKernel};
pub use error::{CnnError, Result, RunStatus};
pub use image::RawImage;
pub use layers::{Layer, LayerKind, LayerNode, LayerOutput};
pub use model::{ConvSpec, InnerProductSpec, LayerSpec, ModelConfig, Network};
pub use pipeline::{Pipeline, RunReport, Slot};
pub use shapes::{window_output_dim, MapGeometry};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        ArithMode, CnnError, ConvStrategy, Encoding, FracBits, LayerSpec, MapGeometry,
        ModelConfig, Network, Pipeline, Result, RunReport, RunStatus,
    };
    pub use mxp_driver::{select_backend, CoprocConfig, VectorBackend};
}
