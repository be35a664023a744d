//! Pipeline orchestrator
//!
//! Walks the layer list in order. Before each layer the live buffers are
//! brought into the encoding that layer computes in, converting in place
//! inside whichever slot holds them (the input stage or the previous
//! layer's output). The orchestrator owns no feature-map memory; it only
//! tracks which slot is live, its geometry and its encoding.

use crate::buffers::{ArithMode, Encoding, MapBuffers};
use crate::codec::{self, FracBits};
use crate::error::{CnnError, Result};
use crate::image::RawImage;
use crate::model::Network;
use crate::shapes::MapGeometry;
use mxp_driver::VectorBackend;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Slot holding the live feature maps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Network input stage
    Input,
    /// Output of the layer at this index
    Layer(usize),
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Layer(i) => write!(f, "layer {i}"),
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Final maps, dequantized if the last stage was fixed
    pub output: Vec<f32>,
    /// Geometry of `output`
    pub geometry: MapGeometry,
    /// Layers that computed
    pub layers_executed: usize,
    /// In-place encoding conversions performed
    pub conversions: usize,
    /// Wall time of the layer loop
    pub elapsed: Duration,
}

impl RunReport {
    /// Index of the largest output
    pub fn top_class(&self) -> Option<usize> {
        self.top_k(1).first().map(|&(i, _)| i)
    }

    /// The `k` largest outputs, highest first
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.output.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}

/// Live-stage bookkeeping
#[derive(Debug, Clone, Copy)]
struct LiveState {
    slot: Slot,
    geometry: MapGeometry,
    encoding: Encoding,
    fixed_frac: FracBits,
}

/// Runs a [`Network`] layer by layer
#[derive(Debug, Default)]
pub struct Pipeline {
    layers_executed: usize,
    conversions: usize,
}

impl Pipeline {
    /// Create a pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers that computed in the most recent run, including a failed one
    pub const fn layers_executed(&self) -> usize {
        self.layers_executed
    }

    /// Conversions performed in the most recent run
    pub const fn conversions(&self) -> usize {
        self.conversions
    }

    /// Run `net` on float input maps of `geometry`
    ///
    /// The input is loaded into the input stage in the network's initial
    /// encoding (quantized if that encoding is fixed).
    ///
    /// # Errors
    ///
    /// Returns `GeometryMismatch` if `geometry` differs from the network's
    /// input, `UnsupportedLayer` when an unrecognized kind is reached (no
    /// later layer runs), or the first error of any layer.
    pub fn run(
        &mut self,
        net: &mut Network,
        coproc: &mut dyn VectorBackend,
        input: &[f32],
        geometry: MapGeometry,
    ) -> Result<RunReport> {
        self.layers_executed = 0;
        self.conversions = 0;

        if geometry != net.input_geometry {
            return Err(CnnError::geometry_mismatch(
                "network input",
                net.input_geometry,
                geometry,
            ));
        }
        if input.len() != geometry.len() {
            return Err(CnnError::invalid_config(format!(
                "input holds {} samples, {geometry} needs {}",
                input.len(),
                geometry.len()
            )));
        }

        let len = geometry.len();
        net.input.float_mut()[..len].copy_from_slice(input);
        if let Encoding::Fixed(frac) = net.initial_encoding {
            codec::quantize(input, frac, &mut net.input.fixed_mut()[..len]);
        }

        let mut state = LiveState {
            slot: Slot::Input,
            geometry,
            encoding: net.initial_encoding,
            fixed_frac: net.initial_frac,
        };

        info!(
            "Running '{}': {} layers on {} ({})",
            net.name,
            net.layers.len(),
            geometry,
            state.encoding
        );
        let start = Instant::now();

        for index in 0..net.layers.len() {
            let (done, rest) = net.layers.split_at_mut(index);
            let layer = rest[0].resolve_mut(index)?;
            let live: &mut MapBuffers = match done.last_mut() {
                None => &mut net.input,
                Some(prev) => prev.resolve_mut(index - 1)?.output_mut(),
            };

            let required = match layer.arith_mode() {
                ArithMode::Float => Encoding::Float,
                ArithMode::Fixed => {
                    Encoding::Fixed(layer.input_frac_bits().unwrap_or(state.fixed_frac))
                }
            };
            if required != state.encoding {
                debug!(
                    "layer {index}: converting {} from {} to {}",
                    state.slot, state.encoding, required
                );
                live.convert(state.encoding, required, state.geometry.len());
                self.conversions += 1;
            }

            let out = layer.compute(
                live.view(required, state.geometry.len()),
                state.geometry,
                coproc,
            )?;
            self.layers_executed += 1;
            debug!(
                "layer {index} ({}): {} -> {} ({})",
                layer.kind(),
                state.geometry,
                out.geometry,
                out.encoding
            );

            state = LiveState {
                slot: Slot::Layer(index),
                geometry: out.geometry,
                encoding: out.encoding,
                fixed_frac: out.encoding.frac_bits().unwrap_or(state.fixed_frac),
            };
        }
        let elapsed = start.elapsed();

        let live = match state.slot {
            Slot::Input => &net.input,
            Slot::Layer(i) => net.layers[i].resolve(i)?.output(),
        };
        let n = state.geometry.len();
        let output = match state.encoding {
            Encoding::Float => live.float()[..n].to_vec(),
            Encoding::Fixed(frac) => live.fixed()[..n]
                .iter()
                .map(|&q| codec::dequantize_value(q, frac))
                .collect(),
        };

        info!(
            "Run complete: {} layers, {} conversions, {:?}",
            self.layers_executed, self.conversions, elapsed
        );
        Ok(RunReport {
            output,
            geometry: state.geometry,
            layers_executed: self.layers_executed,
            conversions: self.conversions,
            elapsed,
        })
    }

    /// Normalize `image` and run `net` on it
    ///
    /// # Errors
    ///
    /// Returns `GeometryMismatch` if the image size differs from the
    /// network input, or any error of [`Pipeline::run`].
    pub fn run_image(
        &mut self,
        net: &mut Network,
        coproc: &mut dyn VectorBackend,
        image: &RawImage,
    ) -> Result<RunReport> {
        let geometry = image.geometry();
        if geometry != net.input_geometry {
            return Err(CnnError::geometry_mismatch(
                "image",
                net.input_geometry,
                geometry,
            ));
        }
        let (maps, mean, variance) = image.mean_normalize();
        debug!("image mean {mean:.3}, variance {variance:.3}");
        self.run(net, coproc, &maps, geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(output: Vec<f32>) -> RunReport {
        RunReport {
            geometry: MapGeometry::new(1, 1, output.len()),
            output,
            layers_executed: 0,
            conversions: 0,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn top_k_orders_by_score() {
        let r = report(vec![0.1, 0.5, 0.2, 0.5]);
        assert_eq!(r.top_class(), Some(1));
        assert_eq!(r.top_k(3), vec![(1, 0.5), (3, 0.5), (2, 0.2)]);
        assert_eq!(report(Vec::new()).top_class(), None);
    }

    #[test]
    fn slot_display() {
        assert_eq!(Slot::Input.to_string(), "input");
        assert_eq!(Slot::Layer(3).to_string(), "layer 3");
    }
}
