//! Built-in models with seeded weights
//!
//! The engine has no on-disk weight format, so these models generate their
//! parameters from a seed. They exercise every layer kind, both arithmetic
//! modes and both convolution strategies, and give the CLI something to
//! run.
//!
//! | Model | Input | Layers |
//! |-------|-------|--------|
//! | `TinyLenet` | 1×28×28 | conv(vector, fixed) → pool → relu → conv(scalar, fixed) → pool → ip(float) → softmax |
//! | `ConvStack` | 3×32×32 | conv(float) → tanh → avg pool → conv(vector, fixed, s2) → relu → ip(fixed) → softmax |

use crate::buffers::{ArithMode, Encoding};
use crate::codec::FracBits;
use crate::conv::{ConvParams, ConvStrategy};
use crate::error::Result;
use crate::layers::{ActivationFn, PoolParams};
use crate::model::{ConvSpec, InnerProductSpec, LayerSpec, ModelConfig};
use crate::shapes::MapGeometry;

/// Small deterministic xoshiro256++ generator for seeded weights and inputs
#[derive(Debug, Clone)]
pub struct Xoshiro {
    s: [u64; 4],
}

impl Xoshiro {
    /// Seeded generator
    pub fn new(seed: u64) -> Self {
        let s = [
            seed ^ 0x9e37_79b9_7f4a_7c15,
            seed.wrapping_add(0x6c62_272e_07bb_0142),
            seed.rotate_left(17),
            seed.rotate_right(5),
        ];
        let mut rng = Self { s };
        for _ in 0..20 {
            let _ = rng.next_u64();
        }
        rng
    }

    /// Next raw output
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);
        let t = self.s[1].wrapping_shl(17);
        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];
        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);
        result
    }

    /// Uniform in `[0, 1)`
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_f32(&mut self) -> f32 {
        let bits = (self.next_u64() >> 41) as u32 | 0x3f80_0000;
        f32::from_bits(bits) - 1.0
    }

    /// `len` samples uniform in `[-1, 1)`
    pub fn gen_f32(&mut self, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.next_f32() * 2.0 - 1.0).collect()
    }

    /// `len` samples uniform in `[-scale, scale)`
    pub fn gen_scaled(&mut self, len: usize, scale: f32) -> Vec<f32> {
        (0..len).map(|_| (self.next_f32() * 2.0 - 1.0) * scale).collect()
    }
}

/// Built-in models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZooModel {
    /// LeNet-sized digit classifier
    TinyLenet,
    /// Three-channel stack mixing float and fixed stages
    ConvStack,
}

impl ZooModel {
    /// All built-in models
    pub const ALL: [Self; 2] = [Self::TinyLenet, Self::ConvStack];

    /// Short name used on the command line
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TinyLenet => "tiny-lenet",
            Self::ConvStack => "conv-stack",
        }
    }

    /// Look up a model by name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Model description
    pub const fn description(&self) -> &'static str {
        match self {
            Self::TinyLenet => "LeNet-style 10-class classifier, fixed-point convolutions",
            Self::ConvStack => "RGB 10-class stack, float front end and fixed vector back end",
        }
    }

    /// Input geometry
    pub const fn input(&self) -> MapGeometry {
        match self {
            Self::TinyLenet => MapGeometry::new(1, 28, 28),
            Self::ConvStack => MapGeometry::new(3, 32, 32),
        }
    }

    /// Configuration with weights drawn from `seed`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` only if a built-in format is out of range.
    pub fn config(&self, seed: u64) -> Result<ModelConfig> {
        let mut rng = Xoshiro::new(seed);
        match self {
            Self::TinyLenet => {
                let (q12, q14) = (FracBits::new(12)?, FracBits::new(14)?);
                Ok(ModelConfig::new(self.input())
                    .with_name(self.name())
                    .with_initial_encoding(Encoding::Fixed(q12))
                    .with_layer(
                        conv_spec(&mut rng, 1, 4, 5)
                            .with_frac_bits(q12, q14)
                            .with_mode(ArithMode::Fixed)
                            .with_strategy(ConvStrategy::Vector),
                    )
                    .with_layer(LayerSpec::pool(PoolParams::max(2), ArithMode::Fixed))
                    .with_layer(LayerSpec::activation(ActivationFn::Relu, ArithMode::Fixed))
                    .with_layer(
                        conv_spec(&mut rng, 4, 8, 3)
                            .with_pad(1)
                            .with_frac_bits(q12, q14)
                            .with_mode(ArithMode::Fixed),
                    )
                    .with_layer(LayerSpec::pool(PoolParams::max(2), ArithMode::Fixed))
                    .with_layer(ip_spec(&mut rng, 8 * 6 * 6, 10))
                    .with_layer(LayerSpec::Softmax))
            }
            Self::ConvStack => {
                let (q10, q12) = (FracBits::new(10)?, FracBits::new(12)?);
                Ok(ModelConfig::new(self.input())
                    .with_name(self.name())
                    .with_layer(conv_spec(&mut rng, 3, 8, 3).with_pad(1))
                    .with_layer(LayerSpec::activation(ActivationFn::Tanh, ArithMode::Float))
                    .with_layer(LayerSpec::pool(PoolParams::average(2), ArithMode::Float))
                    .with_layer(
                        conv_spec(&mut rng, 8, 16, 3)
                            .with_stride(2)
                            .with_frac_bits(q10, q12)
                            .with_mode(ArithMode::Fixed)
                            .with_strategy(ConvStrategy::Vector),
                    )
                    .with_layer(LayerSpec::activation(ActivationFn::Relu, ArithMode::Fixed))
                    .with_layer(
                        ip_spec(&mut rng, 16 * 7 * 7, 10)
                            .with_frac_bits(q10, q12)
                            .with_mode(ArithMode::Fixed),
                    )
                    .with_layer(LayerSpec::Softmax))
            }
        }
    }
}

impl std::fmt::Display for ZooModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[allow(clippy::cast_precision_loss)]
fn fan_in_scale(fan_in: usize) -> f32 {
    1.0 / (fan_in as f32).sqrt()
}

fn conv_spec(rng: &mut Xoshiro, in_maps: usize, out_maps: usize, k: usize) -> ConvSpec {
    let fan_in = in_maps * k * k;
    let kernel = rng.gen_scaled(out_maps * fan_in, fan_in_scale(fan_in));
    let bias = rng.gen_scaled(out_maps, 0.1);
    ConvSpec::new(out_maps, k, kernel, bias)
}

fn ip_spec(rng: &mut Xoshiro, inputs: usize, outputs: usize) -> InnerProductSpec {
    let weights = rng.gen_scaled(outputs * inputs, fan_in_scale(inputs));
    let bias = rng.gen_scaled(outputs, 0.1);
    InnerProductSpec::new(outputs, weights, bias)
}

/// Single-convolution check case: 3 → 10 maps over 9×9, `K = 3`, stride 1,
/// no padding, Q12 maps and kernel
#[derive(Debug, Clone)]
pub struct ConvCase {
    /// Shape and formats
    pub params: ConvParams,
    /// Float input, `3 × 9 × 9`
    pub input: Vec<f32>,
    /// Float kernel, `10 × 3 × 3 × 3`
    pub kernel: Vec<f32>,
    /// Float bias
    pub bias: Vec<f32>,
}

impl ConvCase {
    /// Seeds of input, kernel and bias generators
    pub const SEEDS: (u64, u64, u64) = (123, 345, 321);

    /// Case drawn from the default seeds
    ///
    /// # Errors
    ///
    /// Never fails for the built-in formats; the result mirrors
    /// [`FracBits::new`].
    pub fn standard() -> Result<Self> {
        let (a, b, c) = Self::SEEDS;
        Self::with_seeds(a, b, c)
    }

    /// Case drawn from explicit seeds
    ///
    /// # Errors
    ///
    /// See [`ConvCase::standard`].
    pub fn with_seeds(input_seed: u64, kernel_seed: u64, bias_seed: u64) -> Result<Self> {
        let q12 = FracBits::new(12)?;
        let params = ConvParams {
            in_maps: 3,
            out_maps: 10,
            map_height: 9,
            map_width: 9,
            kernel_size: 3,
            pad: 0,
            stride: 1,
            map_frac_bits: q12,
            kernel_frac_bits: q12,
        };
        Ok(Self {
            input: Xoshiro::new(input_seed).gen_f32(params.input_geometry().len()),
            kernel: Xoshiro::new(kernel_seed).gen_f32(params.kernel_len()),
            bias: Xoshiro::new(bias_seed).gen_f32(params.out_maps),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Network;

    #[test]
    fn xoshiro_is_deterministic_and_bounded() {
        let a = Xoshiro::new(7).gen_f32(256);
        let b = Xoshiro::new(7).gen_f32(256);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
        assert_ne!(a, Xoshiro::new(8).gen_f32(256));
    }

    #[test]
    fn every_zoo_model_builds() {
        for model in ZooModel::ALL {
            let net = Network::build(&model.config(1).unwrap()).unwrap();
            assert_eq!(net.input_geometry(), model.input());
            assert_eq!(net.output_geometry(), MapGeometry::new(1, 1, 10));
            assert_eq!(ZooModel::from_name(model.name()), Some(model));
        }
    }

    #[test]
    fn conv_case_shape() {
        let case = ConvCase::standard().unwrap();
        assert_eq!(case.input.len(), 243);
        assert_eq!(case.kernel.len(), 270);
        assert_eq!(case.params.output_geometry().unwrap(), MapGeometry::new(10, 7, 7));
    }
}
