//! Vector-coprocessor convolution
//!
//! Each output row is cut into blocks of `block_width` columns. For every
//! `(input map, tap)` pair the block's shifted input columns are gathered
//! once into lane scratch, then one multiply-accumulate per output map runs
//! against that map's replicated weights from the extended kernel. Lanes
//! past the end of a partial block see zero inputs and are discarded.

use super::extend::ExtendedKernel;
use super::scalar::finish_fixed;
use super::ConvParams;
use crate::buffers::alloc_zeroed;
use crate::error::Result;
use crate::shapes::MapGeometry;
use mxp_driver::VectorBackend;

/// Lane scratch reused across blocks
#[derive(Debug, Clone, Default)]
pub(crate) struct LaneScratch {
    inputs: Vec<i32>,
    acc: Vec<i64>,
}

impl LaneScratch {
    /// Scratch for `out_maps` accumulator runs of `block_width` lanes
    pub(crate) fn allocate(out_maps: usize, block_width: usize) -> Result<Self> {
        Ok(Self {
            inputs: alloc_zeroed(block_width)?,
            acc: alloc_zeroed(out_maps * block_width)?,
        })
    }
}

/// Bytes one block occupies on the coprocessor: extended-kernel row,
/// gathered inputs and accumulators
pub(crate) const fn tile_bytes(out_maps: usize, block_width: usize) -> usize {
    out_maps * block_width * (4 + 8) + block_width * 4
}

/// Fixed-point convolution of a padded input through `coproc`
#[allow(clippy::too_many_arguments)]
pub(crate) fn conv_vector(
    p: &ConvParams,
    out: MapGeometry,
    ext: &ExtendedKernel,
    input: &[i32],
    bias: &[i32],
    output: &mut [i32],
    scratch: &mut LaneScratch,
    coproc: &mut dyn VectorBackend,
) -> Result<()> {
    let padded = p.padded_geometry();
    let (ph, pw) = (padded.height, padded.width);
    let k = p.kernel_size;
    let bw = ext.block_width();
    let shift = p.kernel_frac_bits.get();

    // Longest vector one instruction may take.
    let caps = coproc.capabilities();
    let max_len = (caps.lanes() * caps.config.max_masked_waves as usize).max(1);

    for r in 0..out.height {
        for c0 in (0..out.width).step_by(bw) {
            let valid = bw.min(out.width - c0);
            scratch.acc.fill(0);

            for i in 0..p.in_maps {
                let plane = &input[i * ph * pw..(i + 1) * ph * pw];
                for kr in 0..k {
                    let row = &plane[(r * p.stride + kr) * pw..][..pw];
                    for kc in 0..k {
                        for (j, lane) in scratch.inputs.iter_mut().enumerate() {
                            *lane = if j < valid {
                                row[(c0 + j) * p.stride + kc]
                            } else {
                                0
                            };
                        }

                        let tap = kr * k + kc;
                        for o in 0..p.out_maps {
                            let weights = ext.weights(i, tap, o);
                            let acc = &mut scratch.acc[o * bw..(o + 1) * bw];
                            for start in (0..bw).step_by(max_len) {
                                let end = (start + max_len).min(bw);
                                coproc.vmac(
                                    &mut acc[start..end],
                                    &weights[start..end],
                                    &scratch.inputs[start..end],
                                )?;
                            }
                        }
                    }
                }
            }

            for o in 0..p.out_maps {
                let dst = &mut output[o * out.plane_len() + r * out.width + c0..][..valid];
                let acc = &scratch.acc[o * bw..o * bw + valid];
                for (d, &a) in dst.iter_mut().zip(acc) {
                    *d = finish_fixed(a, shift, bias[o]);
                }
            }
        }
    }
    Ok(())
}
