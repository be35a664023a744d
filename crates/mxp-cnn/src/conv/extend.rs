//! Extended kernel layout for the vector strategy
//!
//! The vector unit multiplies whole rows of a block at once, so every
//! fixed-point kernel coefficient is replicated `block_width` times. One
//! table row exists per `(input map, tap)` pair and holds `out_maps`
//! consecutive runs of `block_width` identical coefficients:
//!
//! ```text
//! table(i, tap)[o * block_width + j] == kernel[o][i][tap]   for every j
//! ```

use crate::buffers::alloc_zeroed;
use crate::error::{CnnError, Result};

/// Replicated fixed-point kernel, indexed by `(input map, tap)`
#[derive(Debug, Clone)]
pub struct ExtendedKernel {
    in_maps: usize,
    out_maps: usize,
    taps: usize,
    block_width: usize,
    table: Vec<i32>,
}

impl ExtendedKernel {
    /// Build the table from a fixed kernel laid out `out × in × K × K`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the kernel length does not match the
    /// dimensions or `block_width` is zero, and `AllocationFailed` if the
    /// table cannot be allocated.
    pub fn build(
        kernel: &[i32],
        in_maps: usize,
        out_maps: usize,
        kernel_size: usize,
        block_width: usize,
    ) -> Result<Self> {
        let taps = kernel_size * kernel_size;
        if kernel.len() != out_maps * in_maps * taps {
            return Err(CnnError::invalid_config(format!(
                "kernel holds {} coefficients, {out_maps}x{in_maps}x{kernel_size}x{kernel_size} expected",
                kernel.len()
            )));
        }
        if block_width == 0 {
            return Err(CnnError::invalid_config("block width must be non-zero"));
        }

        let row = out_maps * block_width;
        let mut table = alloc_zeroed(in_maps * taps * row)?;
        for (idx, dst) in table.chunks_exact_mut(row).enumerate() {
            let (i, tap) = (idx / taps, idx % taps);
            for (o, run) in dst.chunks_exact_mut(block_width).enumerate() {
                run.fill(kernel[(o * in_maps + i) * taps + tap]);
            }
        }

        Ok(Self {
            in_maps,
            out_maps,
            taps,
            block_width,
            table,
        })
    }

    /// Columns per block
    pub const fn block_width(&self) -> usize {
        self.block_width
    }

    /// Number of input maps
    pub const fn in_maps(&self) -> usize {
        self.in_maps
    }

    /// Number of output maps
    pub const fn out_maps(&self) -> usize {
        self.out_maps
    }

    /// Taps per kernel plane (`K * K`)
    pub const fn taps_per_map(&self) -> usize {
        self.taps
    }

    /// Table row for `(i, tap)`: `out_maps * block_width` coefficients
    pub fn taps(&self, i: usize, tap: usize) -> &[i32] {
        let row = self.out_maps * self.block_width;
        let start = (i * self.taps + tap) * row;
        &self.table[start..start + row]
    }

    /// Replicated weights of output map `o` for `(i, tap)`
    pub fn weights(&self, i: usize, tap: usize, o: usize) -> &[i32] {
        let run = &self.taps(i, tap)[o * self.block_width..];
        &run[..self.block_width]
    }

    /// Single entry `[o, j]` of table `(i, tap)`
    pub fn get(&self, i: usize, tap: usize, o: usize, j: usize) -> i32 {
        self.taps(i, tap)[o * self.block_width + j]
    }

    /// Size of the table in bytes
    pub fn size_bytes(&self) -> usize {
        self.table.len() * std::mem::size_of::<i32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entry_matches_kernel() {
        let (n_in, n_out, k, bw) = (3, 4, 3, 5);
        let kernel: Vec<i32> = (0..n_out * n_in * k * k).map(|v| v as i32 - 50).collect();
        let ext = ExtendedKernel::build(&kernel, n_in, n_out, k, bw).unwrap();

        for i in 0..n_in {
            for tap in 0..k * k {
                for o in 0..n_out {
                    for j in 0..bw {
                        assert_eq!(ext.get(i, tap, o, j), kernel[(o * n_in + i) * k * k + tap]);
                    }
                }
            }
        }
        assert_eq!(ext.size_bytes(), n_in * k * k * n_out * bw * 4);
    }

    #[test]
    fn weights_slice_is_one_run() {
        let kernel = vec![1, 2, 3, 4, 5, 6, 7, 8];
        // 2 out, 1 in, K=2
        let ext = ExtendedKernel::build(&kernel, 1, 2, 2, 3).unwrap();
        assert_eq!(ext.weights(0, 1, 0), &[2, 2, 2]);
        assert_eq!(ext.weights(0, 1, 1), &[6, 6, 6]);
        assert_eq!(ext.taps(0, 3), &[4, 4, 4, 8, 8, 8]);
    }

    #[test]
    fn rejects_bad_dimensions() {
        assert!(ExtendedKernel::build(&[1, 2, 3], 1, 1, 2, 4).is_err());
        assert!(ExtendedKernel::build(&[1, 2, 3, 4], 1, 1, 2, 0).is_err());
    }
}
