// SPDX-License-Identifier: AGPL-3.0-only

//! Software (simulated MXP) backend
//!
//! Implements [`VectorBackend`] with plain CPU arithmetic, processing each
//! vector in waves of `vector_lanes` elements the way the coprocessor does.
//! This enables:
//!
//! 1. **CI without hardware**: every vector-strategy test runs on any host.
//!
//! 2. **Instruction accounting**: waves and elements are counted, so lane
//!    utilisation of a tiling can be measured before it is run on the FPGA.
//!
//! ## Precision model
//!
//! ```text
//! i32 weight × i32 input  →  i64 product (exact)
//!    ↓ accumulate
//! i64 accumulator         →  caller shifts by the kernel frac bits
//! ```
//!
//! The accumulator never rounds, so a block computed here equals the scalar
//! reference sum bit for bit.

use crate::backend::{BackendType, VectorBackend, VectorStats};
use crate::capabilities::Capabilities;
use crate::error::{MxpError, Result};
use mxp_chip::CoprocConfig;
use tracing::debug;

/// Software (simulated) vector backend.
#[derive(Debug)]
pub struct SoftwareBackend {
    caps: Capabilities,
    stats: VectorStats,
}

impl SoftwareBackend {
    /// Create a simulator with the reference configuration (16 lanes, 64 KB).
    ///
    /// # Errors
    ///
    /// Never fails for the reference preset; kept fallible for symmetry with
    /// [`VectorBackend::init`].
    pub fn simulator() -> Result<Self> {
        Self::init(CoprocConfig::SIMULATOR)
    }

    /// Lane count of the simulated unit.
    pub fn lanes(&self) -> usize {
        self.caps.lanes()
    }
}

impl VectorBackend for SoftwareBackend {
    fn init(config: CoprocConfig) -> Result<Self> {
        let caps = Capabilities::from_config(config, BackendType::Software)?;
        debug!(
            "SoftwareBackend: lanes={} scratchpad={}KB waves={} frac(w/h/b)={}/{}/{}",
            config.vector_lanes,
            config.scratchpad_kb,
            config.max_masked_waves,
            config.frac.word,
            config.frac.half,
            config.frac.byte
        );
        Ok(Self {
            caps,
            stats: VectorStats::default(),
        })
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn vmac(&mut self, acc: &mut [i64], weights: &[i32], inputs: &[i32]) -> Result<()> {
        if weights.len() != acc.len() {
            return Err(MxpError::length_mismatch(acc.len(), weights.len()));
        }
        if inputs.len() != acc.len() {
            return Err(MxpError::length_mismatch(acc.len(), inputs.len()));
        }

        let waves = self.caps.config.waves_for(acc.len());
        if waves > self.caps.config.max_masked_waves as usize {
            return Err(MxpError::VectorTooLong {
                len: acc.len(),
                waves,
                max: self.caps.config.max_masked_waves,
            });
        }

        let lanes = self.caps.lanes();
        for ((acc, w), x) in acc
            .chunks_mut(lanes)
            .zip(weights.chunks(lanes))
            .zip(inputs.chunks(lanes))
        {
            for ((a, &w), &x) in acc.iter_mut().zip(w).zip(x) {
                *a = a.saturating_add(i64::from(w) * i64::from(x));
            }
        }

        self.stats.instructions += 1;
        self.stats.waves += waves as u64;
        self.stats.elements += acc.len() as u64;
        Ok(())
    }

    fn stats(&self) -> VectorStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = VectorStats::default();
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn is_ready(&self) -> bool {
        true
    }
}
