//! Backend abstraction for the vector coprocessor
//!
//! The convolution engine talks to the coprocessor only through
//! [`VectorBackend`]: one blocking call per block multiply-accumulate, no
//! partial results, no cancellation.

use crate::capabilities::Capabilities;
use crate::error::{MxpError, Result};
use mxp_chip::{CoprocConfig, ElementWidth};
use std::fmt::Debug;

/// Vector coprocessor backend
pub trait VectorBackend: Debug + Send {
    /// Configure the coprocessor (lanes, scratchpad, fractional widths)
    ///
    /// Issued once at startup.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is rejected.
    fn init(config: CoprocConfig) -> Result<Self>
    where
        Self: Sized;

    /// Capabilities the backend was configured with
    fn capabilities(&self) -> &Capabilities;

    /// Lane-parallel multiply-accumulate: `acc[j] += weights[j] * inputs[j]`
    ///
    /// Products are formed at full precision and accumulated in `i64`,
    /// saturating at its range; the caller owns the final fixed-point shift.
    ///
    /// # Errors
    ///
    /// Returns error if operand lengths differ, the vector exceeds the
    /// masked-wave limit, or the backend is not ready.
    fn vmac(&mut self, acc: &mut [i64], weights: &[i32], inputs: &[i32]) -> Result<()>;

    /// Instruction counters since the last reset
    fn stats(&self) -> VectorStats;

    /// Clear instruction counters
    fn reset_stats(&mut self);

    /// Get backend type for debugging
    fn backend_type(&self) -> BackendType;

    /// Check if backend is ready
    fn is_ready(&self) -> bool;

    /// Check that a tile of `bytes` fits the scratchpad
    ///
    /// # Errors
    ///
    /// Returns `ScratchpadOverflow` if it does not.
    fn check_tile(&self, bytes: usize) -> Result<()> {
        self.capabilities().check_tile(bytes)
    }

    /// Check fractional bits for operands of `width`
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFracBits` if the width's limit is exceeded.
    fn check_frac_bits(&self, width: ElementWidth, bits: u8) -> Result<()> {
        self.capabilities().check_frac_bits(width, bits)
    }
}

/// Instruction counters kept by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VectorStats {
    /// Multiply-accumulate instructions issued
    pub instructions: u64,
    /// Lane waves executed
    pub waves: u64,
    /// Elements processed
    pub elements: u64,
}

impl VectorStats {
    /// Average lane utilisation in `[0, 1]` for `lanes` lanes
    #[must_use]
    pub fn lane_utilisation(&self, lanes: usize) -> f64 {
        if self.waves == 0 || lanes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let util = self.elements as f64 / (self.waves as f64 * lanes as f64);
        util
    }
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Software simulation of the vector unit, no hardware required
    Software,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "Software (simulated MXP)"),
        }
    }
}

/// Select a backend for `config`
///
/// Only the software simulator ships with this crate; it is always
/// available.
///
/// # Errors
///
/// Returns error if the configuration is rejected.
pub fn select_backend(config: CoprocConfig) -> Result<Box<dyn VectorBackend>> {
    use crate::backends::software::SoftwareBackend;

    let backend = SoftwareBackend::init(config)?;
    tracing::info!(
        "Using {} backend: {} lanes, {} KB scratchpad",
        backend.backend_type(),
        config.vector_lanes,
        config.scratchpad_kb
    );
    if !backend.is_ready() {
        return Err(MxpError::NotReady);
    }
    Ok(Box::new(backend))
}
