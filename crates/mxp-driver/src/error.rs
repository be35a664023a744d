//! Error types for coprocessor operations

use mxp_chip::ElementWidth;
use thiserror::Error;

/// Result type alias for coprocessor operations
pub type Result<T> = std::result::Result<T, MxpError>;

/// Errors that can occur at the coprocessor boundary
#[derive(Debug, Error)]
pub enum MxpError {
    /// Coprocessor configuration rejected at init
    #[error("Invalid coprocessor configuration: {reason}")]
    InvalidConfig {
        /// Reason for rejection
        reason: String,
    },

    /// A tile does not fit the scratchpad
    #[error("Scratchpad overflow: tile needs {required} bytes, scratchpad has {available}")]
    ScratchpadOverflow {
        /// Bytes required by the tile
        required: usize,
        /// Scratchpad capacity in bytes
        available: usize,
    },

    /// Vector operands of different lengths
    #[error("Operand length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Length of the accumulator operand
        expected: usize,
        /// Length of the offending operand
        actual: usize,
    },

    /// Vector needs more masked waves than one instruction can issue
    #[error("Vector of {len} elements needs {waves} waves (max {max})")]
    VectorTooLong {
        /// Vector length in elements
        len: usize,
        /// Waves needed
        waves: usize,
        /// Maximum waves per instruction
        max: u32,
    },

    /// Fractional bits exceed what the unit supports at this width
    #[error("{bits} fractional bits unsupported at {width} width (max {max})")]
    UnsupportedFracBits {
        /// Element width
        width: ElementWidth,
        /// Requested fractional bits
        bits: u8,
        /// Configured limit for the width
        max: u8,
    },

    /// Backend used before it was initialized
    #[error("Coprocessor backend not ready")]
    NotReady,
}

impl MxpError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a length mismatch error
    pub const fn length_mismatch(expected: usize, actual: usize) -> Self {
        Self::LengthMismatch { expected, actual }
    }
}
