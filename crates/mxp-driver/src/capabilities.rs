//! Coprocessor capability representation
//!
//! What the engine is allowed to ask of a backend: lane count, scratchpad
//! budget, wave limit and per-width fractional bits. The engine sizes its
//! tiles from this, never from constants.

use crate::backend::BackendType;
use crate::error::{MxpError, Result};
use mxp_chip::{CoprocConfig, ElementWidth};

/// Capabilities of an initialized vector backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Configuration the backend was initialized with
    pub config: CoprocConfig,

    /// Which backend reports these capabilities
    pub backend: BackendType,
}

impl Capabilities {
    /// Capabilities for `config` on `backend`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration fails basic validation.
    pub fn from_config(config: CoprocConfig, backend: BackendType) -> Result<Self> {
        if !config.is_valid() {
            return Err(MxpError::invalid_config(format!("{config:?}")));
        }
        Ok(Self { config, backend })
    }

    /// Parallel lanes
    pub const fn lanes(&self) -> usize {
        self.config.vector_lanes as usize
    }

    /// Scratchpad capacity in bytes
    pub const fn scratchpad_bytes(&self) -> usize {
        self.config.scratchpad_bytes()
    }

    /// Check that `bits` fractional bits are supported at `width`
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFracBits` if the configured limit is exceeded.
    pub fn check_frac_bits(&self, width: ElementWidth, bits: u8) -> Result<()> {
        if self.config.supports_frac_bits(width, bits) {
            Ok(())
        } else {
            Err(MxpError::UnsupportedFracBits {
                width,
                bits,
                max: self.config.frac.get(width),
            })
        }
    }

    /// Check that a tile of `bytes` fits the scratchpad
    ///
    /// # Errors
    ///
    /// Returns `ScratchpadOverflow` if it does not.
    pub fn check_tile(&self, bytes: usize) -> Result<()> {
        let available = self.scratchpad_bytes();
        if bytes > available {
            return Err(MxpError::ScratchpadOverflow {
                required: bytes,
                available,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_config() {
        let cfg = CoprocConfig {
            scratchpad_kb: 0,
            ..CoprocConfig::SIMULATOR
        };
        assert!(Capabilities::from_config(cfg, BackendType::Software).is_err());
    }

    #[test]
    fn tile_check_uses_scratchpad() {
        let caps = Capabilities::from_config(CoprocConfig::SIMULATOR, BackendType::Software).unwrap();
        assert!(caps.check_tile(64 * 1024).is_ok());
        assert!(matches!(
            caps.check_tile(64 * 1024 + 1),
            Err(MxpError::ScratchpadOverflow { available: 65_536, .. })
        ));
    }

    #[test]
    fn frac_bits_checked_per_width() {
        let caps = Capabilities::from_config(CoprocConfig::SIMULATOR, BackendType::Software).unwrap();
        assert!(caps.check_frac_bits(ElementWidth::Word, 12).is_ok());
        assert!(matches!(
            caps.check_frac_bits(ElementWidth::Half, 16),
            Err(MxpError::UnsupportedFracBits { max: 15, .. })
        ));
    }
}
