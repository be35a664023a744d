//! Coprocessor configuration.
//!
//! The simulator and the FPGA build are both configured once at startup with
//! the same five numbers: lane count, scratchpad size, masked-wave limit and
//! the fractional-bit width used by fixed-point multiplies for each element
//! width. Everything downstream (tile sizing, frac-bit validation) derives
//! from this struct.

use crate::width::ElementWidth;

/// Fractional bits used by the fixed-point multiply for each element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FracWidths {
    /// Fractional bits for 32-bit words.
    pub word: u8,
    /// Fractional bits for 16-bit half words.
    pub half: u8,
    /// Fractional bits for bytes.
    pub byte: u8,
}

impl FracWidths {
    /// Fractional bits for the given element width.
    #[must_use]
    pub const fn get(&self, width: ElementWidth) -> u8 {
        match width {
            ElementWidth::Word => self.word,
            ElementWidth::Half => self.half,
            ElementWidth::Byte => self.byte,
        }
    }
}

/// Vector coprocessor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoprocConfig {
    /// Parallel vector lanes (32-bit lanes).
    pub vector_lanes: u32,
    /// Scratchpad memory in KB.
    pub scratchpad_kb: u32,
    /// Maximum masked waves per instruction.
    pub max_masked_waves: u32,
    /// Fractional bits per element width.
    pub frac: FracWidths,
}

impl CoprocConfig {
    /// Reference simulator configuration.
    ///
    /// 16 lanes, 64 KB scratchpad, 256 masked waves, Q16 words, Q15 halves,
    /// Q4 bytes.
    pub const SIMULATOR: Self = Self {
        vector_lanes: 16,
        scratchpad_kb: 64,
        max_masked_waves: 256,
        frac: FracWidths { word: 16, half: 15, byte: 4 },
    };

    /// Scratchpad capacity in bytes.
    #[must_use]
    pub const fn scratchpad_bytes(&self) -> usize {
        (self.scratchpad_kb as usize) * 1024
    }

    /// Number of lane waves needed to process `len` elements.
    #[must_use]
    pub const fn waves_for(&self, len: usize) -> usize {
        let lanes = self.vector_lanes as usize;
        if lanes == 0 {
            return 0;
        }
        (len + lanes - 1) / lanes
    }

    /// Whether a fixed-point operand with `bits` fractional bits can be
    /// multiplied at `width` without losing precision to the unit's shift.
    #[must_use]
    pub const fn supports_frac_bits(&self, width: ElementWidth, bits: u8) -> bool {
        bits <= self.frac.get(width) && (bits as u32) < width.bits()
    }

    /// Basic sanity of the configuration (non-zero lanes and scratchpad,
    /// frac widths smaller than their element widths).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.vector_lanes > 0
            && self.scratchpad_kb > 0
            && self.max_masked_waves > 0
            && (self.frac.word as u32) < ElementWidth::Word.bits()
            && (self.frac.half as u32) < ElementWidth::Half.bits()
            && (self.frac.byte as u32) < ElementWidth::Byte.bits()
    }
}

impl Default for CoprocConfig {
    fn default() -> Self {
        Self::SIMULATOR
    }
}
