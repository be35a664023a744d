//! Element widths supported by the vector unit.

/// Element width of a vector operand.
///
/// The coprocessor carries a separate fractional-bit setting for each width,
/// which is why the width is part of every fixed-point validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementWidth {
    /// 32-bit word.
    Word,
    /// 16-bit half word.
    Half,
    /// 8-bit byte.
    Byte,
}

impl ElementWidth {
    /// All widths, widest first.
    pub const ALL: [Self; 3] = [Self::Word, Self::Half, Self::Byte];

    /// Size of one element in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Word => 4,
            Self::Half => 2,
            Self::Byte => 1,
        }
    }

    /// Size of one element in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        (self.bytes() as u32) * 8
    }
}

impl std::fmt::Display for ElementWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word => write!(f, "word"),
            Self::Half => write!(f, "half"),
            Self::Byte => write!(f, "byte"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_are_ordered_widest_first() {
        let bytes: Vec<usize> = ElementWidth::ALL.iter().map(|w| w.bytes()).collect();
        assert_eq!(bytes, vec![4, 2, 1]);
        assert_eq!(ElementWidth::Half.bits(), 16);
    }
}
