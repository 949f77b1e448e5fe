//! Fixed-width integer value types.
//!
//! The datapath operates on signed/unsigned integers of arbitrary bit width.
//! This module is the single source of truth for width bookkeeping: the
//! accumulator-sizing policy, the two's-complement bit encoding used by the
//! memory image, and wrap-to-width arithmetic used by the reference
//! evaluator.

/// A fixed-width integer element type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct IntDType {
    /// Whether values are two's-complement signed.
    pub signed: bool,
    /// Width in bits. Descriptors up to 128 bits exist (wide accumulators);
    /// concrete values are carried in `i64` and wrap at 64 bits.
    pub width: u16,
}

/// Default element type for operator outputs when no dtype is declared.
pub const DEFAULT_OPERATOR_DTYPE: IntDType = IntDType::I32;

impl IntDType {
    pub const I8: Self = Self::int(8);
    pub const I16: Self = Self::int(16);
    pub const I32: Self = Self::int(32);
    pub const I64: Self = Self::int(64);
    pub const U8: Self = Self::uint(8);
    pub const U16: Self = Self::uint(16);
    pub const U32: Self = Self::uint(32);

    /// Canonical signed type of the given bit width.
    pub const fn int(width: u16) -> Self {
        Self {
            signed: true,
            width,
        }
    }

    /// Canonical unsigned type of the given bit width.
    pub const fn uint(width: u16) -> Self {
        Self {
            signed: false,
            width,
        }
    }

    /// Storage size rounded up to whole bytes.
    pub const fn size_in_bytes(self) -> usize {
        (self.width as usize + 7) / 8
    }

    /// Bit mask covering this type's width (all ones for widths >= 64).
    pub const fn mask(self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Encodes a value into its raw two's-complement bit pattern.
    pub const fn bits_from_value(self, value: i64) -> u64 {
        (value as u64) & self.mask()
    }

    /// Decodes a raw bit pattern, sign-extending when the type is signed.
    pub const fn value_from_bits(self, bits: u64) -> i64 {
        let bits = bits & self.mask();
        if self.signed && self.width < 64 {
            let sign = 1u64 << (self.width - 1);
            if bits & sign != 0 {
                return (bits | !self.mask()) as i64;
            }
        }
        bits as i64
    }

    /// Wraps a wider intermediate result to this type's representable range.
    pub const fn wrap(self, value: i64) -> i64 {
        self.value_from_bits(value as u64)
    }
}

/// Accumulator type for a multiply-accumulate over elements of `elem_width`
/// bits.
///
/// Policy constant, not derived from overflow analysis: element widths of 16
/// bits or more get a signed accumulator of four times the element width;
/// narrower elements share a fixed signed 32-bit accumulator. The generated
/// hardware sizes its adder trees with the same rule, so this must not
/// change without a matching hardware revision.
pub const fn accum_dtype(elem_width: u16) -> IntDType {
    if elem_width >= 16 {
        IntDType::int(elem_width * 4)
    } else {
        IntDType::I32
    }
}
