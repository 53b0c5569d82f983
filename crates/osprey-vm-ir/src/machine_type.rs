//! Machine representations and machine types
//!
//! A [`MachineType`] pairs the in-memory [`MachineRepresentation`] of a value
//! with the [`MachineSemantic`] used to interpret it. Loads, stores and
//! atomics are parameterized by these.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit-level representation of a value in memory or in a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum MachineRepresentation {
    /// No representation (unreachable for memory access)
    None,
    /// Single bit, produced by comparisons
    Bit,
    /// 8-bit integer
    Word8,
    /// 16-bit integer
    Word16,
    /// 32-bit integer
    Word32,
    /// 64-bit integer
    Word64,
    /// Tagged small integer
    TaggedSigned,
    /// Tagged heap pointer
    TaggedPointer,
    /// Tagged value (Smi or heap pointer)
    Tagged,
    /// Compressed heap pointer
    CompressedPointer,
    /// Compressed tagged value
    Compressed,
    /// IEEE 754 single precision
    Float32,
    /// IEEE 754 double precision
    Float64,
    /// 128-bit SIMD vector
    Simd128,
}

impl MachineRepresentation {
    /// Every representation a value can be loaded or stored with.
    pub const MEMORY: [MachineRepresentation; 12] = [
        MachineRepresentation::Float32,
        MachineRepresentation::Float64,
        MachineRepresentation::Simd128,
        MachineRepresentation::Word8,
        MachineRepresentation::Word16,
        MachineRepresentation::Word32,
        MachineRepresentation::Word64,
        MachineRepresentation::TaggedSigned,
        MachineRepresentation::TaggedPointer,
        MachineRepresentation::Tagged,
        MachineRepresentation::CompressedPointer,
        MachineRepresentation::Compressed,
    ];

    /// Log2 of the element size in bytes.
    ///
    /// Panics for `None` and `Bit`, which have no memory footprint.
    pub const fn element_size_log2(self) -> u32 {
        match self {
            MachineRepresentation::Word8 => 0,
            MachineRepresentation::Word16 => 1,
            MachineRepresentation::Word32
            | MachineRepresentation::Float32
            | MachineRepresentation::CompressedPointer
            | MachineRepresentation::Compressed => 2,
            MachineRepresentation::Word64
            | MachineRepresentation::Float64
            | MachineRepresentation::TaggedSigned
            | MachineRepresentation::TaggedPointer
            | MachineRepresentation::Tagged => 3,
            MachineRepresentation::Simd128 => 4,
            MachineRepresentation::None | MachineRepresentation::Bit => {
                panic!("representation has no element size")
            }
        }
    }

    /// Element size in bytes.
    pub const fn element_size(self) -> u32 {
        1 << self.element_size_log2()
    }

    /// Whether values of this representation are tagged.
    pub const fn is_tagged(self) -> bool {
        matches!(
            self,
            MachineRepresentation::TaggedSigned
                | MachineRepresentation::TaggedPointer
                | MachineRepresentation::Tagged
        )
    }

    /// Whether values of this representation are compressed tagged values.
    pub const fn is_compressed(self) -> bool {
        matches!(
            self,
            MachineRepresentation::CompressedPointer | MachineRepresentation::Compressed
        )
    }

    /// Whether values of this representation may be heap pointers.
    pub const fn can_be_tagged_pointer(self) -> bool {
        matches!(
            self,
            MachineRepresentation::TaggedPointer
                | MachineRepresentation::Tagged
                | MachineRepresentation::CompressedPointer
                | MachineRepresentation::Compressed
        )
    }

    /// Short lowercase name, as used in operator printing.
    pub const fn name(self) -> &'static str {
        match self {
            MachineRepresentation::None => "none",
            MachineRepresentation::Bit => "bit",
            MachineRepresentation::Word8 => "word8",
            MachineRepresentation::Word16 => "word16",
            MachineRepresentation::Word32 => "word32",
            MachineRepresentation::Word64 => "word64",
            MachineRepresentation::TaggedSigned => "tagged-signed",
            MachineRepresentation::TaggedPointer => "tagged-pointer",
            MachineRepresentation::Tagged => "tagged",
            MachineRepresentation::CompressedPointer => "compressed-pointer",
            MachineRepresentation::Compressed => "compressed",
            MachineRepresentation::Float32 => "float32",
            MachineRepresentation::Float64 => "float64",
            MachineRepresentation::Simd128 => "simd128",
        }
    }
}

impl fmt::Display for MachineRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the bits of a representation are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum MachineSemantic {
    /// No particular interpretation
    None,
    /// Boolean
    Bool,
    /// Signed 32-bit (also used for narrower signed integers)
    Int32,
    /// Unsigned 32-bit (also used for narrower unsigned integers)
    Uint32,
    /// Signed 64-bit
    Int64,
    /// Unsigned 64-bit
    Uint64,
    /// JavaScript number
    Number,
    /// Any tagged value
    Any,
}

/// Representation plus semantic of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineType {
    /// Bit-level representation
    pub representation: MachineRepresentation,
    /// Interpretation of the bits
    pub semantic: MachineSemantic,
}

/// A load is parameterized by the machine type it produces.
pub type LoadRepresentation = MachineType;

impl MachineType {
    /// Create a machine type
    #[inline]
    pub const fn new(representation: MachineRepresentation, semantic: MachineSemantic) -> Self {
        Self {
            representation,
            semantic,
        }
    }

    /// No type
    pub const fn none() -> Self {
        Self::new(MachineRepresentation::None, MachineSemantic::None)
    }
    /// Signed 8-bit
    pub const fn int8() -> Self {
        Self::new(MachineRepresentation::Word8, MachineSemantic::Int32)
    }
    /// Unsigned 8-bit
    pub const fn uint8() -> Self {
        Self::new(MachineRepresentation::Word8, MachineSemantic::Uint32)
    }
    /// Signed 16-bit
    pub const fn int16() -> Self {
        Self::new(MachineRepresentation::Word16, MachineSemantic::Int32)
    }
    /// Unsigned 16-bit
    pub const fn uint16() -> Self {
        Self::new(MachineRepresentation::Word16, MachineSemantic::Uint32)
    }
    /// Signed 32-bit
    pub const fn int32() -> Self {
        Self::new(MachineRepresentation::Word32, MachineSemantic::Int32)
    }
    /// Unsigned 32-bit
    pub const fn uint32() -> Self {
        Self::new(MachineRepresentation::Word32, MachineSemantic::Uint32)
    }
    /// Signed 64-bit
    pub const fn int64() -> Self {
        Self::new(MachineRepresentation::Word64, MachineSemantic::Int64)
    }
    /// Unsigned 64-bit
    pub const fn uint64() -> Self {
        Self::new(MachineRepresentation::Word64, MachineSemantic::Uint64)
    }
    /// Single-precision float
    pub const fn float32() -> Self {
        Self::new(MachineRepresentation::Float32, MachineSemantic::Number)
    }
    /// Double-precision float
    pub const fn float64() -> Self {
        Self::new(MachineRepresentation::Float64, MachineSemantic::Number)
    }
    /// 128-bit SIMD vector
    pub const fn simd128() -> Self {
        Self::new(MachineRepresentation::Simd128, MachineSemantic::None)
    }
    /// Raw pointer of the target word size (64-bit targets)
    pub const fn pointer() -> Self {
        Self::new(MachineRepresentation::Word64, MachineSemantic::None)
    }
    /// Tagged small integer
    pub const fn tagged_signed() -> Self {
        Self::new(MachineRepresentation::TaggedSigned, MachineSemantic::Int32)
    }
    /// Tagged heap pointer
    pub const fn tagged_pointer() -> Self {
        Self::new(MachineRepresentation::TaggedPointer, MachineSemantic::Any)
    }
    /// Any tagged value
    pub const fn any_tagged() -> Self {
        Self::new(MachineRepresentation::Tagged, MachineSemantic::Any)
    }
    /// Compressed heap pointer
    pub const fn compressed_pointer() -> Self {
        Self::new(MachineRepresentation::CompressedPointer, MachineSemantic::Any)
    }
    /// Any compressed value
    pub const fn any_compressed() -> Self {
        Self::new(MachineRepresentation::Compressed, MachineSemantic::Any)
    }

    /// Every machine type a `Load` may be parameterized with.
    pub const LOADABLE: [MachineType; 17] = [
        MachineType::float32(),
        MachineType::float64(),
        MachineType::simd128(),
        MachineType::int8(),
        MachineType::uint8(),
        MachineType::int16(),
        MachineType::uint16(),
        MachineType::int32(),
        MachineType::uint32(),
        MachineType::int64(),
        MachineType::uint64(),
        MachineType::pointer(),
        MachineType::tagged_signed(),
        MachineType::tagged_pointer(),
        MachineType::any_tagged(),
        MachineType::compressed_pointer(),
        MachineType::any_compressed(),
    ];

    /// Machine types valid for the 32-bit atomic family.
    pub const ATOMIC_WORD32: [MachineType; 6] = [
        MachineType::uint8(),
        MachineType::uint16(),
        MachineType::uint32(),
        MachineType::int8(),
        MachineType::int16(),
        MachineType::int32(),
    ];

    /// Machine types valid for the 64-bit atomic family.
    pub const ATOMIC_WORD64: [MachineType; 4] = [
        MachineType::uint8(),
        MachineType::uint16(),
        MachineType::uint32(),
        MachineType::uint64(),
    ];

    /// Whether the semantic is a signed integer.
    pub const fn is_signed(self) -> bool {
        matches!(self.semantic, MachineSemantic::Int32 | MachineSemantic::Int64)
    }

    /// Whether the semantic is an unsigned integer.
    pub const fn is_unsigned(self) -> bool {
        matches!(self.semantic, MachineSemantic::Uint32 | MachineSemantic::Uint64)
    }

    /// Whether this is a tagged type.
    pub const fn is_tagged(self) -> bool {
        self.representation.is_tagged()
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{:?}", self.representation, self.semantic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(MachineRepresentation::Word8.element_size(), 1);
        assert_eq!(MachineRepresentation::Word16.element_size(), 2);
        assert_eq!(MachineRepresentation::Float32.element_size(), 4);
        assert_eq!(MachineRepresentation::Tagged.element_size(), 8);
        assert_eq!(MachineRepresentation::Simd128.element_size(), 16);
    }

    #[test]
    fn test_loadable_types_are_distinct() {
        for (i, a) in MachineType::LOADABLE.iter().enumerate() {
            for b in &MachineType::LOADABLE[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_signedness() {
        assert!(MachineType::int16().is_signed());
        assert!(MachineType::uint64().is_unsigned());
        assert!(!MachineType::any_tagged().is_signed());
        assert!(MachineType::tagged_pointer().is_tagged());
    }
}
