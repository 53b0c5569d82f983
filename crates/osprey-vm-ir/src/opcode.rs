//! Machine-level IR opcodes

use serde::{Deserialize, Serialize};

macro_rules! define_opcodes {
    ($( $(#[$section:meta])* $name:ident, )*) => {
        /// Machine-level IR opcodes
        ///
        /// Closed enumeration of every instruction kind the machine operator
        /// catalog can produce. The discriminant doubles as the stable
        /// encoding used by emitted code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(u16)]
        #[allow(missing_docs)]
        pub enum IrOpcode {
            $( $(#[$section])* $name, )*
        }

        impl IrOpcode {
            /// Every opcode in declaration order.
            pub const ALL: &'static [IrOpcode] = &[ $( IrOpcode::$name, )* ];

            /// Human-readable mnemonic
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( IrOpcode::$name => stringify!($name), )*
                }
            }
        }
    };
}

define_opcodes! {
    // ==================== Word32 ====================
    Word32And,
    Word32Or,
    Word32Xor,
    Word32Shl,
    Word32Shr,
    Word32Sar,
    Word32Ror,
    Word32Rol,
    Word32Equal,
    Word32Clz,
    Word32Ctz,
    Word32Popcnt,
    Word32ReverseBits,
    Word32ReverseBytes,

    // ==================== Word64 ====================
    Word64And,
    Word64Or,
    Word64Xor,
    Word64Shl,
    Word64Shr,
    Word64Sar,
    Word64Ror,
    Word64Rol,
    Word64Equal,
    Word64Clz,
    Word64Ctz,
    Word64Popcnt,
    Word64ReverseBits,
    Word64ReverseBytes,

    // ==================== Int32 ====================
    Int32Add,
    Int32AddWithOverflow,
    Int32Sub,
    Int32SubWithOverflow,
    Int32Mul,
    Int32MulWithOverflow,
    Int32MulHigh,
    Int32Div,
    Int32Mod,
    Int32LessThan,
    Int32LessThanOrEqual,
    Int32AbsWithOverflow,
    Uint32Div,
    Uint32Mod,
    Uint32MulHigh,
    Uint32LessThan,
    Uint32LessThanOrEqual,

    // ==================== Int64 ====================
    Int64Add,
    Int64AddWithOverflow,
    Int64Sub,
    Int64SubWithOverflow,
    Int64Mul,
    Int64Div,
    Int64Mod,
    Int64LessThan,
    Int64LessThanOrEqual,
    Int64AbsWithOverflow,
    Uint64Div,
    Uint64Mod,
    Uint64LessThan,
    Uint64LessThanOrEqual,

    // ==================== Conversions ====================
    BitcastWord32ToWord64,
    BitcastFloat32ToInt32,
    BitcastFloat64ToInt64,
    BitcastInt32ToFloat32,
    BitcastInt64ToFloat64,
    ChangeFloat32ToFloat64,
    ChangeFloat64ToInt32,
    ChangeFloat64ToInt64,
    ChangeFloat64ToUint32,
    ChangeFloat64ToUint64,
    ChangeInt32ToFloat64,
    ChangeInt32ToInt64,
    ChangeInt64ToFloat64,
    ChangeUint32ToFloat64,
    ChangeUint32ToUint64,
    TruncateFloat32ToInt32,
    TruncateFloat32ToUint32,
    TruncateFloat64ToFloat32,
    TruncateFloat64ToInt64,
    TruncateFloat64ToUint32,
    TruncateInt64ToInt32,
    TryTruncateFloat32ToInt64,
    TryTruncateFloat64ToInt64,
    TryTruncateFloat32ToUint64,
    TryTruncateFloat64ToUint64,
    RoundFloat64ToInt32,
    RoundInt32ToFloat32,
    RoundInt64ToFloat32,
    RoundInt64ToFloat64,
    RoundUint32ToFloat32,
    RoundUint64ToFloat32,
    RoundUint64ToFloat64,
    SignExtendWord8ToInt32,
    SignExtendWord16ToInt32,
    SignExtendWord8ToInt64,
    SignExtendWord16ToInt64,
    SignExtendWord32ToInt64,

    // ==================== Float32 ====================
    Float32Abs,
    Float32Add,
    Float32Sub,
    Float32Mul,
    Float32Div,
    Float32Neg,
    Float32Sqrt,
    Float32Max,
    Float32Min,
    Float32Equal,
    Float32LessThan,
    Float32LessThanOrEqual,
    Float32RoundDown,
    Float32RoundUp,
    Float32RoundTruncate,
    Float32RoundTiesEven,

    // ==================== Float64 ====================
    Float64Abs,
    Float64Add,
    Float64Sub,
    Float64Mul,
    Float64Div,
    Float64Mod,
    Float64Neg,
    Float64Sqrt,
    Float64Max,
    Float64Min,
    Float64Pow,
    Float64Atan2,
    Float64Exp,
    Float64Log,
    Float64Sin,
    Float64Cos,
    Float64SilenceNaN,
    Float64Equal,
    Float64LessThan,
    Float64LessThanOrEqual,
    Float64ExtractLowWord32,
    Float64ExtractHighWord32,
    Float64InsertLowWord32,
    Float64InsertHighWord32,
    Float64RoundDown,
    Float64RoundUp,
    Float64RoundTruncate,
    Float64RoundTiesAway,
    Float64RoundTiesEven,

    // ==================== Frame ====================
    LoadStackPointer,
    LoadFramePointer,
    LoadParentFramePointer,

    // ==================== Pairs ====================
    Int32PairAdd,
    Int32PairSub,
    Int32PairMul,
    Word32PairShl,
    Word32PairShr,
    Word32PairSar,

    // ==================== Memory ====================
    Load,
    PoisonedLoad,
    UnalignedLoad,
    ProtectedLoad,
    LoadTransform,
    Store,
    UnalignedStore,
    ProtectedStore,
    StackSlot,
    MemoryBarrier,

    // ==================== Atomics ====================
    Word32AtomicLoad,
    Word32AtomicStore,
    Word32AtomicAdd,
    Word32AtomicSub,
    Word32AtomicAnd,
    Word32AtomicOr,
    Word32AtomicXor,
    Word32AtomicExchange,
    Word32AtomicCompareExchange,
    Word64AtomicLoad,
    Word64AtomicStore,
    Word64AtomicAdd,
    Word64AtomicSub,
    Word64AtomicAnd,
    Word64AtomicOr,
    Word64AtomicXor,
    Word64AtomicExchange,
    Word64AtomicCompareExchange,
    Word32AtomicPairLoad,
    Word32AtomicPairStore,
    Word32AtomicPairAdd,
    Word32AtomicPairSub,
    Word32AtomicPairAnd,
    Word32AtomicPairOr,
    Word32AtomicPairXor,
    Word32AtomicPairExchange,
    Word32AtomicPairCompareExchange,

    // ==================== Misc ====================
    BitcastWordToTagged,
    BitcastTaggedToWord,
    BitcastTaggedSignedToWord,
    AbortCSAAssert,
    DebugBreak,
    UnsafePointerAdd,
    StackPointerGreaterThan,
    Comment,

    // ==================== SIMD ====================
    F64x2Splat,
    F64x2ExtractLane,
    F64x2ReplaceLane,
    F64x2Abs,
    F64x2Neg,
    F64x2Sqrt,
    F64x2Add,
    F64x2Sub,
    F64x2Mul,
    F64x2Div,
    F64x2Min,
    F64x2Max,
    F64x2Eq,
    F64x2Ne,
    F64x2Lt,
    F64x2Le,
    F32x4Splat,
    F32x4ExtractLane,
    F32x4ReplaceLane,
    F32x4Abs,
    F32x4Neg,
    F32x4Add,
    F32x4Sub,
    F32x4Mul,
    F32x4Min,
    F32x4Max,
    F32x4Eq,
    F32x4Ne,
    I64x2Splat,
    I64x2SplatI32Pair,
    I64x2ExtractLane,
    I64x2ReplaceLane,
    I64x2ReplaceLaneI32Pair,
    I64x2Neg,
    I64x2Add,
    I64x2Sub,
    I64x2Mul,
    I32x4Splat,
    I32x4ExtractLane,
    I32x4ReplaceLane,
    I32x4Neg,
    I32x4Add,
    I32x4Sub,
    I32x4Mul,
    I32x4MinS,
    I32x4MaxS,
    I32x4Eq,
    I32x4Ne,
    I16x8Splat,
    I16x8ExtractLaneU,
    I16x8ExtractLaneS,
    I16x8ReplaceLane,
    I16x8Add,
    I16x8Sub,
    I16x8Mul,
    I16x8Eq,
    I8x16Splat,
    I8x16ExtractLaneU,
    I8x16ExtractLaneS,
    I8x16ReplaceLane,
    I8x16Add,
    I8x16Sub,
    I8x16Eq,
    S128Zero,
    S128And,
    S128Or,
    S128Xor,
    S128Not,
    S128Select,
    S8x16Shuffle,
    V8x16AnyTrue,
    V8x16AllTrue,
}

impl IrOpcode {
    /// Stable numeric encoding
    #[inline]
    pub const fn id(self) -> u16 {
        self as u16
    }

    /// Decode an opcode from its numeric encoding.
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Whether this opcode reads or writes memory through an address input.
    pub const fn is_memory_access(self) -> bool {
        matches!(
            self,
            IrOpcode::Load
                | IrOpcode::PoisonedLoad
                | IrOpcode::UnalignedLoad
                | IrOpcode::ProtectedLoad
                | IrOpcode::LoadTransform
                | IrOpcode::Store
                | IrOpcode::UnalignedStore
                | IrOpcode::ProtectedStore
        ) || self.is_atomic()
    }

    /// Whether this opcode belongs to one of the atomic families.
    pub const fn is_atomic(self) -> bool {
        (self as u16) >= (IrOpcode::Word32AtomicLoad as u16)
            && (self as u16) <= (IrOpcode::Word32AtomicPairCompareExchange as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip() {
        for &opcode in IrOpcode::ALL {
            assert_eq!(IrOpcode::from_id(opcode.id()), Some(opcode));
        }
        assert_eq!(IrOpcode::from_id(u16::MAX), None);
    }

    #[test]
    fn test_mnemonic() {
        assert_eq!(IrOpcode::Word32And.mnemonic(), "Word32And");
        assert_eq!(IrOpcode::S8x16Shuffle.mnemonic(), "S8x16Shuffle");
    }

    #[test]
    fn test_atomic_range() {
        assert!(IrOpcode::Word64AtomicXor.is_atomic());
        assert!(IrOpcode::Word32AtomicPairCompareExchange.is_atomic());
        assert!(!IrOpcode::MemoryBarrier.is_atomic());
        assert!(IrOpcode::Store.is_memory_access());
        assert!(!IrOpcode::StackSlot.is_memory_access());
    }
}
