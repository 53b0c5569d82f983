//! Machine operator catalog
//!
//! [`MachineOperatorBuilder`] exposes one factory per machine-level
//! operation. Parameterless operators come from tables declared once below;
//! the same tables seed the [`OperatorCache`]. Parameterized operators are
//! interned when their parameter domain is a small closed set, and allocated
//! in the builder's [`Zone`] otherwise.
//!
//! ## Shapes
//!
//! - **Pure**: no effect or control edges besides the listed control input,
//!   `PURE` plus algebraic properties
//! - **Overflow**: two value outputs (result, overflow bit), `ELIMINATABLE`
//! - **Memory access**: base and index inputs plus one effect and one control
//!   edge, parameterized by machine type or store representation
//! - **Zone allocated**: shuffles, comments, lane operations, uncommon stack
//!   slots

use serde::Serialize;

use crate::machine_operator::{
    AtomicStoreRepresentation, LoadKind, LoadTransformParameters, LoadTransformation, ShiftKind,
    SimdShape, StackCheckKind, StackSlotRepresentation, StoreRepresentation,
};
use crate::machine_type::{LoadRepresentation, MachineRepresentation, MachineType};
use crate::opcode::IrOpcode;
use crate::operator::{Arity, OpParameter, Operator, OperatorProperties};
use crate::operator_cache::{OperatorCache, StaticOperator};
use crate::zone::Zone;

/// Optional machine features the target supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct MachineOperatorFlags(u32);

#[allow(missing_docs)]
impl MachineOperatorFlags {
    pub const NO_FLAGS: Self = Self(0);
    pub const FLOAT32_ROUND_DOWN: Self = Self(1 << 0);
    pub const FLOAT64_ROUND_DOWN: Self = Self(1 << 1);
    pub const FLOAT32_ROUND_UP: Self = Self(1 << 2);
    pub const FLOAT64_ROUND_UP: Self = Self(1 << 3);
    pub const FLOAT32_ROUND_TRUNCATE: Self = Self(1 << 4);
    pub const FLOAT64_ROUND_TRUNCATE: Self = Self(1 << 5);
    pub const FLOAT64_ROUND_TIES_AWAY: Self = Self(1 << 6);
    pub const FLOAT32_ROUND_TIES_EVEN: Self = Self(1 << 7);
    pub const FLOAT64_ROUND_TIES_EVEN: Self = Self(1 << 8);
    pub const WORD32_CTZ: Self = Self(1 << 9);
    pub const WORD64_CTZ: Self = Self(1 << 10);
    pub const WORD32_POPCNT: Self = Self(1 << 11);
    pub const WORD64_POPCNT: Self = Self(1 << 12);
    pub const WORD32_REVERSE_BITS: Self = Self(1 << 13);
    pub const WORD64_REVERSE_BITS: Self = Self(1 << 14);
    pub const INT32_ABS_WITH_OVERFLOW: Self = Self(1 << 15);
    pub const INT64_ABS_WITH_OVERFLOW: Self = Self(1 << 16);
    pub const WORD32_ROL: Self = Self(1 << 17);
    pub const WORD64_ROL: Self = Self(1 << 18);
    pub const ALL_OPTIONAL_OPS: Self = Self((1 << 19) - 1);

    /// Union of two flag sets
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether every flag in `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MachineOperatorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// How much unaligned memory access the target supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnalignedAccessSupport {
    /// Every access must be aligned
    None,
    /// Some representations may be accessed unaligned
    Some,
    /// Every access may be unaligned
    Full,
}

/// Unaligned access capabilities of the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRequirements {
    support: UnalignedAccessSupport,
    unaligned_load_unsupported: Vec<MachineRepresentation>,
    unaligned_store_unsupported: Vec<MachineRepresentation>,
}

impl AlignmentRequirements {
    /// Target allows unaligned access for every representation.
    pub fn full_unaligned_access_support() -> Self {
        Self {
            support: UnalignedAccessSupport::Full,
            unaligned_load_unsupported: Vec::new(),
            unaligned_store_unsupported: Vec::new(),
        }
    }

    /// Target requires aligned access for every representation.
    pub fn no_unaligned_access_support() -> Self {
        Self {
            support: UnalignedAccessSupport::None,
            unaligned_load_unsupported: Vec::new(),
            unaligned_store_unsupported: Vec::new(),
        }
    }

    /// Target allows unaligned access except for the listed representations.
    pub fn some_unaligned_access_support(
        unaligned_load_unsupported: &[MachineRepresentation],
        unaligned_store_unsupported: &[MachineRepresentation],
    ) -> Self {
        Self {
            support: UnalignedAccessSupport::Some,
            unaligned_load_unsupported: unaligned_load_unsupported.to_vec(),
            unaligned_store_unsupported: unaligned_store_unsupported.to_vec(),
        }
    }

    fn is_unaligned_supported(
        &self,
        unsupported: &[MachineRepresentation],
        rep: MachineRepresentation,
    ) -> bool {
        // Byte accesses are always aligned.
        if rep == MachineRepresentation::Word8 {
            return true;
        }
        match self.support {
            UnalignedAccessSupport::Full => true,
            UnalignedAccessSupport::None => false,
            UnalignedAccessSupport::Some => !unsupported.contains(&rep),
        }
    }

    /// Whether an unaligned load of `rep` is supported
    pub fn is_unaligned_load_supported(&self, rep: MachineRepresentation) -> bool {
        self.is_unaligned_supported(&self.unaligned_load_unsupported, rep)
    }

    /// Whether an unaligned store of `rep` is supported
    pub fn is_unaligned_store_supported(&self, rep: MachineRepresentation) -> bool {
        self.is_unaligned_supported(&self.unaligned_store_unsupported, rep)
    }
}

impl Default for AlignmentRequirements {
    fn default() -> Self {
        Self::full_unaligned_access_support()
    }
}

/// An operator the target may not implement
#[derive(Debug, Clone, Copy)]
pub struct OptionalOperator<'z> {
    supported: bool,
    op: &'z Operator,
}

impl<'z> OptionalOperator<'z> {
    /// Wrap an operator together with its support bit
    pub fn new(supported: bool, op: &'z Operator) -> Self {
        Self { supported, op }
    }

    /// Whether the target implements the operator
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// The operator. Panics if it is not supported.
    pub fn op(&self) -> &'z Operator {
        assert!(self.supported, "{} is not supported", self.op.mnemonic());
        self.op
    }

    /// The operator regardless of support, for building placeholder nodes.
    pub fn placeholder(&self) -> &'z Operator {
        self.op
    }
}

/// Serializable description of a cached operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorSummary {
    /// Opcode
    pub opcode: IrOpcode,
    /// Mnemonic
    pub mnemonic: &'static str,
    /// Properties
    pub properties: OperatorProperties,
    /// Edge counts
    pub arity: Arity,
}

/// Factory for machine-level operators of one compilation unit
pub struct MachineOperatorBuilder<'z> {
    zone: &'z Zone,
    word: MachineRepresentation,
    flags: MachineOperatorFlags,
    alignment_requirements: AlignmentRequirements,
}

impl<'z> MachineOperatorBuilder<'z> {
    /// Create a builder for a target with the given word representation
    pub fn new(
        zone: &'z Zone,
        word: MachineRepresentation,
        flags: MachineOperatorFlags,
        alignment_requirements: AlignmentRequirements,
    ) -> Self {
        assert!(
            matches!(
                word,
                MachineRepresentation::Word32 | MachineRepresentation::Word64
            ),
            "word representation must be word32 or word64, got {word}"
        );
        Self {
            zone,
            word,
            flags,
            alignment_requirements,
        }
    }

    /// 64-bit target, no optional operators, full unaligned support
    pub fn with_defaults(zone: &'z Zone) -> Self {
        Self::new(
            zone,
            MachineRepresentation::Word64,
            MachineOperatorFlags::NO_FLAGS,
            AlignmentRequirements::default(),
        )
    }

    /// Zone backing uncached operators
    pub fn zone(&self) -> &'z Zone {
        self.zone
    }

    /// Word representation
    pub fn word(&self) -> MachineRepresentation {
        self.word
    }

    /// Whether the target word is 32 bits
    pub fn is32(&self) -> bool {
        self.word == MachineRepresentation::Word32
    }

    /// Whether the target word is 64 bits
    pub fn is64(&self) -> bool {
        self.word == MachineRepresentation::Word64
    }

    /// Optional feature flags
    pub fn flags(&self) -> MachineOperatorFlags {
        self.flags
    }

    /// Unaligned access capabilities
    pub fn alignment_requirements(&self) -> &AlignmentRequirements {
        &self.alignment_requirements
    }

    /// Whether an unaligned load of `rep` can be emitted as a plain load
    pub fn unaligned_load_supported(&self, rep: MachineRepresentation) -> bool {
        self.alignment_requirements.is_unaligned_load_supported(rep)
    }

    /// Whether an unaligned store of `rep` can be emitted as a plain store
    pub fn unaligned_store_supported(&self, rep: MachineRepresentation) -> bool {
        self.alignment_requirements.is_unaligned_store_supported(rep)
    }

    /// Every cached parameterless operator
    pub fn catalog(&self) -> Vec<OperatorSummary> {
        OperatorCache::global()
            .statics()
            .into_iter()
            .map(|op| OperatorSummary {
                opcode: op.opcode(),
                mnemonic: op.mnemonic(),
                properties: op.properties(),
                arity: op.arity(),
            })
            .collect()
    }

    /// The catalog as pretty-printed JSON
    pub fn catalog_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.catalog())
    }

    fn interned(
        &self,
        opcode: IrOpcode,
        properties: OperatorProperties,
        arity: Arity,
        parameter: OpParameter,
    ) -> &'z Operator {
        OperatorCache::global().intern(Operator::with_parameter(
            opcode,
            properties,
            opcode.mnemonic(),
            arity,
            parameter,
        ))
    }

    fn zone_allocated(
        &self,
        opcode: IrOpcode,
        properties: OperatorProperties,
        arity: Arity,
        parameter: OpParameter,
    ) -> &'z Operator {
        self.zone.new_operator(Operator::with_parameter(
            opcode,
            properties,
            opcode.mnemonic(),
            arity,
            parameter,
        ))
    }
}

macro_rules! pure_operators {
    ($table:ident; $( $method:ident => $opcode:ident($($prop:ident)|*; $vi:literal, $ci:literal, $vo:literal); )*) => {
        pub(crate) const $table: &[StaticOperator] = &[
            $(
                StaticOperator {
                    opcode: IrOpcode::$opcode,
                    properties: OperatorProperties::PURE $(.union(OperatorProperties::$prop))*,
                    arity: Arity::new($vi, 0, $ci, $vo, 0, 0),
                },
            )*
        ];

        impl<'z> MachineOperatorBuilder<'z> {
            $(
                #[doc = concat!("`", stringify!($opcode), "`")]
                #[inline]
                pub fn $method(&self) -> &'z Operator {
                    OperatorCache::global().get_static(IrOpcode::$opcode)
                }
            )*
        }
    };
}

macro_rules! optional_operators {
    ($table:ident; $( $method:ident => $opcode:ident[$flag:ident]($($prop:ident)|*; $vi:literal, $ci:literal, $vo:literal); )*) => {
        pub(crate) const $table: &[StaticOperator] = &[
            $(
                StaticOperator {
                    opcode: IrOpcode::$opcode,
                    properties: OperatorProperties::PURE $(.union(OperatorProperties::$prop))*,
                    arity: Arity::new($vi, 0, $ci, $vo, 0, 0),
                },
            )*
        ];

        impl<'z> MachineOperatorBuilder<'z> {
            $(
                #[doc = concat!("`", stringify!($opcode), "`, if the target implements it")]
                #[inline]
                pub fn $method(&self) -> OptionalOperator<'z> {
                    OptionalOperator::new(
                        self.flags.contains(MachineOperatorFlags::$flag),
                        OperatorCache::global().get_static(IrOpcode::$opcode),
                    )
                }
            )*
        }
    };
}

macro_rules! overflow_operators {
    ($table:ident; $( $method:ident => $opcode:ident($($prop:ident)|*); )*) => {
        pub(crate) const $table: &[StaticOperator] = &[
            $(
                StaticOperator {
                    opcode: IrOpcode::$opcode,
                    properties: OperatorProperties::ELIMINATABLE
                        .union(OperatorProperties::NO_READ)
                        $(.union(OperatorProperties::$prop))*,
                    arity: Arity::new(2, 0, 1, 2, 0, 0),
                },
            )*
        ];

        impl<'z> MachineOperatorBuilder<'z> {
            $(
                #[doc = concat!("`", stringify!($opcode), "`: produces the result and the overflow bit")]
                #[inline]
                pub fn $method(&self) -> &'z Operator {
                    OperatorCache::global().get_static(IrOpcode::$opcode)
                }
            )*
        }
    };
}

macro_rules! static_operators {
    ($table:ident; $( $method:ident => $opcode:ident($($prop:ident)|*; [$vi:literal, $ei:literal, $ci:literal, $vo:literal, $eo:literal, $co:literal]); )*) => {
        pub(crate) const $table: &[StaticOperator] = &[
            $(
                StaticOperator {
                    opcode: IrOpcode::$opcode,
                    properties: OperatorProperties::NO_PROPERTIES $(.union(OperatorProperties::$prop))*,
                    arity: Arity::new($vi, $ei, $ci, $vo, $eo, $co),
                },
            )*
        ];

        impl<'z> MachineOperatorBuilder<'z> {
            $(
                #[doc = concat!("`", stringify!($opcode), "`")]
                #[inline]
                pub fn $method(&self) -> &'z Operator {
                    OperatorCache::global().get_static(IrOpcode::$opcode)
                }
            )*
        }
    };
}

pure_operators! { PURE_OPERATORS;
    // ==================== Word32 ====================
    word32_and => Word32And(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    word32_or => Word32Or(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    word32_xor => Word32Xor(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    word32_shl => Word32Shl(NO_PROPERTIES; 2, 0, 1);
    word32_shr => Word32Shr(NO_PROPERTIES; 2, 0, 1);
    word32_ror => Word32Ror(NO_PROPERTIES; 2, 0, 1);
    word32_equal => Word32Equal(COMMUTATIVE; 2, 0, 1);
    word32_clz => Word32Clz(NO_PROPERTIES; 1, 0, 1);
    word32_reverse_bytes => Word32ReverseBytes(NO_PROPERTIES; 1, 0, 1);

    // ==================== Word64 ====================
    word64_and => Word64And(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    word64_or => Word64Or(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    word64_xor => Word64Xor(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    word64_shl => Word64Shl(NO_PROPERTIES; 2, 0, 1);
    word64_shr => Word64Shr(NO_PROPERTIES; 2, 0, 1);
    word64_ror => Word64Ror(NO_PROPERTIES; 2, 0, 1);
    word64_equal => Word64Equal(COMMUTATIVE; 2, 0, 1);
    word64_clz => Word64Clz(NO_PROPERTIES; 1, 0, 1);
    word64_reverse_bytes => Word64ReverseBytes(NO_PROPERTIES; 1, 0, 1);

    // ==================== Int32 ====================
    int32_add => Int32Add(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    int32_sub => Int32Sub(NO_PROPERTIES; 2, 0, 1);
    int32_mul => Int32Mul(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    int32_mul_high => Int32MulHigh(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    int32_div => Int32Div(NO_PROPERTIES; 2, 1, 1);
    int32_mod => Int32Mod(NO_PROPERTIES; 2, 1, 1);
    int32_less_than => Int32LessThan(NO_PROPERTIES; 2, 0, 1);
    int32_less_than_or_equal => Int32LessThanOrEqual(NO_PROPERTIES; 2, 0, 1);
    uint32_div => Uint32Div(NO_PROPERTIES; 2, 1, 1);
    uint32_mod => Uint32Mod(NO_PROPERTIES; 2, 1, 1);
    uint32_mul_high => Uint32MulHigh(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    uint32_less_than => Uint32LessThan(NO_PROPERTIES; 2, 0, 1);
    uint32_less_than_or_equal => Uint32LessThanOrEqual(NO_PROPERTIES; 2, 0, 1);

    // ==================== Int64 ====================
    int64_add => Int64Add(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    int64_sub => Int64Sub(NO_PROPERTIES; 2, 0, 1);
    int64_mul => Int64Mul(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    int64_div => Int64Div(NO_PROPERTIES; 2, 1, 1);
    int64_mod => Int64Mod(NO_PROPERTIES; 2, 1, 1);
    int64_less_than => Int64LessThan(NO_PROPERTIES; 2, 0, 1);
    int64_less_than_or_equal => Int64LessThanOrEqual(NO_PROPERTIES; 2, 0, 1);
    uint64_div => Uint64Div(NO_PROPERTIES; 2, 1, 1);
    uint64_mod => Uint64Mod(NO_PROPERTIES; 2, 1, 1);
    uint64_less_than => Uint64LessThan(NO_PROPERTIES; 2, 0, 1);
    uint64_less_than_or_equal => Uint64LessThanOrEqual(NO_PROPERTIES; 2, 0, 1);

    // ==================== Conversions ====================
    bitcast_word32_to_word64 => BitcastWord32ToWord64(NO_PROPERTIES; 1, 0, 1);
    bitcast_float32_to_int32 => BitcastFloat32ToInt32(NO_PROPERTIES; 1, 0, 1);
    bitcast_float64_to_int64 => BitcastFloat64ToInt64(NO_PROPERTIES; 1, 0, 1);
    bitcast_int32_to_float32 => BitcastInt32ToFloat32(NO_PROPERTIES; 1, 0, 1);
    bitcast_int64_to_float64 => BitcastInt64ToFloat64(NO_PROPERTIES; 1, 0, 1);
    change_float32_to_float64 => ChangeFloat32ToFloat64(NO_PROPERTIES; 1, 0, 1);
    change_float64_to_int32 => ChangeFloat64ToInt32(NO_PROPERTIES; 1, 0, 1);
    change_float64_to_int64 => ChangeFloat64ToInt64(NO_PROPERTIES; 1, 0, 1);
    change_float64_to_uint32 => ChangeFloat64ToUint32(NO_PROPERTIES; 1, 0, 1);
    change_float64_to_uint64 => ChangeFloat64ToUint64(NO_PROPERTIES; 1, 0, 1);
    change_int32_to_float64 => ChangeInt32ToFloat64(NO_PROPERTIES; 1, 0, 1);
    change_int32_to_int64 => ChangeInt32ToInt64(NO_PROPERTIES; 1, 0, 1);
    change_int64_to_float64 => ChangeInt64ToFloat64(NO_PROPERTIES; 1, 0, 1);
    change_uint32_to_float64 => ChangeUint32ToFloat64(NO_PROPERTIES; 1, 0, 1);
    change_uint32_to_uint64 => ChangeUint32ToUint64(NO_PROPERTIES; 1, 0, 1);
    truncate_float32_to_int32 => TruncateFloat32ToInt32(NO_PROPERTIES; 1, 0, 1);
    truncate_float32_to_uint32 => TruncateFloat32ToUint32(NO_PROPERTIES; 1, 0, 1);
    truncate_float64_to_float32 => TruncateFloat64ToFloat32(NO_PROPERTIES; 1, 0, 1);
    truncate_float64_to_int64 => TruncateFloat64ToInt64(NO_PROPERTIES; 1, 0, 1);
    truncate_float64_to_uint32 => TruncateFloat64ToUint32(NO_PROPERTIES; 1, 0, 1);
    truncate_int64_to_int32 => TruncateInt64ToInt32(NO_PROPERTIES; 1, 0, 1);
    try_truncate_float32_to_int64 => TryTruncateFloat32ToInt64(NO_PROPERTIES; 1, 0, 2);
    try_truncate_float64_to_int64 => TryTruncateFloat64ToInt64(NO_PROPERTIES; 1, 0, 2);
    try_truncate_float32_to_uint64 => TryTruncateFloat32ToUint64(NO_PROPERTIES; 1, 0, 2);
    try_truncate_float64_to_uint64 => TryTruncateFloat64ToUint64(NO_PROPERTIES; 1, 0, 2);
    round_float64_to_int32 => RoundFloat64ToInt32(NO_PROPERTIES; 1, 0, 1);
    round_int32_to_float32 => RoundInt32ToFloat32(NO_PROPERTIES; 1, 0, 1);
    round_int64_to_float32 => RoundInt64ToFloat32(NO_PROPERTIES; 1, 0, 1);
    round_int64_to_float64 => RoundInt64ToFloat64(NO_PROPERTIES; 1, 0, 1);
    round_uint32_to_float32 => RoundUint32ToFloat32(NO_PROPERTIES; 1, 0, 1);
    round_uint64_to_float32 => RoundUint64ToFloat32(NO_PROPERTIES; 1, 0, 1);
    round_uint64_to_float64 => RoundUint64ToFloat64(NO_PROPERTIES; 1, 0, 1);
    sign_extend_word8_to_int32 => SignExtendWord8ToInt32(NO_PROPERTIES; 1, 0, 1);
    sign_extend_word16_to_int32 => SignExtendWord16ToInt32(NO_PROPERTIES; 1, 0, 1);
    sign_extend_word8_to_int64 => SignExtendWord8ToInt64(NO_PROPERTIES; 1, 0, 1);
    sign_extend_word16_to_int64 => SignExtendWord16ToInt64(NO_PROPERTIES; 1, 0, 1);
    sign_extend_word32_to_int64 => SignExtendWord32ToInt64(NO_PROPERTIES; 1, 0, 1);

    // ==================== Float32 ====================
    float32_abs => Float32Abs(NO_PROPERTIES; 1, 0, 1);
    float32_add => Float32Add(COMMUTATIVE; 2, 0, 1);
    float32_sub => Float32Sub(NO_PROPERTIES; 2, 0, 1);
    float32_mul => Float32Mul(COMMUTATIVE; 2, 0, 1);
    float32_div => Float32Div(NO_PROPERTIES; 2, 0, 1);
    float32_neg => Float32Neg(NO_PROPERTIES; 1, 0, 1);
    float32_sqrt => Float32Sqrt(NO_PROPERTIES; 1, 0, 1);
    float32_max => Float32Max(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    float32_min => Float32Min(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    float32_equal => Float32Equal(COMMUTATIVE; 2, 0, 1);
    float32_less_than => Float32LessThan(NO_PROPERTIES; 2, 0, 1);
    float32_less_than_or_equal => Float32LessThanOrEqual(NO_PROPERTIES; 2, 0, 1);

    // ==================== Float64 ====================
    float64_abs => Float64Abs(NO_PROPERTIES; 1, 0, 1);
    float64_add => Float64Add(COMMUTATIVE; 2, 0, 1);
    float64_sub => Float64Sub(NO_PROPERTIES; 2, 0, 1);
    float64_mul => Float64Mul(COMMUTATIVE; 2, 0, 1);
    float64_div => Float64Div(NO_PROPERTIES; 2, 0, 1);
    float64_mod => Float64Mod(NO_PROPERTIES; 2, 0, 1);
    float64_neg => Float64Neg(NO_PROPERTIES; 1, 0, 1);
    float64_sqrt => Float64Sqrt(NO_PROPERTIES; 1, 0, 1);
    float64_max => Float64Max(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    float64_min => Float64Min(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    float64_pow => Float64Pow(NO_PROPERTIES; 2, 0, 1);
    float64_atan2 => Float64Atan2(NO_PROPERTIES; 2, 0, 1);
    float64_exp => Float64Exp(NO_PROPERTIES; 1, 0, 1);
    float64_log => Float64Log(NO_PROPERTIES; 1, 0, 1);
    float64_sin => Float64Sin(NO_PROPERTIES; 1, 0, 1);
    float64_cos => Float64Cos(NO_PROPERTIES; 1, 0, 1);
    float64_silence_nan => Float64SilenceNaN(NO_PROPERTIES; 1, 0, 1);
    float64_equal => Float64Equal(COMMUTATIVE; 2, 0, 1);
    float64_less_than => Float64LessThan(NO_PROPERTIES; 2, 0, 1);
    float64_less_than_or_equal => Float64LessThanOrEqual(NO_PROPERTIES; 2, 0, 1);
    float64_extract_low_word32 => Float64ExtractLowWord32(NO_PROPERTIES; 1, 0, 1);
    float64_extract_high_word32 => Float64ExtractHighWord32(NO_PROPERTIES; 1, 0, 1);
    float64_insert_low_word32 => Float64InsertLowWord32(NO_PROPERTIES; 2, 0, 1);
    float64_insert_high_word32 => Float64InsertHighWord32(NO_PROPERTIES; 2, 0, 1);

    // ==================== Frame ====================
    load_stack_pointer => LoadStackPointer(NO_PROPERTIES; 0, 0, 1);
    load_frame_pointer => LoadFramePointer(NO_PROPERTIES; 0, 0, 1);
    load_parent_frame_pointer => LoadParentFramePointer(NO_PROPERTIES; 0, 0, 1);
    bitcast_tagged_signed_to_word => BitcastTaggedSignedToWord(NO_PROPERTIES; 1, 0, 1);

    // ==================== Pairs ====================
    int32_pair_add => Int32PairAdd(NO_PROPERTIES; 4, 0, 2);
    int32_pair_sub => Int32PairSub(NO_PROPERTIES; 4, 0, 2);
    int32_pair_mul => Int32PairMul(NO_PROPERTIES; 4, 0, 2);
    word32_pair_shl => Word32PairShl(NO_PROPERTIES; 3, 0, 2);
    word32_pair_shr => Word32PairShr(NO_PROPERTIES; 3, 0, 2);
    word32_pair_sar => Word32PairSar(NO_PROPERTIES; 3, 0, 2);

    // ==================== SIMD ====================
    f64x2_splat => F64x2Splat(NO_PROPERTIES; 1, 0, 1);
    f64x2_abs => F64x2Abs(NO_PROPERTIES; 1, 0, 1);
    f64x2_neg => F64x2Neg(NO_PROPERTIES; 1, 0, 1);
    f64x2_sqrt => F64x2Sqrt(NO_PROPERTIES; 1, 0, 1);
    f64x2_add => F64x2Add(COMMUTATIVE; 2, 0, 1);
    f64x2_sub => F64x2Sub(NO_PROPERTIES; 2, 0, 1);
    f64x2_mul => F64x2Mul(COMMUTATIVE; 2, 0, 1);
    f64x2_div => F64x2Div(NO_PROPERTIES; 2, 0, 1);
    f64x2_min => F64x2Min(COMMUTATIVE; 2, 0, 1);
    f64x2_max => F64x2Max(COMMUTATIVE; 2, 0, 1);
    f64x2_eq => F64x2Eq(COMMUTATIVE; 2, 0, 1);
    f64x2_ne => F64x2Ne(COMMUTATIVE; 2, 0, 1);
    f64x2_lt => F64x2Lt(NO_PROPERTIES; 2, 0, 1);
    f64x2_le => F64x2Le(NO_PROPERTIES; 2, 0, 1);
    f32x4_splat => F32x4Splat(NO_PROPERTIES; 1, 0, 1);
    f32x4_abs => F32x4Abs(NO_PROPERTIES; 1, 0, 1);
    f32x4_neg => F32x4Neg(NO_PROPERTIES; 1, 0, 1);
    f32x4_add => F32x4Add(COMMUTATIVE; 2, 0, 1);
    f32x4_sub => F32x4Sub(NO_PROPERTIES; 2, 0, 1);
    f32x4_mul => F32x4Mul(COMMUTATIVE; 2, 0, 1);
    f32x4_min => F32x4Min(COMMUTATIVE; 2, 0, 1);
    f32x4_max => F32x4Max(COMMUTATIVE; 2, 0, 1);
    f32x4_eq => F32x4Eq(COMMUTATIVE; 2, 0, 1);
    f32x4_ne => F32x4Ne(COMMUTATIVE; 2, 0, 1);
    i64x2_splat => I64x2Splat(NO_PROPERTIES; 1, 0, 1);
    i64x2_splat_i32_pair => I64x2SplatI32Pair(NO_PROPERTIES; 2, 0, 1);
    i64x2_neg => I64x2Neg(NO_PROPERTIES; 1, 0, 1);
    i64x2_add => I64x2Add(COMMUTATIVE; 2, 0, 1);
    i64x2_sub => I64x2Sub(NO_PROPERTIES; 2, 0, 1);
    i64x2_mul => I64x2Mul(COMMUTATIVE; 2, 0, 1);
    i32x4_splat => I32x4Splat(NO_PROPERTIES; 1, 0, 1);
    i32x4_neg => I32x4Neg(NO_PROPERTIES; 1, 0, 1);
    i32x4_add => I32x4Add(COMMUTATIVE; 2, 0, 1);
    i32x4_sub => I32x4Sub(NO_PROPERTIES; 2, 0, 1);
    i32x4_mul => I32x4Mul(COMMUTATIVE; 2, 0, 1);
    i32x4_min_s => I32x4MinS(COMMUTATIVE; 2, 0, 1);
    i32x4_max_s => I32x4MaxS(COMMUTATIVE; 2, 0, 1);
    i32x4_eq => I32x4Eq(COMMUTATIVE; 2, 0, 1);
    i32x4_ne => I32x4Ne(COMMUTATIVE; 2, 0, 1);
    i16x8_splat => I16x8Splat(NO_PROPERTIES; 1, 0, 1);
    i16x8_add => I16x8Add(COMMUTATIVE; 2, 0, 1);
    i16x8_sub => I16x8Sub(NO_PROPERTIES; 2, 0, 1);
    i16x8_mul => I16x8Mul(COMMUTATIVE; 2, 0, 1);
    i16x8_eq => I16x8Eq(COMMUTATIVE; 2, 0, 1);
    i8x16_splat => I8x16Splat(NO_PROPERTIES; 1, 0, 1);
    i8x16_add => I8x16Add(COMMUTATIVE; 2, 0, 1);
    i8x16_sub => I8x16Sub(NO_PROPERTIES; 2, 0, 1);
    i8x16_eq => I8x16Eq(COMMUTATIVE; 2, 0, 1);
    s128_zero => S128Zero(NO_PROPERTIES; 0, 0, 1);
    s128_and => S128And(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    s128_or => S128Or(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    s128_xor => S128Xor(ASSOCIATIVE | COMMUTATIVE; 2, 0, 1);
    s128_not => S128Not(NO_PROPERTIES; 1, 0, 1);
    s128_select => S128Select(NO_PROPERTIES; 3, 0, 1);
    v8x16_any_true => V8x16AnyTrue(NO_PROPERTIES; 1, 0, 1);
    v8x16_all_true => V8x16AllTrue(NO_PROPERTIES; 1, 0, 1);
}

optional_operators! { OPTIONAL_OPERATORS;
    word32_ctz => Word32Ctz[WORD32_CTZ](NO_PROPERTIES; 1, 0, 1);
    word64_ctz => Word64Ctz[WORD64_CTZ](NO_PROPERTIES; 1, 0, 1);
    word32_rol => Word32Rol[WORD32_ROL](NO_PROPERTIES; 2, 0, 1);
    word64_rol => Word64Rol[WORD64_ROL](NO_PROPERTIES; 2, 0, 1);
    word32_reverse_bits => Word32ReverseBits[WORD32_REVERSE_BITS](NO_PROPERTIES; 1, 0, 1);
    word64_reverse_bits => Word64ReverseBits[WORD64_REVERSE_BITS](NO_PROPERTIES; 1, 0, 1);
    int32_abs_with_overflow => Int32AbsWithOverflow[INT32_ABS_WITH_OVERFLOW](NO_PROPERTIES; 1, 0, 2);
    int64_abs_with_overflow => Int64AbsWithOverflow[INT64_ABS_WITH_OVERFLOW](NO_PROPERTIES; 1, 0, 2);
    word32_popcnt => Word32Popcnt[WORD32_POPCNT](NO_PROPERTIES; 1, 0, 1);
    word64_popcnt => Word64Popcnt[WORD64_POPCNT](NO_PROPERTIES; 1, 0, 1);
    float32_round_down => Float32RoundDown[FLOAT32_ROUND_DOWN](NO_PROPERTIES; 1, 0, 1);
    float64_round_down => Float64RoundDown[FLOAT64_ROUND_DOWN](NO_PROPERTIES; 1, 0, 1);
    float32_round_up => Float32RoundUp[FLOAT32_ROUND_UP](NO_PROPERTIES; 1, 0, 1);
    float64_round_up => Float64RoundUp[FLOAT64_ROUND_UP](NO_PROPERTIES; 1, 0, 1);
    float32_round_truncate => Float32RoundTruncate[FLOAT32_ROUND_TRUNCATE](NO_PROPERTIES; 1, 0, 1);
    float64_round_truncate => Float64RoundTruncate[FLOAT64_ROUND_TRUNCATE](NO_PROPERTIES; 1, 0, 1);
    float64_round_ties_away => Float64RoundTiesAway[FLOAT64_ROUND_TIES_AWAY](NO_PROPERTIES; 1, 0, 1);
    float32_round_ties_even => Float32RoundTiesEven[FLOAT32_ROUND_TIES_EVEN](NO_PROPERTIES; 1, 0, 1);
    float64_round_ties_even => Float64RoundTiesEven[FLOAT64_ROUND_TIES_EVEN](NO_PROPERTIES; 1, 0, 1);
}

overflow_operators! { OVERFLOW_OPERATORS;
    int32_add_with_overflow => Int32AddWithOverflow(ASSOCIATIVE | COMMUTATIVE);
    int32_sub_with_overflow => Int32SubWithOverflow(NO_PROPERTIES);
    int32_mul_with_overflow => Int32MulWithOverflow(ASSOCIATIVE | COMMUTATIVE);
    int64_add_with_overflow => Int64AddWithOverflow(ASSOCIATIVE | COMMUTATIVE);
    int64_sub_with_overflow => Int64SubWithOverflow(NO_PROPERTIES);
}

static_operators! { MISC_OPERATORS;
    memory_barrier => MemoryBarrier(NO_DEOPT | NO_THROW; [0, 1, 1, 0, 1, 0]);
    bitcast_word_to_tagged => BitcastWordToTagged(ELIMINATABLE | NO_WRITE; [1, 1, 1, 1, 1, 0]);
    bitcast_tagged_to_word => BitcastTaggedToWord(ELIMINATABLE | NO_WRITE; [1, 1, 1, 1, 1, 0]);
    abort_csa_assert => AbortCSAAssert(NO_THROW; [1, 1, 1, 0, 1, 0]);
    debug_break => DebugBreak(NO_THROW; [0, 1, 1, 0, 1, 0]);
    unsafe_pointer_add => UnsafePointerAdd(KONTROL; [2, 1, 1, 1, 1, 0]);

    // ==================== Atomic pairs ====================
    word32_atomic_pair_load => Word32AtomicPairLoad(NO_DEOPT | NO_THROW; [2, 1, 1, 2, 1, 0]);
    word32_atomic_pair_store => Word32AtomicPairStore(NO_DEOPT | NO_THROW; [4, 1, 1, 0, 1, 0]);
    word32_atomic_pair_add => Word32AtomicPairAdd(NO_DEOPT | NO_THROW; [4, 1, 1, 2, 1, 0]);
    word32_atomic_pair_sub => Word32AtomicPairSub(NO_DEOPT | NO_THROW; [4, 1, 1, 2, 1, 0]);
    word32_atomic_pair_and => Word32AtomicPairAnd(NO_DEOPT | NO_THROW; [4, 1, 1, 2, 1, 0]);
    word32_atomic_pair_or => Word32AtomicPairOr(NO_DEOPT | NO_THROW; [4, 1, 1, 2, 1, 0]);
    word32_atomic_pair_xor => Word32AtomicPairXor(NO_DEOPT | NO_THROW; [4, 1, 1, 2, 1, 0]);
    word32_atomic_pair_exchange => Word32AtomicPairExchange(NO_DEOPT | NO_THROW; [4, 1, 1, 2, 1, 0]);
    word32_atomic_pair_compare_exchange => Word32AtomicPairCompareExchange(NO_DEOPT | NO_THROW; [6, 1, 1, 2, 1, 0]);
}

/// Tables seeding the operator cache.
pub(crate) const STATIC_TABLES: &[&[StaticOperator]] = &[
    PURE_OPERATORS,
    OPTIONAL_OPERATORS,
    OVERFLOW_OPERATORS,
    MISC_OPERATORS,
];

/// Stack slots common enough to be cached: (size, alignment).
const CACHED_STACK_SLOTS: [(i32, i32); 6] = [(4, 0), (8, 0), (16, 0), (4, 4), (8, 8), (16, 16)];

// Memory access arities.
const LOAD_ARITY: Arity = Arity::new(2, 1, 1, 1, 1, 0);
const STORE_ARITY: Arity = Arity::new(3, 1, 1, 0, 1, 0);

fn store_properties() -> OperatorProperties {
    OperatorProperties::NO_DEOPT | OperatorProperties::NO_READ | OperatorProperties::NO_THROW
}

fn atomic_rmw_properties() -> OperatorProperties {
    OperatorProperties::NO_DEOPT | OperatorProperties::NO_THROW
}

fn check_loadable(opcode: IrOpcode, rep: LoadRepresentation) {
    if !MachineType::LOADABLE.contains(&rep) {
        unreachable!("{} does not support {rep}", opcode.mnemonic());
    }
}

fn check_storable(opcode: IrOpcode, rep: MachineRepresentation) {
    if !MachineRepresentation::MEMORY.contains(&rep) {
        unreachable!("{} does not support {rep}", opcode.mnemonic());
    }
}

impl<'z> MachineOperatorBuilder<'z> {
    // ==================== Shifts ====================

    /// Arithmetic right shift of a word32
    pub fn word32_sar(&self, kind: ShiftKind) -> &'z Operator {
        self.interned(
            IrOpcode::Word32Sar,
            OperatorProperties::PURE,
            Arity::new(2, 0, 0, 1, 0, 0),
            OpParameter::Shift(kind),
        )
    }

    /// Arithmetic right shift of a word64
    pub fn word64_sar(&self, kind: ShiftKind) -> &'z Operator {
        self.interned(
            IrOpcode::Word64Sar,
            OperatorProperties::PURE,
            Arity::new(2, 0, 0, 1, 0, 0),
            OpParameter::Shift(kind),
        )
    }

    // ==================== Loads ====================

    /// `Load`: inputs (base, index), one effect, one control.
    ///
    /// Panics if `rep` is not a loadable machine type.
    pub fn load(&self, rep: LoadRepresentation) -> &'z Operator {
        check_loadable(IrOpcode::Load, rep);
        self.interned(
            IrOpcode::Load,
            OperatorProperties::ELIMINATABLE,
            LOAD_ARITY,
            OpParameter::MachineType(rep),
        )
    }

    /// Load whose result is masked under speculation
    pub fn poisoned_load(&self, rep: LoadRepresentation) -> &'z Operator {
        check_loadable(IrOpcode::PoisonedLoad, rep);
        self.interned(
            IrOpcode::PoisonedLoad,
            OperatorProperties::ELIMINATABLE,
            LOAD_ARITY,
            OpParameter::MachineType(rep),
        )
    }

    /// Possibly unaligned load
    pub fn unaligned_load(&self, rep: LoadRepresentation) -> &'z Operator {
        check_loadable(IrOpcode::UnalignedLoad, rep);
        self.interned(
            IrOpcode::UnalignedLoad,
            OperatorProperties::ELIMINATABLE,
            LOAD_ARITY,
            OpParameter::MachineType(rep),
        )
    }

    /// Load guarded by the trap handler; may fault, so it is not eliminatable
    pub fn protected_load(&self, rep: LoadRepresentation) -> &'z Operator {
        check_loadable(IrOpcode::ProtectedLoad, rep);
        self.interned(
            IrOpcode::ProtectedLoad,
            OperatorProperties::NO_DEOPT | OperatorProperties::NO_THROW,
            LOAD_ARITY,
            OpParameter::MachineType(rep),
        )
    }

    /// SIMD load with a splat or extension transformation
    pub fn load_transform(&self, kind: LoadKind, transformation: LoadTransformation) -> &'z Operator {
        self.interned(
            IrOpcode::LoadTransform,
            OperatorProperties::ELIMINATABLE,
            LOAD_ARITY,
            OpParameter::LoadTransform(LoadTransformParameters {
                kind,
                transformation,
            }),
        )
    }

    // ==================== Stores ====================

    /// `Store`: inputs (base, index, value), one effect, one control.
    ///
    /// Panics if the representation cannot be stored.
    pub fn store(&self, rep: StoreRepresentation) -> &'z Operator {
        check_storable(IrOpcode::Store, rep.representation());
        self.interned(
            IrOpcode::Store,
            store_properties(),
            STORE_ARITY,
            OpParameter::Store(rep),
        )
    }

    /// Possibly unaligned store; never has a write barrier
    pub fn unaligned_store(&self, rep: MachineRepresentation) -> &'z Operator {
        check_storable(IrOpcode::UnalignedStore, rep);
        self.interned(
            IrOpcode::UnalignedStore,
            store_properties(),
            STORE_ARITY,
            OpParameter::Representation(rep),
        )
    }

    /// Store guarded by the trap handler; never has a write barrier
    pub fn protected_store(&self, rep: MachineRepresentation) -> &'z Operator {
        check_storable(IrOpcode::ProtectedStore, rep);
        self.interned(
            IrOpcode::ProtectedStore,
            store_properties(),
            STORE_ARITY,
            OpParameter::Store(StoreRepresentation::new(
                rep,
                crate::machine_operator::WriteBarrierKind::NoWriteBarrier,
            )),
        )
    }

    // ==================== Stack ====================

    /// Stack slot of `size` bytes aligned to `alignment` (0 means default).
    ///
    /// Panics unless `alignment` is 0, 4, 8 or 16 and `size` is non-negative.
    pub fn stack_slot(&self, size: i32, alignment: i32) -> &'z Operator {
        assert!(size >= 0, "stack slot size must be non-negative, got {size}");
        assert!(
            matches!(alignment, 0 | 4 | 8 | 16),
            "stack slot alignment must be 0, 4, 8 or 16, got {alignment}"
        );
        let properties = OperatorProperties::NO_DEOPT | OperatorProperties::NO_THROW;
        let arity = Arity::new(0, 0, 0, 1, 0, 0);
        let parameter = OpParameter::StackSlot(StackSlotRepresentation::new(size, alignment));
        if CACHED_STACK_SLOTS.contains(&(size, alignment)) {
            self.interned(IrOpcode::StackSlot, properties, arity, parameter)
        } else {
            self.zone_allocated(IrOpcode::StackSlot, properties, arity, parameter)
        }
    }

    /// Stack slot sized for one value of `rep`
    pub fn stack_slot_for_representation(
        &self,
        rep: MachineRepresentation,
        alignment: i32,
    ) -> &'z Operator {
        self.stack_slot(rep.element_size() as i32, alignment)
    }

    /// Compare the stack pointer against a limit
    pub fn stack_pointer_greater_than(&self, kind: StackCheckKind) -> &'z Operator {
        self.interned(
            IrOpcode::StackPointerGreaterThan,
            OperatorProperties::ELIMINATABLE,
            Arity::new(1, 1, 0, 1, 1, 0),
            OpParameter::StackCheck(kind),
        )
    }

    /// Annotation carried into the generated code listing
    pub fn comment(&self, text: &str) -> &'z Operator {
        self.zone_allocated(
            IrOpcode::Comment,
            OperatorProperties::NO_THROW,
            Arity::new(0, 1, 1, 0, 1, 0),
            OpParameter::Comment(text.into()),
        )
    }

    // ==================== Atomics ====================

    fn atomic_word32_type(&self, opcode: IrOpcode, ty: MachineType) -> MachineType {
        if !MachineType::ATOMIC_WORD32.contains(&ty) {
            unreachable!("{} does not support {ty}", opcode.mnemonic());
        }
        ty
    }

    fn atomic_word64_type(&self, opcode: IrOpcode, ty: MachineType) -> MachineType {
        if !MachineType::ATOMIC_WORD64.contains(&ty) {
            unreachable!("{} does not support {ty}", opcode.mnemonic());
        }
        ty
    }

    fn atomic_rmw(&self, opcode: IrOpcode, ty: MachineType, value_in: u32) -> &'z Operator {
        self.interned(
            opcode,
            atomic_rmw_properties(),
            Arity::new(value_in, 1, 1, 1, 1, 0),
            OpParameter::MachineType(ty),
        )
    }

    /// Atomic load of a word32-sized or narrower value
    pub fn word32_atomic_load(&self, ty: LoadRepresentation) -> &'z Operator {
        let ty = self.atomic_word32_type(IrOpcode::Word32AtomicLoad, ty);
        self.interned(
            IrOpcode::Word32AtomicLoad,
            OperatorProperties::ELIMINATABLE,
            LOAD_ARITY,
            OpParameter::MachineType(ty),
        )
    }

    /// Atomic store of a word32-sized or narrower value
    pub fn word32_atomic_store(&self, rep: AtomicStoreRepresentation) -> &'z Operator {
        if !matches!(
            rep,
            MachineRepresentation::Word8
                | MachineRepresentation::Word16
                | MachineRepresentation::Word32
        ) {
            unreachable!("Word32AtomicStore does not support {rep}");
        }
        self.interned(
            IrOpcode::Word32AtomicStore,
            store_properties(),
            STORE_ARITY,
            OpParameter::Representation(rep),
        )
    }

    #[allow(missing_docs)]
    pub fn word32_atomic_add(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word32_type(IrOpcode::Word32AtomicAdd, ty);
        self.atomic_rmw(IrOpcode::Word32AtomicAdd, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word32_atomic_sub(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word32_type(IrOpcode::Word32AtomicSub, ty);
        self.atomic_rmw(IrOpcode::Word32AtomicSub, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word32_atomic_and(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word32_type(IrOpcode::Word32AtomicAnd, ty);
        self.atomic_rmw(IrOpcode::Word32AtomicAnd, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word32_atomic_or(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word32_type(IrOpcode::Word32AtomicOr, ty);
        self.atomic_rmw(IrOpcode::Word32AtomicOr, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word32_atomic_xor(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word32_type(IrOpcode::Word32AtomicXor, ty);
        self.atomic_rmw(IrOpcode::Word32AtomicXor, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word32_atomic_exchange(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word32_type(IrOpcode::Word32AtomicExchange, ty);
        self.atomic_rmw(IrOpcode::Word32AtomicExchange, ty, 3)
    }
    /// Inputs (base, index, expected, replacement)
    pub fn word32_atomic_compare_exchange(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word32_type(IrOpcode::Word32AtomicCompareExchange, ty);
        self.atomic_rmw(IrOpcode::Word32AtomicCompareExchange, ty, 4)
    }

    /// Atomic load of up to 64 bits
    pub fn word64_atomic_load(&self, ty: LoadRepresentation) -> &'z Operator {
        let ty = self.atomic_word64_type(IrOpcode::Word64AtomicLoad, ty);
        self.interned(
            IrOpcode::Word64AtomicLoad,
            OperatorProperties::ELIMINATABLE,
            LOAD_ARITY,
            OpParameter::MachineType(ty),
        )
    }

    /// Atomic store of up to 64 bits
    pub fn word64_atomic_store(&self, rep: AtomicStoreRepresentation) -> &'z Operator {
        if !matches!(
            rep,
            MachineRepresentation::Word8
                | MachineRepresentation::Word16
                | MachineRepresentation::Word32
                | MachineRepresentation::Word64
        ) {
            unreachable!("Word64AtomicStore does not support {rep}");
        }
        self.interned(
            IrOpcode::Word64AtomicStore,
            store_properties(),
            STORE_ARITY,
            OpParameter::Representation(rep),
        )
    }

    #[allow(missing_docs)]
    pub fn word64_atomic_add(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word64_type(IrOpcode::Word64AtomicAdd, ty);
        self.atomic_rmw(IrOpcode::Word64AtomicAdd, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word64_atomic_sub(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word64_type(IrOpcode::Word64AtomicSub, ty);
        self.atomic_rmw(IrOpcode::Word64AtomicSub, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word64_atomic_and(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word64_type(IrOpcode::Word64AtomicAnd, ty);
        self.atomic_rmw(IrOpcode::Word64AtomicAnd, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word64_atomic_or(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word64_type(IrOpcode::Word64AtomicOr, ty);
        self.atomic_rmw(IrOpcode::Word64AtomicOr, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word64_atomic_xor(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word64_type(IrOpcode::Word64AtomicXor, ty);
        self.atomic_rmw(IrOpcode::Word64AtomicXor, ty, 3)
    }
    #[allow(missing_docs)]
    pub fn word64_atomic_exchange(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word64_type(IrOpcode::Word64AtomicExchange, ty);
        self.atomic_rmw(IrOpcode::Word64AtomicExchange, ty, 3)
    }
    /// Inputs (base, index, expected, replacement)
    pub fn word64_atomic_compare_exchange(&self, ty: MachineType) -> &'z Operator {
        let ty = self.atomic_word64_type(IrOpcode::Word64AtomicCompareExchange, ty);
        self.atomic_rmw(IrOpcode::Word64AtomicCompareExchange, ty, 4)
    }

    // ==================== SIMD lanes ====================

    fn lane_op(
        &self,
        opcode: IrOpcode,
        shape: SimdShape,
        lane: u8,
        value_in: u32,
    ) -> &'z Operator {
        assert!(
            lane < shape.lane_count(),
            "lane {lane} out of range for {shape:?}"
        );
        self.zone_allocated(
            opcode,
            OperatorProperties::PURE,
            Arity::new(value_in, 0, 0, 1, 0, 0),
            OpParameter::Lane(lane),
        )
    }

    #[allow(missing_docs)]
    pub fn f64x2_extract_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::F64x2ExtractLane, SimdShape::F64x2, lane, 1)
    }
    #[allow(missing_docs)]
    pub fn f64x2_replace_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::F64x2ReplaceLane, SimdShape::F64x2, lane, 2)
    }
    #[allow(missing_docs)]
    pub fn f32x4_extract_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::F32x4ExtractLane, SimdShape::F32x4, lane, 1)
    }
    #[allow(missing_docs)]
    pub fn f32x4_replace_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::F32x4ReplaceLane, SimdShape::F32x4, lane, 2)
    }
    #[allow(missing_docs)]
    pub fn i64x2_extract_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I64x2ExtractLane, SimdShape::I64x2, lane, 1)
    }
    #[allow(missing_docs)]
    pub fn i64x2_replace_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I64x2ReplaceLane, SimdShape::I64x2, lane, 2)
    }
    /// Replace a 64-bit lane from a (low, high) word32 pair
    pub fn i64x2_replace_lane_i32_pair(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I64x2ReplaceLaneI32Pair, SimdShape::I64x2, lane, 3)
    }
    #[allow(missing_docs)]
    pub fn i32x4_extract_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I32x4ExtractLane, SimdShape::I32x4, lane, 1)
    }
    #[allow(missing_docs)]
    pub fn i32x4_replace_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I32x4ReplaceLane, SimdShape::I32x4, lane, 2)
    }
    #[allow(missing_docs)]
    pub fn i16x8_extract_lane_u(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I16x8ExtractLaneU, SimdShape::I16x8, lane, 1)
    }
    #[allow(missing_docs)]
    pub fn i16x8_extract_lane_s(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I16x8ExtractLaneS, SimdShape::I16x8, lane, 1)
    }
    #[allow(missing_docs)]
    pub fn i16x8_replace_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I16x8ReplaceLane, SimdShape::I16x8, lane, 2)
    }
    #[allow(missing_docs)]
    pub fn i8x16_extract_lane_u(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I8x16ExtractLaneU, SimdShape::I8x16, lane, 1)
    }
    #[allow(missing_docs)]
    pub fn i8x16_extract_lane_s(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I8x16ExtractLaneS, SimdShape::I8x16, lane, 1)
    }
    #[allow(missing_docs)]
    pub fn i8x16_replace_lane(&self, lane: u8) -> &'z Operator {
        self.lane_op(IrOpcode::I8x16ReplaceLane, SimdShape::I8x16, lane, 2)
    }

    /// Byte shuffle of two vectors. Indices 0..16 select from the first
    /// input, 16..32 from the second.
    pub fn s8x16_shuffle(&self, shuffle: &[u8; 16]) -> &'z Operator {
        assert!(
            shuffle.iter().all(|&lane| lane < 32),
            "shuffle lane out of range: {shuffle:?}"
        );
        self.zone_allocated(
            IrOpcode::S8x16Shuffle,
            OperatorProperties::PURE,
            Arity::new(2, 0, 0, 1, 0, 0),
            OpParameter::Shuffle(*shuffle),
        )
    }
}

macro_rules! word_size_aliases {
    ($( $alias:ident => $word32:ident | $word64:ident; )*) => {
        impl<'z> MachineOperatorBuilder<'z> {
            $(
                #[doc = concat!("`", stringify!($word32), "` or `", stringify!($word64), "` depending on the word size")]
                #[inline]
                pub fn $alias(&self) -> &'z Operator {
                    if self.is32() { self.$word32() } else { self.$word64() }
                }
            )*
        }
    };
}

word_size_aliases! {
    word_and => word32_and | word64_and;
    word_or => word32_or | word64_or;
    word_xor => word32_xor | word64_xor;
    word_shl => word32_shl | word64_shl;
    word_shr => word32_shr | word64_shr;
    word_ror => word32_ror | word64_ror;
    word_clz => word32_clz | word64_clz;
    word_equal => word32_equal | word64_equal;
    int_add => int32_add | int64_add;
    int_sub => int32_sub | int64_sub;
    int_mul => int32_mul | int64_mul;
    int_div => int32_div | int64_div;
    int_mod => int32_mod | int64_mod;
    int_less_than => int32_less_than | int64_less_than;
    int_less_than_or_equal => int32_less_than_or_equal | int64_less_than_or_equal;
    uint_div => uint32_div | uint64_div;
    uint_mod => uint32_mod | uint64_mod;
    uint_less_than => uint32_less_than | uint64_less_than;
}

impl<'z> MachineOperatorBuilder<'z> {
    /// Word-sized arithmetic right shift
    pub fn word_sar(&self, kind: ShiftKind) -> &'z Operator {
        if self.is32() {
            self.word32_sar(kind)
        } else {
            self.word64_sar(kind)
        }
    }

    /// Word-sized count trailing zeros, if supported
    pub fn word_ctz(&self) -> OptionalOperator<'z> {
        if self.is32() {
            self.word32_ctz()
        } else {
            self.word64_ctz()
        }
    }

    /// Word-sized population count, if supported
    pub fn word_popcnt(&self) -> OptionalOperator<'z> {
        if self.is32() {
            self.word32_popcnt()
        } else {
            self.word64_popcnt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine_operator::{WriteBarrierKind, load_representation_of, shift_kind_of};

    #[test]
    fn test_pure_table_shape() {
        for entry in PURE_OPERATORS {
            assert!(entry.properties.contains(OperatorProperties::PURE));
            assert_eq!(entry.arity.effect_in, 0);
            assert_eq!(entry.arity.effect_out, 0);
            assert_eq!(entry.arity.control_out, 0);
        }
    }

    #[test]
    fn test_commutativity_only_where_sound() {
        let zone = Zone::new("test");
        let m = MachineOperatorBuilder::with_defaults(&zone);
        assert!(m.int32_add().has_property(OperatorProperties::COMMUTATIVE));
        assert!(m.word64_xor().has_property(OperatorProperties::ASSOCIATIVE));
        assert!(m.word32_equal().has_property(OperatorProperties::COMMUTATIVE));
        assert!(!m.int32_sub().has_property(OperatorProperties::COMMUTATIVE));
        assert!(!m.int64_less_than().has_property(OperatorProperties::COMMUTATIVE));
        assert!(!m.float64_sub().has_property(OperatorProperties::COMMUTATIVE));
    }

    #[test]
    fn test_division_has_control_input() {
        let zone = Zone::new("test");
        let m = MachineOperatorBuilder::with_defaults(&zone);
        assert_eq!(m.int32_div().control_input_count(), 1);
        assert_eq!(m.uint64_mod().control_input_count(), 1);
        assert_eq!(m.int32_add().control_input_count(), 0);
    }

    #[test]
    fn test_optional_operators_follow_flags() {
        let zone = Zone::new("test");
        let m = MachineOperatorBuilder::new(
            &zone,
            MachineRepresentation::Word32,
            MachineOperatorFlags::WORD32_CTZ | MachineOperatorFlags::FLOAT64_ROUND_DOWN,
            AlignmentRequirements::default(),
        );
        assert!(m.word32_ctz().is_supported());
        assert!(m.word_ctz().is_supported());
        assert!(!m.word64_ctz().is_supported());
        assert!(m.float64_round_down().is_supported());
        assert!(!m.float32_round_down().is_supported());
        assert_eq!(m.word64_ctz().placeholder().opcode(), IrOpcode::Word64Ctz);
    }

    #[test]
    #[should_panic(expected = "is not supported")]
    fn test_unsupported_optional_operator_panics() {
        let zone = Zone::new("test");
        let m = MachineOperatorBuilder::with_defaults(&zone);
        m.word32_popcnt().op();
    }

    #[test]
    fn test_word_size_aliases() {
        let zone = Zone::new("test");
        let m32 = MachineOperatorBuilder::new(
            &zone,
            MachineRepresentation::Word32,
            MachineOperatorFlags::NO_FLAGS,
            AlignmentRequirements::default(),
        );
        let m64 = MachineOperatorBuilder::with_defaults(&zone);
        assert_eq!(m32.word_and().opcode(), IrOpcode::Word32And);
        assert_eq!(m64.word_and().opcode(), IrOpcode::Word64And);
        assert_eq!(m32.int_add().opcode(), IrOpcode::Int32Add);
        assert_eq!(m64.uint_less_than().opcode(), IrOpcode::Uint64LessThan);
        assert_eq!(
            shift_kind_of(m64.word_sar(ShiftKind::ShiftOutZeros)),
            ShiftKind::ShiftOutZeros
        );
    }

    #[test]
    fn test_alignment_requirements() {
        let some = AlignmentRequirements::some_unaligned_access_support(
            &[MachineRepresentation::Float64],
            &[MachineRepresentation::Float32, MachineRepresentation::Float64],
        );
        assert!(some.is_unaligned_load_supported(MachineRepresentation::Float32));
        assert!(!some.is_unaligned_load_supported(MachineRepresentation::Float64));
        assert!(!some.is_unaligned_store_supported(MachineRepresentation::Float32));
        let none = AlignmentRequirements::no_unaligned_access_support();
        assert!(!none.is_unaligned_load_supported(MachineRepresentation::Word32));
        assert!(none.is_unaligned_load_supported(MachineRepresentation::Word8));
    }

    #[test]
    fn test_protected_store_has_no_barrier() {
        let zone = Zone::new("test");
        let m = MachineOperatorBuilder::with_defaults(&zone);
        let op = m.protected_store(MachineRepresentation::Tagged);
        let rep = crate::machine_operator::store_representation_of(op);
        assert_eq!(rep.write_barrier_kind(), WriteBarrierKind::NoWriteBarrier);
    }

    #[test]
    fn test_protected_load_is_not_eliminatable() {
        let zone = Zone::new("test");
        let m = MachineOperatorBuilder::with_defaults(&zone);
        let op = m.protected_load(MachineType::int32());
        assert!(!op.has_property(OperatorProperties::ELIMINATABLE));
        assert_eq!(load_representation_of(op), MachineType::int32());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_lane_index_checked() {
        let zone = Zone::new("test");
        let m = MachineOperatorBuilder::with_defaults(&zone);
        m.f64x2_extract_lane(2);
    }

    #[test]
    fn test_catalog_json_lists_statics() {
        let zone = Zone::new("test");
        let m = MachineOperatorBuilder::with_defaults(&zone);
        let catalog = m.catalog();
        assert!(catalog.iter().any(|s| s.mnemonic == "Int32AddWithOverflow"));
        let json = m.catalog_json().expect("catalog serializes");
        assert!(json.contains("\"Word32And\""));
    }
}
