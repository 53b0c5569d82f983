//! Graph operations
//!
//! Each [`Operation`] variant holds a plain struct with typed operand
//! accessors. Inputs are [`OpIndex`] references to earlier operations in
//! the same [`Graph`](crate::graph::Graph).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::OpIndex;
use crate::machine_operator::{StackCheckKind, StoreRepresentation};
use crate::machine_type::MachineType;

// ============================================================================
// Representations
// ============================================================================

/// Width of an integer word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordRepresentation {
    /// 32-bit word
    Word32,
    /// 64-bit word
    Word64,
}

impl WordRepresentation {
    /// Number of bits
    #[inline]
    pub const fn bit_width(self) -> u32 {
        match self {
            WordRepresentation::Word32 => 32,
            WordRepresentation::Word64 => 64,
        }
    }

    /// Largest unsigned value
    #[inline]
    pub const fn max_unsigned_value(self) -> u64 {
        match self {
            WordRepresentation::Word32 => u32::MAX as u64,
            WordRepresentation::Word64 => u64::MAX,
        }
    }
}

/// Width of a floating-point value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatRepresentation {
    /// IEEE single
    Float32,
    /// IEEE double
    Float64,
}

/// Representation of a value held in a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum RegisterRepresentation {
    Word32,
    Word64,
    Float32,
    Float64,
    Tagged,
    Compressed,
}

impl From<WordRepresentation> for RegisterRepresentation {
    fn from(rep: WordRepresentation) -> Self {
        match rep {
            WordRepresentation::Word32 => RegisterRepresentation::Word32,
            WordRepresentation::Word64 => RegisterRepresentation::Word64,
        }
    }
}

impl From<FloatRepresentation> for RegisterRepresentation {
    fn from(rep: FloatRepresentation) -> Self {
        match rep {
            FloatRepresentation::Float32 => RegisterRepresentation::Float32,
            FloatRepresentation::Float64 => RegisterRepresentation::Float64,
        }
    }
}

// ============================================================================
// Constants
// ============================================================================

/// Kind of a constant, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ConstantKind {
    Word32,
    Word64,
    Float32,
    Float64,
    Number,
    Smi,
    TaggedIndex,
    External,
    HeapObject,
}

/// A compile-time constant
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantOp {
    /// 32-bit integer; stored zero-extended
    Word32(u32),
    /// 64-bit integer
    Word64(u64),
    /// Single-precision float
    Float32(f32),
    /// Double-precision float
    Float64(f64),
    /// JavaScript number, materialized as a heap number or Smi
    Number(f64),
    /// Small integer
    Smi(i32),
    /// Tagged index
    TaggedIndex(i32),
    /// Address of a runtime symbol
    External(usize),
    /// Address of a heap object
    HeapObject(usize),
}

impl ConstantOp {
    /// Payload-free kind
    pub fn kind(&self) -> ConstantKind {
        match self {
            ConstantOp::Word32(_) => ConstantKind::Word32,
            ConstantOp::Word64(_) => ConstantKind::Word64,
            ConstantOp::Float32(_) => ConstantKind::Float32,
            ConstantOp::Float64(_) => ConstantKind::Float64,
            ConstantOp::Number(_) => ConstantKind::Number,
            ConstantOp::Smi(_) => ConstantKind::Smi,
            ConstantOp::TaggedIndex(_) => ConstantKind::TaggedIndex,
            ConstantOp::External(_) => ConstantKind::External,
            ConstantOp::HeapObject(_) => ConstantKind::HeapObject,
        }
    }

    /// Whether this is a word32 or word64 constant
    pub fn is_integral(&self) -> bool {
        matches!(self, ConstantOp::Word32(_) | ConstantOp::Word64(_))
    }

    /// Unsigned integral value. Panics for non-integral constants.
    pub fn integral(&self) -> u64 {
        match *self {
            ConstantOp::Word32(v) => v as u64,
            ConstantOp::Word64(v) => v,
            other => panic!("integral value of {other:?}"),
        }
    }

    /// Signed integral value; word32 constants are sign-extended.
    pub fn signed_integral(&self) -> i64 {
        match *self {
            ConstantOp::Word32(v) => v as i32 as i64,
            ConstantOp::Word64(v) => v as i64,
            other => panic!("signed integral value of {other:?}"),
        }
    }

    /// Register representation the constant is materialized in
    pub fn rep(&self) -> RegisterRepresentation {
        match self {
            ConstantOp::Word32(_) => RegisterRepresentation::Word32,
            ConstantOp::Word64(_) | ConstantOp::External(_) => RegisterRepresentation::Word64,
            ConstantOp::Float32(_) => RegisterRepresentation::Float32,
            ConstantOp::Float64(_) => RegisterRepresentation::Float64,
            ConstantOp::Number(_)
            | ConstantOp::Smi(_)
            | ConstantOp::TaggedIndex(_)
            | ConstantOp::HeapObject(_) => RegisterRepresentation::Tagged,
        }
    }
}

// ============================================================================
// Word and float arithmetic
// ============================================================================

/// Integer binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum WordBinopKind {
    Add,
    Mul,
    SignedMulOverflownBits,
    UnsignedMulOverflownBits,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Sub,
    SignedDiv,
    UnsignedDiv,
    SignedMod,
    UnsignedMod,
}

impl WordBinopKind {
    /// Whether the low 32 bits of the word64 result equal the word32 result.
    pub const fn allows_word64_to_word32_truncation(self) -> bool {
        matches!(
            self,
            WordBinopKind::Add
                | WordBinopKind::Sub
                | WordBinopKind::Mul
                | WordBinopKind::BitwiseAnd
                | WordBinopKind::BitwiseOr
                | WordBinopKind::BitwiseXor
        )
    }

    #[allow(missing_docs)]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            WordBinopKind::Add
                | WordBinopKind::Mul
                | WordBinopKind::SignedMulOverflownBits
                | WordBinopKind::UnsignedMulOverflownBits
                | WordBinopKind::BitwiseAnd
                | WordBinopKind::BitwiseOr
                | WordBinopKind::BitwiseXor
        )
    }
}

/// `left kind right` at `rep`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct WordBinopOp {
    pub left: OpIndex,
    pub right: OpIndex,
    pub kind: WordBinopKind,
    pub rep: WordRepresentation,
}

/// Shift and rotate operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ShiftOpKind {
    ShiftRightArithmeticShiftOutZeros,
    ShiftRightArithmetic,
    ShiftRightLogical,
    ShiftLeft,
    RotateRight,
    RotateLeft,
}

impl ShiftOpKind {
    /// Whether the shift moves bits towards the least significant end
    pub const fn is_right_shift(self) -> bool {
        matches!(
            self,
            ShiftOpKind::ShiftRightArithmeticShiftOutZeros
                | ShiftOpKind::ShiftRightArithmetic
                | ShiftOpKind::ShiftRightLogical
        )
    }

    /// Whether the low 32 bits of the word64 result equal the word32 result.
    pub const fn allows_word64_to_word32_truncation(self) -> bool {
        matches!(self, ShiftOpKind::ShiftLeft)
    }
}

/// `left kind right` where `right` is the shift amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ShiftOp {
    pub left: OpIndex,
    pub right: OpIndex,
    pub kind: ShiftOpKind,
    pub rep: WordRepresentation,
}

/// Comparison operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ComparisonKind {
    Equal,
    SignedLessThan,
    SignedLessThanOrEqual,
    UnsignedLessThan,
    UnsignedLessThanOrEqual,
}

/// `left kind right`, producing a word32 boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ComparisonOp {
    pub left: OpIndex,
    pub right: OpIndex,
    pub kind: ComparisonKind,
    pub rep: RegisterRepresentation,
}

/// Representation changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ChangeKind {
    FloatConversion,
    SignedFloatTruncateOverflowToMin,
    UnsignedFloatTruncateOverflowToMin,
    SignedToFloat,
    UnsignedToFloat,
    ExtractHighHalf,
    ExtractLowHalf,
    ZeroExtend,
    SignExtend,
    Truncate,
    Bitcast,
}

/// Convert `input` from one register representation to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ChangeOp {
    pub input: OpIndex,
    pub kind: ChangeKind,
    pub from: RegisterRepresentation,
    pub to: RegisterRepresentation,
}

/// Unary float operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FloatUnaryKind {
    Abs,
    Negate,
    SilenceNaN,
    RoundDown,
    RoundUp,
    RoundToZero,
    RoundTiesEven,
    Sqrt,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatUnaryOp {
    pub input: OpIndex,
    pub kind: FloatUnaryKind,
    pub rep: FloatRepresentation,
}

/// Binary float operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FloatBinopKind {
    Add,
    Mul,
    Min,
    Max,
    Sub,
    Div,
    Mod,
    Power,
    Atan2,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatBinopOp {
    pub left: OpIndex,
    pub right: OpIndex,
    pub kind: FloatBinopKind,
    pub rep: FloatRepresentation,
}

// ============================================================================
// Control, memory and calls
// ============================================================================

/// Merge of values flowing in from several predecessors
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhiOp {
    /// One input per predecessor
    pub inputs: Vec<OpIndex>,
    /// Representation of every input and the result
    pub rep: RegisterRepresentation,
}

impl PhiOp {
    /// Number of inputs
    #[inline]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }
}

/// Incoming parameter of the compiled function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ParameterOp {
    pub index: u32,
    pub rep: RegisterRepresentation,
}

/// Load from `base + offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct LoadOp {
    pub base: OpIndex,
    pub offset: i32,
    pub loaded_rep: MachineType,
}

/// Store `value` to `base + offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StoreOp {
    pub base: OpIndex,
    pub value: OpIndex,
    pub offset: i32,
    pub stored_rep: StoreRepresentation,
}

/// Whether the stack pointer is above `limit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StackPointerGreaterThanOp {
    pub limit: OpIndex,
    pub kind: StackCheckKind,
}

/// Return `values` to the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ReturnOp {
    pub values: Vec<OpIndex>,
}

// ============================================================================
// Operation
// ============================================================================

/// One node of the operation graph
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Operation {
    Constant(ConstantOp),
    WordBinop(WordBinopOp),
    Shift(ShiftOp),
    Comparison(ComparisonOp),
    Change(ChangeOp),
    FloatUnary(FloatUnaryOp),
    FloatBinop(FloatBinopOp),
    Phi(PhiOp),
    Parameter(ParameterOp),
    Load(LoadOp),
    Store(StoreOp),
    StackPointerGreaterThan(StackPointerGreaterThanOp),
    Return(ReturnOp),
}

/// Operation structs that can be downcast from an [`Operation`]
pub trait OperationCast: Sized {
    /// Borrow the payload if `op` is of this kind
    fn try_from_operation(op: &Operation) -> Option<&Self>;
}

macro_rules! impl_operation_cast {
    ($($variant:ident($ty:ty),)*) => {
        $(
            impl OperationCast for $ty {
                #[inline]
                fn try_from_operation(op: &Operation) -> Option<&Self> {
                    match op {
                        Operation::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Operation {
                fn from(op: $ty) -> Self {
                    Operation::$variant(op)
                }
            }
        )*
    };
}

impl_operation_cast! {
    Constant(ConstantOp),
    WordBinop(WordBinopOp),
    Shift(ShiftOp),
    Comparison(ComparisonOp),
    Change(ChangeOp),
    FloatUnary(FloatUnaryOp),
    FloatBinop(FloatBinopOp),
    Phi(PhiOp),
    Parameter(ParameterOp),
    Load(LoadOp),
    Store(StoreOp),
    StackPointerGreaterThan(StackPointerGreaterThanOp),
    Return(ReturnOp),
}

impl Operation {
    /// Downcast to a concrete operation
    #[inline]
    pub fn try_cast<T: OperationCast>(&self) -> Option<&T> {
        T::try_from_operation(self)
    }

    /// Whether this operation is a `T`
    #[inline]
    pub fn is<T: OperationCast>(&self) -> bool {
        self.try_cast::<T>().is_some()
    }

    /// Value inputs in operand order
    pub fn inputs(&self) -> Vec<OpIndex> {
        match self {
            Operation::Constant(_) | Operation::Parameter(_) => Vec::new(),
            Operation::WordBinop(op) => vec![op.left, op.right],
            Operation::Shift(op) => vec![op.left, op.right],
            Operation::Comparison(op) => vec![op.left, op.right],
            Operation::FloatBinop(op) => vec![op.left, op.right],
            Operation::Change(op) => vec![op.input],
            Operation::FloatUnary(op) => vec![op.input],
            Operation::Phi(op) => op.inputs.clone(),
            Operation::Load(op) => vec![op.base],
            Operation::Store(op) => vec![op.base, op.value],
            Operation::StackPointerGreaterThan(op) => vec![op.limit],
            Operation::Return(op) => op.values.clone(),
        }
    }

    /// Whether other operations may use this one as a value
    pub fn produces_value(&self) -> bool {
        !matches!(self, Operation::Store(_) | Operation::Return(_))
    }

    /// Whether this operation reads or writes memory
    pub fn is_memory_access(&self) -> bool {
        matches!(self, Operation::Load(_) | Operation::Store(_))
    }

    /// Short name for listings
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Constant(_) => "Constant",
            Operation::WordBinop(_) => "WordBinop",
            Operation::Shift(_) => "Shift",
            Operation::Comparison(_) => "Comparison",
            Operation::Change(_) => "Change",
            Operation::FloatUnary(_) => "FloatUnary",
            Operation::FloatBinop(_) => "FloatBinop",
            Operation::Phi(_) => "Phi",
            Operation::Parameter(_) => "Parameter",
            Operation::Load(_) => "Load",
            Operation::Store(_) => "Store",
            Operation::StackPointerGreaterThan(_) => "StackPointerGreaterThan",
            Operation::Return(_) => "Return",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self {
            Operation::Constant(c) => write!(f, "[{c:?}]")?,
            Operation::WordBinop(op) => write!(f, "[{:?}, {:?}]", op.kind, op.rep)?,
            Operation::Shift(op) => write!(f, "[{:?}, {:?}]", op.kind, op.rep)?,
            Operation::Comparison(op) => write!(f, "[{:?}, {:?}]", op.kind, op.rep)?,
            Operation::Change(op) => write!(f, "[{:?}, {:?} -> {:?}]", op.kind, op.from, op.to)?,
            Operation::FloatUnary(op) => write!(f, "[{:?}, {:?}]", op.kind, op.rep)?,
            Operation::FloatBinop(op) => write!(f, "[{:?}, {:?}]", op.kind, op.rep)?,
            Operation::Parameter(op) => write!(f, "[{}]", op.index)?,
            Operation::Load(op) => write!(f, "[{}, +{}]", op.loaded_rep, op.offset)?,
            Operation::Store(op) => write!(f, "[{}, +{}]", op.stored_rep, op.offset)?,
            Operation::StackPointerGreaterThan(op) => write!(f, "[{:?}]", op.kind)?,
            Operation::Phi(_) | Operation::Return(_) => {}
        }
        let inputs = self.inputs();
        if !inputs.is_empty() {
            f.write_str("(")?;
            for (i, input) in inputs.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{input}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_allow_list() {
        use WordBinopKind::*;
        for kind in [Add, Sub, Mul, BitwiseAnd, BitwiseOr, BitwiseXor] {
            assert!(kind.allows_word64_to_word32_truncation());
        }
        for kind in [
            SignedDiv,
            UnsignedDiv,
            SignedMod,
            UnsignedMod,
            SignedMulOverflownBits,
            UnsignedMulOverflownBits,
        ] {
            assert!(!kind.allows_word64_to_word32_truncation());
        }
    }

    #[test]
    fn test_constant_integral_views() {
        let c = ConstantOp::Word32(0xffff_ffff);
        assert_eq!(c.integral(), 0xffff_ffff);
        assert_eq!(c.signed_integral(), -1);
        assert_eq!(ConstantOp::Word64(u64::MAX).signed_integral(), -1);
        assert_eq!(ConstantOp::Smi(3).kind(), ConstantKind::Smi);
    }

    #[test]
    fn test_try_cast() {
        let op = Operation::Shift(ShiftOp {
            left: OpIndex::new(0),
            right: OpIndex::new(1),
            kind: ShiftOpKind::ShiftLeft,
            rep: WordRepresentation::Word32,
        });
        assert!(op.is::<ShiftOp>());
        assert!(op.try_cast::<WordBinopOp>().is_none());
        assert_eq!(op.inputs(), vec![OpIndex::new(0), OpIndex::new(1)]);
        assert_eq!(op.to_string(), "Shift[ShiftLeft, Word32](#0, #1)");
    }
}
