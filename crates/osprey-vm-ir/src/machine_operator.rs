//! Parameter types of machine operators and their typed accessors
//!
//! The accessors mirror the parameter each opcode family carries. Applying
//! an accessor to an operator of the wrong family is a compiler bug and
//! panics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::machine_type::{LoadRepresentation, MachineRepresentation, MachineType};
use crate::opcode::IrOpcode;
use crate::operator::{OpParameter, Operator};

/// Write barrier required by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WriteBarrierKind {
    /// No barrier
    NoWriteBarrier,
    /// Barrier elided, checked in debug builds
    AssertNoWriteBarrier,
    /// Store of a map word
    MapWriteBarrier,
    /// Store of a known heap pointer
    PointerWriteBarrier,
    /// Store of an ephemeron hash table key
    EphemeronKeyWriteBarrier,
    /// Store of an arbitrary tagged value
    FullWriteBarrier,
}

impl WriteBarrierKind {
    /// All barrier kinds
    pub const ALL: [WriteBarrierKind; 6] = [
        WriteBarrierKind::NoWriteBarrier,
        WriteBarrierKind::AssertNoWriteBarrier,
        WriteBarrierKind::MapWriteBarrier,
        WriteBarrierKind::PointerWriteBarrier,
        WriteBarrierKind::EphemeronKeyWriteBarrier,
        WriteBarrierKind::FullWriteBarrier,
    ];

    /// Whether the store must run barrier code at all
    pub const fn needs_barrier(self) -> bool {
        !matches!(
            self,
            WriteBarrierKind::NoWriteBarrier | WriteBarrierKind::AssertNoWriteBarrier
        )
    }
}

/// Representation and write barrier of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreRepresentation {
    representation: MachineRepresentation,
    write_barrier_kind: WriteBarrierKind,
}

impl StoreRepresentation {
    /// Create a store representation
    #[inline]
    pub const fn new(
        representation: MachineRepresentation,
        write_barrier_kind: WriteBarrierKind,
    ) -> Self {
        Self {
            representation,
            write_barrier_kind,
        }
    }

    /// Stored representation
    #[inline]
    pub const fn representation(&self) -> MachineRepresentation {
        self.representation
    }

    /// Required write barrier
    #[inline]
    pub const fn write_barrier_kind(&self) -> WriteBarrierKind {
        self.write_barrier_kind
    }
}

impl fmt::Display for StoreRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {:?}", self.representation, self.write_barrier_kind)
    }
}

/// Unaligned stores carry only the representation.
pub type UnalignedStoreRepresentation = MachineRepresentation;

/// Atomic stores carry only the representation.
pub type AtomicStoreRepresentation = MachineRepresentation;

/// Variant of an arithmetic right shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShiftKind {
    /// Plain arithmetic shift
    Normal,
    /// The bits shifted out are known to be zero
    ShiftOutZeros,
}

/// Size and alignment of a stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackSlotRepresentation {
    /// Size in bytes
    pub size: i32,
    /// Alignment in bytes (0 means default)
    pub alignment: i32,
}

impl StackSlotRepresentation {
    /// Create a stack slot representation
    pub const fn new(size: i32, alignment: i32) -> Self {
        Self { size, alignment }
    }
}

/// Where a stack check was emitted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackCheckKind {
    /// Function entry of JavaScript code
    JsFunctionEntry,
    /// Loop back edge of JavaScript code
    JsIterationBody,
    /// Builtin or stub code
    CodeStubAssembler,
    /// WebAssembly code
    Wasm,
}

/// How a transforming SIMD load accesses memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadKind {
    /// Aligned access
    Normal,
    /// Possibly unaligned access
    Unaligned,
    /// Access protected by a trap handler
    Protected,
}

/// Transformation applied by a SIMD load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum LoadTransformation {
    S8x16LoadSplat,
    S16x8LoadSplat,
    S32x4LoadSplat,
    S64x2LoadSplat,
    I16x8Load8x8S,
    I16x8Load8x8U,
    I32x4Load16x4S,
    I32x4Load16x4U,
    I64x2Load32x2S,
    I64x2Load32x2U,
}

impl LoadTransformation {
    /// All transformations
    pub const ALL: [LoadTransformation; 10] = [
        LoadTransformation::S8x16LoadSplat,
        LoadTransformation::S16x8LoadSplat,
        LoadTransformation::S32x4LoadSplat,
        LoadTransformation::S64x2LoadSplat,
        LoadTransformation::I16x8Load8x8S,
        LoadTransformation::I16x8Load8x8U,
        LoadTransformation::I32x4Load16x4S,
        LoadTransformation::I32x4Load16x4U,
        LoadTransformation::I64x2Load32x2S,
        LoadTransformation::I64x2Load32x2U,
    ];
}

/// Parameters of a `LoadTransform` operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadTransformParameters {
    /// Access kind
    pub kind: LoadKind,
    /// Transformation
    pub transformation: LoadTransformation,
}

/// SIMD shapes with lane-indexed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum SimdShape {
    F64x2,
    F32x4,
    I64x2,
    I32x4,
    I16x8,
    I8x16,
}

impl SimdShape {
    /// Number of lanes in a 128-bit vector
    pub const fn lane_count(self) -> u8 {
        match self {
            SimdShape::F64x2 | SimdShape::I64x2 => 2,
            SimdShape::F32x4 | SimdShape::I32x4 => 4,
            SimdShape::I16x8 => 8,
            SimdShape::I8x16 => 16,
        }
    }
}

fn expect_opcode(op: &Operator, accepted: &[IrOpcode], what: &str) {
    assert!(
        accepted.contains(&op.opcode()),
        "{what} requested from {}",
        op.mnemonic()
    );
}

/// Representation of a load, poisoned load, unaligned load or protected load.
pub fn load_representation_of(op: &Operator) -> LoadRepresentation {
    expect_opcode(
        op,
        &[
            IrOpcode::Load,
            IrOpcode::PoisonedLoad,
            IrOpcode::UnalignedLoad,
            IrOpcode::ProtectedLoad,
            IrOpcode::Word32AtomicLoad,
            IrOpcode::Word64AtomicLoad,
        ],
        "load representation",
    );
    match op.parameter() {
        OpParameter::MachineType(ty) => *ty,
        other => unreachable!("load carries {other:?}"),
    }
}

/// Representation and barrier kind of a store or protected store.
pub fn store_representation_of(op: &Operator) -> StoreRepresentation {
    expect_opcode(
        op,
        &[IrOpcode::Store, IrOpcode::ProtectedStore],
        "store representation",
    );
    match op.parameter() {
        OpParameter::Store(rep) => *rep,
        other => unreachable!("store carries {other:?}"),
    }
}

/// Representation of an unaligned store.
pub fn unaligned_store_representation_of(op: &Operator) -> UnalignedStoreRepresentation {
    expect_opcode(op, &[IrOpcode::UnalignedStore], "unaligned store representation");
    match op.parameter() {
        OpParameter::Representation(rep) => *rep,
        other => unreachable!("unaligned store carries {other:?}"),
    }
}

/// Representation of an atomic store.
pub fn atomic_store_representation_of(op: &Operator) -> AtomicStoreRepresentation {
    expect_opcode(
        op,
        &[IrOpcode::Word32AtomicStore, IrOpcode::Word64AtomicStore],
        "atomic store representation",
    );
    match op.parameter() {
        OpParameter::Representation(rep) => *rep,
        other => unreachable!("atomic store carries {other:?}"),
    }
}

/// Machine type of an atomic read-modify-write or compare-exchange.
pub fn atomic_op_type(op: &Operator) -> MachineType {
    assert!(
        op.opcode().is_atomic(),
        "atomic type requested from {}",
        op.mnemonic()
    );
    match op.parameter() {
        OpParameter::MachineType(ty) => *ty,
        other => unreachable!("atomic operator carries {other:?}"),
    }
}

/// Shift kind of `Word32Sar` or `Word64Sar`.
pub fn shift_kind_of(op: &Operator) -> ShiftKind {
    expect_opcode(op, &[IrOpcode::Word32Sar, IrOpcode::Word64Sar], "shift kind");
    match op.parameter() {
        OpParameter::Shift(kind) => *kind,
        other => unreachable!("arithmetic shift carries {other:?}"),
    }
}

/// Size and alignment of a `StackSlot`.
pub fn stack_slot_representation_of(op: &Operator) -> StackSlotRepresentation {
    expect_opcode(op, &[IrOpcode::StackSlot], "stack slot representation");
    match op.parameter() {
        OpParameter::StackSlot(slot) => *slot,
        other => unreachable!("stack slot carries {other:?}"),
    }
}

/// Lane index of a SIMD extract or replace operator.
pub fn lane_index_of(op: &Operator) -> u8 {
    match op.parameter() {
        OpParameter::Lane(lane) => *lane,
        _ => panic!("lane index requested from {}", op.mnemonic()),
    }
}

/// Byte shuffle of `S8x16Shuffle`.
pub fn shuffle_of(op: &Operator) -> &[u8; 16] {
    expect_opcode(op, &[IrOpcode::S8x16Shuffle], "shuffle");
    match op.parameter() {
        OpParameter::Shuffle(shuffle) => shuffle,
        other => unreachable!("shuffle carries {other:?}"),
    }
}

/// Kind and transformation of `LoadTransform`.
pub fn load_transform_parameters_of(op: &Operator) -> LoadTransformParameters {
    expect_opcode(op, &[IrOpcode::LoadTransform], "load transform parameters");
    match op.parameter() {
        OpParameter::LoadTransform(params) => *params,
        other => unreachable!("load transform carries {other:?}"),
    }
}

/// Origin of `StackPointerGreaterThan`.
pub fn stack_check_kind_of(op: &Operator) -> StackCheckKind {
    expect_opcode(op, &[IrOpcode::StackPointerGreaterThan], "stack check kind");
    match op.parameter() {
        OpParameter::StackCheck(kind) => *kind,
        other => unreachable!("stack check carries {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_classification() {
        assert!(!WriteBarrierKind::NoWriteBarrier.needs_barrier());
        assert!(!WriteBarrierKind::AssertNoWriteBarrier.needs_barrier());
        assert!(WriteBarrierKind::EphemeronKeyWriteBarrier.needs_barrier());
        assert!(WriteBarrierKind::FullWriteBarrier.needs_barrier());
    }

    #[test]
    fn test_store_representation_equality() {
        let a = StoreRepresentation::new(
            MachineRepresentation::TaggedPointer,
            WriteBarrierKind::FullWriteBarrier,
        );
        let b = StoreRepresentation::new(
            MachineRepresentation::TaggedPointer,
            WriteBarrierKind::NoWriteBarrier,
        );
        assert_ne!(a, b);
        assert_eq!(a, a);
        assert_eq!(a.to_string(), "tagged-pointer, FullWriteBarrier");
    }

    #[test]
    fn test_lane_counts() {
        assert_eq!(SimdShape::F64x2.lane_count(), 2);
        assert_eq!(SimdShape::I16x8.lane_count(), 8);
        assert_eq!(SimdShape::I8x16.lane_count(), 16);
    }
}
