//! Operation graph
//!
//! Operations are stored in one contiguous buffer and referenced by
//! [`OpIndex`]. Inputs must be defined before their users, except for phi
//! inputs, which may refer forward along loop back edges.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::machine_operator::{StackCheckKind, StoreRepresentation};
use crate::machine_type::MachineType;
use crate::operations::{
    ChangeKind, ChangeOp, ComparisonKind, ComparisonOp, ConstantOp, FloatBinopKind, FloatBinopOp,
    FloatRepresentation, FloatUnaryKind, FloatUnaryOp, LoadOp, Operation, ParameterOp, PhiOp,
    RegisterRepresentation, ReturnOp, ShiftOp, ShiftOpKind, StackPointerGreaterThanOp, StoreOp,
    WordBinopKind, WordBinopOp, WordRepresentation,
};

/// Index of an operation in its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct OpIndex(pub u32);

impl OpIndex {
    /// Create an index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position in the operation buffer
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OpIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Append-only buffer of operations
#[derive(Debug, Clone, Default)]
pub struct Graph {
    operations: Vec<Operation>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation and return its index
    pub fn add(&mut self, op: impl Into<Operation>) -> OpIndex {
        let index = u32::try_from(self.operations.len()).expect("graph exceeds u32 operations");
        self.operations.push(op.into());
        OpIndex(index)
    }

    /// Operation at `index`. Panics if out of range.
    #[inline]
    pub fn get(&self, index: OpIndex) -> &Operation {
        &self.operations[index.index()]
    }

    /// Index of an operation borrowed from this graph.
    ///
    /// Panics if `op` does not live in this graph's buffer.
    pub fn index(&self, op: &Operation) -> OpIndex {
        let base = self.operations.as_ptr() as usize;
        let addr = op as *const Operation as usize;
        let size = std::mem::size_of::<Operation>();
        assert!(
            addr >= base && addr < base + self.operations.len() * size,
            "operation does not belong to this graph"
        );
        let offset = addr - base;
        debug_assert_eq!(offset % size, 0);
        OpIndex((offset / size) as u32)
    }

    /// Overwrite the operation at `index`, keeping its index stable
    pub fn replace(&mut self, index: OpIndex, op: impl Into<Operation>) {
        self.operations[index.index()] = op.into();
    }

    /// Number of operations
    #[inline]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the graph has no operations
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations in index order
    pub fn iter(&self) -> impl Iterator<Item = (OpIndex, &Operation)> {
        self.operations
            .iter()
            .enumerate()
            .map(|(i, op)| (OpIndex(i as u32), op))
    }

    /// Check that every input refers to a defined, value-producing operation.
    pub fn verify(&self) -> Result<()> {
        if self.operations.is_empty() {
            return Err(GraphError::Empty);
        }
        for (user, op) in self.iter() {
            let is_phi = matches!(op, Operation::Phi(_));
            for input in op.inputs() {
                let in_range = if is_phi {
                    input.index() < self.len()
                } else {
                    input < user
                };
                if !in_range {
                    return Err(GraphError::InputOutOfRange { user, input });
                }
                if !self.get(input).produces_value() {
                    return Err(GraphError::ValuelessInput { user, input });
                }
            }
        }
        Ok(())
    }

    /// Check that the phi at `phi` has `expected` inputs.
    pub fn verify_phi(&self, phi: OpIndex, expected: usize) -> Result<()> {
        match self.get(phi) {
            Operation::Phi(op) if op.input_count() == expected => Ok(()),
            Operation::Phi(op) => Err(GraphError::PhiArityMismatch {
                phi,
                expected,
                actual: op.input_count(),
            }),
            other => panic!("{phi} is {}, not a phi", other.name()),
        }
    }

    // ==================== Convenience constructors ====================

    #[allow(missing_docs)]
    pub fn word32_constant(&mut self, value: u32) -> OpIndex {
        self.add(ConstantOp::Word32(value))
    }

    #[allow(missing_docs)]
    pub fn word64_constant(&mut self, value: u64) -> OpIndex {
        self.add(ConstantOp::Word64(value))
    }

    /// Word constant of the given width; word32 keeps the low 32 bits.
    pub fn word_constant(&mut self, value: u64, rep: WordRepresentation) -> OpIndex {
        match rep {
            WordRepresentation::Word32 => self.word32_constant(value as u32),
            WordRepresentation::Word64 => self.word64_constant(value),
        }
    }

    #[allow(missing_docs)]
    pub fn float32_constant(&mut self, value: f32) -> OpIndex {
        self.add(ConstantOp::Float32(value))
    }

    #[allow(missing_docs)]
    pub fn float64_constant(&mut self, value: f64) -> OpIndex {
        self.add(ConstantOp::Float64(value))
    }

    #[allow(missing_docs)]
    pub fn smi_constant(&mut self, value: i32) -> OpIndex {
        self.add(ConstantOp::Smi(value))
    }

    #[allow(missing_docs)]
    pub fn parameter(&mut self, index: u32, rep: RegisterRepresentation) -> OpIndex {
        self.add(ParameterOp { index, rep })
    }

    #[allow(missing_docs)]
    pub fn word_binop(
        &mut self,
        left: OpIndex,
        right: OpIndex,
        kind: WordBinopKind,
        rep: WordRepresentation,
    ) -> OpIndex {
        self.add(WordBinopOp {
            left,
            right,
            kind,
            rep,
        })
    }

    #[allow(missing_docs)]
    pub fn shift(
        &mut self,
        left: OpIndex,
        right: OpIndex,
        kind: ShiftOpKind,
        rep: WordRepresentation,
    ) -> OpIndex {
        self.add(ShiftOp {
            left,
            right,
            kind,
            rep,
        })
    }

    #[allow(missing_docs)]
    pub fn comparison(
        &mut self,
        left: OpIndex,
        right: OpIndex,
        kind: ComparisonKind,
        rep: RegisterRepresentation,
    ) -> OpIndex {
        self.add(ComparisonOp {
            left,
            right,
            kind,
            rep,
        })
    }

    #[allow(missing_docs)]
    pub fn change(
        &mut self,
        input: OpIndex,
        kind: ChangeKind,
        from: RegisterRepresentation,
        to: RegisterRepresentation,
    ) -> OpIndex {
        self.add(ChangeOp {
            input,
            kind,
            from,
            to,
        })
    }

    #[allow(missing_docs)]
    pub fn float_unary(
        &mut self,
        input: OpIndex,
        kind: FloatUnaryKind,
        rep: FloatRepresentation,
    ) -> OpIndex {
        self.add(FloatUnaryOp { input, kind, rep })
    }

    #[allow(missing_docs)]
    pub fn float_binop(
        &mut self,
        left: OpIndex,
        right: OpIndex,
        kind: FloatBinopKind,
        rep: FloatRepresentation,
    ) -> OpIndex {
        self.add(FloatBinopOp {
            left,
            right,
            kind,
            rep,
        })
    }

    #[allow(missing_docs)]
    pub fn phi(&mut self, inputs: Vec<OpIndex>, rep: RegisterRepresentation) -> OpIndex {
        self.add(PhiOp { inputs, rep })
    }

    #[allow(missing_docs)]
    pub fn load(&mut self, base: OpIndex, offset: i32, loaded_rep: MachineType) -> OpIndex {
        self.add(LoadOp {
            base,
            offset,
            loaded_rep,
        })
    }

    #[allow(missing_docs)]
    pub fn store(
        &mut self,
        base: OpIndex,
        value: OpIndex,
        offset: i32,
        stored_rep: StoreRepresentation,
    ) -> OpIndex {
        self.add(StoreOp {
            base,
            value,
            offset,
            stored_rep,
        })
    }

    #[allow(missing_docs)]
    pub fn stack_pointer_greater_than(&mut self, limit: OpIndex, kind: StackCheckKind) -> OpIndex {
        self.add(StackPointerGreaterThanOp { limit, kind })
    }

    #[allow(missing_docs)]
    pub fn return_values(&mut self, values: Vec<OpIndex>) -> OpIndex {
        self.add(ReturnOp { values })
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, op) in self.iter() {
            writeln!(f, "{index:>5}: {op}")?;
        }
        Ok(())
    }
}
