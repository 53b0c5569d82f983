//! Graph builder handed to [`CodeStub::generate`](crate::CodeStub::generate)

use osprey_vm_ir::operations::{
    ChangeKind, ComparisonKind, RegisterRepresentation, ShiftOpKind, WordBinopKind,
    WordRepresentation,
};
use osprey_vm_ir::{Graph, MachineType, OpIndex, StackCheckKind, StoreRepresentation};

use crate::stubs::CodeStubDescriptor;

/// Pointer-width word on the targets stubs are generated for
pub const WORD_REPRESENTATION: WordRepresentation = WordRepresentation::Word64;

/// Builds the operation graph of one stub
#[derive(Debug)]
pub struct StubAssembler {
    graph: Graph,
    descriptor: CodeStubDescriptor,
    returned: bool,
}

impl StubAssembler {
    /// Start an empty graph for a stub with `descriptor`
    pub fn new(descriptor: CodeStubDescriptor) -> Self {
        Self {
            graph: Graph::new(),
            descriptor,
            returned: false,
        }
    }

    /// Calling convention of the stub being built
    pub fn descriptor(&self) -> &CodeStubDescriptor {
        &self.descriptor
    }

    /// Graph built so far
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Incoming parameter `index` in the representation the descriptor gives
    pub fn parameter(&mut self, index: u32) -> OpIndex {
        let rep = self.descriptor.parameter(index);
        self.graph.parameter(index, rep)
    }

    // ==================== Constants ====================

    #[allow(missing_docs)]
    pub fn word32_constant(&mut self, value: u32) -> OpIndex {
        self.graph.word32_constant(value)
    }

    /// Pointer-width constant
    pub fn intptr_constant(&mut self, value: i64) -> OpIndex {
        self.graph.word_constant(value as u64, WORD_REPRESENTATION)
    }

    // ==================== Word arithmetic ====================

    /// Pointer-width addition
    pub fn intptr_add(&mut self, left: OpIndex, right: OpIndex) -> OpIndex {
        self.graph
            .word_binop(left, right, WordBinopKind::Add, WORD_REPRESENTATION)
    }

    /// Pointer-width multiplication
    pub fn intptr_mul(&mut self, left: OpIndex, right: OpIndex) -> OpIndex {
        self.graph
            .word_binop(left, right, WordBinopKind::Mul, WORD_REPRESENTATION)
    }

    /// Pointer-width bitwise and
    pub fn word_and(&mut self, left: OpIndex, right: OpIndex) -> OpIndex {
        self.graph
            .word_binop(left, right, WordBinopKind::BitwiseAnd, WORD_REPRESENTATION)
    }

    /// Pointer-width left shift by a constant
    pub fn word_shl(&mut self, value: OpIndex, amount: u32) -> OpIndex {
        let amount = self.graph.word32_constant(amount);
        self.graph
            .shift(value, amount, ShiftOpKind::ShiftLeft, WORD_REPRESENTATION)
    }

    /// Zero-extend a word32 to pointer width
    pub fn change_uint32_to_word(&mut self, value: OpIndex) -> OpIndex {
        self.graph.change(
            value,
            ChangeKind::ZeroExtend,
            RegisterRepresentation::Word32,
            RegisterRepresentation::Word64,
        )
    }

    /// Unsigned pointer-width comparison
    pub fn uintptr_less_than(&mut self, left: OpIndex, right: OpIndex) -> OpIndex {
        self.graph.comparison(
            left,
            right,
            ComparisonKind::UnsignedLessThan,
            RegisterRepresentation::Word64,
        )
    }

    // ==================== Memory ====================

    /// Load from `base + offset`
    pub fn load(&mut self, base: OpIndex, offset: i32, ty: MachineType) -> OpIndex {
        self.graph.load(base, offset, ty)
    }

    /// Store `value` to `base + offset`
    pub fn store(
        &mut self,
        base: OpIndex,
        value: OpIndex,
        offset: i32,
        rep: StoreRepresentation,
    ) -> OpIndex {
        self.graph.store(base, value, offset, rep)
    }

    /// Whether the stack pointer is above `limit`
    pub fn stack_pointer_greater_than(&mut self, limit: OpIndex, kind: StackCheckKind) -> OpIndex {
        self.graph.stack_pointer_greater_than(limit, kind)
    }

    // ==================== Exit ====================

    /// Return `values`. Panics if the count disagrees with the descriptor or
    /// the stub already returned.
    pub fn return_values(&mut self, values: Vec<OpIndex>) -> OpIndex {
        assert!(!self.returned, "stub returns twice");
        assert_eq!(
            values.len(),
            self.descriptor.returns().len(),
            "return count disagrees with the stub descriptor"
        );
        self.returned = true;
        self.graph.return_values(values)
    }

    /// Finished graph. Panics if the stub never returned.
    pub fn finish(self) -> Graph {
        assert!(self.returned, "stub graph has no return");
        self.graph
    }
}
