//! Instruction selection
//!
//! Lowers every operation of a graph to one instruction carrying a machine
//! operator from [`MachineOperatorBuilder`]. Values keep the index of the
//! operation that defined them as their virtual register. Constants are
//! hoisted to the top of the sequence, parameters follow them.

use std::fmt;

use osprey_vm_ir::operations::{
    ChangeKind, ComparisonKind, ConstantOp, FloatBinopKind, FloatRepresentation, FloatUnaryKind,
    Operation, RegisterRepresentation, ShiftOpKind, WordBinopKind, WordRepresentation,
};
use osprey_vm_ir::{
    Graph, MachineOperatorBuilder, OpIndex, Operator, OptionalOperator, ShiftKind,
};

use crate::error::{Result, StubError};

/// Value produced by one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualRegister(pub u32);

impl From<OpIndex> for VirtualRegister {
    fn from(index: OpIndex) -> Self {
        Self(index.0)
    }
}

impl fmt::Display for VirtualRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// What an instruction does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionCode<'z> {
    /// A machine operator
    Machine(&'z Operator),
    /// Incoming parameter; the immediate holds its index
    Parameter,
    /// Materialized constant; the immediate holds its bits
    Constant,
    /// Merge of the inputs
    Phi,
    /// Return the inputs
    Return,
}

impl InstructionCode<'_> {
    /// Printable name
    pub fn name(&self) -> String {
        match self {
            InstructionCode::Machine(op) => op.to_string(),
            InstructionCode::Parameter => "Parameter".to_string(),
            InstructionCode::Constant => "Constant".to_string(),
            InstructionCode::Phi => "Phi".to_string(),
            InstructionCode::Return => "Return".to_string(),
        }
    }
}

/// Immediate operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediate {
    /// No immediate
    None,
    /// Integral or tagged constant bits
    Word(u64),
    /// `f32` bit pattern
    Float32(u32),
    /// `f64` bit pattern
    Float64(u64),
    /// Displacement of a memory access
    Offset(i32),
    /// Parameter index
    Index(u32),
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::None => Ok(()),
            Immediate::Word(bits) => write!(f, "#{bits:#x}"),
            Immediate::Float32(bits) => write!(f, "#{}", f32::from_bits(*bits)),
            Immediate::Float64(bits) => write!(f, "#{}", f64::from_bits(*bits)),
            Immediate::Offset(offset) => write!(f, "[{offset:+}]"),
            Immediate::Index(index) => write!(f, "#{index}"),
        }
    }
}

/// One selected instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction<'z> {
    #[allow(missing_docs)]
    pub code: InstructionCode<'z>,
    /// Defined register, for value-producing instructions
    pub output: Option<VirtualRegister>,
    #[allow(missing_docs)]
    pub inputs: Vec<VirtualRegister>,
    #[allow(missing_docs)]
    pub immediate: Immediate,
}

impl fmt::Display for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(output) = self.output {
            write!(f, "{output} = ")?;
        }
        f.write_str(&self.code.name())?;
        for (i, input) in self.inputs.iter().enumerate() {
            let separator = if i == 0 { " " } else { ", " };
            write!(f, "{separator}{input}")?;
        }
        if self.immediate != Immediate::None {
            write!(f, " {}", self.immediate)?;
        }
        Ok(())
    }
}

/// Selected instructions of one stub, in emission order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionSequence<'z> {
    instructions: Vec<Instruction<'z>>,
}

impl<'z> InstructionSequence<'z> {
    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    #[allow(missing_docs)]
    pub fn iter(&self) -> impl Iterator<Item = &Instruction<'z>> {
        self.instructions.iter()
    }

    #[allow(missing_docs)]
    pub fn instructions(&self) -> &[Instruction<'z>] {
        &self.instructions
    }
}

impl fmt::Display for InstructionSequence<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{instruction}")?;
        }
        Ok(())
    }
}

/// Lowers graph operations to machine operators of one target
pub struct InstructionSelector<'a, 'z> {
    machine: &'a MachineOperatorBuilder<'z>,
}

impl<'a, 'z> InstructionSelector<'a, 'z> {
    #[allow(missing_docs)]
    pub fn new(machine: &'a MachineOperatorBuilder<'z>) -> Self {
        Self { machine }
    }

    /// Select one instruction per operation of `graph`.
    pub fn select(&self, graph: &Graph) -> Result<InstructionSequence<'z>> {
        let rank = |op: &Operation| match op {
            Operation::Constant(_) => 0,
            Operation::Parameter(_) => 1,
            _ => 2,
        };
        let mut order: Vec<(OpIndex, &Operation)> = graph.iter().collect();
        order.sort_by_key(|&(index, op)| (rank(op), index));

        let instructions = order
            .into_iter()
            .map(|(index, op)| self.select_operation(index, op))
            .collect::<Result<Vec<_>>>()?;
        Ok(InstructionSequence { instructions })
    }

    fn select_operation(&self, index: OpIndex, op: &Operation) -> Result<Instruction<'z>> {
        let (code, immediate) = self.lower(op)?;
        Ok(Instruction {
            code,
            output: op.produces_value().then(|| VirtualRegister::from(index)),
            inputs: op.inputs().into_iter().map(VirtualRegister::from).collect(),
            immediate,
        })
    }

    fn lower(&self, op: &Operation) -> Result<(InstructionCode<'z>, Immediate)> {
        let m = self.machine;
        let lowered = match op {
            Operation::Constant(constant) => {
                return Ok((InstructionCode::Constant, constant_immediate(constant)));
            }
            Operation::Parameter(parameter) => {
                return Ok((InstructionCode::Parameter, Immediate::Index(parameter.index)));
            }
            Operation::Phi(_) => return Ok((InstructionCode::Phi, Immediate::None)),
            Operation::Return(_) => return Ok((InstructionCode::Return, Immediate::None)),
            Operation::Load(o) => {
                return Ok((
                    InstructionCode::Machine(m.load(o.loaded_rep)),
                    Immediate::Offset(o.offset),
                ));
            }
            Operation::Store(o) => {
                return Ok((
                    InstructionCode::Machine(m.store(o.stored_rep)),
                    Immediate::Offset(o.offset),
                ));
            }
            Operation::StackPointerGreaterThan(o) => Some(m.stack_pointer_greater_than(o.kind)),
            Operation::WordBinop(o) => self.word_binop(o.kind, o.rep),
            Operation::Shift(o) => self.shift(o.kind, o.rep),
            Operation::Comparison(o) => self.comparison(o.kind, o.rep),
            Operation::Change(o) => self.change(o.kind, o.from, o.to),
            Operation::FloatUnary(o) => self.float_unary(o.kind, o.rep),
            Operation::FloatBinop(o) => self.float_binop(o.kind, o.rep),
        };
        match lowered {
            Some(machine_op) => Ok((InstructionCode::Machine(machine_op), Immediate::None)),
            None => Err(StubError::Unsupported {
                operation: describe(op),
            }),
        }
    }

    // ==================== Word operations ====================

    fn word_binop(&self, kind: WordBinopKind, rep: WordRepresentation) -> Option<&'z Operator> {
        let m = self.machine;
        let op = match rep {
            WordRepresentation::Word32 => match kind {
                WordBinopKind::Add => m.int32_add(),
                WordBinopKind::Sub => m.int32_sub(),
                WordBinopKind::Mul => m.int32_mul(),
                WordBinopKind::SignedMulOverflownBits => m.int32_mul_high(),
                WordBinopKind::UnsignedMulOverflownBits => m.uint32_mul_high(),
                WordBinopKind::BitwiseAnd => m.word32_and(),
                WordBinopKind::BitwiseOr => m.word32_or(),
                WordBinopKind::BitwiseXor => m.word32_xor(),
                WordBinopKind::SignedDiv => m.int32_div(),
                WordBinopKind::UnsignedDiv => m.uint32_div(),
                WordBinopKind::SignedMod => m.int32_mod(),
                WordBinopKind::UnsignedMod => m.uint32_mod(),
            },
            WordRepresentation::Word64 => match kind {
                WordBinopKind::Add => m.int64_add(),
                WordBinopKind::Sub => m.int64_sub(),
                WordBinopKind::Mul => m.int64_mul(),
                WordBinopKind::SignedMulOverflownBits
                | WordBinopKind::UnsignedMulOverflownBits => return None,
                WordBinopKind::BitwiseAnd => m.word64_and(),
                WordBinopKind::BitwiseOr => m.word64_or(),
                WordBinopKind::BitwiseXor => m.word64_xor(),
                WordBinopKind::SignedDiv => m.int64_div(),
                WordBinopKind::UnsignedDiv => m.uint64_div(),
                WordBinopKind::SignedMod => m.int64_mod(),
                WordBinopKind::UnsignedMod => m.uint64_mod(),
            },
        };
        Some(op)
    }

    fn shift(&self, kind: ShiftOpKind, rep: WordRepresentation) -> Option<&'z Operator> {
        let m = self.machine;
        let op = match rep {
            WordRepresentation::Word32 => match kind {
                ShiftOpKind::ShiftLeft => m.word32_shl(),
                ShiftOpKind::ShiftRightLogical => m.word32_shr(),
                ShiftOpKind::ShiftRightArithmetic => m.word32_sar(ShiftKind::Normal),
                ShiftOpKind::ShiftRightArithmeticShiftOutZeros => {
                    m.word32_sar(ShiftKind::ShiftOutZeros)
                }
                ShiftOpKind::RotateRight => m.word32_ror(),
                ShiftOpKind::RotateLeft => return supported(m.word32_rol()),
            },
            WordRepresentation::Word64 => match kind {
                ShiftOpKind::ShiftLeft => m.word64_shl(),
                ShiftOpKind::ShiftRightLogical => m.word64_shr(),
                ShiftOpKind::ShiftRightArithmetic => m.word64_sar(ShiftKind::Normal),
                ShiftOpKind::ShiftRightArithmeticShiftOutZeros => {
                    m.word64_sar(ShiftKind::ShiftOutZeros)
                }
                ShiftOpKind::RotateRight => m.word64_ror(),
                ShiftOpKind::RotateLeft => return supported(m.word64_rol()),
            },
        };
        Some(op)
    }

    fn comparison(&self, kind: ComparisonKind, rep: RegisterRepresentation) -> Option<&'z Operator> {
        use ComparisonKind as K;
        use RegisterRepresentation as R;

        let m = self.machine;
        let op = match (kind, rep) {
            (K::Equal, R::Word32 | R::Compressed) => m.word32_equal(),
            (K::Equal, R::Word64 | R::Tagged) => m.word64_equal(),
            (K::Equal, R::Float32) => m.float32_equal(),
            (K::Equal, R::Float64) => m.float64_equal(),
            (K::SignedLessThan, R::Word32) => m.int32_less_than(),
            (K::SignedLessThan, R::Word64) => m.int64_less_than(),
            (K::SignedLessThan, R::Float32) => m.float32_less_than(),
            (K::SignedLessThan, R::Float64) => m.float64_less_than(),
            (K::SignedLessThanOrEqual, R::Word32) => m.int32_less_than_or_equal(),
            (K::SignedLessThanOrEqual, R::Word64) => m.int64_less_than_or_equal(),
            (K::SignedLessThanOrEqual, R::Float32) => m.float32_less_than_or_equal(),
            (K::SignedLessThanOrEqual, R::Float64) => m.float64_less_than_or_equal(),
            (K::UnsignedLessThan, R::Word32) => m.uint32_less_than(),
            (K::UnsignedLessThan, R::Word64) => m.uint64_less_than(),
            (K::UnsignedLessThanOrEqual, R::Word32) => m.uint32_less_than_or_equal(),
            (K::UnsignedLessThanOrEqual, R::Word64) => m.uint64_less_than_or_equal(),
            _ => return None,
        };
        Some(op)
    }

    fn change(
        &self,
        kind: ChangeKind,
        from: RegisterRepresentation,
        to: RegisterRepresentation,
    ) -> Option<&'z Operator> {
        use ChangeKind as K;
        use RegisterRepresentation as R;

        let m = self.machine;
        let op = match (kind, from, to) {
            (K::ZeroExtend, R::Word32, R::Word64) => m.change_uint32_to_uint64(),
            (K::SignExtend, R::Word32, R::Word64) => m.change_int32_to_int64(),
            (K::Truncate, R::Word64, R::Word32) => m.truncate_int64_to_int32(),
            (K::SignedToFloat, R::Word32, R::Float64) => m.change_int32_to_float64(),
            (K::SignedToFloat, R::Word64, R::Float64) => m.change_int64_to_float64(),
            (K::SignedToFloat, R::Word32, R::Float32) => m.round_int32_to_float32(),
            (K::SignedToFloat, R::Word64, R::Float32) => m.round_int64_to_float32(),
            (K::UnsignedToFloat, R::Word32, R::Float64) => m.change_uint32_to_float64(),
            (K::UnsignedToFloat, R::Word64, R::Float64) => m.round_uint64_to_float64(),
            (K::UnsignedToFloat, R::Word32, R::Float32) => m.round_uint32_to_float32(),
            (K::UnsignedToFloat, R::Word64, R::Float32) => m.round_uint64_to_float32(),
            (K::FloatConversion, R::Float32, R::Float64) => m.change_float32_to_float64(),
            (K::FloatConversion, R::Float64, R::Float32) => m.truncate_float64_to_float32(),
            (K::SignedFloatTruncateOverflowToMin, R::Float32, R::Word32) => {
                m.truncate_float32_to_int32()
            }
            (K::SignedFloatTruncateOverflowToMin, R::Float64, R::Word64) => {
                m.truncate_float64_to_int64()
            }
            (K::UnsignedFloatTruncateOverflowToMin, R::Float32, R::Word32) => {
                m.truncate_float32_to_uint32()
            }
            (K::UnsignedFloatTruncateOverflowToMin, R::Float64, R::Word32) => {
                m.truncate_float64_to_uint32()
            }
            (K::ExtractHighHalf, R::Float64, R::Word32) => m.float64_extract_high_word32(),
            (K::ExtractLowHalf, R::Float64, R::Word32) => m.float64_extract_low_word32(),
            (K::Bitcast, R::Float32, R::Word32) => m.bitcast_float32_to_int32(),
            (K::Bitcast, R::Float64, R::Word64) => m.bitcast_float64_to_int64(),
            (K::Bitcast, R::Word32, R::Float32) => m.bitcast_int32_to_float32(),
            (K::Bitcast, R::Word64, R::Float64) => m.bitcast_int64_to_float64(),
            (K::Bitcast, R::Word32, R::Word64) => m.bitcast_word32_to_word64(),
            (K::Bitcast, R::Tagged, R::Word64) => m.bitcast_tagged_to_word(),
            (K::Bitcast, R::Word64, R::Tagged) => m.bitcast_word_to_tagged(),
            _ => return None,
        };
        Some(op)
    }

    // ==================== Float operations ====================

    fn float_unary(&self, kind: FloatUnaryKind, rep: FloatRepresentation) -> Option<&'z Operator> {
        use FloatRepresentation as R;
        use FloatUnaryKind as K;

        let m = self.machine;
        let op = match (kind, rep) {
            (K::Abs, R::Float32) => m.float32_abs(),
            (K::Abs, R::Float64) => m.float64_abs(),
            (K::Negate, R::Float32) => m.float32_neg(),
            (K::Negate, R::Float64) => m.float64_neg(),
            (K::Sqrt, R::Float32) => m.float32_sqrt(),
            (K::Sqrt, R::Float64) => m.float64_sqrt(),
            (K::SilenceNaN, R::Float64) => m.float64_silence_nan(),
            (K::SilenceNaN, R::Float32) => return None,
            (K::RoundDown, R::Float32) => return supported(m.float32_round_down()),
            (K::RoundDown, R::Float64) => return supported(m.float64_round_down()),
            (K::RoundUp, R::Float32) => return supported(m.float32_round_up()),
            (K::RoundUp, R::Float64) => return supported(m.float64_round_up()),
            (K::RoundToZero, R::Float32) => return supported(m.float32_round_truncate()),
            (K::RoundToZero, R::Float64) => return supported(m.float64_round_truncate()),
            (K::RoundTiesEven, R::Float32) => return supported(m.float32_round_ties_even()),
            (K::RoundTiesEven, R::Float64) => return supported(m.float64_round_ties_even()),
        };
        Some(op)
    }

    fn float_binop(&self, kind: FloatBinopKind, rep: FloatRepresentation) -> Option<&'z Operator> {
        use FloatBinopKind as K;
        use FloatRepresentation as R;

        let m = self.machine;
        let op = match (kind, rep) {
            (K::Add, R::Float32) => m.float32_add(),
            (K::Add, R::Float64) => m.float64_add(),
            (K::Sub, R::Float32) => m.float32_sub(),
            (K::Sub, R::Float64) => m.float64_sub(),
            (K::Mul, R::Float32) => m.float32_mul(),
            (K::Mul, R::Float64) => m.float64_mul(),
            (K::Div, R::Float32) => m.float32_div(),
            (K::Div, R::Float64) => m.float64_div(),
            (K::Min, R::Float32) => m.float32_min(),
            (K::Min, R::Float64) => m.float64_min(),
            (K::Max, R::Float32) => m.float32_max(),
            (K::Max, R::Float64) => m.float64_max(),
            (K::Mod, R::Float64) => m.float64_mod(),
            (K::Power, R::Float64) => m.float64_pow(),
            (K::Atan2, R::Float64) => m.float64_atan2(),
            (K::Mod | K::Power | K::Atan2, R::Float32) => return None,
        };
        Some(op)
    }
}

fn describe(op: &Operation) -> String {
    let shape = match op {
        Operation::WordBinop(o) => format!("{:?} at {:?}", o.kind, o.rep),
        Operation::Shift(o) => format!("{:?} at {:?}", o.kind, o.rep),
        Operation::Comparison(o) => format!("{:?} at {:?}", o.kind, o.rep),
        Operation::Change(o) => format!("{:?} from {:?} to {:?}", o.kind, o.from, o.to),
        Operation::FloatUnary(o) => format!("{:?} at {:?}", o.kind, o.rep),
        Operation::FloatBinop(o) => format!("{:?} at {:?}", o.kind, o.rep),
        _ => return op.name().to_string(),
    };
    format!("{} {shape}", op.name())
}

fn supported(op: OptionalOperator<'_>) -> Option<&Operator> {
    op.is_supported().then(|| op.op())
}

fn constant_immediate(constant: &ConstantOp) -> Immediate {
    match *constant {
        ConstantOp::Word32(value) => Immediate::Word(u64::from(value)),
        ConstantOp::Word64(value) => Immediate::Word(value),
        ConstantOp::Float32(value) => Immediate::Float32(value.to_bits()),
        ConstantOp::Float64(value) | ConstantOp::Number(value) => {
            Immediate::Float64(value.to_bits())
        }
        // Smis live in the upper half of a tagged word.
        ConstantOp::Smi(value) => Immediate::Word((i64::from(value) << 32) as u64),
        ConstantOp::TaggedIndex(value) => Immediate::Word((i64::from(value) << 1) as u64),
        ConstantOp::External(address) | ConstantOp::HeapObject(address) => {
            Immediate::Word(address as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osprey_vm_ir::{
        AlignmentRequirements, IrOpcode, MachineOperatorFlags, MachineRepresentation, MachineType,
        StoreRepresentation, WriteBarrierKind, Zone,
    };

    fn machine_code<'z>(instruction: &Instruction<'z>) -> &'z Operator {
        match instruction.code {
            InstructionCode::Machine(op) => op,
            other => panic!("expected a machine instruction, got {other:?}"),
        }
    }

    #[test]
    fn test_constants_and_parameters_are_hoisted() {
        let zone = Zone::new("selector");
        let machine = MachineOperatorBuilder::with_defaults(&zone);
        let mut graph = Graph::new();
        let x = graph.parameter(0, RegisterRepresentation::Word64);
        let c = graph.word64_constant(5);
        let sum = graph.word_binop(x, c, WordBinopKind::Add, WordRepresentation::Word64);
        graph.return_values(vec![sum]);

        let sequence = InstructionSelector::new(&machine)
            .select(&graph)
            .expect("selection");
        let codes: Vec<_> = sequence.iter().map(|i| i.code.name()).collect();
        assert_eq!(codes, vec!["Constant", "Parameter", "Int64Add", "Return"]);

        let add = &sequence.instructions()[2];
        assert!(Operator::same_instance(machine_code(add), machine.int64_add()));
        assert_eq!(add.output, Some(VirtualRegister(2)));
        assert_eq!(add.inputs, vec![VirtualRegister(0), VirtualRegister(1)]);
        assert_eq!(sequence.instructions()[0].immediate, Immediate::Word(5));
        assert_eq!(sequence.instructions()[3].output, None);
        assert_eq!(add.to_string(), "v2 = Int64Add v0, v1");
    }

    #[test]
    fn test_memory_access_carries_offset() {
        let zone = Zone::new("selector");
        let machine = MachineOperatorBuilder::with_defaults(&zone);
        let mut graph = Graph::new();
        let object = graph.parameter(0, RegisterRepresentation::Tagged);
        let value = graph.load(object, 16, MachineType::any_tagged());
        let rep = StoreRepresentation::new(
            MachineRepresentation::Tagged,
            WriteBarrierKind::FullWriteBarrier,
        );
        graph.store(object, value, 24, rep);
        graph.return_values(Vec::new());

        let sequence = InstructionSelector::new(&machine)
            .select(&graph)
            .expect("selection");
        let load = &sequence.instructions()[1];
        assert_eq!(machine_code(load).opcode(), IrOpcode::Load);
        assert_eq!(load.immediate, Immediate::Offset(16));
        let store = &sequence.instructions()[2];
        assert!(Operator::same_instance(machine_code(store), machine.store(rep)));
        assert_eq!(store.output, None);
        assert_eq!(store.immediate, Immediate::Offset(24));
    }

    #[test]
    fn test_optional_operators_follow_target_flags() {
        let mut graph = Graph::new();
        let x = graph.parameter(0, RegisterRepresentation::Word64);
        let amount = graph.word32_constant(7);
        let rotated = graph.shift(x, amount, ShiftOpKind::RotateLeft, WordRepresentation::Word64);
        graph.return_values(vec![rotated]);

        let zone = Zone::new("selector");
        let plain = MachineOperatorBuilder::with_defaults(&zone);
        let error = InstructionSelector::new(&plain)
            .select(&graph)
            .expect_err("rol needs a target flag");
        assert!(matches!(error, StubError::Unsupported { .. }));
        assert!(error.to_string().contains("RotateLeft"));

        let with_rol = MachineOperatorBuilder::new(
            &zone,
            MachineRepresentation::Word64,
            MachineOperatorFlags::WORD64_ROL,
            AlignmentRequirements::default(),
        );
        let sequence = InstructionSelector::new(&with_rol)
            .select(&graph)
            .expect("selection");
        assert_eq!(
            machine_code(&sequence.instructions()[2]).opcode(),
            IrOpcode::Word64Rol
        );
    }

    #[test]
    fn test_changes_and_comparisons() {
        let zone = Zone::new("selector");
        let machine = MachineOperatorBuilder::with_defaults(&zone);
        let mut graph = Graph::new();
        let narrow = graph.parameter(0, RegisterRepresentation::Word32);
        let wide = graph.change(
            narrow,
            ChangeKind::ZeroExtend,
            RegisterRepresentation::Word32,
            RegisterRepresentation::Word64,
        );
        let limit = graph.parameter(1, RegisterRepresentation::Word64);
        let below = graph.comparison(
            wide,
            limit,
            ComparisonKind::UnsignedLessThan,
            RegisterRepresentation::Word64,
        );
        graph.return_values(vec![below]);

        let sequence = InstructionSelector::new(&machine)
            .select(&graph)
            .expect("selection");
        let opcodes: Vec<_> = sequence
            .iter()
            .filter_map(|i| match i.code {
                InstructionCode::Machine(op) => Some(op.opcode()),
                _ => None,
            })
            .collect();
        assert_eq!(
            opcodes,
            vec![IrOpcode::ChangeUint32ToUint64, IrOpcode::Uint64LessThan]
        );
    }

    #[test]
    fn test_float_only_kinds_are_unsupported_at_float32() {
        let zone = Zone::new("selector");
        let machine = MachineOperatorBuilder::with_defaults(&zone);
        let mut graph = Graph::new();
        let a = graph.float32_constant(1.5);
        let b = graph.float32_constant(2.0);
        let power = graph.float_binop(a, b, FloatBinopKind::Power, FloatRepresentation::Float32);
        graph.return_values(vec![power]);
        assert!(InstructionSelector::new(&machine).select(&graph).is_err());
    }

    #[test]
    fn test_smi_constants_are_tagged() {
        assert_eq!(
            constant_immediate(&ConstantOp::Smi(-1)),
            Immediate::Word(0xFFFF_FFFF_0000_0000)
        );
        assert_eq!(
            constant_immediate(&ConstantOp::Float64(1.0)),
            Immediate::Float64(1.0f64.to_bits())
        );
    }
}
