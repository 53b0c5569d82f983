//! Operation matcher
//!
//! Read-only structural queries over a [`Graph`]. Every matcher returns
//! `None` or `false` when the operation does not have the requested shape;
//! a non-match is ordinary control flow for optimization passes.
//!
//! ## Zero and float equality
//!
//! [`OperationMatcher::match_zero`] compares float constants bit-exactly
//! against `+0.0`, so `-0.0` is not zero. [`OperationMatcher::match_float`]
//! is bit-exact as well but treats any two NaNs as equal regardless of
//! payload.

use crate::graph::{Graph, OpIndex};
use crate::operations::{
    ChangeKind, ChangeOp, ComparisonKind, ComparisonOp, ConstantOp, FloatBinopKind, FloatBinopOp,
    FloatRepresentation, FloatUnaryKind, FloatUnaryOp, Operation, OperationCast, PhiOp,
    RegisterRepresentation, ShiftOp, ShiftOpKind, WordBinopKind, WordBinopOp, WordRepresentation,
};

/// Binary operands `(left, right)`
pub type Operands = (OpIndex, OpIndex);

/// Result of [`OperationMatcher::match_constant_shift`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantShift {
    /// Shifted value
    pub input: OpIndex,
    /// Shift kind
    pub kind: ShiftOpKind,
    /// Width of the shift
    pub rep: WordRepresentation,
    /// Shift amount, always below `rep.bit_width()`
    pub amount: u32,
}

/// Result of the unconstrained [`OperationMatcher::match_word_binop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct MatchedWordBinop {
    pub left: OpIndex,
    pub right: OpIndex,
    pub kind: WordBinopKind,
    pub rep: WordRepresentation,
}

/// Structural pattern matcher over a frozen graph
#[derive(Clone, Copy)]
pub struct OperationMatcher<'g> {
    graph: &'g Graph,
}

impl<'g> OperationMatcher<'g> {
    /// Create a matcher for `graph`
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    /// Operation at `index`
    #[inline]
    pub fn get(&self, index: OpIndex) -> &'g Operation {
        self.graph.get(index)
    }

    /// Index of an operation in the graph
    #[inline]
    pub fn index(&self, op: &Operation) -> OpIndex {
        self.graph.index(op)
    }

    /// Downcast the operation at `index`
    #[inline]
    pub fn try_cast<T: OperationCast>(&self, index: OpIndex) -> Option<&'g T> {
        self.graph.get(index).try_cast::<T>()
    }

    /// Whether the operation at `index` is a `T`
    #[inline]
    pub fn is<T: OperationCast>(&self, index: OpIndex) -> bool {
        self.try_cast::<T>(index).is_some()
    }

    fn constant(&self, index: OpIndex) -> Option<&'g ConstantOp> {
        self.try_cast::<ConstantOp>(index)
    }

    // ==================== Constants ====================

    /// Word, float or Smi constant whose value is exactly zero.
    ///
    /// Floats must be `+0.0`; `-0.0` does not match.
    pub fn match_zero(&self, index: OpIndex) -> bool {
        match self.constant(index) {
            Some(ConstantOp::Word32(v)) => *v == 0,
            Some(ConstantOp::Word64(v)) => *v == 0,
            Some(ConstantOp::Float32(v)) => v.to_bits() == 0,
            Some(ConstantOp::Float64(v)) => v.to_bits() == 0,
            Some(ConstantOp::Smi(v)) => *v == 0,
            _ => false,
        }
    }

    /// Word constant equal to zero
    pub fn match_integral_zero(&self, index: OpIndex) -> bool {
        self.match_signed_integral_constant(index) == Some(0)
    }

    /// Smi constant equal to zero
    pub fn match_smi_zero(&self, index: OpIndex) -> bool {
        matches!(self.constant(index), Some(ConstantOp::Smi(0)))
    }

    #[allow(missing_docs)]
    pub fn match_float32_constant(&self, index: OpIndex) -> Option<f32> {
        match self.constant(index)? {
            ConstantOp::Float32(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn match_float64_constant(&self, index: OpIndex) -> Option<f64> {
        match self.constant(index)? {
            ConstantOp::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Float32 or float64 constant, widened to `f64`
    pub fn match_float_constant(&self, index: OpIndex) -> Option<f64> {
        match self.constant(index)? {
            ConstantOp::Float32(v) => Some(f64::from(*v)),
            ConstantOp::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Float constant bit-equal to `value`, or NaN when `value` is NaN.
    pub fn match_float(&self, index: OpIndex, value: f64) -> bool {
        self.match_float_constant(index)
            .is_some_and(|k| k.to_bits() == value.to_bits() || (k.is_nan() && value.is_nan()))
    }

    /// Float constant holding any NaN
    pub fn match_nan(&self, index: OpIndex) -> bool {
        self.match_float_constant(index).is_some_and(f64::is_nan)
    }

    /// Word constant viewed at width `rep`, as `(unsigned, signed)`.
    ///
    /// At word32 the value is truncated to its low 32 bits and the signed
    /// view is sign-extended from bit 31. At word64 the unsigned view of a
    /// word32 constant is zero-extended and the signed view sign-extended.
    pub fn match_integral_word_constant(
        &self,
        index: OpIndex,
        rep: WordRepresentation,
    ) -> Option<(u64, i64)> {
        let c = self.constant(index)?;
        if !c.is_integral() {
            return None;
        }
        Some(match rep {
            WordRepresentation::Word32 => (
                c.integral() as u32 as u64,
                c.signed_integral() as i32 as i64,
            ),
            WordRepresentation::Word64 => (c.integral(), c.signed_integral()),
        })
    }

    #[allow(missing_docs)]
    pub fn match_integral_word32_constant(&self, index: OpIndex) -> Option<u32> {
        self.match_integral_word_constant(index, WordRepresentation::Word32)
            .map(|(unsigned, _)| unsigned as u32)
    }

    #[allow(missing_docs)]
    pub fn match_integral_word64_constant(&self, index: OpIndex) -> Option<u64> {
        self.match_integral_word_constant(index, WordRepresentation::Word64)
            .map(|(unsigned, _)| unsigned)
    }

    /// Word32 view of a word constant equal to `value`
    pub fn match_word32_constant_value(&self, index: OpIndex, value: u32) -> bool {
        self.match_integral_word32_constant(index) == Some(value)
    }

    /// Word constant in its own width, sign-extended
    pub fn match_signed_integral_constant(&self, index: OpIndex) -> Option<i64> {
        self.constant(index)
            .filter(|c| c.is_integral())
            .map(ConstantOp::signed_integral)
    }

    /// Word constant in its own width, zero-extended
    pub fn match_unsigned_integral_constant(&self, index: OpIndex) -> Option<u64> {
        self.constant(index)
            .filter(|c| c.is_integral())
            .map(ConstantOp::integral)
    }

    /// Address of an external reference constant
    pub fn match_external_constant(&self, index: OpIndex) -> Option<usize> {
        match self.constant(index)? {
            ConstantOp::External(address) => Some(*address),
            _ => None,
        }
    }

    /// Word constant whose value at width `rep` is a power of two.
    ///
    /// At word32 the test is on the unsigned value, so `1 << 31` matches.
    /// At word64 negative constants never match.
    pub fn match_power_of_two_word_constant(
        &self,
        index: OpIndex,
        rep: WordRepresentation,
    ) -> Option<u64> {
        let (unsigned, signed) = self.match_integral_word_constant(index, rep)?;
        if rep == WordRepresentation::Word64 && signed < 0 {
            return None;
        }
        (unsigned.count_ones() == 1).then_some(unsigned)
    }

    #[allow(missing_docs)]
    pub fn match_power_of_two_word32_constant(&self, index: OpIndex) -> Option<u32> {
        self.match_power_of_two_word_constant(index, WordRepresentation::Word32)
            .map(|value| value as u32)
    }

    // ==================== Changes and word arithmetic ====================

    /// Change of the given kind between exactly `from` and `to`; yields its input
    pub fn match_change(
        &self,
        index: OpIndex,
        kind: ChangeKind,
        from: RegisterRepresentation,
        to: RegisterRepresentation,
    ) -> Option<OpIndex> {
        let op = self.try_cast::<ChangeOp>(index)?;
        (op.kind == kind && op.from == from && op.to == to).then_some(op.input)
    }

    /// Any word binop
    pub fn match_word_binop(&self, index: OpIndex) -> Option<MatchedWordBinop> {
        let op = self.try_cast::<WordBinopOp>(index)?;
        Some(MatchedWordBinop {
            left: op.left,
            right: op.right,
            kind: op.kind,
            rep: op.rep,
        })
    }

    /// Word binop of `kind` usable at width `rep`.
    ///
    /// A word64 operation also matches a word32 request when `kind` is
    /// truncation-safe. A narrower operation never matches a wider request.
    pub fn match_word_binop_of(
        &self,
        index: OpIndex,
        kind: WordBinopKind,
        rep: WordRepresentation,
    ) -> Option<Operands> {
        let op = self.try_cast::<WordBinopOp>(index)?;
        if op.kind != kind {
            return None;
        }
        let rep_matches = op.rep == rep
            || (kind.allows_word64_to_word32_truncation()
                && rep == WordRepresentation::Word32
                && op.rep == WordRepresentation::Word64);
        rep_matches.then_some((op.left, op.right))
    }

    #[allow(missing_docs)]
    pub fn match_word_add(&self, index: OpIndex, rep: WordRepresentation) -> Option<Operands> {
        self.match_word_binop_of(index, WordBinopKind::Add, rep)
    }

    #[allow(missing_docs)]
    pub fn match_word_sub(&self, index: OpIndex, rep: WordRepresentation) -> Option<Operands> {
        self.match_word_binop_of(index, WordBinopKind::Sub, rep)
    }

    #[allow(missing_docs)]
    pub fn match_word_mul(&self, index: OpIndex, rep: WordRepresentation) -> Option<Operands> {
        self.match_word_binop_of(index, WordBinopKind::Mul, rep)
    }

    #[allow(missing_docs)]
    pub fn match_bitwise_and(&self, index: OpIndex, rep: WordRepresentation) -> Option<Operands> {
        self.match_word_binop_of(index, WordBinopKind::BitwiseAnd, rep)
    }

    /// Bitwise and with a constant on either side; yields `(value, mask)`
    pub fn match_bitwise_and_with_constant(
        &self,
        index: OpIndex,
        rep: WordRepresentation,
    ) -> Option<(OpIndex, u64)> {
        let (left, right) = self.match_bitwise_and(index, rep)?;
        if let Some((mask, _)) = self.match_integral_word_constant(right, rep) {
            return Some((left, mask));
        }
        if let Some((mask, _)) = self.match_integral_word_constant(left, rep) {
            return Some((right, mask));
        }
        None
    }

    /// Equality comparison at `rep`
    pub fn match_equal(&self, index: OpIndex, rep: RegisterRepresentation) -> Option<Operands> {
        let op = self.try_cast::<ComparisonOp>(index)?;
        (op.kind == ComparisonKind::Equal && op.rep == rep).then_some((op.left, op.right))
    }

    // ==================== Float arithmetic ====================

    /// Unary float operation of `kind` at `rep`; yields its input
    pub fn match_float_unary(
        &self,
        index: OpIndex,
        kind: FloatUnaryKind,
        rep: FloatRepresentation,
    ) -> Option<OpIndex> {
        let op = self.try_cast::<FloatUnaryOp>(index)?;
        (op.kind == kind && op.rep == rep).then_some(op.input)
    }

    #[allow(missing_docs)]
    pub fn match_float_round_down(
        &self,
        index: OpIndex,
        rep: FloatRepresentation,
    ) -> Option<OpIndex> {
        self.match_float_unary(index, FloatUnaryKind::RoundDown, rep)
    }

    /// Binary float operation of `kind` at `rep`
    pub fn match_float_binary(
        &self,
        index: OpIndex,
        kind: FloatBinopKind,
        rep: FloatRepresentation,
    ) -> Option<Operands> {
        let op = self.try_cast::<FloatBinopOp>(index)?;
        (op.kind == kind && op.rep == rep).then_some((op.left, op.right))
    }

    #[allow(missing_docs)]
    pub fn match_float_sub(&self, index: OpIndex, rep: FloatRepresentation) -> Option<Operands> {
        self.match_float_binary(index, FloatBinopKind::Sub, rep)
    }

    // ==================== Shifts ====================

    fn shift_amount(&self, op: &ShiftOp, rep: WordRepresentation) -> Option<u32> {
        self.match_integral_word32_constant(op.right)
            .filter(|&amount| amount < rep.bit_width())
    }

    /// Any shift by a constant strictly below the shift's bit width
    pub fn match_constant_shift(&self, index: OpIndex) -> Option<ConstantShift> {
        let op = self.try_cast::<ShiftOp>(index)?;
        let amount = self.shift_amount(op, op.rep)?;
        Some(ConstantShift {
            input: op.left,
            kind: op.kind,
            rep: op.rep,
            amount,
        })
    }

    /// Shift of `kind` usable at width `rep` by a constant below its bit
    /// width; yields `(input, amount)`.
    pub fn match_constant_shift_of(
        &self,
        index: OpIndex,
        kind: ShiftOpKind,
        rep: WordRepresentation,
    ) -> Option<(OpIndex, u32)> {
        let op = self.try_cast::<ShiftOp>(index)?;
        if op.kind != kind {
            return None;
        }
        let rep_matches = op.rep == rep
            || (kind.allows_word64_to_word32_truncation()
                && rep == WordRepresentation::Word32
                && op.rep == WordRepresentation::Word64);
        if !rep_matches {
            return None;
        }
        let amount = self.shift_amount(op, rep)?;
        Some((op.left, amount))
    }

    /// Any right shift at exactly `rep` by an in-range constant
    pub fn match_constant_right_shift(
        &self,
        index: OpIndex,
        rep: WordRepresentation,
    ) -> Option<(OpIndex, u32)> {
        let op = self.try_cast::<ShiftOp>(index)?;
        if !op.kind.is_right_shift() || op.rep != rep {
            return None;
        }
        let amount = self.shift_amount(op, rep)?;
        Some((op.left, amount))
    }

    /// Left shift at exactly `rep` by an in-range constant
    pub fn match_constant_left_shift(
        &self,
        index: OpIndex,
        rep: WordRepresentation,
    ) -> Option<(OpIndex, u32)> {
        let op = self.try_cast::<ShiftOp>(index)?;
        if op.kind != ShiftOpKind::ShiftLeft || op.rep != rep {
            return None;
        }
        let amount = self.shift_amount(op, rep)?;
        Some((op.left, amount))
    }

    #[allow(missing_docs)]
    pub fn match_constant_shift_right_arithmetic_shift_out_zeros(
        &self,
        index: OpIndex,
        rep: WordRepresentation,
    ) -> Option<(OpIndex, u16)> {
        let op = self.try_cast::<ShiftOp>(index)?;
        if op.kind != ShiftOpKind::ShiftRightArithmeticShiftOutZeros || op.rep != rep {
            return None;
        }
        let amount = self.shift_amount(op, rep)?;
        Some((op.left, amount as u16))
    }

    // ==================== Control ====================

    /// Phi, optionally with exactly `input_count` inputs
    pub fn match_phi(&self, index: OpIndex, input_count: Option<usize>) -> bool {
        self.try_cast::<PhiOp>(index)
            .is_some_and(|phi| input_count.is_none_or(|n| phi.input_count() == n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word32_view_of_word64_constant() {
        let mut graph = Graph::new();
        let c = graph.word64_constant(0x1_8000_0001);
        let m = OperationMatcher::new(&graph);
        assert_eq!(
            m.match_integral_word_constant(c, WordRepresentation::Word32),
            Some((0x8000_0001, i32::MIN as i64 + 1))
        );
        assert_eq!(
            m.match_integral_word_constant(c, WordRepresentation::Word64),
            Some((0x1_8000_0001, 0x1_8000_0001))
        );
    }

    #[test]
    fn test_word32_constant_zero_extends_at_word64() {
        let mut graph = Graph::new();
        let c = graph.word32_constant(u32::MAX);
        let m = OperationMatcher::new(&graph);
        assert_eq!(m.match_integral_word64_constant(c), Some(u32::MAX as u64));
        assert_eq!(
            m.match_integral_word_constant(c, WordRepresentation::Word64),
            Some((u32::MAX as u64, -1))
        );
        assert_eq!(m.match_signed_integral_constant(c), Some(-1));
    }

    #[test]
    fn test_non_constants_do_not_match() {
        let mut graph = Graph::new();
        let p = graph.parameter(0, RegisterRepresentation::Word32);
        let m = OperationMatcher::new(&graph);
        assert!(!m.match_zero(p));
        assert!(m.match_integral_word32_constant(p).is_none());
        assert!(m.match_float_constant(p).is_none());
        assert!(m.match_constant_shift(p).is_none());
        assert!(!m.match_phi(p, None));
    }

    #[test]
    fn test_bitwise_and_with_constant_on_either_side() {
        let mut graph = Graph::new();
        let p = graph.parameter(0, RegisterRepresentation::Word32);
        let mask = graph.word32_constant(0xff);
        let lhs = graph.word_binop(mask, p, WordBinopKind::BitwiseAnd, WordRepresentation::Word32);
        let rhs = graph.word_binop(p, mask, WordBinopKind::BitwiseAnd, WordRepresentation::Word32);
        let m = OperationMatcher::new(&graph);
        assert_eq!(
            m.match_bitwise_and_with_constant(lhs, WordRepresentation::Word32),
            Some((p, 0xff))
        );
        assert_eq!(
            m.match_bitwise_and_with_constant(rhs, WordRepresentation::Word32),
            Some((p, 0xff))
        );
    }

    #[test]
    fn test_match_change_requires_exact_representations() {
        let mut graph = Graph::new();
        let p = graph.parameter(0, RegisterRepresentation::Word32);
        let ext = graph.change(
            p,
            ChangeKind::ZeroExtend,
            RegisterRepresentation::Word32,
            RegisterRepresentation::Word64,
        );
        let m = OperationMatcher::new(&graph);
        assert_eq!(
            m.match_change(
                ext,
                ChangeKind::ZeroExtend,
                RegisterRepresentation::Word32,
                RegisterRepresentation::Word64
            ),
            Some(p)
        );
        assert!(
            m.match_change(
                ext,
                ChangeKind::SignExtend,
                RegisterRepresentation::Word32,
                RegisterRepresentation::Word64
            )
            .is_none()
        );
    }
}
