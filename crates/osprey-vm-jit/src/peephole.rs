//! Matcher-driven peephole pass
//!
//! Rewrites a verified graph into a fresh one:
//!
//! - **Identities**: `x + 0`, `x - 0`, `x | 0`, `x ^ 0`, `x * 1`, shifts by
//!   zero and `x & all_ones` forward to `x`
//! - **Strength reduction**: `x * 2^k` becomes `x << k`
//! - **Dead operations**: anything not reachable from a store or a return
//!   is dropped
//!
//! Indices change, so the pass returns a new graph rather than editing in
//! place.

use osprey_vm_ir::operations::{Operation, ShiftOpKind, WordBinopKind, WordRepresentation};
use osprey_vm_ir::{Graph, OpIndex, OperationMatcher};

/// What the pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeepholeStats {
    /// Operations replaced by one of their inputs
    pub forwarded: usize,
    /// Multiplications turned into shifts
    pub strength_reduced: usize,
    /// Unused operations dropped
    pub eliminated: usize,
}

/// Run identities, strength reduction and dead-operation elimination.
pub fn optimize(graph: &Graph) -> (Graph, PeepholeStats) {
    let mut stats = PeepholeStats::default();
    let reduced = reduce(graph, &mut stats);
    let live = eliminate_dead_operations(&reduced, &mut stats);
    (live, stats)
}

enum Reduction {
    Forward(OpIndex),
    ShiftLeft {
        input: OpIndex,
        amount: u32,
        rep: WordRepresentation,
    },
}

fn reduction(matcher: &OperationMatcher<'_>, index: OpIndex) -> Option<Reduction> {
    if let Some(shift) = matcher.match_constant_shift(index) {
        return (shift.amount == 0).then_some(Reduction::Forward(shift.input));
    }

    let binop = matcher.match_word_binop(index)?;
    let rep = binop.rep;
    let is_constant = |operand: OpIndex, value: u64| {
        matcher
            .match_integral_word_constant(operand, rep)
            .is_some_and(|(unsigned, _)| unsigned == value)
    };
    let either = |value: u64| {
        if is_constant(binop.right, value) {
            Some(binop.left)
        } else if is_constant(binop.left, value) {
            Some(binop.right)
        } else {
            None
        }
    };

    match binop.kind {
        WordBinopKind::Add | WordBinopKind::BitwiseOr | WordBinopKind::BitwiseXor => {
            either(0).map(Reduction::Forward)
        }
        WordBinopKind::Sub => is_constant(binop.right, 0).then_some(Reduction::Forward(binop.left)),
        WordBinopKind::BitwiseAnd => matcher
            .match_bitwise_and_with_constant(index, rep)
            .filter(|&(_, mask)| mask == rep.max_unsigned_value())
            .map(|(value, _)| Reduction::Forward(value)),
        WordBinopKind::Mul => {
            if let Some(input) = either(1) {
                return Some(Reduction::Forward(input));
            }
            let (input, factor) = match matcher.match_power_of_two_word_constant(binop.right, rep) {
                Some(factor) => (binop.left, factor),
                None => (
                    binop.right,
                    matcher.match_power_of_two_word_constant(binop.left, rep)?,
                ),
            };
            Some(Reduction::ShiftLeft {
                input,
                amount: factor.trailing_zeros(),
                rep,
            })
        }
        _ => None,
    }
}

fn reduce(graph: &Graph, stats: &mut PeepholeStats) -> Graph {
    let matcher = OperationMatcher::new(graph);
    let mut rewriter = Rewriter::new(graph.len());
    for (index, op) in graph.iter() {
        match reduction(&matcher, index) {
            Some(Reduction::Forward(source)) => {
                rewriter.forward(index, source);
                stats.forwarded += 1;
            }
            Some(Reduction::ShiftLeft { input, amount, rep }) => {
                let input = rewriter.mapped(input);
                let out = rewriter.output();
                let amount = out.word32_constant(amount);
                let shift = out.shift(input, amount, ShiftOpKind::ShiftLeft, rep);
                rewriter.define(index, shift);
                stats.strength_reduced += 1;
            }
            None => rewriter.copy(index, op),
        }
    }
    rewriter.finish()
}

fn eliminate_dead_operations(graph: &Graph, stats: &mut PeepholeStats) -> Graph {
    let mut live = vec![false; graph.len()];
    let mut worklist: Vec<OpIndex> = graph
        .iter()
        .filter(|(_, op)| !op.produces_value())
        .map(|(index, _)| index)
        .collect();
    for index in &worklist {
        live[index.index()] = true;
    }
    while let Some(index) = worklist.pop() {
        for input in graph.get(index).inputs() {
            if !live[input.index()] {
                live[input.index()] = true;
                worklist.push(input);
            }
        }
    }

    let mut rewriter = Rewriter::new(graph.len());
    for (index, op) in graph.iter() {
        if live[index.index()] {
            rewriter.copy(index, op);
        } else {
            stats.eliminated += 1;
        }
    }
    rewriter.finish()
}

/// Copies operations into a new graph while renumbering their inputs.
///
/// Phis may refer to later operations; their inputs are patched once the
/// whole graph has been copied.
struct Rewriter {
    out: Graph,
    map: Vec<Option<OpIndex>>,
    pending_phis: Vec<(OpIndex, Operation)>,
}

impl Rewriter {
    fn new(len: usize) -> Self {
        Self {
            out: Graph::new(),
            map: vec![None; len],
            pending_phis: Vec::new(),
        }
    }

    fn output(&mut self) -> &mut Graph {
        &mut self.out
    }

    fn mapped(&self, old: OpIndex) -> OpIndex {
        match self.map[old.index()] {
            Some(new) => new,
            None => panic!("{old} is used before it is defined"),
        }
    }

    fn define(&mut self, old: OpIndex, new: OpIndex) {
        self.map[old.index()] = Some(new);
    }

    fn forward(&mut self, old: OpIndex, source: OpIndex) {
        let new = self.mapped(source);
        self.define(old, new);
    }

    fn copy(&mut self, old: OpIndex, op: &Operation) {
        let new = if matches!(op, Operation::Phi(_)) {
            let placeholder = remap_inputs(op, |input| self.map[input.index()].unwrap_or(input));
            let new = self.out.add(placeholder);
            self.pending_phis.push((new, op.clone()));
            new
        } else {
            let remapped = remap_inputs(op, |input| self.mapped(input));
            self.out.add(remapped)
        };
        self.define(old, new);
    }

    fn finish(mut self) -> Graph {
        for (new, phi) in std::mem::take(&mut self.pending_phis) {
            let patched = remap_inputs(&phi, |input| self.mapped(input));
            self.out.replace(new, patched);
        }
        self.out
    }
}

/// Clone `op` with every input passed through `f`
pub fn remap_inputs(op: &Operation, mut f: impl FnMut(OpIndex) -> OpIndex) -> Operation {
    let mut op = op.clone();
    match &mut op {
        Operation::Constant(_) | Operation::Parameter(_) => {}
        Operation::WordBinop(o) => {
            o.left = f(o.left);
            o.right = f(o.right);
        }
        Operation::Shift(o) => {
            o.left = f(o.left);
            o.right = f(o.right);
        }
        Operation::Comparison(o) => {
            o.left = f(o.left);
            o.right = f(o.right);
        }
        Operation::FloatBinop(o) => {
            o.left = f(o.left);
            o.right = f(o.right);
        }
        Operation::Change(o) => o.input = f(o.input),
        Operation::FloatUnary(o) => o.input = f(o.input),
        Operation::Phi(o) => {
            for input in &mut o.inputs {
                *input = f(*input);
            }
        }
        Operation::Load(o) => o.base = f(o.base),
        Operation::Store(o) => {
            o.base = f(o.base);
            o.value = f(o.value);
        }
        Operation::StackPointerGreaterThan(o) => o.limit = f(o.limit),
        Operation::Return(o) => {
            for value in &mut o.values {
                *value = f(*value);
            }
        }
    }
    op
}

#[cfg(test)]
mod tests {
    use super::*;
    use osprey_vm_ir::operations::{PhiOp, RegisterRepresentation, ReturnOp};

    fn returned(graph: &Graph) -> Vec<OpIndex> {
        let (_, op) = graph.iter().last().expect("non-empty graph");
        op.try_cast::<ReturnOp>().expect("return").values.clone()
    }

    #[test]
    fn test_add_zero_is_forwarded() {
        let mut graph = Graph::new();
        let x = graph.parameter(0, RegisterRepresentation::Word64);
        let zero = graph.word64_constant(0);
        let sum = graph.word_binop(zero, x, WordBinopKind::Add, WordRepresentation::Word64);
        graph.return_values(vec![sum]);

        let (optimized, stats) = optimize(&graph);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.eliminated, 1);
        assert_eq!(optimized.len(), 2);
        assert_eq!(returned(&optimized), vec![OpIndex(0)]);
        assert!(optimized.verify().is_ok());
    }

    #[test]
    fn test_multiply_by_power_of_two_becomes_shift() {
        let mut graph = Graph::new();
        let x = graph.parameter(0, RegisterRepresentation::Word64);
        let eight = graph.word64_constant(8);
        let product = graph.word_binop(x, eight, WordBinopKind::Mul, WordRepresentation::Word64);
        graph.return_values(vec![product]);

        let (optimized, stats) = optimize(&graph);
        assert_eq!(stats.strength_reduced, 1);
        assert_eq!(stats.eliminated, 1);
        let result = returned(&optimized)[0];
        let matcher = OperationMatcher::new(&optimized);
        assert_eq!(
            matcher.match_constant_left_shift(result, WordRepresentation::Word64),
            Some((OpIndex(0), 3))
        );
        assert!(optimized.verify().is_ok());
    }

    #[test]
    fn test_word32_sign_bit_multiply_is_shift() {
        let mut graph = Graph::new();
        let x = graph.parameter(0, RegisterRepresentation::Word32);
        let factor = graph.word32_constant(1 << 31);
        let product = graph.word_binop(factor, x, WordBinopKind::Mul, WordRepresentation::Word32);
        graph.return_values(vec![product]);

        let (optimized, _) = optimize(&graph);
        let matcher = OperationMatcher::new(&optimized);
        assert_eq!(
            matcher.match_constant_left_shift(returned(&optimized)[0], WordRepresentation::Word32),
            Some((OpIndex(0), 31))
        );
    }

    #[test]
    fn test_all_ones_mask_only_at_its_own_width() {
        let mut graph = Graph::new();
        let x = graph.parameter(0, RegisterRepresentation::Word32);
        let mask = graph.word32_constant(u32::MAX);
        let masked = graph.word_binop(x, mask, WordBinopKind::BitwiseAnd, WordRepresentation::Word32);
        let y = graph.parameter(1, RegisterRepresentation::Word64);
        let low = graph.word64_constant(u64::from(u32::MAX));
        let kept = graph.word_binop(y, low, WordBinopKind::BitwiseAnd, WordRepresentation::Word64);
        graph.return_values(vec![masked, kept]);

        let (optimized, stats) = optimize(&graph);
        assert_eq!(stats.forwarded, 1);
        let values = returned(&optimized);
        assert!(optimized.get(values[0]).is::<osprey_vm_ir::operations::ParameterOp>());
        assert!(optimized.get(values[1]).is::<osprey_vm_ir::operations::WordBinopOp>());
    }

    #[test]
    fn test_shift_by_zero_and_nonzero_sub() {
        let mut graph = Graph::new();
        let x = graph.parameter(0, RegisterRepresentation::Word64);
        let zero = graph.word32_constant(0);
        let shifted = graph.shift(x, zero, ShiftOpKind::ShiftRightLogical, WordRepresentation::Word64);
        let one = graph.word64_constant(1);
        let diff = graph.word_binop(one, shifted, WordBinopKind::Sub, WordRepresentation::Word64);
        graph.return_values(vec![diff]);

        let (optimized, stats) = optimize(&graph);
        assert_eq!(stats.forwarded, 1);
        let diff = returned(&optimized)[0];
        let binop = OperationMatcher::new(&optimized)
            .match_word_binop(diff)
            .expect("subtraction kept");
        assert_eq!(binop.kind, WordBinopKind::Sub);
        assert_eq!(binop.right, OpIndex(0));
    }

    #[test]
    fn test_phi_back_edge_is_renumbered() {
        let mut graph = Graph::new();
        let x = graph.parameter(0, RegisterRepresentation::Word64);
        let phi = graph.phi(vec![x, OpIndex(3)], RegisterRepresentation::Word64);
        let zero = graph.word64_constant(0);
        let next = graph.word_binop(phi, zero, WordBinopKind::Add, WordRepresentation::Word64);
        assert_eq!(next, OpIndex(3));
        graph.return_values(vec![phi]);
        assert!(graph.verify().is_ok());

        let (optimized, stats) = optimize(&graph);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(optimized.len(), 3);
        let phi = optimized.get(OpIndex(1)).try_cast::<PhiOp>().expect("phi");
        assert_eq!(phi.inputs, vec![OpIndex(0), OpIndex(1)]);
        assert_eq!(returned(&optimized), vec![OpIndex(1)]);
    }
}
