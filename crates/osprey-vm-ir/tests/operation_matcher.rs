//! Operation matcher tests
//!
//! Shape queries over small hand-built graphs: constant recognition,
//! truncation-safe binop matching and shift amount bounds.

use osprey_vm_ir::operations::{
    FloatBinopKind, FloatRepresentation, FloatUnaryKind, RegisterRepresentation, ShiftOpKind,
    WordBinopKind, WordRepresentation,
};
use osprey_vm_ir::{Graph, OperationMatcher};

const TRUNCATION_SAFE: [WordBinopKind; 6] = [
    WordBinopKind::Add,
    WordBinopKind::Sub,
    WordBinopKind::Mul,
    WordBinopKind::BitwiseAnd,
    WordBinopKind::BitwiseOr,
    WordBinopKind::BitwiseXor,
];

const TRUNCATION_UNSAFE: [WordBinopKind; 6] = [
    WordBinopKind::SignedDiv,
    WordBinopKind::UnsignedDiv,
    WordBinopKind::SignedMod,
    WordBinopKind::UnsignedMod,
    WordBinopKind::SignedMulOverflownBits,
    WordBinopKind::UnsignedMulOverflownBits,
];

#[test]
fn test_match_zero_across_representations() {
    let mut graph = Graph::new();
    let zeros = [
        graph.word32_constant(0),
        graph.word64_constant(0),
        graph.float32_constant(0.0),
        graph.float64_constant(0.0),
        graph.smi_constant(0),
    ];
    let neg_zero32 = graph.float32_constant(-0.0);
    let neg_zero64 = graph.float64_constant(-0.0);
    let one = graph.word32_constant(1);

    let m = OperationMatcher::new(&graph);
    for zero in zeros {
        assert!(m.match_zero(zero), "{} should be zero", graph.get(zero));
    }
    assert!(!m.match_zero(neg_zero32));
    assert!(!m.match_zero(neg_zero64));
    assert!(!m.match_zero(one));
    assert!(m.match_smi_zero(zeros[4]));
    assert!(!m.match_smi_zero(zeros[0]));
    assert!(m.match_integral_zero(zeros[1]));
    assert!(!m.match_integral_zero(zeros[3]));
}

#[test]
fn test_match_float_is_nan_tolerant() {
    let mut graph = Graph::new();
    let nan = graph.float64_constant(f64::NAN);
    let other_nan = graph.float64_constant(f64::from_bits(0x7ff8_0000_0000_0001));
    let nan32 = graph.float32_constant(f32::NAN);
    let half = graph.float32_constant(0.5);
    let neg_zero = graph.float64_constant(-0.0);

    let m = OperationMatcher::new(&graph);
    assert!(m.match_float(nan, f64::NAN));
    assert!(m.match_float(other_nan, f64::NAN));
    assert!(m.match_float(nan32, f64::NAN));
    assert!(m.match_nan(other_nan));
    assert!(m.match_float(half, 0.5));
    assert!(!m.match_float(half, 0.25));
    assert!(m.match_float(neg_zero, -0.0));
    assert_eq!(m.match_float32_constant(half), Some(0.5));
    assert_eq!(m.match_float64_constant(half), None);
}

#[test]
fn test_truncation_safe_binops_match_narrower_request() {
    for kind in TRUNCATION_SAFE {
        let mut graph = Graph::new();
        let a = graph.parameter(0, RegisterRepresentation::Word64);
        let b = graph.parameter(1, RegisterRepresentation::Word64);
        let op = graph.word_binop(a, b, kind, WordRepresentation::Word64);
        let m = OperationMatcher::new(&graph);
        assert_eq!(
            m.match_word_binop_of(op, kind, WordRepresentation::Word32),
            Some((a, b)),
            "{kind:?}"
        );
        assert_eq!(
            m.match_word_binop_of(op, kind, WordRepresentation::Word64),
            Some((a, b))
        );
    }
}

#[test]
fn test_truncation_unsafe_binops_reject_narrower_request() {
    for kind in TRUNCATION_UNSAFE {
        let mut graph = Graph::new();
        let a = graph.parameter(0, RegisterRepresentation::Word64);
        let b = graph.parameter(1, RegisterRepresentation::Word64);
        let op = graph.word_binop(a, b, kind, WordRepresentation::Word64);
        let m = OperationMatcher::new(&graph);
        assert_eq!(
            m.match_word_binop_of(op, kind, WordRepresentation::Word32),
            None,
            "{kind:?}"
        );
        assert!(m.match_word_binop_of(op, kind, WordRepresentation::Word64).is_some());
    }
}

#[test]
fn test_narrow_binop_never_matches_wider_request() {
    let mut graph = Graph::new();
    let a = graph.parameter(0, RegisterRepresentation::Word32);
    let b = graph.parameter(1, RegisterRepresentation::Word32);
    let add = graph.word_binop(a, b, WordBinopKind::Add, WordRepresentation::Word32);
    let m = OperationMatcher::new(&graph);
    assert!(m.match_word_add(add, WordRepresentation::Word64).is_none());
    assert!(m.match_word_sub(add, WordRepresentation::Word32).is_none());
    let matched = m.match_word_binop(add).expect("add is a word binop");
    assert_eq!(matched.kind, WordBinopKind::Add);
    assert_eq!(matched.rep, WordRepresentation::Word32);
}

#[test]
fn test_shift_amount_bounds() {
    for rep in [WordRepresentation::Word32, WordRepresentation::Word64] {
        let width = rep.bit_width();
        let mut graph = Graph::new();
        let x = graph.parameter(0, rep.into());
        let mut shift_by = |amount: u32| {
            let k = graph.word32_constant(amount);
            graph.shift(x, k, ShiftOpKind::ShiftLeft, rep)
        };
        let in_range = shift_by(width - 1);
        let at_width = shift_by(width);
        let past_width = shift_by(width + 1);

        let m = OperationMatcher::new(&graph);
        let matched = m.match_constant_shift(in_range).expect("in range");
        assert_eq!(matched.amount, width - 1);
        assert_eq!(matched.input, x);
        assert_eq!(matched.kind, ShiftOpKind::ShiftLeft);
        assert!(m.match_constant_shift(at_width).is_none());
        assert!(m.match_constant_shift(past_width).is_none());
        assert!(m.match_constant_left_shift(at_width, rep).is_none());
        assert_eq!(
            m.match_constant_shift_of(in_range, ShiftOpKind::ShiftLeft, rep),
            Some((x, width - 1))
        );
    }
}

#[test]
fn test_right_shift_matchers() {
    let mut graph = Graph::new();
    let x = graph.parameter(0, RegisterRepresentation::Word32);
    let three = graph.word32_constant(3);
    let sar = graph.shift(
        x,
        three,
        ShiftOpKind::ShiftRightArithmeticShiftOutZeros,
        WordRepresentation::Word32,
    );
    let shl = graph.shift(x, three, ShiftOpKind::ShiftLeft, WordRepresentation::Word32);
    let m = OperationMatcher::new(&graph);
    assert_eq!(
        m.match_constant_right_shift(sar, WordRepresentation::Word32),
        Some((x, 3))
    );
    assert_eq!(
        m.match_constant_shift_right_arithmetic_shift_out_zeros(sar, WordRepresentation::Word32),
        Some((x, 3))
    );
    assert!(m.match_constant_right_shift(shl, WordRepresentation::Word32).is_none());
    assert!(m.match_constant_right_shift(sar, WordRepresentation::Word64).is_none());
}

#[test]
fn test_power_of_two_recognition() {
    let mut graph = Graph::new();
    let yes = [1u32, 2, 4, 1 << 31].map(|v| graph.word32_constant(v));
    let no = [0u32, 3, (-4i32) as u32, u32::MAX].map(|v| graph.word32_constant(v));
    let m = OperationMatcher::new(&graph);
    for (index, expected) in yes.into_iter().zip([1u32, 2, 4, 1 << 31]) {
        assert_eq!(m.match_power_of_two_word32_constant(index), Some(expected));
    }
    for index in no {
        assert_eq!(m.match_power_of_two_word32_constant(index), None);
    }
}

#[test]
fn test_power_of_two_at_word64() {
    let mut graph = Graph::new();
    let big = graph.word64_constant(1 << 40);
    let negative = graph.word64_constant((-8i64) as u64);
    let sign_bit = graph.word64_constant(1 << 63);
    let word32_sign_bit = graph.word32_constant(1 << 31);
    let m = OperationMatcher::new(&graph);
    assert_eq!(
        m.match_power_of_two_word_constant(big, WordRepresentation::Word64),
        Some(1 << 40)
    );
    assert_eq!(
        m.match_power_of_two_word_constant(big, WordRepresentation::Word32),
        None
    );
    assert_eq!(
        m.match_power_of_two_word_constant(negative, WordRepresentation::Word64),
        None
    );
    assert_eq!(
        m.match_power_of_two_word_constant(sign_bit, WordRepresentation::Word64),
        None
    );
    // Sign-extended at word64, so negative there; unsigned at word32.
    assert_eq!(
        m.match_power_of_two_word_constant(word32_sign_bit, WordRepresentation::Word64),
        None
    );
    assert_eq!(
        m.match_power_of_two_word_constant(word32_sign_bit, WordRepresentation::Word32),
        Some(1 << 31)
    );
}

#[test]
fn test_match_phi_input_count() {
    let mut graph = Graph::new();
    let a = graph.word32_constant(1);
    let b = graph.word32_constant(2);
    let phi = graph.phi(vec![a, b], RegisterRepresentation::Word32);
    let m = OperationMatcher::new(&graph);
    assert!(m.match_phi(phi, None));
    assert!(m.match_phi(phi, Some(2)));
    assert!(!m.match_phi(phi, Some(3)));
    assert!(!m.match_phi(a, None));
}

#[test]
fn test_float_and_comparison_matchers() {
    let mut graph = Graph::new();
    let x = graph.parameter(0, RegisterRepresentation::Float64);
    let y = graph.parameter(1, RegisterRepresentation::Float64);
    let floor = graph.float_unary(x, FloatUnaryKind::RoundDown, FloatRepresentation::Float64);
    let diff = graph.float_binop(x, y, FloatBinopKind::Sub, FloatRepresentation::Float64);
    let w = graph.parameter(2, RegisterRepresentation::Word32);
    let eq = graph.comparison(
        w,
        w,
        osprey_vm_ir::operations::ComparisonKind::Equal,
        RegisterRepresentation::Word32,
    );

    let m = OperationMatcher::new(&graph);
    assert_eq!(m.match_float_round_down(floor, FloatRepresentation::Float64), Some(x));
    assert!(m.match_float_round_down(floor, FloatRepresentation::Float32).is_none());
    assert_eq!(m.match_float_sub(diff, FloatRepresentation::Float64), Some((x, y)));
    assert!(
        m.match_float_binary(diff, FloatBinopKind::Add, FloatRepresentation::Float64)
            .is_none()
    );
    assert_eq!(m.match_equal(eq, RegisterRepresentation::Word32), Some((w, w)));
    assert!(m.match_equal(eq, RegisterRepresentation::Word64).is_none());
}

#[test]
fn test_matcher_does_not_mutate_graph() {
    let mut graph = Graph::new();
    let a = graph.word32_constant(8);
    let b = graph.parameter(0, RegisterRepresentation::Word32);
    graph.word_binop(b, a, WordBinopKind::Mul, WordRepresentation::Word32);
    let before = graph.to_string();

    let m = OperationMatcher::new(&graph);
    for (index, _) in graph.iter() {
        let _ = m.match_zero(index);
        let _ = m.match_word_mul(index, WordRepresentation::Word32);
        let _ = m.match_power_of_two_word32_constant(index);
    }
    assert_eq!(graph.to_string(), before);
}
