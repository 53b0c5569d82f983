//! Operators: effect- and arity-annotated instruction descriptors
//!
//! An [`Operator`] describes the shape of one IR instruction kind: its
//! opcode, algebraic and side-effect properties, how many value, effect and
//! control edges it consumes and produces, and an optional immediate
//! parameter. Operators are immutable once built and are compared
//! structurally by opcode plus parameter.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::machine_operator::{
    LoadTransformParameters, ShiftKind, StackCheckKind, StackSlotRepresentation,
    StoreRepresentation,
};
use crate::machine_type::{MachineRepresentation, MachineType};
use crate::opcode::IrOpcode;

/// Operator property bitset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct OperatorProperties(u8);

impl OperatorProperties {
    /// No properties
    pub const NO_PROPERTIES: Self = Self(0);
    /// `a op b == b op a`
    pub const COMMUTATIVE: Self = Self(1 << 0);
    /// `(a op b) op c == a op (b op c)`
    pub const ASSOCIATIVE: Self = Self(1 << 1);
    /// Evaluating twice yields the same result
    pub const IDEMPOTENT: Self = Self(1 << 2);
    /// Does not read memory
    pub const NO_READ: Self = Self(1 << 3);
    /// Does not write memory
    pub const NO_WRITE: Self = Self(1 << 4);
    /// Cannot throw
    pub const NO_THROW: Self = Self(1 << 5);
    /// Cannot deoptimize
    pub const NO_DEOPT: Self = Self(1 << 6);

    /// Neither reads nor writes memory
    pub const FOLDABLE: Self = Self(Self::NO_READ.0 | Self::NO_WRITE.0);
    /// Control-only operator
    pub const KONTROL: Self = Self(Self::NO_DEOPT.0 | Self::FOLDABLE.0 | Self::IDEMPOTENT.0);
    /// Removable when the result is unused
    pub const ELIMINATABLE: Self = Self(Self::NO_DEOPT.0 | Self::NO_WRITE.0 | Self::NO_THROW.0);
    /// Free of observable effects; safe to CSE and rematerialize
    pub const PURE: Self = Self(
        Self::NO_DEOPT.0 | Self::NO_READ.0 | Self::NO_WRITE.0 | Self::NO_THROW.0 | Self::IDEMPOTENT.0,
    );

    /// Raw bits
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Union of two property sets
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether every property in `other` is present
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OperatorProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for OperatorProperties {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Input and output edge counts of an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Arity {
    /// Value inputs
    pub value_in: u32,
    /// Effect inputs
    pub effect_in: u32,
    /// Control inputs
    pub control_in: u32,
    /// Value outputs
    pub value_out: u32,
    /// Effect outputs
    pub effect_out: u32,
    /// Control outputs
    pub control_out: u32,
}

impl Arity {
    /// Create an arity descriptor
    pub const fn new(
        value_in: u32,
        effect_in: u32,
        control_in: u32,
        value_out: u32,
        effect_out: u32,
        control_out: u32,
    ) -> Self {
        Self {
            value_in,
            effect_in,
            control_in,
            value_out,
            effect_out,
            control_out,
        }
    }

    /// Total number of inputs
    pub const fn input_count(&self) -> u32 {
        self.value_in + self.effect_in + self.control_in
    }
}

/// Immediate parameter carried by an operator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpParameter {
    /// Parameterless operator
    None,
    /// Machine type of a load or atomic operation
    MachineType(MachineType),
    /// Representation of an unaligned or atomic store
    Representation(MachineRepresentation),
    /// Representation and write barrier of a store
    Store(StoreRepresentation),
    /// Variant of an arithmetic right shift
    Shift(ShiftKind),
    /// Size and alignment of a stack slot
    StackSlot(StackSlotRepresentation),
    /// SIMD lane index
    Lane(u8),
    /// SIMD byte shuffle
    Shuffle([u8; 16]),
    /// Load kind and transformation of a SIMD load
    LoadTransform(LoadTransformParameters),
    /// Origin of a stack check
    StackCheck(StackCheckKind),
    /// Free-form comment text
    Comment(Box<str>),
}

impl fmt::Display for OpParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpParameter::None => Ok(()),
            OpParameter::MachineType(ty) => write!(f, "{ty}"),
            OpParameter::Representation(rep) => write!(f, "{rep}"),
            OpParameter::Store(store) => write!(f, "{store}"),
            OpParameter::Shift(kind) => write!(f, "{kind:?}"),
            OpParameter::StackSlot(slot) => write!(f, "{}, {}", slot.size, slot.alignment),
            OpParameter::Lane(lane) => write!(f, "{lane}"),
            OpParameter::Shuffle(shuffle) => {
                for (i, byte) in shuffle.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{byte}")?;
                }
                Ok(())
            }
            OpParameter::LoadTransform(params) => {
                write!(f, "{:?}, {:?}", params.kind, params.transformation)
            }
            OpParameter::StackCheck(kind) => write!(f, "{kind:?}"),
            OpParameter::Comment(text) => f.write_str(text),
        }
    }
}

/// Descriptor of one IR instruction kind
#[derive(Debug, Clone)]
pub struct Operator {
    opcode: IrOpcode,
    properties: OperatorProperties,
    mnemonic: &'static str,
    arity: Arity,
    parameter: OpParameter,
}

impl Operator {
    /// Create a parameterless operator
    pub const fn new(
        opcode: IrOpcode,
        properties: OperatorProperties,
        mnemonic: &'static str,
        arity: Arity,
    ) -> Self {
        Self {
            opcode,
            properties,
            mnemonic,
            arity,
            parameter: OpParameter::None,
        }
    }

    /// Create an operator carrying an immediate parameter
    pub fn with_parameter(
        opcode: IrOpcode,
        properties: OperatorProperties,
        mnemonic: &'static str,
        arity: Arity,
        parameter: OpParameter,
    ) -> Self {
        Self {
            opcode,
            properties,
            mnemonic,
            arity,
            parameter,
        }
    }

    /// Opcode
    #[inline]
    pub fn opcode(&self) -> IrOpcode {
        self.opcode
    }

    /// Mnemonic
    #[inline]
    pub fn mnemonic(&self) -> &'static str {
        self.mnemonic
    }

    /// Property set
    #[inline]
    pub fn properties(&self) -> OperatorProperties {
        self.properties
    }

    /// Whether all of `property` is set
    #[inline]
    pub fn has_property(&self, property: OperatorProperties) -> bool {
        self.properties.contains(property)
    }

    /// Edge counts
    #[inline]
    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Immediate parameter
    #[inline]
    pub fn parameter(&self) -> &OpParameter {
        &self.parameter
    }

    #[inline]
    #[allow(missing_docs)]
    pub fn value_input_count(&self) -> u32 {
        self.arity.value_in
    }
    #[inline]
    #[allow(missing_docs)]
    pub fn effect_input_count(&self) -> u32 {
        self.arity.effect_in
    }
    #[inline]
    #[allow(missing_docs)]
    pub fn control_input_count(&self) -> u32 {
        self.arity.control_in
    }
    #[inline]
    #[allow(missing_docs)]
    pub fn value_output_count(&self) -> u32 {
        self.arity.value_out
    }
    #[inline]
    #[allow(missing_docs)]
    pub fn effect_output_count(&self) -> u32 {
        self.arity.effect_out
    }
    #[inline]
    #[allow(missing_docs)]
    pub fn control_output_count(&self) -> u32 {
        self.arity.control_out
    }

    /// Pointer identity, usable only as a fast path before `==`.
    #[inline]
    pub fn same_instance(a: &Operator, b: &Operator) -> bool {
        std::ptr::eq(a, b)
    }
}

impl PartialEq for Operator {
    fn eq(&self, other: &Self) -> bool {
        Operator::same_instance(self, other)
            || (self.opcode == other.opcode && self.parameter == other.parameter)
    }
}

impl Eq for Operator {}

impl Hash for Operator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.opcode.hash(state);
        self.parameter.hash(state);
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic)?;
        if !matches!(self.parameter, OpParameter::None) {
            write!(f, "[{}]", self.parameter)?;
        }
        Ok(())
    }
}
