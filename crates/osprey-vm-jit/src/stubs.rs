//! Code stubs
//!
//! A stub is a small machine-level routine identified by its
//! [`CodeStubKey`]. Every stub can rebuild itself from its minor key, which
//! is what [`dispatch`] relies on.

use std::fmt;

use osprey_vm_ir::operations::RegisterRepresentation;
use osprey_vm_ir::{MachineType, StackCheckKind, StoreRepresentation, WriteBarrierKind};

use crate::assembler::StubAssembler;
use crate::error::{Result, StubError};
use crate::key::{CodeStubKey, Major, major_name};

/// Parameter and return representations of a stub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeStubDescriptor {
    parameters: Vec<RegisterRepresentation>,
    returns: Vec<RegisterRepresentation>,
}

impl CodeStubDescriptor {
    #[allow(missing_docs)]
    pub fn new(parameters: Vec<RegisterRepresentation>, returns: Vec<RegisterRepresentation>) -> Self {
        Self {
            parameters,
            returns,
        }
    }

    /// Representation of parameter `index`. Panics if out of range.
    pub fn parameter(&self, index: u32) -> RegisterRepresentation {
        match self.parameters.get(index as usize) {
            Some(rep) => *rep,
            None => panic!(
                "parameter {index} out of range for a stub with {} parameters",
                self.parameters.len()
            ),
        }
    }

    #[allow(missing_docs)]
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    #[allow(missing_docs)]
    pub fn returns(&self) -> &[RegisterRepresentation] {
        &self.returns
    }
}

/// A stub the cache can generate and key
pub trait CodeStub: fmt::Debug {
    /// Stub kind
    fn major(&self) -> Major;

    /// Stub-specific parameters, packed
    fn minor_key(&self) -> u32;

    /// Cache key
    fn key(&self) -> CodeStubKey {
        CodeStubKey::new(self.major(), self.minor_key())
    }

    /// Printable name
    fn name(&self) -> &'static str {
        major_name(self.major())
    }

    /// Calling convention
    fn descriptor(&self) -> CodeStubDescriptor;

    /// Emit the stub's graph
    fn generate(&self, assembler: &mut StubAssembler);
}

/// Rebuild the stub a key was taken from
pub fn dispatch(key: CodeStubKey) -> Result<Box<dyn CodeStub>> {
    let minor = key.minor();
    let stub: Box<dyn CodeStub> = match key.major()? {
        Major::LoadField => Box::new(LoadFieldStub::from_minor_key(minor)?),
        Major::StoreField => Box::new(StoreFieldStub::from_minor_key(minor)?),
        Major::ElementAddress => Box::new(ElementAddressStub::from_minor_key(minor)?),
        Major::StackCheck => Box::new(StackCheckStub::from_minor_key(minor)?),
        Major::NoCache => unreachable!("NoCache stubs are never looked up by key"),
    };
    Ok(stub)
}

fn invalid(major: Major, minor: u32) -> StubError {
    StubError::InvalidMinorKey {
        major: major_name(major),
        minor,
    }
}

// ==================== Field representation ====================

/// In-object field layout a field stub accesses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldRepresentation {
    #[allow(missing_docs)]
    Word32 = 0,
    #[allow(missing_docs)]
    Word64 = 1,
    #[allow(missing_docs)]
    Float64 = 2,
    /// Any tagged value
    Tagged = 3,
}

impl FieldRepresentation {
    const ALL: [FieldRepresentation; 4] = [
        FieldRepresentation::Word32,
        FieldRepresentation::Word64,
        FieldRepresentation::Float64,
        FieldRepresentation::Tagged,
    ];

    fn from_bits(bits: u32) -> Option<Self> {
        Self::ALL.get(bits as usize).copied()
    }

    /// Machine type of a load of this field
    pub const fn machine_type(self) -> MachineType {
        match self {
            FieldRepresentation::Word32 => MachineType::int32(),
            FieldRepresentation::Word64 => MachineType::int64(),
            FieldRepresentation::Float64 => MachineType::float64(),
            FieldRepresentation::Tagged => MachineType::any_tagged(),
        }
    }

    /// Register class the field value travels in
    pub const fn register_representation(self) -> RegisterRepresentation {
        match self {
            FieldRepresentation::Word32 => RegisterRepresentation::Word32,
            FieldRepresentation::Word64 => RegisterRepresentation::Word64,
            FieldRepresentation::Float64 => RegisterRepresentation::Float64,
            FieldRepresentation::Tagged => RegisterRepresentation::Tagged,
        }
    }

    /// Field size in bytes
    pub const fn size(self) -> u32 {
        self.machine_type().representation.element_size()
    }
}

fn check_field_offset(offset: u16, rep: FieldRepresentation) {
    assert!(
        u32::from(offset) % rep.size() == 0,
        "field offset {offset} is not aligned to {rep:?}"
    );
}

// ==================== LoadField ====================

/// `(object) -> object[offset]`
///
/// Minor key: offset in bits 0..16, representation in bits 16..18.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadFieldStub {
    offset: u16,
    rep: FieldRepresentation,
}

impl LoadFieldStub {
    /// Panics if `offset` is not aligned to the field size.
    pub fn new(offset: u16, rep: FieldRepresentation) -> Self {
        check_field_offset(offset, rep);
        Self { offset, rep }
    }

    fn from_minor_key(minor: u32) -> Result<Self> {
        let offset = (minor & 0xFFFF) as u16;
        let rep = FieldRepresentation::from_bits(minor >> 16)
            .ok_or_else(|| invalid(Major::LoadField, minor))?;
        if u32::from(offset) % rep.size() != 0 {
            return Err(invalid(Major::LoadField, minor));
        }
        Ok(Self { offset, rep })
    }
}

impl CodeStub for LoadFieldStub {
    fn major(&self) -> Major {
        Major::LoadField
    }

    fn minor_key(&self) -> u32 {
        u32::from(self.offset) | (self.rep as u32) << 16
    }

    fn descriptor(&self) -> CodeStubDescriptor {
        CodeStubDescriptor::new(
            vec![RegisterRepresentation::Tagged],
            vec![self.rep.register_representation()],
        )
    }

    fn generate(&self, assembler: &mut StubAssembler) {
        let object = assembler.parameter(0);
        let value = assembler.load(object, i32::from(self.offset), self.rep.machine_type());
        assembler.return_values(vec![value]);
    }
}

// ==================== StoreField ====================

/// `(object, value) -> ()`, storing `value` to `object[offset]`
///
/// Minor key: offset in bits 0..16, representation in bits 16..18, write
/// barrier in bit 18.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreFieldStub {
    offset: u16,
    rep: FieldRepresentation,
    write_barrier: bool,
}

impl StoreFieldStub {
    /// Panics if `offset` is misaligned or a barrier is requested for an
    /// untagged field.
    pub fn new(offset: u16, rep: FieldRepresentation, write_barrier: bool) -> Self {
        check_field_offset(offset, rep);
        assert!(
            !write_barrier || rep == FieldRepresentation::Tagged,
            "write barrier on untagged {rep:?} field"
        );
        Self {
            offset,
            rep,
            write_barrier,
        }
    }

    fn from_minor_key(minor: u32) -> Result<Self> {
        let offset = (minor & 0xFFFF) as u16;
        let rep = FieldRepresentation::from_bits((minor >> 16) & 0b11)
            .ok_or_else(|| invalid(Major::StoreField, minor))?;
        let write_barrier = minor & (1 << 18) != 0;
        let valid = minor >> 19 == 0
            && u32::from(offset) % rep.size() == 0
            && (!write_barrier || rep == FieldRepresentation::Tagged);
        if !valid {
            return Err(invalid(Major::StoreField, minor));
        }
        Ok(Self {
            offset,
            rep,
            write_barrier,
        })
    }

    /// Store representation attached to the emitted store
    pub fn store_representation(&self) -> StoreRepresentation {
        let barrier = if self.write_barrier {
            WriteBarrierKind::FullWriteBarrier
        } else {
            WriteBarrierKind::NoWriteBarrier
        };
        StoreRepresentation::new(self.rep.machine_type().representation, barrier)
    }
}

impl CodeStub for StoreFieldStub {
    fn major(&self) -> Major {
        Major::StoreField
    }

    fn minor_key(&self) -> u32 {
        u32::from(self.offset) | (self.rep as u32) << 16 | u32::from(self.write_barrier) << 18
    }

    fn descriptor(&self) -> CodeStubDescriptor {
        CodeStubDescriptor::new(
            vec![
                RegisterRepresentation::Tagged,
                self.rep.register_representation(),
            ],
            Vec::new(),
        )
    }

    fn generate(&self, assembler: &mut StubAssembler) {
        let object = assembler.parameter(0);
        let value = assembler.parameter(1);
        assembler.store(
            object,
            value,
            i32::from(self.offset),
            self.store_representation(),
        );
        assembler.return_values(Vec::new());
    }
}

// ==================== ElementAddress ====================

/// `(base, index: word32) -> base + header + index * element_size`
///
/// Minor key: log2 of the element size in bits 0..2, header size in bits
/// 2..18.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementAddressStub {
    element_size_log2: u8,
    header_size: u16,
}

impl ElementAddressStub {
    /// Panics unless the element size is 1, 2, 4 or 8 bytes.
    pub fn new(element_size_log2: u8, header_size: u16) -> Self {
        assert!(
            element_size_log2 <= 3,
            "element size 2^{element_size_log2} is not a machine word size"
        );
        Self {
            element_size_log2,
            header_size,
        }
    }

    fn from_minor_key(minor: u32) -> Result<Self> {
        if minor >> 18 != 0 {
            return Err(invalid(Major::ElementAddress, minor));
        }
        Ok(Self {
            element_size_log2: (minor & 0b11) as u8,
            header_size: (minor >> 2) as u16,
        })
    }

    /// Element size in bytes
    pub fn element_size(&self) -> u32 {
        1 << self.element_size_log2
    }
}

impl CodeStub for ElementAddressStub {
    fn major(&self) -> Major {
        Major::ElementAddress
    }

    fn minor_key(&self) -> u32 {
        u32::from(self.element_size_log2) | u32::from(self.header_size) << 2
    }

    fn descriptor(&self) -> CodeStubDescriptor {
        CodeStubDescriptor::new(
            vec![RegisterRepresentation::Word64, RegisterRepresentation::Word32],
            vec![RegisterRepresentation::Word64],
        )
    }

    fn generate(&self, assembler: &mut StubAssembler) {
        let base = assembler.parameter(0);
        let index = assembler.parameter(1);
        let index = assembler.change_uint32_to_word(index);
        let element_size = assembler.intptr_constant(i64::from(self.element_size()));
        let offset = assembler.intptr_mul(index, element_size);
        let header = assembler.intptr_constant(i64::from(self.header_size));
        let offset = assembler.intptr_add(offset, header);
        let address = assembler.intptr_add(base, offset);
        assembler.return_values(vec![address]);
    }
}

// ==================== StackCheck ====================

/// `(limit) -> sp > limit`
///
/// Minor key: the stack check kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackCheckStub {
    kind: StackCheckKind,
}

impl StackCheckStub {
    const KINDS: [StackCheckKind; 4] = [
        StackCheckKind::JsFunctionEntry,
        StackCheckKind::JsIterationBody,
        StackCheckKind::CodeStubAssembler,
        StackCheckKind::Wasm,
    ];

    #[allow(missing_docs)]
    pub fn new(kind: StackCheckKind) -> Self {
        Self { kind }
    }

    fn from_minor_key(minor: u32) -> Result<Self> {
        Self::KINDS
            .get(minor as usize)
            .map(|&kind| Self { kind })
            .ok_or_else(|| invalid(Major::StackCheck, minor))
    }
}

impl CodeStub for StackCheckStub {
    fn major(&self) -> Major {
        Major::StackCheck
    }

    fn minor_key(&self) -> u32 {
        Self::KINDS
            .iter()
            .position(|kind| *kind == self.kind)
            .unwrap_or_default() as u32
    }

    fn descriptor(&self) -> CodeStubDescriptor {
        CodeStubDescriptor::new(
            vec![RegisterRepresentation::Word64],
            vec![RegisterRepresentation::Word32],
        )
    }

    fn generate(&self, assembler: &mut StubAssembler) {
        let limit = assembler.parameter(0);
        let check = assembler.stack_pointer_greater_than(limit, self.kind);
        assembler.return_values(vec![check]);
    }
}

/// Stubs worth having before the first request: field accessors for every
/// tagged slot of a small object header and the common stack checks.
pub fn ahead_of_time_stubs() -> Vec<Box<dyn CodeStub>> {
    let mut stubs: Vec<Box<dyn CodeStub>> = Vec::new();
    for offset in (0..32u16).step_by(8) {
        stubs.push(Box::new(LoadFieldStub::new(offset, FieldRepresentation::Tagged)));
        stubs.push(Box::new(StoreFieldStub::new(
            offset,
            FieldRepresentation::Tagged,
            true,
        )));
    }
    stubs.push(Box::new(StackCheckStub::new(StackCheckKind::JsFunctionEntry)));
    stubs.push(Box::new(StackCheckStub::new(StackCheckKind::JsIterationBody)));
    stubs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_stubs() -> Vec<Box<dyn CodeStub>> {
        vec![
            Box::new(LoadFieldStub::new(24, FieldRepresentation::Tagged)),
            Box::new(LoadFieldStub::new(12, FieldRepresentation::Word32)),
            Box::new(StoreFieldStub::new(16, FieldRepresentation::Float64, false)),
            Box::new(StoreFieldStub::new(8, FieldRepresentation::Tagged, true)),
            Box::new(ElementAddressStub::new(3, 16)),
            Box::new(StackCheckStub::new(StackCheckKind::Wasm)),
        ]
    }

    #[test]
    fn test_dispatch_rebuilds_stub_from_key() {
        for stub in all_stubs() {
            let rebuilt = dispatch(stub.key()).expect("known key");
            assert_eq!(rebuilt.key(), stub.key());
            assert_eq!(rebuilt.name(), stub.name());
            assert_eq!(rebuilt.descriptor(), stub.descriptor());
        }
    }

    #[test]
    fn test_distinct_parameters_give_distinct_keys() {
        let keys: Vec<_> = all_stubs().iter().map(|stub| stub.key()).collect();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_invalid_minor_keys_are_rejected() {
        // Barrier on a word32 field.
        let key = CodeStubKey::new(Major::StoreField, 1 << 18);
        assert_eq!(
            dispatch(key).map(|stub| stub.key()),
            Err(StubError::InvalidMinorKey {
                major: "StoreFieldStub",
                minor: 1 << 18,
            })
        );
        // Misaligned word64 load.
        let key = CodeStubKey::new(Major::LoadField, 4 | 1 << 16);
        assert!(dispatch(key).is_err());
        let key = CodeStubKey::new(Major::StackCheck, 9);
        assert!(dispatch(key).is_err());
    }

    #[test]
    fn test_unknown_major_is_an_error() {
        let key = CodeStubKey::from_raw(0xEE);
        assert_eq!(
            dispatch(key).map(|stub| stub.key()),
            Err(StubError::UnknownMajorKey(0xEE))
        );
    }

    #[test]
    #[should_panic(expected = "never looked up")]
    fn test_dispatch_of_no_cache_is_unreachable() {
        let _ = dispatch(CodeStubKey::new(Major::NoCache, 0));
    }

    #[test]
    fn test_generated_graphs_verify() {
        for stub in all_stubs() {
            let mut assembler = StubAssembler::new(stub.descriptor());
            stub.generate(&mut assembler);
            let graph = assembler.finish();
            assert!(graph.verify().is_ok(), "{} does not verify", stub.name());
        }
    }

    #[test]
    fn test_store_representation_follows_barrier_flag() {
        let stub = StoreFieldStub::new(8, FieldRepresentation::Tagged, true);
        assert_eq!(
            stub.store_representation().write_barrier_kind(),
            WriteBarrierKind::FullWriteBarrier
        );
        let stub = StoreFieldStub::new(8, FieldRepresentation::Tagged, false);
        assert_eq!(
            stub.store_representation().write_barrier_kind(),
            WriteBarrierKind::NoWriteBarrier
        );
    }

    #[test]
    #[should_panic(expected = "write barrier on untagged")]
    fn test_barrier_on_untagged_field_panics() {
        let _ = StoreFieldStub::new(8, FieldRepresentation::Word64, true);
    }
}
