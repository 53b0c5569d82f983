//! Code encoding
//!
//! Stub code is stored in the code space as a compact little-endian record
//! stream:
//!
//! ```text
//! header:      magic "OSPC" | key: u32 | instruction count: u32
//! instruction: code: u16 | flags: u8 | input count: u8
//!              | output: u32 (if flags & HAS_OUTPUT)
//!              | inputs: u32 * input count
//!              | immediate (tag in flags bits 1..4)
//! ```
//!
//! Machine instructions store their opcode id; pseudo instructions use ids
//! from [`PSEUDO_CODE_BASE`] upwards.

use std::fmt;

use osprey_vm_ir::IrOpcode;

use crate::error::{Result, StubError};
use crate::key::CodeStubKey;
use crate::selector::{Immediate, InstructionCode, InstructionSequence, VirtualRegister};

/// Magic bytes opening every encoded stub
pub const CODE_MAGIC: [u8; 4] = *b"OSPC";

/// Size of the stub header in bytes
pub const HEADER_SIZE: usize = 12;

/// First id used by pseudo instructions
pub const PSEUDO_CODE_BASE: u16 = 0xFF00;

const PARAMETER_CODE: u16 = PSEUDO_CODE_BASE;
const CONSTANT_CODE: u16 = PSEUDO_CODE_BASE + 1;
const PHI_CODE: u16 = PSEUDO_CODE_BASE + 2;
const RETURN_CODE: u16 = PSEUDO_CODE_BASE + 3;

const HAS_OUTPUT: u8 = 1;
const IMMEDIATE_SHIFT: u8 = 1;

const TAG_NONE: u8 = 0;
const TAG_WORD: u8 = 1;
const TAG_FLOAT32: u8 = 2;
const TAG_FLOAT64: u8 = 3;
const TAG_OFFSET: u8 = 4;
const TAG_INDEX: u8 = 5;

/// Encode `sequence` as the code of the stub with `key`.
///
/// Panics if an instruction has more than 255 inputs.
pub fn encode(key: CodeStubKey, sequence: &InstructionSequence<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + sequence.len() * 8);
    out.extend_from_slice(&CODE_MAGIC);
    out.extend_from_slice(&key.raw().to_le_bytes());
    out.extend_from_slice(&(sequence.len() as u32).to_le_bytes());

    for instruction in sequence.iter() {
        let code = match instruction.code {
            InstructionCode::Machine(op) => op.opcode().id(),
            InstructionCode::Parameter => PARAMETER_CODE,
            InstructionCode::Constant => CONSTANT_CODE,
            InstructionCode::Phi => PHI_CODE,
            InstructionCode::Return => RETURN_CODE,
        };
        let input_count = u8::try_from(instruction.inputs.len())
            .unwrap_or_else(|_| panic!("{instruction} has too many inputs to encode"));
        let tag = match instruction.immediate {
            Immediate::None => TAG_NONE,
            Immediate::Word(_) => TAG_WORD,
            Immediate::Float32(_) => TAG_FLOAT32,
            Immediate::Float64(_) => TAG_FLOAT64,
            Immediate::Offset(_) => TAG_OFFSET,
            Immediate::Index(_) => TAG_INDEX,
        };
        let flags = u8::from(instruction.output.is_some()) | tag << IMMEDIATE_SHIFT;

        out.extend_from_slice(&code.to_le_bytes());
        out.push(flags);
        out.push(input_count);
        if let Some(output) = instruction.output {
            out.extend_from_slice(&output.0.to_le_bytes());
        }
        for input in &instruction.inputs {
            out.extend_from_slice(&input.0.to_le_bytes());
        }
        match instruction.immediate {
            Immediate::None => {}
            Immediate::Word(bits) | Immediate::Float64(bits) => {
                out.extend_from_slice(&bits.to_le_bytes())
            }
            Immediate::Float32(bits) | Immediate::Index(bits) => {
                out.extend_from_slice(&bits.to_le_bytes())
            }
            Immediate::Offset(offset) => out.extend_from_slice(&offset.to_le_bytes()),
        }
    }
    out
}

/// Instruction kind read back from code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedCode {
    #[allow(missing_docs)]
    Machine(IrOpcode),
    #[allow(missing_docs)]
    Parameter,
    #[allow(missing_docs)]
    Constant,
    #[allow(missing_docs)]
    Phi,
    #[allow(missing_docs)]
    Return,
}

impl DecodedCode {
    /// Printable name
    pub fn mnemonic(self) -> &'static str {
        match self {
            DecodedCode::Machine(opcode) => opcode.mnemonic(),
            DecodedCode::Parameter => "Parameter",
            DecodedCode::Constant => "Constant",
            DecodedCode::Phi => "Phi",
            DecodedCode::Return => "Return",
        }
    }
}

/// One instruction read back from code
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct DecodedInstruction {
    pub code: DecodedCode,
    pub output: Option<VirtualRegister>,
    pub inputs: Vec<VirtualRegister>,
    pub immediate: Immediate,
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(output) = self.output {
            write!(f, "{output} = ")?;
        }
        f.write_str(self.code.mnemonic())?;
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

/// Stub code read back from the code space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStub {
    /// Key stored in the header
    pub key: CodeStubKey,
    #[allow(missing_docs)]
    pub instructions: Vec<DecodedInstruction>,
}

impl fmt::Display for DecodedStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.key)?;
        for instruction in &self.instructions {
            writeln!(f, "  {instruction}")?;
        }
        Ok(())
    }
}

/// Decode stub code produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<DecodedStub> {
    let mut reader = Reader { bytes, position: 0 };
    if reader.take(4)? != CODE_MAGIC {
        return Err(StubError::MalformedCode { offset: 0 });
    }
    let key = CodeStubKey::from_raw(reader.u32()?);
    let count = reader.u32()? as usize;

    let mut instructions = Vec::with_capacity(count.min(bytes.len() / 4));
    for _ in 0..count {
        let start = reader.position;
        let code = match reader.u16()? {
            PARAMETER_CODE => DecodedCode::Parameter,
            CONSTANT_CODE => DecodedCode::Constant,
            PHI_CODE => DecodedCode::Phi,
            RETURN_CODE => DecodedCode::Return,
            id => IrOpcode::from_id(id)
                .map(DecodedCode::Machine)
                .ok_or(StubError::MalformedCode { offset: start })?,
        };
        let flags = reader.u8()?;
        let input_count = reader.u8()?;
        let output = if flags & HAS_OUTPUT != 0 {
            Some(VirtualRegister(reader.u32()?))
        } else {
            None
        };
        let inputs = (0..input_count)
            .map(|_| reader.u32().map(VirtualRegister))
            .collect::<Result<Vec<_>>>()?;
        let immediate = match flags >> IMMEDIATE_SHIFT {
            TAG_NONE => Immediate::None,
            TAG_WORD => Immediate::Word(reader.u64()?),
            TAG_FLOAT32 => Immediate::Float32(reader.u32()?),
            TAG_FLOAT64 => Immediate::Float64(reader.u64()?),
            TAG_OFFSET => Immediate::Offset(reader.u32()? as i32),
            TAG_INDEX => Immediate::Index(reader.u32()?),
            _ => return Err(StubError::MalformedCode { offset: start }),
        };
        instructions.push(DecodedInstruction {
            code,
            output,
            inputs,
            immediate,
        });
    }
    Ok(DecodedStub { key, instructions })
}

struct Reader<'b> {
    bytes: &'b [u8],
    position: usize,
}

impl<'b> Reader<'b> {
    fn take(&mut self, len: usize) -> Result<&'b [u8]> {
        let end = self.position + len;
        let slice = self
            .bytes
            .get(self.position..end)
            .ok_or(StubError::MalformedCode {
                offset: self.position,
            })?;
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Major;
    use crate::selector::InstructionSelector;
    use osprey_vm_ir::operations::{RegisterRepresentation, WordBinopKind, WordRepresentation};
    use osprey_vm_ir::{Graph, MachineOperatorBuilder, MachineType, Zone};

    fn sample_graph() -> Graph {
        let mut graph = Graph::new();
        let object = graph.parameter(0, RegisterRepresentation::Tagged);
        let field = graph.load(object, -8, MachineType::int64());
        let half = graph.float64_constant(0.5);
        let one = graph.word64_constant(1);
        let sum = graph.word_binop(field, one, WordBinopKind::Add, WordRepresentation::Word64);
        graph.return_values(vec![sum, half]);
        graph
    }

    #[test]
    fn test_decoded_code_matches_selection() {
        let zone = Zone::new("encoder");
        let machine = MachineOperatorBuilder::with_defaults(&zone);
        let sequence = InstructionSelector::new(&machine)
            .select(&sample_graph())
            .expect("selection");
        let key = CodeStubKey::new(Major::LoadField, 7);
        let bytes = encode(key, &sequence);
        assert_eq!(&bytes[..4], b"OSPC");

        let decoded = decode(&bytes).expect("well-formed code");
        assert_eq!(decoded.key, key);
        assert_eq!(decoded.instructions.len(), sequence.len());
        for (selected, read) in sequence.iter().zip(&decoded.instructions) {
            assert_eq!(read.output, selected.output);
            assert_eq!(read.inputs, selected.inputs);
            assert_eq!(read.immediate, selected.immediate);
            let expected = match selected.code {
                InstructionCode::Machine(op) => DecodedCode::Machine(op.opcode()),
                InstructionCode::Parameter => DecodedCode::Parameter,
                InstructionCode::Constant => DecodedCode::Constant,
                InstructionCode::Phi => DecodedCode::Phi,
                InstructionCode::Return => DecodedCode::Return,
            };
            assert_eq!(read.code, expected);
        }
        let load = decoded
            .instructions
            .iter()
            .find(|i| i.code == DecodedCode::Machine(IrOpcode::Load))
            .expect("load");
        assert_eq!(load.immediate, Immediate::Offset(-8));
    }

    #[test]
    fn test_truncated_code_is_malformed() {
        let zone = Zone::new("encoder");
        let machine = MachineOperatorBuilder::with_defaults(&zone);
        let sequence = InstructionSelector::new(&machine)
            .select(&sample_graph())
            .expect("selection");
        let bytes = encode(CodeStubKey::new(Major::LoadField, 0), &sequence);
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            decode(truncated),
            Err(StubError::MalformedCode { .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_unknown_code() {
        assert_eq!(
            decode(b"NOPE\0\0\0\0\0\0\0\0"),
            Err(StubError::MalformedCode { offset: 0 })
        );

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&CODE_MAGIC);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0xFEFFu16.to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(
            decode(&bytes),
            Err(StubError::MalformedCode {
                offset: HEADER_SIZE
            })
        );
    }
}
