//! # Osprey VM JIT
//!
//! Code stubs: small machine-level routines generated on demand, keyed by
//! their parameters and cached for the lifetime of the heap.
//!
//! ## Design
//!
//! - **Keys**: a [`CodeStubKey`] packs the stub kind and its parameters
//!   into one `u32`; [`stubs::dispatch`] rebuilds a stub from its key
//! - **Pipeline**: stub graph, verification, matcher-driven peephole pass,
//!   instruction selection onto zone-scoped machine operators, encoding
//! - **Placement**: code is written into the code space under a
//!   [`osprey_vm_gc::CodeSpaceMemoryModificationScope`], so code pages are
//!   only writable while a stub is being installed
//! - **Cache**: one [`StubCache`] entry per key; a hit never touches the heap

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod assembler;
pub mod cache;
pub mod encoder;
pub mod error;
pub mod key;
pub mod peephole;
pub mod selector;
pub mod stubs;

pub use assembler::StubAssembler;
pub use cache::{Code, CodeStats, StubCache, StubCacheConfig};
pub use encoder::{DecodedCode, DecodedInstruction, DecodedStub};
pub use error::{Result, StubError};
pub use key::{CodeStubKey, Major, major_name};
pub use peephole::PeepholeStats;
pub use selector::{
    Immediate, Instruction, InstructionCode, InstructionSelector, InstructionSequence,
    VirtualRegister,
};
pub use stubs::{
    CodeStub, CodeStubDescriptor, ElementAddressStub, FieldRepresentation, LoadFieldStub,
    StackCheckStub, StoreFieldStub,
};
