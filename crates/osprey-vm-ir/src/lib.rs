//! # Osprey VM IR
//!
//! Machine-level operators and the operation graph the optimizing tier
//! lowers to.
//!
//! ## Design
//!
//! - **Operators**: immutable descriptors (opcode, properties, arity,
//!   parameter) compared structurally by opcode and parameter
//! - **Catalog**: [`MachineOperatorBuilder`] hands out process-wide cached
//!   singletons where the parameter domain is closed, and zone-allocated
//!   operators otherwise
//! - **Matcher**: [`OperationMatcher`] answers read-only shape queries over
//!   a frozen [`Graph`]

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod builder;
pub mod error;
pub mod graph;
pub mod machine_operator;
pub mod machine_type;
pub mod matcher;
pub mod opcode;
pub mod operations;
pub mod operator;
pub mod operator_cache;
pub mod zone;

pub use builder::{
    AlignmentRequirements, MachineOperatorBuilder, MachineOperatorFlags, OperatorSummary,
    OptionalOperator,
};
pub use error::{GraphError, Result};
pub use graph::{Graph, OpIndex};
pub use machine_operator::{
    ShiftKind, StackCheckKind, StackSlotRepresentation, StoreRepresentation, WriteBarrierKind,
};
pub use machine_type::{MachineRepresentation, MachineSemantic, MachineType};
pub use matcher::OperationMatcher;
pub use opcode::IrOpcode;
pub use operator::{Arity, OpParameter, Operator, OperatorProperties};
pub use operator_cache::OperatorCache;
pub use zone::Zone;
