//! Stub compilation errors

use osprey_vm_gc::{AllocationSpace, GcError};
use osprey_vm_ir::GraphError;
use thiserror::Error;

/// Errors produced while generating, selecting or placing stub code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StubError {
    /// Key names a major kind this build does not know
    #[error("unknown major key {0}")]
    UnknownMajorKey(u32),

    /// Minor key does not decode for its major kind
    #[error("minor key {minor:#x} is not valid for {major}")]
    InvalidMinorKey {
        /// Stub name of the major kind
        major: &'static str,
        /// Offending minor key
        minor: u32,
    },

    /// Generated graph failed verification
    #[error("stub graph is malformed: {0}")]
    Graph(#[from] GraphError),

    /// Heap rejected the code write
    #[error("heap error: {0}")]
    Gc(#[from] GcError),

    /// Code space stayed full after releasing pooled memory
    #[error("no room for {size} bytes of code in {space}")]
    PlacementFailed {
        /// Space that answered retry
        space: AllocationSpace,
        /// Encoded code size
        size: usize,
    },

    /// Operation has no lowering to a machine operator on this target
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Operation and the shape that failed
        operation: String,
    },

    /// Encoded instruction stream is truncated or carries an unknown code
    #[error("malformed code at byte {offset}")]
    MalformedCode {
        /// Byte offset of the bad record
        offset: usize,
    },
}

/// Result alias for stub compilation
pub type Result<T> = std::result::Result<T, StubError>;
