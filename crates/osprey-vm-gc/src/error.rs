//! Heap error types

use thiserror::Error;

use crate::globals::{Address, AllocationSpace};

/// Recoverable heap failures.
///
/// Running out of room in a space is not an error; allocation reports it
/// through [`AllocationResult::Retry`](crate::AllocationResult::Retry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    /// The page allocator could not reserve a region
    #[error("failed to reserve {size} bytes for {space}")]
    ReservationFailed {
        /// Space the chunk was meant for
        space: AllocationSpace,
        /// Requested reservation size
        size: usize,
    },

    /// Requested area does not fit into a chunk of that space
    #[error("{requested} bytes do not fit into a {space} chunk (max {max})")]
    ChunkTooLarge {
        /// Space the chunk was meant for
        space: AllocationSpace,
        /// Requested object area
        requested: usize,
        /// Largest area the space accepts
        max: usize,
    },

    /// Address is not inside any chunk's object area
    #[error("{address:#x} is not inside the heap")]
    NotInHeap {
        /// Offending address
        address: Address,
    },
}

/// Result alias for heap operations
pub type Result<T> = std::result::Result<T, GcError>;
