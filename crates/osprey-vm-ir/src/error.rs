//! IR graph errors

use thiserror::Error;

use crate::graph::OpIndex;

/// Errors reported by graph verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An operation refers to an index that is not defined before it
    #[error("{user} uses {input}, which is not defined before it")]
    InputOutOfRange {
        /// Operation holding the input
        user: OpIndex,
        /// Offending input
        input: OpIndex,
    },

    /// A phi's input count disagrees with what the caller declared
    #[error("phi {phi} has {actual} inputs, expected {expected}")]
    PhiArityMismatch {
        /// The phi
        phi: OpIndex,
        /// Declared input count
        expected: usize,
        /// Actual input count
        actual: usize,
    },

    /// An operation consumes a value from an operation that produces none
    #[error("{user} uses {input}, which produces no value")]
    ValuelessInput {
        /// Operation holding the input
        user: OpIndex,
        /// Offending input
        input: OpIndex,
    },

    /// The graph has no operations
    #[error("graph is empty")]
    Empty,
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
