//! Error types for value operations

use thiserror::Error;

/// Error raised by value-level operations and native functions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    /// Type mismatch error
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError {
        expected: &'static str,
        actual: &'static str,
    },

    /// Index out of bounds
    #[error("Index {index} out of bounds for collection of length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    /// Map literal or constructor received an odd number of forms
    #[error("Map requires an even number of forms, got {0}")]
    OddMapForms(usize),

    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Function arity mismatch
    #[error("Function expects {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for value operations
pub type ValueResult<T> = Result<T, ValueError>;
