//! Compile-time and runtime error types

use kiln_bytecode::{Opcode, SourceLocation};
use kiln_core::Value;
use std::fmt;
use thiserror::Error;

/// Failure while lowering an expression tree to bytecode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Unable to resolve local binding: {0}")]
    UnresolvedLocal(String),

    #[error("Upvalue {0} is not known to the enclosing frame")]
    UnknownUpvalue(String),

    #[error("Can only recur from tail position")]
    RecurNotInTail,

    #[error("Mismatched argument count to recur, expected: {expected} args, got: {actual}")]
    RecurArity { expected: usize, actual: usize },

    #[error("Function must declare at least one arity")]
    NoArities,

    #[error("Can't have more than 1 variadic overload")]
    MultipleVariadic,

    #[error("Can't have 2 overloads with same arity: {0}")]
    DuplicateArity(usize),

    #[error("Can't have fixed arity function with more params than variadic function")]
    VariadicArityTooSmall,

    #[error("Variadic arity must declare a rest parameter")]
    MissingRestParam,

    #[error("{0} exceeds the instruction operand range")]
    OperandOverflow(&'static str),

    #[error("Label {0} is referenced but never placed")]
    UnresolvedLabel(u32),

    #[error("Label {0} is placed twice")]
    DuplicateLabel(u32),

    #[error("{0:?} is missing its payload")]
    MissingPayload(Opcode),

    #[error("{0:?} has no stack effect")]
    MissingStackEffect(Opcode),

    #[error("Operand stack underflow at {opcode:?} (depth {depth})")]
    StackUnderflow { opcode: Opcode, depth: usize },
}

/// One entry of a backtrace, innermost first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub location: SourceLocation,
}

/// Backtrace captured while an exception unwound
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace {
    pub frames: Vec<StackFrame>,
}

impl StackTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "  at {} ({})", frame.function, frame.location)?;
        }
        Ok(())
    }
}

/// Execution failure surfaced to the host
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A thrown value escaped every handler
    #[error("Uncaught exception: {value}\n  at {location}")]
    Uncaught {
        value: Value,
        location: SourceLocation,
        trace: StackTrace,
    },

    /// The VM reached a state well-formed code cannot produce
    #[error("Internal VM error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// The value that escaped, if any
    pub fn thrown(&self) -> Option<&Value> {
        match self {
            RuntimeError::Uncaught { value, .. } => Some(value),
            RuntimeError::Internal(_) => None,
        }
    }

    pub fn trace(&self) -> Option<&StackTrace> {
        match self {
            RuntimeError::Uncaught { trace, .. } => Some(trace),
            RuntimeError::Internal(_) => None,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
