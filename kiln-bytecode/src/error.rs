//! Errors raised while persisting or loading code objects

use crate::Opcode;
use thiserror::Error;

/// Persisted-format failure
#[derive(Debug, Error)]
pub enum FormatError {
    /// Underlying reader or writer failed, including truncated input
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input does not start with the format magic
    #[error("Not a kiln code image")]
    BadMagic,

    /// Input was written by an incompatible format version
    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// Opcode byte outside the instruction set
    #[error("Unknown opcode byte {byte:#04x} at offset {offset}")]
    UnknownOpcode {
        /// Raw byte
        byte: u8,
        /// Instruction offset
        offset: usize,
    },

    /// Compile-time instruction found in persisted code
    #[error("Pseudo-instruction {opcode:?} at offset {offset}")]
    PseudoInstruction {
        /// Offending opcode
        opcode: Opcode,
        /// Instruction offset
        offset: usize,
    },

    /// Operand refers outside its table, slot range, or instruction array
    #[error("Operand {arg} of {opcode:?} at offset {offset} is out of range")]
    OperandOutOfRange {
        /// Offending opcode
        opcode: Opcode,
        /// Raw operand
        arg: u32,
        /// Instruction offset
        offset: usize,
    },

    /// Arity guard without its fall-through jump
    #[error("Arity guard at offset {0} is not followed by a jump")]
    MalformedGuard(usize),

    /// Frame shape fields contradict each other
    #[error("Invalid frame shape: {0}")]
    BadShape(&'static str),

    /// Line table offsets out of order
    #[error("Line table offsets are not ascending")]
    BadLineTable,

    /// Unknown literal encoding tag
    #[error("Unknown literal tag {0}")]
    UnknownLiteralTag(u8),

    /// Literal kind that has no persisted form
    #[error("Literal of type {0} cannot be persisted")]
    UnserializableLiteral(&'static str),

    /// String payload is not UTF-8
    #[error("Invalid UTF-8 in string payload")]
    InvalidUtf8,

    /// Var named by the image is unknown to the resolver
    #[error("Unresolved var {0}")]
    UnresolvedVar(String),

    /// Nested code or literals exceed the decoder's depth limit
    #[error("Nesting deeper than {0} levels")]
    TooDeep(usize),

    /// Bytes left over after the top-level code object
    #[error("Trailing bytes after code image")]
    TrailingBytes,
}

/// Result type for persisted-format operations
pub type FormatResult<T> = Result<T, FormatError>;
