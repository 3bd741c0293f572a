//! Bytecode representation for kiln
//!
//! This crate defines the exported instruction set, the immutable code
//! objects the VM executes, and their persisted binary form.

#![warn(missing_docs)]

pub mod code;
pub mod disasm;
pub mod error;
pub mod format;
pub mod inline_cache;
pub mod opcode;
pub mod source_map;

pub use code::Code;
pub use error::{FormatError, FormatResult};
pub use inline_cache::{InlineCache, MethodSite};
pub use opcode::{Opcode, Operand};
pub use source_map::{LineTable, SourceLocation};

/// A single bytecode instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// The operation code
    pub opcode: Opcode,
    /// Operand, interpreted according to [`Opcode::operand`]
    pub arg: u32,
}

impl Instruction {
    /// Create a new instruction without an argument
    pub fn new(opcode: Opcode) -> Self {
        Self { opcode, arg: 0 }
    }

    /// Create a new instruction with an argument
    pub fn with_arg(opcode: Opcode, arg: u32) -> Self {
        Self { opcode, arg }
    }

    /// Operand as a signed immediate
    pub fn int_arg(&self) -> i32 {
        self.arg as i32
    }
}
