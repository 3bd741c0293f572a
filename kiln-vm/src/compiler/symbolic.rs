//! Symbolic instructions produced by the emitter
//!
//! Before export, jump operands name labels, local and upvalue operands
//! may still be rewritten, and table operands travel as payloads.

use kiln_bytecode::{Code, Opcode};
use kiln_core::{TypeTag, Value, Var};
use std::sync::Arc;

/// Jump target placeholder, resolved by `SetLabel` at export
pub type Label = u32;

/// Out-of-band operand, pooled into a side table at export
#[derive(Debug, Clone)]
pub enum Payload {
    Literal(Value),
    Var(Arc<Var>),
    Code(Arc<Code>),
    Method { name: Arc<str>, arity: u32 },
    Type(TypeTag),
}

#[derive(Debug, Clone)]
pub struct SymInstr {
    pub opcode: Opcode,
    pub arg: u32,
    pub payload: Option<Payload>,
    /// Source line, `0` when unknown
    pub line: u32,
}

impl SymInstr {
    pub fn new(opcode: Opcode, arg: u32) -> Self {
        Self {
            opcode,
            arg,
            payload: None,
            line: 0,
        }
    }

    pub fn with_payload(opcode: Opcode, payload: Payload) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(opcode, 0)
        }
    }

    pub fn at(mut self, line: u32) -> Self {
        self.line = line;
        self
    }
}
