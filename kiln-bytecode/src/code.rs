//! Executable code objects

use crate::inline_cache::MethodSite;
use crate::source_map::{LineTable, SourceLocation};
use crate::Instruction;
use kiln_core::{Value, Var};
use std::sync::Arc;

/// An immutable, executable function body
///
/// Produced by the compiler's exporter and shared between every closure
/// created from it. All operands are resolved: jumps hold absolute
/// offsets and table operands index the side tables below.
#[derive(Debug)]
pub struct Code {
    /// Function name for backtraces
    pub name: Option<Arc<str>>,
    /// Source file the function was compiled from
    pub file: Option<Arc<str>>,
    /// The bytecode instructions
    pub instructions: Vec<Instruction>,
    /// Literal table
    pub literals: Vec<Value>,
    /// Global variables referenced by the body
    pub vars: Vec<Arc<Var>>,
    /// Nested function bodies
    pub codes: Vec<Arc<Code>>,
    /// Method call sites with their caches
    pub methods: Vec<MethodSite>,
    /// Largest operand stack depth the body can reach
    pub max_stack: usize,
    /// Local slots, including parameters
    pub local_slots: usize,
    /// Upvalue slots, imported ones first
    pub upvalue_slots: usize,
    /// Upvalues supplied by the enclosing closure
    pub imported_upvalues: usize,
    /// Offset to source line mapping
    pub lines: LineTable,
}

impl Code {
    /// Name used in backtraces and disassembly
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("fn")
    }

    /// Source location of the instruction at `offset`
    pub fn location(&self, offset: usize) -> SourceLocation {
        SourceLocation {
            file: self.file.clone(),
            line: self.lines.line_for(offset),
            offset,
        }
    }

    /// Upvalue slots owned by this body rather than imported
    pub fn own_upvalues(&self) -> usize {
        self.upvalue_slots - self.imported_upvalues
    }
}
