//! Stack effect of symbolic instructions
//!
//! The exporter folds these effects over an instruction stream to size
//! each frame's operand stack ahead of time.

use crate::compiler::symbolic::{Payload, SymInstr};
use kiln_bytecode::Opcode;

/// Describes how an instruction affects the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    /// Number of values consumed from the stack
    pub pop: usize,
    /// Number of values pushed to the stack
    pub push: usize,
}

impl StackEffect {
    /// Create a new stack effect
    pub const fn new(pop: usize, push: usize) -> Self {
        Self { pop, push }
    }

    /// Net effect on stack depth (can be negative)
    pub fn net_effect(&self) -> isize {
        self.push as isize - self.pop as isize
    }

    /// Apply this effect to a stack depth; `None` on underflow
    pub fn apply(&self, depth: usize) -> Option<usize> {
        depth.checked_sub(self.pop).map(|d| d + self.push)
    }
}

/// Get the stack effect for an instruction; pseudo-instructions have none
pub fn stack_effect(instr: &SymInstr) -> Option<StackEffect> {
    use Opcode::*;

    let count = instr.arg as usize;
    let effect = match instr.opcode {
        PushNil | PushTrue | PushFalse | PushInt | PushLiteral => StackEffect::new(0, 1),
        Pop => StackEffect::new(1, 0),
        Dup => StackEffect::new(1, 2),

        LoadLocal | LoadUpval | LoadSelf | LoadVar | DeclareVar => StackEffect::new(0, 1),
        StoreLocal | StoreUpval | BindUpval => StackEffect::new(1, 0),
        // Consumes the value, produces the var
        SetVar => StackEffect::new(1, 1),

        Jump => StackEffect::new(0, 0),
        JumpIfFalse => StackEffect::new(1, 0),

        // Captures go to a side buffer, not the operand stack
        CaptureUpval => StackEffect::new(0, 0),
        MakeClosure => StackEffect::new(0, 1),
        // Function below its arguments
        Call => StackEffect::new(count + 1, 1),
        Return => StackEffect::new(1, 0),
        ArityEq | ArityAtLeast | ArityFail => StackEffect::new(0, 0),

        MakeVector | MakeArrayMap | MakeHashMap | MakeSet => StackEffect::new(count, 1),

        PushHandler | PopHandler => StackEffect::new(0, 0),
        Throw => StackEffect::new(1, 0),
        // Keeps the tested value, adds the boolean
        IsInstance => StackEffect::new(1, 2),

        MethodCall => match &instr.payload {
            Some(Payload::Method { arity, .. }) => StackEffect::new(*arity as usize + 1, 1),
            _ => return None,
        },

        SetLabel | Nop => return None,
    };
    Some(effect)
}
