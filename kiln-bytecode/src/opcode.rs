//! Operation codes

use serde::{Deserialize, Serialize};

/// Bytecode operation codes for the kiln VM
///
/// Discriminants are the persisted encoding; append new opcodes at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // Constants
    /// Push nil
    PushNil,
    /// Push true
    PushTrue,
    /// Push false
    PushFalse,
    /// Push the operand reinterpreted as a signed 32-bit integer
    PushInt,
    /// Push an entry of the literal table
    PushLiteral,

    // Stack manipulation
    /// Pop the top stack value
    Pop,
    /// Duplicate the top stack value
    Dup,

    // Locals and upvalues
    /// Push a local slot
    LoadLocal,
    /// Pop into a local slot
    StoreLocal,
    /// Push the value held by an upvalue cell
    LoadUpval,
    /// Pop into the current upvalue cell, visible to every closure sharing it
    StoreUpval,
    /// Pop into a fresh upvalue cell, starting a new binding
    BindUpval,
    /// Push the closure being executed
    LoadSelf,

    // Globals
    /// Push the root value of a var
    LoadVar,
    /// Pop a value into a var's root and push the var
    SetVar,
    /// Push a var without binding it
    DeclareVar,

    // Control flow
    /// Unconditional jump to an absolute offset
    Jump,
    /// Pop and jump when the value is falsey
    JumpIfFalse,

    // Functions
    /// Append an upvalue cell of this frame to the pending capture list
    CaptureUpval,
    /// Build a closure from a nested code object and the pending captures
    MakeClosure,
    /// Call the function below the top `n` arguments
    Call,
    /// Return the top value to the caller
    Return,
    /// Match exactly `n` arguments, binding them and skipping the next instruction
    ArityEq,
    /// Match at least `n` arguments, packing extras into the next slot
    ArityAtLeast,
    /// Raise an arity error for the current argument count
    ArityFail,

    // Collections
    /// Build a vector from the top `n` values
    MakeVector,
    /// Build a small map from the top `n` values (key/value interleaved)
    MakeArrayMap,
    /// Build a hashed map from the top `n` values (key/value interleaved)
    MakeHashMap,
    /// Build a set from the top `n` values
    MakeSet,

    // Exceptions
    /// Install an exception handler
    PushHandler,
    /// Remove the innermost exception handler
    PopHandler,
    /// Throw the top value
    Throw,
    /// Push whether the top value belongs to a runtime type
    IsInstance,

    // Interop
    /// Invoke a host method through a call-site entry
    MethodCall,

    // Pseudo-instructions, never present in exported code
    /// Marks a jump target
    SetLabel,
    /// Placeholder that may be rewritten
    Nop,
}

/// How an instruction's operand is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Operand is ignored
    None,
    /// Signed 32-bit immediate
    Int,
    /// Element or argument count
    Count,
    /// Index into the literal table
    Literal,
    /// Local slot
    Local,
    /// Upvalue slot
    Upvalue,
    /// Index into the var table
    Var,
    /// Index into the nested code table
    Code,
    /// Index into the method call-site table
    Method,
    /// Runtime type tag code
    Type,
    /// Jump target
    Target,
}

const ALL_OPCODES: [Opcode; 36] = [
    Opcode::PushNil,
    Opcode::PushTrue,
    Opcode::PushFalse,
    Opcode::PushInt,
    Opcode::PushLiteral,
    Opcode::Pop,
    Opcode::Dup,
    Opcode::LoadLocal,
    Opcode::StoreLocal,
    Opcode::LoadUpval,
    Opcode::StoreUpval,
    Opcode::BindUpval,
    Opcode::LoadSelf,
    Opcode::LoadVar,
    Opcode::SetVar,
    Opcode::DeclareVar,
    Opcode::Jump,
    Opcode::JumpIfFalse,
    Opcode::CaptureUpval,
    Opcode::MakeClosure,
    Opcode::Call,
    Opcode::Return,
    Opcode::ArityEq,
    Opcode::ArityAtLeast,
    Opcode::ArityFail,
    Opcode::MakeVector,
    Opcode::MakeArrayMap,
    Opcode::MakeHashMap,
    Opcode::MakeSet,
    Opcode::PushHandler,
    Opcode::PopHandler,
    Opcode::Throw,
    Opcode::IsInstance,
    Opcode::MethodCall,
    Opcode::SetLabel,
    Opcode::Nop,
];

impl Opcode {
    /// Decode a persisted opcode byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        ALL_OPCODES.get(byte as usize).copied()
    }

    /// Persisted opcode byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Operand interpretation
    pub fn operand(self) -> Operand {
        use Opcode::*;
        match self {
            PushInt => Operand::Int,
            PushLiteral => Operand::Literal,
            LoadLocal | StoreLocal => Operand::Local,
            LoadUpval | StoreUpval | BindUpval | CaptureUpval => Operand::Upvalue,
            LoadVar | SetVar | DeclareVar => Operand::Var,
            Jump | JumpIfFalse | PushHandler => Operand::Target,
            MakeClosure => Operand::Code,
            Call | ArityEq | ArityAtLeast | MakeVector | MakeArrayMap | MakeHashMap | MakeSet => {
                Operand::Count
            }
            IsInstance => Operand::Type,
            MethodCall => Operand::Method,
            PushNil | PushTrue | PushFalse | Pop | Dup | LoadSelf | Return | ArityFail
            | PopHandler | Throw | SetLabel | Nop => Operand::None,
        }
    }

    /// Whether the operand is a jump target
    pub fn is_jump(self) -> bool {
        self.operand() == Operand::Target
    }

    /// Control never falls through to the next instruction
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::Return | Opcode::Throw | Opcode::ArityFail
        )
    }

    /// Compile-time only instructions
    pub fn is_pseudo(self) -> bool {
        matches!(self, Opcode::SetLabel | Opcode::Nop)
    }

    /// Mnemonic used by the disassembler
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            PushNil => "PUSH_NIL",
            PushTrue => "PUSH_TRUE",
            PushFalse => "PUSH_FALSE",
            PushInt => "PUSH_INT",
            PushLiteral => "PUSH_LITERAL",
            Pop => "POP",
            Dup => "DUP",
            LoadLocal => "LOAD_LOCAL",
            StoreLocal => "STORE_LOCAL",
            LoadUpval => "LOAD_UPVAL",
            StoreUpval => "STORE_UPVAL",
            BindUpval => "BIND_UPVAL",
            LoadSelf => "LOAD_SELF",
            LoadVar => "LOAD_VAR",
            SetVar => "SET_VAR",
            DeclareVar => "DECLARE_VAR",
            Jump => "JUMP",
            JumpIfFalse => "JUMP_IF_FALSE",
            CaptureUpval => "CAPTURE_UPVAL",
            MakeClosure => "MAKE_CLOSURE",
            Call => "CALL",
            Return => "RETURN",
            ArityEq => "ARITY_EQ",
            ArityAtLeast => "ARITY_AT_LEAST",
            ArityFail => "ARITY_FAIL",
            MakeVector => "MAKE_VECTOR",
            MakeArrayMap => "MAKE_ARRAY_MAP",
            MakeHashMap => "MAKE_HASH_MAP",
            MakeSet => "MAKE_SET",
            PushHandler => "PUSH_HANDLER",
            PopHandler => "POP_HANDLER",
            Throw => "THROW",
            IsInstance => "IS_INSTANCE",
            MethodCall => "METHOD_CALL",
            SetLabel => "SET_LABEL",
            Nop => "NOP",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_encoding_is_dense() {
        for (i, op) in ALL_OPCODES.iter().enumerate() {
            assert_eq!(op.as_u8() as usize, i);
            assert_eq!(Opcode::from_u8(i as u8), Some(*op));
        }
        assert_eq!(Opcode::from_u8(ALL_OPCODES.len() as u8), None);
        assert_eq!(Opcode::from_u8(u8::MAX), None);
    }

    #[test]
    fn test_operand_classes() {
        assert!(Opcode::Jump.is_jump());
        assert!(Opcode::PushHandler.is_jump());
        assert!(!Opcode::Call.is_jump());
        assert!(Opcode::Throw.is_terminal());
        assert!(!Opcode::JumpIfFalse.is_terminal());
        assert!(Opcode::Nop.is_pseudo());
    }
}
