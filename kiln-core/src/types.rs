//! Runtime type tags
//!
//! A `catch` clause names the type of value it accepts. The tag is
//! embedded in the instruction stream as a one-byte code, so the codes
//! below are part of the persisted format and must not be renumbered.

use crate::exception::ErrorKind;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    /// Matches every value
    Any,
    Nil,
    Boolean,
    Integer,
    Float,
    /// Integer or float
    Number,
    String,
    Keyword,
    Symbol,
    List,
    Vector,
    /// Either map representation
    Map,
    Set,
    Fn,
    Var,
    Host,
    /// Any error object
    Error,
    ArityError,
    NotCallableError,
    UnboundVarError,
    InteropError,
    StackOverflowError,
    RuntimeError,
}

const ALL_TAGS: [TypeTag; 23] = [
    TypeTag::Any,
    TypeTag::Nil,
    TypeTag::Boolean,
    TypeTag::Integer,
    TypeTag::Float,
    TypeTag::Number,
    TypeTag::String,
    TypeTag::Keyword,
    TypeTag::Symbol,
    TypeTag::List,
    TypeTag::Vector,
    TypeTag::Map,
    TypeTag::Set,
    TypeTag::Fn,
    TypeTag::Var,
    TypeTag::Host,
    TypeTag::Error,
    TypeTag::ArityError,
    TypeTag::NotCallableError,
    TypeTag::UnboundVarError,
    TypeTag::InteropError,
    TypeTag::StackOverflowError,
    TypeTag::RuntimeError,
];

impl TypeTag {
    /// Stable one-byte encoding
    pub fn code(self) -> u8 {
        // ALL_TAGS is declared in discriminant order
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        ALL_TAGS.get(code as usize).copied()
    }

    /// Tag matching errors of one kind
    pub fn for_error_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Arity => TypeTag::ArityError,
            ErrorKind::NotCallable => TypeTag::NotCallableError,
            ErrorKind::UnboundVar => TypeTag::UnboundVarError,
            ErrorKind::Interop => TypeTag::InteropError,
            ErrorKind::StackOverflow => TypeTag::StackOverflowError,
            ErrorKind::Runtime => TypeTag::RuntimeError,
        }
    }

    /// Does `value` belong to this type
    pub fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (TypeTag::Any, _) => true,
            (TypeTag::Nil, Value::Nil) => true,
            (TypeTag::Boolean, Value::Boolean(_)) => true,
            (TypeTag::Integer, Value::Integer(_)) => true,
            (TypeTag::Float, Value::Float(_)) => true,
            (TypeTag::Number, Value::Integer(_) | Value::Float(_)) => true,
            (TypeTag::String, Value::String(_)) => true,
            (TypeTag::Keyword, Value::Keyword(_)) => true,
            (TypeTag::Symbol, Value::Symbol(_)) => true,
            (TypeTag::List, Value::List(_)) => true,
            (TypeTag::Vector, Value::Vector(_)) => true,
            (TypeTag::Map, Value::ArrayMap(_) | Value::HashMap(_)) => true,
            (TypeTag::Set, Value::Set(_)) => true,
            (TypeTag::Fn, Value::Fn(_)) => true,
            (TypeTag::Var, Value::Var(_)) => true,
            (TypeTag::Host, Value::Host(_)) => true,
            (TypeTag::Error, Value::Error(_)) => true,
            (tag, Value::Error(e)) => tag == TypeTag::for_error_kind(e.kind()),
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Any => "Any",
            TypeTag::Nil => "Nil",
            TypeTag::Boolean => "Boolean",
            TypeTag::Integer => "Integer",
            TypeTag::Float => "Float",
            TypeTag::Number => "Number",
            TypeTag::String => "String",
            TypeTag::Keyword => "Keyword",
            TypeTag::Symbol => "Symbol",
            TypeTag::List => "List",
            TypeTag::Vector => "Vector",
            TypeTag::Map => "Map",
            TypeTag::Set => "Set",
            TypeTag::Fn => "Fn",
            TypeTag::Var => "Var",
            TypeTag::Host => "Host",
            TypeTag::Error => "Error",
            TypeTag::ArityError => "ArityError",
            TypeTag::NotCallableError => "NotCallableError",
            TypeTag::UnboundVarError => "UnboundVarError",
            TypeTag::InteropError => "InteropError",
            TypeTag::StackOverflowError => "StackOverflowError",
            TypeTag::RuntimeError => "RuntimeError",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
