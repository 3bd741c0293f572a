//! Error objects raised by the runtime
//!
//! User code may throw any value. Errors the virtual machine raises itself
//! (bad arity, calling a non-function, unbound variables, failed host
//! calls) are wrapped in an [`Exception`] so that `catch` clauses can
//! select them by [`ErrorKind`].

use crate::value::{Value, ValueError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a runtime-raised error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No arity of the callee accepts the argument count
    Arity,
    /// Call target is not invokable
    NotCallable,
    /// Global variable read before it was defined
    UnboundVar,
    /// Host method missing or failed
    Interop,
    /// Call depth or operand stack limit exceeded
    StackOverflow,
    /// Native function failure or error raised by user code
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Arity => "arity",
            ErrorKind::NotCallable => "not-callable",
            ErrorKind::UnboundVar => "unbound-var",
            ErrorKind::Interop => "interop",
            ErrorKind::StackOverflow => "stack-overflow",
            ErrorKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A thrown error object
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    kind: ErrorKind,
    message: String,
    data: Value,
}

impl Exception {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: Value::Nil,
        }
    }

    /// Attach a payload value
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Arity failure; the attempted argument count travels as the payload
    pub fn arity(callee: Option<&str>, argc: usize) -> Self {
        let message = match callee {
            Some(name) => format!("Wrong number of args ({}) passed to {}", argc, name),
            None => format!("Wrong number of args ({}) passed to fn", argc),
        };
        Self::new(ErrorKind::Arity, message).with_data(Value::Integer(argc as i64))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Argument count carried by an arity error
    pub fn attempted_arity(&self) -> Option<usize> {
        match (self.kind, &self.data) {
            (ErrorKind::Arity, Value::Integer(n)) => usize::try_from(*n).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl From<ValueError> for Exception {
    fn from(err: ValueError) -> Self {
        Exception::new(ErrorKind::Runtime, err.to_string())
    }
}
