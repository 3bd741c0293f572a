//! Core types shared by the kiln compiler and virtual machine
//!
//! This crate provides the pieces both sides of the backend agree on:
//! - Runtime value representation, including the persistent collection operands
//! - The resolved expression tree produced by the analyzer
//! - Global variable handles
//! - Runtime type tags used by `catch` clauses
//! - The callable and host-interop capabilities

pub mod ast;
pub mod callable;
pub mod exception;
pub mod interop;
pub mod types;
pub mod value;
pub mod var;

pub use ast::{CatchClause, Expr, ExprKind, FnArity, FnExpr, Span, TryExpr};
pub use callable::{Callable, NativeFn};
pub use exception::{ErrorKind, Exception};
pub use interop::{HostObject, Interop, MethodFn, MethodTable, TypeKey};
pub use types::TypeTag;
pub use value::{ArrayMap, Value, ValueError, ValueResult};
pub use var::{Var, VarResolver, VarTable};
