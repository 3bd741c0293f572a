//! Kiln virtual machine
//!
//! Compiles resolved expression trees to bytecode and executes them on a
//! stack-based interpreter with lexical closures, multi-arity functions,
//! structured exception handling and cached host method calls.

pub mod builder;
pub mod closure;
pub mod compiler;
pub mod config;
pub mod error;
pub mod stack_effect;
pub mod stats;
pub mod vm;

pub use builder::VmBuilder;
pub use closure::{Closure, UpvalueCell};
pub use compiler::{compile, Compiler, CompilerOptions};
pub use config::VmConfig;
pub use error::{
    CompileError, CompileResult, RuntimeError, RuntimeResult, StackFrame, StackTrace,
};
pub use kiln_core::Value;
pub use stats::{ExecStats, FramePeak};
pub use vm::{CallFrame, VMState, Vm};

use kiln_core::Expr;
use thiserror::Error;

/// Failure of the compile-then-run pipeline
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Compile `expr` and run it on a fresh VM with default limits
pub fn eval(expr: &Expr) -> Result<Value, Error> {
    let code = compile(expr)?;
    Ok(Vm::default().run(&code, &[])?)
}
