//! Expression tree to bytecode compiler
//!
//! Compilation runs in three cooperating parts:
//! - the scope resolver (`scope`) maps names to slots and upvalues
//! - the emitter (`emit`) lowers each form to symbolic instructions
//! - the exporter (`export`) freezes a finished function into a [`Code`]

mod emit;
mod export;
mod scope;
pub mod symbolic;

pub use export::{export, FrameShape};
pub use symbolic::{Label, Payload, SymInstr};

use crate::error::CompileResult;
use emit::{ArityRef, FnContext};
use kiln_bytecode::Code;
use kiln_core::Expr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Map literals with at most this many entries use the linear representation
pub const DEFAULT_MAP_THRESHOLD: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Source file recorded in every produced code object
    pub file: Option<String>,
    /// Largest map literal built as an array map
    pub map_threshold: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            file: None,
            map_threshold: DEFAULT_MAP_THRESHOLD,
        }
    }
}

impl CompilerOptions {
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

pub struct Compiler {
    options: CompilerOptions,
    file: Option<Arc<str>>,
    current: FnContext,
    enclosing: Vec<FnContext>,
    /// Line of the innermost expression being compiled
    line: u32,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_options(CompilerOptions::default())
    }

    pub fn with_options(options: CompilerOptions) -> Self {
        let file = options.file.as_deref().map(Arc::from);
        Self {
            options,
            file,
            current: FnContext::default(),
            enclosing: Vec::new(),
            line: 0,
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile a top-level expression into a zero-argument code object
    pub fn compile(&mut self, expr: &Expr) -> CompileResult<Arc<Code>> {
        self.current = FnContext::default();
        self.enclosing.clear();
        self.line = expr.line().unwrap_or(0);

        let main = ArityRef {
            params: &[],
            variadic: false,
            body: expr,
        };
        let (code, _) = self.compile_function(Some(Arc::from("main")), None, &[main])?;
        debug!(
            file = self.options.file.as_deref().unwrap_or("<none>"),
            nested = code.codes.len(),
            "Compiled top-level expression"
        );
        Ok(code)
    }
}

/// Compile with default options
pub fn compile(expr: &Expr) -> CompileResult<Arc<Code>> {
    Compiler::new().compile(expr)
}
