//! Shared helpers for integration tests

#![allow(dead_code)]

use anyhow::Result;
use kiln_core::{Expr, NativeFn, Value, ValueError, ValueResult, Var, VarTable};
use kiln_vm::{compile, ExecStats, Vm, VmConfig};
use std::sync::{Arc, OnceLock};

pub const CORE_NS: &str = "kiln.core";

fn integers(args: &[Value]) -> ValueResult<Vec<i64>> {
    args.iter().map(Value::as_integer).collect()
}

fn define<F>(table: &VarTable, name: &str, func: F)
where
    F: Fn(&[Value]) -> ValueResult<Value> + Send + Sync + 'static,
{
    table
        .intern(CORE_NS, name)
        .set(NativeFn::new(name, func).into_value());
}

/// Var table holding the natives used by the tests
pub fn core() -> &'static VarTable {
    static CORE: OnceLock<VarTable> = OnceLock::new();
    CORE.get_or_init(|| {
        let table = VarTable::new();
        define(&table, "+", |args| Ok(Value::Integer(integers(args)?.iter().sum())));
        define(&table, "*", |args| {
            Ok(Value::Integer(integers(args)?.iter().product()))
        });
        define(&table, "-", |args| {
            let ns = integers(args)?;
            match ns.split_first() {
                Some((first, [])) => Ok(Value::Integer(-first)),
                Some((first, rest)) => Ok(Value::Integer(first - rest.iter().sum::<i64>())),
                None => Err(ValueError::ArityMismatch {
                    expected: 1,
                    actual: 0,
                }),
            }
        });
        define(&table, "/", |args| match integers(args)?.as_slice() {
            [_, 0] => Err(ValueError::DivisionByZero),
            [a, b] => Ok(Value::Integer(a / b)),
            other => Err(ValueError::ArityMismatch {
                expected: 2,
                actual: other.len(),
            }),
        });
        define(&table, "<", |args| {
            let ns = integers(args)?;
            Ok(Value::Boolean(ns.windows(2).all(|w| w[0] < w[1])))
        });
        define(&table, "=", |args| {
            Ok(Value::Boolean(args.windows(2).all(|w| w[0] == w[1])))
        });
        define(&table, "conj", |args| match args {
            [Value::Vector(items), rest @ ..] => Ok(Value::vector(
                items.iter().cloned().chain(rest.iter().cloned()),
            )),
            [other, ..] => Err(ValueError::TypeError {
                expected: "vector",
                actual: other.type_name(),
            }),
            [] => Err(ValueError::ArityMismatch {
                expected: 1,
                actual: 0,
            }),
        });
        define(&table, "nth", |args| match args {
            [Value::Vector(items), index] => {
                let index = index.as_integer()? as usize;
                items.get(index).cloned().ok_or(ValueError::IndexOutOfBounds {
                    index,
                    length: items.len(),
                })
            }
            _ => Err(ValueError::InvalidOperation("nth".to_string())),
        });
        table
    })
}

pub fn core_var(name: &str) -> Arc<Var> {
    core()
        .lookup(CORE_NS, name)
        .unwrap_or_else(|| panic!("no native named {}", name))
}

/// `(name args...)` against a core native
pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::call(Expr::global(&core_var(name)), args)
}

pub fn int(n: i64) -> Expr {
    Expr::int(n)
}

pub fn local(name: &str) -> Expr {
    Expr::local(name)
}

pub fn ints(ns: &[i64]) -> Value {
    Value::vector(ns.iter().map(|&n| Value::Integer(n)))
}

/// Route VM logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn compile_and_run(expr: &Expr) -> Result<Value> {
    init_tracing();
    let code = compile(expr)?;
    let mut vm = Vm::new(VmConfig::testing());
    Ok(vm.run(&code, &[])?)
}

/// Run with per-frame stack accounting enabled
pub fn run_with_stats(expr: &Expr) -> Result<(Value, ExecStats)> {
    let code = compile(expr)?;
    let mut vm = Vm::new(VmConfig::testing());
    let value = vm.run(&code, &[])?;
    Ok((value, vm.stats().clone()))
}
