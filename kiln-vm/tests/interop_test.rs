//! Host method calls and per-site inline caching

mod common;

use common::*;
use kiln_core::{
    CatchClause, ErrorKind, Expr, HostObject, Interop, MethodFn, MethodTable, TypeKey, TypeTag,
    Value,
};
use kiln_vm::{compile, VmBuilder, VmConfig};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Counter(i64);

impl HostObject for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Counts how often the VM had to resolve a method
#[derive(Default)]
struct CountingInterop {
    table: MethodTable,
    lookups: AtomicUsize,
}

impl Interop for CountingInterop {
    fn resolve_method(&self, receiver: TypeKey, name: &str, arity: usize) -> Option<MethodFn> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.table.resolve_method(receiver, name, arity)
    }
}

fn interop() -> Arc<CountingInterop> {
    let interop = CountingInterop::default();
    interop.table.register(
        TypeKey::Builtin(TypeTag::String),
        "length",
        0,
        |receiver, _| Ok(Value::Integer(receiver.as_str()?.chars().count() as i64)),
    );
    interop
        .table
        .register(TypeKey::host::<Counter>(), "length", 0, |receiver, _| {
            match receiver {
                Value::Host(obj) => Ok(Value::Integer(
                    obj.as_any().downcast_ref::<Counter>().map_or(0, |c| c.0),
                )),
                _ => Ok(Value::Nil),
            }
        });
    interop.table.register(
        TypeKey::Builtin(TypeTag::Integer),
        "plus",
        1,
        |receiver, args| Ok(Value::Integer(receiver.as_integer()? + args[0].as_integer()?)),
    );
    Arc::new(interop)
}

fn counter(n: i64) -> Expr {
    Expr::literal(Value::Host(Arc::new(Counter(n))))
}

#[test]
fn test_method_call_with_arguments() {
    let expr = Expr::method_call("plus", int(40), vec![int(2)]);
    let code = compile(&expr).unwrap();
    let mut vm = VmBuilder::new().with_interop(interop()).build();
    assert_eq!(vm.run(&code, &[]).unwrap(), Value::Integer(42));
}

#[test]
fn test_site_cache_avoids_repeated_resolution() {
    // (let [len (fn [r] (.length r))] [(len "abc") (len "de") (len counter) (len "x")])
    let len = Expr::lambda(&["r"], Expr::method_call("length", local("r"), vec![]));
    let expr = Expr::let_(
        vec![("len", len)],
        Expr::vector(vec![
            Expr::call(local("len"), vec![Expr::literal("abc")]),
            Expr::call(local("len"), vec![Expr::literal("de")]),
            Expr::call(local("len"), vec![counter(42)]),
            Expr::call(local("len"), vec![Expr::literal("x")]),
        ]),
    );
    let code = compile(&expr).unwrap();
    let interop = interop();
    let mut vm = VmBuilder::new().with_interop(interop.clone()).build();

    assert_eq!(vm.run(&code, &[]).unwrap(), ints(&[3, 2, 42, 1]));
    // one resolution per receiver type
    assert_eq!(interop.lookups.load(Ordering::SeqCst), 2);
    assert_eq!(code.codes[0].methods[0].cache.len(), 2);

    // the cache lives on the code object and survives across runs
    assert_eq!(vm.run(&code, &[]).unwrap(), ints(&[3, 2, 42, 1]));
    assert_eq!(interop.lookups.load(Ordering::SeqCst), 2);
}

#[test]
fn test_missing_method_is_an_interop_error() {
    let expr = Expr::try_(
        Expr::method_call("frobnicate", int(1), vec![]),
        vec![CatchClause::new(TypeTag::InteropError, "e", Expr::local("e"))],
        None,
    );
    let code = compile(&expr).unwrap();
    let mut vm = VmBuilder::new().with_interop(interop()).build();
    let result = vm.run(&code, &[]).unwrap();
    let exception = result.as_exception().unwrap();
    assert_eq!(exception.kind(), ErrorKind::Interop);
    assert!(exception.message().contains("frobnicate"));
}

#[test]
fn test_method_call_without_interop() {
    let code = compile(&Expr::method_call("length", Expr::literal("abc"), vec![])).unwrap();
    let mut vm = VmBuilder::new().with_config(VmConfig::testing()).build();
    let err = vm.run(&code, &[]).unwrap_err();
    let exception = err.thrown().and_then(Value::as_exception).unwrap();
    assert_eq!(exception.kind(), ErrorKind::Interop);
}
