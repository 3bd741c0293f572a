//! Frame layout decisions and top-level evaluation

mod common;

use common::*;
use kiln_bytecode::Opcode;
use kiln_core::{Expr, Value, Var};
use kiln_vm::{compile, eval, CompileError, Compiler, CompilerOptions, Error};

#[test]
fn test_sibling_scopes_share_slots() {
    // (do (let [a 1] a) (let [b 2 c 3] c))
    let expr = Expr::do_(vec![
        Expr::let_(vec![("a", int(1))], local("a")),
        Expr::let_(vec![("b", int(2)), ("c", int(3))], local("c")),
    ]);
    let code = compile(&expr).unwrap();
    assert_eq!(code.local_slots, 2);
    assert_eq!(code.upvalue_slots, 0);
    assert_eq!(eval(&expr).unwrap(), Value::Integer(3));
}

#[test]
fn test_captured_binding_moves_to_a_cell() {
    // (let [a 1 b 2] [b (fn [] a)])
    let expr = Expr::let_(
        vec![("a", int(1)), ("b", int(2))],
        Expr::vector(vec![local("b"), Expr::lambda(&[], local("a"))]),
    );
    let code = compile(&expr).unwrap();
    let ops: Vec<_> = code.instructions.iter().map(|i| i.opcode).collect();
    assert!(ops.contains(&Opcode::BindUpval));
    assert!(ops.contains(&Opcode::CaptureUpval));
    assert_eq!(code.upvalue_slots, 1);
    assert_eq!(code.imported_upvalues, 0);
    assert_eq!(code.codes[0].imported_upvalues, 1);
}

#[test]
fn test_def_binds_and_returns_the_var() {
    let var = Var::new("user", "answer");
    let expr = Expr::do_(vec![
        Expr::def(&var, Some(int(42))),
        Expr::global(&var),
    ]);
    assert_eq!(compile_and_run(&expr).unwrap(), Value::Integer(42));

    match compile_and_run(&Expr::def(&var, Some(int(1)))).unwrap() {
        Value::Var(v) => assert!(std::sync::Arc::ptr_eq(&v, &var)),
        other => panic!("expected a var, got {}", other),
    }
    assert_eq!(var.get(), Some(Value::Integer(1)));
}

#[test]
fn test_declare_leaves_var_unbound() {
    let var = Var::new("user", "later");
    let value = compile_and_run(&Expr::def(&var, None)).unwrap();
    assert_eq!(value, Value::Var(var.clone()));
    assert!(!var.is_bound());
}

#[test]
fn test_map_literals_pick_a_representation() {
    let small = Expr::map(vec![(int(1), int(2)), (int(1), int(3))]);
    match eval(&small).unwrap() {
        Value::ArrayMap(m) => {
            assert_eq!(m.len(), 1);
            assert_eq!(m.get(&Value::Integer(1)), Some(&Value::Integer(3)));
        }
        other => panic!("expected an array map, got {}", other),
    }

    let options = CompilerOptions {
        map_threshold: 0,
        ..CompilerOptions::default()
    };
    let code = Compiler::with_options(options).compile(&small).unwrap();
    let value = kiln_vm::Vm::default().run(&code, &[]).unwrap();
    assert!(matches!(value, Value::HashMap(_)));
    // both representations compare equal
    assert_eq!(value, eval(&small).unwrap());
}

#[test]
fn test_eval_reports_compile_errors() {
    match eval(&Expr::local("nowhere")) {
        Err(Error::Compile(CompileError::UnresolvedLocal(name))) => assert_eq!(name, "nowhere"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_options_deserialize_with_defaults() {
    let options: CompilerOptions = serde_json::from_str(r#"{"file": "a.kiln"}"#).unwrap();
    assert_eq!(options.file.as_deref(), Some("a.kiln"));
    assert_eq!(options.map_threshold, 8);
}
