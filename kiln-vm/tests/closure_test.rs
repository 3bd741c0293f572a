//! Lexical capture and upvalue sharing

mod common;

use common::*;
use kiln_core::{Expr, FnArity, Value};

#[test]
fn test_closure_reads_enclosing_let() {
    let expr = Expr::let_(
        vec![("x", int(41))],
        Expr::call(Expr::lambda(&[], call("+", vec![local("x"), int(1)])), vec![]),
    );
    assert_eq!(compile_and_run(&expr).unwrap(), Value::Integer(42));
}

#[test]
fn test_captured_parameter() {
    // ((fn [x] ((fn [] x))) 7)
    let expr = Expr::call(
        Expr::lambda(
            &["x"],
            Expr::call(Expr::lambda(&[], local("x")), vec![]),
        ),
        vec![int(7)],
    );
    assert_eq!(compile_and_run(&expr).unwrap(), Value::Integer(7));
}

#[test]
fn test_capture_through_intermediate_function() {
    // (let [x 10] ((fn [] ((fn [] x)))))
    let expr = Expr::let_(
        vec![("x", int(10))],
        Expr::call(
            Expr::lambda(&[], Expr::call(Expr::lambda(&[], local("x")), vec![])),
            vec![],
        ),
    );
    assert_eq!(compile_and_run(&expr).unwrap(), Value::Integer(10));
}

#[test]
fn test_assignment_visible_to_enclosing_scope() {
    // (let [n 0 bump (fn [] (set! n (+ n 1)))] (bump) (bump) n)
    let expr = Expr::let_(
        vec![
            ("n", int(0)),
            (
                "bump",
                Expr::lambda(
                    &[],
                    Expr::set_local("n", call("+", vec![local("n"), int(1)])),
                ),
            ),
        ],
        Expr::do_(vec![
            Expr::call(local("bump"), vec![]),
            Expr::call(local("bump"), vec![]),
            local("n"),
        ]),
    );
    assert_eq!(compile_and_run(&expr).unwrap(), Value::Integer(2));
}

#[test]
fn test_counters_do_not_share_state() {
    // (let [make (fn [] (let [c 0] (fn [] (set! c (+ c 1)))))
    //       a (make) b (make)]
    //   [(a) (a) (b)])
    let make = Expr::lambda(
        &[],
        Expr::let_(
            vec![("c", int(0))],
            Expr::lambda(
                &[],
                Expr::set_local("c", call("+", vec![local("c"), int(1)])),
            ),
        ),
    );
    let expr = Expr::let_(
        vec![
            ("make", make),
            ("a", Expr::call(local("make"), vec![])),
            ("b", Expr::call(local("make"), vec![])),
        ],
        Expr::vector(vec![
            Expr::call(local("a"), vec![]),
            Expr::call(local("a"), vec![]),
            Expr::call(local("b"), vec![]),
        ]),
    );
    assert_eq!(compile_and_run(&expr).unwrap(), ints(&[1, 2, 1]));
}

#[test]
fn test_each_loop_iteration_gets_a_fresh_binding() {
    // (let [fs (loop [i 0 fs []]
    //            (if (< i 3) (recur (+ i 1) (conj fs (fn [] i))) fs))]
    //   [((nth fs 0)) ((nth fs 1)) ((nth fs 2))])
    let collect = Expr::loop_(
        vec![("i", int(0)), ("fs", Expr::vector(vec![]))],
        Expr::if_(
            call("<", vec![local("i"), int(3)]),
            Expr::recur(vec![
                call("+", vec![local("i"), int(1)]),
                call("conj", vec![local("fs"), Expr::lambda(&[], local("i"))]),
            ]),
            Some(local("fs")),
        ),
    );
    let nth = |n| Expr::call(call("nth", vec![local("fs"), int(n)]), vec![]);
    let expr = Expr::let_(vec![("fs", collect)], Expr::vector(vec![nth(0), nth(1), nth(2)]));
    assert_eq!(compile_and_run(&expr).unwrap(), ints(&[0, 1, 2]));
}

#[test]
fn test_named_function_recursion() {
    // (let [fact (fn fact [n] (if (< n 2) 1 (* n (fact (- n 1)))))] (fact 10))
    let fact = Expr::fn_(
        Some("fact"),
        vec![FnArity::fixed(
            &["n"],
            Expr::if_(
                call("<", vec![local("n"), int(2)]),
                int(1),
                Some(call(
                    "*",
                    vec![
                        local("n"),
                        Expr::call(local("fact"), vec![call("-", vec![local("n"), int(1)])]),
                    ],
                )),
            ),
        )],
    );
    let expr = Expr::let_(
        vec![("fact", fact)],
        Expr::call(local("fact"), vec![int(10)]),
    );
    assert_eq!(compile_and_run(&expr).unwrap(), Value::Integer(3_628_800));
}

#[test]
fn test_self_reference_captured_by_inner_function() {
    // ((fn me [] (fn [] me))) returns a closure whose result is `me` itself
    let expr = Expr::let_(
        vec![(
            "inner",
            Expr::call(
                Expr::fn_(
                    Some("me"),
                    vec![FnArity::fixed(&[], Expr::lambda(&[], local("me")))],
                ),
                vec![],
            ),
        )],
        Expr::call(local("inner"), vec![]),
    );
    let result = compile_and_run(&expr).unwrap();
    match result {
        Value::Fn(f) => assert_eq!(f.name(), Some("me")),
        other => panic!("expected a function, got {}", other),
    }
}

#[test]
fn test_parameter_shadows_function_name() {
    // ((fn f [f] f) 5)
    let f = Expr::fn_(Some("f"), vec![FnArity::fixed(&["f"], local("f"))]);
    let expr = Expr::call(f, vec![int(5)]);
    assert_eq!(compile_and_run(&expr).unwrap(), Value::Integer(5));
}

#[test]
fn test_function_name_visible_in_arities_without_clash() {
    // (fn f ([f] f) ([a b] (f a))): the two-arg clause still sees the self binding
    let f = Expr::fn_(
        Some("f"),
        vec![
            FnArity::fixed(&["f"], local("f")),
            FnArity::fixed(
                &["a", "b"],
                Expr::call(local("f"), vec![call("+", vec![local("a"), local("b")])]),
            ),
        ],
    );
    let expr = Expr::call(f, vec![int(3), int(4)]);
    assert_eq!(compile_and_run(&expr).unwrap(), Value::Integer(7));
}
