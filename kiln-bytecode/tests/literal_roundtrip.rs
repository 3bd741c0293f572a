//! Literal tables survive encoding with their exact representation

use kiln_bytecode::format::validate;
use kiln_bytecode::{Code, Instruction, LineTable, Opcode};
use kiln_core::{ArrayMap, Value, VarTable};
use proptest::prelude::*;
use std::sync::Arc;

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Nil),
        any::<bool>().prop_map(Value::Boolean),
        any::<i64>().prop_map(Value::Integer),
        any::<f64>().prop_map(Value::Float),
        "[a-z]{0,6}".prop_map(Value::string),
        "[a-z]{1,4}".prop_map(Value::keyword),
        "[a-z]{1,4}".prop_map(Value::symbol),
    ]
}

fn arb_literal() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::list),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::vector),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::set),
            prop::collection::vec((inner.clone(), inner.clone()), 0..6)
                .prop_map(|pairs| Value::ArrayMap(ArrayMap::from_pairs(pairs))),
            prop::collection::vec((inner.clone(), inner), 0..12)
                .prop_map(|pairs| Value::HashMap(pairs.into_iter().collect())),
        ]
    })
}

/// Pushes every literal, then returns them as one vector
fn literal_table(literals: Vec<Value>) -> Code {
    let mut instructions: Vec<Instruction> = (0..literals.len() as u32)
        .map(|i| Instruction::with_arg(Opcode::PushLiteral, i))
        .collect();
    instructions.push(Instruction::with_arg(
        Opcode::MakeVector,
        literals.len() as u32,
    ));
    instructions.push(Instruction::new(Opcode::Return));
    let mut lines = LineTable::new();
    lines.push(0, 1);
    Code {
        name: Some(Arc::from("literals")),
        file: None,
        instructions,
        max_stack: literals.len().max(1),
        literals,
        vars: vec![],
        codes: vec![],
        methods: vec![],
        local_slots: 0,
        upvalue_slots: 0,
        imported_upvalues: 0,
        lines,
    }
}

proptest! {
    #[test]
    fn literal_tables_roundtrip(literals in prop::collection::vec(arb_literal(), 1..8)) {
        let vars = VarTable::new();
        let code = literal_table(literals);
        prop_assert!(validate(&code).is_ok());

        let bytes = code.to_bytes().unwrap();
        let loaded = Code::from_bytes(&bytes, &vars).unwrap();
        prop_assert_eq!(&loaded.literals, &code.literals);
        prop_assert_eq!(&loaded.instructions, &code.instructions);
        // re-encoding catches a map that changed representation
        prop_assert_eq!(loaded.to_bytes().unwrap(), bytes);
    }
}
