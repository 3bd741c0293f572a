//! Structural checks applied to code images

use anyhow::Result;
use kiln_bytecode::format::validate;
use kiln_bytecode::{Code, FormatError, Instruction, LineTable, Opcode};
use kiln_core::VarTable;
use std::sync::Arc;

fn body(instructions: Vec<Instruction>, local_slots: usize) -> Code {
    Code {
        name: Some(Arc::from("body")),
        file: None,
        instructions,
        literals: vec![],
        vars: vec![],
        codes: vec![],
        methods: vec![],
        max_stack: 2,
        local_slots,
        upvalue_slots: 0,
        imported_upvalues: 0,
        lines: LineTable::new(),
    }
}

fn guarded(guard: Instruction, local_slots: usize) -> Code {
    body(
        vec![
            guard,
            Instruction::with_arg(Opcode::Jump, 4),
            Instruction::new(Opcode::PushNil),
            Instruction::new(Opcode::Return),
            Instruction::new(Opcode::ArityFail),
        ],
        local_slots,
    )
}

#[test]
fn test_accepts_well_formed_guards() -> Result<()> {
    validate(&guarded(Instruction::with_arg(Opcode::ArityEq, 2), 2))?;
    // the rest parameter needs its own slot
    validate(&guarded(Instruction::with_arg(Opcode::ArityAtLeast, 1), 2))?;
    Ok(())
}

#[test]
fn test_guard_needs_room_for_arguments() {
    let eq = guarded(Instruction::with_arg(Opcode::ArityEq, 3), 2);
    assert!(matches!(
        validate(&eq),
        Err(FormatError::OperandOutOfRange {
            opcode: Opcode::ArityEq,
            ..
        })
    ));

    let rest = guarded(Instruction::with_arg(Opcode::ArityAtLeast, 2), 2);
    assert!(matches!(
        validate(&rest),
        Err(FormatError::OperandOutOfRange { offset: 0, .. })
    ));
}

#[test]
fn test_guard_must_precede_jump() {
    let code = body(
        vec![
            Instruction::with_arg(Opcode::ArityEq, 0),
            Instruction::new(Opcode::PushNil),
            Instruction::new(Opcode::Return),
        ],
        0,
    );
    assert!(matches!(validate(&code), Err(FormatError::MalformedGuard(0))));
}

#[test]
fn test_map_construction_takes_pairs() {
    let code = body(
        vec![
            Instruction::new(Opcode::PushNil),
            Instruction::with_arg(Opcode::MakeHashMap, 1),
            Instruction::new(Opcode::Return),
        ],
        0,
    );
    assert!(matches!(
        validate(&code),
        Err(FormatError::OperandOutOfRange { offset: 1, .. })
    ));
}

#[test]
fn test_labels_never_reach_the_image() {
    let code = body(
        vec![
            Instruction::with_arg(Opcode::SetLabel, 0),
            Instruction::new(Opcode::PushNil),
            Instruction::new(Opcode::Return),
        ],
        0,
    );
    assert!(matches!(
        validate(&code),
        Err(FormatError::PseudoInstruction {
            opcode: Opcode::SetLabel,
            offset: 0
        })
    ));
}

#[test]
fn test_corrupted_opcode_byte_is_rejected() -> Result<()> {
    let code = body(
        vec![Instruction::new(Opcode::PushNil), Instruction::new(Opcode::Return)],
        0,
    );
    let mut bytes = code.to_bytes()?;
    let pos = bytes
        .iter()
        .rposition(|&b| b == Opcode::Return.as_u8())
        .expect("return opcode in image");
    bytes[pos] = 0xEE;
    let vars = VarTable::new();
    assert!(Code::from_bytes(&bytes, &vars).is_err());
    Ok(())
}
