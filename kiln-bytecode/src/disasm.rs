//! Human-readable listings of code objects

use crate::{Code, Instruction, Operand};
use kiln_core::TypeTag;
use std::collections::BTreeSet;
use std::fmt::Write;

/// Disassemble `code` and every code object nested in it
pub fn disassemble(code: &Code) -> String {
    let mut out = String::new();
    write_code(&mut out, code, "main", 0);
    out
}

fn write_code(out: &mut String, code: &Code, label: &str, indent: usize) {
    let prefix = "  ".repeat(indent);
    let _ = writeln!(out, "{}== {} ({}) ==", prefix, label, code.display_name());
    let _ = writeln!(
        out,
        "{}max_stack={} locals={} upvalues={} imported={}",
        prefix, code.max_stack, code.local_slots, code.upvalue_slots, code.imported_upvalues
    );

    let targets = jump_targets(&code.instructions);
    let mut last_line = None;
    for (ip, instr) in code.instructions.iter().enumerate() {
        let marker = if targets.contains(&ip) { ">" } else { " " };
        let line = code.lines.line_for(ip);
        let line_col = if line == last_line {
            "   |".to_string()
        } else {
            line.map(|l| format!("{:4}", l))
                .unwrap_or_else(|| "   -".to_string())
        };
        last_line = line;
        let _ = writeln!(
            out,
            "{}{:04} {} {} {}",
            prefix,
            ip,
            line_col,
            marker,
            describe(code, instr)
        );
    }

    for (i, nested) in code.codes.iter().enumerate() {
        write_code(out, nested, &format!("code[{}]", i), indent + 1);
    }
}

fn jump_targets(instructions: &[Instruction]) -> BTreeSet<usize> {
    instructions
        .iter()
        .filter(|i| i.opcode.is_jump())
        .map(|i| i.arg as usize)
        .collect()
}

/// Render one instruction with its resolved operand
pub fn describe(code: &Code, instr: &Instruction) -> String {
    let name = instr.opcode.mnemonic();
    let idx = instr.arg as usize;
    match instr.opcode.operand() {
        Operand::None => name.to_string(),
        Operand::Int => format!("{:<16} {}", name, instr.int_arg()),
        Operand::Count | Operand::Local | Operand::Upvalue => format!("{:<16} {}", name, idx),
        Operand::Target => format!("{:<16} -> {:04}", name, idx),
        Operand::Literal => match code.literals.get(idx) {
            Some(v) => format!("{:<16} {} ; {}", name, idx, v),
            None => format!("{:<16} {} ; <bad literal>", name, idx),
        },
        Operand::Var => match code.vars.get(idx) {
            Some(var) => format!("{:<16} {} ; #'{}", name, idx, var.qualified_name()),
            None => format!("{:<16} {} ; <bad var>", name, idx),
        },
        Operand::Code => match code.codes.get(idx) {
            Some(c) => format!("{:<16} {} ; {}", name, idx, c.display_name()),
            None => format!("{:<16} {} ; <bad code>", name, idx),
        },
        Operand::Method => match code.methods.get(idx) {
            Some(site) => format!("{:<16} {} ; .{}/{}", name, idx, site.name, site.arity),
            None => format!("{:<16} {} ; <bad method>", name, idx),
        },
        Operand::Type => {
            let tag = u8::try_from(instr.arg).ok().and_then(TypeTag::from_code);
            match tag {
                Some(tag) => format!("{:<16} {}", name, tag),
                None => format!("{:<16} <bad type {}>", name, instr.arg),
            }
        }
    }
}
