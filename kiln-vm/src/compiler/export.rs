//! Freezing symbolic instruction streams into executable code
//!
//! Export is a single pass that drops pseudo-instructions, tracks the
//! operand stack depth along reachable paths, records label offsets, and
//! pools payloads into side tables. A second sweep over the output
//! rewrites jump operands from labels to absolute offsets. The result
//! depends only on the input stream, so exporting the same stream twice
//! yields identical code.

use super::symbolic::{Payload, SymInstr};
use crate::error::{CompileError, CompileResult};
use crate::stack_effect::stack_effect;
use kiln_bytecode::{Code, Instruction, LineTable, MethodSite, Opcode};
use kiln_core::{Value, Var};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// Frame layout decided by the scope resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameShape {
    pub local_slots: usize,
    pub upvalue_slots: usize,
    pub imported_upvalues: usize,
}

#[derive(Default)]
struct Pools {
    literals: Vec<Value>,
    /// Equal literals can differ in representation, so each key holds every candidate
    literal_index: FxHashMap<Value, Vec<u32>>,
    vars: Vec<Arc<Var>>,
    codes: Vec<Arc<Code>>,
    methods: Vec<MethodSite>,
}

fn table_index(len: usize) -> CompileResult<u32> {
    u32::try_from(len).map_err(|_| CompileError::OperandOverflow("table index"))
}

impl Pools {
    fn literal(&mut self, value: &Value) -> CompileResult<u32> {
        let candidates = self.literal_index.entry(value.clone()).or_default();
        let literals = &self.literals;
        if let Some(&idx) = candidates
            .iter()
            .find(|&&idx| same_representation(&literals[idx as usize], value))
        {
            return Ok(idx);
        }
        let idx = table_index(self.literals.len())?;
        self.literals.push(value.clone());
        candidates.push(idx);
        Ok(idx)
    }

    fn var(&mut self, var: &Arc<Var>) -> CompileResult<u32> {
        match self.vars.iter().position(|v| Arc::ptr_eq(v, var)) {
            Some(idx) => table_index(idx),
            None => {
                self.vars.push(var.clone());
                table_index(self.vars.len() - 1)
            }
        }
    }

    fn code(&mut self, code: &Arc<Code>) -> CompileResult<u32> {
        match self.codes.iter().position(|c| Arc::ptr_eq(c, code)) {
            Some(idx) => table_index(idx),
            None => {
                self.codes.push(code.clone());
                table_index(self.codes.len() - 1)
            }
        }
    }

    /// Every call site gets its own entry so that caches stay per site
    fn method(&mut self, name: &Arc<str>, arity: u32) -> CompileResult<u32> {
        self.methods.push(MethodSite::new(name.clone(), arity));
        table_index(self.methods.len() - 1)
    }

    fn operand(&mut self, instr: &SymInstr) -> CompileResult<u32> {
        let needs_payload = matches!(
            instr.opcode,
            Opcode::PushLiteral
                | Opcode::LoadVar
                | Opcode::SetVar
                | Opcode::DeclareVar
                | Opcode::MakeClosure
                | Opcode::MethodCall
                | Opcode::IsInstance
        );
        if !needs_payload {
            return Ok(instr.arg);
        }
        match &instr.payload {
            Some(Payload::Literal(value)) => self.literal(value),
            Some(Payload::Var(var)) => self.var(var),
            Some(Payload::Code(code)) => self.code(code),
            Some(Payload::Method { name, arity }) => self.method(name, *arity),
            Some(Payload::Type(tag)) => Ok(tag.code() as u32),
            None => Err(CompileError::MissingPayload(instr.opcode)),
        }
    }
}

/// Equality that also distinguishes collection representations,
/// including array-map entry order
fn same_representation(a: &Value, b: &Value) -> bool {
    fn all_pairs(a: &[&Value], b: &[&Value]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_representation(x, y))
    }
    match (a, b) {
        (Value::List(x), Value::List(y)) | (Value::Vector(x), Value::Vector(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(x, y)| same_representation(x, y))
        }
        (Value::ArrayMap(x), Value::ArrayMap(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((k1, v1), (k2, v2))| all_pairs(&[k1, v1], &[k2, v2]))
        }
        (Value::HashMap(x), Value::HashMap(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k1, v1)| {
                    y.iter().any(|(k2, v2)| all_pairs(&[k1, v1], &[k2, v2]))
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len() && x.iter().all(|k1| y.iter().any(|k2| same_representation(k1, k2)))
        }
        (Value::List(_), _)
        | (Value::Vector(_), _)
        | (Value::ArrayMap(_), _)
        | (Value::HashMap(_), _)
        | (Value::Set(_), _) => false,
        _ => a == b,
    }
}

/// Export a symbolic instruction stream as an immutable [`Code`]
pub fn export(
    instrs: &[SymInstr],
    shape: FrameShape,
    name: Option<Arc<str>>,
    file: Option<Arc<str>>,
) -> CompileResult<Code> {
    let mut out: Vec<Instruction> = Vec::with_capacity(instrs.len());
    let mut labels: FxHashMap<u32, usize> = FxHashMap::default();
    let mut label_depth: FxHashMap<u32, usize> = FxHashMap::default();
    let mut lines = LineTable::new();
    let mut pools = Pools::default();
    let mut depth = 0usize;
    let mut max_stack = 0usize;
    let mut reachable = true;
    let mut after_guard = false;

    for instr in instrs {
        match instr.opcode {
            Opcode::SetLabel => {
                if labels.insert(instr.arg, out.len()).is_some() {
                    return Err(CompileError::DuplicateLabel(instr.arg));
                }
                if let Some(&incoming) = label_depth.get(&instr.arg) {
                    depth = if reachable {
                        depth.max(incoming)
                    } else {
                        incoming
                    };
                    reachable = true;
                }
                continue;
            }
            Opcode::Nop => continue,
            _ => {}
        }

        let effect = stack_effect(instr).ok_or(CompileError::MissingStackEffect(instr.opcode))?;
        if reachable {
            depth = effect
                .apply(depth)
                .ok_or(CompileError::StackUnderflow {
                    opcode: instr.opcode,
                    depth,
                })?;
            max_stack = max_stack.max(depth);

            if instr.opcode.is_jump() {
                // A handler is entered with the thrown value pushed
                let at_target = if instr.opcode == Opcode::PushHandler {
                    depth + 1
                } else {
                    depth
                };
                let slot = label_depth.entry(instr.arg).or_insert(at_target);
                *slot = (*slot).max(at_target);
            }
            // A matching arity guard skips the jump that follows it
            reachable = !instr.opcode.is_terminal() || after_guard;
        }
        after_guard = matches!(instr.opcode, Opcode::ArityEq | Opcode::ArityAtLeast);

        let arg = pools.operand(instr)?;
        lines.push(table_index(out.len())?, instr.line);
        out.push(Instruction::with_arg(instr.opcode, arg));
    }

    for instr in out.iter_mut().filter(|i| i.opcode.is_jump()) {
        let target = labels
            .get(&instr.arg)
            .copied()
            .ok_or(CompileError::UnresolvedLabel(instr.arg))?;
        instr.arg = table_index(target)?;
    }

    debug!(
        name = name.as_deref().unwrap_or("fn"),
        instructions = out.len(),
        max_stack,
        locals = shape.local_slots,
        upvalues = shape.upvalue_slots,
        "Exported code object"
    );

    Ok(Code {
        name,
        file,
        instructions: out,
        literals: pools.literals,
        vars: pools.vars,
        codes: pools.codes,
        methods: pools.methods,
        max_stack,
        local_slots: shape.local_slots,
        upvalue_slots: shape.upvalue_slots,
        imported_upvalues: shape.imported_upvalues,
        lines,
    })
}
