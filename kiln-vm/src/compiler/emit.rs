//! Lowering of expression forms to symbolic instructions

use super::export::{export, FrameShape};
use super::scope::{resolve, Access, LexicalFrame, Resolved};
use super::symbolic::{Label, Payload, SymInstr};
use super::Compiler;
use crate::error::{CompileError, CompileResult};
use kiln_bytecode::{Code, Opcode};
use kiln_core::{CatchClause, Expr, ExprKind, FnExpr, TryExpr, Value};
use std::sync::Arc;

/// Per-function compilation state
#[derive(Debug, Default)]
pub(super) struct FnContext {
    frame: LexicalFrame,
    next_label: Label,
    recur: Vec<RecurTarget>,
}

impl AsMut<LexicalFrame> for FnContext {
    fn as_mut(&mut self) -> &mut LexicalFrame {
        &mut self.frame
    }
}

#[derive(Debug)]
struct RecurTarget {
    label: Label,
    bindings: Vec<Resolved>,
}

/// Borrowed view of one arity clause
pub(super) struct ArityRef<'a> {
    pub params: &'a [Arc<str>],
    pub variadic: bool,
    pub body: &'a Expr,
}

impl ArityRef<'_> {
    fn required(&self) -> usize {
        if self.variadic {
            self.params.len().saturating_sub(1)
        } else {
            self.params.len()
        }
    }
}

fn count(n: usize) -> CompileResult<u32> {
    u32::try_from(n).map_err(|_| CompileError::OperandOverflow("element count"))
}

/// Immediate integers must fit the operand as a signed value
fn small_int(n: i64) -> Option<u32> {
    i32::try_from(n).ok().map(|n| n as u32)
}

/// Check the clause set of a function and order it for dispatch:
/// fixed arities first, the variadic clause last
fn ordered_arities(f: &FnExpr) -> CompileResult<Vec<ArityRef<'_>>> {
    if f.arities.is_empty() {
        return Err(CompileError::NoArities);
    }
    let mut fixed: Vec<ArityRef<'_>> = Vec::with_capacity(f.arities.len());
    let mut variadic: Option<ArityRef<'_>> = None;

    for arity in &f.arities {
        let clause = ArityRef {
            params: &arity.params,
            variadic: arity.variadic,
            body: &arity.body,
        };
        if arity.variadic {
            if arity.params.is_empty() {
                return Err(CompileError::MissingRestParam);
            }
            if variadic.is_some() {
                return Err(CompileError::MultipleVariadic);
            }
            variadic = Some(clause);
        } else {
            let n = arity.params.len();
            if fixed.iter().any(|c| c.params.len() == n) {
                return Err(CompileError::DuplicateArity(n));
            }
            fixed.push(clause);
        }
    }

    if let Some(rest) = &variadic {
        if fixed.iter().any(|c| c.params.len() > rest.required()) {
            return Err(CompileError::VariadicArityTooSmall);
        }
    }
    fixed.extend(variadic);
    Ok(fixed)
}

impl Compiler {
    fn emit(&mut self, opcode: Opcode, arg: u32) {
        let line = self.line;
        self.current
            .frame
            .code
            .push(SymInstr::new(opcode, arg).at(line));
    }

    fn emit_payload(&mut self, opcode: Opcode, payload: Payload) {
        let line = self.line;
        self.current
            .frame
            .code
            .push(SymInstr::with_payload(opcode, payload).at(line));
    }

    fn new_label(&mut self) -> Label {
        let label = self.current.next_label;
        self.current.next_label += 1;
        label
    }

    fn place_label(&mut self, label: Label) {
        self.emit(Opcode::SetLabel, label);
    }

    fn declare(&mut self, name: &Arc<str>) -> Resolved {
        self.current.frame.declare(name.clone())
    }

    fn access(&mut self, target: Resolved, access: Access) {
        let line = self.line;
        self.current.frame.emit_access(target, access, line);
    }

    fn lookup(&mut self, name: &str) -> CompileResult<Resolved> {
        resolve(&mut self.enclosing, &mut self.current.frame, name)
            .ok_or_else(|| CompileError::UnresolvedLocal(name.to_string()))
    }

    /// Compile `expr` leaving exactly one value on the stack
    pub(super) fn compile_expr(&mut self, expr: &Expr, tail: bool) -> CompileResult<()> {
        let saved = self.line;
        if let Some(line) = expr.line() {
            self.line = line;
        }
        let result = self.compile_kind(&expr.kind, tail);
        self.line = saved;
        result
    }

    fn compile_kind(&mut self, kind: &ExprKind, tail: bool) -> CompileResult<()> {
        match kind {
            ExprKind::Literal(value) => {
                self.compile_literal(value);
                Ok(())
            }
            ExprKind::Global(var) => {
                self.emit_payload(Opcode::LoadVar, Payload::Var(var.clone()));
                Ok(())
            }
            ExprKind::Local(name) => {
                let target = self.lookup(name)?;
                self.access(target, Access::Load);
                Ok(())
            }
            ExprKind::Call { callee, args } => {
                self.compile_expr(callee, false)?;
                for arg in args {
                    self.compile_expr(arg, false)?;
                }
                self.emit(Opcode::Call, count(args.len())?);
                Ok(())
            }
            ExprKind::If {
                test,
                then,
                otherwise,
            } => self.compile_if(test, then, otherwise.as_deref(), tail),
            ExprKind::Do(body) => self.compile_do(body, tail),
            ExprKind::Fn(f) => self.compile_fn(f),
            ExprKind::Let { bindings, body } => self.compile_let(bindings, body, tail, false),
            ExprKind::Loop { bindings, body } => self.compile_let(bindings, body, tail, true),
            ExprKind::Recur(args) => self.compile_recur(args, tail),
            ExprKind::SetLocal { name, value } => {
                self.compile_expr(value, false)?;
                self.emit(Opcode::Dup, 0);
                let target = self.lookup(name)?;
                self.access(target, Access::Assign);
                Ok(())
            }
            ExprKind::Throw(value) => {
                self.compile_expr(value, false)?;
                self.emit(Opcode::Throw, 0);
                Ok(())
            }
            ExprKind::Try(t) => self.compile_try(t),
            ExprKind::Def { var, value } => {
                match value {
                    Some(value) => {
                        self.compile_expr(value, false)?;
                        self.emit_payload(Opcode::SetVar, Payload::Var(var.clone()));
                    }
                    None => self.emit_payload(Opcode::DeclareVar, Payload::Var(var.clone())),
                }
                Ok(())
            }
            ExprKind::Vector(items) => self.compile_items(items, Opcode::MakeVector),
            ExprKind::Set(items) => self.compile_items(items, Opcode::MakeSet),
            ExprKind::Map(entries) => self.compile_map(entries),
            ExprKind::MethodCall {
                method,
                receiver,
                args,
            } => {
                self.compile_expr(receiver, false)?;
                for arg in args {
                    self.compile_expr(arg, false)?;
                }
                let arity = count(args.len())?;
                self.emit_payload(
                    Opcode::MethodCall,
                    Payload::Method {
                        name: method.clone(),
                        arity,
                    },
                );
                Ok(())
            }
        }
    }

    fn compile_literal(&mut self, value: &Value) {
        match value {
            Value::Nil => self.emit(Opcode::PushNil, 0),
            Value::Boolean(true) => self.emit(Opcode::PushTrue, 0),
            Value::Boolean(false) => self.emit(Opcode::PushFalse, 0),
            Value::Integer(n) => match small_int(*n) {
                Some(arg) => self.emit(Opcode::PushInt, arg),
                None => self.emit_payload(Opcode::PushLiteral, Payload::Literal(value.clone())),
            },
            _ => self.emit_payload(Opcode::PushLiteral, Payload::Literal(value.clone())),
        }
    }

    fn compile_items(&mut self, items: &[Expr], opcode: Opcode) -> CompileResult<()> {
        for item in items {
            self.compile_expr(item, false)?;
        }
        self.emit(opcode, count(items.len())?);
        Ok(())
    }

    fn compile_map(&mut self, entries: &[(Expr, Expr)]) -> CompileResult<()> {
        for (key, value) in entries {
            self.compile_expr(key, false)?;
            self.compile_expr(value, false)?;
        }
        let forms = count(entries.len() * 2)?;
        if entries.len() <= self.options.map_threshold {
            self.emit(Opcode::MakeArrayMap, forms);
        } else {
            self.emit(Opcode::MakeHashMap, forms);
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        test: &Expr,
        then: &Expr,
        otherwise: Option<&Expr>,
        tail: bool,
    ) -> CompileResult<()> {
        let else_label = self.new_label();
        let end_label = self.new_label();

        self.compile_expr(test, false)?;
        self.emit(Opcode::JumpIfFalse, else_label);
        self.compile_expr(then, tail)?;
        self.emit(Opcode::Jump, end_label);
        self.place_label(else_label);
        match otherwise {
            Some(expr) => self.compile_expr(expr, tail)?,
            None => self.emit(Opcode::PushNil, 0),
        }
        self.place_label(end_label);
        Ok(())
    }

    fn compile_do(&mut self, body: &[Expr], tail: bool) -> CompileResult<()> {
        let Some((last, init)) = body.split_last() else {
            self.emit(Opcode::PushNil, 0);
            return Ok(());
        };
        for expr in init {
            self.compile_expr(expr, false)?;
            self.emit(Opcode::Pop, 0);
        }
        self.compile_expr(last, tail)
    }

    fn compile_let(
        &mut self,
        bindings: &[(Arc<str>, Expr)],
        body: &Expr,
        tail: bool,
        is_loop: bool,
    ) -> CompileResult<()> {
        self.current.frame.push_scope();
        let result = self.compile_let_scope(bindings, body, tail, is_loop);
        self.current.frame.pop_scope();
        result
    }

    fn compile_let_scope(
        &mut self,
        bindings: &[(Arc<str>, Expr)],
        body: &Expr,
        tail: bool,
        is_loop: bool,
    ) -> CompileResult<()> {
        let mut targets = Vec::with_capacity(bindings.len());
        for (name, init) in bindings {
            // the init sees earlier bindings but not its own name
            self.compile_expr(init, false)?;
            let target = self.declare(name);
            self.access(target, Access::Bind);
            targets.push(target);
        }
        if !is_loop {
            return self.compile_expr(body, tail);
        }

        let label = self.new_label();
        self.place_label(label);
        self.current.recur.push(RecurTarget {
            label,
            bindings: targets,
        });
        let result = self.compile_expr(body, true);
        self.current.recur.pop();
        result
    }

    fn compile_recur(&mut self, args: &[Expr], tail: bool) -> CompileResult<()> {
        if !tail {
            return Err(CompileError::RecurNotInTail);
        }
        let (label, bindings) = match self.current.recur.last() {
            Some(target) => (target.label, target.bindings.clone()),
            None => return Err(CompileError::RecurNotInTail),
        };
        if args.len() != bindings.len() {
            return Err(CompileError::RecurArity {
                expected: bindings.len(),
                actual: args.len(),
            });
        }

        // evaluate every argument before rebinding any of them
        for arg in args {
            self.compile_expr(arg, false)?;
        }
        for &target in bindings.iter().rev() {
            self.access(target, Access::Bind);
        }
        self.emit(Opcode::Jump, label);
        Ok(())
    }

    fn compile_try(&mut self, t: &TryExpr) -> CompileResult<()> {
        let finally_label = t.finally.as_ref().map(|_| self.new_label());
        let catch_label = (!t.catches.is_empty()).then(|| self.new_label());
        let after_label = self.new_label();

        if let Some(label) = finally_label {
            self.emit(Opcode::PushHandler, label);
        }
        if let Some(label) = catch_label {
            self.emit(Opcode::PushHandler, label);
        }
        self.compile_expr(&t.body, false)?;

        if let Some(label) = catch_label {
            self.emit(Opcode::PopHandler, 0);
            self.emit(Opcode::Jump, after_label);
            self.place_label(label);
            for clause in &t.catches {
                self.compile_catch(clause, after_label)?;
            }
            // no clause matched
            self.emit(Opcode::Throw, 0);
        }
        self.place_label(after_label);

        if let (Some(finally), Some(label)) = (&t.finally, finally_label) {
            let end_label = self.new_label();
            self.emit(Opcode::PopHandler, 0);
            self.compile_expr(finally, false)?;
            self.emit(Opcode::Pop, 0);
            self.emit(Opcode::Jump, end_label);

            self.place_label(label);
            self.compile_expr(finally, false)?;
            self.emit(Opcode::Pop, 0);
            self.emit(Opcode::Throw, 0);
            self.place_label(end_label);
        }
        Ok(())
    }

    fn compile_catch(&mut self, clause: &CatchClause, after: Label) -> CompileResult<()> {
        let next = self.new_label();
        self.emit_payload(Opcode::IsInstance, Payload::Type(clause.tag));
        self.emit(Opcode::JumpIfFalse, next);

        self.current.frame.push_scope();
        let target = self.declare(&clause.binding);
        self.access(target, Access::Bind);
        let result = self.compile_expr(&clause.body, false);
        self.current.frame.pop_scope();
        result?;

        self.emit(Opcode::Jump, after);
        self.place_label(next);
        Ok(())
    }

    fn compile_fn(&mut self, f: &FnExpr) -> CompileResult<()> {
        let arities = ordered_arities(f)?;
        let (code, captures) = self.compile_function(f.name.clone(), f.name.as_ref(), &arities)?;
        let line = self.line;
        for (entry, name) in &captures {
            self.current.frame.emit_capture(*entry, name, line)?;
        }
        self.emit_payload(Opcode::MakeClosure, Payload::Code(code));
        Ok(())
    }

    /// Compile a function body in a fresh frame
    ///
    /// Returns the code object and the enclosing-frame upvalue entries the
    /// closure must capture, in the order the callee imports them.
    pub(super) fn compile_function(
        &mut self,
        name: Option<Arc<str>>,
        self_name: Option<&Arc<str>>,
        arities: &[ArityRef<'_>],
    ) -> CompileResult<(Arc<Code>, Vec<(usize, Arc<str>)>)> {
        let parent = std::mem::take(&mut self.current);
        self.enclosing.push(parent);
        let result = self.compile_arities(self_name, arities);
        let child = match self.enclosing.pop() {
            Some(parent) => std::mem::replace(&mut self.current, parent),
            None => std::mem::take(&mut self.current),
        };
        result?;

        let (closed, instrs) = child.frame.close();
        let shape = FrameShape {
            local_slots: closed.local_slots,
            upvalue_slots: closed.upvalue_slots,
            imported_upvalues: closed.imported_upvalues,
        };
        let code = export(&instrs, shape, name, self.file.clone())?;
        Ok((Arc::new(code), closed.captures))
    }

    fn compile_arities(
        &mut self,
        self_name: Option<&Arc<str>>,
        arities: &[ArityRef<'_>],
    ) -> CompileResult<()> {
        for arity in arities {
            let next = self.new_label();
            self.current.frame.push_scope();
            let result = self.compile_arity(self_name, arity, next);
            self.current.frame.pop_scope();
            result?;
            self.place_label(next);
        }
        self.emit(Opcode::ArityFail, 0);
        Ok(())
    }

    fn compile_arity(
        &mut self,
        self_name: Option<&Arc<str>>,
        arity: &ArityRef<'_>,
        next: Label,
    ) -> CompileResult<()> {
        let params: Vec<Resolved> = arity.params.iter().map(|p| self.declare(p)).collect();
        if arity.variadic {
            self.emit(Opcode::ArityAtLeast, count(arity.required())?);
        } else {
            self.emit(Opcode::ArityEq, count(params.len())?);
        }
        self.emit(Opcode::Jump, next);

        let line = self.line;
        for &param in &params {
            self.current.frame.emit_param_box(param, line);
        }
        // A parameter named like the function shadows the self binding
        if let Some(name) = self_name.filter(|name| !arity.params.contains(*name)) {
            let target = self.declare(name);
            self.emit(Opcode::LoadSelf, 0);
            self.access(target, Access::Bind);
        }

        let body = self.new_label();
        self.place_label(body);
        self.current.recur.push(RecurTarget {
            label: body,
            bindings: params,
        });
        let result = self.compile_expr(arity.body, true);
        self.current.recur.pop();
        result?;
        self.emit(Opcode::Return, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::compile;
    use super::*;
    use kiln_core::{FnArity, TypeTag, Var};

    fn ops(code: &Code) -> Vec<Opcode> {
        code.instructions.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_literal_fast_paths() {
        let code = compile(&Expr::vector(vec![
            Expr::nil(),
            Expr::literal(true),
            Expr::int(-5),
            Expr::int(1 << 40),
            Expr::literal("s"),
        ]))
        .unwrap();
        assert_eq!(
            &ops(&code)[2..8],
            &[
                Opcode::PushNil,
                Opcode::PushTrue,
                Opcode::PushInt,
                Opcode::PushLiteral,
                Opcode::PushLiteral,
                Opcode::MakeVector,
            ]
        );
        assert_eq!(code.instructions[4].int_arg(), -5);
        assert_eq!(code.literals, vec![Value::Integer(1 << 40), Value::string("s")]);
    }

    #[test]
    fn test_map_representation_follows_threshold() {
        let entries = |n: i64| {
            (0..n)
                .map(|i| (Expr::int(i), Expr::int(i)))
                .collect::<Vec<_>>()
        };
        let small = compile(&Expr::map(entries(8))).unwrap();
        assert!(ops(&small).contains(&Opcode::MakeArrayMap));
        let large = compile(&Expr::map(entries(9))).unwrap();
        assert!(ops(&large).contains(&Opcode::MakeHashMap));
    }

    #[test]
    fn test_recur_outside_tail_is_rejected() {
        let expr = Expr::loop_(
            vec![("i", Expr::int(0))],
            Expr::vector(vec![Expr::recur(vec![Expr::int(1)])]),
        );
        assert_eq!(compile(&expr).unwrap_err(), CompileError::RecurNotInTail);

        let in_try = Expr::loop_(
            vec![("i", Expr::int(0))],
            Expr::try_(Expr::recur(vec![Expr::int(1)]), vec![], Some(Expr::nil())),
        );
        assert_eq!(compile(&in_try).unwrap_err(), CompileError::RecurNotInTail);
    }

    #[test]
    fn test_recur_arity_is_checked() {
        let expr = Expr::loop_(
            vec![("i", Expr::int(0))],
            Expr::recur(vec![Expr::int(1), Expr::int(2)]),
        );
        assert_eq!(
            compile(&expr).unwrap_err(),
            CompileError::RecurArity {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_arity_validation() {
        let dup = Expr::fn_(
            None,
            vec![
                FnArity::fixed(&["a"], Expr::nil()),
                FnArity::fixed(&["b"], Expr::nil()),
            ],
        );
        assert_eq!(compile(&dup).unwrap_err(), CompileError::DuplicateArity(1));

        let two_rest = Expr::fn_(
            None,
            vec![
                FnArity::variadic(&["a"], Expr::nil()),
                FnArity::variadic(&["a", "b"], Expr::nil()),
            ],
        );
        assert_eq!(compile(&two_rest).unwrap_err(), CompileError::MultipleVariadic);

        let too_small = Expr::fn_(
            None,
            vec![
                FnArity::fixed(&["a", "b", "c"], Expr::nil()),
                FnArity::variadic(&["a", "rest"], Expr::nil()),
            ],
        );
        assert_eq!(
            compile(&too_small).unwrap_err(),
            CompileError::VariadicArityTooSmall
        );

        assert_eq!(
            compile(&Expr::fn_(None, vec![])).unwrap_err(),
            CompileError::NoArities
        );
    }

    #[test]
    fn test_unresolved_local() {
        assert_eq!(
            compile(&Expr::local("ghost")).unwrap_err(),
            CompileError::UnresolvedLocal("ghost".to_string())
        );
    }

    #[test]
    fn test_variadic_clause_dispatches_last() {
        let f = Expr::fn_(
            None,
            vec![
                FnArity::variadic(&["xs"], Expr::int(0)),
                FnArity::fixed(&[], Expr::int(1)),
            ],
        );
        let main = compile(&f).unwrap();
        let inner = &main.codes[0];
        let guards: Vec<_> = inner
            .instructions
            .iter()
            .filter(|i| matches!(i.opcode, Opcode::ArityEq | Opcode::ArityAtLeast))
            .map(|i| (i.opcode, i.arg))
            .collect();
        assert_eq!(
            guards,
            vec![(Opcode::ArityEq, 0), (Opcode::ArityAtLeast, 0)]
        );
        assert_eq!(inner.instructions.last().unwrap().opcode, Opcode::ArityFail);
    }

    #[test]
    fn test_catch_tests_type_without_duplicating() {
        let expr = Expr::try_(
            Expr::throw(Expr::int(1)),
            vec![CatchClause::new(TypeTag::Integer, "e", Expr::local("e"))],
            None,
        );
        let code = compile(&expr).unwrap();
        let ops = ops(&code);
        let test_at = ops.iter().position(|&o| o == Opcode::IsInstance).unwrap();
        assert_eq!(ops[test_at + 1], Opcode::JumpIfFalse);
        assert_eq!(ops[test_at + 2], Opcode::StoreLocal);
        assert!(!ops.contains(&Opcode::Dup));
    }

    #[test]
    fn test_def_without_value_declares() {
        let var = Var::new("user", "x");
        let code = compile(&Expr::def(&var, None)).unwrap();
        assert!(ops(&code).contains(&Opcode::DeclareVar));
        assert!(Arc::ptr_eq(&code.vars[0], &var));
    }

    #[test]
    fn test_named_fn_binds_itself() {
        let f = Expr::fn_(
            Some("self"),
            vec![FnArity::fixed(&[], Expr::local("self"))],
        );
        let main = compile(&f).unwrap();
        let inner = &main.codes[0];
        assert_eq!(inner.display_name(), "self");
        assert!(ops(inner).contains(&Opcode::LoadSelf));
        assert_eq!(inner.local_slots, 1);
        assert_eq!(inner.imported_upvalues, 0);
    }
}
