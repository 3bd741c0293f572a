//! Stack-based virtual machine executing exported code

use crate::closure::{Closure, UpvalueCell};
use crate::config::VmConfig;
use crate::error::{RuntimeError, RuntimeResult, StackFrame, StackTrace};
use crate::stats::ExecStats;
use kiln_bytecode::{Code, Instruction, Opcode, SourceLocation};
use kiln_core::{
    ArrayMap, Callable, ErrorKind, Exception, Interop, NativeFn, TypeKey, TypeTag, Value,
};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Activation record of a compiled function
pub struct CallFrame {
    callee: Arc<dyn Callable>,
    code: Arc<Code>,
    ip: usize,
    /// Operand stack height when the frame was entered
    stack_base: usize,
    /// Arguments waiting for an arity guard to claim them
    args: Vec<Value>,
    locals: Vec<Value>,
    upvals: Vec<Arc<UpvalueCell>>,
    peak: usize,
}

impl CallFrame {
    pub fn function_name(&self) -> &str {
        self.code.display_name()
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Location of the instruction currently executing
    fn location(&self) -> SourceLocation {
        self.code.location(self.ip.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Copy)]
struct Handler {
    frame: usize,
    target: usize,
    stack_height: usize,
}

#[derive(Debug)]
pub enum VMState {
    Continue,
    /// The entry frame returned
    Return(Value),
}

/// Ways an instruction can leave straight-line execution
enum Unwind {
    /// A value thrown by code, catchable by handlers
    Throw(Value),
    /// Malformed code or a broken VM invariant
    Fatal(RuntimeError),
}

type StepResult<T> = Result<T, Unwind>;

fn throw(kind: ErrorKind, message: impl Into<String>) -> Unwind {
    Unwind::Throw(Value::error(Exception::new(kind, message)))
}

fn fatal(message: impl Into<String>) -> Unwind {
    Unwind::Fatal(RuntimeError::Internal(message.into()))
}

pub struct Vm {
    config: VmConfig,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    handlers: Vec<Handler>,
    /// Cells collected by `CaptureUpval` for the next `MakeClosure`
    pending_captures: Vec<Arc<UpvalueCell>>,
    interop: Option<Arc<dyn Interop>>,
    stats: ExecStats,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Self {
            config,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            handlers: Vec::new(),
            pending_captures: Vec::new(),
            interop: None,
            stats: ExecStats::default(),
        }
    }

    pub fn with_interop(mut self, interop: Arc<dyn Interop>) -> Self {
        self.interop = Some(interop);
        self
    }

    pub fn set_interop(&mut self, interop: Arc<dyn Interop>) {
        self.interop = Some(interop);
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Active frames, outermost first
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Run a top-level code object
    pub fn run(&mut self, code: &Arc<Code>, args: &[Value]) -> RuntimeResult<Value> {
        if code.imported_upvalues != 0 {
            return Err(RuntimeError::Internal(format!(
                "{} imports {} upvalues and cannot run at top level",
                code.display_name(),
                code.imported_upvalues
            )));
        }
        let main: Arc<dyn Callable> = Arc::new(Closure::new(code.clone(), Vec::new()));
        self.execute(main, args.to_vec())
    }

    /// Invoke a function value produced by earlier execution
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> RuntimeResult<Value> {
        let escaped = |value: Value| RuntimeError::Uncaught {
            value,
            location: SourceLocation::default(),
            trace: StackTrace::new(),
        };
        match callee {
            Value::Fn(f) if f.as_any().is::<Closure>() => self.execute(f.clone(), args.to_vec()),
            Value::Fn(f) => match f.as_any().downcast_ref::<NativeFn>() {
                Some(native) => {
                    self.stats.calls += 1;
                    native
                        .call(args)
                        .map_err(|e| escaped(Value::error(Exception::from(e))))
                }
                None => Err(escaped(not_callable(callee))),
            },
            other => Err(escaped(not_callable(other))),
        }
    }

    fn execute(&mut self, callee: Arc<dyn Callable>, args: Vec<Value>) -> RuntimeResult<Value> {
        let base = self.frames.len();
        let handler_base = self.handlers.len();
        let stack_base = self.stack.len();

        let result = match self.push_frame(callee, args) {
            Ok(()) => self.run_inner(base),
            Err(Unwind::Throw(value)) => self.unwind(value, base).and_then(|()| self.run_inner(base)),
            Err(Unwind::Fatal(err)) => Err(err),
        };

        if result.is_err() {
            self.frames.truncate(base);
            self.handlers.truncate(handler_base);
            self.stack.truncate(stack_base);
            self.pending_captures.clear();
        }
        result
    }

    fn run_inner(&mut self, base: usize) -> RuntimeResult<Value> {
        loop {
            match self.step(base) {
                Ok(VMState::Continue) => {}
                Ok(VMState::Return(value)) => return Ok(value),
                Err(Unwind::Throw(value)) => self.unwind(value, base)?,
                Err(Unwind::Fatal(err)) => {
                    warn!(error = %err, "Aborting execution");
                    return Err(err);
                }
            }
            if self.config.collect_stats {
                self.record_peak();
            }
        }
    }

    fn step(&mut self, base: usize) -> StepResult<VMState> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| fatal("no active frame"))?;
        let ip = frame.ip;
        let instruction = *frame.code.instructions.get(ip).ok_or_else(|| {
            fatal(format!(
                "instruction pointer {} past the end of {}",
                ip,
                frame.code.display_name()
            ))
        })?;
        frame.ip += 1;
        self.stats.instructions += 1;

        if self.config.trace {
            trace!(
                function = frame.code.display_name(),
                ip,
                op = instruction.opcode.mnemonic(),
                arg = instruction.arg,
                depth = self.stack.len() - frame.stack_base,
                "dispatch"
            );
        }

        self.execute_instruction(instruction, base)
    }

    fn execute_instruction(&mut self, instruction: Instruction, base: usize) -> StepResult<VMState> {
        use Opcode::*;

        let arg = instruction.arg as usize;
        match instruction.opcode {
            PushNil => self.push(Value::Nil)?,
            PushTrue => self.push(Value::Boolean(true))?,
            PushFalse => self.push(Value::Boolean(false))?,
            PushInt => self.push(Value::Integer(instruction.int_arg() as i64))?,
            PushLiteral => {
                let value = self
                    .frame()?
                    .code
                    .literals
                    .get(arg)
                    .cloned()
                    .ok_or_else(|| fatal(format!("literal {} out of range", arg)))?;
                self.push(value)?;
            }
            Pop => {
                self.pop()?;
            }
            Dup => {
                let value = self.peek()?.clone();
                self.push(value)?;
            }

            LoadLocal => {
                let value = self
                    .frame()?
                    .locals
                    .get(arg)
                    .cloned()
                    .ok_or_else(|| fatal(format!("local slot {} out of range", arg)))?;
                self.push(value)?;
            }
            StoreLocal => {
                let value = self.pop()?;
                let slot = self
                    .frame_mut()?
                    .locals
                    .get_mut(arg)
                    .ok_or_else(|| fatal(format!("local slot {} out of range", arg)))?;
                *slot = value;
            }
            LoadUpval => {
                let value = self.upval(arg)?.get();
                self.push(value)?;
            }
            StoreUpval => {
                let value = self.pop()?;
                self.upval(arg)?.set(value);
            }
            BindUpval => {
                let value = self.pop()?;
                let cell = self
                    .frame_mut()?
                    .upvals
                    .get_mut(arg)
                    .ok_or_else(|| fatal(format!("upvalue {} out of range", arg)))?;
                // a fresh cell per binding keeps earlier captures intact
                *cell = UpvalueCell::new(value);
            }
            LoadSelf => {
                let callee = self.frame()?.callee.clone();
                self.push(Value::Fn(callee))?;
            }

            LoadVar => {
                let var = self.var(arg)?;
                match var.get() {
                    Some(value) => self.push(value)?,
                    None => {
                        return Err(throw(
                            ErrorKind::UnboundVar,
                            format!("Unable to resolve var: {} in this context", var.qualified_name()),
                        ))
                    }
                }
            }
            SetVar => {
                let value = self.pop()?;
                let var = self.var(arg)?;
                var.set(value);
                self.push(Value::Var(var))?;
            }
            DeclareVar => {
                let var = self.var(arg)?;
                self.push(Value::Var(var))?;
            }

            Jump => self.frame_mut()?.ip = arg,
            JumpIfFalse => {
                if !self.pop()?.is_truthy() {
                    self.frame_mut()?.ip = arg;
                }
            }

            CaptureUpval => {
                let cell = self.upval(arg)?;
                self.pending_captures.push(cell);
            }
            MakeClosure => {
                let code = self
                    .frame()?
                    .code
                    .codes
                    .get(arg)
                    .cloned()
                    .ok_or_else(|| fatal(format!("code {} out of range", arg)))?;
                let captures = std::mem::take(&mut self.pending_captures);
                if captures.len() != code.imported_upvalues {
                    return Err(fatal(format!(
                        "{} expects {} captures, got {}",
                        code.display_name(),
                        code.imported_upvalues,
                        captures.len()
                    )));
                }
                self.push(Value::Fn(Arc::new(Closure::new(code, captures))))?;
            }
            Call => {
                let args = self.pop_n(arg)?;
                let callee = self.pop()?;
                self.stats.calls += 1;
                self.call_value(callee, args)?;
            }
            Return => return self.return_from_frame(base),

            ArityEq => {
                let frame = self.frame_mut()?;
                if frame.args.len() == arg {
                    let args = std::mem::take(&mut frame.args);
                    bind_args(frame, args, None)?;
                    // skip the jump to the next clause
                    frame.ip += 1;
                }
            }
            ArityAtLeast => {
                let frame = self.frame_mut()?;
                if frame.args.len() >= arg {
                    let mut args = std::mem::take(&mut frame.args);
                    let extra = args.split_off(arg);
                    let rest = if extra.is_empty() {
                        Value::Nil
                    } else {
                        Value::list(extra)
                    };
                    bind_args(frame, args, Some(rest))?;
                    frame.ip += 1;
                }
            }
            ArityFail => {
                let frame = self.frame()?;
                let exception = Exception::arity(frame.callee.name(), frame.args.len());
                return Err(Unwind::Throw(Value::error(exception)));
            }

            MakeVector => {
                let items = self.pop_n(arg)?;
                self.push(Value::vector(items))?;
            }
            MakeArrayMap => {
                let pairs = pairs(self.pop_n(arg)?)?;
                self.push(Value::ArrayMap(ArrayMap::from_pairs(pairs)))?;
            }
            MakeHashMap => {
                let map: im::HashMap<Value, Value> = pairs(self.pop_n(arg)?)?.into_iter().collect();
                self.push(Value::HashMap(map))?;
            }
            MakeSet => {
                let items = self.pop_n(arg)?;
                self.push(Value::set(items))?;
            }

            PushHandler => {
                let handler = Handler {
                    frame: self.frames.len() - 1,
                    target: arg,
                    stack_height: self.stack.len(),
                };
                self.handlers.push(handler);
            }
            PopHandler => {
                let top = self.frames.len() - 1;
                match self.handlers.last() {
                    Some(h) if h.frame == top => {
                        self.handlers.pop();
                    }
                    _ => return Err(fatal("no handler installed by the current frame")),
                }
            }
            Throw => {
                let value = self.pop()?;
                return Err(Unwind::Throw(value));
            }
            IsInstance => {
                let tag = u8::try_from(arg)
                    .ok()
                    .and_then(TypeTag::from_code)
                    .ok_or_else(|| fatal(format!("unknown type tag {}", arg)))?;
                let matched = tag.matches(self.peek()?);
                self.push(Value::Boolean(matched))?;
            }
            MethodCall => self.method_call(arg)?,

            Nop => {}
            SetLabel => return Err(fatal("label pseudo-instruction in exported code")),
        }

        Ok(VMState::Continue)
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>) -> StepResult<()> {
        let Value::Fn(f) = callee else {
            return Err(Unwind::Throw(not_callable(&callee)));
        };
        if f.as_any().is::<Closure>() {
            return self.push_frame(f, args);
        }
        match f.as_any().downcast_ref::<NativeFn>() {
            Some(native) => {
                let result = native
                    .call(&args)
                    .map_err(|e| Unwind::Throw(Value::error(Exception::from(e))))?;
                self.push(result)
            }
            None => Err(Unwind::Throw(not_callable(&Value::Fn(f)))),
        }
    }

    fn push_frame(&mut self, callee: Arc<dyn Callable>, args: Vec<Value>) -> StepResult<()> {
        if self.frames.len() >= self.config.max_call_depth {
            warn!(
                depth = self.frames.len(),
                limit = self.config.max_call_depth,
                "Call depth limit reached"
            );
            return Err(throw(
                ErrorKind::StackOverflow,
                format!("Call depth exceeded {}", self.config.max_call_depth),
            ));
        }

        let closure = callee
            .as_any()
            .downcast_ref::<Closure>()
            .ok_or_else(|| fatal("frame callee is not a compiled closure"))?;
        let code = closure.code.clone();
        if closure.upvalues.len() != code.imported_upvalues {
            return Err(fatal(format!(
                "{} imports {} upvalues, closure carries {}",
                code.display_name(),
                code.imported_upvalues,
                closure.upvalues.len()
            )));
        }
        let own = code.upvalue_slots.saturating_sub(code.imported_upvalues);
        let mut upvals = Vec::with_capacity(code.upvalue_slots);
        upvals.extend(closure.upvalues.iter().cloned());
        upvals.extend((0..own).map(|_| UpvalueCell::new(Value::Nil)));
        self.stack.reserve(code.max_stack);

        let frame = CallFrame {
            locals: vec![Value::Nil; code.local_slots],
            code,
            callee,
            ip: 0,
            stack_base: self.stack.len(),
            args,
            upvals,
            peak: 0,
        };
        self.frames.push(frame);
        Ok(())
    }

    fn return_from_frame(&mut self, base: usize) -> StepResult<VMState> {
        let value = self.pop()?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| fatal("return without a frame"))?;
        self.stack.truncate(frame.stack_base);
        self.finish_frame(&frame);
        if self.frames.len() == base {
            return Ok(VMState::Return(value));
        }
        self.push(value)?;
        Ok(VMState::Continue)
    }

    fn method_call(&mut self, site_index: usize) -> StepResult<()> {
        let code = self.frame()?.code.clone();
        let site = code
            .methods
            .get(site_index)
            .ok_or_else(|| fatal(format!("method site {} out of range", site_index)))?;
        let args = self.pop_n(site.arity as usize)?;
        let receiver = self.pop()?;
        self.stats.calls += 1;

        let key = TypeKey::of(&receiver);
        let method = match site.cache.lookup(key) {
            Some(method) => {
                trace!(method = %site.name, "Method cache hit");
                method
            }
            None => {
                let interop = self.interop.as_ref().ok_or_else(|| {
                    throw(
                        ErrorKind::Interop,
                        format!("No host interop available to call {}", site.name),
                    )
                })?;
                let method = interop
                    .resolve_method(key, &site.name, args.len())
                    .ok_or_else(|| {
                        throw(
                            ErrorKind::Interop,
                            format!(
                                "No matching method {} found taking {} args for {}",
                                site.name,
                                args.len(),
                                receiver.type_name()
                            ),
                        )
                    })?;
                trace!(method = %site.name, receiver = receiver.type_name(), "Method cache miss");
                site.cache.update(key, method.clone());
                method
            }
        };

        let result = method(&receiver, &args)
            .map_err(|e| Unwind::Throw(Value::error(Exception::from(e))))?;
        self.push(result)
    }

    /// Transfer control to the innermost handler at or above `base`
    fn unwind(&mut self, value: Value, base: usize) -> RuntimeResult<()> {
        let location = self
            .frames
            .last()
            .map(CallFrame::location)
            .unwrap_or_default();
        let mut trace = StackTrace::new();

        while self.frames.len() > base {
            let top = self.frames.len() - 1;
            if let Some(handler) = self.handlers.last().copied().filter(|h| h.frame == top) {
                self.handlers.pop();
                self.stack.truncate(handler.stack_height);
                self.stack.push(value);
                self.frames[top].ip = handler.target;
                debug!(
                    function = self.frames[top].function_name(),
                    target = handler.target,
                    "Exception caught"
                );
                return Ok(());
            }

            if let Some(frame) = self.frames.pop() {
                trace.push(StackFrame {
                    function: frame.function_name().to_string(),
                    location: frame.location(),
                });
                self.stack.truncate(frame.stack_base);
                self.finish_frame(&frame);
            }
        }

        debug!(value = %value, frames = trace.frames.len(), "Exception escaped");
        Err(RuntimeError::Uncaught {
            value,
            location,
            trace,
        })
    }

    fn record_peak(&mut self) {
        let depth = self.stack.len();
        if let Some(frame) = self.frames.last_mut() {
            frame.peak = frame.peak.max(depth.saturating_sub(frame.stack_base));
        }
    }

    fn finish_frame(&mut self, frame: &CallFrame) {
        if self.config.collect_stats {
            self.stats
                .record_peak(frame.function_name(), frame.peak, frame.code.max_stack);
        }
    }

    fn frame(&self) -> StepResult<&CallFrame> {
        self.frames.last().ok_or_else(|| fatal("no active frame"))
    }

    fn frame_mut(&mut self) -> StepResult<&mut CallFrame> {
        self.frames.last_mut().ok_or_else(|| fatal("no active frame"))
    }

    fn upval(&self, index: usize) -> StepResult<Arc<UpvalueCell>> {
        self.frame()?
            .upvals
            .get(index)
            .cloned()
            .ok_or_else(|| fatal(format!("upvalue {} out of range", index)))
    }

    fn var(&self, index: usize) -> StepResult<Arc<kiln_core::Var>> {
        self.frame()?
            .code
            .vars
            .get(index)
            .cloned()
            .ok_or_else(|| fatal(format!("var {} out of range", index)))
    }

    fn push(&mut self, value: Value) -> StepResult<()> {
        if self.stack.len() >= self.config.max_stack_values {
            warn!(limit = self.config.max_stack_values, "Operand stack limit reached");
            return Err(throw(
                ErrorKind::StackOverflow,
                format!("Operand stack exceeded {} values", self.config.max_stack_values),
            ));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> StepResult<Value> {
        let floor = self.frame()?.stack_base;
        if self.stack.len() <= floor {
            return Err(fatal("operand stack underflow"));
        }
        self.stack.pop().ok_or_else(|| fatal("operand stack underflow"))
    }

    fn peek(&self) -> StepResult<&Value> {
        self.stack.last().ok_or_else(|| fatal("operand stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> StepResult<Vec<Value>> {
        let floor = self.frame()?.stack_base;
        if self.stack.len() < floor + n {
            return Err(fatal("operand stack underflow"));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }
}

fn bind_args(frame: &mut CallFrame, args: Vec<Value>, rest: Option<Value>) -> StepResult<()> {
    let needed = args.len() + usize::from(rest.is_some());
    if needed > frame.locals.len() {
        return Err(fatal(format!(
            "{} has {} local slots, needs {}",
            frame.code.display_name(),
            frame.locals.len(),
            needed
        )));
    }
    let values = args.into_iter().chain(rest);
    for (slot, value) in frame.locals.iter_mut().zip(values) {
        *slot = value;
    }
    Ok(())
}

fn pairs(forms: Vec<Value>) -> StepResult<Vec<(Value, Value)>> {
    if forms.len() % 2 != 0 {
        return Err(fatal("map construction with an odd number of forms"));
    }
    let mut iter = forms.into_iter();
    let mut out = Vec::with_capacity(iter.len() / 2);
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        out.push((k, v));
    }
    Ok(out)
}

fn not_callable(value: &Value) -> Value {
    Value::error(Exception::new(
        ErrorKind::NotCallable,
        format!("{} cannot be cast to fn", value.type_name()),
    ))
}
