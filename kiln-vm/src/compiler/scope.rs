//! Lexical scope resolution
//!
//! Each function under compilation owns a [`LexicalFrame`]: a stack of
//! scopes mapping names to local slots, plus the function's upvalue
//! entries. Locals start out as plain slots. The first time a nested
//! function references one, every instruction already emitted for that
//! binding is rewritten to go through an upvalue cell instead, and any
//! frames in between import the cell so it can be handed down.
//!
//! Upvalue indices are provisional until [`LexicalFrame::close`]: imports
//! are numbered first, then the frame's own captured bindings.

use super::symbolic::SymInstr;
use crate::error::{CompileError, CompileResult};
use kiln_bytecode::Opcode;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SiteKind {
    Load,
    Bind,
    Assign,
    /// Pair of placeholders copying an argument slot into a cell
    Param,
}

/// How a binding is accessed by an emitted instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// Read the current value
    Load,
    /// Establish a new binding (let, loop, recur, catch)
    Bind,
    /// Overwrite the existing binding in place (`set!`)
    Assign,
}

impl From<Access> for SiteKind {
    fn from(access: Access) -> Self {
        match access {
            Access::Load => SiteKind::Load,
            Access::Bind => SiteKind::Bind,
            Access::Assign => SiteKind::Assign,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Site {
    pc: usize,
    kind: SiteKind,
}

#[derive(Debug)]
struct Binding {
    name: Arc<str>,
    slot: u32,
    /// Set once a nested function captured this binding
    upval: Option<usize>,
    /// Instructions to rewrite if the binding gets captured
    sites: Vec<Site>,
}

#[derive(Debug)]
struct Scope {
    base: u32,
    bindings: Vec<Binding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Handed down by the enclosing frame's entry
    Import(usize),
    /// One of this frame's own bindings
    Own,
}

#[derive(Debug)]
struct UpvalEntry {
    name: Arc<str>,
    origin: Origin,
    /// Instructions whose operand becomes the final upvalue index
    sites: Vec<usize>,
}

/// Result of looking a name up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolved {
    /// Binding `index` of scope `scope` in the current frame
    Local { scope: usize, index: usize },
    /// Provisional upvalue entry of the current frame
    Upval(usize),
}

/// Slot and upvalue counts of a closed frame
#[derive(Debug, Clone, Default)]
pub(crate) struct ClosedFrame {
    pub local_slots: usize,
    pub upvalue_slots: usize,
    pub imported_upvalues: usize,
    /// Enclosing-frame entries to capture, in import order
    pub captures: Vec<(usize, Arc<str>)>,
}

/// Compile-time state of one function body
#[derive(Debug, Default)]
pub(crate) struct LexicalFrame {
    scopes: Vec<Scope>,
    next_slot: u32,
    max_slots: u32,
    upvals: Vec<UpvalEntry>,
    pub(crate) code: Vec<SymInstr>,
}

impl LexicalFrame {
    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(Scope {
            base: self.next_slot,
            bindings: Vec::new(),
        });
    }

    /// Leave a scope; its slots become available for reuse
    pub(crate) fn pop_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.next_slot = scope.base;
        }
    }

    /// Declare a binding in the innermost scope
    pub(crate) fn declare(&mut self, name: Arc<str>) -> Resolved {
        if self.scopes.is_empty() {
            self.push_scope();
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slots = self.max_slots.max(self.next_slot);

        let scope = self.scopes.len() - 1;
        let bindings = &mut self.scopes[scope].bindings;
        bindings.push(Binding {
            name,
            slot,
            upval: None,
            sites: Vec::new(),
        });
        Resolved::Local {
            scope,
            index: bindings.len() - 1,
        }
    }

    /// Look a name up in this frame only
    fn find(&self, name: &str) -> Option<Resolved> {
        for (scope_idx, scope) in self.scopes.iter().enumerate().rev() {
            for (index, binding) in scope.bindings.iter().enumerate().rev() {
                if &*binding.name == name {
                    return Some(match binding.upval {
                        Some(entry) => Resolved::Upval(entry),
                        None => Resolved::Local {
                            scope: scope_idx,
                            index,
                        },
                    });
                }
            }
        }
        self.upvals
            .iter()
            .position(|e| matches!(e.origin, Origin::Import(_)) && &*e.name == name)
            .map(Resolved::Upval)
    }

    /// Turn a local binding into an upvalue, rewriting its past uses
    fn capture(&mut self, scope: usize, index: usize) -> usize {
        let id = self.upvals.len();
        let binding = &mut self.scopes[scope].bindings[index];
        if let Some(existing) = binding.upval {
            return existing;
        }
        binding.upval = Some(id);
        let slot = binding.slot;
        let name = binding.name.clone();
        let sites = std::mem::take(&mut binding.sites);

        let mut patched = Vec::with_capacity(sites.len());
        for site in sites {
            let (pc, opcode) = match site.kind {
                SiteKind::Load => (site.pc, Opcode::LoadUpval),
                SiteKind::Bind => (site.pc, Opcode::BindUpval),
                SiteKind::Assign => (site.pc, Opcode::StoreUpval),
                SiteKind::Param => {
                    self.code[site.pc].opcode = Opcode::LoadLocal;
                    self.code[site.pc].arg = slot;
                    (site.pc + 1, Opcode::BindUpval)
                }
            };
            self.code[pc].opcode = opcode;
            self.code[pc].arg = id as u32;
            patched.push(pc);
        }

        self.upvals.push(UpvalEntry {
            name,
            origin: Origin::Own,
            sites: patched,
        });
        id
    }

    fn import(&mut self, name: &str, parent_entry: usize) -> usize {
        self.upvals.push(UpvalEntry {
            name: Arc::from(name),
            origin: Origin::Import(parent_entry),
            sites: Vec::new(),
        });
        self.upvals.len() - 1
    }

    /// Emit an access to a resolved binding and remember the use-site
    pub(crate) fn emit_access(&mut self, target: Resolved, access: Access, line: u32) {
        let pc = self.code.len();
        match target {
            Resolved::Local { scope, index } => {
                let binding = &mut self.scopes[scope].bindings[index];
                if let Some(entry) = binding.upval {
                    return self.emit_access(Resolved::Upval(entry), access, line);
                }
                let opcode = match access {
                    Access::Load => Opcode::LoadLocal,
                    Access::Bind | Access::Assign => Opcode::StoreLocal,
                };
                binding.sites.push(Site {
                    pc,
                    kind: access.into(),
                });
                let slot = binding.slot;
                self.code.push(SymInstr::new(opcode, slot).at(line));
            }
            Resolved::Upval(entry) => {
                let opcode = match access {
                    Access::Load => Opcode::LoadUpval,
                    Access::Bind => Opcode::BindUpval,
                    Access::Assign => Opcode::StoreUpval,
                };
                self.upvals[entry].sites.push(pc);
                self.code.push(SymInstr::new(opcode, entry as u32).at(line));
            }
        }
    }

    /// Emit the placeholder pair that boxes a parameter if it is captured
    pub(crate) fn emit_param_box(&mut self, target: Resolved, line: u32) {
        if let Resolved::Local { scope, index } = target {
            let pc = self.code.len();
            let binding = &mut self.scopes[scope].bindings[index];
            binding.sites.push(Site {
                pc,
                kind: SiteKind::Param,
            });
            let slot = binding.slot;
            self.code.push(SymInstr::new(Opcode::Nop, slot).at(line));
            self.code.push(SymInstr::new(Opcode::Nop, 0).at(line));
        }
    }

    /// Emit a capture of this frame's upvalue entry for a child closure
    pub(crate) fn emit_capture(&mut self, entry: usize, name: &str, line: u32) -> CompileResult<()> {
        let Some(upval) = self.upvals.get_mut(entry) else {
            return Err(CompileError::UnknownUpvalue(name.to_string()));
        };
        upval.sites.push(self.code.len());
        self.code
            .push(SymInstr::new(Opcode::CaptureUpval, entry as u32).at(line));
        Ok(())
    }

    /// Assign final upvalue indices and hand back the instruction stream
    pub(crate) fn close(self) -> (ClosedFrame, Vec<SymInstr>) {
        let LexicalFrame {
            upvals,
            mut code,
            max_slots,
            ..
        } = self;

        let mut order: Vec<usize> = Vec::with_capacity(upvals.len());
        let mut captures = Vec::new();
        for (id, entry) in upvals.iter().enumerate() {
            if let Origin::Import(parent) = entry.origin {
                order.push(id);
                captures.push((parent, entry.name.clone()));
            }
        }
        let imported_upvalues = order.len();
        order.extend(
            upvals
                .iter()
                .enumerate()
                .filter(|(_, e)| e.origin == Origin::Own)
                .map(|(id, _)| id),
        );

        let mut final_index = vec![0u32; upvals.len()];
        for (index, &id) in order.iter().enumerate() {
            final_index[id] = index as u32;
        }
        for (id, entry) in upvals.iter().enumerate() {
            for &pc in &entry.sites {
                code[pc].arg = final_index[id];
            }
        }

        let closed = ClosedFrame {
            local_slots: max_slots as usize,
            upvalue_slots: upvals.len(),
            imported_upvalues,
            captures,
        };
        (closed, code)
    }
}

/// Resolve `name` from the innermost frame outwards
///
/// A hit in an enclosing frame captures the binding there and threads an
/// import through every frame in between.
pub(crate) fn resolve<F: AsMut<LexicalFrame>>(
    enclosing: &mut [F],
    current: &mut LexicalFrame,
    name: &str,
) -> Option<Resolved> {
    if let Some(found) = current.find(name) {
        return Some(found);
    }
    let (parent, rest) = enclosing.split_last_mut()?;
    let parent = parent.as_mut();
    let entry = match resolve(rest, parent, name)? {
        Resolved::Local { scope, index } => parent.capture(scope, index),
        Resolved::Upval(entry) => entry,
    };
    Some(Resolved::Upval(current.import(name, entry)))
}
