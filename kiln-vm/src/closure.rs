//! Runtime closures and their shared upvalue cells

use kiln_bytecode::Code;
use kiln_core::{Callable, Value};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A heap cell holding a captured binding
///
/// Every closure that captured the same binding holds the same cell, so a
/// write through one is seen by all of them.
#[derive(Debug)]
pub struct UpvalueCell {
    value: RwLock<Value>,
}

impl UpvalueCell {
    pub fn new(value: Value) -> Arc<Self> {
        Arc::new(Self {
            value: RwLock::new(value),
        })
    }

    pub fn get(&self) -> Value {
        self.value.read().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.write() = value;
    }
}

/// A code object paired with the upvalue cells it imported
pub struct Closure {
    pub code: Arc<Code>,
    pub upvalues: Vec<Arc<UpvalueCell>>,
}

impl Closure {
    pub fn new(code: Arc<Code>, upvalues: Vec<Arc<UpvalueCell>>) -> Self {
        Self { code, upvalues }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#<closure {} upvalues={}>",
            self.code.display_name(),
            self.upvalues.len()
        )
    }
}

impl Callable for Closure {
    fn name(&self) -> Option<&str> {
        self.code.name.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
