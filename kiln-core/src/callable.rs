//! The callable capability

use crate::value::{Value, ValueResult};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Something a `Call` instruction can invoke
///
/// The virtual machine recognizes its own closure type through
/// [`Callable::as_any`]; everything else must be a [`NativeFn`].
pub trait Callable: fmt::Debug + Send + Sync {
    fn name(&self) -> Option<&str>;

    fn as_any(&self) -> &dyn Any;
}

type NativeImpl = dyn Fn(&[Value]) -> ValueResult<Value> + Send + Sync;

/// A function implemented by the host
#[derive(Clone)]
pub struct NativeFn {
    name: Arc<str>,
    func: Arc<NativeImpl>,
}

impl NativeFn {
    pub fn new<F>(name: impl AsRef<str>, func: F) -> Self
    where
        F: Fn(&[Value]) -> ValueResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            func: Arc::new(func),
        }
    }

    pub fn call(&self, args: &[Value]) -> ValueResult<Value> {
        (self.func)(args)
    }

    /// Wrap as a first-class value
    pub fn into_value(self) -> Value {
        Value::Fn(Arc::new(self))
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<native {}>", self.name)
    }
}

impl Callable for NativeFn {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
