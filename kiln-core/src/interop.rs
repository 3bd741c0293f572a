//! Host interop seam
//!
//! Method calls on receivers are resolved by an [`Interop`] implementation
//! supplied by the embedder. Resolution is keyed on the receiver's
//! [`TypeKey`], the method name, and the argument count, which lets call
//! sites cache the result.

use crate::types::TypeTag;
use crate::value::{Value, ValueResult};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Opaque host object carried in [`Value::Host`]
pub trait HostObject: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// Receiver type used for method resolution and caching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Builtin(TypeTag),
    Host(TypeId),
}

impl TypeKey {
    pub fn of(value: &Value) -> Self {
        let tag = match value {
            Value::Host(obj) => return TypeKey::Host(Any::type_id(obj.as_any())),
            Value::Nil => TypeTag::Nil,
            Value::Boolean(_) => TypeTag::Boolean,
            Value::Integer(_) => TypeTag::Integer,
            Value::Float(_) => TypeTag::Float,
            Value::String(_) => TypeTag::String,
            Value::Keyword(_) => TypeTag::Keyword,
            Value::Symbol(_) => TypeTag::Symbol,
            Value::List(_) => TypeTag::List,
            Value::Vector(_) => TypeTag::Vector,
            Value::ArrayMap(_) | Value::HashMap(_) => TypeTag::Map,
            Value::Set(_) => TypeTag::Set,
            Value::Fn(_) => TypeTag::Fn,
            Value::Var(_) => TypeTag::Var,
            Value::Error(_) => TypeTag::Error,
        };
        TypeKey::Builtin(tag)
    }

    pub fn host<T: 'static>() -> Self {
        TypeKey::Host(TypeId::of::<T>())
    }
}

/// Resolved method: receives the receiver and the arguments
pub type MethodFn = Arc<dyn Fn(&Value, &[Value]) -> ValueResult<Value> + Send + Sync>;

pub trait Interop: Send + Sync {
    fn resolve_method(&self, receiver: TypeKey, name: &str, arity: usize) -> Option<MethodFn>;
}

/// Registry-backed [`Interop`] implementation
#[derive(Default)]
pub struct MethodTable {
    methods: RwLock<FxHashMap<(TypeKey, String, usize), MethodFn>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, receiver: TypeKey, name: &str, arity: usize, method: F)
    where
        F: Fn(&Value, &[Value]) -> ValueResult<Value> + Send + Sync + 'static,
    {
        self.methods
            .write()
            .insert((receiver, name.to_string(), arity), Arc::new(method));
    }
}

impl Interop for MethodTable {
    fn resolve_method(&self, receiver: TypeKey, name: &str, arity: usize) -> Option<MethodFn> {
        self.methods
            .read()
            .get(&(receiver, name.to_string(), arity))
            .cloned()
    }
}
