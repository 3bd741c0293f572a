//! Global variables

use crate::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// A namespace-qualified global binding
///
/// Compiled code holds `Arc<Var>` handles directly, so redefining a var is
/// visible to every function that references it.
pub struct Var {
    namespace: Arc<str>,
    name: Arc<str>,
    root: RwLock<Option<Value>>,
}

impl Var {
    /// Create an unbound var
    pub fn new(namespace: impl AsRef<str>, name: impl AsRef<str>) -> Arc<Self> {
        Arc::new(Self {
            namespace: Arc::from(namespace.as_ref()),
            name: Arc::from(name.as_ref()),
            root: RwLock::new(None),
        })
    }

    /// Create a var bound to `value`
    pub fn with_value(namespace: impl AsRef<str>, name: impl AsRef<str>, value: Value) -> Arc<Self> {
        let var = Self::new(namespace, name);
        var.set(value);
        var
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }

    /// Current root value, `None` while unbound
    pub fn get(&self) -> Option<Value> {
        self.root.read().clone()
    }

    pub fn set(&self, value: Value) {
        *self.root.write() = Some(value);
    }

    pub fn is_bound(&self) -> bool {
        self.root.read().is_some()
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#'{}/{}", self.namespace, self.name)
    }
}

/// Maps qualified names back to live vars when loading persisted code
pub trait VarResolver {
    fn resolve(&self, namespace: &str, name: &str) -> Option<Arc<Var>>;
}

fn qualify(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Interning table of global vars
#[derive(Default)]
pub struct VarTable {
    vars: RwLock<FxHashMap<String, Arc<Var>>>,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the var for `namespace/name`, creating it unbound if needed
    pub fn intern(&self, namespace: &str, name: &str) -> Arc<Var> {
        if let Some(var) = self.lookup(namespace, name) {
            return var;
        }
        let mut vars = self.vars.write();
        vars.entry(qualify(namespace, name))
            .or_insert_with(|| Var::new(namespace, name))
            .clone()
    }

    pub fn lookup(&self, namespace: &str, name: &str) -> Option<Arc<Var>> {
        self.vars.read().get(&qualify(namespace, name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.vars.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.read().is_empty()
    }
}

impl VarResolver for VarTable {
    fn resolve(&self, namespace: &str, name: &str) -> Option<Arc<Var>> {
        self.lookup(namespace, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_returns_same_var() {
        let table = VarTable::new();
        let a = table.intern("user", "x");
        let b = table.intern("user", "x");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
        assert!(table.resolve("user", "y").is_none());
    }

    #[test]
    fn test_binding() {
        let var = Var::new("user", "x");
        assert!(!var.is_bound());
        var.set(Value::Integer(1));
        assert_eq!(var.get(), Some(Value::Integer(1)));
        assert_eq!(var.qualified_name(), "user/x");
    }
}
