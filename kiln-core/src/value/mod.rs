//! Runtime value representation

mod array_map;
pub mod error;

pub use array_map::ArrayMap;
pub use error::{ValueError, ValueResult};

use crate::callable::Callable;
use crate::exception::Exception;
use crate::interop::HostObject;
use crate::var::Var;
use im::{HashMap, HashSet, Vector};
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Runtime value types
///
/// Collections are persistent and structurally shared, so cloning a value
/// is always cheap.
#[derive(Debug, Clone)]
pub enum Value {
    /// Nil value
    Nil,

    /// Boolean value
    Boolean(bool),

    /// 64-bit integer
    Integer(i64),

    /// Floating point value
    Float(f64),

    /// Immutable string
    String(Arc<str>),

    /// Keyword such as `:name`
    Keyword(Arc<str>),

    /// Symbol value
    Symbol(Arc<str>),

    /// Persistent list
    List(Vector<Value>),

    /// Persistent vector
    Vector(Vector<Value>),

    /// Small map with linear lookup
    ArrayMap(ArrayMap),

    /// Hashed persistent map
    HashMap(HashMap<Value, Value>),

    /// Hashed persistent set
    Set(HashSet<Value>),

    /// Anything that can be invoked: compiled closures and native functions
    Fn(Arc<dyn Callable>),

    /// Global variable handle, produced by `def`
    Var(Arc<Var>),

    /// Thrown error object
    Error(Arc<Exception>),

    /// Opaque object owned by the embedding host
    Host(Arc<dyn HostObject>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn keyword(s: impl AsRef<str>) -> Self {
        Value::Keyword(Arc::from(s.as_ref()))
    }

    pub fn symbol(s: impl AsRef<str>) -> Self {
        Value::Symbol(Arc::from(s.as_ref()))
    }

    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn vector<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Vector(items.into_iter().collect())
    }

    pub fn set<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Set(items.into_iter().collect())
    }

    /// Wrap an error object so it can be thrown
    pub fn error(exception: Exception) -> Self {
        Value::Error(Arc::new(exception))
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::ArrayMap(_) | Value::HashMap(_) => "map",
            Value::Set(_) => "set",
            Value::Fn(_) => "fn",
            Value::Var(_) => "var",
            Value::Error(_) => "error",
            Value::Host(_) => "host",
        }
    }

    /// Only `nil` and `false` are falsey
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_integer(&self) -> ValueResult<i64> {
        match self {
            Value::Integer(n) => Ok(*n),
            other => Err(ValueError::TypeError {
                expected: "integer",
                actual: other.type_name(),
            }),
        }
    }

    pub fn as_str(&self) -> ValueResult<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(ValueError::TypeError {
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }

    pub fn as_exception(&self) -> Option<&Exception> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Look up a key in either map representation
    pub fn map_get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::ArrayMap(m) => m.get(key),
            Value::HashMap(m) => m.get(key),
            _ => None,
        }
    }

    /// Number of elements for collections, `None` for scalars
    pub fn count(&self) -> Option<usize> {
        match self {
            Value::Nil => Some(0),
            Value::String(s) => Some(s.chars().count()),
            Value::List(v) | Value::Vector(v) => Some(v.len()),
            Value::ArrayMap(m) => Some(m.len()),
            Value::HashMap(m) => Some(m.len()),
            Value::Set(s) => Some(s.len()),
            _ => None,
        }
    }

    fn map_len(&self) -> Option<usize> {
        match self {
            Value::ArrayMap(m) => Some(m.len()),
            Value::HashMap(m) => Some(m.len()),
            _ => None,
        }
    }

    fn map_entries(&self) -> Box<dyn Iterator<Item = (&Value, &Value)> + '_> {
        match self {
            Value::ArrayMap(m) => Box::new(m.iter()),
            Value::HashMap(m) => Box::new(m.iter().map(|(k, v)| (k, v))),
            _ => Box::new(std::iter::empty()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            // Bitwise so that Eq and Hash agree
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Fn(a), Value::Fn(b)) => Arc::ptr_eq(a, b),
            (Value::Var(a), Value::Var(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            (a, b) => match (a.map_len(), b.map_len()) {
                (Some(la), Some(lb)) => {
                    la == lb && a.map_entries().all(|(k, v)| b.map_get(k) == Some(v))
                }
                _ => false,
            },
        }
    }
}

impl Eq for Value {}

fn unordered_hash<'a, I: Iterator<Item = (&'a Value, Option<&'a Value>)>>(items: I) -> u64 {
    items.fold(0u64, |acc, (k, v)| {
        let mut hasher = FxHasher::default();
        k.hash(&mut hasher);
        if let Some(v) = v {
            v.hash(&mut hasher);
        }
        acc.wrapping_add(hasher.finish())
    })
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Nil => 0u8.hash(state),
            Value::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Integer(n) => {
                2u8.hash(state);
                n.hash(state);
            }
            Value::Float(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::String(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Keyword(s) => {
                5u8.hash(state);
                s.hash(state);
            }
            Value::Symbol(s) => {
                6u8.hash(state);
                s.hash(state);
            }
            Value::List(items) => {
                7u8.hash(state);
                items.len().hash(state);
                items.iter().for_each(|v| v.hash(state));
            }
            Value::Vector(items) => {
                8u8.hash(state);
                items.len().hash(state);
                items.iter().for_each(|v| v.hash(state));
            }
            Value::ArrayMap(_) | Value::HashMap(_) => {
                9u8.hash(state);
                unordered_hash(self.map_entries().map(|(k, v)| (k, Some(v)))).hash(state);
            }
            Value::Set(items) => {
                10u8.hash(state);
                unordered_hash(items.iter().map(|k| (k, None))).hash(state);
            }
            Value::Fn(f) => {
                11u8.hash(state);
                (Arc::as_ptr(f) as *const () as usize).hash(state);
            }
            Value::Var(v) => {
                12u8.hash(state);
                (Arc::as_ptr(v) as usize).hash(state);
            }
            Value::Error(e) => {
                13u8.hash(state);
                e.kind().hash(state);
                e.message().hash(state);
            }
            Value::Host(h) => {
                14u8.hash(state);
                (Arc::as_ptr(h) as *const () as usize).hash(state);
            }
        }
    }
}

fn write_seq<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    close: &str,
    items: impl Iterator<Item = &'a Value>,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Keyword(k) => write!(f, ":{}", k),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::List(items) => write_seq(f, "(", ")", items.iter()),
            Value::Vector(items) => write_seq(f, "[", "]", items.iter()),
            Value::Set(items) => write_seq(f, "#{", "}", items.iter()),
            Value::ArrayMap(_) | Value::HashMap(_) => {
                f.write_str("{")?;
                for (i, (k, v)) in self.map_entries().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Fn(func) => match func.name() {
                Some(name) => write!(f, "#<fn {}>", name),
                None => write!(f, "#<fn>"),
            },
            Value::Var(var) => write!(f, "#'{}", var.qualified_name()),
            Value::Error(e) => write!(f, "#error {{:kind {} :message {:?}}}", e.kind(), e.message()),
            Value::Host(h) => write!(f, "#<{}>", h.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}
