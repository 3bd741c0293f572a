//! Resolved expression tree
//!
//! The analyzer hands the backend a tree in which every variable reference
//! has already been classified as either a global var handle or a local
//! binding named by its declaration. Special forms are explicit variants.

use crate::types::TypeTag;
use crate::value::Value;
use crate::var::Var;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Source position of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Option<Span>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Constant value
    Literal(Value),
    /// Reference to a global var
    Global(Arc<Var>),
    /// Reference to a local binding by its declared name
    Local(Arc<str>),
    /// Function invocation
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// Conditional; a missing else branch yields nil
    If {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    /// Sequence; value of the last expression, nil when empty
    Do(Vec<Expr>),
    /// Function literal
    Fn(FnExpr),
    /// Sequential local bindings
    Let {
        bindings: Vec<(Arc<str>, Expr)>,
        body: Box<Expr>,
    },
    /// Like `Let`, and establishes a `recur` target
    Loop {
        bindings: Vec<(Arc<str>, Expr)>,
        body: Box<Expr>,
    },
    /// Rebind the innermost loop or function parameters and jump back
    Recur(Vec<Expr>),
    /// Assign to an existing local binding
    SetLocal { name: Arc<str>, value: Box<Expr> },
    Throw(Box<Expr>),
    Try(TryExpr),
    /// Bind a global var; without a value the var is only declared
    Def {
        var: Arc<Var>,
        value: Option<Box<Expr>>,
    },
    Vector(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Set(Vec<Expr>),
    /// Host method call `(.method receiver args...)`
    MethodCall {
        method: Arc<str>,
        receiver: Box<Expr>,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct FnExpr {
    /// Optional self name, bound inside the body
    pub name: Option<Arc<str>>,
    pub arities: Vec<FnArity>,
}

#[derive(Debug, Clone)]
pub struct FnArity {
    /// Declared parameters; when `variadic` the last one receives the rest
    pub params: Vec<Arc<str>>,
    pub variadic: bool,
    pub body: Box<Expr>,
}

impl FnArity {
    pub fn fixed(params: &[&str], body: Expr) -> Self {
        Self {
            params: params.iter().map(|p| Arc::from(*p)).collect(),
            variadic: false,
            body: Box::new(body),
        }
    }

    /// `params` must include the trailing rest parameter
    pub fn variadic(params: &[&str], body: Expr) -> Self {
        Self {
            variadic: true,
            ..Self::fixed(params, body)
        }
    }

    /// Number of positional parameters before the rest parameter
    pub fn required(&self) -> usize {
        if self.variadic {
            self.params.len().saturating_sub(1)
        } else {
            self.params.len()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TryExpr {
    pub body: Box<Expr>,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Box<Expr>>,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub tag: TypeTag,
    pub binding: Arc<str>,
    pub body: Box<Expr>,
}

impl CatchClause {
    pub fn new(tag: TypeTag, binding: &str, body: Expr) -> Self {
        Self {
            tag,
            binding: Arc::from(binding),
            body: Box::new(body),
        }
    }
}

fn boxed(e: Expr) -> Box<Expr> {
    Box::new(e)
}

fn named(bindings: Vec<(&str, Expr)>) -> Vec<(Arc<str>, Expr)> {
    bindings
        .into_iter()
        .map(|(name, init)| (Arc::from(name), init))
        .collect()
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Self {
        Expr { kind, span: None }
    }
}

/// Constructors used by the analyzer and by tests
impl Expr {
    /// Attach a source line
    pub fn at(mut self, line: u32) -> Self {
        self.span = Some(Span { line, column: 0 });
        self
    }

    pub fn line(&self) -> Option<u32> {
        self.span.map(|s| s.line)
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        ExprKind::Literal(value.into()).into()
    }

    pub fn nil() -> Self {
        ExprKind::Literal(Value::Nil).into()
    }

    pub fn int(n: i64) -> Self {
        Self::literal(n)
    }

    pub fn global(var: &Arc<Var>) -> Self {
        ExprKind::Global(var.clone()).into()
    }

    pub fn local(name: &str) -> Self {
        ExprKind::Local(Arc::from(name)).into()
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        ExprKind::Call {
            callee: boxed(callee),
            args,
        }
        .into()
    }

    pub fn if_(test: Expr, then: Expr, otherwise: Option<Expr>) -> Self {
        ExprKind::If {
            test: boxed(test),
            then: boxed(then),
            otherwise: otherwise.map(boxed),
        }
        .into()
    }

    pub fn do_(body: Vec<Expr>) -> Self {
        ExprKind::Do(body).into()
    }

    pub fn fn_(name: Option<&str>, arities: Vec<FnArity>) -> Self {
        ExprKind::Fn(FnExpr {
            name: name.map(Arc::from),
            arities,
        })
        .into()
    }

    /// Single fixed-arity anonymous function
    pub fn lambda(params: &[&str], body: Expr) -> Self {
        Self::fn_(None, vec![FnArity::fixed(params, body)])
    }

    pub fn let_(bindings: Vec<(&str, Expr)>, body: Expr) -> Self {
        ExprKind::Let {
            bindings: named(bindings),
            body: boxed(body),
        }
        .into()
    }

    pub fn loop_(bindings: Vec<(&str, Expr)>, body: Expr) -> Self {
        ExprKind::Loop {
            bindings: named(bindings),
            body: boxed(body),
        }
        .into()
    }

    pub fn recur(args: Vec<Expr>) -> Self {
        ExprKind::Recur(args).into()
    }

    pub fn set_local(name: &str, value: Expr) -> Self {
        ExprKind::SetLocal {
            name: Arc::from(name),
            value: boxed(value),
        }
        .into()
    }

    pub fn throw(value: Expr) -> Self {
        ExprKind::Throw(boxed(value)).into()
    }

    pub fn try_(body: Expr, catches: Vec<CatchClause>, finally: Option<Expr>) -> Self {
        ExprKind::Try(TryExpr {
            body: boxed(body),
            catches,
            finally: finally.map(boxed),
        })
        .into()
    }

    pub fn def(var: &Arc<Var>, value: Option<Expr>) -> Self {
        ExprKind::Def {
            var: var.clone(),
            value: value.map(boxed),
        }
        .into()
    }

    pub fn vector(items: Vec<Expr>) -> Self {
        ExprKind::Vector(items).into()
    }

    pub fn map(entries: Vec<(Expr, Expr)>) -> Self {
        ExprKind::Map(entries).into()
    }

    pub fn set(items: Vec<Expr>) -> Self {
        ExprKind::Set(items).into()
    }

    pub fn method_call(method: &str, receiver: Expr, args: Vec<Expr>) -> Self {
        ExprKind::MethodCall {
            method: Arc::from(method),
            receiver: boxed(receiver),
            args,
        }
        .into()
    }
}
