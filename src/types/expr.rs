use std::collections::BTreeSet;
use std::fmt;
use std::ops::Not;

use super::Value;

/// Comparison operators supported in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Condition AST evaluated against a request scope.
///
/// Built either with the [`path()`] / [`has_permission()`] helpers or by parsing
/// DSL text with [`parse_condition`](crate::parse_condition). `Display` renders
/// the expression back into DSL that parses to an equal tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(bool),
    Compare {
        path: String,
        op: CompareOp,
        value: Value,
    },
    In {
        path: String,
        values: Vec<Value>,
    },
    Exists(String),
    HasPermission(String),
    HasRole(String),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Neq => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(b) => write!(f, "{b}"),
            Expr::Compare { path, op, value } => write!(f, "({path} {op} {value})"),
            Expr::In { path, values } => {
                write!(f, "({path} in {})", Value::List(values.clone()))
            }
            Expr::Exists(path) => write!(f, "exists({path})"),
            Expr::HasPermission(p) => write!(f, "has_permission({})", Value::from(p.as_str())),
            Expr::HasRole(r) => write!(f, "has_role({})", Value::from(r.as_str())),
            Expr::And(a, b) => write!(f, "({a} AND {b})"),
            Expr::Or(a, b) => write!(f, "({a} OR {b})"),
            Expr::Not(inner) => write!(f, "(NOT {inner})"),
        }
    }
}

impl Expr {
    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// Every context path this expression reads, excluding permission and role
    /// predicates (those are covered by the permission fingerprint).
    pub fn collect_paths(&self, out: &mut BTreeSet<String>) {
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::Compare { path, .. } | Expr::In { path, .. } | Expr::Exists(path) => {
                    out.insert(path.clone());
                }
                Expr::And(a, b) | Expr::Or(a, b) => {
                    stack.push(a);
                    stack.push(b);
                }
                Expr::Not(inner) => stack.push(inner),
                Expr::Literal(_) | Expr::HasPermission(_) | Expr::HasRole(_) => {}
            }
        }
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// Intermediate builder for path predicates.
/// Created by [`path()`]; requires a comparison method to produce a valid [`Expr`].
#[derive(Debug, Clone)]
pub struct PathExpr {
    path: String,
}

impl PathExpr {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Expr {
        Expr::Compare {
            path: self.path,
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Eq, value)
    }

    #[must_use]
    pub fn neq(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Neq, value)
    }

    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gt, value)
    }

    #[must_use]
    pub fn gte(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gte, value)
    }

    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lt, value)
    }

    #[must_use]
    pub fn lte(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lte, value)
    }

    #[must_use]
    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::In {
            path: self.path,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn exists(self) -> Expr {
        Expr::Exists(self.path)
    }

    /// `path == true`, the meaning of a bare path in the DSL.
    #[must_use]
    pub fn truthy(self) -> Expr {
        self.eq(true)
    }
}

#[must_use]
pub fn path(path: &str) -> PathExpr {
    PathExpr {
        path: path.to_owned(),
    }
}

#[must_use]
pub fn has_permission(token: &str) -> Expr {
    Expr::HasPermission(token.to_owned())
}

#[must_use]
pub fn has_role(role: &str) -> Expr {
    Expr::HasRole(role.to_owned())
}
