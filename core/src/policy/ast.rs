//! Abstract syntax tree for the policy expression language.

use std::fmt;

/// The root of a compiled expression. Every `Program` must type-check to
/// `ValueType::Bool` before it is wrapped in a `CompiledPolicy`.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub root: Expr,
}

/// The static type of an expression, inferred by the compiler's type
/// checker. `Dynamic` covers context-variable lookups whose concrete type is
/// only known at evaluation time; operators that require a concrete type
/// accept `Dynamic` operands and defer the check to runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    List,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    In,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::In => "in",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A single node in the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    BoolLit(bool),
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),

    /// A dotted path into a context namespace, e.g. `principal.roles` or
    /// `request.ip`. The first segment must be one of the four namespaces
    /// fixed by the context schema.
    Path(Vec<String>),

    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// `name(args...)`, resolved against the closed auxiliary function set.
    Call {
        name: String,
        args: Vec<Expr>,
    },

    /// `list`, a literal collection.
    ListLit(Vec<Expr>),

    /// `collection.exists(var, predicate)`: existential quantifier over a
    /// list-valued expression.
    Exists {
        collection: Box<Expr>,
        binding: String,
        predicate: Box<Expr>,
    },
}

impl Expr {
    pub fn path(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Expr::Path(segments.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_op_display_matches_source_operator() {
        assert_eq!(BinaryOp::Eq.to_string(), "==");
        assert_eq!(BinaryOp::And.to_string(), "&&");
    }
}
