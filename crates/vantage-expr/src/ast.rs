//! Expression AST.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `=~`, regex match.
    Match,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    List(Vec<Expr>),
    Member {
        object: Box<Expr>,
        field: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Whether the expression reads `root.key` (or `root["key"]`) anywhere.
    ///
    /// The scheduler uses this to decide if a gate opted in to observing a
    /// particular upstream, e.g. `references("outputs", "lint")`.
    pub fn references(&self, root: &str, key: &str) -> bool {
        match self {
            Expr::Member { object, field } => {
                (field == key && matches!(object.as_ref(), Expr::Ident(name) if name == root))
                    || object.references(root, key)
            }
            Expr::Index { object, index } => {
                let direct = matches!(object.as_ref(), Expr::Ident(name) if name == root)
                    && matches!(index.as_ref(), Expr::Literal(Value::String(s)) if s == key);
                direct || object.references(root, key) || index.references(root, key)
            }
            Expr::List(items) => items.iter().any(|e| e.references(root, key)),
            Expr::Call { args, .. } => args.iter().any(|e| e.references(root, key)),
            Expr::Unary { operand, .. } => operand.references(root, key),
            Expr::Binary { left, right, .. } => {
                left.references(root, key) || right.references(root, key)
            }
            Expr::Literal(_) | Expr::Ident(_) => false,
        }
    }

    /// Whether the expression calls the named helper anywhere.
    pub fn calls(&self, helper: &str) -> bool {
        match self {
            Expr::Call { name, args } => name == helper || args.iter().any(|e| e.calls(helper)),
            Expr::List(items) => items.iter().any(|e| e.calls(helper)),
            Expr::Member { object, .. } => object.calls(helper),
            Expr::Index { object, index } => object.calls(helper) || index.calls(helper),
            Expr::Unary { operand, .. } => operand.calls(helper),
            Expr::Binary { left, right, .. } => left.calls(helper) || right.calls(helper),
            Expr::Literal(_) | Expr::Ident(_) => false,
        }
    }
}
