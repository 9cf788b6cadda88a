//! Defines the AST for SQL expressions.

use wsync_core::{ColumnType, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column identifier, e.g. `player_id` or `TGT.player_id`.
    Identifier(Ident),

    /// A bound parameter value. `NULL` is written inline.
    Value(Value),

    /// A constant written into the statement text.
    Literal(Value),

    /// `left <op> right`, always parenthesized when rendered.
    BinaryOp(Box<BinaryOp>),

    /// `expr IS NULL` / `expr IS NOT NULL`.
    IsNull { expr: Box<Expr>, negated: bool },

    /// Tolerant conversion to text; yields null instead of failing.
    TextCast(Box<Expr>),

    /// `CAST(expr AS type)`.
    Cast {
        expr: Box<Expr>,
        data_type: ColumnType,
    },

    /// Typed cast that yields null for values which do not convert.
    SafeCast {
        expr: Box<Expr>,
        data_type: ColumnType,
    },

    CurrentTimestamp,

    /// `*` or `alias.*`.
    Wildcard { qualifier: Option<String> },

    /// `expr AS alias`.
    Alias { expr: Box<Expr>, alias: String },
}

impl Expr {
    pub fn alias(self, alias: &str) -> Expr {
        Expr::Alias {
            expr: Box::new(self),
            alias: alias.to_string(),
        }
    }

    pub fn text_cast(self) -> Expr {
        Expr::TextCast(Box::new(self))
    }

    pub fn cast(self, data_type: ColumnType) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            data_type,
        }
    }

    pub fn safe_cast(self, data_type: ColumnType) -> Expr {
        Expr::SafeCast {
            expr: Box::new(self),
            data_type,
        }
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub qualifier: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOp {
    pub left: Expr,
    pub op: BinaryOperator,
    pub right: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    IsDistinctFrom,
    And,
    Or,
}
