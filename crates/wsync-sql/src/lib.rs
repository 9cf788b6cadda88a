//! Typed SQL statement builder used for schema reconciliation and versioned merges.
//!
//! Statements are assembled as ASTs (see [`ast`]) through the builders in
//! [`build`] and turned into SQL text plus bound parameters by [`render`]
//! for a specific [`dialect::Dialect`].

use wsync_core::Value;

use crate::ast::expr::{BinaryOp, BinaryOperator, Expr, Ident};

pub mod ast;
pub mod build;
pub mod dialect;
pub mod render;

pub use ast::Statement;
pub use render::render;

pub fn ident(name: &str) -> Expr {
    Expr::Identifier(Ident {
        qualifier: None,
        name: name.to_string(),
    })
}

/// Column reference qualified by a table alias, e.g. `TGT.player_id`.
pub fn col(qualifier: &str, name: &str) -> Expr {
    Expr::Identifier(Ident {
        qualifier: Some(qualifier.to_string()),
        name: name.to_string(),
    })
}

/// A bound parameter.
pub fn value(val: Value) -> Expr {
    Expr::Value(val)
}

/// A constant written into the SQL text.
pub fn literal(val: Value) -> Expr {
    Expr::Literal(val)
}

pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
    Expr::BinaryOp(Box::new(BinaryOp { left, op, right }))
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOperator::Eq, right)
}

/// Folds conditions left to right with `AND`; `None` for an empty list.
pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    fold(exprs, BinaryOperator::And)
}

/// Folds conditions left to right with `OR`; `None` for an empty list.
pub fn or_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    fold(exprs, BinaryOperator::Or)
}

fn fold(exprs: impl IntoIterator<Item = Expr>, op: BinaryOperator) -> Option<Expr> {
    exprs
        .into_iter()
        .reduce(|acc, next| binary(acc, op.clone(), next))
}

/// `l.c1 = r.c1 AND l.c2 = r.c2 ...` over a key column list.
pub fn keys_match(left: &str, right: &str, key_columns: &[String]) -> Option<Expr> {
    and_all(
        key_columns
            .iter()
            .map(|key| eq(col(left, key), col(right, key))),
    )
}
