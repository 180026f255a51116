//! Complexity estimation for compiled policy expressions.
//!
//! Mirrors the crate's general weighted-signal-then-threshold idiom: every
//! AST node contributes a fixed cost, quantifiers and calls cost more than
//! leaves, and the total is checked against a budget at compile time.

use crate::policy::ast::{Expr, Program};

const LEAF_COST: u32 = 1;
const UNARY_COST: u32 = 1;
const BINARY_COST: u32 = 2;
const CALL_COST: u32 = 3;
const LIST_COST: u32 = 1;
const EXISTS_COST: u32 = 5;

/// Estimate the evaluation cost of `program`. Used by the compiler to reject
/// expressions whose worst-case cost exceeds `max_complexity`.
pub fn estimate(program: &Program) -> u32 {
    estimate_expr(&program.root)
}

fn estimate_expr(expr: &Expr) -> u32 {
    match expr {
        Expr::BoolLit(_) | Expr::IntLit(_) | Expr::FloatLit(_) | Expr::StringLit(_) => LEAF_COST,
        Expr::Path(_) => LEAF_COST,
        Expr::Unary { expr, .. } => UNARY_COST + estimate_expr(expr),
        Expr::Binary { lhs, rhs, .. } => BINARY_COST + estimate_expr(lhs) + estimate_expr(rhs),
        Expr::Call { args, .. } => {
            CALL_COST + args.iter().map(estimate_expr).sum::<u32>()
        }
        Expr::ListLit(items) => LIST_COST + items.iter().map(estimate_expr).sum::<u32>(),
        Expr::Exists { collection, predicate, .. } => {
            EXISTS_COST + estimate_expr(collection) + estimate_expr(predicate)
        }
    }
}
