//! Tree-walking interpreter for compiled policy programs.

use crate::error::{Error, Result};
use crate::policy::ast::{BinaryOp, Expr, Program, UnaryOp};
use crate::policy::functions;
use crate::policy::types::EvaluationContext;
use crate::policy::value::Value;
use std::collections::HashMap;

/// Run `program` against `ctx`, returning its boolean result. Any runtime
/// type mismatch (e.g. a path resolving to a type an operator cannot use)
/// surfaces as `Error::PolicyTypeError` rather than panicking, per the
/// evaluator's "never panics on any context shaped per the schema" guarantee.
pub fn eval(program: &Program, ctx: &EvaluationContext) -> Result<bool> {
    let bindings = HashMap::new();
    let value = eval_expr(&program.root, ctx, &bindings)?;
    Ok(value.is_truthy())
}

fn eval_expr(expr: &Expr, ctx: &EvaluationContext, bindings: &HashMap<String, Value>) -> Result<Value> {
    match expr {
        Expr::BoolLit(b) => Ok(Value::Bool(*b)),
        Expr::IntLit(i) => Ok(Value::Int(*i)),
        Expr::FloatLit(f) => Ok(Value::Float(*f)),
        Expr::StringLit(s) => Ok(Value::String(s.clone())),
        Expr::Path(segments) => resolve_path(segments, ctx, bindings),
        Expr::ListLit(items) => {
            let values = items
                .iter()
                .map(|item| eval_expr(item, ctx, bindings))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(values))
        }
        Expr::Unary { op, expr } => {
            let value = eval_expr(expr, ctx, bindings)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Neg => match value {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(type_error("-", &other)),
                },
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx, bindings),
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|arg| eval_expr(arg, ctx, bindings))
                .collect::<Result<Vec<_>>>()?;
            functions::call(name, &values, &ctx.principal_value(), &ctx.request_value())
        }
        Expr::Exists { collection, binding, predicate } => {
            let collection_value = eval_expr(collection, ctx, bindings)?;
            let items = collection_value
                .as_list()
                .ok_or_else(|| type_error("exists(...)", &collection_value))?;
            for item in items {
                let mut inner = bindings.clone();
                inner.insert(binding.clone(), item.clone());
                let result = eval_expr(predicate, ctx, &inner)?;
                if result.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &EvaluationContext,
    bindings: &HashMap<String, Value>,
) -> Result<Value> {
    // Short-circuit logical operators before evaluating the right side.
    if matches!(op, BinaryOp::And) {
        let lhs_value = eval_expr(lhs, ctx, bindings)?;
        if !lhs_value.is_truthy() {
            return Ok(Value::Bool(false));
        }
        let rhs_value = eval_expr(rhs, ctx, bindings)?;
        return Ok(Value::Bool(rhs_value.is_truthy()));
    }
    if matches!(op, BinaryOp::Or) {
        let lhs_value = eval_expr(lhs, ctx, bindings)?;
        if lhs_value.is_truthy() {
            return Ok(Value::Bool(true));
        }
        let rhs_value = eval_expr(rhs, ctx, bindings)?;
        return Ok(Value::Bool(rhs_value.is_truthy()));
    }

    let lhs_value = eval_expr(lhs, ctx, bindings)?;
    let rhs_value = eval_expr(rhs, ctx, bindings)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs_value, &rhs_value))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(&lhs_value, &rhs_value))),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            compare(op, &lhs_value, &rhs_value)
        }
        BinaryOp::Add => add(&lhs_value, &rhs_value),
        BinaryOp::Sub => numeric_op(&lhs_value, &rhs_value, "-", |a, b| a - b),
        BinaryOp::Mul => numeric_op(&lhs_value, &rhs_value, "*", |a, b| a * b),
        BinaryOp::Div => numeric_op(&lhs_value, &rhs_value, "/", |a, b| a / b),
        BinaryOp::In => Ok(Value::Bool(membership(&lhs_value, &rhs_value))),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn resolve_path(segments: &[String], ctx: &EvaluationContext, bindings: &HashMap<String, Value>) -> Result<Value> {
    let (head, rest) = segments.split_first().expect("parser never produces an empty path");

    if rest.is_empty() {
        if let Some(bound) = bindings.get(head) {
            return Ok(bound.clone());
        }
    }

    let mut current = if let Some(bound) = bindings.get(head) {
        bound.clone()
    } else {
        match head.as_str() {
            "principal" => Value::Map(ctx.principal.clone()),
            "resource" => Value::Map(ctx.resource.clone()),
            "request" => Value::Map(ctx.request.clone()),
            "action" => Value::String(ctx.action.clone()),
            _ => Value::Null,
        }
    };

    for segment in rest {
        current = match current {
            Value::Map(map) => map.get(segment).cloned().unwrap_or(Value::Null),
            Value::Null => Value::Null,
            other => return Err(type_error(&format!(".{segment}"), &other)),
        };
    }

    Ok(current)
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        _ => lhs == rhs,
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let (a, b) = match (lhs.as_float(), rhs.as_float()) {
        (Some(a), Some(b)) => (a, b),
        _ => match (lhs.as_str(), rhs.as_str()) {
            (Some(a), Some(b)) => {
                let ordering = a.cmp(b);
                return Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Lte => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    BinaryOp::Gte => ordering.is_ge(),
                    _ => unreachable!(),
                }));
            }
            _ => return Err(Error::PolicyTypeError(format!("{op}: incomparable operands"))),
        },
    };
    Ok(Value::Bool(match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Lte => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Gte => a >= b,
        _ => unreachable!(),
    }))
}

fn add(lhs: &Value, rhs: &Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::String(a), other) | (other, Value::String(a)) => {
            Ok(Value::String(format!("{a}{other}")))
        }
        _ => numeric_op(lhs, rhs, "+", |a, b| a + b),
    }
}

fn numeric_op(lhs: &Value, rhs: &Value, op: &str, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    match (lhs.as_float(), rhs.as_float()) {
        (Some(a), Some(b)) => {
            if matches!(lhs, Value::Int(_)) && matches!(rhs, Value::Int(_)) {
                Ok(Value::Int(f(a, b) as i64))
            } else {
                Ok(Value::Float(f(a, b)))
            }
        }
        _ => Err(Error::PolicyTypeError(format!("{op}: operands must be numeric"))),
    }
}

fn membership(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::List(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        _ => false,
    }
}

fn type_error(context: &str, value: &Value) -> Error {
    Error::PolicyTypeError(format!("{context}: unexpected operand of type {}", value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::parser::parse;

    fn ctx_with_roles(roles: &[&str]) -> EvaluationContext {
        EvaluationContext::new("read").with_principal(
            "roles",
            Value::List(roles.iter().map(|r| Value::String(r.to_string())).collect()),
        )
    }

    #[test]
    fn evaluates_role_exists_quantifier() {
        let program = parse("principal.roles.exists(r, r == \"admin\")").unwrap();
        let ctx = ctx_with_roles(&["user", "admin"]);
        assert!(eval(&program, &ctx).unwrap());
    }

    #[test]
    fn short_circuits_and_without_evaluating_rhs_errors() {
        let program = parse("false && shell_exec(\"anything\")").unwrap();
        let ctx = EvaluationContext::new("read");
        assert!(!eval(&program, &ctx).unwrap());
    }

    #[test]
    fn resource_owner_equals_principal_id() {
        let program = parse("resource.owner == principal.id").unwrap();
        let ctx = EvaluationContext::new("read")
            .with_principal("id", "u1")
            .with_resource("owner", "u1");
        assert!(eval(&program, &ctx).unwrap());
    }

    #[test]
    fn missing_path_resolves_to_null_and_is_falsy() {
        let program = parse("principal.missing == \"x\"").unwrap();
        let ctx = EvaluationContext::new("read");
        assert!(!eval(&program, &ctx).unwrap());
    }
}
