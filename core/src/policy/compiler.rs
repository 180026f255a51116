//! Policy compiler: parse, type-check, bound complexity, emit a program.

use crate::error::{Error, Result};
use crate::policy::ast::{BinaryOp, Expr, Program, UnaryOp, ValueType};
use crate::policy::complexity;
use crate::policy::functions;
use crate::policy::parser::parse;
use crate::policy::types::{CompiledPolicy, Policy};
use futures::future::join_all;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompilerConfig {
    pub max_complexity: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self { max_complexity: 100 }
    }
}

pub struct PolicyCompiler {
    config: CompilerConfig,
}

impl PolicyCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Parse `policy.expression`, type-check it to `Bool`, bound its
    /// complexity, and return the compiled form.
    #[tracing::instrument(skip(self, policy), fields(policy_id = %policy.id))]
    pub fn compile(&self, policy: &Policy) -> Result<CompiledPolicy> {
        let program = parse(&policy.expression)?;

        let ty = infer_type(&program.root)?;
        if ty != ValueType::Bool && ty != ValueType::Dynamic {
            return Err(Error::PolicyTypeError(format!(
                "policy {} must evaluate to bool, got {ty:?}",
                policy.id
            )));
        }

        let cost = complexity::estimate(&program);
        if cost > self.config.max_complexity {
            return Err(Error::complexity_exceeded(cost, self.config.max_complexity));
        }

        Ok(CompiledPolicy {
            id: policy.id,
            priority: policy.priority,
            program,
        })
    }

    /// Compile every policy in parallel; returns whatever compiled
    /// successfully plus the first error encountered, if any.
    pub async fn compile_batch(
        &self,
        policies: &[Policy],
    ) -> (HashMap<Uuid, CompiledPolicy>, Option<Error>) {
        let futures = policies.iter().map(|policy| async move {
            let result = self.compile(policy);
            (policy.id, result)
        });

        let results = join_all(futures).await;

        let mut compiled = HashMap::new();
        let mut first_error = None;
        for (id, result) in results {
            match result {
                Ok(program) => {
                    compiled.insert(id, program);
                }
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        (compiled, first_error)
    }
}

/// Walk the AST bottom-up inferring the static type of each node. Context
/// paths and function calls that depend on runtime data resolve to
/// `Dynamic`; everything else is inferred structurally.
fn infer_type(expr: &Expr) -> Result<ValueType> {
    match expr {
        Expr::BoolLit(_) => Ok(ValueType::Bool),
        Expr::IntLit(_) => Ok(ValueType::Int),
        Expr::FloatLit(_) => Ok(ValueType::Float),
        Expr::StringLit(_) => Ok(ValueType::String),
        Expr::Path(_) => Ok(ValueType::Dynamic),
        Expr::ListLit(_) => Ok(ValueType::List),
        Expr::Unary { op, expr } => {
            let inner = infer_type(expr)?;
            match op {
                UnaryOp::Not => {
                    require_compatible(inner, ValueType::Bool, "!")?;
                    Ok(ValueType::Bool)
                }
                UnaryOp::Neg => {
                    require_numeric(inner, "-")?;
                    Ok(inner)
                }
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs_ty = infer_type(lhs)?;
            let rhs_ty = infer_type(rhs)?;
            match op {
                BinaryOp::And | BinaryOp::Or => {
                    require_compatible(lhs_ty, ValueType::Bool, op.to_string().as_str())?;
                    require_compatible(rhs_ty, ValueType::Bool, op.to_string().as_str())?;
                    Ok(ValueType::Bool)
                }
                BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::In => Ok(ValueType::Bool),
                BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                    Ok(ValueType::Bool)
                }
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                    if lhs_ty == ValueType::String || rhs_ty == ValueType::String {
                        Ok(ValueType::String)
                    } else {
                        Ok(ValueType::Dynamic)
                    }
                }
            }
        }
        Expr::Call { name, args } => {
            if !functions::is_declared(name) {
                return Err(Error::FunctionNotDeclared(name.clone()));
            }
            for arg in args {
                infer_type(arg)?;
            }
            match name.as_str() {
                "days_since" | "hours_since" => Ok(ValueType::Int),
                _ => Ok(ValueType::Bool),
            }
        }
        Expr::Exists { collection, predicate, .. } => {
            infer_type(collection)?;
            let predicate_ty = infer_type(predicate)?;
            require_compatible(predicate_ty, ValueType::Bool, "exists(...)")?;
            Ok(ValueType::Bool)
        }
    }
}

fn require_compatible(actual: ValueType, expected: ValueType, context: &str) -> Result<()> {
    if actual == expected || actual == ValueType::Dynamic {
        Ok(())
    } else {
        Err(Error::PolicyTypeError(format!(
            "{context}: expected {expected:?}, got {actual:?}"
        )))
    }
}

fn require_numeric(actual: ValueType, context: &str) -> Result<()> {
    match actual {
        ValueType::Int | ValueType::Float | ValueType::Dynamic => Ok(()),
        other => Err(Error::PolicyTypeError(format!(
            "{context}: expected a numeric type, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::TenantScope;

    fn policy(expression: &str, priority: i64) -> Policy {
        Policy {
            id: Uuid::new_v4(),
            scope: TenantScope::app("app1"),
            namespace_id: "default".into(),
            name: "test".into(),
            description: String::new(),
            expression: expression.to_string(),
            resource_type: "document".into(),
            allowed_actions: vec!["read".into()],
            priority,
            version: 1,
            enabled: true,
        }
    }

    #[test]
    fn compiles_boolean_expression() {
        let compiler = PolicyCompiler::new(CompilerConfig::default());
        let compiled = compiler.compile(&policy("has_role(\"admin\")", 10)).unwrap();
        assert_eq!(compiled.priority, 10);
    }

    #[test]
    fn rejects_non_boolean_top_level_expression() {
        let compiler = PolicyCompiler::new(CompilerConfig::default());
        let err = compiler.compile(&policy("1 + 2", 10)).unwrap_err();
        assert!(matches!(err, Error::PolicyTypeError(_)));
    }

    #[test]
    fn rejects_expression_over_complexity_budget() {
        let compiler = PolicyCompiler::new(CompilerConfig { max_complexity: 1 });
        let err = compiler
            .compile(&policy("principal.active && resource.confidential", 10))
            .unwrap_err();
        assert!(matches!(err, Error::PolicyComplexityExceeded { .. }));
    }

    #[test]
    fn rejects_undeclared_function() {
        let compiler = PolicyCompiler::new(CompilerConfig::default());
        let err = compiler.compile(&policy("shell_exec(\"rm\")", 10)).unwrap_err();
        assert!(matches!(err, Error::FunctionNotDeclared(_)));
    }

    #[tokio::test]
    async fn compile_batch_returns_partial_results_and_first_error() {
        let compiler = PolicyCompiler::new(CompilerConfig::default());
        let good = policy("true", 10);
        let bad = policy("shell_exec()", 5);
        let (compiled, error) = compiler.compile_batch(&[good.clone(), bad]).await;
        assert!(compiled.contains_key(&good.id));
        assert!(error.is_some());
    }
}
