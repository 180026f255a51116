//! Data types shared by the policy compiler and evaluator.

use crate::policy::ast::Program;
use crate::policy::value::{Value, ValueMap};
use crate::tenant::TenantScope;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// A policy as owned by the (out-of-scope) policy-admin API and consumed
/// read-only by the evaluator.
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: Uuid,
    pub scope: TenantScope,
    pub namespace_id: String,
    pub name: String,
    pub description: String,
    pub expression: String,
    pub resource_type: String,
    pub allowed_actions: Vec<String>,
    pub priority: i64,
    pub version: u32,
    pub enabled: bool,
}

/// A compiled, executable policy. Opaque to callers beyond `id`/`priority`.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub id: Uuid,
    pub priority: i64,
    pub program: Program,
}

/// The four-namespace map passed to a compiled policy.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub principal: ValueMap,
    pub resource: ValueMap,
    pub request: ValueMap,
    pub action: String,
}

impl EvaluationContext {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            principal: ValueMap::new(),
            resource: ValueMap::new(),
            request: ValueMap::new(),
            action: action.into(),
        }
    }

    pub fn with_principal(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.principal.insert(key.into(), value.into());
        self
    }

    pub fn with_resource(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.resource.insert(key.into(), value.into());
        self
    }

    pub fn with_request(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request.insert(key.into(), value.into());
        self
    }

    pub fn namespace(&self, name: &str) -> Option<&ValueMap> {
        match name {
            "principal" => Some(&self.principal),
            "resource" => Some(&self.resource),
            "request" => Some(&self.request),
            _ => None,
        }
    }

    pub fn principal_value(&self) -> Value {
        Value::Map(self.principal.clone())
    }

    pub fn request_value(&self) -> Value {
        Value::Map(self.request.clone())
    }
}

/// The outcome of evaluating a set of policies against a context.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub matched_policies: Vec<Uuid>,
    pub evaluated_policies: usize,
    pub evaluation_time: Duration,
    pub error: Option<String>,
}

impl Decision {
    pub fn deny(evaluated_policies: usize, evaluation_time: Duration) -> Self {
        Self {
            allowed: false,
            matched_policies: Vec::new(),
            evaluated_policies,
            evaluation_time,
            error: None,
        }
    }

    pub fn timeout(evaluated_policies: usize, evaluation_time: Duration) -> Self {
        Self {
            allowed: false,
            matched_policies: Vec::new(),
            evaluated_policies,
            evaluation_time,
            error: Some("evaluation timeout".to_string()),
        }
    }

    pub fn allow(policy_id: Uuid, evaluated_policies: usize, evaluation_time: Duration) -> Self {
        Self {
            allowed: true,
            matched_policies: vec![policy_id],
            evaluated_policies,
            evaluation_time,
            error: None,
        }
    }
}

/// `created_at` is exposed for cache-entry bookkeeping in `attributes::cache`.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
