//! Audit record shapes (§3 `RecoveryAttemptLog`, §4.H `AuditRecord`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

/// A single immutable audit entry: every state transition, authorization
/// decision, and provider send/receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub actor_user_id: Option<String>,
    pub action_tag: String,
    pub object_ref: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Json,
}

impl AuditRecord {
    pub fn new(action_tag: impl Into<String>, object_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            actor_user_id: None,
            action_tag: action_tag.into(),
            object_ref: object_ref.into(),
            ip: None,
            user_agent: None,
            metadata: Json::Null,
        }
    }

    pub fn with_actor(mut self, actor_user_id: impl Into<String>) -> Self {
        self.actor_user_id = Some(actor_user_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Json) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only record of a single verification attempt within a recovery
/// session (`recovery::types::RecoverySession`). Distinct from
/// `AuditRecord` in that it is specific to the method sub-protocols (§4.F)
/// and carries step-indexed bookkeeping the generic audit record does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptLogEntry {
    pub id: Uuid,
    pub session_id: Uuid,
    pub action_tag: String,
    pub method_tag: String,
    pub step_index: usize,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub ts: DateTime<Utc>,
}

impl AttemptLogEntry {
    pub fn new(session_id: Uuid, method_tag: impl Into<String>, step_index: usize, success: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            action_tag: "recovery_step_attempt".to_string(),
            method_tag: method_tag.into(),
            step_index,
            success,
            failure_reason: None,
            ip: None,
            user_agent: None,
            device_id: None,
            ts: Utc::now(),
        }
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}
