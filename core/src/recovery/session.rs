//! `RecoverySession`, the central aggregate owned by the state machine
//! (§3, §4.G). Method sub-protocols only ever mutate it through
//! `record_step_success`/`record_step_failure`.

use crate::error::{Error, Result};
use crate::risk::RiskBand;
use crate::tenant::TenantScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Expired,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Expired | SessionStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Expired => "expired",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewState {
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub decision: Option<ReviewDecision>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: String,
    pub tenant: TenantScope,

    pub required_steps: Vec<String>,
    pub completed_steps: Vec<String>,
    pub current_step: usize,
    pub method: Option<String>,

    pub attempts: u32,
    pub max_attempts: u32,

    pub risk_score: f64,
    pub risk_band: Option<RiskBand>,
    pub requires_review: bool,
    pub review: ReviewState,

    pub request: RequestContext,
    pub status: SessionStatus,
    pub version: u64,
}

impl RecoverySession {
    pub fn new(user_id: impl Into<String>, tenant: TenantScope, required_steps: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            updated_at: now,
            user_id: user_id.into(),
            tenant,
            required_steps,
            completed_steps: Vec::new(),
            current_step: 0,
            method: None,
            attempts: 0,
            max_attempts: 5,
            risk_score: 0.0,
            risk_band: None,
            requires_review: false,
            review: ReviewState::default(),
            request: RequestContext::default(),
            status: SessionStatus::Pending,
            version: 0,
        }
    }

    pub fn with_expiry(mut self, ttl: Duration) -> Self {
        self.expires_at = self.created_at + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_request_context(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Reject any further state transition on a session that is terminal,
    /// expired, or locked from exhausted attempts. Idempotent reads are not
    /// routed through this check.
    pub fn ensure_active(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(match self.status {
                SessionStatus::Expired => Error::SessionExpired,
                SessionStatus::Cancelled => Error::SessionCancelled,
                SessionStatus::Completed => Error::SessionAlreadyCompleted,
                _ => Error::SessionNotFound(self.id),
            });
        }
        if self.is_expired(Utc::now()) {
            return Err(Error::SessionExpired);
        }
        if self.attempts >= self.max_attempts {
            return Err(Error::RecoverySessionLocked);
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.required_steps.iter().all(|step| self.completed_steps.contains(step))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    /// Append `tag` to `completed_steps` (once) and bump `current_step`.
    pub fn record_step_success(&mut self, tag: &str) {
        if !self.completed_steps.contains(&tag.to_string()) {
            self.completed_steps.push(tag.to_string());
        }
        self.current_step += 1;
        self.touch();
    }

    /// Increment the session-level attempt counter after a failed step.
    pub fn record_step_failure(&mut self) {
        self.attempts += 1;
        self.touch();
    }

    pub fn transition_to(&mut self, status: SessionStatus) {
        self.status = status;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RecoverySession {
        RecoverySession::new("user1", TenantScope::app("app1"), vec!["codes".to_string(), "email".to_string()])
    }

    #[test]
    fn fresh_session_is_active_and_incomplete() {
        let session = session();
        assert!(session.ensure_active().is_ok());
        assert!(!session.is_complete());
    }

    #[test]
    fn completed_steps_covering_required_steps_marks_complete() {
        let mut session = session();
        session.record_step_success("codes");
        session.record_step_success("email");
        assert!(session.is_complete());
        assert_eq!(session.version, 2);
    }

    #[test]
    fn terminal_status_rejects_further_activity() {
        let mut session = session();
        session.transition_to(SessionStatus::Cancelled);
        let err = session.ensure_active().unwrap_err();
        assert_eq!(err.code(), "session_cancelled");
    }

    #[test]
    fn exhausted_attempts_locks_the_session() {
        let mut session = session().with_max_attempts(2);
        session.record_step_failure();
        session.record_step_failure();
        let err = session.ensure_active().unwrap_err();
        assert_eq!(err.code(), "recovery_session_locked");
    }
}
