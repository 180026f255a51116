//! `RecoveryStateMachine` (§4.G): owns session lifecycle, consults the
//! rate limiter (D) and risk scorer (E) on `start`, dispatches to method
//! sub-protocols (F) on `verify_step`, and issues the recovery token on
//! `complete`.

use crate::audit::{AuditLog, AuditRecord};
use crate::error::{Error, Result};
use crate::methods::{MethodInput, MethodTag, VerificationMethod};
use crate::providers::{NotificationEvent, NotificationPort};
use crate::ratelimit::{keys, RateLimitRule, RateLimiter};
use crate::recovery::idempotency::IdempotencyStore;
use crate::recovery::repository::SessionRepository;
use crate::recovery::session::{RecoverySession, RequestContext, ReviewDecision, SessionStatus};
use crate::recovery::types::{MethodInstructions, RecoverySessionConfig, RecoveryToken};
use crate::risk::{RiskScorer, RiskSignals};
use crate::tenant::TenantScope;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct RecoveryStateMachine {
    repository: Arc<dyn SessionRepository>,
    rate_limiter: Arc<RateLimiter>,
    risk_scorer: Arc<RiskScorer>,
    audit: Arc<dyn AuditLog>,
    notification: Arc<dyn NotificationPort>,
    methods: HashMap<MethodTag, Arc<dyn VerificationMethod>>,
    idempotency: Arc<IdempotencyStore>,
    config: RecoverySessionConfig,
    user_rate_limit: RateLimitRule,
    user_daily_rate_limit: RateLimitRule,
    ip_rate_limit: RateLimitRule,
}

impl RecoveryStateMachine {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        rate_limiter: Arc<RateLimiter>,
        risk_scorer: Arc<RiskScorer>,
        audit: Arc<dyn AuditLog>,
        notification: Arc<dyn NotificationPort>,
        config: RecoverySessionConfig,
    ) -> Self {
        Self {
            repository,
            rate_limiter,
            risk_scorer,
            audit,
            notification,
            methods: HashMap::new(),
            idempotency: Arc::new(IdempotencyStore::new(config.idempotency_window)),
            user_rate_limit: RateLimitRule::new(5, std::time::Duration::from_secs(3600)),
            user_daily_rate_limit: RateLimitRule::new(10, std::time::Duration::from_secs(86400)),
            ip_rate_limit: RateLimitRule::new(20, std::time::Duration::from_secs(3600)),
            config,
        }
    }

    pub fn with_user_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.user_rate_limit = rule;
        self
    }

    pub fn with_user_daily_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.user_daily_rate_limit = rule;
        self
    }

    pub fn with_ip_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.ip_rate_limit = rule;
        self
    }

    pub fn register_method(&mut self, method: Arc<dyn VerificationMethod>) {
        self.methods.insert(method.tag(), method);
    }

    #[tracing::instrument(skip(self, signals, request), fields(%user_id))]
    pub async fn start(
        &self,
        user_id: &str,
        tenant: TenantScope,
        request: RequestContext,
        signals: RiskSignals,
    ) -> Result<RecoverySession> {
        if self.repository.find_active_for_user(user_id, &tenant).await?.is_some() {
            return Err(Error::RecoverySessionInProgress);
        }

        let user_key = keys::recovery_user_key(&tenant.app_id, user_id);
        if !self.rate_limiter.check(&user_key, &self.user_rate_limit).await.allowed {
            return Err(Error::UserHourlyLimitExceeded);
        }
        let user_daily_key = keys::recovery_user_daily_key(&tenant.app_id, user_id);
        if !self.rate_limiter.check(&user_daily_key, &self.user_daily_rate_limit).await.allowed {
            return Err(Error::UserDailyLimitExceeded);
        }
        if let Some(ip) = &request.ip {
            let ip_key = keys::recovery_ip_key(&tenant.app_id, ip);
            if !self.rate_limiter.check(&ip_key, &self.ip_rate_limit).await.allowed {
                return Err(Error::IpLimitExceeded);
            }
        }

        let assessment = self.risk_scorer.assess(&signals);
        let mut session = RecoverySession::new(user_id, tenant, assessment.required_steps.clone())
            .with_expiry(self.config.session_ttl)
            .with_max_attempts(self.config.max_attempts)
            .with_request_context(request);
        session.risk_score = assessment.score;
        session.risk_band = Some(assessment.band);
        session.requires_review = assessment.requires_review;
        session.transition_to(SessionStatus::Pending);

        self.repository.create(session.clone()).await?;
        self.audit
            .append(
                AuditRecord::new("recovery_started", format!("session:{}", session.id))
                    .with_actor(user_id)
                    .with_metadata(serde_json::json!({ "risk_score": assessment.score, "band": assessment.band.to_string() })),
            )
            .await;
        let _ = self
            .notification
            .notify(NotificationEvent::RecoveryStarted { user_id, session_id: session.id })
            .await;

        tracing::info!(session_id = %session.id, risk_score = assessment.score, "recovery session started");
        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    pub async fn continue_session(&self, session_id: Uuid, method: MethodTag) -> Result<MethodInstructions> {
        let mut session = self.repository.get(session_id).await?;
        session.ensure_active()?;
        if !session.required_steps.contains(&method.as_str().to_string()) {
            return Err(Error::MethodNotEnabled(method.as_str().to_string()));
        }
        let version = session.version;
        session.method = Some(method.as_str().to_string());
        if session.status == SessionStatus::Pending {
            session.transition_to(SessionStatus::InProgress);
        }
        let step_index = session.current_step;
        self.repository.update(session, version).await?;

        Ok(MethodInstructions {
            method: method.as_str().to_string(),
            step_index,
            message: format!("submit verification for step '{method}'"),
        })
    }

    #[tracing::instrument(skip(self, input))]
    pub async fn verify_step(&self, session_id: Uuid, tag: MethodTag, input: MethodInput) -> Result<RecoverySession> {
        if tag.is_admin_only() {
            return Err(Error::MethodNotEnabled(tag.as_str().to_string()));
        }
        let method = self
            .methods
            .get(&tag)
            .ok_or_else(|| Error::MethodNotEnabled(tag.as_str().to_string()))?
            .clone();

        let mut session = self.repository.get(session_id).await?;
        let original_version = session.version;
        let verify_result = method.verify(&mut session, input).await;
        self.repository.update(session.clone(), original_version).await?;
        verify_result?;
        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, session_id: Uuid, request_id: &str) -> Result<RecoveryToken> {
        if let Some(cached) = self.idempotency.get(session_id, request_id) {
            if let Ok(token) = serde_json::from_value::<RecoveryToken>(cached) {
                return Ok(token);
            }
        }

        let mut session = self.repository.get(session_id).await?;
        session.ensure_active()?;
        if !session.is_complete() {
            return Err(Error::StepAlreadyCompleted("required steps not yet satisfied".to_string()));
        }
        if session.requires_review && session.review.decision != Some(ReviewDecision::Approved) {
            return Err(Error::AdminReviewRequired);
        }

        let version = session.version;
        let mut token_bytes = vec![0u8; self.config.recovery_token_bytes.max(16)];
        OsRng.fill_bytes(&mut token_bytes);
        let token = RecoveryToken {
            token: URL_SAFE_NO_PAD.encode(&token_bytes),
            session_id,
            expires_at: chrono::Utc::now() + chrono::Duration::minutes(15),
        };

        session.transition_to(SessionStatus::Completed);
        self.repository.update(session.clone(), version).await?;
        self.audit
            .append(AuditRecord::new("recovery_completed", format!("session:{session_id}")).with_actor(&session.user_id))
            .await;
        let _ = self
            .notification
            .notify(NotificationEvent::RecoveryCompleted { user_id: &session.user_id, session_id })
            .await;

        self.idempotency.record(session_id, request_id, serde_json::to_value(&token).unwrap_or(serde_json::Value::Null));
        Ok(token)
    }

    /// `Cancel(Cancel(s))` returns the same terminal state with no
    /// additional audit record.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, session_id: Uuid, reason: Option<String>) -> Result<RecoverySession> {
        let mut session = self.repository.get(session_id).await?;
        if session.status.is_terminal() {
            return Ok(session);
        }
        let version = session.version;
        session.review.notes = reason.or(session.review.notes.clone());
        session.transition_to(SessionStatus::Cancelled);
        self.repository.update(session.clone(), version).await?;
        self.audit
            .append(AuditRecord::new("recovery_cancelled", format!("session:{session_id}")).with_actor(&session.user_id))
            .await;
        Ok(session)
    }

    #[tracing::instrument(skip(self, notes))]
    pub async fn approve(&self, session_id: Uuid, reviewer: &str, notes: Option<String>) -> Result<RecoverySession> {
        let mut session = self.repository.get(session_id).await?;
        session.ensure_active()?;
        let version = session.version;
        session.review.decision = Some(ReviewDecision::Approved);
        session.review.reviewed_by = Some(reviewer.to_string());
        session.review.reviewed_at = Some(chrono::Utc::now());
        session.review.notes = notes;
        session.transition_to(session.status);
        self.repository.update(session.clone(), version).await?;
        self.audit
            .append(AuditRecord::new("recovery_review_approved", format!("session:{session_id}")).with_actor(reviewer))
            .await;
        Ok(session)
    }

    #[tracing::instrument(skip(self, reason))]
    pub async fn reject(&self, session_id: Uuid, reviewer: &str, reason: String) -> Result<RecoverySession> {
        let mut session = self.repository.get(session_id).await?;
        session.ensure_active()?;
        let version = session.version;
        session.review.decision = Some(ReviewDecision::Rejected);
        session.review.reviewed_by = Some(reviewer.to_string());
        session.review.reviewed_at = Some(chrono::Utc::now());
        session.review.notes = Some(reason.clone());
        session.transition_to(SessionStatus::Failed);
        self.repository.update(session.clone(), version).await?;
        self.audit
            .append(
                AuditRecord::new("recovery_review_rejected", format!("session:{session_id}"))
                    .with_actor(reviewer)
                    .with_metadata(serde_json::json!({ "reason": reason })),
            )
            .await;
        let _ = self
            .notification
            .notify(NotificationEvent::RecoveryFailed { user_id: &session.user_id, session_id, reason: "admin_rejected" })
            .await;
        Ok(session)
    }

    /// The only write-back path for `MethodTag::Video`/`MethodTag::Document`
    /// (Open Question #2, SPEC_FULL.md §9): an operator appends the tag
    /// after an out-of-band review concludes.
    #[tracing::instrument(skip(self))]
    pub async fn admin_complete_review_step(&self, session_id: Uuid, tag: MethodTag, reviewer: &str) -> Result<RecoverySession> {
        if !tag.is_admin_only() {
            return Err(Error::MethodNotEnabled(tag.as_str().to_string()));
        }
        let mut session = self.repository.get(session_id).await?;
        session.ensure_active()?;
        let version = session.version;
        session.record_step_success(tag.as_str());
        self.repository.update(session.clone(), version).await?;
        self.audit
            .append(
                AuditRecord::new("recovery_admin_step_completed", format!("session:{session_id}"))
                    .with_actor(reviewer)
                    .with_metadata(serde_json::json!({ "method": tag.as_str() })),
            )
            .await;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::methods::codes::{CodesConfig, InMemoryCodesRepository, RecoveryCodesMethod};
    use crate::providers::noop::LoggingNotificationPort;
    use crate::ratelimit::{InMemoryRateLimitStore, LockoutConfig};
    use crate::recovery::repository::InMemorySessionRepository;
    use crate::risk::RiskScorerConfig;

    fn machine() -> (RecoveryStateMachine, Arc<InMemoryCodesRepository>, Arc<InMemoryAuditLog>) {
        let repository = Arc::new(InMemorySessionRepository::new());
        let rate_limiter = Arc::new(RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()), LockoutConfig::default()));
        let risk_scorer = Arc::new(RiskScorer::new(RiskScorerConfig {
            minimum_steps: 1,
            steps_by_band: crate::risk::StepsByBand {
                low: vec!["codes".to_string()],
                medium: vec!["codes".to_string()],
                high: vec!["codes".to_string()],
            },
            ..RiskScorerConfig::default()
        }));
        let audit = Arc::new(InMemoryAuditLog::new());
        let notification = Arc::new(LoggingNotificationPort);
        let codes_repo = Arc::new(InMemoryCodesRepository::new());
        let mut machine = RecoveryStateMachine::new(
            repository,
            rate_limiter,
            risk_scorer,
            audit.clone(),
            notification,
            RecoverySessionConfig::default(),
        );
        let codes_method = Arc::new(RecoveryCodesMethod::new(codes_repo.clone(), audit.clone()));
        machine.register_method(codes_method);
        (machine, codes_repo, audit)
    }

    /// Same as `machine()` but the risk scorer always sets `requires_review`,
    /// modelling a high-risk assessment (scenario #2, SPEC_FULL.md §8).
    fn machine_with_review() -> (RecoveryStateMachine, Arc<InMemoryCodesRepository>, Arc<InMemoryAuditLog>) {
        let repository = Arc::new(InMemorySessionRepository::new());
        let rate_limiter = Arc::new(RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()), LockoutConfig::default()));
        let risk_scorer = Arc::new(RiskScorer::new(RiskScorerConfig {
            minimum_steps: 1,
            steps_by_band: crate::risk::StepsByBand {
                low: vec!["codes".to_string()],
                medium: vec!["codes".to_string()],
                high: vec!["codes".to_string()],
            },
            require_review_above: -1.0,
            ..RiskScorerConfig::default()
        }));
        let audit = Arc::new(InMemoryAuditLog::new());
        let notification = Arc::new(LoggingNotificationPort);
        let codes_repo = Arc::new(InMemoryCodesRepository::new());
        let mut machine = RecoveryStateMachine::new(
            repository,
            rate_limiter,
            risk_scorer,
            audit.clone(),
            notification,
            RecoverySessionConfig::default(),
        );
        let codes_method = Arc::new(RecoveryCodesMethod::new(codes_repo.clone(), audit.clone()));
        machine.register_method(codes_method);
        (machine, codes_repo, audit)
    }

    #[tokio::test]
    async fn start_then_verify_then_complete_happy_path() {
        let (machine, codes_repo, _audit) = machine();
        let session = machine
            .start("user1", TenantScope::app("app1"), RequestContext::default(), RiskSignals::default())
            .await
            .unwrap();
        assert_eq!(session.required_steps, vec!["codes".to_string()]);

        let codes = codes_repo.as_ref();
        let codes_method = RecoveryCodesMethod::new(codes_repo.clone(), Arc::new(InMemoryAuditLog::new()));
        let issued = codes_method.setup(&session.user_id, &CodesConfig::default()).await.unwrap();
        let _ = codes;

        machine.continue_session(session.id, MethodTag::Codes).await.unwrap();
        let verified = machine
            .verify_step(session.id, MethodTag::Codes, MethodInput::Code(issued[0].clone()))
            .await
            .unwrap();
        assert!(verified.completed_steps.contains(&"codes".to_string()));

        let token = machine.complete(session.id, "req-1").await.unwrap();
        assert_eq!(token.session_id, session.id);
    }

    #[tokio::test]
    async fn a_second_start_for_the_same_user_is_rejected() {
        let (machine, _codes_repo, _audit) = machine();
        machine
            .start("user1", TenantScope::app("app1"), RequestContext::default(), RiskSignals::default())
            .await
            .unwrap();
        let err = machine
            .start("user1", TenantScope::app("app1"), RequestContext::default(), RiskSignals::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "recovery_session_in_progress");
    }

    #[tokio::test]
    async fn cancelling_twice_returns_the_same_terminal_state_without_new_audit() {
        let (machine, _codes_repo, audit) = machine();
        let session = machine
            .start("user1", TenantScope::app("app1"), RequestContext::default(), RiskSignals::default())
            .await
            .unwrap();
        machine.cancel(session.id, None).await.unwrap();
        let after_first = audit.records().len();
        machine.cancel(session.id, None).await.unwrap();
        assert_eq!(audit.records().len(), after_first);
    }

    #[tokio::test]
    async fn admin_only_methods_cannot_be_verified_directly() {
        let (machine, _codes_repo, _audit) = machine();
        let session = machine
            .start("user1", TenantScope::app("app1"), RequestContext::default(), RiskSignals::default())
            .await
            .unwrap();
        let err = machine
            .verify_step(session.id, MethodTag::Video, MethodInput::Code("x".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "method_not_enabled");
    }

    /// Scenario #2 (SPEC_FULL.md §8): a high-risk session requires admin
    /// review; `complete` blocks until `approve` is recorded, then succeeds.
    #[tokio::test]
    async fn high_risk_session_requires_admin_approval_before_completing() {
        let (machine, codes_repo, _audit) = machine_with_review();
        let session = machine
            .start("user1", TenantScope::app("app1"), RequestContext::default(), RiskSignals::default())
            .await
            .unwrap();
        assert!(session.requires_review);

        let codes_method = RecoveryCodesMethod::new(codes_repo.clone(), Arc::new(InMemoryAuditLog::new()));
        let issued = codes_method.setup(&session.user_id, &CodesConfig::default()).await.unwrap();
        machine.continue_session(session.id, MethodTag::Codes).await.unwrap();
        machine
            .verify_step(session.id, MethodTag::Codes, MethodInput::Code(issued[0].clone()))
            .await
            .unwrap();

        let err = machine.complete(session.id, "req-1").await.unwrap_err();
        assert_eq!(err.code(), "admin_review_required");

        machine.approve(session.id, "admin1", Some("looks fine".to_string())).await.unwrap();
        let token = machine.complete(session.id, "req-2").await.unwrap();
        assert_eq!(token.session_id, session.id);
    }

    /// Scenario #3 (SPEC_FULL.md §8): exhausting `max_attempts` locks the
    /// session; the next verify call is rejected without advancing state.
    #[tokio::test]
    async fn exhausting_attempts_locks_the_session() {
        let (machine, codes_repo, _audit) = machine();
        let session = machine
            .start("user1", TenantScope::app("app1"), RequestContext::default(), RiskSignals::default())
            .await
            .unwrap();
        machine.continue_session(session.id, MethodTag::Codes).await.unwrap();
        // Issue codes so the repository is non-empty, then submit a code
        // that was never issued `max_attempts` times.
        let codes_method = RecoveryCodesMethod::new(codes_repo.clone(), Arc::new(InMemoryAuditLog::new()));
        codes_method.setup(&session.user_id, &CodesConfig::default()).await.unwrap();

        for _ in 0..5 {
            let err = machine
                .verify_step(session.id, MethodTag::Codes, MethodInput::Code("not-issued".to_string()))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "invalid_code");
        }

        let err = machine
            .verify_step(session.id, MethodTag::Codes, MethodInput::Code("not-issued".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "recovery_session_locked");
    }

    #[tokio::test]
    async fn daily_user_limit_is_enforced_independently_of_the_hourly_limit() {
        let repository = Arc::new(InMemorySessionRepository::new());
        let rate_limiter = Arc::new(RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()), LockoutConfig::default()));
        let risk_scorer = Arc::new(RiskScorer::new(RiskScorerConfig {
            minimum_steps: 1,
            steps_by_band: crate::risk::StepsByBand {
                low: vec!["codes".to_string()],
                medium: vec!["codes".to_string()],
                high: vec!["codes".to_string()],
            },
            ..RiskScorerConfig::default()
        }));
        let audit = Arc::new(InMemoryAuditLog::new());
        let notification = Arc::new(LoggingNotificationPort);
        let machine = RecoveryStateMachine::new(
            repository,
            rate_limiter,
            risk_scorer,
            audit,
            notification,
            RecoverySessionConfig::default(),
        )
        .with_user_rate_limit(RateLimitRule::new(100, std::time::Duration::from_secs(3600)))
        .with_user_daily_rate_limit(RateLimitRule::new(1, std::time::Duration::from_secs(86400)));

        let first = machine
            .start("user1", TenantScope::app("app1"), RequestContext::default(), RiskSignals::default())
            .await
            .unwrap();
        machine.cancel(first.id, None).await.unwrap();

        let err = machine
            .start("user1", TenantScope::app("app1"), RequestContext::default(), RiskSignals::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "user_daily_limit_exceeded");
    }
}
