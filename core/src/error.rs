//! Error taxonomy shared by every component.

use thiserror::Error;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The full error taxonomy. Variants are grouped by kind in the doc comments
/// below but kept flat so callers can match without nesting.
#[derive(Error, Debug)]
pub enum Error {
    // -- Input validation ---------------------------------------------
    #[error("invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("malformed session id: {0}")]
    MalformedSessionId(String),

    // -- State ----------------------------------------------------------
    #[error("recovery session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("recovery session expired")]
    SessionExpired,

    #[error("recovery session cancelled")]
    SessionCancelled,

    #[error("recovery session already completed")]
    SessionAlreadyCompleted,

    #[error("step already completed: {0}")]
    StepAlreadyCompleted(String),

    #[error("a non-terminal recovery session already exists for this user")]
    RecoverySessionInProgress,

    #[error("session update conflicted with a concurrent writer")]
    ConcurrencyConflict,

    // -- Security guard ---------------------------------------------------
    #[error("invalid verification code")]
    InvalidCode,

    #[error("too many attempts")]
    TooManyAttempts,

    #[error("recovery session is locked")]
    RecoverySessionLocked,

    #[error("insufficient correct answers: got {correct}, needed {required}")]
    InsufficientCorrectAnswers { correct: u32, required: u32 },

    #[error("high risk detected")]
    HighRiskDetected,

    #[error("admin review required before this session can complete")]
    AdminReviewRequired,

    // -- Rate / quota -----------------------------------------------------
    #[error("user hourly recovery limit exceeded")]
    UserHourlyLimitExceeded,

    #[error("user daily recovery limit exceeded")]
    UserDailyLimitExceeded,

    #[error("per-IP recovery limit exceeded")]
    IpLimitExceeded,

    #[error("per-phone limit exceeded")]
    PhoneLimitExceeded,

    #[error("cooldown still active")]
    CooldownActive,

    // -- Resource integrity ------------------------------------------------
    #[error("insufficient security questions configured: have {have}, need {need}")]
    InsufficientSecurityQuestions { have: u32, need: u32 },

    #[error("insufficient trusted contacts configured: have {have}, need {need}")]
    InsufficientTrustedContacts { have: u32, need: u32 },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("recovery code already used")]
    RecoveryCodeAlreadyUsed,

    #[error("duplicate: {0}")]
    Duplicate(String),

    // -- Provider -----------------------------------------------------------
    #[error("provider timeout: {provider}")]
    ProviderTimeout { provider: String },

    #[error("provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    #[error("provider authentication failed: {provider}")]
    ProviderAuthFailed { provider: String },

    #[error("upstream error from {provider}: {message}")]
    UpstreamError { provider: String, message: String },

    // -- Storage -----------------------------------------------------------
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("encryption/decryption failure: {0}")]
    EncryptionFailure(String),

    // -- Authorization ------------------------------------------------------
    #[error("not a member of this organization")]
    NotAMember,

    #[error("not the owner of this resource")]
    NotTheOwner,

    #[error("wrong tenant")]
    WrongTenant,

    #[error("permission denied")]
    PermissionDenied,

    // -- Configuration -------------------------------------------------------
    #[error("method not enabled: {0}")]
    MethodNotEnabled(String),

    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    // -- Policy engine -------------------------------------------------
    #[error("policy parse error at position {position}: {message}")]
    PolicyParseError {
        message: String,
        position: usize,
        snippet: String,
    },

    #[error("policy type error: {0}")]
    PolicyTypeError(String),

    #[error("policy complexity {actual} exceeds budget {max}")]
    PolicyComplexityExceeded { actual: u32, max: u32 },

    #[error("function not declared: {0}")]
    FunctionNotDeclared(String),

    #[error("evaluation timeout")]
    EvaluationTimeout,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn provider_timeout(provider: impl Into<String>) -> Self {
        Self::ProviderTimeout {
            provider: provider.into(),
        }
    }

    pub fn provider_unavailable(provider: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
        }
    }

    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn policy_parse(
        message: impl Into<String>,
        position: usize,
        snippet: impl Into<String>,
    ) -> Self {
        Self::PolicyParseError {
            message: message.into(),
            position,
            snippet: snippet.into(),
        }
    }

    pub fn complexity_exceeded(actual: u32, max: u32) -> Self {
        Self::PolicyComplexityExceeded { actual, max }
    }

    /// Stable, internal-detail-free code string for this error, suitable for
    /// clients to match on. Mirrors the variant name in snake_case.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPhoneNumber(_) => "invalid_phone_number",
            Self::MissingField(_) => "missing_field",
            Self::MalformedSessionId(_) => "malformed_session_id",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionExpired => "session_expired",
            Self::SessionCancelled => "session_cancelled",
            Self::SessionAlreadyCompleted => "session_already_completed",
            Self::StepAlreadyCompleted(_) => "step_already_completed",
            Self::RecoverySessionInProgress => "recovery_session_in_progress",
            Self::ConcurrencyConflict => "concurrency_conflict",
            Self::InvalidCode => "invalid_code",
            Self::TooManyAttempts => "too_many_attempts",
            Self::RecoverySessionLocked => "recovery_session_locked",
            Self::InsufficientCorrectAnswers { .. } => "insufficient_correct_answers",
            Self::HighRiskDetected => "high_risk_detected",
            Self::AdminReviewRequired => "admin_review_required",
            Self::UserHourlyLimitExceeded => "user_hourly_limit_exceeded",
            Self::UserDailyLimitExceeded => "user_daily_limit_exceeded",
            Self::IpLimitExceeded => "ip_limit_exceeded",
            Self::PhoneLimitExceeded => "phone_limit_exceeded",
            Self::CooldownActive => "cooldown_active",
            Self::InsufficientSecurityQuestions { .. } => "insufficient_security_questions",
            Self::InsufficientTrustedContacts { .. } => "insufficient_trusted_contacts",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::RecoveryCodeAlreadyUsed => "recovery_code_already_used",
            Self::Duplicate(_) => "duplicate",
            Self::ProviderTimeout { .. } => "provider_timeout",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProviderAuthFailed { .. } => "provider_auth_failed",
            Self::UpstreamError { .. } => "upstream_error",
            Self::Storage(_) => "storage_error",
            Self::EncryptionFailure(_) => "encryption_failure",
            Self::NotAMember => "not_a_member",
            Self::NotTheOwner => "not_the_owner",
            Self::WrongTenant => "wrong_tenant",
            Self::PermissionDenied => "permission_denied",
            Self::MethodNotEnabled(_) => "method_not_enabled",
            Self::ProviderNotConfigured(_) => "provider_not_configured",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::PolicyParseError { .. } => "policy_parse_error",
            Self::PolicyTypeError(_) => "policy_type_error",
            Self::PolicyComplexityExceeded { .. } => "policy_complexity_exceeded",
            Self::FunctionNotDeclared(_) => "function_not_declared",
            Self::EvaluationTimeout => "evaluation_timeout",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Human-readable message with no internal detail, safe to return to a
    /// caller. The full detail still reaches the audit log via `Display`.
    pub fn user_message(&self) -> String {
        match self {
            Self::Storage(_) => "a storage error occurred".to_string(),
            Self::Internal(_) => "an internal error occurred".to_string(),
            Self::EncryptionFailure(_) => "a storage error occurred".to_string(),
            other => other.to_string(),
        }
    }

    /// Full detail for the audit trail. Never returned to the caller directly.
    pub fn audit_detail(&self) -> String {
        self.to_string()
    }

    pub fn is_retryable_provider_error(&self) -> bool {
        matches!(self, Self::ProviderTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_and_snake_case() {
        assert_eq!(Error::InvalidCode.code(), "invalid_code");
    }

    #[test]
    fn storage_errors_hide_detail_from_user_message() {
        let err = Error::EncryptionFailure("key wrapping failed with reason XYZ".into());
        assert_eq!(err.user_message(), "a storage error occurred");
        assert!(err.audit_detail().contains("XYZ"));
    }

    #[test]
    fn provider_timeout_is_retryable() {
        let err = Error::provider_timeout("sms");
        assert!(err.is_retryable_provider_error());
        assert!(!Error::InvalidCode.is_retryable_provider_error());
    }
}
