//! # wardline-core
//!
//! The account-recovery state machine and attribute-based policy engine
//! underlying Wardline's authentication platform.
//!
//! ## Core components
//!
//! - **Recovery**: a session-scoped state machine driving a user through
//!   risk-ordered verification steps to regain access to a locked account.
//! - **Policy**: a small expression language compiled to an executable
//!   program and evaluated against a fixed principal/resource/request/action
//!   context to produce allow/deny decisions.
//! - **Attributes**: cached, pluggable attribute resolution that enriches
//!   an evaluation context with the fields a policy references but the
//!   caller didn't supply.
//! - **Risk**: a weighted-signal scorer that maps recovery-attempt signals
//!   to a band and a required-step list.
//! - **Methods**: the verification sub-protocols (recovery codes, security
//!   questions, trusted contacts, email/SMS OTP, admin-reviewed video and
//!   document) a recovery session can be stepped through.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wardline_core::{PolicyCompiler, PolicyEvaluator, EvaluationContext};
//!
//! let compiler = PolicyCompiler::default();
//! let compiled = compiler.compile(&policy)?;
//! let ctx = EvaluationContext::default().with_principal(principal);
//! let decision = evaluator.evaluate(&[compiled], &ctx).await;
//! if decision.allowed {
//!     println!("request authorized");
//! }
//! ```

pub mod attributes;
pub mod audit;
pub mod config;
pub mod error;
pub mod methods;
pub mod policy;
pub mod providers;
pub mod ratelimit;
pub mod recovery;
pub mod risk;
pub mod tenant;

pub use attributes::{
    AttributeCache, AttributeProvider, AttributeResolver, AttributeResolverConfig, CacheStats,
    ClockContextProvider, InMemoryAttributeCache,
};
pub use audit::{AttemptLogEntry, AuditHealth, AuditLog, AuditRecord, InMemoryAuditLog, SqliteAuditLog};
pub use config::{MethodConfig, WardlineConfig};
pub use error::{Error, Result};
pub use methods::{
    CodesConfig, CodesRepository, ContactsConfig, ContactsRepository, InMemoryCodesRepository,
    InMemoryContactsRepository, InMemoryOtpRepository, InMemoryQuestionsRepository, MethodInput,
    MethodTag, OtpConfig, OtpRepository, QuestionsConfig, QuestionsRepository,
    SqliteCodesRepository, SqliteContactsRepository, SqliteQuestionsRepository,
    VerificationMethod,
};
pub use policy::{
    CompiledPolicy, CompilerConfig, Decision, EvaluationContext, EvaluatorConfig, Policy,
    PolicyCompiler, PolicyEvaluator, Value, ValueMap,
};
pub use providers::{
    DocumentPort, DocumentVerificationRequest, DocumentVerificationResult,
    DocumentVerificationStatus, EmailPort, NotificationEvent, NotificationPort, ProviderHealth,
    ProviderHealthSnapshot, SmsPort, VideoPort, VideoSessionResult, VideoSessionState,
};
pub use ratelimit::{RateLimitConfig, RateLimitDecision, RateLimitRule, RateLimiter};
pub use recovery::{
    IdempotencyStore, InMemorySessionRepository, MethodInstructions, RecoverySession,
    RecoverySessionConfig, RecoverySweeper, RecoveryStateMachine, RecoveryToken, RequestContext,
    ReviewDecision, ReviewState, SessionRepository, SessionStatus, SqliteSessionRepository,
};
pub use risk::{
    RiskAssessment, RiskBand, RiskScorer, RiskScorerConfig, RiskSignals, RiskThresholds,
    StepsByBand,
};
pub use tenant::TenantScope;
