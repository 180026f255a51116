//! Verification method sub-protocols (§4.F). Each implementation advances
//! a recovery session by exactly one completed step through the shared
//! [`VerificationMethod`] trait.

pub mod codes;
pub mod contacts;
pub mod otp;
pub mod questions;
pub mod review;

pub use codes::{CodesConfig, CodesRepository, InMemoryCodesRepository, SqliteCodesRepository};
pub use contacts::{ContactsConfig, ContactsRepository, InMemoryContactsRepository, SqliteContactsRepository};
pub use otp::{InMemoryOtpRepository, OtpConfig, OtpRepository};
pub use questions::{InMemoryQuestionsRepository, QuestionsConfig, QuestionsRepository, SqliteQuestionsRepository};

use crate::audit::{AttemptLogEntry, AuditLog};
use crate::error::Result;
use crate::recovery::session::RecoverySession;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Stable tag identifying a verification method, used in `required_steps`,
/// `completed_steps`, audit records, and risk step lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodTag {
    Codes,
    SecurityQuestions,
    TrustedContact,
    Email,
    Sms,
    Video,
    Document,
}

impl MethodTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodTag::Codes => "codes",
            MethodTag::SecurityQuestions => "security_questions",
            MethodTag::TrustedContact => "trusted_contact",
            MethodTag::Email => "email",
            MethodTag::Sms => "sms",
            MethodTag::Video => "video",
            MethodTag::Document => "document",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "codes" => Some(MethodTag::Codes),
            "security_questions" => Some(MethodTag::SecurityQuestions),
            "trusted_contact" => Some(MethodTag::TrustedContact),
            "email" => Some(MethodTag::Email),
            "sms" => Some(MethodTag::Sms),
            "video" => Some(MethodTag::Video),
            "document" => Some(MethodTag::Document),
            _ => None,
        }
    }

    /// Method tags that can only be advanced by
    /// `RecoveryStateMachine::admin_complete_review_step`, never by a
    /// participant-initiated `VerificationMethod::verify` call.
    pub fn is_admin_only(&self) -> bool {
        matches!(self, MethodTag::Video | MethodTag::Document)
    }
}

impl std::fmt::Display for MethodTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input payload handed to a [`VerificationMethod`]. Each sub-protocol only
/// accepts the variant shaped for it and returns `Error::MissingField` for
/// any other.
#[derive(Debug, Clone)]
pub enum MethodInput {
    Code(String),
    Answers(HashMap<String, String>),
    ContactApproval { contact_id: String, token: String },
    OtpCode(String),
}

/// Shared contract every sub-protocol implements: validate the session is
/// still usable, perform the method-specific check, advance or penalize the
/// session, and write an attempt record.
#[async_trait]
pub trait VerificationMethod: Send + Sync {
    fn tag(&self) -> MethodTag;

    async fn verify(&self, session: &mut RecoverySession, input: MethodInput) -> Result<()>;
}

/// Common preface every `verify` implementation runs before its
/// method-specific check: reject a session that is not active.
pub(crate) fn ensure_session_active(session: &RecoverySession) -> Result<()> {
    session.ensure_active()
}

/// Shared tail: record the attempt in the audit log, swallowing write
/// failures per `audit::AuditLog`'s contract.
pub(crate) async fn log_attempt(
    audit: &Arc<dyn AuditLog>,
    session: &RecoverySession,
    tag: MethodTag,
    success: bool,
    failure_reason: Option<&str>,
) {
    let mut entry = AttemptLogEntry::new(session.id, tag.as_str(), session.current_step, success);
    if let Some(reason) = failure_reason {
        entry = entry.with_failure_reason(reason);
    }
    audit.append_attempt(entry).await;
}

/// Advance `session` on a successful step.
pub(crate) fn advance_step(session: &mut RecoverySession, tag: MethodTag) {
    session.record_step_success(tag.as_str());
}

/// Penalize `session` on a failed step attempt.
pub(crate) fn record_failure(session: &mut RecoverySession) {
    session.record_step_failure();
}
