//! Port traits the recovery and method sub-protocols depend on. Out of
//! scope: concrete SMS/email/video/document providers — only these
//! interfaces are specified, per §1.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait EmailPort: Send + Sync {
    async fn send_verification_email(&self, to: &str, code: &str, expiry: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait SmsPort: Send + Sync {
    async fn send_verification_sms(&self, to: &str, code: &str, expiry: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSessionState {
    Created,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct VideoSessionResult {
    pub session_id: Uuid,
    pub state: VideoSessionState,
    pub reviewer_notes: Option<String>,
}

#[async_trait]
pub trait VideoPort: Send + Sync {
    async fn create_session(&self, user_id: &str) -> Result<Uuid>;
    async fn get_session(&self, session_id: Uuid) -> Result<VideoSessionResult>;
    async fn start_session(&self, session_id: Uuid) -> Result<()>;
    async fn complete_session(&self, session_id: Uuid, result: VideoSessionResult) -> Result<()>;
    async fn cancel_session(&self, session_id: Uuid) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DocumentVerificationRequest {
    pub user_id: String,
    pub document_type: String,
    pub document_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentVerificationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct DocumentVerificationResult {
    pub id: Uuid,
    pub status: DocumentVerificationStatus,
}

#[async_trait]
pub trait DocumentPort: Send + Sync {
    async fn verify_document(&self, req: DocumentVerificationRequest) -> Result<DocumentVerificationResult>;
    async fn get_verification_status(&self, id: Uuid) -> Result<DocumentVerificationResult>;
}

/// Recovery lifecycle events the notification port is asked to deliver.
/// Out of scope per §1: the notification plugin and identity-provider
/// adapters themselves; only this trait is specified.
#[derive(Debug, Clone)]
pub enum NotificationEvent<'a> {
    RecoveryStarted { user_id: &'a str, session_id: Uuid },
    RecoveryCompleted { user_id: &'a str, session_id: Uuid },
    RecoveryFailed { user_id: &'a str, session_id: Uuid, reason: &'a str },
    AdminReviewRequired { user_id: &'a str, session_id: Uuid },
    HighRiskDetected { user_id: &'a str, session_id: Uuid, risk_score: u8 },
    TrustedContactApprovalRequested {
        contact_destination: &'a str,
        session_id: Uuid,
        token: &'a str,
    },
}

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, event: NotificationEvent<'_>) -> Result<()>;
}
