//! Logging-only adapters, used by default in tests and examples. No network
//! calls are made; every dispatch is recorded via `tracing::info!`.

use crate::error::Result;
use crate::providers::ports::{
    DocumentPort, DocumentVerificationRequest, DocumentVerificationResult, DocumentVerificationStatus,
    EmailPort, NotificationEvent, NotificationPort, SmsPort, VideoPort, VideoSessionResult,
    VideoSessionState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct LoggingEmailPort;

#[async_trait]
impl EmailPort for LoggingEmailPort {
    async fn send_verification_email(&self, to: &str, code: &str, expiry: DateTime<Utc>) -> Result<()> {
        info!(to, code, %expiry, "would send verification email");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingSmsPort;

#[async_trait]
impl SmsPort for LoggingSmsPort {
    async fn send_verification_sms(&self, to: &str, code: &str, expiry: DateTime<Utc>) -> Result<()> {
        info!(to, code, %expiry, "would send verification sms");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingVideoPort;

#[async_trait]
impl VideoPort for LoggingVideoPort {
    async fn create_session(&self, user_id: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        info!(user_id, session_id = %id, "created video review session");
        Ok(id)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<VideoSessionResult> {
        Ok(VideoSessionResult {
            session_id,
            state: VideoSessionState::Created,
            reviewer_notes: None,
        })
    }

    async fn start_session(&self, session_id: Uuid) -> Result<()> {
        info!(%session_id, "started video review session");
        Ok(())
    }

    async fn complete_session(&self, session_id: Uuid, result: VideoSessionResult) -> Result<()> {
        info!(%session_id, state = ?result.state, "completed video review session");
        Ok(())
    }

    async fn cancel_session(&self, session_id: Uuid) -> Result<()> {
        info!(%session_id, "cancelled video review session");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingDocumentPort;

#[async_trait]
impl DocumentPort for LoggingDocumentPort {
    async fn verify_document(&self, req: DocumentVerificationRequest) -> Result<DocumentVerificationResult> {
        let id = Uuid::new_v4();
        info!(user_id = %req.user_id, document_type = %req.document_type, %id, "submitted document for review");
        Ok(DocumentVerificationResult { id, status: DocumentVerificationStatus::Pending })
    }

    async fn get_verification_status(&self, id: Uuid) -> Result<DocumentVerificationResult> {
        Ok(DocumentVerificationResult { id, status: DocumentVerificationStatus::Pending })
    }
}

#[derive(Debug, Default)]
pub struct LoggingNotificationPort;

#[async_trait]
impl NotificationPort for LoggingNotificationPort {
    async fn notify(&self, event: NotificationEvent<'_>) -> Result<()> {
        info!(event = ?event, "notification dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_email_port_never_errors() {
        let port = LoggingEmailPort;
        let result = port.send_verification_email("user@example.com", "123456", Utc::now()).await;
        assert!(result.is_ok());
    }
}
