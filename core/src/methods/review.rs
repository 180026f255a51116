//! Video / document review (§4.F, Open Question #2). These steps are
//! recognised by the state machine but never advanced through
//! [`super::VerificationMethod::verify`]: the only write-back path is
//! `recovery::engine::RecoveryStateMachine::admin_complete_review_step`,
//! invoked by an operator after an out-of-band review concludes.

use crate::error::Result;
use crate::providers::{DocumentPort, DocumentVerificationRequest, DocumentVerificationResult, VideoPort, VideoSessionResult};
use std::sync::Arc;
use uuid::Uuid;

pub struct VideoReview {
    port: Arc<dyn VideoPort>,
}

impl VideoReview {
    pub fn new(port: Arc<dyn VideoPort>) -> Self {
        Self { port }
    }

    pub async fn start(&self, user_id: &str) -> Result<Uuid> {
        let session_id = self.port.create_session(user_id).await?;
        self.port.start_session(session_id).await?;
        Ok(session_id)
    }

    pub async fn status(&self, session_id: Uuid) -> Result<VideoSessionResult> {
        self.port.get_session(session_id).await
    }
}

pub struct DocumentReview {
    port: Arc<dyn DocumentPort>,
}

impl DocumentReview {
    pub fn new(port: Arc<dyn DocumentPort>) -> Self {
        Self { port }
    }

    pub async fn submit(&self, request: DocumentVerificationRequest) -> Result<DocumentVerificationResult> {
        self.port.verify_document(request).await
    }

    pub async fn status(&self, id: Uuid) -> Result<DocumentVerificationResult> {
        self.port.get_verification_status(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::noop::{LoggingDocumentPort, LoggingVideoPort};

    #[tokio::test]
    async fn video_review_starts_and_reports_status() {
        let review = VideoReview::new(Arc::new(LoggingVideoPort));
        let session_id = review.start("user1").await.unwrap();
        let status = review.status(session_id).await.unwrap();
        assert_eq!(status.session_id, session_id);
    }

    #[tokio::test]
    async fn document_review_submits_and_reports_status() {
        let review = DocumentReview::new(Arc::new(LoggingDocumentPort));
        let result = review
            .submit(DocumentVerificationRequest {
                user_id: "user1".to_string(),
                document_type: "passport".to_string(),
                document_ref: "ref123".to_string(),
            })
            .await
            .unwrap();
        let status = review.status(result.id).await.unwrap();
        assert_eq!(status.id, result.id);
    }
}
