//! Background expiry sweep (§4.G). A single Tokio task per process ticks
//! on `sweep_interval` and advances non-terminal, past-deadline sessions to
//! `Expired`, observing a `tokio::sync::watch` channel for shutdown.

use crate::audit::{AuditLog, AuditRecord};
use crate::recovery::repository::SessionRepository;
use crate::recovery::session::SessionStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct RecoverySweeper {
    repository: Arc<dyn SessionRepository>,
    audit: Arc<dyn AuditLog>,
    interval: Duration,
}

impl RecoverySweeper {
    pub fn new(repository: Arc<dyn SessionRepository>, audit: Arc<dyn AuditLog>, interval: Duration) -> Self {
        Self { repository, audit, interval }
    }

    /// Run one sweep pass, returning the number of sessions expired.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> usize {
        let now = chrono::Utc::now();
        let expired = match self.repository.find_expired(now).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %err, "sweep: failed to list expired sessions");
                return 0;
            }
        };

        let mut swept = 0;
        for mut session in expired {
            let version = session.version;
            session.transition_to(SessionStatus::Expired);
            let session_id = session.id;
            if let Err(err) = self.repository.update(session, version).await {
                warn!(%session_id, error = %err, "sweep: failed to expire session");
                continue;
            }
            self.audit
                .append(AuditRecord::new("session_expired", format!("session:{session_id}")))
                .await;
            swept += 1;
        }
        if swept > 0 {
            info!(swept, "sweep: expired stale recovery sessions");
        }
        swept
    }

    /// Run the sweep loop until `shutdown` is set to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("sweep: shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::recovery::repository::InMemorySessionRepository;
    use crate::recovery::session::RecoverySession;
    use crate::tenant::TenantScope;

    #[tokio::test]
    async fn sweep_expires_past_deadline_sessions_only() {
        let repo = Arc::new(InMemorySessionRepository::new());
        let audit = Arc::new(InMemoryAuditLog::new());

        let mut expired_session = RecoverySession::new("u1", TenantScope::app("app1"), vec!["codes".to_string()]);
        expired_session.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        repo.create(expired_session).await.unwrap();

        let fresh_session = RecoverySession::new("u2", TenantScope::app("app1"), vec!["codes".to_string()]);
        repo.create(fresh_session.clone()).await.unwrap();

        let sweeper = RecoverySweeper::new(repo.clone(), audit.clone(), Duration::from_secs(3600));
        let swept = sweeper.sweep_once().await;
        assert_eq!(swept, 1);

        let still_fresh = repo.get(fresh_session.id).await.unwrap();
        assert_eq!(still_fresh.status, SessionStatus::Pending);
        assert_eq!(audit.records().len(), 1);
    }
}
