//! Session storage: an async trait plus in-memory and SQLite reference
//! implementations, following the same split as `ratelimit::store` and
//! `audit`.

use crate::error::{Error, Result};
use crate::recovery::session::{RecoverySession, SessionStatus};
use crate::tenant::TenantScope;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: RecoverySession) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<RecoverySession>;

    /// Compare-and-swap update: fails with `Error::ConcurrencyConflict` if
    /// the stored session's `version` no longer matches `expected_version`.
    async fn update(&self, session: RecoverySession, expected_version: u64) -> Result<()>;

    /// The non-terminal session for `(user_id, tenant)`, if any — used by
    /// `start` to enforce "no other non-terminal session for this user".
    async fn find_active_for_user(&self, user_id: &str, tenant: &TenantScope) -> Result<Option<RecoverySession>>;

    /// All non-terminal sessions with `expires_at <= now`, for the sweeper.
    async fn find_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<RecoverySession>>;
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<Uuid, RecoverySession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, session: RecoverySession) -> Result<()> {
        self.sessions.write().expect("session repository lock poisoned").insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<RecoverySession> {
        self.sessions
            .read()
            .expect("session repository lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(Error::SessionNotFound(id))
    }

    async fn update(&self, session: RecoverySession, expected_version: u64) -> Result<()> {
        let mut sessions = self.sessions.write().expect("session repository lock poisoned");
        match sessions.get(&session.id) {
            Some(existing) if existing.version != expected_version => Err(Error::ConcurrencyConflict),
            Some(_) => {
                sessions.insert(session.id, session);
                Ok(())
            }
            None => Err(Error::SessionNotFound(session.id)),
        }
    }

    async fn find_active_for_user(&self, user_id: &str, tenant: &TenantScope) -> Result<Option<RecoverySession>> {
        let sessions = self.sessions.read().expect("session repository lock poisoned");
        Ok(sessions
            .values()
            .find(|s| s.user_id == user_id && &s.tenant == tenant && s.status.is_active())
            .cloned())
    }

    async fn find_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<RecoverySession>> {
        let sessions = self.sessions.read().expect("session repository lock poisoned");
        Ok(sessions
            .values()
            .filter(|s| s.status.is_active() && s.is_expired(now))
            .cloned()
            .collect())
    }
}

/// SQLite-backed session store. The session row is kept as a JSON blob
/// (`recovery::session::RecoverySession` round-trips through `serde_json`)
/// alongside a handful of indexed columns used by the lookup queries, the
/// same shape `audit::sqlite` uses for its metadata column.
pub struct SqliteSessionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS recovery_session (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                app_id TEXT NOT NULL,
                user_organization_id TEXT,
                status TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS recovery_session_active_by_user
                ON recovery_session (user_id, app_id, user_organization_id, status);",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().expect("session repository connection lock poisoned");
        Ok(f(&conn)?)
    }

    fn row_to_session(body: String) -> Result<RecoverySession> {
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create(&self, session: RecoverySession) -> Result<()> {
        let body = serde_json::to_string(&session)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO recovery_session
                 (id, user_id, app_id, user_organization_id, status, expires_at, version, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.id.to_string(),
                    session.user_id,
                    session.tenant.app_id,
                    session.tenant.user_organization_id,
                    session.status.to_string(),
                    session.expires_at.to_rfc3339(),
                    session.version as i64,
                    body,
                ],
            )
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<RecoverySession> {
        let body: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT body FROM recovery_session WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
        })?;
        match body {
            Some(body) => Self::row_to_session(body),
            None => Err(Error::SessionNotFound(id)),
        }
    }

    async fn update(&self, session: RecoverySession, expected_version: u64) -> Result<()> {
        let body = serde_json::to_string(&session)?;
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE recovery_session
                 SET status = ?1, expires_at = ?2, version = ?3, body = ?4
                 WHERE id = ?5 AND version = ?6",
                params![
                    session.status.to_string(),
                    session.expires_at.to_rfc3339(),
                    session.version as i64,
                    body,
                    session.id.to_string(),
                    expected_version as i64,
                ],
            )
        })?;
        if updated == 1 {
            return Ok(());
        }
        // Distinguish "no such session" from "version mismatch" for the caller.
        let exists: bool = self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM recovery_session WHERE id = ?1",
                params![session.id.to_string()],
                |_| Ok(true),
            )
            .optional()
            .map(|row| row.unwrap_or(false))
        })?;
        if exists {
            Err(Error::ConcurrencyConflict)
        } else {
            Err(Error::SessionNotFound(session.id))
        }
    }

    async fn find_active_for_user(&self, user_id: &str, tenant: &TenantScope) -> Result<Option<RecoverySession>> {
        let terminal: &[&str] = &["completed", "cancelled", "expired", "failed"];
        let placeholders: Vec<String> = (0..terminal.len()).map(|i| format!("?{}", i + 3)).collect();
        let query = format!(
            "SELECT body FROM recovery_session
             WHERE user_id = ?1 AND app_id = ?2
               AND (user_organization_id IS ?3 OR ?3 IS NULL)
               AND status NOT IN ({})
             LIMIT 1",
            placeholders.join(", ")
        );
        // Building parameter list: user_id, app_id, user_organization_id, then terminal statuses.
        let body: Option<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&query)?;
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&user_id, &tenant.app_id, &tenant.user_organization_id];
            for status in terminal {
                params.push(status);
            }
            stmt.query_row(params.as_slice(), |row| row.get(0)).optional()
        })?;
        body.map(Self::row_to_session).transpose()
    }

    async fn find_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<RecoverySession>> {
        let terminal: &[&str] = &["completed", "cancelled", "expired", "failed"];
        let placeholders: Vec<String> = (0..terminal.len()).map(|i| format!("?{}", i + 2)).collect();
        let query = format!(
            "SELECT body FROM recovery_session WHERE expires_at <= ?1 AND status NOT IN ({})",
            placeholders.join(", ")
        );
        let bodies: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&query)?;
            let now_str = now.to_rfc3339();
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&now_str];
            for status in terminal {
                params.push(status);
            }
            let rows = stmt.query_map(params.as_slice(), |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        bodies.into_iter().map(Self::row_to_session).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RecoverySession {
        RecoverySession::new("user1", TenantScope::app("app1"), vec!["codes".to_string()])
    }

    #[tokio::test]
    async fn sqlite_create_then_get_round_trips() {
        let repo = SqliteSessionRepository::in_memory().unwrap();
        let session = session();
        let id = session.id;
        repo.create(session).await.unwrap();
        let fetched = repo.get(id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn sqlite_update_rejects_stale_version() {
        let repo = SqliteSessionRepository::in_memory().unwrap();
        let mut session = session();
        repo.create(session.clone()).await.unwrap();
        session.record_step_success("codes");
        let err = repo.update(session, 5).await.unwrap_err();
        assert_eq!(err.code(), "concurrency_conflict");
    }

    #[tokio::test]
    async fn sqlite_find_active_for_user_excludes_terminal_sessions() {
        let repo = SqliteSessionRepository::in_memory().unwrap();
        let mut session = session();
        session.transition_to(SessionStatus::Cancelled);
        repo.create(session).await.unwrap();
        let found = repo.find_active_for_user("user1", &TenantScope::app("app1")).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn sqlite_find_expired_returns_only_past_deadline_non_terminal_sessions() {
        let repo = SqliteSessionRepository::in_memory().unwrap();
        let session = session().with_expiry(std::time::Duration::from_secs(0));
        let id = session.id;
        repo.create(session).await.unwrap();
        let expired = repo.find_expired(chrono::Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let repo = InMemorySessionRepository::new();
        let session = session();
        let id = session.id;
        repo.create(session).await.unwrap();
        let fetched = repo.get(id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn update_rejects_stale_version() {
        let repo = InMemorySessionRepository::new();
        let mut session = session();
        let id = session.id;
        repo.create(session.clone()).await.unwrap();
        session.record_step_success("codes");
        let err = repo.update(session, 5).await.unwrap_err();
        assert_eq!(err.code(), "concurrency_conflict");
        let _ = id;
    }

    #[tokio::test]
    async fn find_active_for_user_excludes_terminal_sessions() {
        let repo = InMemorySessionRepository::new();
        let mut session = session();
        session.transition_to(SessionStatus::Cancelled);
        repo.create(session).await.unwrap();
        let found = repo.find_active_for_user("user1", &TenantScope::app("app1")).await.unwrap();
        assert!(found.is_none());
    }
}
