//! SQLite-backed audit sink. The `audit_log` and `recovery_attempt_log`
//! tables have no `UPDATE`/`DELETE` path here: this module only ever
//! `INSERT`s.

use crate::audit::{AttemptLogEntry, AuditHealth, AuditLog, AuditRecord};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::error;

pub struct SqliteAuditLog {
    conn: Arc<Mutex<Connection>>,
    appended: AtomicU64,
    write_failures: AtomicU64,
}

impl SqliteAuditLog {
    pub fn open(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> crate::error::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                ts TEXT NOT NULL,
                actor_user_id TEXT,
                action_tag TEXT NOT NULL,
                object_ref TEXT NOT NULL,
                ip TEXT,
                user_agent TEXT,
                metadata TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS recovery_attempt_log (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                action_tag TEXT NOT NULL,
                method_tag TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                success INTEGER NOT NULL,
                failure_reason TEXT,
                ip TEXT,
                user_agent TEXT,
                device_id TEXT,
                ts TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            appended: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> rusqlite::Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().expect("audit sqlite connection lock poisoned");
        f(&conn)
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn append(&self, record: AuditRecord) {
        let result = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log (id, ts, actor_user_id, action_tag, object_ref, ip, user_agent, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id.to_string(),
                    record.ts.to_rfc3339(),
                    record.actor_user_id,
                    record.action_tag,
                    record.object_ref,
                    record.ip,
                    record.user_agent,
                    record.metadata.to_string(),
                ],
            )
        });
        match result {
            Ok(_) => {
                self.appended.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                error!(error = %err, "audit log write failed");
                self.write_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn append_attempt(&self, entry: AttemptLogEntry) {
        let result = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO recovery_attempt_log
                 (id, session_id, action_tag, method_tag, step_index, success, failure_reason, ip, user_agent, device_id, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.id.to_string(),
                    entry.session_id.to_string(),
                    entry.action_tag,
                    entry.method_tag,
                    entry.step_index as i64,
                    entry.success,
                    entry.failure_reason,
                    entry.ip,
                    entry.user_agent,
                    entry.device_id,
                    entry.ts.to_rfc3339(),
                ],
            )
        });
        match result {
            Ok(_) => {
                self.appended.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                error!(error = %err, "audit attempt log write failed");
                self.write_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn health(&self) -> AuditHealth {
        AuditHealth {
            appended: self.appended.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_persists_and_is_counted() {
        let log = SqliteAuditLog::in_memory().unwrap();
        log.append(AuditRecord::new("session_start", "session:1")).await;
        assert_eq!(log.health().appended, 1);
        assert_eq!(log.health().write_failures, 0);
    }

    #[tokio::test]
    async fn append_attempt_persists_step_bookkeeping() {
        let log = SqliteAuditLog::in_memory().unwrap();
        let entry = AttemptLogEntry::new(uuid::Uuid::new_v4(), "recovery_codes", 0, true);
        log.append_attempt(entry).await;
        assert_eq!(log.health().appended, 1);
    }
}
