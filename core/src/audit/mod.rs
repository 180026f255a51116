//! Append-only audit log (§4.H). Write failures never block the triggering
//! operation; they are counted and surfaced via `AuditLog::health`.

pub mod memory;
pub mod record;
pub mod sqlite;

pub use memory::InMemoryAuditLog;
pub use record::{AttemptLogEntry, AuditRecord};
pub use sqlite::SqliteAuditLog;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditHealth {
    pub appended: u64,
    pub write_failures: u64,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: AuditRecord);
    async fn append_attempt(&self, entry: AttemptLogEntry);
    fn health(&self) -> AuditHealth;
}
