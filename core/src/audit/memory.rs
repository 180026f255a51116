//! In-memory audit sink used by the test suite: a plain `Vec` guarded by a
//! mutex, only ever pushed to.

use crate::audit::{AttemptLogEntry, AuditHealth, AuditLog, AuditRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
    attempts: Mutex<Vec<AttemptLogEntry>>,
    appended: AtomicU64,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit log lock poisoned").clone()
    }

    pub fn attempts(&self) -> Vec<AttemptLogEntry> {
        self.attempts.lock().expect("audit log lock poisoned").clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, record: AuditRecord) {
        self.records.lock().expect("audit log lock poisoned").push(record);
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    async fn append_attempt(&self, entry: AttemptLogEntry) {
        self.attempts.lock().expect("audit log lock poisoned").push(entry);
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    fn health(&self) -> AuditHealth {
        AuditHealth {
            appended: self.appended.load(Ordering::Relaxed),
            write_failures: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_is_observable_and_ordered() {
        let log = InMemoryAuditLog::new();
        log.append(AuditRecord::new("a", "obj:1")).await;
        log.append(AuditRecord::new("b", "obj:2")).await;
        let records = log.records();
        assert_eq!(records[0].action_tag, "a");
        assert_eq!(records[1].action_tag, "b");
        assert_eq!(log.health().appended, 2);
    }
}
