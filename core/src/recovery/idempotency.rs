//! Idempotency store (§6): `recovery::engine::RecoveryStateMachine`
//! dedupes a client-supplied request id per session for a configurable
//! window, returning the cached result instead of re-executing the
//! operation.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CachedResult {
    value: Json,
    recorded_at: DateTime<Utc>,
}

/// Keyed by `(session_id, request_id)`.
pub struct IdempotencyStore {
    ttl: Duration,
    entries: RwLock<HashMap<(Uuid, String), CachedResult>>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    /// Returns the cached result for `(session_id, request_id)` if one was
    /// recorded within the TTL window.
    pub fn get(&self, session_id: Uuid, request_id: &str) -> Option<Json> {
        let entries = self.entries.read().expect("idempotency store lock poisoned");
        let entry = entries.get(&(session_id, request_id.to_string()))?;
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_default();
        if Utc::now() - entry.recorded_at <= ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn record(&self, session_id: Uuid, request_id: &str, value: Json) {
        let mut entries = self.entries.write().expect("idempotency store lock poisoned");
        entries.insert((session_id, request_id.to_string()), CachedResult { value, recorded_at: Utc::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_recorded_result_is_returned_for_the_same_request_id() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        let session_id = Uuid::new_v4();
        store.record(session_id, "req1", serde_json::json!({"ok": true}));
        assert_eq!(store.get(session_id, "req1"), Some(serde_json::json!({"ok": true})));
        assert_eq!(store.get(session_id, "req2"), None);
    }

    #[test]
    fn an_expired_entry_is_not_returned() {
        let store = IdempotencyStore::new(Duration::from_millis(0));
        let session_id = Uuid::new_v4();
        store.record(session_id, "req1", serde_json::json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get(session_id, "req1"), None);
    }
}
