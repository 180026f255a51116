//! Provider health tracking: every send/receive failure is counted and
//! surfaced via a health snapshot rather than propagated to the caller
//! (§6 "fire-and-audit").

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct ProviderHealthSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

impl ProviderHealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.failures == 0 || self.successes > self.failures
    }
}

/// Per-provider-name counters, suitable for a health-check endpoint.
#[derive(Default)]
pub struct ProviderHealth {
    counters: RwLock<HashMap<String, ProviderHealthSnapshot>>,
}

impl ProviderHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, provider: &str) {
        let mut counters = self.counters.write().expect("provider health lock poisoned");
        counters.entry(provider.to_string()).or_default().successes += 1;
    }

    pub fn record_failure(&self, provider: &str, error: impl Into<String>) {
        let mut counters = self.counters.write().expect("provider health lock poisoned");
        let entry = counters.entry(provider.to_string()).or_default();
        entry.failures += 1;
        entry.last_error = Some(error.into());
    }

    pub fn snapshot(&self, provider: &str) -> ProviderHealthSnapshot {
        self.counters
            .read()
            .expect("provider health lock poisoned")
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all(&self) -> HashMap<String, ProviderHealthSnapshot> {
        self.counters.read().expect("provider health lock poisoned").clone()
    }
}
