//! Storage abstraction for the sliding-window counters, mirroring the
//! cache-trait-object pattern used by `attributes::cache::AttributeCache`:
//! one trait, an in-memory reference implementation, room for a
//! distributed one behind the same interface without touching callers.

use crate::ratelimit::window::SlidingWindowCounter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn record_and_count(&self, key: &str, now: DateTime<Utc>, window: Duration) -> u32;
    async fn retry_after(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Option<Duration>;
    async fn reset(&self, key: &str);
}

#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: RwLock<HashMap<String, SlidingWindowCounter>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn record_and_count(&self, key: &str, now: DateTime<Utc>, window: Duration) -> u32 {
        let mut windows = self.windows.write().expect("rate limit store lock poisoned");
        windows
            .entry(key.to_string())
            .or_insert_with(SlidingWindowCounter::new)
            .record_and_count(now, window)
    }

    async fn retry_after(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Option<Duration> {
        let windows = self.windows.read().expect("rate limit store lock poisoned");
        windows.get(key).and_then(|counter| counter.retry_after(now, window))
    }

    async fn reset(&self, key: &str) {
        let mut windows = self.windows.write().expect("rate limit store lock poisoned");
        windows.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_accumulate_per_key() {
        let store = InMemoryRateLimitStore::new();
        let now = Utc::now();
        let window = Duration::from_secs(60);
        assert_eq!(store.record_and_count("k1", now, window).await, 1);
        assert_eq!(store.record_and_count("k1", now, window).await, 2);
        assert_eq!(store.record_and_count("k2", now, window).await, 1);
    }

    #[tokio::test]
    async fn reset_clears_the_window() {
        let store = InMemoryRateLimitStore::new();
        let now = Utc::now();
        let window = Duration::from_secs(60);
        store.record_and_count("k1", now, window).await;
        store.reset("k1").await;
        assert_eq!(store.record_and_count("k1", now, window).await, 1);
    }
}
