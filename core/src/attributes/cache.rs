//! Attribute cache: an in-memory tier backed by `tokio::sync::RwLock`, and a
//! trait any distributed tier can implement to sit behind it.

use crate::error::Result;
use crate::policy::value::ValueMap;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Cache entry bookkeeping, mirroring the hit/age tracking the crate's LLM
/// prompt cache keeps.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: ValueMap,
    created_at: DateTime<Utc>,
    hit_count: u64,
}

impl CacheEntry {
    fn new(value: ValueMap) -> Self {
        Self {
            value,
            created_at: Utc::now(),
            hit_count: 0,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now() - self.created_at > ttl
    }
}

/// A tier in the attribute cache. `resolver::AttributeResolver` checks the
/// in-memory tier first, then an optional distributed tier behind the same
/// trait object, before calling out to a provider.
#[async_trait]
pub trait AttributeCache: Send + Sync {
    async fn get(&self, cache_key: &str) -> Option<ValueMap>;
    async fn put(&self, cache_key: &str, value: ValueMap) -> Result<()>;
    async fn invalidate(&self, cache_key: &str);
}

/// Stats for the in-memory tier, exposed for health/debug surfaces.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

pub struct InMemoryAttributeCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryAttributeCache {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or(Duration::minutes(5)),
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().expect("cache stats lock poisoned").clone()
    }
}

#[async_trait]
impl AttributeCache for InMemoryAttributeCache {
    async fn get(&self, cache_key: &str) -> Option<ValueMap> {
        let mut entries = self.entries.write().expect("cache entries lock poisoned");
        let mut stats = self.stats.write().expect("cache stats lock poisoned");

        match entries.get_mut(cache_key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                entry.hit_count += 1;
                stats.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(cache_key);
                stats.misses += 1;
                None
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    async fn put(&self, cache_key: &str, value: ValueMap) -> Result<()> {
        let mut entries = self.entries.write().expect("cache entries lock poisoned");
        entries.insert(cache_key.to_string(), CacheEntry::new(value));
        self.stats.write().expect("cache stats lock poisoned").entry_count = entries.len() as u64;
        Ok(())
    }

    async fn invalidate(&self, cache_key: &str) {
        let mut entries = self.entries.write().expect("cache entries lock poisoned");
        entries.remove(cache_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn map_with(key: &str, value: &str) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert(key.to_string(), value.into());
        map
    }

    #[tokio::test]
    async fn put_then_get_is_a_hit() {
        let cache = InMemoryAttributeCache::new(StdDuration::from_secs(300));
        cache.put("user:123", map_with("role", "admin")).await.unwrap();
        let value = cache.get("user:123").await;
        assert!(value.is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_evicted() {
        let cache = InMemoryAttributeCache::new(StdDuration::from_nanos(1));
        cache.put("user:123", map_with("role", "admin")).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        assert!(cache.get("user:123").await.is_none());
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = InMemoryAttributeCache::new(StdDuration::from_secs(300));
        cache.put("user:123", map_with("role", "admin")).await.unwrap();
        cache.invalidate("user:123").await;
        assert!(cache.get("user:123").await.is_none());
    }
}
