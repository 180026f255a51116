//! Attribute resolver: provider registry plus tiered caching and evaluation
//! context enrichment (§4.A).

use crate::attributes::cache::AttributeCache;
use crate::attributes::provider::AttributeProvider;
use crate::error::Result;
use crate::policy::types::EvaluationContext;
use crate::policy::value::{Value, ValueMap};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use crate::attributes::cache::InMemoryAttributeCache;

#[derive(Debug, Clone)]
pub struct AttributeResolverConfig {
    pub cache_ttl: Duration,
}

impl Default for AttributeResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Fetches principal/resource/request attributes from registered providers,
/// fronted by an in-memory cache and an optional distributed tier reachable
/// through the same `AttributeCache` trait object.
pub struct AttributeResolver {
    #[allow(dead_code)]
    config: AttributeResolverConfig,
    cache: Arc<dyn AttributeCache>,
    distributed: Option<Arc<dyn AttributeCache>>,
    providers: HashMap<String, Arc<dyn AttributeProvider>>,
}

impl AttributeResolver {
    pub fn new(config: AttributeResolverConfig, cache: Arc<dyn AttributeCache>) -> Self {
        Self {
            config,
            cache,
            distributed: None,
            providers: HashMap::new(),
        }
    }

    pub fn with_distributed_cache(mut self, distributed: Arc<dyn AttributeCache>) -> Self {
        self.distributed = Some(distributed);
        self
    }

    pub fn register_provider(mut self, provider: Arc<dyn AttributeProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    fn cache_key(provider_name: &str, key: &str) -> String {
        format!("{provider_name}:{key}")
    }

    /// `Resolve(provider_name, key) -> attrs`.
    pub async fn resolve(&self, provider_name: &str, key: &str) -> Result<ValueMap> {
        let cache_key = Self::cache_key(provider_name, key);

        if let Some(hit) = self.cache.get(&cache_key).await {
            return Ok(hit);
        }
        if let Some(distributed) = &self.distributed {
            if let Some(hit) = distributed.get(&cache_key).await {
                self.cache.put(&cache_key, hit.clone()).await?;
                return Ok(hit);
            }
        }

        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| crate::error::Error::ProviderNotConfigured(provider_name.to_string()))?;

        let attrs = provider.resolve(key).await?;
        self.cache.put(&cache_key, attrs.clone()).await?;
        if let Some(distributed) = &self.distributed {
            distributed.put(&cache_key, attrs.clone()).await?;
        }
        Ok(attrs)
    }

    /// `ResolveBatch(provider_name, [keys]) -> {key: attrs}`.
    pub async fn resolve_batch(
        &self,
        provider_name: &str,
        keys: &[String],
    ) -> Result<HashMap<String, ValueMap>> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            out.insert(key.clone(), self.resolve(provider_name, key).await?);
        }
        Ok(out)
    }

    /// Mutates `principal`/`resource`/`request` in place, fetching only
    /// attributes the caller did not already supply. Errors are non-fatal:
    /// logged and otherwise ignored, so evaluation proceeds with whatever
    /// attributes are present.
    pub async fn enrich_evaluation_context(&self, ctx: &mut EvaluationContext) -> Result<()> {
        if ctx.principal.contains_key("id") && !ctx.principal.contains_key("roles") {
            let id = ctx.principal.get("id").and_then(Value::as_str).map(str::to_string);
            if let Some(id) = id {
                match self.resolve("user", &id).await {
                    Ok(attrs) => merge_missing(&mut ctx.principal, attrs),
                    Err(err) => warn!(error = %err, "user attribute enrichment failed"),
                }
            }
        }

        if !ctx.resource.contains_key("owner") {
            let type_and_id = (
                ctx.resource.get("type").and_then(Value::as_str).map(str::to_string),
                ctx.resource.get("id").and_then(Value::as_str).map(str::to_string),
            );
            if let (Some(ty), Some(id)) = type_and_id {
                let key = format!("{ty}:{id}");
                match self.resolve("resource", &key).await {
                    Ok(attrs) => merge_missing(&mut ctx.resource, attrs),
                    Err(err) => warn!(error = %err, "resource attribute enrichment failed"),
                }
            }
        }

        if !ctx.request.contains_key("timestamp") {
            match self.resolve("context", "now").await {
                Ok(attrs) => merge_missing(&mut ctx.request, attrs),
                Err(err) => warn!(error = %err, "context attribute enrichment failed"),
            }
        }

        Ok(())
    }
}

fn merge_missing(target: &mut ValueMap, source: ValueMap) {
    for (key, value) in source {
        target.entry(key).or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUserProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AttributeProvider for CountingUserProvider {
        fn name(&self) -> &str {
            "user"
        }

        async fn resolve(&self, _key: &str) -> Result<ValueMap> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut map = ValueMap::new();
            map.insert("roles".to_string(), Value::List(vec![Value::String("admin".into())]));
            Ok(map)
        }
    }

    fn resolver_with_counting_provider() -> (Arc<AttributeResolver>, Arc<CountingUserProvider>) {
        let cache: Arc<dyn AttributeCache> = Arc::new(InMemoryAttributeCache::new(Duration::from_secs(300)));
        let provider = Arc::new(CountingUserProvider { calls: AtomicUsize::new(0) });
        let resolver = AttributeResolver::new(AttributeResolverConfig::default(), cache)
            .register_provider(provider.clone());
        (Arc::new(resolver), provider)
    }

    #[tokio::test]
    async fn second_resolve_within_ttl_hits_cache_not_provider() {
        let (resolver, provider) = resolver_with_counting_provider();
        resolver.resolve("user", "u1").await.unwrap();
        resolver.resolve("user", "u1").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enrichment_never_overwrites_caller_supplied_values() {
        let (resolver, _provider) = resolver_with_counting_provider();
        let mut ctx = EvaluationContext::new("read")
            .with_principal("id", "u1")
            .with_principal("roles", Value::List(vec![Value::String("auditor".into())]));
        resolver.enrich_evaluation_context(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.principal.get("roles"),
            Some(&Value::List(vec![Value::String("auditor".into())]))
        );
    }

    #[tokio::test]
    async fn enrichment_fetches_missing_roles() {
        let (resolver, provider) = resolver_with_counting_provider();
        let mut ctx = EvaluationContext::new("read").with_principal("id", "u1");
        resolver.enrich_evaluation_context(&mut ctx).await.unwrap();
        assert!(ctx.principal.contains_key("roles"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_provider_is_non_fatal() {
        let cache: Arc<dyn AttributeCache> = Arc::new(InMemoryAttributeCache::new(Duration::from_secs(300)));
        let resolver = AttributeResolver::new(AttributeResolverConfig::default(), cache);
        let mut ctx = EvaluationContext::new("read").with_principal("id", "u1");
        assert!(resolver.enrich_evaluation_context(&mut ctx).await.is_ok());
        assert!(!ctx.principal.contains_key("roles"));
    }
}
