//! `AttributeProvider`: a pluggable, named source of key-indexed attribute
//! maps. Registered by unique name (`"user"`, `"resource"`, `"context"`, …)
//! in `AttributeResolver`.

use crate::error::Result;
use crate::policy::value::ValueMap;
use async_trait::async_trait;
use std::collections::HashMap;

/// A named source of attributes. For resource providers the convention is
/// that `key` is `"{type}:{id}"`; for user/context providers the key is
/// provider-defined.
#[async_trait]
pub trait AttributeProvider: Send + Sync {
    /// Stable registration name, e.g. `"user"`.
    fn name(&self) -> &str;

    /// Fetch the attribute map for a single key.
    async fn resolve(&self, key: &str) -> Result<ValueMap>;

    /// Fetch attribute maps for several keys at once. The default
    /// implementation loops calling `resolve`; providers backed by a
    /// batch-capable data source should override this.
    async fn resolve_batch(&self, keys: &[String]) -> Result<HashMap<String, ValueMap>> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            out.insert(key.clone(), self.resolve(key).await?);
        }
        Ok(out)
    }
}

/// Wall-clock context provider: supplies `request.timestamp`,
/// `request.hour`, `request.day_of_week`, `request.is_weekday`,
/// `request.is_weekend` when the caller omitted them.
pub struct ClockContextProvider;

#[async_trait]
impl AttributeProvider for ClockContextProvider {
    fn name(&self) -> &str {
        "context"
    }

    async fn resolve(&self, _key: &str) -> Result<ValueMap> {
        use crate::policy::value::Value;
        use chrono::{Datelike, Timelike, Utc};

        let now = Utc::now();
        let weekday = now.weekday();
        let is_weekday = !matches!(
            weekday,
            chrono::Weekday::Sat | chrono::Weekday::Sun
        );

        let mut map = ValueMap::new();
        map.insert("timestamp".to_string(), Value::Timestamp(now));
        map.insert("hour".to_string(), Value::Int(now.hour() as i64));
        map.insert(
            "day_of_week".to_string(),
            Value::String(weekday.to_string()),
        );
        map.insert("is_weekday".to_string(), Value::Bool(is_weekday));
        map.insert("is_weekend".to_string(), Value::Bool(!is_weekday));
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clock_provider_reports_weekday_and_weekend_as_complements() {
        let provider = ClockContextProvider;
        let attrs = provider.resolve("now").await.unwrap();
        let is_weekday = attrs.get("is_weekday").unwrap().as_bool().unwrap();
        let is_weekend = attrs.get("is_weekend").unwrap().as_bool().unwrap();
        assert_eq!(is_weekday, !is_weekend);
    }
}
