//! Rate limiting and lockout (§4.D). Two independent mechanisms share one
//! entry point: a sliding-window quota per key, and a consecutive-denial
//! lockout with backoff layered on top of it.

pub mod keys;
pub mod lockout;
pub mod store;
pub mod window;

pub use lockout::{LockoutConfig, LockoutTracker};
pub use store::{InMemoryRateLimitStore, RateLimitStore};
pub use window::SlidingWindowCounter;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub window: Duration,
    pub max_attempts: u32,
}

impl RateLimitRule {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self { window, max_attempts }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self { allowed: true, retry_after: None }
    }

    pub fn deny(retry_after: Duration) -> Self {
        Self { allowed: false, retry_after: Some(retry_after) }
    }
}

/// Aggregate configuration for the rules this platform enforces. Individual
/// rules are looked up by the canonical key shape in [`keys`]; this struct
/// just carries the numbers, not the key strings themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub recovery_user_max: u32,
    pub recovery_user_window: Duration,
    pub recovery_user_daily_max: u32,
    pub recovery_user_daily_window: Duration,
    pub recovery_ip_max: u32,
    pub recovery_ip_window: Duration,
    pub phone_send_max: u32,
    pub phone_send_window: Duration,
    pub phone_verify_max: u32,
    pub phone_verify_window: Duration,
    pub lockout: LockoutConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            recovery_user_max: 5,
            recovery_user_window: Duration::from_secs(3600),
            recovery_user_daily_max: 10,
            recovery_user_daily_window: Duration::from_secs(86400),
            recovery_ip_max: 20,
            recovery_ip_window: Duration::from_secs(3600),
            phone_send_max: 3,
            phone_send_window: Duration::from_secs(600),
            phone_verify_max: 5,
            phone_verify_window: Duration::from_secs(600),
            lockout: LockoutConfig::default(),
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    lockout: LockoutTracker,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, lockout_config: LockoutConfig) -> Self {
        Self {
            store,
            lockout: LockoutTracker::new(lockout_config),
        }
    }

    pub fn in_memory(lockout_config: LockoutConfig) -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::new()), lockout_config)
    }

    /// Check and record an attempt against `key` under `rule`. A key that is
    /// under an active lockout is denied without consuming a slot in the
    /// sliding window.
    #[tracing::instrument(skip(self, rule), fields(key = %key))]
    pub async fn check(&self, key: &str, rule: &RateLimitRule) -> RateLimitDecision {
        let now = Utc::now();
        if let Some(retry_after) = self.lockout.locked_until(key, now) {
            tracing::debug!("key is locked out");
            return RateLimitDecision::deny(retry_after);
        }

        let count = self.store.record_and_count(key, now, rule.window).await;
        if count > rule.max_attempts {
            self.lockout.record_denial(key, now);
            let retry_after = self
                .store
                .retry_after(key, now, rule.window)
                .await
                .unwrap_or(rule.window);
            tracing::warn!(count, max = rule.max_attempts, "rate limit exceeded");
            RateLimitDecision::deny(retry_after)
        } else {
            self.lockout.record_success(key);
            RateLimitDecision::allow()
        }
    }

    pub async fn reset(&self, key: &str) {
        self.store.reset(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_until_threshold_then_denies() {
        let limiter = RateLimiter::in_memory(LockoutConfig {
            lockout_after_attempts: 100,
            ..LockoutConfig::default()
        });
        let rule = RateLimitRule::new(2, Duration::from_secs(60));
        assert!(limiter.check("k", &rule).await.allowed);
        assert!(limiter.check("k", &rule).await.allowed);
        let decision = limiter.check("k", &rule).await;
        assert!(!decision.allowed);
        assert!(decision.retry_after.is_some());
    }

    #[tokio::test]
    async fn lockout_kicks_in_after_repeated_denials() {
        let limiter = RateLimiter::in_memory(LockoutConfig {
            lockout_after_attempts: 1,
            lockout_duration: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_lockout_duration: Duration::from_secs(300),
        });
        let rule = RateLimitRule::new(0, Duration::from_secs(60));
        let first = limiter.check("k", &rule).await;
        assert!(!first.allowed);
        let second = limiter.check("k", &rule).await;
        assert!(!second.allowed);
    }

    #[tokio::test]
    async fn reset_clears_both_window_and_future_denials() {
        let limiter = RateLimiter::in_memory(LockoutConfig::default());
        let rule = RateLimitRule::new(1, Duration::from_secs(60));
        limiter.check("k", &rule).await;
        limiter.check("k", &rule).await;
        limiter.reset("k").await;
        assert!(limiter.check("k", &rule).await.allowed);
    }
}
