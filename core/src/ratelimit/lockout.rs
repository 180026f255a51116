//! Consecutive-denial lockout with optional exponential backoff, capped at
//! `max_lockout_duration` (§4.D). Separate from the sliding-window counter:
//! a key can be within its rate quota yet still locked out from a prior
//! lockout period that hasn't expired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    pub lockout_after_attempts: u32,
    pub lockout_duration: Duration,
    pub backoff_multiplier: f64,
    pub max_lockout_duration: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            lockout_after_attempts: 5,
            lockout_duration: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            max_lockout_duration: Duration::from_secs(3600 * 24),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LockoutState {
    consecutive_denials: u32,
    locked_until: Option<DateTime<Utc>>,
    lockout_count: u32,
}

pub struct LockoutTracker {
    config: LockoutConfig,
    state: RwLock<HashMap<String, LockoutState>>,
}

impl LockoutTracker {
    pub fn new(config: LockoutConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `Some(retry_after)` if `key` is currently locked out.
    pub fn locked_until(&self, key: &str, now: DateTime<Utc>) -> Option<Duration> {
        let state = self.state.read().expect("lockout tracker lock poisoned");
        let entry = state.get(key)?;
        let until = entry.locked_until?;
        if until > now {
            (until - now).to_std().ok()
        } else {
            None
        }
    }

    /// Record a denied attempt. Once `lockout_after_attempts` consecutive
    /// denials accumulate, lock the key out, doubling (per
    /// `backoff_multiplier`) the duration on each subsequent lockout up to
    /// `max_lockout_duration`.
    pub fn record_denial(&self, key: &str, now: DateTime<Utc>) {
        let mut state = self.state.write().expect("lockout tracker lock poisoned");
        let entry = state.entry(key.to_string()).or_default();
        entry.consecutive_denials += 1;
        if entry.consecutive_denials >= self.config.lockout_after_attempts {
            let multiplier = self.config.backoff_multiplier.powi(entry.lockout_count as i32);
            let scaled = self.config.lockout_duration.mul_f64(multiplier.max(1.0));
            let capped = scaled.min(self.config.max_lockout_duration);
            entry.locked_until = Some(now + chrono::Duration::from_std(capped).unwrap_or_default());
            entry.lockout_count += 1;
            entry.consecutive_denials = 0;
        }
    }

    /// A successful attempt clears the consecutive-denial counter but does
    /// not shorten an active lockout window.
    pub fn record_success(&self, key: &str) {
        let mut state = self.state.write().expect("lockout tracker lock poisoned");
        if let Some(entry) = state.get_mut(key) {
            entry.consecutive_denials = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_out_after_threshold_and_backs_off() {
        let tracker = LockoutTracker::new(LockoutConfig {
            lockout_after_attempts: 2,
            lockout_duration: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_lockout_duration: Duration::from_secs(100),
        });
        let now = Utc::now();
        assert!(tracker.locked_until("k", now).is_none());
        tracker.record_denial("k", now);
        assert!(tracker.locked_until("k", now).is_none());
        tracker.record_denial("k", now);
        let first = tracker.locked_until("k", now).unwrap();
        assert!(first <= Duration::from_secs(10));

        let later = now + chrono::Duration::seconds(11);
        tracker.record_denial("k", later);
        tracker.record_denial("k", later);
        let second = tracker.locked_until("k", later).unwrap();
        assert!(second > Duration::from_secs(10));
    }

    #[test]
    fn success_resets_consecutive_denials_but_not_active_lockout() {
        let tracker = LockoutTracker::new(LockoutConfig {
            lockout_after_attempts: 2,
            lockout_duration: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_lockout_duration: Duration::from_secs(100),
        });
        let now = Utc::now();
        tracker.record_denial("k", now);
        tracker.record_denial("k", now);
        assert!(tracker.locked_until("k", now).is_some());
        tracker.record_success("k");
        assert!(tracker.locked_until("k", now).is_some());
    }
}
