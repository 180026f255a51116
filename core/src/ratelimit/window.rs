//! Sliding-window counter: a deque of attempt timestamps per key. The
//! in-memory backend uses this form (rather than a bucketed counter)
//! because recovery/OTP volumes per key are small enough that the deque
//! never grows unbounded in practice (§5).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct SlidingWindowCounter {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl SlidingWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt at `now` and return the number of attempts still
    /// within `window` of `now`, after evicting stale entries.
    pub fn record_and_count(&mut self, now: DateTime<Utc>, window: Duration) -> u32 {
        self.timestamps.push_back(now);
        self.evict_stale(now, window);
        self.timestamps.len() as u32
    }

    /// Count without recording a new attempt.
    pub fn count(&mut self, now: DateTime<Utc>, window: Duration) -> u32 {
        self.evict_stale(now, window);
        self.timestamps.len() as u32
    }

    fn evict_stale(&mut self, now: DateTime<Utc>, window: Duration) {
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
        let cutoff = now - window;
        while let Some(front) = self.timestamps.front() {
            if *front < cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long until the oldest entry ages out of the window, i.e. when
    /// the caller can next expect `count` to decrease.
    pub fn retry_after(&self, now: DateTime<Utc>, window: Duration) -> Option<Duration> {
        let window_chrono = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
        self.timestamps.front().map(|oldest| {
            let expiry = *oldest + window_chrono;
            if expiry > now {
                (expiry - now).to_std().unwrap_or(Duration::ZERO)
            } else {
                Duration::ZERO
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_reset_as_entries_age_out() {
        let mut counter = SlidingWindowCounter::new();
        let t0 = Utc::now();
        let window = Duration::from_secs(60);
        assert_eq!(counter.record_and_count(t0, window), 1);
        assert_eq!(counter.record_and_count(t0, window), 2);

        let t1 = t0 + ChronoDuration::seconds(61);
        assert_eq!(counter.count(t1, window), 0);
    }

    #[test]
    fn retry_after_reflects_oldest_entry_expiry() {
        let mut counter = SlidingWindowCounter::new();
        let t0 = Utc::now();
        let window = Duration::from_secs(60);
        counter.record_and_count(t0, window);
        let retry_after = counter.retry_after(t0 + ChronoDuration::seconds(10), window).unwrap();
        assert!(retry_after <= Duration::from_secs(50));
    }
}
