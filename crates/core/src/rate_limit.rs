//! Best-effort admission control.
//!
//! Counters live in process memory, so with several instances each one
//! enforces its own window. Correctness-critical idempotence never relies on
//! this module.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

pub const BUCKET_CONVERSATION_CREATE: &str = "conversation_create";
pub const BUCKET_CONVERSATION_MESSAGE: &str = "conversation_message";
pub const BUCKET_OTP_REQUEST: &str = "otp_request";
pub const BUCKET_OTP_VERIFY: &str = "otp_verify";
pub const BUCKET_REQUEST_CREATE: &str = "request_create";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, bucket: &str, key: &str) -> RateDecision;
}

#[derive(Debug, Default)]
struct WindowEntry {
    requests: Vec<Instant>,
}

impl WindowEntry {
    fn prune(&mut self, now: Instant, window: Duration) {
        self.requests.retain(|&at| now.saturating_duration_since(at) < window);
    }
}

/// Sliding window over request timestamps, keyed by `(bucket, key)`.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    window: Duration,
    limits: HashMap<String, u32>,
    max_tracked_keys: usize,
    entries: Mutex<HashMap<(String, String), WindowEntry>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(window: Duration, max_tracked_keys: usize) -> Self {
        Self { window, limits: HashMap::new(), max_tracked_keys, entries: Mutex::new(HashMap::new()) }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(Duration::from_secs(config.window_secs), config.max_tracked_keys)
            .with_limit(BUCKET_CONVERSATION_CREATE, config.conversation_create)
            .with_limit(BUCKET_CONVERSATION_MESSAGE, config.conversation_message)
            .with_limit(BUCKET_OTP_REQUEST, config.otp_request)
            .with_limit(BUCKET_OTP_VERIFY, config.otp_verify)
            .with_limit(BUCKET_REQUEST_CREATE, config.request_create)
    }

    pub fn with_limit(mut self, bucket: impl Into<String>, limit: u32) -> Self {
        self.limits.insert(bucket.into(), limit);
        self
    }

    pub fn check_at(&self, bucket: &str, key: &str, now: Instant) -> RateDecision {
        // Unconfigured buckets are not limited.
        let Some(&limit) = self.limits.get(bucket) else {
            return RateDecision::Allowed { remaining: u32::MAX };
        };

        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };

        let map_key = (bucket.to_string(), key.to_string());
        if !entries.contains_key(&map_key) && entries.len() >= self.max_tracked_keys {
            let window = self.window;
            entries.retain(|_, entry| {
                entry.prune(now, window);
                !entry.requests.is_empty()
            });
            if entries.len() >= self.max_tracked_keys {
                if let Some(oldest) = oldest_key(&entries) {
                    entries.remove(&oldest);
                }
            }
        }

        let entry = entries.entry(map_key).or_default();
        entry.prune(now, self.window);

        let used = u32::try_from(entry.requests.len()).unwrap_or(u32::MAX);
        if used >= limit {
            let retry_after = entry
                .requests
                .first()
                .map(|&first| self.window.saturating_sub(now.saturating_duration_since(first)))
                .unwrap_or(self.window);
            return RateDecision::Limited { retry_after_secs: retry_after.as_secs().max(1) };
        }

        entry.requests.push(now);
        RateDecision::Allowed { remaining: limit - used - 1 }
    }

    pub fn tracked_keys(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

fn oldest_key(entries: &HashMap<(String, String), WindowEntry>) -> Option<(String, String)> {
    entries
        .iter()
        .filter_map(|(key, entry)| entry.requests.last().map(|&last| (key, last)))
        .min_by_key(|(_, last)| *last)
        .map(|(key, _)| key.clone())
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn check(&self, bucket: &str, key: &str) -> RateDecision {
        self.check_at(bucket, key, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{RateDecision, RateLimiter, SlidingWindowRateLimiter};

    #[test]
    fn allows_up_to_limit_then_limits_within_window() {
        let limiter = SlidingWindowRateLimiter::new(Duration::from_secs(60), 100)
            .with_limit("otp_request", 2);
        let start = Instant::now();

        assert_eq!(
            limiter.check_at("otp_request", "ada@example.com", start),
            RateDecision::Allowed { remaining: 1 }
        );
        assert!(limiter.check_at("otp_request", "ada@example.com", start).is_allowed());
        assert_eq!(
            limiter.check_at("otp_request", "ada@example.com", start + Duration::from_secs(20)),
            RateDecision::Limited { retry_after_secs: 40 }
        );
        assert!(limiter.check_at("otp_request", "bob@example.com", start).is_allowed());
    }

    #[test]
    fn window_slides_and_readmits() {
        let limiter =
            SlidingWindowRateLimiter::new(Duration::from_secs(10), 100).with_limit("b", 1);
        let start = Instant::now();

        assert!(limiter.check_at("b", "k", start).is_allowed());
        assert!(!limiter.check_at("b", "k", start + Duration::from_secs(5)).is_allowed());
        assert!(limiter.check_at("b", "k", start + Duration::from_secs(10)).is_allowed());
    }

    #[test]
    fn unconfigured_buckets_are_unlimited() {
        let limiter = SlidingWindowRateLimiter::new(Duration::from_secs(10), 10);
        for _ in 0..50 {
            assert!(limiter.check("anything", "k").is_allowed());
        }
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn tracked_keys_stay_bounded() {
        let limiter = SlidingWindowRateLimiter::new(Duration::from_secs(60), 3).with_limit("b", 5);
        let start = Instant::now();

        for index in 0..10u64 {
            let key = format!("client-{index}");
            limiter.check_at("b", &key, start + Duration::from_millis(index));
        }

        assert_eq!(limiter.tracked_keys(), 3);
    }
}
