//! Per-key minimum-interval token bucket.
//!
//! Conceptually a bucket of size one: a key is "allowed" once per
//! `interval`, and every disallowed call reports how long until the next
//! allowed call. Default key formats are `"{plugin}:{source-id}"` for a
//! single-source refresh and `"{plugin}:*"` for a refresh-all.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Falls back to when a caller configures a zero-or-negative interval.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// A `{plugin}:{source-id}` or `{plugin}:*` rate-limit key and the last
/// time it was allowed through.
pub struct RefreshRateLimiter {
    interval: Duration,
    last_allowed: Mutex<HashMap<String, Instant>>,
}

impl RefreshRateLimiter {
    pub fn new(interval: Duration) -> Self {
        let interval = if interval.is_zero() { DEFAULT_INTERVAL } else { interval };
        Self {
            interval,
            last_allowed: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_source_key(plugin: &str, source_id: &str) -> String {
        format!("{plugin}:{source_id}")
    }

    pub fn all_sources_key(plugin: &str) -> String {
        format!("{plugin}:*")
    }

    /// `Allow(key)`: if there is no entry, or `now >= last + interval`,
    /// records `now` and allows; otherwise refuses and reports how long
    /// until the next allowed call.
    pub fn allow(&self, key: &str) -> RefreshDecision {
        let now = Instant::now();
        let mut last_allowed = self.last_allowed.lock();
        match last_allowed.get(key) {
            Some(&last) if now < last + self.interval => {
                let wait = (last + self.interval).saturating_duration_since(now);
                RefreshDecision::Denied { retry_after: wait }
            }
            _ => {
                last_allowed.insert(key.to_string(), now);
                RefreshDecision::Allowed
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RefreshDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RefreshDecision::Allowed)
    }

    /// `ceil(wait-seconds)`, the `Retry-After` header value for a 429
    /// response (spec §4.E).
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            RefreshDecision::Allowed => None,
            RefreshDecision::Denied { retry_after } => {
                let secs = retry_after.as_secs();
                let ceil = if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
                Some(ceil.max(1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_is_always_allowed() {
        let limiter = RefreshRateLimiter::new(Duration::from_secs(30));
        let decision = limiter.allow("models:src-1");
        assert!(decision.is_allowed());
    }

    #[test]
    fn second_call_within_interval_is_denied() {
        let limiter = RefreshRateLimiter::new(Duration::from_secs(30));
        assert!(limiter.allow("models:src-1").is_allowed());
        let decision = limiter.allow("models:src-1");
        assert!(!decision.is_allowed());
        assert!(decision.retry_after_seconds().unwrap() > 0);
    }

    #[test]
    fn zero_interval_falls_back_to_thirty_seconds() {
        let limiter = RefreshRateLimiter::new(Duration::ZERO);
        assert!(limiter.allow("models:src-1").is_allowed());
        let decision = limiter.allow("models:src-1");
        assert!(!decision.is_allowed());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RefreshRateLimiter::new(Duration::from_secs(30));
        assert!(limiter.allow("models:src-1").is_allowed());
        assert!(limiter.allow("models:src-2").is_allowed());
        assert!(limiter.allow("models:*").is_allowed());
    }

    #[test]
    fn key_helpers_format_as_spec_requires() {
        assert_eq!(RefreshRateLimiter::per_source_key("models", "src-1"), "models:src-1");
        assert_eq!(RefreshRateLimiter::all_sources_key("models"), "models:*");
    }
}
