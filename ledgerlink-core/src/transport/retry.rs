//! Retry policy for read-only requests

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behaviour for evaluate requests.
///
/// Submit is never retried; see `crate::contract`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 50,
            max_backoff_ms: 500,
            jitter_ms: 20,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Delay before retry number `attempt` (0-based): exponential, capped, jittered
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exp = policy
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped = exp.min(policy.max_backoff_ms);
    let jitter = if policy.jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=policy.jitter_ms)
    };
    Duration::from_millis(capped.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 35,
            jitter_ms: 0,
        };
        assert_eq!(backoff_delay(0, &policy), Duration::from_millis(10));
        assert_eq!(backoff_delay(1, &policy), Duration::from_millis(20));
        assert_eq!(backoff_delay(2, &policy), Duration::from_millis(35));
        assert_eq!(backoff_delay(40, &policy), Duration::from_millis(35));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 1,
            initial_backoff_ms: 100,
            max_backoff_ms: 100,
            jitter_ms: 5,
        };
        for _ in 0..50 {
            let delay = backoff_delay(0, &policy).as_millis();
            assert!((100..=105).contains(&delay));
        }
    }
}
