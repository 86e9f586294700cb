//! Connect retry policy.
//!
//! `delay(attempt) = min(base_delay_ms * 2^attempt, cap_ms)`, where `attempt`
//! is the 0-indexed connection attempt that just failed. `max_attempts` counts
//! every attempt including the first, so a policy with `max_attempts = 3`
//! sleeps at most twice.

use std::time::Duration;

use serde::Deserialize;
use tokio_retry::strategy::jitter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_attempts: u32,
    pub cap_ms: u64,
    /// Randomize each delay to spread out reconnect storms.
    pub jitter: bool,
    /// Hard timeout for a single connect attempt.
    pub attempt_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_attempts: 3,
            cap_ms: 10_000,
            jitter: false,
            attempt_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub delay: Duration,
    pub should_retry: bool,
}

impl RetryPolicy {
    /// Un-jittered backoff decision after `attempt` failed.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(factor).min(self.cap_ms);
        RetryDecision {
            delay: Duration::from_millis(delay_ms),
            should_retry: attempt.saturating_add(1) < self.max_attempts.max(1),
        }
    }

    /// The inter-attempt delays, in order. Feeds `tokio_retry::RetryIf`.
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            policy: *self,
            attempt: 0,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let decision = self.policy.decide(self.attempt);
        if !decision.should_retry {
            return None;
        }
        self.attempt += 1;
        if self.policy.jitter {
            Some(jitter(decision.delay))
        } else {
            Some(decision.delay)
        }
    }
}
