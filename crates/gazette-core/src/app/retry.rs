//! Retry policy: decides whether and when a failed job runs again.

use std::time::Duration;

/// Outcome of consulting the retry policy for a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue automatically after `delay`.
    Retry { delay: Duration },

    /// Automatic attempts used up; the job stays `failed` until a manual retry.
    Exhausted,
}

/// Exponential backoff with a bounded number of automatic attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay unit; the wait before retry `r` is `base_delay * 2^r`.
    pub base_delay: Duration,

    /// Once a job's `retry_count` reaches this, no automatic retry happens.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// Backoff for a job that has failed `retry_count` times: `base_delay * 2^retry_count`.
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_attempts {
            RetryDecision::Retry {
                delay: self.next_delay(retry_count),
            }
        } else {
            RetryDecision::Exhausted
        }
    }

    /// Does a failed job with this count still have automatic attempts left?
    pub fn has_attempts_left(&self, retry_count: u32) -> bool {
        retry_count < self.max_attempts
    }
}
