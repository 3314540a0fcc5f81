//! RateLimiter - 識別子ごとのスライディングウィンドウ制限
//!
//! 各識別子について直近 `window` 内のリクエスト時刻を保持し、
//! `max_requests` 未満なら許可して記録する。拒否されたリクエストは記録しない。
//!
//! 状態はプロセス内のみ（再起動でリセットされる）。
//! 古いエントリは `is_allowed` のたびに捨てられるが、アクセスの途絶えた
//! 識別子は `sweep()`（Scheduler のメンテナンスループ）でまとめて削除する。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::domain::GazetteError;
use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Result of [`RateLimiter::is_allowed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests still available in the current window after this one.
    pub remaining: u32,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    requests: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = TimeDelta::from_std(self.config.window).unwrap_or(TimeDelta::MAX);
        now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Record a request for `identifier` if the window has room.
    pub fn is_allowed(&self, identifier: &str) -> RateDecision {
        let now = self.clock.now();
        let cutoff = self.window_start(now);
        let max = self.config.max_requests;

        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        let timestamps = requests.entry(identifier.to_string()).or_default();
        while timestamps.front().is_some_and(|oldest| *oldest < cutoff) {
            timestamps.pop_front();
        }

        let used = u32::try_from(timestamps.len()).unwrap_or(u32::MAX);
        if used < max {
            timestamps.push_back(now);
            RateDecision {
                allowed: true,
                remaining: max - used - 1,
            }
        } else {
            debug!(identifier, used, max, "rate limit hit");
            RateDecision {
                allowed: false,
                remaining: 0,
            }
        }
    }

    /// [`is_allowed`](Self::is_allowed) as a `Result`, for callers that propagate with `?`.
    ///
    /// `retry_after` is the time until the oldest recorded request leaves the window.
    pub fn check(&self, identifier: &str) -> Result<u32, GazetteError> {
        let decision = self.is_allowed(identifier);
        if decision.allowed {
            return Ok(decision.remaining);
        }

        let now = self.clock.now();
        let requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        let retry_after = requests
            .get(identifier)
            .and_then(|timestamps| timestamps.front())
            .and_then(|oldest| {
                let expires = oldest.checked_add_signed(TimeDelta::from_std(self.config.window).ok()?)?;
                (expires - now).to_std().ok()
            })
            .unwrap_or_default();

        Err(GazetteError::RateLimitExceeded {
            identifier: identifier.to_string(),
            retry_after,
        })
    }

    /// Forget everything recorded for `identifier`.
    pub fn reset(&self, identifier: &str) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier);
    }

    /// Drop expired timestamps everywhere and remove identifiers left empty.
    /// Returns the number of identifiers removed.
    pub fn sweep(&self) -> usize {
        let cutoff = self.window_start(self.clock.now());
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        let before = requests.len();
        requests.retain(|_, timestamps| {
            timestamps.retain(|at| *at >= cutoff);
            !timestamps.is_empty()
        });
        before - requests.len()
    }

    pub fn tracked_identifiers(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
