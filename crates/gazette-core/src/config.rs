//! Config - 環境変数からの設定読み込み
//!
//! すべての値にデフォルトがあり、読めない値はデフォルトに戻る。
//! ありえない組み合わせは `validate()` で弾く。
//!
//! | 変数 | デフォルト |
//! |---|---|
//! | `GAZETTE_SCHEDULER_ENABLED` | true |
//! | `GAZETTE_SCHEDULER_HOUR` / `GAZETTE_SCHEDULER_MINUTE` | 6 / 0 |
//! | `GAZETTE_SCHEDULER_UTC_OFFSET_MINUTES` | 0 |
//! | `GAZETTE_MAINTENANCE_INTERVAL_SECS` | 3600 |
//! | `GAZETTE_RESUME_ON_START` | true |
//! | `GAZETTE_POOL_SIZE` | 3 |
//! | `GAZETTE_GENERATION_TIMEOUT_SECS` | 0 (なし) |
//! | `GAZETTE_RETRY_BASE_DELAY_SECS` | 60 |
//! | `GAZETTE_RETRY_MAX_ATTEMPTS` | 3 |
//! | `GAZETTE_RATE_LIMIT_MAX_REQUESTS` | 10 |
//! | `GAZETTE_RATE_LIMIT_WINDOW_SECS` | 60 |
//! | `GAZETTE_CACHE_CAPACITY` | 100 |
//! | `GAZETTE_OUTPUT_DIR` | output |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use thiserror::Error;
use tracing::warn;

use crate::app::cache::CacheConfig;
use crate::app::executor::ExecutorConfig;
use crate::app::rate_limiter::RateLimitConfig;
use crate::app::retry::RetryPolicy;
use crate::app::scheduler::SchedulerConfig;

const DEFAULT_OUTPUT_DIR: &str = "output";

/// Largest accepted UTC offset, in minutes (exclusive).
const MAX_UTC_OFFSET_MINUTES: i32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },

    #[error("{key} is out of range: {value}")]
    OutOfRange { key: &'static str, value: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GazetteConfig {
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    /// Where engines write artifacts; also the root of the filesystem content store.
    pub output_dir: PathBuf,
}

impl Default for GazetteConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl GazetteConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source (the environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            read(&lookup, key).map(Duration::from_secs).unwrap_or(default)
        };

        let hour: u32 = read(&lookup, "GAZETTE_SCHEDULER_HOUR").unwrap_or(defaults.scheduler.run_at.hour());
        let minute: u32 =
            read(&lookup, "GAZETTE_SCHEDULER_MINUTE").unwrap_or(defaults.scheduler.run_at.minute());
        let run_at = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_else(|| {
            warn!(hour, minute, "invalid scheduler time; using default");
            defaults.scheduler.run_at
        });

        let scheduler = SchedulerConfig {
            enabled: lookup("GAZETTE_SCHEDULER_ENABLED")
                .map(|raw| parse_flag(&raw))
                .unwrap_or(defaults.scheduler.enabled),
            run_at,
            utc_offset_minutes: read(&lookup, "GAZETTE_SCHEDULER_UTC_OFFSET_MINUTES")
                .unwrap_or(defaults.scheduler.utc_offset_minutes),
            maintenance_interval: secs(
                "GAZETTE_MAINTENANCE_INTERVAL_SECS",
                defaults.scheduler.maintenance_interval,
            ),
            resume_on_start: lookup("GAZETTE_RESUME_ON_START")
                .map(|raw| parse_flag(&raw))
                .unwrap_or(defaults.scheduler.resume_on_start),
        };

        let executor = ExecutorConfig {
            pool_size: read(&lookup, "GAZETTE_POOL_SIZE").unwrap_or(defaults.executor.pool_size),
            generation_timeout: match read::<u64, _>(&lookup, "GAZETTE_GENERATION_TIMEOUT_SECS") {
                Some(0) => None,
                Some(timeout) => Some(Duration::from_secs(timeout)),
                None => defaults.executor.generation_timeout,
            },
        };

        let retry = RetryPolicy {
            base_delay: secs("GAZETTE_RETRY_BASE_DELAY_SECS", defaults.retry.base_delay),
            max_attempts: read(&lookup, "GAZETTE_RETRY_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts),
        };

        let rate_limit = RateLimitConfig {
            max_requests: read(&lookup, "GAZETTE_RATE_LIMIT_MAX_REQUESTS")
                .unwrap_or(defaults.rate_limit.max_requests),
            window: secs("GAZETTE_RATE_LIMIT_WINDOW_SECS", defaults.rate_limit.window),
        };

        let cache = CacheConfig {
            capacity: read(&lookup, "GAZETTE_CACHE_CAPACITY").unwrap_or(defaults.cache.capacity),
        };

        let output_dir = lookup("GAZETTE_OUTPUT_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        Self {
            scheduler,
            executor,
            retry,
            rate_limit,
            cache,
            output_dir,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.pool_size == 0 {
            return Err(ConfigError::Zero {
                key: "GAZETTE_POOL_SIZE",
            });
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::Zero {
                key: "GAZETTE_RATE_LIMIT_MAX_REQUESTS",
            });
        }
        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::Zero {
                key: "GAZETTE_RATE_LIMIT_WINDOW_SECS",
            });
        }
        if self.scheduler.maintenance_interval.is_zero() {
            return Err(ConfigError::Zero {
                key: "GAZETTE_MAINTENANCE_INTERVAL_SECS",
            });
        }
        if self.scheduler.utc_offset_minutes.abs() >= MAX_UTC_OFFSET_MINUTES {
            return Err(ConfigError::OutOfRange {
                key: "GAZETTE_SCHEDULER_UTC_OFFSET_MINUTES",
                value: i64::from(self.scheduler.utc_offset_minutes),
            });
        }
        Ok(())
    }
}

// ============================================================================
// helpers
// ============================================================================

fn read<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|raw| parse_or_warn(key, &raw))
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = raw, "unparsable config value; using default");
            None
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> GazetteConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GazetteConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_production_values() {
        let config = GazetteConfig::default();
        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.run_at, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(config.scheduler.maintenance_interval, Duration::from_secs(3600));
        assert_eq!(config.executor.pool_size, 3);
        assert_eq!(config.executor.generation_timeout, None);
        assert_eq!(config.retry, RetryPolicy::new(Duration::from_secs(60), 3));
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(from_pairs(&[]), GazetteConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = from_pairs(&[
            ("GAZETTE_SCHEDULER_ENABLED", "false"),
            ("GAZETTE_SCHEDULER_HOUR", "7"),
            ("GAZETTE_SCHEDULER_MINUTE", "30"),
            ("GAZETTE_SCHEDULER_UTC_OFFSET_MINUTES", "540"),
            ("GAZETTE_MAINTENANCE_INTERVAL_SECS", "120"),
            ("GAZETTE_RESUME_ON_START", "no"),
            ("GAZETTE_POOL_SIZE", "5"),
            ("GAZETTE_GENERATION_TIMEOUT_SECS", "900"),
            ("GAZETTE_RETRY_BASE_DELAY_SECS", "10"),
            ("GAZETTE_RETRY_MAX_ATTEMPTS", "6"),
            ("GAZETTE_RATE_LIMIT_MAX_REQUESTS", "20"),
            ("GAZETTE_RATE_LIMIT_WINDOW_SECS", "30"),
            ("GAZETTE_CACHE_CAPACITY", "8"),
            ("GAZETTE_OUTPUT_DIR", "/var/lib/gazette"),
        ]);

        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.run_at, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(config.scheduler.utc_offset_minutes, 540);
        assert_eq!(config.scheduler.maintenance_interval, Duration::from_secs(120));
        assert!(!config.scheduler.resume_on_start);
        assert_eq!(config.executor.pool_size, 5);
        assert_eq!(config.executor.generation_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.retry, RetryPolicy::new(Duration::from_secs(10), 6));
        assert_eq!(config.rate_limit.max_requests, 20);
        assert_eq!(config.rate_limit.window, Duration::from_secs(30));
        assert_eq!(config.cache.capacity, 8);
        assert_eq!(config.output_dir, PathBuf::from("/var/lib/gazette"));
    }

    #[rstest]
    #[case("GAZETTE_POOL_SIZE", "many")]
    #[case("GAZETTE_SCHEDULER_HOUR", "25")]
    #[case("GAZETTE_SCHEDULER_MINUTE", "-1")]
    #[case("GAZETTE_RATE_LIMIT_WINDOW_SECS", "1.5")]
    fn garbage_falls_back_to_defaults(#[case] key: &str, #[case] value: &str) {
        assert_eq!(from_pairs(&[(key, value)]), GazetteConfig::default());
    }

    #[test]
    fn zero_timeout_means_none() {
        let config = from_pairs(&[("GAZETTE_GENERATION_TIMEOUT_SECS", "0")]);
        assert_eq!(config.executor.generation_timeout, None);
    }

    #[rstest]
    #[case("GAZETTE_POOL_SIZE", "0")]
    #[case("GAZETTE_RATE_LIMIT_MAX_REQUESTS", "0")]
    #[case("GAZETTE_RATE_LIMIT_WINDOW_SECS", "0")]
    #[case("GAZETTE_MAINTENANCE_INTERVAL_SECS", "0")]
    fn zero_values_fail_validation(#[case] key: &'static str, #[case] value: &str) {
        let config = from_pairs(&[(key, value)]);
        assert_eq!(config.validate(), Err(ConfigError::Zero { key }));
    }

    #[test]
    fn absurd_offset_fails_validation() {
        let config = from_pairs(&[("GAZETTE_SCHEDULER_UTC_OFFSET_MINUTES", "1440")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { value: 1440, .. })
        ));
    }
}
