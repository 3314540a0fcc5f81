//! App - アプリケーション層
//!
//! ports を組み合わせてオーケストレーションを実装する。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: ワイヤリングと起動時検証
//! - **Orchestrator**: enqueue / regenerate / retry（呼び出し側に公開する操作）
//! - **GenerationExecutor**: 固定サイズの worker プール
//! - **RetryPolicy**: 指数バックオフと自動リトライ上限
//! - **Scheduler**: 日次 fan-out とメンテナンスのタイマー
//! - **RateLimiter**: スライディングウィンドウ制限
//! - **ArtifactCache**: artifact の LRU キャッシュ

pub mod builder;
pub mod cache;
pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::cache::{ArtifactCache, CacheConfig, CacheStats};
pub use self::executor::{ExecutorConfig, GenerationExecutor};
pub use self::metrics::{GenerationMetrics, MetricsSnapshot};
pub use self::orchestrator::{FanOutReport, Orchestrator, RegenerateOptions};
pub use self::rate_limiter::{RateDecision, RateLimitConfig, RateLimiter};
pub use self::retry::{RetryDecision, RetryPolicy};
pub use self::scheduler::{Scheduler, SchedulerConfig};
pub use self::status::SchedulerStatus;
