//! gazette-core
//!
//! 日次ダイジェスト生成ジョブのオーケストレーション。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, job, errors）
//! - **ports**: 抽象化レイヤー（JobStore, GenerationEngine, OwnerDirectory, ContentStore, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryJobStore など開発用）
//! - **app**: アプリケーションロジック（orchestrator, executor, scheduler, rate_limiter, cache, builder）
//! - **config**: 環境変数からの設定
//! - **observability**: tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

#[cfg(test)]
mod test_support;

pub use self::app::{App, AppBuilder, BuildError};
pub use self::config::{ConfigError, GazetteConfig};
pub use self::domain::{ErrorKind, GazetteError};
