//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部の協調者
//! （job の永続化、生成エンジン、プロファイル、artifact ストレージ）への
//! インターフェースで、実装の詳細を隠す。
//!
//! # 設計原則
//! - JobStore が source of truth（正本）
//! - ArtifactCache は ContentStore の前に置く読み込み専用キャッシュ
//! - 時刻と ID 生成も port にしてテストで差し替える

pub mod clock;
pub mod content_store;
pub mod engine;
pub mod id_generator;
pub mod job_store;
pub mod owner_directory;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::content_store::ContentStore;
pub use self::engine::{GenerationEngine, GenerationRequest, OwnerContext};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::JobStore;
pub use self::owner_directory::OwnerDirectory;
