//! GenerationEngine port - 外部のダイジェスト生成エンジン
//!
//! エンジンはブラックボックス：遅い（数秒〜数十分）、中身は不透明、キャンセル不可。
//! 同期的にブロックする実装は `tokio::task::spawn_blocking` で包むこと。

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{GenerationError, OwnerId};

/// What the engine needs to know about the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerContext {
    pub id: OwnerId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub owner: OwnerContext,
    pub interests: Vec<String>,
    pub date: NaiveDate,
}

/// Must be safe to call concurrently from independent workers.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Produce the artifact and return its location in the content store.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}
