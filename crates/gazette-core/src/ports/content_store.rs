//! ContentStore port - 生成済み artifact の永続ストレージ
//!
//! 書き込みは生成エンジン（worker 経由）が直接行う。
//! ここでは ArtifactCache の miss 時に使う読み込みだけを定義する。

use async_trait::async_trait;

use crate::domain::ContentStoreError;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read the bytes stored at `location`. `Ok(None)` when nothing is there.
    async fn read(&self, location: &str) -> Result<Option<Vec<u8>>, ContentStoreError>;
}
