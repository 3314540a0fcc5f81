//! OwnerDirectory port - 所有者と興味（interests）の読み取り専用ビュー
//!
//! プロファイルの CRUD は外部の責務。オーケストレータは存在確認と
//! interests の取得、全所有者の列挙だけを行う。

use async_trait::async_trait;

use crate::domain::{OwnerId, StoreError};
use crate::ports::OwnerContext;

#[async_trait]
pub trait OwnerDirectory: Send + Sync {
    async fn get_owner(&self, id: OwnerId) -> Result<Option<OwnerContext>, StoreError>;

    async fn interests(&self, id: OwnerId) -> Result<Vec<String>, StoreError>;

    async fn list_owners(&self) -> Result<Vec<OwnerContext>, StoreError>;
}
