//! JobStore port - job の正本（source of truth）
//!
//! # 設計原則
//! - (owner, date) の組に対して job は高々 1 件（一意制約）
//! - 状態遷移は compare-and-set（`StatusUpdate::expected`）で行い、
//!   グローバルロックなしで worker と regenerate の競合を解決する
//! - worker はそれぞれ `session()` で独立したハンドルを持つ

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{
    GenerationJob, JobId, JobStatus, NewJob, OwnerId, PublicJobId, StatusUpdate, StoreError,
};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `pending` job.
    ///
    /// Fails with [`StoreError::Duplicate`] (carrying the existing record) when
    /// a job for the same (owner, date) is already stored.
    async fn create(&self, job: NewJob) -> Result<GenerationJob, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<GenerationJob>, StoreError>;

    async fn get_by_owner_and_date(
        &self,
        owner: OwnerId,
        date: NaiveDate,
    ) -> Result<Option<GenerationJob>, StoreError>;

    async fn get_by_public_id(
        &self,
        public_id: PublicJobId,
    ) -> Result<Option<GenerationJob>, StoreError>;

    /// Jobs of one owner within a calendar month, ordered by date.
    async fn list_by_owner_and_month(
        &self,
        owner: OwnerId,
        year: i32,
        month: u32,
    ) -> Result<Vec<GenerationJob>, StoreError>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<GenerationJob>, StoreError>;

    /// Compare-and-set status write. Returns the updated record.
    async fn update_status(
        &self,
        id: JobId,
        update: StatusUpdate,
    ) -> Result<GenerationJob, StoreError>;

    /// Delete the job only if it is still in `expected`.
    async fn delete(&self, id: JobId, expected: JobStatus) -> Result<(), StoreError>;

    /// An independent handle for one worker.
    fn session(&self) -> Arc<dyn JobStore>;
}
