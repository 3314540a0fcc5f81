//! InMemoryJobStore - 開発・テスト用の JobStore
//!
//! # 実装詳細
//! - 1 つの `tokio::sync::Mutex` の中で、検索用インデックスと本体を同時に更新する
//! - (owner, date) の一意制約は `by_key` インデックスで強制
//! - 状態遷移は `GenerationJob::apply` に任せる（CAS + 遷移表の検証）
//! - `session()` は同じ状態を共有する新しいハンドルを返す

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use tokio::sync::Mutex;

use crate::domain::{
    GenerationJob, JobId, JobStatus, NewJob, OwnerId, PublicJobId, StatusUpdate, StoreError,
};
use crate::ports::{Clock, JobStore, SystemClock};

#[derive(Default)]
struct InMemoryJobState {
    jobs: HashMap<JobId, GenerationJob>,
    by_key: HashMap<(OwnerId, NaiveDate), JobId>,
    by_public_id: HashMap<PublicJobId, JobId>,
    next_id: u64,
}

impl InMemoryJobState {
    fn allocate_id(&mut self) -> JobId {
        self.next_id += 1;
        JobId::new(self.next_id)
    }

    fn remove(&mut self, id: JobId) -> Option<GenerationJob> {
        let job = self.jobs.remove(&id)?;
        self.by_key.remove(&(job.owner_id, job.date));
        self.by_public_id.remove(&job.public_id);
        Some(job)
    }
}

#[derive(Clone)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<InMemoryJobState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryJobState::default())),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<GenerationJob, StoreError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .by_key
            .get(&(new.owner_id, new.date))
            .and_then(|id| state.jobs.get(id))
        {
            return Err(StoreError::Duplicate(Box::new(existing.clone())));
        }

        let id = state.allocate_id();
        let job = GenerationJob::pending(id, new);
        state.by_key.insert((job.owner_id, job.date), id);
        state.by_public_id.insert(job.public_id, id);
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<GenerationJob>, StoreError> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn get_by_owner_and_date(
        &self,
        owner: OwnerId,
        date: NaiveDate,
    ) -> Result<Option<GenerationJob>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .by_key
            .get(&(owner, date))
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn get_by_public_id(
        &self,
        public_id: PublicJobId,
    ) -> Result<Option<GenerationJob>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .by_public_id
            .get(&public_id)
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn list_by_owner_and_month(
        &self,
        owner: OwnerId,
        year: i32,
        month: u32,
    ) -> Result<Vec<GenerationJob>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<GenerationJob> = state
            .jobs
            .values()
            .filter(|job| {
                job.owner_id == owner && job.date.year() == year && job.date.month() == month
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.date);
        Ok(jobs)
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<GenerationJob>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<GenerationJob> = state
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn update_status(
        &self,
        id: JobId,
        update: StatusUpdate,
    ) -> Result<GenerationJob, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.apply(&update, now)?;
        Ok(job.clone())
    }

    async fn delete(&self, id: JobId, expected: JobStatus) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let actual = state.jobs.get(&id).ok_or(StoreError::NotFound(id))?.status;
        if actual != expected {
            return Err(StoreError::Conflict {
                job: id,
                expected,
                actual,
            });
        }
        state.remove(id);
        Ok(())
    }

    fn session(&self) -> Arc<dyn JobStore> {
        Arc::new(self.clone())
    }
}
