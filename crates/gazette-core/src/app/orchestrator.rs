//! Orchestrator - 呼び出し側に公開する操作（enqueue / regenerate / retry）
//!
//! # 不変条件
//! - (owner, date) の job は高々 1 件。JobStore の一意制約に頼り、
//!   `Duplicate` は「既存 job を返す」に読み替える
//! - 新しく作られた job だけが executor に 1 回 submit される
//! - 状態の書き換えはすべて CAS（`StatusUpdate` / `delete(id, expected)`）
//!   なので、worker や他の呼び出しと競合してもロックは要らない
//!
//! # regenerate
//! `generating` の job には触らない。`completed` は明示的な override が
//! なければ no-op。`pending` / `failed` は削除してから作り直すが、削除直後に
//! もう一度 (owner, date) を確認し、並行呼び出しが先に作っていればそれに従う。

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::executor::GenerationExecutor;
use crate::app::metrics::MetricsSnapshot;
use crate::app::retry::RetryPolicy;
use crate::domain::{
    GazetteError, GenerationJob, JobStatus, NewJob, OwnerId, PublicJobId, StatusUpdate, StoreError,
};
use crate::ports::{Clock, IdGenerator, JobStore, OwnerDirectory};

/// Options for [`Orchestrator::regenerate_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegenerateOptions {
    /// Replace a `completed` job as well. Off by default.
    pub override_completed: bool,
}

/// Outcome of one fan-out over every owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    /// Jobs created and submitted.
    pub queued: usize,
    /// Owners that already had a job for the date.
    pub existing: usize,
    /// Owners without interests.
    pub skipped: usize,
    pub errors: usize,
}

enum Creation {
    Created(GenerationJob),
    Existing(GenerationJob),
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    owners: Arc<dyn OwnerDirectory>,
    executor: Arc<GenerationExecutor>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        owners: Arc<dyn OwnerDirectory>,
        executor: Arc<GenerationExecutor>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            owners,
            executor,
            ids,
            clock,
        }
    }

    pub fn executor(&self) -> &Arc<GenerationExecutor> {
        &self.executor
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.executor.metrics()
    }

    /// Return the job for (owner, date), creating and submitting it if none exists.
    pub async fn enqueue(&self, owner: OwnerId, date: NaiveDate) -> Result<GenerationJob, GazetteError> {
        self.ensure_owner(owner).await?;

        if let Some(existing) = self.store.get_by_owner_and_date(owner, date).await? {
            debug!(job_id = %existing.id, status = %existing.status, "job already exists");
            return Ok(existing);
        }
        self.ensure_interests(owner).await?;

        match self.create(owner, date).await? {
            Creation::Created(job) => {
                self.executor.submit(job.id);
                Ok(job)
            }
            Creation::Existing(job) => Ok(job),
        }
    }

    /// [`regenerate_with`](Self::regenerate_with) with default options.
    pub async fn regenerate(&self, owner: OwnerId, date: NaiveDate) -> Result<bool, GazetteError> {
        self.regenerate_with(owner, date, RegenerateOptions::default())
            .await
    }

    /// Replace the job for (owner, date) with a fresh `pending` one.
    ///
    /// Returns `true` only if this call created the new job.
    pub async fn regenerate_with(
        &self,
        owner: OwnerId,
        date: NaiveDate,
        options: RegenerateOptions,
    ) -> Result<bool, GazetteError> {
        self.ensure_owner(owner).await?;

        if let Some(current) = self.store.get_by_owner_and_date(owner, date).await? {
            match current.status {
                JobStatus::Generating => {
                    debug!(job_id = %current.id, "job is generating; not regenerated");
                    return Ok(false);
                }
                JobStatus::Completed if !options.override_completed => {
                    debug!(job_id = %current.id, "job already completed; not regenerated");
                    return Ok(false);
                }
                _ => {}
            }
            self.ensure_interests(owner).await?;

            match self.store.delete(current.id, current.status).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(StoreError::Conflict { actual, .. }) => {
                    debug!(job_id = %current.id, status = %actual, "job changed underneath regenerate");
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            }

            // 削除直後の再確認: 並行する regenerate が先に作っていればそれを使う
            if let Some(winner) = self.store.get_by_owner_and_date(owner, date).await? {
                debug!(job_id = %winner.id, "concurrent regenerate already created a job");
                return Ok(false);
            }
        } else {
            self.ensure_interests(owner).await?;
        }

        match self.create(owner, date).await? {
            Creation::Created(job) => {
                info!(job_id = %job.id, owner_id = %owner, %date, "job regenerated");
                self.executor.submit(job.id);
                Ok(true)
            }
            Creation::Existing(_) => Ok(false),
        }
    }

    /// Manually move a `failed` job back to `pending`, starting a fresh retry series.
    ///
    /// Jobs in any other status are returned unchanged.
    pub async fn retry(&self, public_id: PublicJobId) -> Result<GenerationJob, GazetteError> {
        let job = self
            .store
            .get_by_public_id(public_id)
            .await?
            .ok_or_else(|| GazetteError::JobNotFound(public_id.to_string()))?;

        if job.status != JobStatus::Failed {
            debug!(job_id = %job.id, status = %job.status, "retry ignored; job is not failed");
            return Ok(job);
        }

        match self.store.update_status(job.id, StatusUpdate::manual_retry()).await {
            Ok(requeued) => {
                info!(job_id = %requeued.id, "manual retry requested");
                self.executor.submit(requeued.id);
                Ok(requeued)
            }
            // 自動リトライと競合した場合は最新の状態を返す
            Err(StoreError::Conflict { .. }) => self
                .store
                .get(job.id)
                .await?
                .ok_or_else(|| GazetteError::JobNotFound(public_id.to_string())),
            Err(StoreError::NotFound(_)) => Err(GazetteError::JobNotFound(public_id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn job(&self, public_id: PublicJobId) -> Result<GenerationJob, GazetteError> {
        self.store
            .get_by_public_id(public_id)
            .await?
            .ok_or_else(|| GazetteError::JobNotFound(public_id.to_string()))
    }

    /// Calendar view: one owner's jobs in a month, ordered by date.
    pub async fn jobs_for_month(
        &self,
        owner: OwnerId,
        year: i32,
        month: u32,
    ) -> Result<Vec<GenerationJob>, GazetteError> {
        Ok(self.store.list_by_owner_and_month(owner, year, month).await?)
    }

    /// Enqueue `date` for every owner. One owner's failure does not stop the rest.
    pub async fn fan_out(&self, date: NaiveDate) -> Result<FanOutReport, GazetteError> {
        let owners = self.owners.list_owners().await?;
        let mut report = FanOutReport::default();

        for owner in owners {
            if let Err(err) = self.ensure_interests(owner.id).await {
                if err.is_rejection() {
                    report.skipped += 1;
                } else {
                    warn!(owner_id = %owner.id, error = %err, "fan-out failed for owner");
                    report.errors += 1;
                }
                continue;
            }
            match self.store.get_by_owner_and_date(owner.id, date).await {
                Ok(Some(_)) => {
                    report.existing += 1;
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(owner_id = %owner.id, error = %err, "fan-out failed for owner");
                    report.errors += 1;
                    continue;
                }
            }
            match self.create(owner.id, date).await {
                Ok(Creation::Created(job)) => {
                    self.executor.submit(job.id);
                    report.queued += 1;
                }
                Ok(Creation::Existing(_)) => report.existing += 1,
                Err(err) => {
                    warn!(owner_id = %owner.id, error = %err, "fan-out failed for owner");
                    report.errors += 1;
                }
            }
        }

        info!(
            %date,
            queued = report.queued,
            existing = report.existing,
            skipped = report.skipped,
            errors = report.errors,
            "daily fan-out finished"
        );
        Ok(report)
    }

    /// Hand work left over from a previous run back to the executor.
    ///
    /// `pending` jobs are resubmitted; `failed` jobs with automatic attempts
    /// left are re-queued. Returns how many jobs were submitted.
    pub async fn resume_pending(&self) -> Result<usize, GazetteError> {
        let mut submitted = 0;

        for job in self.store.list_by_status(JobStatus::Pending).await? {
            if self.executor.submit(job.id) {
                submitted += 1;
            }
        }

        let policy: &RetryPolicy = self.executor.retry_policy();
        for job in self.store.list_by_status(JobStatus::Failed).await? {
            if !policy.has_attempts_left(job.retry_count) {
                continue;
            }
            match self
                .store
                .update_status(job.id, StatusUpdate::requeue(job.retry_count))
                .await
            {
                Ok(requeued) => {
                    if self.executor.submit(requeued.id) {
                        submitted += 1;
                    }
                }
                Err(
                    StoreError::Conflict { .. }
                    | StoreError::SeriesChanged { .. }
                    | StoreError::NotFound(_),
                ) => {}
                Err(err) => return Err(err.into()),
            }
        }

        if submitted > 0 {
            info!(submitted, "resumed unfinished jobs");
        }
        Ok(submitted)
    }

    async fn ensure_owner(&self, owner: OwnerId) -> Result<(), GazetteError> {
        match self.owners.get_owner(owner).await? {
            Some(_) => Ok(()),
            None => Err(GazetteError::OwnerNotFound(owner)),
        }
    }

    async fn ensure_interests(&self, owner: OwnerId) -> Result<(), GazetteError> {
        if self.owners.interests(owner).await?.is_empty() {
            return Err(GazetteError::NoWorkToDo(owner));
        }
        Ok(())
    }

    async fn create(&self, owner: OwnerId, date: NaiveDate) -> Result<Creation, GazetteError> {
        let new = NewJob {
            public_id: self.ids.generate_public_id(),
            owner_id: owner,
            date,
            created_at: self.clock.now(),
        };
        match self.store.create(new).await {
            Ok(job) => {
                info!(job_id = %job.id, public_id = %job.public_id, owner_id = %owner, %date, "job created");
                Ok(Creation::Created(job))
            }
            Err(StoreError::Duplicate(existing)) => Ok(Creation::Existing(*existing)),
            Err(err) => Err(err.into()),
        }
    }
}
