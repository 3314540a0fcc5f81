//! Generation job record and status updates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StoreError;
use super::ids::{JobId, OwnerId, PublicJobId};
use super::status::JobStatus;

/// One unit of generation work: the digest of `owner_id` for `date`.
///
/// Design:
/// - The JobStore holds the single source of truth for this record.
/// - Status changes go through [`StatusUpdate`] so every store enforces the
///   same state machine with compare-and-set semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub public_id: PublicJobId,
    pub owner_id: OwnerId,
    pub date: NaiveDate,
    pub status: JobStatus,

    /// Where the engine wrote the artifact. Set once the job completes.
    pub artifact_path: Option<String>,

    /// Failed attempts in the current automatic series.
    pub retry_count: u32,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Fields a caller supplies when creating a job. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub public_id: PublicJobId,
    pub owner_id: OwnerId,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl GenerationJob {
    /// Build the initial `pending` record for a freshly created job.
    pub fn pending(id: JobId, new: NewJob) -> Self {
        Self {
            id,
            public_id: new.public_id,
            owner_id: new.owner_id,
            date: new.date,
            status: JobStatus::Pending,
            artifact_path: None,
            retry_count: 0,
            last_error: None,
            created_at: new.created_at,
            updated_at: new.created_at,
            generated_at: None,
        }
    }

    /// Apply a status update (compare-and-set on the current status).
    ///
    /// The record is left untouched when this returns an error.
    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.status != update.expected {
            return Err(StoreError::Conflict {
                job: self.id,
                expected: update.expected,
                actual: self.status,
            });
        }
        if let Some(expected) = update.expected_retry_count {
            if self.retry_count != expected {
                return Err(StoreError::SeriesChanged {
                    job: self.id,
                    expected,
                    actual: self.retry_count,
                });
            }
        }
        if !self.status.can_transition_to(update.status) {
            return Err(StoreError::IllegalTransition {
                from: self.status,
                to: update.status,
            });
        }

        self.status = update.status;
        match update.retry_count {
            RetryCountChange::Keep => {}
            RetryCountChange::Increment => self.retry_count = self.retry_count.saturating_add(1),
            RetryCountChange::Reset => self.retry_count = 0,
        }
        match update.status {
            JobStatus::Completed => {
                self.artifact_path = update.artifact_path.clone();
                self.generated_at = Some(now);
                self.last_error = None;
            }
            JobStatus::Failed => self.last_error = update.error.clone(),
            JobStatus::Pending | JobStatus::Generating => {}
        }
        self.updated_at = now;
        Ok(())
    }
}

/// What happens to `retry_count` alongside a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCountChange {
    Keep,
    Increment,
    Reset,
}

/// A compare-and-set status write: applies only if the job is still in
/// `expected` (and, when set, still at `expected_retry_count`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub expected: JobStatus,
    pub expected_retry_count: Option<u32>,
    pub status: JobStatus,
    pub artifact_path: Option<String>,
    pub retry_count: RetryCountChange,
    pub error: Option<String>,
}

impl StatusUpdate {
    fn transition(expected: JobStatus, status: JobStatus) -> Self {
        Self {
            expected,
            expected_retry_count: None,
            status,
            artifact_path: None,
            retry_count: RetryCountChange::Keep,
            error: None,
        }
    }

    /// A worker takes a pending job.
    pub fn claim() -> Self {
        Self::transition(JobStatus::Pending, JobStatus::Generating)
    }

    pub fn complete(artifact_path: impl Into<String>) -> Self {
        Self {
            artifact_path: Some(artifact_path.into()),
            ..Self::transition(JobStatus::Generating, JobStatus::Completed)
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            retry_count: RetryCountChange::Increment,
            error: Some(error.into()),
            ..Self::transition(JobStatus::Generating, JobStatus::Failed)
        }
    }

    /// Automatic re-queue after a backoff delay; continues the series.
    ///
    /// Only applies while the job still has the `retry_count` the re-queue was
    /// decided on. A manual retry or a newer failure in between makes it stale.
    pub fn requeue(retry_count: u32) -> Self {
        Self {
            expected_retry_count: Some(retry_count),
            ..Self::transition(JobStatus::Failed, JobStatus::Pending)
        }
    }

    /// Human-triggered retry; starts a fresh backoff series.
    pub fn manual_retry() -> Self {
        Self {
            retry_count: RetryCountChange::Reset,
            ..Self::transition(JobStatus::Failed, JobStatus::Pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, hour, 0, 0).unwrap()
    }

    fn pending_job() -> GenerationJob {
        GenerationJob::pending(
            JobId::new(1),
            NewJob {
                public_id: PublicJobId::from_ulid(Ulid::new()),
                owner_id: OwnerId::new(7),
                date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
                created_at: at(6),
            },
        )
    }

    #[test]
    fn new_job_starts_pending_without_artifact() {
        let job = pending_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.artifact_path.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn success_path_records_artifact() {
        let mut job = pending_job();
        job.apply(&StatusUpdate::claim(), at(7)).unwrap();
        job.apply(&StatusUpdate::complete("output/7/2025-03-14.html"), at(8))
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.artifact_path.as_deref(), Some("output/7/2025-03-14.html"));
        assert_eq!(job.generated_at, Some(at(8)));
        assert_eq!(job.updated_at, at(8));
    }

    #[test]
    fn failure_increments_and_requeue_keeps_count() {
        let mut job = pending_job();
        job.apply(&StatusUpdate::claim(), at(7)).unwrap();
        job.apply(&StatusUpdate::fail("feed timeout"), at(7)).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.last_error.as_deref(), Some("feed timeout"));

        job.apply(&StatusUpdate::requeue(1), at(8)).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn requeue_from_an_older_series_is_rejected() {
        let mut job = pending_job();
        job.apply(&StatusUpdate::claim(), at(7)).unwrap();
        job.apply(&StatusUpdate::fail("feed timeout"), at(7)).unwrap();
        let decided_at = job.retry_count;

        // 手動 retry の後、新しい series で 2 回失敗した
        job.apply(&StatusUpdate::manual_retry(), at(8)).unwrap();
        job.apply(&StatusUpdate::claim(), at(8)).unwrap();
        job.apply(&StatusUpdate::fail("feed timeout"), at(8)).unwrap();
        job.apply(&StatusUpdate::requeue(1), at(8)).unwrap();
        job.apply(&StatusUpdate::claim(), at(8)).unwrap();
        job.apply(&StatusUpdate::fail("feed timeout"), at(8)).unwrap();
        let before = job.clone();

        let err = job
            .apply(&StatusUpdate::requeue(decided_at), at(9))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::SeriesChanged {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert_eq!(job, before);
    }

    #[test]
    fn manual_retry_resets_the_series() {
        let mut job = pending_job();
        for _ in 0..3 {
            job.apply(&StatusUpdate::claim(), at(7)).unwrap();
            job.apply(&StatusUpdate::fail("boom"), at(7)).unwrap();
            if job.retry_count < 3 {
                job.apply(&StatusUpdate::requeue(job.retry_count), at(7)).unwrap();
            }
        }
        assert_eq!(job.retry_count, 3);

        job.apply(&StatusUpdate::manual_retry(), at(9)).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn stale_update_is_a_conflict_and_changes_nothing() {
        let mut job = pending_job();
        let before = job.clone();

        let err = job
            .apply(&StatusUpdate::complete("x.html"), at(7))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: JobStatus::Generating,
                actual: JobStatus::Pending,
                ..
            }
        ));
        assert_eq!(job, before);
    }

    #[test]
    fn completed_is_absorbing() {
        let mut job = pending_job();
        job.apply(&StatusUpdate::claim(), at(7)).unwrap();
        job.apply(&StatusUpdate::complete("x.html"), at(7)).unwrap();

        let sneaky = StatusUpdate {
            expected: JobStatus::Completed,
            ..StatusUpdate::requeue(0)
        };
        let err = job.apply(&sneaky, at(8)).unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
        assert_eq!(job.status, JobStatus::Completed);
    }
}
