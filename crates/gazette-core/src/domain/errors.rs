//! Errors - エラー型と分類
//!
//! - **GazetteError**: オーケストレーション層のエラー（閉じた集合、`kind()` で分類）
//! - **GenerationError**: 生成エンジン側の失敗（worker 境界で job の failed 書き込みに変換）
//! - **StoreError**: JobStore の失敗（重複・CAS 競合・不正遷移など）
//! - **ContentStoreError**: 永続コンテンツの読み込み失敗（not found はエラーではない）

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::ids::{JobId, OwnerId};
use super::job::GenerationJob;
use super::status::JobStatus;

/// ErrorKind は GazetteError の判別子
///
/// worker 境界やログで網羅的に扱うために使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OwnerNotFound,
    NoWorkToDo,
    JobNotFound,
    GenerationFailure,
    MaxRetriesExceeded,
    RateLimitExceeded,
    /// JobStore のインフラ障害
    Store,
}

#[derive(Debug, Error)]
pub enum GazetteError {
    #[error("owner not found: {0}")]
    OwnerNotFound(OwnerId),

    #[error("{0} has no interests configured")]
    NoWorkToDo(OwnerId),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("generation failed for {job}: {source}")]
    GenerationFailure {
        job: JobId,
        #[source]
        source: GenerationError,
    },

    #[error("{job} used up {attempts} automatic attempts; manual retry required")]
    MaxRetriesExceeded { job: JobId, attempts: u32 },

    #[error("rate limit exceeded for {identifier}; retry after {}s", .retry_after.as_secs())]
    RateLimitExceeded {
        identifier: String,
        retry_after: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GazetteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GazetteError::OwnerNotFound(_) => ErrorKind::OwnerNotFound,
            GazetteError::NoWorkToDo(_) => ErrorKind::NoWorkToDo,
            GazetteError::JobNotFound(_) => ErrorKind::JobNotFound,
            GazetteError::GenerationFailure { .. } => ErrorKind::GenerationFailure,
            GazetteError::MaxRetriesExceeded { .. } => ErrorKind::MaxRetriesExceeded,
            GazetteError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            GazetteError::Store(_) => ErrorKind::Store,
        }
    }

    /// Rejections are expected outcomes, not faults.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimitExceeded | ErrorKind::NoWorkToDo
        )
    }
}

/// Failure reported by (or around) the generation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("engine error: {0}")]
    Engine(String),

    #[error("engine did not return within {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("engine panicked: {0}")]
    Panicked(String),

    #[error("owner context unavailable: {0}")]
    Context(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a job already exists for {} on {}", .0.owner_id, .0.date)]
    Duplicate(Box<GenerationJob>),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("status conflict on {job}: expected {expected}, found {actual}")]
    Conflict {
        job: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("retry series changed on {job}: expected retry_count {expected}, found {actual}")]
    SeriesChanged { job: JobId, expected: u32, actual: u32 },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("failed to read artifact {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact location escapes the content root: {0}")]
    OutsideRoot(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_discriminates_every_variant() {
        let cases = [
            (GazetteError::OwnerNotFound(OwnerId::new(1)), ErrorKind::OwnerNotFound),
            (GazetteError::NoWorkToDo(OwnerId::new(1)), ErrorKind::NoWorkToDo),
            (GazetteError::JobNotFound("digest-x".into()), ErrorKind::JobNotFound),
            (
                GazetteError::GenerationFailure {
                    job: JobId::new(3),
                    source: GenerationError::Engine("boom".into()),
                },
                ErrorKind::GenerationFailure,
            ),
            (
                GazetteError::MaxRetriesExceeded {
                    job: JobId::new(3),
                    attempts: 3,
                },
                ErrorKind::MaxRetriesExceeded,
            ),
            (
                GazetteError::RateLimitExceeded {
                    identifier: "owner#1".into(),
                    retry_after: Duration::from_secs(60),
                },
                ErrorKind::RateLimitExceeded,
            ),
            (
                GazetteError::Store(StoreError::Backend("down".into())),
                ErrorKind::Store,
            ),
        ];

        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn rejections_are_not_faults() {
        let limited = GazetteError::RateLimitExceeded {
            identifier: "owner#1".into(),
            retry_after: Duration::from_secs(60),
        };
        assert!(limited.is_rejection());
        assert!(limited.to_string().contains("retry after 60s"));
        assert!(!GazetteError::JobNotFound("x".into()).is_rejection());
    }

    #[test]
    fn generation_failure_keeps_engine_error_as_source() {
        let err = GazetteError::GenerationFailure {
            job: JobId::new(9),
            source: GenerationError::TimedOut(Duration::from_secs(5)),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "engine did not return within 5s");
    }
}
