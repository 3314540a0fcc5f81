//! Job status state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a generation job.
///
/// State transitions:
/// - Pending -> Generating -> Completed
/// - Pending -> Generating -> Failed -> Pending (retry policy or manual retry)
///
/// `Completed` is absorbing. It is only replaced by an explicit regeneration,
/// which deletes the record instead of transitioning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker slot.
    Pending,

    /// A worker is running the generation engine.
    Generating,

    /// Artifact written; `artifact_path` is set.
    Completed,

    /// Last attempt failed. Waiting for a retry, or permanently failed once
    /// the automatic attempts are used up.
    Failed,
}

impl JobStatus {
    /// Pending or generating: at most one such job per (owner, date).
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Generating)
    }

    /// No automatic transition leaves this status without outside help.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Generating)
                | (JobStatus::Generating, JobStatus::Completed)
                | (JobStatus::Generating, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "generating" => Ok(JobStatus::Generating),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
