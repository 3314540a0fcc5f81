//! Status - 実行状況のスナップショット

use serde::{Deserialize, Serialize};

/// What `App::status()` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the daily and maintenance timers are running.
    pub running: bool,
    /// Jobs currently inside an engine call.
    pub active_jobs: usize,
    /// Jobs waiting for a free worker.
    pub queued_jobs: usize,
}
