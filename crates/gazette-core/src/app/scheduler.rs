//! Scheduler - 日次 fan-out とメンテナンスのタイマー
//!
//! 2 本のループを worker プールの外で回す：
//! - **daily**: 毎日 `run_at`（UTC オフセット指定）に全 owner を enqueue
//! - **maintenance**: `maintenance_interval` ごとに RateLimiter を sweep
//!
//! fan-out 自体は別 task に投げるので、タイマーが生成処理を待つことはない。
//! 停止は watch channel で通知し、両ループの終了を待つ。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeDelta, TimeZone, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

use crate::app::orchestrator::{FanOutReport, Orchestrator};
use crate::app::rate_limiter::RateLimiter;
use crate::app::status::SchedulerStatus;
use crate::domain::GazetteError;
use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub enabled: bool,

    /// Local time of the daily fan-out.
    pub run_at: NaiveTime,

    /// Offset of the local time zone from UTC, in minutes.
    pub utc_offset_minutes: i32,

    /// Period of the rate-limiter sweep. The first sweep happens one period after start.
    pub maintenance_interval: Duration,

    /// Resubmit unfinished jobs from a previous run on start.
    pub resume_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_at: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            utc_offset_minutes: 0,
            maintenance_interval: Duration::from_secs(3600),
            resume_on_start: true,
        }
    }
}

impl SchedulerConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
    }

    /// The first daily run strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let offset = self.offset();
        let local_now = now.with_timezone(&offset);
        let today = local_now.date_naive().and_time(self.run_at);

        let candidate = match offset.from_local_datetime(&today).single() {
            Some(candidate) => candidate.with_timezone(&Utc),
            None => return now + TimeDelta::days(1),
        };
        if candidate > now {
            candidate
        } else {
            candidate + TimeDelta::days(1)
        }
    }

    /// The local calendar date a run firing at `at` is for.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset()).date_naive()
    }
}

struct RunningLoops {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    orchestrator: Arc<Orchestrator>,
    rate_limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    running: Mutex<Option<RunningLoops>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        orchestrator: Arc<Orchestrator>,
        rate_limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            rate_limiter,
            clock,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start both timers. No-op when disabled or already running.
    pub async fn start(&self) -> Result<(), GazetteError> {
        if !self.config.enabled {
            info!("scheduler disabled; not starting");
            return Ok(());
        }

        {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if running.is_some() {
                debug!("scheduler already running");
                return Ok(());
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let joins = vec![
                tokio::spawn(daily_loop(
                    self.config.clone(),
                    Arc::clone(&self.orchestrator),
                    Arc::clone(&self.clock),
                    shutdown_rx.clone(),
                )),
                tokio::spawn(maintenance_loop(
                    self.config.maintenance_interval,
                    Arc::clone(&self.rate_limiter),
                    shutdown_rx,
                )),
            ];
            *running = Some(RunningLoops { shutdown_tx, joins });
        }

        info!(
            run_at = %self.config.run_at,
            utc_offset_minutes = self.config.utc_offset_minutes,
            next_run = %self.next_run_after(self.clock.now()),
            "scheduler started"
        );

        if self.config.resume_on_start {
            self.orchestrator.resume_pending().await?;
        }
        Ok(())
    }

    /// Stop both timers and wait for them. Idempotent. Running jobs are not affected.
    pub async fn stop(&self) {
        let loops = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(loops) = loops else {
            return;
        };

        // ignore send error: loops may already have exited
        let _ = loops.shutdown_tx.send(true);
        for join in loops.joins {
            if let Err(err) = join.await {
                error!(error = %err, "scheduler loop ended abnormally");
            }
        }
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn status(&self) -> SchedulerStatus {
        let executor = self.orchestrator.executor();
        SchedulerStatus {
            running: self.is_running(),
            active_jobs: executor.active_jobs(),
            queued_jobs: executor.queued_jobs(),
        }
    }

    /// Run the fan-out for `date` now, outside the daily timer.
    pub async fn trigger_now(&self, date: NaiveDate) -> Result<FanOutReport, GazetteError> {
        info!(%date, "manual fan-out triggered");
        self.orchestrator.fan_out(date).await
    }

    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.config.next_run_after(now)
    }
}

async fn daily_loop(
    config: SchedulerConfig,
    orchestrator: Arc<Orchestrator>,
    clock: Arc<dyn Clock>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut last_fired: Option<DateTime<Utc>> = None;

    loop {
        let now = clock.now();
        let base = last_fired.map_or(now, |fired| fired.max(now));
        let next = config.next_run_after(base);
        let wait = (next - now).to_std().unwrap_or_default();
        debug!(next_run = %next, wait_secs = wait.as_secs(), "waiting for daily run");

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(wait) => {
                last_fired = Some(next);
                let date = config.local_date(next);
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    if let Err(err) = orchestrator.fan_out(date).await {
                        error!(%date, kind = ?err.kind(), error = %err, "daily fan-out failed");
                    }
                });
            }
        }
    }
    debug!("daily loop stopped");
}

async fn maintenance_loop(
    period: Duration,
    rate_limiter: Arc<RateLimiter>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let removed = rate_limiter.sweep();
                debug!(
                    removed,
                    tracked = rate_limiter.tracked_identifiers(),
                    "rate limiter maintenance"
                );
            }
        }
    }
    debug!("maintenance loop stopped");
}
