//! GenerationExecutor - 固定サイズの worker プールで生成エンジンを実行する
//!
//! # フロー（1 job あたり）
//! 1. FIFO キューから JobId を受け取る（プールが埋まっていればキューで待つ）
//! 2. `StatusUpdate::claim()` で pending → generating（CAS。負けたら何もしない）
//! 3. OwnerDirectory から context と interests を読み、エンジンを呼ぶ
//! 4. 成功: completed + artifact_path / 失敗: failed + retry_count += 1
//! 5. 失敗時は RetryPolicy に判断を委ね、必要ならバックオフ後に再投入
//!
//! # 障害の隔離
//! エンジン呼び出しは別 task で実行するので、panic は `JoinError` として
//! worker 境界で捕まえて failed 書き込みに変換する。プール・タイマー・
//! 他の worker には伝播しない。
//!
//! # タイムアウト
//! `generation_timeout` を超えると job は failed になるが、エンジンは
//! キャンセルできないので呼び出し自体はバックグラウンドで走り続ける。
//! 長時間ハングするエンジンはその分のリソースを握り続ける点に注意。

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::metrics::{GenerationMetrics, MetricsSnapshot};
use crate::app::retry::{RetryDecision, RetryPolicy};
use crate::domain::{
    GazetteError, GenerationError, GenerationJob, JobId, StatusUpdate, StoreError,
};
use crate::ports::{GenerationEngine, GenerationRequest, JobStore, OwnerDirectory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Number of workers, i.e. the maximum number of concurrent engine calls.
    pub pool_size: usize,

    /// Mark a job failed when the engine has not returned after this long.
    pub generation_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            generation_timeout: None,
        }
    }
}

struct ExecutorInner {
    queue_tx: mpsc::UnboundedSender<JobId>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobId>>,
    store: Arc<dyn JobStore>,
    engine: Arc<dyn GenerationEngine>,
    owners: Arc<dyn OwnerDirectory>,
    retry_policy: RetryPolicy,
    generation_timeout: Option<Duration>,
    metrics: GenerationMetrics,
    active: AtomicUsize,
    queued: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
}

/// Bounded worker pool for generation jobs.
///
/// - `submit()` never blocks; excess work waits in a FIFO queue.
/// - `shutdown()` stops taking new work and waits for in-flight engine calls.
pub struct GenerationExecutor {
    inner: Arc<ExecutorInner>,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl GenerationExecutor {
    /// Spawn `config.pool_size` workers on the current tokio runtime.
    pub fn start(
        config: ExecutorConfig,
        retry_policy: RetryPolicy,
        store: Arc<dyn JobStore>,
        engine: Arc<dyn GenerationEngine>,
        owners: Arc<dyn OwnerDirectory>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new(ExecutorInner {
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            store,
            engine,
            owners,
            retry_policy,
            generation_timeout: config.generation_timeout,
            metrics: GenerationMetrics::new(),
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            shutdown_tx,
        });

        let pool_size = config.pool_size.max(1);
        let mut joins = Vec::with_capacity(pool_size);
        for worker_id in 0..pool_size {
            let inner = Arc::clone(&inner);
            let store = inner.store.session();
            let shutdown_rx = inner.shutdown_tx.subscribe();
            joins.push(tokio::spawn(worker_loop(worker_id, inner, store, shutdown_rx)));
        }
        info!(pool_size, "generation executor started");

        Self {
            inner,
            joins: Mutex::new(joins),
        }
    }

    /// Queue a job for execution. Returns `false` once the executor is shut down;
    /// the job then stays `pending` in the store.
    pub fn submit(&self, job_id: JobId) -> bool {
        self.inner.submit(job_id)
    }

    /// Jobs currently inside an engine call.
    pub fn active_jobs(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a free worker.
    pub fn queued_jobs(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry_policy
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Stop taking work and wait for the workers. Idempotent.
    ///
    /// Jobs still queued are dropped from the queue and stay `pending` in the
    /// store for the next resume.
    pub async fn shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.inner.shutdown_tx.send(true);
        let joins = std::mem::take(&mut *self.joins.lock().unwrap_or_else(PoisonError::into_inner));
        for join in joins {
            if let Err(err) = join.await {
                error!(error = %err, "generation worker ended abnormally");
            }
        }

        let mut queue = self.inner.queue_rx.lock().await;
        let mut dropped = 0;
        while queue.try_recv().is_ok() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            dropped += 1;
        }
        if dropped > 0 {
            info!(dropped, "queued jobs left pending at shutdown");
        }
    }
}

impl ExecutorInner {
    fn submit(&self, job_id: JobId) -> bool {
        if *self.shutdown_tx.borrow() {
            warn!(%job_id, "executor is shut down; job stays pending");
            return false;
        }
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.queue_tx.send(job_id).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(%job_id, "work queue closed; job stays pending");
            return false;
        }
        debug!(%job_id, "job submitted");
        true
    }

    async fn next_job(&self) -> Option<JobId> {
        let next = self.queue_rx.lock().await.recv().await;
        if next.is_some() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        next
    }

    async fn run_job(self: &Arc<Self>, worker_id: usize, store: &Arc<dyn JobStore>, job_id: JobId) {
        let job = match store.update_status(job_id, StatusUpdate::claim()).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => {
                debug!(worker_id, %job_id, "job removed before it was claimed");
                return;
            }
            Err(StoreError::Conflict { actual, .. }) => {
                debug!(worker_id, %job_id, status = %actual, "job no longer pending; skipping");
                return;
            }
            Err(err) => {
                error!(worker_id, %job_id, error = %err, "failed to claim job");
                return;
            }
        };

        info!(
            worker_id,
            job_id = %job.id,
            owner_id = %job.owner_id,
            date = %job.date,
            retry_count = job.retry_count,
            "generation started"
        );
        let started = Instant::now();

        match self.generate(&job).await {
            Ok(artifact_path) => {
                let elapsed = started.elapsed();
                self.metrics.record_success(elapsed);
                match store
                    .update_status(job.id, StatusUpdate::complete(artifact_path.clone()))
                    .await
                {
                    Ok(_) => {
                        info!(
                            worker_id,
                            job_id = %job.id,
                            artifact_path = %artifact_path,
                            elapsed_secs = elapsed.as_secs_f64(),
                            "generation completed"
                        );
                    }
                    Err(err) => {
                        error!(worker_id, job_id = %job.id, error = %err, "failed to record completion");
                    }
                }
            }
            Err(source) => self.handle_failure(worker_id, store, &job, source).await,
        }
    }

    async fn generate(&self, job: &GenerationJob) -> Result<String, GenerationError> {
        let owner = self
            .owners
            .get_owner(job.owner_id)
            .await
            .map_err(|err| GenerationError::Context(err.to_string()))?
            .ok_or_else(|| GenerationError::Context(format!("{} no longer exists", job.owner_id)))?;
        let interests = self
            .owners
            .interests(job.owner_id)
            .await
            .map_err(|err| GenerationError::Context(err.to_string()))?;

        let request = GenerationRequest {
            owner,
            interests,
            date: job.date,
        };
        let engine = Arc::clone(&self.engine);
        let handle = tokio::spawn(async move { engine.generate(request).await });

        let joined = match self.generation_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        job_id = %job.id,
                        timeout_secs = limit.as_secs(),
                        "engine call timed out; it keeps running detached"
                    );
                    return Err(GenerationError::TimedOut(limit));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(GenerationError::Panicked(panic_message(err.into_panic()))),
            Err(err) => Err(GenerationError::Engine(err.to_string())),
        }
    }

    async fn handle_failure(
        self: &Arc<Self>,
        worker_id: usize,
        store: &Arc<dyn JobStore>,
        job: &GenerationJob,
        source: GenerationError,
    ) {
        self.metrics.record_failure();
        let failed = match store
            .update_status(job.id, StatusUpdate::fail(source.to_string()))
            .await
        {
            Ok(failed) => failed,
            Err(err) => {
                error!(worker_id, job_id = %job.id, error = %err, "failed to record generation failure");
                return;
            }
        };

        let error = GazetteError::GenerationFailure {
            job: job.id,
            source,
        };
        warn!(
            worker_id,
            job_id = %failed.id,
            owner_id = %failed.owner_id,
            retry_count = failed.retry_count,
            kind = ?error.kind(),
            error = %error,
            "generation failed"
        );

        match self.retry_policy.decide(failed.retry_count) {
            RetryDecision::Retry { delay } => self.schedule_retry(failed.id, failed.retry_count, delay),
            RetryDecision::Exhausted => {
                let error = GazetteError::MaxRetriesExceeded {
                    job: failed.id,
                    attempts: failed.retry_count,
                };
                error!(job_id = %failed.id, kind = ?error.kind(), error = %error, "giving up on job");
            }
        }
    }

    /// Re-queue a failed job after `delay`, outside the worker pool.
    ///
    /// The re-queue only lands if the job is still `failed` at `retry_count`;
    /// a manual retry while the timer waits starts a new series and the timer
    /// is dropped.
    fn schedule_retry(self: &Arc<Self>, job_id: JobId, retry_count: u32, delay: Duration) {
        info!(%job_id, retry_count, delay_secs = delay.as_secs_f64(), "retry scheduled");
        let inner = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                    debug!(%job_id, "shutdown before retry; job stays failed");
                    return;
                }
            }

            match inner
                .store
                .update_status(job_id, StatusUpdate::requeue(retry_count))
                .await
            {
                Ok(_) => {
                    inner.submit(job_id);
                }
                Err(
                    StoreError::NotFound(_)
                    | StoreError::Conflict { .. }
                    | StoreError::SeriesChanged { .. },
                ) => {
                    debug!(%job_id, "job changed while waiting for retry; dropping timer");
                }
                Err(err) => error!(%job_id, error = %err, "failed to re-queue job"),
            }
        });
    }
}

/// Tracks one job inside a worker slot; decrements on drop.
struct ActiveSlot<'a>(&'a AtomicUsize);

impl<'a> ActiveSlot<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn worker_loop(
    worker_id: usize,
    inner: Arc<ExecutorInner>,
    store: Arc<dyn JobStore>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // キュー待ちは shutdown と競合させる（実行中の job は最後まで走らせる）
        let job_id = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            next = inner.next_job() => match next {
                Some(job_id) => job_id,
                None => break,
            },
        };

        let _slot = ActiveSlot::enter(&inner.active);
        inner.run_job(worker_id, &store, job_id).await;
    }
    debug!(worker_id, "generation worker stopped");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
