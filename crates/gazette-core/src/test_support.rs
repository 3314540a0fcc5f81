//! テスト用の部品（スクリプト化したエンジン、メモリ上の ContentStore、待機ヘルパ）

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::app::executor::{ExecutorConfig, GenerationExecutor};
use crate::app::retry::RetryPolicy;
use crate::domain::{ContentStoreError, GenerationError, GenerationJob, JobId, JobStatus, NewJob, OwnerId};
use crate::impls::{InMemoryJobStore, InMemoryOwnerDirectory};
use crate::ports::{
    ContentStore, GenerationEngine, GenerationRequest, IdGenerator, JobStore, OwnerContext,
    SystemClock, UlidGenerator,
};

#[derive(Default)]
struct EngineState {
    calls: AtomicU32,
    failures_left: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Engine double: optional delay, a budget of leading failures, optional panics.
#[derive(Clone, Default)]
pub(crate) struct ScriptedEngine {
    state: Arc<EngineState>,
    delay: Option<Duration>,
    panic_for: Option<OwnerId>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_first(self, failures: u32) -> Self {
        self.state.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn panicking_for(mut self, owner: OwnerId) -> Self {
        self.panic_for = Some(owner);
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrency(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a EngineState);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.state);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_for == Some(request.owner.id) {
            panic!("scripted panic for {}", request.owner.id);
        }

        let failing = self
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GenerationError::Engine("scripted failure".into()));
        }

        Ok(format!("{}/{}.html", request.owner.id.value(), request.date))
    }
}

/// ContentStore backed by a map; counts reads so cache tests can see misses.
#[derive(Default)]
pub(crate) struct InMemoryContentStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    reads: AtomicU32,
}

impl InMemoryContentStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&self, location: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.to_string(), bytes.to_vec());
    }

    pub(crate) fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn read(&self, location: &str) -> Result<Option<Vec<u8>>, ContentStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files.get(location).cloned())
    }
}

/// Poll `check` until it holds, for up to five seconds.
pub(crate) async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub(crate) fn march(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
}

/// Owners 1..=20, each interested in "rust" and "tokio".
pub(crate) fn seeded_owners() -> Arc<InMemoryOwnerDirectory> {
    let owners = InMemoryOwnerDirectory::new();
    for id in 1..=20 {
        owners.upsert(
            OwnerContext {
                id: OwnerId::new(id),
                name: format!("owner {id}"),
            },
            vec!["rust".into(), "tokio".into()],
        );
    }
    Arc::new(owners)
}

/// A store, an owner directory and a running executor wired together.
pub(crate) struct Fixture {
    pub(crate) store: InMemoryJobStore,
    pub(crate) owners: Arc<InMemoryOwnerDirectory>,
    pub(crate) executor: Arc<GenerationExecutor>,
}

impl Fixture {
    pub(crate) fn new(engine: ScriptedEngine, policy: RetryPolicy, pool_size: usize) -> Self {
        Self::with_config(
            engine,
            policy,
            ExecutorConfig {
                pool_size,
                generation_timeout: None,
            },
        )
    }

    pub(crate) fn with_config(engine: ScriptedEngine, policy: RetryPolicy, config: ExecutorConfig) -> Self {
        let store = InMemoryJobStore::new();
        let owners = seeded_owners();
        let executor = GenerationExecutor::start(
            config,
            policy,
            Arc::new(store.clone()),
            Arc::new(engine),
            owners.clone(),
        );
        Self {
            store,
            owners,
            executor: Arc::new(executor),
        }
    }

    /// Insert a pending job directly, bypassing the orchestrator's checks.
    pub(crate) async fn create_job(&self, owner: u64, day: u32) -> GenerationJob {
        let ids = UlidGenerator::new(SystemClock);
        self.store
            .create(NewJob {
                public_id: ids.generate_public_id(),
                owner_id: OwnerId::new(owner),
                date: march(day),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap()
    }

    pub(crate) async fn wait_for_status(&self, id: JobId, status: JobStatus) -> GenerationJob {
        let reached = wait_until(|| async {
            matches!(self.store.get(id).await, Ok(Some(job)) if job.status == status)
        })
        .await;
        assert!(reached, "{id} never reached {status}");
        self.store.get(id).await.unwrap().unwrap()
    }
}
