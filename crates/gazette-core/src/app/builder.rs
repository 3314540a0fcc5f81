//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 必須の協調者（JobStore, OwnerDirectory, GenerationEngine）が欠けていれば
//!   `BuildError::MissingCollaborators` で欠けている名前をすべて返す
//! - 設定は `GazetteConfig::validate()` を通してから使う
//!
//! 任意の協調者のデフォルト:
//! - ContentStore: `output_dir` をルートにした `FsContentStore`
//! - Clock: `SystemClock`
//! - IdGenerator: Clock を使う `UlidGenerator`
//!
//! `build()` は worker を spawn するので tokio runtime の中で呼ぶこと。

use std::sync::Arc;

use tracing::info;

use crate::app::cache::ArtifactCache;
use crate::app::executor::GenerationExecutor;
use crate::app::metrics::MetricsSnapshot;
use crate::app::orchestrator::Orchestrator;
use crate::app::rate_limiter::RateLimiter;
use crate::app::scheduler::Scheduler;
use crate::app::status::SchedulerStatus;
use crate::config::{ConfigError, GazetteConfig};
use crate::domain::GazetteError;
use crate::impls::FsContentStore;
use crate::ports::{
    Clock, ContentStore, GenerationEngine, IdGenerator, JobStore, OwnerDirectory, SystemClock,
    UlidGenerator,
};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(GazetteConfig::from_env())
///     .with_store(Arc::new(InMemoryJobStore::new()))
///     .with_owners(owners)
///     .with_engine(engine)
///     .build()?;
/// app.start().await?;
/// ```
pub struct AppBuilder {
    config: GazetteConfig,
    store: Option<Arc<dyn JobStore>>,
    owners: Option<Arc<dyn OwnerDirectory>>,
    engine: Option<Arc<dyn GenerationEngine>>,
    content: Option<Arc<dyn ContentStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborators: {0:?}")]
    MissingCollaborators(Vec<&'static str>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new(config: GazetteConfig) -> Self {
        Self {
            config,
            store: None,
            owners: None,
            engine: None,
            content: None,
            clock: None,
            ids: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_owners(mut self, owners: Arc<dyn OwnerDirectory>) -> Self {
        self.owners = Some(owners);
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn GenerationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate and wire everything. Workers start immediately; timers start with [`App::start`].
    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        let (store, owners, engine) = match (self.store, self.owners, self.engine) {
            (Some(store), Some(owners), Some(engine)) => (store, owners, engine),
            (store, owners, engine) => {
                let mut missing = Vec::new();
                if store.is_none() {
                    missing.push("job_store");
                }
                if owners.is_none() {
                    missing.push("owner_directory");
                }
                if engine.is_none() {
                    missing.push("generation_engine");
                }
                return Err(BuildError::MissingCollaborators(missing));
            }
        };

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let content = self
            .content
            .unwrap_or_else(|| Arc::new(FsContentStore::new(config.output_dir.clone())));

        let executor = Arc::new(GenerationExecutor::start(
            config.executor.clone(),
            config.retry.clone(),
            Arc::clone(&store),
            engine,
            Arc::clone(&owners),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            store,
            owners,
            Arc::clone(&executor),
            ids,
            Arc::clone(&clock),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), Arc::clone(&clock)));
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&orchestrator),
            Arc::clone(&rate_limiter),
            clock,
        );
        let cache = ArtifactCache::new(config.cache.clone(), content);

        Ok(App {
            executor,
            orchestrator,
            scheduler,
            rate_limiter,
            cache,
        })
    }
}

/// The wired orchestration system.
pub struct App {
    executor: Arc<GenerationExecutor>,
    orchestrator: Arc<Orchestrator>,
    scheduler: Scheduler,
    rate_limiter: Arc<RateLimiter>,
    cache: ArtifactCache,
}

impl App {
    /// Start the scheduler timers (and resume leftover jobs if configured).
    pub async fn start(&self) -> Result<(), GazetteError> {
        self.scheduler.start().await
    }

    /// Stop the timers, then let in-flight jobs finish and stop the workers.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.executor.shutdown().await;
        info!("gazette shut down");
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.executor.metrics()
    }
}
