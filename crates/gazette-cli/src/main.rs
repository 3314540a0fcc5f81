use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing::info;

use gazette_core::domain::{GenerationError, JobStatus, OwnerId};
use gazette_core::impls::{InMemoryJobStore, InMemoryOwnerDirectory};
use gazette_core::ports::{GenerationEngine, GenerationRequest, OwnerContext};
use gazette_core::{AppBuilder, GazetteConfig, observability};

/// デモ用エンジン：HTML を output_dir に書き、指定 owner で 1 回だけ失敗する
struct DemoEngine {
    output_dir: PathBuf,
    flaky_owner: OwnerId,
    remaining_failures: AtomicU32,
}

#[async_trait]
impl GenerationEngine for DemoEngine {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        // 本物のエンジンは数分かかる
        sleep(Duration::from_millis(300)).await;

        if request.owner.id == self.flaky_owner
            && self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        {
            return Err(GenerationError::Engine("upstream feed timed out".into()));
        }

        let location = format!("{}/{}.html", request.owner.id.value(), request.date);
        let path = self.output_dir.join(&location);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GenerationError::Engine(format!("create {}: {e}", parent.display())))?;
        }

        let items: String = request
            .interests
            .iter()
            .map(|topic| format!("<li>{topic}</li>"))
            .collect();
        let html = format!(
            "<html><body><h1>{} - {}</h1><ul>{items}</ul></body></html>\n",
            request.owner.name, request.date
        );
        tokio::fs::write(&path, html)
            .await
            .map_err(|e| GenerationError::Engine(format!("write {}: {e}", path.display())))?;

        Ok(location)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init();

    // (A) 設定（デモではリトライ間隔を短くする）
    let mut config = GazetteConfig::from_env();
    if std::env::var("GAZETTE_RETRY_BASE_DELAY_SECS").is_err() {
        config.retry.base_delay = Duration::from_secs(1);
    }
    let max_attempts = config.retry.max_attempts;

    // (B) 所有者と興味
    let owners = Arc::new(InMemoryOwnerDirectory::new());
    for (id, name, interests) in [
        (1, "Aki", vec!["rust", "databases"]),
        (2, "Ben", vec!["distributed systems"]),
        (3, "Chiyo", vec!["compilers", "wasm", "tokio"]),
        (4, "Dana", vec![]),
    ] {
        owners.upsert(
            OwnerContext {
                id: OwnerId::new(id),
                name: name.to_string(),
            },
            interests.into_iter().map(String::from).collect(),
        );
    }

    let engine = Arc::new(DemoEngine {
        output_dir: config.output_dir.clone(),
        flaky_owner: OwnerId::new(2),
        remaining_failures: AtomicU32::new(1),
    });
    let store = Arc::new(InMemoryJobStore::new());

    // (C) ワイヤリングして起動
    let app = AppBuilder::new(config)
        .with_store(store)
        .with_owners(owners)
        .with_engine(engine)
        .build()?;
    app.start().await?;
    info!(
        next_run = %app.scheduler().next_run_after(Utc::now()),
        "daily run scheduled"
    );

    // (D) 今日の分を手動で fan-out（owner 4 は interests が無いので skip）
    let today = Utc::now().date_naive();
    let report = app.scheduler().trigger_now(today).await?;
    println!("fan-out: {}", serde_json::to_string(&report)?);

    // (E) レート制限の確認
    for _ in 0..3 {
        let decision = app.rate_limiter().is_allowed("owner#1");
        println!("rate limit owner#1: allowed={} remaining={}", decision.allowed, decision.remaining);
    }

    // (F) 全 job が終わるまでポーリング
    let mut jobs = Vec::new();
    for owner in 1..=3 {
        jobs.push(app.orchestrator().enqueue(OwnerId::new(owner), today).await?);
    }
    loop {
        let mut finished = 0;
        for job in &jobs {
            let current = app.orchestrator().job(job.public_id).await?;
            if current.status == JobStatus::Completed
                || (current.status == JobStatus::Failed && current.retry_count >= max_attempts)
            {
                finished += 1;
            }
        }
        if finished == jobs.len() {
            break;
        }
        println!("status: {}", serde_json::to_string(&app.status())?);
        sleep(Duration::from_millis(500)).await;
    }

    for job in &jobs {
        let current = app.orchestrator().job(job.public_id).await?;
        println!(
            "{} {} status={} retries={} artifact={:?}",
            current.public_id, current.owner_id, current.status, current.retry_count, current.artifact_path
        );
        if let Some(path) = &current.artifact_path {
            if let Some(bytes) = app.cache().read(path).await? {
                println!("  {} bytes (cache: {:?})", bytes.len(), app.cache().stats());
            }
        }
    }
    println!("metrics: {}", serde_json::to_string(&app.metrics())?);

    // (G) graceful shutdown
    app.shutdown().await;
    Ok(())
}
