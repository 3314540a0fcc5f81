//! ArtifactCache - 生成済み artifact の LRU 読み込みキャッシュ
//!
//! ContentStore の前に置く。中身は `moka::sync::Cache` を LRU ポリシーで
//! 使う。容量はエントリ数で数え、超えたら最も長く使われていないエントリを
//! 捨てる。ヒットでも読み込みでもそのエントリは最新扱いになる。
//!
//! ContentStore の I/O 中はロックを握らない。読み込み中に `invalidate` /
//! `clear` が走った場合は、読んだ内容を返すだけでキャッシュには入れない
//! （無効化の世代 `epoch` で判定する）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use tracing::trace;

use crate::domain::ContentStoreError;
use crate::ports::ContentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

pub struct ArtifactCache {
    config: CacheConfig,
    content: Arc<dyn ContentStore>,
    entries: Cache<String, Arc<[u8]>>,
    /// Bumped by every invalidation; a miss only fills the cache if it saw no bump.
    epoch: Mutex<u64>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ArtifactCache {
    pub fn new(config: CacheConfig, content: Arc<dyn ContentStore>) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(|path: Arc<String>, _, cause| {
                trace!(path = %path, ?cause, "artifact left the cache");
            })
            .build();

        Self {
            config,
            content,
            entries,
            epoch: Mutex::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the artifact at `path`, loading it from the content store on a miss.
    ///
    /// Missing artifacts (`Ok(None)`) are not cached.
    pub async fn read(&self, path: &str) -> Result<Option<Arc<[u8]>>, ContentStoreError> {
        if let Some(bytes) = self.entries.get(path) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(bytes));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let seen = *self.epoch();
        let Some(bytes) = self.content.read(path).await? else {
            return Ok(None);
        };
        let bytes: Arc<[u8]> = Arc::from(bytes);
        if self.config.capacity > 0 {
            let epoch = self.epoch();
            if *epoch == seen {
                self.entries.insert(path.to_string(), Arc::clone(&bytes));
                // moka は eviction を遅延させるので、ここで順序どおりに適用する
                self.entries.run_pending_tasks();
            } else {
                trace!(path, "invalidated during read; not cached");
            }
        }
        Ok(Some(bytes))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Drop one entry, e.g. after its job was regenerated.
    pub fn invalidate(&self, path: &str) -> bool {
        let mut epoch = self.epoch();
        *epoch += 1;
        self.entries.remove(path).is_some()
    }

    pub fn clear(&self) {
        let mut epoch = self.epoch();
        *epoch += 1;
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.config.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryContentStore;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn cache_with(files: usize, capacity: usize) -> (ArtifactCache, Arc<InMemoryContentStore>) {
        let content = Arc::new(InMemoryContentStore::new());
        for i in 0..files {
            content.put(&format!("a{i}.html"), format!("<p>{i}</p>").as_bytes());
        }
        let cache = ArtifactCache::new(CacheConfig { capacity }, content.clone());
        (cache, content)
    }

    #[tokio::test]
    async fn second_read_is_served_from_memory() {
        let (cache, content) = cache_with(1, 100);

        let first = cache.read("a0.html").await.unwrap().unwrap();
        let second = cache.read("a0.html").await.unwrap().unwrap();

        assert_eq!(&*first, b"<p>0</p>");
        assert_eq!(first, second);
        assert_eq!(content.reads(), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.len), (1, 1, 1));
    }

    #[tokio::test]
    async fn overflowing_capacity_evicts_exactly_the_least_recent() {
        let (cache, _) = cache_with(101, 100);
        for i in 0..100 {
            cache.read(&format!("a{i}.html")).await.unwrap();
        }
        // a0 を触って最新にしておく
        cache.read("a0.html").await.unwrap();

        cache.read("a100.html").await.unwrap();

        assert_eq!(cache.len(), 100);
        assert!(cache.contains("a0.html"));
        assert!(!cache.contains("a1.html"));
        assert!(cache.contains("a2.html"));
        assert!(cache.contains("a100.html"));
    }

    #[tokio::test]
    async fn missing_artifacts_are_not_cached() {
        let (cache, content) = cache_with(0, 10);
        assert!(cache.read("nope.html").await.unwrap().is_none());
        assert!(cache.read("nope.html").await.unwrap().is_none());
        assert_eq!(content.reads(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidate_forces_a_reload() {
        let (cache, content) = cache_with(1, 10);
        cache.read("a0.html").await.unwrap();
        content.put("a0.html", b"<p>new</p>");

        assert!(cache.invalidate("a0.html"));
        assert!(!cache.invalidate("a0.html"));
        let fresh = cache.read("a0.html").await.unwrap().unwrap();
        assert_eq!(&*fresh, b"<p>new</p>");
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let (cache, _) = cache_with(3, 10);
        for i in 0..3 {
            cache.read(&format!("a{i}.html")).await.unwrap();
        }
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().capacity, 10);
    }

    /// ContentStore whose reads wait until the test lets them finish.
    struct GatedContentStore {
        files: InMemoryContentStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ContentStore for GatedContentStore {
        async fn read(&self, location: &str) -> Result<Option<Vec<u8>>, ContentStoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.files.read(location).await
        }
    }

    #[tokio::test]
    async fn invalidate_during_a_miss_keeps_stale_bytes_out() {
        let content = Arc::new(GatedContentStore {
            files: InMemoryContentStore::new(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        content.files.put("a0.html", b"<p>old</p>");
        let cache = Arc::new(ArtifactCache::new(CacheConfig { capacity: 10 }, content.clone()));

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.read("a0.html").await })
        };
        content.entered.notified().await;
        content.files.put("a0.html", b"<p>new</p>");
        assert!(!cache.invalidate("a0.html"));
        content.release.notify_one();

        let served = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(&*served, b"<p>old</p>");
        assert!(!cache.contains("a0.html"));

        content.release.notify_one();
        let fresh = cache.read("a0.html").await.unwrap().unwrap();
        assert_eq!(&*fresh, b"<p>new</p>");
        assert!(cache.contains("a0.html"));
    }

    #[tokio::test]
    async fn zero_capacity_disables_caching() {
        let (cache, content) = cache_with(1, 0);
        cache.read("a0.html").await.unwrap();
        cache.read("a0.html").await.unwrap();
        assert_eq!(content.reads(), 2);
    }
}
