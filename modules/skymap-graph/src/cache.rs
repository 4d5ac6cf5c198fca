use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use skymap_common::{Result, SkymapError};

// --- TTL buckets ---

/// Named expiration policy applied to a class of cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlBucket {
    /// Profiles and raw connection lists.
    Short,
    /// Mutual sets and derived metrics.
    Medium,
    /// Full analyses.
    Long,
}

impl TtlBucket {
    pub fn duration(&self) -> chrono::Duration {
        match self {
            TtlBucket::Short => chrono::Duration::hours(24),
            TtlBucket::Medium => chrono::Duration::days(7),
            TtlBucket::Long => chrono::Duration::days(30),
        }
    }
}

// --- Backend boundary ---

/// One cached document. Values are stored as JSON documents; typed access
/// happens at the call site via serde.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Document-store boundary for cached records: upsert-by-key plus the few
/// lookups the cache needs. Swappable for a real store without touching
/// the read-through logic.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>>;
    async fn put(&self, record: CacheRecord) -> Result<()>;
    /// Delete records whose key matches `pattern` (exact, or prefix when
    /// the pattern ends in `*`). Returns how many were removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64>;
    /// Delete records past their `expires_at`. Returns how many were removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// In-memory backend used by the worker and by tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    records: RwLock<HashMap<String, CacheRecord>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, record: CacheRecord) -> Result<()> {
        self.records.write().await.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        match pattern.strip_suffix('*') {
            Some(prefix) => records.retain(|key, _| !key.starts_with(prefix)),
            None => {
                records.remove(pattern);
            }
        }
        Ok((before - records.len()) as u64)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        Ok((before - records.len()) as u64)
    }
}

// --- Read-through cache ---

/// Time-bucketed read-through cache. Validity is re-checked on every read
/// against the bucket duration; expiry sweeping only reclaims storage.
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Read a cached value if present and still valid for `bucket`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        bucket: TtlBucket,
        now: DateTime<Utc>,
    ) -> Result<Option<T>> {
        let Some(record) = self.backend.get(key).await? else {
            return Ok(None);
        };
        if now - record.stored_at >= bucket.duration() {
            debug!(key, "Cache entry stale, treating as miss");
            return Ok(None);
        }
        let value = serde_json::from_value(record.value)
            .map_err(|e| SkymapError::Cache(format!("corrupt record for {key}: {e}")))?;
        Ok(Some(value))
    }

    /// Overwrite the record for `key`. Last writer wins.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        bucket: TtlBucket,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = CacheRecord {
            key: key.to_string(),
            value: serde_json::to_value(value)
                .map_err(|e| SkymapError::Cache(format!("unserializable value for {key}: {e}")))?,
            stored_at: now,
            expires_at: now + bucket.duration(),
        };
        self.backend.put(record).await
    }

    /// Drop records matching `pattern` (exact key, or prefix with a
    /// trailing `*`).
    pub async fn invalidate(&self, pattern: &str) -> Result<u64> {
        let removed = self.backend.delete_matching(pattern).await?;
        if removed > 0 {
            debug!(pattern, removed, "Cache entries invalidated");
        }
        Ok(removed)
    }

    /// Read-through fetch: return the cached value when valid, otherwise
    /// fetch upstream exactly once and overwrite the cache. `force`
    /// bypasses validity checking and always refetches.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        bucket: TtlBucket,
        force: bool,
        now: DateTime<Utc>,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !force {
            if let Some(hit) = self.get(key, bucket, now).await? {
                debug!(key, "Cache hit");
                return Ok(hit);
            }
        }

        debug!(key, force, "Cache miss, fetching upstream");
        let value = fetch().await?;
        self.set(key, &value, bucket, now).await?;
        Ok(value)
    }

    /// Spawn a background loop that reclaims expired records on a timer.
    pub fn spawn_sweep_loop(self: &Arc<Self>, interval: Duration) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                match cache.backend.sweep_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Swept expired cache records"),
                    Err(e) => warn!(error = %e, "Cache sweep failed"),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryCacheStore::new()))
    }

    #[tokio::test]
    async fn valid_entry_round_trips() {
        let cache = cache();
        let now = Utc::now();
        cache.set("profile:alice", &"snapshot", TtlBucket::Short, now).await.unwrap();

        let hit: Option<String> = cache.get("profile:alice", TtlBucket::Short, now).await.unwrap();
        assert_eq!(hit.as_deref(), Some("snapshot"));
    }

    #[tokio::test]
    async fn validity_is_rechecked_per_bucket_on_read() {
        let cache = cache();
        let stored = Utc::now();
        cache.set("k", &1u32, TtlBucket::Short, stored).await.unwrap();

        // 25h later the short bucket rejects it, but the medium bucket,
        // checked against the same stored_at, still accepts it.
        let later = stored + chrono::Duration::hours(25);
        let short: Option<u32> = cache.get("k", TtlBucket::Short, later).await.unwrap();
        assert_eq!(short, None);
        let medium: Option<u32> = cache.get("k", TtlBucket::Medium, later).await.unwrap();
        assert_eq!(medium, Some(1));
    }

    #[tokio::test]
    async fn get_or_fetch_fetches_once_then_hits() {
        let cache = cache();
        let now = Utc::now();
        let fetches = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: u32 = cache
                .get_or_fetch("k", TtlBucket::Short, false, now, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_refetches_and_overwrites() {
        let cache = cache();
        let now = Utc::now();
        cache.set("k", &"old", TtlBucket::Short, now).await.unwrap();

        let value: String = cache
            .get_or_fetch("k", TtlBucket::Short, true, now, || async {
                Ok("new".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "new");

        let hit: Option<String> = cache.get("k", TtlBucket::Short, now).await.unwrap();
        assert_eq!(hit.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn invalidate_supports_prefix_patterns() {
        let cache = cache();
        let now = Utc::now();
        cache.set("profile:alice", &1u32, TtlBucket::Short, now).await.unwrap();
        cache.set("profile:bob", &2u32, TtlBucket::Short, now).await.unwrap();
        cache.set("analysis:alice", &3u32, TtlBucket::Long, now).await.unwrap();

        assert_eq!(cache.invalidate("profile:*").await.unwrap(), 2);
        let kept: Option<u32> = cache.get("analysis:alice", TtlBucket::Long, now).await.unwrap();
        assert_eq!(kept, Some(3));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_records() {
        let backend = Arc::new(MemoryCacheStore::new());
        let cache = Cache::new(Arc::clone(&backend) as Arc<dyn CacheBackend>);
        let now = Utc::now();
        cache.set("short", &1u32, TtlBucket::Short, now).await.unwrap();
        cache.set("long", &2u32, TtlBucket::Long, now).await.unwrap();

        let removed = backend
            .sweep_expired(now + chrono::Duration::days(2))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(backend.get("short").await.unwrap().is_none());
        assert!(backend.get("long").await.unwrap().is_some());
    }
}
