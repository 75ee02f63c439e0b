use crate::error::Result;
use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Key/value store with per-entry TTL (Redis-like).
///
/// Values are JSON so that any serde type can be cached behind one backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Remove one key; returns whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key starting with `prefix`; returns how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Thread-safe in-process LRU cache with TTL expiry
///
/// Bounded by `capacity`; the least recently used entry is evicted first.
/// Expired entries are dropped lazily on read.
pub struct MemoryCacheBackend {
    cache: Mutex<LruCache<String, Entry>>,
}

impl MemoryCacheBackend {
    /// Create a new cache with the specified capacity (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Entry>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the current number of cached entries (including not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clear all entries from the cache
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut cache = self.lock();
        let expired = match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.lock().put(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock().pop(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut cache = self.lock();
        let keys: Vec<String> = cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            cache.pop(key);
        }
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_cache_put_and_get() {
        let cache = MemoryCacheBackend::new(10);
        cache.set("documents:list", json!([1, 2, 3]), MINUTE).await.unwrap();

        let retrieved = cache.get("documents:list").await.unwrap();
        assert_eq!(retrieved, Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let cache = MemoryCacheBackend::new(10);
        assert!(cache.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let cache = MemoryCacheBackend::new(10);
        cache.set("short", json!("v"), Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("short").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_eviction() {
        let cache = MemoryCacheBackend::new(2);
        cache.set("a", json!(1), MINUTE).await.unwrap();
        cache.set("b", json!(2), MINUTE).await.unwrap();

        // Touch "a" so "b" becomes least recently used
        let _ = cache.get("a").await.unwrap();
        cache.set("c", json!(3), MINUTE).await.unwrap();

        assert!(cache.get("a").await.unwrap().is_some());
        assert!(cache.get("b").await.unwrap().is_none());
        assert!(cache.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_and_prefix_delete() {
        let cache = MemoryCacheBackend::new(10);
        cache.set("documents:list", json!([]), MINUTE).await.unwrap();
        cache.set("documents:item:d1", json!({}), MINUTE).await.unwrap();
        cache.set("embedding:abc", json!([0.1]), MINUTE).await.unwrap();

        assert!(cache.delete("documents:list").await.unwrap());
        assert!(!cache.delete("documents:list").await.unwrap());

        assert_eq!(cache.delete_prefix("documents:").await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let cache = MemoryCacheBackend::new(10);
        cache.set("a", json!(1), MINUTE).await.unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
