use super::backend::CacheBackend;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Cache-aside reads and explicit invalidation over a [`CacheBackend`].
///
/// The cache is an optimization only: backend failures are logged and the
/// call proceeds as if the entry were absent.
#[derive(Clone)]
pub struct CacheAside {
    backend: Arc<dyn CacheBackend>,
}

impl CacheAside {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// # Arguments
    ///
    /// * `key` - Namespaced key from [`super::keys`]
    /// * `ttl` - Expiry of a freshly computed entry
    /// * `compute` - Producer invoked on a miss; its error is returned as-is
    ///
    /// Two concurrent misses may both compute; the last write wins.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_value::<T>(raw) {
                Ok(value) => {
                    log::debug!("Cache hit: {}", key);
                    return Ok(value);
                }
                Err(e) => log::warn!("Discarding undecodable cache entry {}: {}", key, e),
            },
            Ok(None) => log::debug!("Cache miss: {}", key),
            Err(e) => log::warn!("Cache read failed for {}: {}", key, e),
        }

        let value = compute().await?;

        match serde_json::to_value(&value) {
            Ok(raw) => {
                if let Err(e) = self.backend.set(key, raw, ttl).await {
                    log::warn!("Cache write failed for {}: {}", key, e);
                }
            }
            Err(e) => log::warn!("Value for {} is not cacheable: {}", key, e),
        }

        Ok(value)
    }

    /// Drop `key`. Call only after the underlying write has succeeded.
    pub async fn invalidate(&self, key: &str) {
        match self.backend.delete(key).await {
            Ok(true) => log::debug!("Invalidated cache key {}", key),
            Ok(false) => {}
            Err(e) => log::warn!("Cache invalidation failed for {}: {}", key, e),
        }
    }

    /// Drop every key under `prefix`
    pub async fn invalidate_prefix(&self, prefix: &str) {
        match self.backend.delete_prefix(prefix).await {
            Ok(n) if n > 0 => log::debug!("Invalidated {} cache keys under {}", n, prefix),
            Ok(_) => {}
            Err(e) => log::warn!("Cache invalidation failed for prefix {}: {}", prefix, e),
        }
    }
}
