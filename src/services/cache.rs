//! Response cache with a resilient in-process fallback.
//!
//! The configured backend (if any) may vanish at runtime; the service
//! degrades to a process-local map and never surfaces a cache failure
//! to callers.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Storage seam. An external cache (Redis, memcached) plugs in here;
/// the in-memory store below is both the default and the fallback.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;
    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}

/// TTL'd in-memory store. Expired entries are dropped on read and swept
/// opportunistically on write.
pub struct MemoryCache {
    entries: DashMap<String, (serde_json::Value, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value();
            if Instant::now() < *expires_at {
                return Ok(Some(value.clone()));
            }
        }
        // Expired or absent; drop the stale entry outside the read guard
        self.entries.remove_if(key, |_, (_, expires_at)| Instant::now() >= *expires_at);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if self.entries.len() > 4096 {
            let now = Instant::now();
            self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        }
        self.entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

/// Cache facade used by the source clients. Reads prefer the backend and
/// fall through to the local map; writes go to both so a backend outage
/// loses nothing already seen by this process.
pub struct CacheService {
    backend: Option<Arc<dyn CacheStore>>,
    local: MemoryCache,
}

impl CacheService {
    pub fn in_memory() -> Self {
        Self { backend: None, local: MemoryCache::new() }
    }

    pub fn with_backend(backend: Arc<dyn CacheStore>) -> Self {
        Self { backend: Some(backend), local: MemoryCache::new() }
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(backend) = &self.backend {
            match backend.get(key).await {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {},
                Err(e) => {
                    tracing::warn!("Cache backend get failed, using local map: {}", e);
                },
            }
        }

        self.local.get(key).await.ok().flatten()
    }

    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if let Some(backend) = &self.backend
            && let Err(e) = backend.set(key, value.clone(), ttl).await
        {
            tracing::warn!("Cache backend set failed, keeping local copy: {}", e);
        }

        let _ = self.local.set(key, value, ttl).await;
    }
}
