//! Process-scoped memoization with lazy expiry.
//!
//! Misses are not single-flight: concurrent readers of a missing key may each run the
//! producer, and the last writer wins. Producers are expected to be idempotent reads.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

#[derive(Debug)]
pub struct TtlCache<V> {
    inner: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value if it is still within its TTL.
    pub async fn get(&self, key: &str) -> Option<V> {
        let map = self.inner.read().await;
        map.get(key)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut map = self.inner.write().await;
        let now = Instant::now();
        map.retain(|_, entry| entry.is_fresh(now));
        map.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: now,
                ttl,
            },
        );
    }

    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(hit) = self.get(key).await {
            tracing::trace!(key, "cache hit");
            return hit;
        }

        let value = producer().await;
        self.insert(key, value.clone(), ttl).await;
        value
    }

    /// Like [`Self::get_or_compute`], but only successful values are stored.
    pub async fn get_or_try_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key).await {
            tracing::trace!(key, "cache hit");
            return Ok(hit);
        }

        let value = producer().await?;
        self.insert(key, value.clone(), ttl).await;
        Ok(value)
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
