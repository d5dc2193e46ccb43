//! Distributed (L2) cache tier.
//!
//! # Responsibilities
//! - Define the narrow key/value contract the route cache needs
//! - Provide an in-process implementation for tests and embedders
//! - Wrap any implementation so that its failures become misses
//!
//! # Degradation
//! ```text
//! operation ──error or timeout──▶ mark unhealthy, count, treat as miss
//! unhealthy ──interval elapsed──▶ one PING ──ok──▶ healthy again
//!     │
//!     └── before the interval elapses every operation is skipped
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CacheError;
use crate::observability::metrics;

/// Key/value store shared between gateway instances.
#[async_trait]
pub trait DistributedCache: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value`; `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Lightweight liveness check.
    async fn is_healthy(&self) -> bool;
}

/// In-process store with per-entry expiry.
#[derive(Debug, Default)]
pub struct InMemoryDistributedCache {
    entries: DashMap<String, (String, Option<Instant>)>,
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) => match entry.1 {
                Some(deadline) if deadline <= now => true,
                _ => return Ok(Some(entry.0.clone())),
            },
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Counters for the distributed tier.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Health-guarded, time-bounded wrapper around a [`DistributedCache`].
///
/// Every method is infallible: failures are logged, counted and reported as
/// a miss (or `false` for writes).
#[derive(Debug)]
pub struct GuardedDistributedCache {
    inner: Arc<dyn DistributedCache>,
    operation_timeout: Duration,
    health_check_interval: Duration,
    healthy: AtomicBool,
    last_health_check: Mutex<Option<Instant>>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

impl GuardedDistributedCache {
    pub fn new(
        inner: Arc<dyn DistributedCache>,
        operation_timeout: Duration,
        health_check_interval: Duration,
    ) -> Self {
        Self {
            inner,
            operation_timeout,
            health_check_interval,
            healthy: AtomicBool::new(true),
            last_health_check: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn is_marked_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if !self.available().await {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self.bounded("get", self.inner.get(key)).await {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        if !self.available().await {
            return false;
        }
        let stored = self.bounded("set", self.inner.set(key, value, ttl)).await.is_some();
        if stored {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        stored
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.available().await {
            return false;
        }
        self.bounded("delete", self.inner.delete(key))
            .await
            .unwrap_or(false)
    }

    /// Run one operation under the timeout. `None` means it failed.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.mark_unhealthy(operation, &e);
                None
            }
            Err(_) => {
                self.mark_unhealthy(operation, &CacheError::timeout(operation));
                None
            }
        }
    }

    /// Whether to attempt an operation. While unhealthy, at most one ping
    /// per health-check interval is sent.
    async fn available(&self) -> bool {
        if self.is_marked_healthy() {
            return true;
        }

        let due = {
            let mut last = self
                .last_health_check
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let due = last.map_or(true, |t| now.saturating_duration_since(t) >= self.health_check_interval);
            if due {
                *last = Some(now);
            }
            due
        };
        if !due {
            return false;
        }

        let ok = tokio::time::timeout(self.operation_timeout, self.inner.is_healthy())
            .await
            .unwrap_or(false);
        if ok {
            tracing::info!("Distributed cache is reachable again");
            self.healthy.store(true, Ordering::Release);
        } else {
            tracing::debug!("Distributed cache still unavailable");
        }
        ok
    }

    fn mark_unhealthy(&self, operation: &'static str, error: &CacheError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_error("l2", operation);

        if self.healthy.swap(false, Ordering::AcqRel) {
            tracing::warn!(operation, error = %error, "Distributed cache unavailable, treating as miss");
        } else {
            tracing::debug!(operation, error = %error, "Distributed cache operation failed");
        }
        *self
            .last_health_check
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct FlakyCache {
        down: AtomicBool,
        slow: AtomicBool,
        calls: AtomicUsize,
        pings: AtomicUsize,
        store: InMemoryDistributedCache,
    }

    impl FlakyCache {
        async fn op<T>(&self, result: Result<T, CacheError>) -> Result<T, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(CacheError::Unavailable("connection refused".into()));
            }
            result
        }
    }

    #[async_trait]
    impl DistributedCache for FlakyCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            let value = self.store.get(key).await;
            self.op(value).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
            if self.down.load(Ordering::SeqCst) {
                return self.op(Ok(())).await;
            }
            let stored = self.store.set(key, value, ttl).await;
            self.op(stored).await
        }

        async fn delete(&self, key: &str) -> Result<bool, CacheError> {
            let removed = self.store.delete(key).await;
            self.op(removed).await
        }

        async fn is_healthy(&self) -> bool {
            self.pings.fetch_add(1, Ordering::SeqCst);
            !self.down.load(Ordering::SeqCst)
        }
    }

    fn guarded(inner: Arc<FlakyCache>) -> GuardedDistributedCache {
        GuardedDistributedCache::new(inner, Duration::from_millis(500), Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_entries_expire() {
        let cache = InMemoryDistributedCache::new();
        cache.set("k", "v", Some(Duration::from_secs(60))).await.unwrap();
        cache.set("forever", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.get("forever").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_misses_and_writes_counted() {
        let inner = Arc::new(FlakyCache::default());
        let cache = guarded(inner);

        assert!(cache.set("k", "v", None).await);
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await, None);

        let stats = cache.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 0);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_become_misses_and_skip_store() {
        let inner = Arc::new(FlakyCache::default());
        inner.down.store(true, Ordering::SeqCst);
        let cache = guarded(inner.clone());

        assert_eq!(cache.get("k").await, None);
        assert!(!cache.is_marked_healthy());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // Inside the health-check interval nothing reaches the store.
        for _ in 0..5 {
            assert_eq!(cache.get("k").await, None);
            assert!(!cache.set("k", "v", None).await);
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(inner.pings.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_health_check_interval() {
        let inner = Arc::new(FlakyCache::default());
        inner.down.store(true, Ordering::SeqCst);
        let cache = guarded(inner.clone());
        cache.get("k").await;

        inner.down.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!cache.set("k", "v", None).await);
        assert_eq!(inner.pings.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(cache.set("k", "v", None).await);
        assert_eq!(inner.pings.load(Ordering::SeqCst), 1);
        assert!(cache.is_marked_healthy());
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out_as_miss() {
        let inner = Arc::new(FlakyCache::default());
        inner.store.set("k", "v", None).await.unwrap();
        inner.slow.store(true, Ordering::SeqCst);
        let cache = guarded(inner);

        let started = Instant::now();
        assert_eq!(cache.get("k").await, None);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!cache.is_marked_healthy());
        assert_eq!(cache.stats().errors, 1);
    }
}
