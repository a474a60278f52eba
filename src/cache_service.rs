//! Cache-aside service
//!
//! Typed, best-effort access to a [`CacheBackend`]:
//!
//! - reads (`get`, `exists`, `delete*`) absorb backend failures and degrade to
//!   a miss / `false` / `0`, so an unavailable cache costs latency, not
//!   correctness
//! - writes (`set`, `set_multiple`, `increment`) surface failures so callers
//!   know whether the data actually landed
//! - `get_or_compute` is read-through without a lock: concurrent callers that
//!   all miss will all run their supplier, and the last write wins
//! - `delete_by_pattern` and `set_multiple` are not atomic across keys

use crate::cache_backend::CacheBackend;
use crate::cache_key;
use crate::codec::ValueCodec;
use crate::error::Result;
use crate::retry::RetryPolicy;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Snapshot of cache-aside counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Backend or decode failures absorbed on the read path
    pub errors: u64,
    /// Supplier / loader invocations
    pub computes: u64,
    /// Read retries issued by `get_with_retry`
    pub retries: u64,
}

impl CacheStats {
    /// Hit rate as a percentage (0-100)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    computes: AtomicU64,
    retries: AtomicU64,
}

/// Generic cache-aside layer over a shared cache backend
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    codec: ValueCodec,
    default_ttl: Duration,
    retry_policy: RetryPolicy,
    counters: Counters,
}

impl CacheService {
    /// Create a service with the JSON codec and the default retry policy
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        CacheService {
            backend,
            codec: ValueCodec::default(),
            default_ttl,
            retry_policy: RetryPolicy::default(),
            counters: Counters::default(),
        }
    }

    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Deterministic key for `(prefix, identifiers)`, see [`cache_key::generate_key`]
    pub fn generate_key<S: AsRef<str>>(&self, prefix: &str, identifiers: &[S]) -> String {
        cache_key::generate_key(prefix, identifiers)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            computes: self.counters.computes.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    fn decode_hit<T: DeserializeOwned>(&self, key: &str, raw: Option<Bytes>) -> Option<T> {
        let Some(raw) = raw else {
            debug!("Cache miss: key={}", key);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match self.codec.decode(&raw) {
            Ok(value) => {
                debug!("Cache hit: key={}", key);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                warn!("Undecodable cache value, treating as miss: key={}, error={}", key, e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Read a typed value. Misses, backend failures and undecodable values all
    /// come back as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.backend.get(key).await {
            Ok(raw) => self.decode_hit(key, raw),
            Err(e) => {
                warn!("Cache read failed, treating as miss: key={}, error={}", key, e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write a typed value with `ttl`, or the default TTL when `None`
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = self.codec.encode(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.backend.set(key, raw, ttl).await.map_err(|e| {
            warn!("Cache write failed: key={}, error={}", key, e);
            e
        })?;
        debug!("Cached value: key={}, ttl={:?}", key, ttl);
        Ok(())
    }

    /// Read-through: return the cached value, or run `supplier`, cache its
    /// result and return it
    ///
    /// The supplier runs at most once per call. Supplier errors propagate and
    /// nothing is cached for them. A failed cache write after a successful
    /// computation is logged and the computed value is still returned.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        supplier: F,
        ttl: Option<Duration>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        self.counters.computes.fetch_add(1, Ordering::Relaxed);
        let value = supplier().await?;

        if let Err(e) = self.set(key, &value, ttl).await {
            warn!("Computed value not cached: key={}, error={}", key, e);
        }
        Ok(value)
    }

    /// Delete one key. Backend failures read as `false`.
    pub async fn delete(&self, key: &str) -> bool {
        match self.backend.delete(key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Cache delete failed: key={}, error={}", key, e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Delete every listed key, returning how many were removed
    pub async fn delete_many(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        match self.backend.delete_many(keys).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Cache bulk delete failed: keys={}, error={}", keys.len(), e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Delete every key matching a glob pattern such as `prefix:*`
    ///
    /// Enumerates then deletes; keys written in between may survive.
    pub async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let keys = match self.backend.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cache key scan failed: pattern={}, error={}", pattern, e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let removed = self.delete_many(&keys).await;
        debug!(
            "Pattern delete: pattern={}, matched={}, removed={}",
            pattern,
            keys.len(),
            removed
        );
        removed
    }

    /// Whether a live value exists. Backend failures read as `false`.
    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Cache exists check failed: key={}, error={}", key, e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Add 1 to a counter
    pub async fn increment(&self, key: &str) -> Result<i64> {
        self.increment_by(key, 1).await
    }

    /// Add `delta` to a counter; absent or non-numeric values start at 0
    pub async fn increment_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.backend.increment(key, delta).await
    }

    /// Write every entry with the same TTL
    ///
    /// Entries are written in order and the first failure aborts the rest.
    /// Entries written before the failure stay written.
    pub async fn set_multiple<T, I>(&self, entries: I, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize,
        I: IntoIterator<Item = (String, T)>,
    {
        let mut written = 0usize;
        for (key, value) in entries {
            if let Err(e) = self.set(&key, &value, ttl).await {
                warn!(
                    "Bulk cache write aborted after {} entries at key={}: {}",
                    written, key, e
                );
                return Err(e);
            }
            written += 1;
        }
        debug!("Bulk cache write complete: entries={}", written);
        Ok(())
    }

    /// Populate `key` from `loader` only if it is currently absent
    ///
    /// Returns `Ok(true)` if this call wrote the value, `Ok(false)` if the key
    /// was already populated (the loader is not invoked in that case).
    pub async fn warm_up<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Option<Duration>,
    ) -> Result<bool>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.exists(key).await {
            debug!("Warm-up skipped, key already populated: key={}", key);
            return Ok(false);
        }

        self.counters.computes.fetch_add(1, Ordering::Relaxed);
        let value = loader().await?;
        let raw = self.codec.encode(&value)?;
        let written = self
            .backend
            .set_if_absent(key, raw, ttl.unwrap_or(self.default_ttl))
            .await?;

        debug!("Warm-up: key={}, written={}", key, written);
        Ok(written)
    }

    /// Read with retries on backend failure
    ///
    /// Uses the configured policy's backoff with `max_retries` overriding its
    /// retry ceiling when given. A plain miss is not retried. Once retries are
    /// exhausted the result is `None`, never an error.
    pub async fn get_with_retry<T: DeserializeOwned>(
        &self,
        key: &str,
        max_retries: Option<usize>,
    ) -> Option<T> {
        let policy = match max_retries {
            Some(n) => self.retry_policy.with_max_retries(n),
            None => self.retry_policy.clone(),
        };
        let mut attempt = 0;

        loop {
            match self.backend.get(key).await {
                Ok(raw) => return self.decode_hit(key, raw),
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    if !policy.should_retry(attempt, &e) {
                        warn!(
                            "Cache read gave up after {} attempts: key={}, error={}",
                            attempt + 1,
                            key,
                            e
                        );
                        self.counters.misses.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }

                    let backoff = policy.backoff_duration(attempt);
                    warn!(
                        "Cache read failed (attempt {}), retrying after {:?}: key={}, error={}",
                        attempt + 1,
                        backoff,
                        key,
                        e
                    );
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
