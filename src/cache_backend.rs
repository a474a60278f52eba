//! Cache backend abstraction and the in-memory implementation
//!
//! The backend is a plain key-value store of opaque bytes with per-key TTL,
//! glob-style key enumeration and numeric increment. Typed access, retries
//! and the cache-aside policy live one level up in
//! [`CacheService`](crate::cache_service::CacheService).

use crate::cache_key::glob_match;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Key-value store with per-key TTL
///
/// Implementations are shared and externally synchronized; callers do not
/// lock around them. Concurrent writes to one key are last-write-wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a live value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value that expires `ttl` from now, replacing any previous value
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Write only if no live value exists. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool>;

    /// Remove a key. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every listed key. Returns how many live values were removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// List live keys matching a glob pattern (`*`, `?`)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Atomically add `delta` to a numeric value
    ///
    /// An absent or non-numeric value counts as 0. An existing expiry is kept;
    /// a newly created counter does not expire.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64>;
}

/// Cached entry with expiration and access tracking
#[derive(Clone)]
struct CacheEntry {
    data: Bytes,
    expires_at: Option<Instant>,
    last_accessed: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Counters for the in-memory backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryCacheStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// In-process cache backend
///
/// Expired entries are dropped lazily on access and swept every
/// `SWEEP_INTERVAL` writes. With a byte bound, least recently used entries are
/// evicted to make room for new values.
pub struct MemoryCacheBackend {
    storage: RwLock<HashMap<String, CacheEntry>>,
    max_size_bytes: Option<usize>,
    writes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

const SWEEP_INTERVAL: u64 = 128;

fn lock_error<T>(_: PoisonError<T>) -> StreamError {
    StreamError::CacheError("memory cache lock poisoned".to_string())
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        MemoryCacheBackend {
            storage: RwLock::new(HashMap::new()),
            max_size_bytes: None,
            writes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a backend bounded to `max_size_bytes` of stored values
    pub fn with_max_size(max_size_bytes: usize) -> Self {
        MemoryCacheBackend {
            max_size_bytes: Some(max_size_bytes),
            ..Self::new()
        }
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let (total_entries, total_bytes) = match self.storage.read() {
            Ok(storage) => (
                storage.len(),
                storage.values().map(|e| e.data.len()).sum(),
            ),
            Err(_) => (0, 0),
        };

        MemoryCacheStats {
            total_entries,
            total_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        match self.storage.write() {
            Ok(mut storage) => {
                let before = storage.len();
                storage.retain(|_, entry| entry.is_live(now));
                before - storage.len()
            }
            Err(_) => 0,
        }
    }

    fn insert_entry(
        &self,
        storage: &mut HashMap<String, CacheEntry>,
        key: &str,
        data: Bytes,
        expires_at: Option<Instant>,
    ) {
        let now = Instant::now();

        if let Some(max_size) = self.max_size_bytes {
            let current: usize = storage
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, e)| e.data.len())
                .sum();
            if current + data.len() > max_size {
                self.evict_lru(storage, key, current + data.len() - max_size);
            }
        }

        storage.insert(
            key.to_string(),
            CacheEntry {
                data,
                expires_at,
                last_accessed: now,
            },
        );

        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            storage.retain(|_, entry| entry.is_live(now));
        }
    }

    /// Evict least recently used entries until `needed_bytes` are freed
    fn evict_lru(
        &self,
        storage: &mut HashMap<String, CacheEntry>,
        keep: &str,
        needed_bytes: usize,
    ) {
        let mut entries: Vec<_> = storage
            .iter()
            .filter(|(k, _)| k.as_str() != keep)
            .map(|(k, v)| (k.clone(), v.last_accessed, v.data.len()))
            .collect();
        entries.sort_by_key(|(_, last_accessed, _)| *last_accessed);

        let mut freed = 0;
        for (key, _, size) in entries {
            if freed >= needed_bytes {
                break;
            }
            storage.remove(&key);
            freed += size;
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        debug!("LRU eviction: freed {} bytes, {} entries left", freed, storage.len());
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        let mut storage = self.storage.write().map_err(lock_error)?;

        let live = storage.get(key).map(|entry| entry.is_live(now));
        let result = match live {
            Some(true) => storage.get_mut(key).map(|entry| {
                entry.last_accessed = now;
                entry.data.clone()
            }),
            Some(false) => {
                storage.remove(key);
                None
            }
            None => None,
        };

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(result)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut storage = self.storage.write().map_err(lock_error)?;
        self.insert_entry(&mut storage, key, value, Some(Instant::now() + ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut storage = self.storage.write().map_err(lock_error)?;

        if storage.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        self.insert_entry(&mut storage, key, value, Some(now + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut storage = self.storage.write().map_err(lock_error)?;
        Ok(storage.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let now = Instant::now();
        let mut storage = self.storage.write().map_err(lock_error)?;
        let removed = keys
            .iter()
            .filter_map(|k| storage.remove(k))
            .filter(|e| e.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let storage = self.storage.read().map_err(lock_error)?;
        Ok(storage.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let storage = self.storage.read().map_err(lock_error)?;
        let mut keys: Vec<String> = storage
            .iter()
            .filter(|(k, e)| e.is_live(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        let mut storage = self.storage.write().map_err(lock_error)?;

        let (current, expires_at) = match storage.get(key) {
            Some(entry) if entry.is_live(now) => {
                let current = std::str::from_utf8(&entry.data)
                    .ok()
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .unwrap_or(0);
                (current, entry.expires_at)
            }
            _ => (0, None),
        };

        let next = current.checked_add(delta).ok_or_else(|| {
            StreamError::InvalidInput(format!("increment of '{}' by {} overflows", key, delta))
        })?;
        self.insert_entry(&mut storage, key, Bytes::from(next.to_string()), expires_at);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_miss() {
        let cache = MemoryCacheBackend::new();
        assert!(cache.get("absent").await.unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = MemoryCacheBackend::new();
        cache.set("k", Bytes::from("v"), HOUR).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from("v")));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = MemoryCacheBackend::new();
        cache.set("k", Bytes::from("v1"), HOUR).await.unwrap();
        cache.set("k", Bytes::from("v2"), HOUR).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from("v2")));
        assert_eq!(cache.stats().total_entries, 1);
    }

    #[tokio::test]
    async fn test_expiration() {
        let cache = MemoryCacheBackend::new();
        cache
            .set("k", Bytes::from("v"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(cache.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!cache.exists("k").await.unwrap());
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let cache = MemoryCacheBackend::new();
        assert!(cache.set_if_absent("k", Bytes::from("a"), HOUR).await.unwrap());
        assert!(!cache.set_if_absent("k", Bytes::from("b"), HOUR).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from("a")));
    }

    #[tokio::test]
    async fn test_delete_and_delete_many() {
        let cache = MemoryCacheBackend::new();
        for k in ["a", "b", "c"] {
            cache.set(k, Bytes::from(k), HOUR).await.unwrap();
        }
        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());

        let removed = cache
            .delete_many(&["b".to_string(), "c".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_keys_pattern() {
        let cache = MemoryCacheBackend::new();
        cache.set("media:a:1", Bytes::new(), HOUR).await.unwrap();
        cache.set("media:a:2", Bytes::new(), HOUR).await.unwrap();
        cache.set("media:b:1", Bytes::new(), HOUR).await.unwrap();

        let keys = cache.keys("media:a:*").await.unwrap();
        assert_eq!(keys, vec!["media:a:1".to_string(), "media:a:2".to_string()]);
        assert_eq!(cache.keys("*").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_increment() {
        let cache = MemoryCacheBackend::new();
        assert_eq!(cache.increment("n", 1).await.unwrap(), 1);
        assert_eq!(cache.increment("n", 5).await.unwrap(), 6);
        assert_eq!(cache.increment("n", -2).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_increment_non_numeric_counts_as_zero() {
        let cache = MemoryCacheBackend::new();
        cache.set("n", Bytes::from("video"), HOUR).await.unwrap();
        assert_eq!(cache.increment("n", 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_increment_overflow() {
        let cache = MemoryCacheBackend::new();
        cache.set("n", Bytes::from(i64::MAX.to_string()), HOUR).await.unwrap();
        assert!(cache.increment("n", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_max_size_evicts_lru() {
        let cache = MemoryCacheBackend::with_max_size(1024);
        cache.set("k1", Bytes::from(vec![1u8; 512]), HOUR).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set("k2", Bytes::from(vec![2u8; 512]), HOUR).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(cache.stats().total_bytes, 1024);

        cache.set("k3", Bytes::from(vec![3u8; 512]), HOUR).await.unwrap();

        assert!(cache.get("k1").await.unwrap().is_none());
        assert!(cache.get("k2").await.unwrap().is_some());
        assert!(cache.get("k3").await.unwrap().is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let cache = MemoryCacheBackend::new();
        for i in 0..5 {
            cache
                .set(&format!("short_{}", i), Bytes::new(), Duration::from_millis(20))
                .await
                .unwrap();
        }
        cache.set("long", Bytes::new(), HOUR).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.cleanup_expired(), 5);
        assert_eq!(cache.stats().total_entries, 1);
    }
}
