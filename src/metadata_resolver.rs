//! Media metadata resolver
//!
//! Looks up [`ObjectMetadata`] for `(bucket, object)` through the cache-aside
//! service and falls back to an object store `stat` on a miss. The cache copy
//! is only trusted for `metadata_ttl`. Whoever overwrites or deletes an object
//! must call [`MetadataResolver::invalidate`] for it.
//!
//! Missing objects are never cached: every lookup of an absent object goes
//! back to the store.

use crate::cache_key;
use crate::cache_service::CacheService;
use crate::error::Result;
use crate::mime;
use crate::models::ObjectMetadata;
use crate::object_store::{validate_object_path, ObjectStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Default cache key prefix for object metadata
pub const DEFAULT_KEY_PREFIX: &str = "media:metadata";

/// Resolves object metadata through the cache, falling back to the store
pub struct MetadataResolver {
    cache: Arc<CacheService>,
    store: Arc<dyn ObjectStore>,
    key_prefix: String,
    metadata_ttl: Duration,
}

impl MetadataResolver {
    pub fn new(
        cache: Arc<CacheService>,
        store: Arc<dyn ObjectStore>,
        metadata_ttl: Duration,
    ) -> Self {
        MetadataResolver {
            cache,
            store,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            metadata_ttl,
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn metadata_ttl(&self) -> Duration {
        self.metadata_ttl
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Cache key holding the metadata of `(bucket, object)`
    pub fn cache_key(&self, bucket: &str, object: &str) -> String {
        self.cache.generate_key(&self.key_prefix, &[bucket, object])
    }

    /// Resolve metadata for an object
    ///
    /// # Arguments
    /// * `bucket` - Bucket name
    /// * `object` - Object name, may contain `/`
    ///
    /// # Returns
    /// * `Ok(ObjectMetadata)` from cache, or freshly computed and written back
    /// * `Err(StreamError::NotFound)` if the store has no such object (not cached)
    /// * `Err(StreamError::StorageUnavailable)` if the store cannot be reached
    /// * `Err(StreamError::InvalidInput)` for malformed identifiers
    pub async fn resolve(&self, bucket: &str, object: &str) -> Result<ObjectMetadata> {
        validate_object_path(bucket, object)?;
        let key = self.cache_key(bucket, object);

        self.cache
            .get_or_compute(&key, || self.fetch(bucket, object), Some(self.metadata_ttl))
            .await
    }

    /// Remove the cached metadata of one object
    ///
    /// Returns whether a cache entry was removed.
    pub async fn invalidate(&self, bucket: &str, object: &str) -> bool {
        let key = self.cache_key(bucket, object);
        let removed = self.cache.delete(&key).await;
        debug!("Invalidated metadata: key={}, removed={}", key, removed);
        removed
    }

    /// Remove the cached metadata of every object in a bucket
    ///
    /// Two-step enumerate-then-delete, so entries written concurrently may survive.
    pub async fn invalidate_bucket(&self, bucket: &str) -> u64 {
        let pattern = cache_key::key_pattern(&self.key_prefix, &[bucket]);
        let removed = self.cache.delete_by_pattern(&pattern).await;
        info!("Invalidated bucket metadata: bucket={}, removed={}", bucket, removed);
        removed
    }

    /// Pre-populate the cache for an object if it is not already cached
    ///
    /// Returns `Ok(true)` if this call stored fresh metadata.
    pub async fn warm_up(&self, bucket: &str, object: &str) -> Result<bool> {
        validate_object_path(bucket, object)?;
        let key = self.cache_key(bucket, object);
        self.cache
            .warm_up(&key, || self.fetch(bucket, object), Some(self.metadata_ttl))
            .await
    }

    async fn fetch(&self, bucket: &str, object: &str) -> Result<ObjectMetadata> {
        debug!("Metadata miss, querying store: bucket={}, object={}", bucket, object);

        let stat = self.store.stat_object(bucket, object).await.map_err(|e| {
            if !e.is_not_found() {
                warn!("Stat failed: bucket={}, object={}, error={}", bucket, object, e);
            }
            e
        })?;

        let content_type = mime::resolve_content_type(stat.content_type.as_deref(), object);
        let etag = match stat.etag {
            Some(etag) if !etag.trim().is_empty() => etag,
            _ => derived_etag(bucket, object, stat.size_bytes),
        };

        info!(
            "Resolved metadata: bucket={}, object={}, size={}, content_type={}",
            bucket, object, stat.size_bytes, content_type
        );
        Ok(ObjectMetadata::new(bucket, object, stat.size_bytes, content_type, etag))
    }
}

/// Fallback etag for stores that report none
fn derived_etag(bucket: &str, object: &str, size: u64) -> String {
    let seed = format!("{}/{}:{}", bucket, object, size);
    format!("\"{:016x}\"", xxh3_64(seed.as_bytes()))
}
