//! Per-request streaming pipeline
//!
//! Metadata resolution always finishes before the range is resolved and the
//! byte read is prepared, since the read needs the object size.

use crate::cache_service::CacheStats;
use crate::config::StreamConfig;
use crate::error::Result;
use crate::metadata_resolver::MetadataResolver;
use crate::object_store::ObjectStore;
use crate::range_resolver::RangeResolver;
use crate::response_builder::{ResponseBuilder, StreamDescriptor};
use std::sync::Arc;
use tracing::debug;

/// Resolves metadata and range for a request and builds its response
pub struct MediaStreamer {
    resolver: Arc<MetadataResolver>,
    ranges: RangeResolver,
    builder: ResponseBuilder,
}

impl MediaStreamer {
    pub fn new(
        resolver: Arc<MetadataResolver>,
        ranges: RangeResolver,
        builder: ResponseBuilder,
    ) -> Self {
        MediaStreamer {
            resolver,
            ranges,
            builder,
        }
    }

    /// Wire a streamer over `store` using the cache and stream settings of `config`
    pub fn with_store(config: &StreamConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let cache = Arc::new(config.cache.build_service());
        let resolver = MetadataResolver::new(cache, store.clone(), config.cache.metadata_ttl())
            .with_key_prefix(config.cache.key_prefix.clone());
        let builder = ResponseBuilder::new(store).with_cache_control(&config.stream.cache_control)?;

        Ok(MediaStreamer::new(
            Arc::new(resolver),
            RangeResolver::new(config.stream.range_policy),
            builder,
        ))
    }

    /// Wire a streamer with the object store named in `config`
    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        let store = config.object_store.build()?;
        Self::with_store(config, store)
    }

    pub fn resolver(&self) -> &Arc<MetadataResolver> {
        &self.resolver
    }

    /// Produce the response for `GET /stream/{bucket}/{object}`
    ///
    /// # Arguments
    /// * `bucket` - Bucket name
    /// * `object` - Object name (already percent-decoded)
    /// * `range_header` - Raw `Range` header value, if any
    pub async fn stream(
        &self,
        bucket: &str,
        object: &str,
        range_header: Option<&str>,
    ) -> Result<StreamDescriptor> {
        let metadata = self.resolver.resolve(bucket, object).await?;
        let range = self.ranges.resolve(range_header, metadata.size_bytes)?;
        debug!(
            "Streaming {}/{}: range_header={:?}, resolved={:?}",
            bucket, object, range_header, range
        );
        self.builder.build(&metadata, range)
    }

    pub async fn invalidate(&self, bucket: &str, object: &str) -> bool {
        self.resolver.invalidate(bucket, object).await
    }

    pub async fn invalidate_bucket(&self, bucket: &str) -> u64 {
        self.resolver.invalidate_bucket(bucket).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.cache().stats()
    }
}
