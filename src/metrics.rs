//! Prometheus metrics for the streaming endpoint
//!
//! Every [`StreamMetrics`] owns its registry, so several instances (one per
//! test, say) never collide on metric names.

use crate::cache_service::CacheStats;
use crate::error::{Result, StreamError};
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Metrics for streaming, purge and metadata cache activity
#[derive(Clone)]
pub struct StreamMetrics {
    registry: Registry,

    /// Requests by HTTP method and response status
    pub requests_total: CounterVec,

    /// Sum of advertised `Content-Length` for streamed responses
    pub bytes_served_total: IntCounter,

    /// Time to produce response headers, by method
    pub request_duration_seconds: HistogramVec,

    /// Purged metadata entries, by scope (object/bucket)
    pub purged_entries_total: CounterVec,

    pub metadata_cache_hits: IntGauge,
    pub metadata_cache_misses: IntGauge,
    pub metadata_cache_errors: IntGauge,
}

impl StreamMetrics {
    /// Create metrics registered on a fresh registry
    pub fn new() -> std::result::Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on `registry`
    pub fn with_registry(registry: Registry) -> std::result::Result<Self, prometheus::Error> {
        let requests_total = CounterVec::new(
            Opts::new(
                "media_stream_requests_total",
                "Total number of requests by method and status",
            ),
            &["method", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let bytes_served_total = IntCounter::new(
            "media_stream_bytes_served_total",
            "Total bytes advertised in streamed responses",
        )?;
        registry.register(Box::new(bytes_served_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "media_stream_request_duration_seconds",
                "Time to build response headers in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["method"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let purged_entries_total = CounterVec::new(
            Opts::new("media_stream_purged_entries_total", "Total metadata cache entries purged"),
            &["scope"],
        )?;
        registry.register(Box::new(purged_entries_total.clone()))?;

        let metadata_cache_hits =
            IntGauge::new("media_stream_metadata_cache_hits", "Metadata cache hits")?;
        registry.register(Box::new(metadata_cache_hits.clone()))?;
        let metadata_cache_misses =
            IntGauge::new("media_stream_metadata_cache_misses", "Metadata cache misses")?;
        registry.register(Box::new(metadata_cache_misses.clone()))?;
        let metadata_cache_errors = IntGauge::new(
            "media_stream_metadata_cache_errors",
            "Cache backend failures absorbed on the read path",
        )?;
        registry.register(Box::new(metadata_cache_errors.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            bytes_served_total,
            request_duration_seconds,
            purged_entries_total,
            metadata_cache_hits,
            metadata_cache_misses,
            metadata_cache_errors,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished request
    pub fn record_request(&self, method: &str, status: u16, duration_secs: f64) {
        self.requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[method])
            .observe(duration_secs);
    }

    pub fn record_bytes_served(&self, bytes: u64) {
        self.bytes_served_total.inc_by(bytes);
    }

    pub fn record_purge(&self, scope: &str, count: u64) {
        self.purged_entries_total
            .with_label_values(&[scope])
            .inc_by(count as f64);
    }

    /// Copy cache-aside counters into the gauges
    pub fn observe_cache(&self, stats: &CacheStats) {
        self.metadata_cache_hits.set(stats.hits as i64);
        self.metadata_cache_misses.set(stats.misses as i64);
        self.metadata_cache_errors.set(stats.errors as i64);
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| StreamError::SerializationError(format!("metrics encode: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| StreamError::SerializationError(format!("metrics encode: {}", e)))
    }
}
