//! Media Stream
//!
//! Serves large media objects (video, audio) from an object store over HTTP,
//! honoring byte-range requests for seeking and resuming, with a cache-aside
//! layer in front of object metadata lookups.
//!
//! # Architecture
//!
//! - [`CacheService`]: typed cache-aside access over a [`CacheBackend`], with
//!   read-through, warm-up, pattern invalidation and retried reads
//! - [`MetadataResolver`]: `(bucket, object)` to [`ObjectMetadata`] through the
//!   cache, falling back to an [`ObjectStore`] stat
//! - [`RangeResolver`]: `Range` header to an inclusive [`ByteRange`]
//! - [`ResponseBuilder`]: headers plus a lazy byte stream for the window
//! - [`MediaStreamer`]: the per-request pipeline tying the above together
//! - [`StreamServer`]: hyper HTTP/1 front end with purge, health and metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use media_stream::{MediaStreamer, StreamConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::from_file("media_stream.yaml")?;
//! let streamer = MediaStreamer::from_config(&config)?;
//!
//! let response = streamer.stream("videos", "trailer.mp4", Some("bytes=0-1023")).await?;
//! println!("{} {:?}", response.status, response.headers.get("content-range"));
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! listen_address: "127.0.0.1:8080"
//! cache:
//!   metadata_ttl_secs: 1800
//!   codec: json
//! object_store:
//!   type: filesystem
//!   root: /srv/media
//! stream:
//!   range_policy: permissive
//! ```
//!
//! See [`StreamConfig`] for every option.

pub mod cache_backend;
pub mod cache_key;
pub mod cache_service;
pub mod codec;
pub mod config;
pub mod error;
pub mod metadata_resolver;
pub mod metrics;
pub mod mime;
pub mod models;
pub mod object_store;
pub mod range_resolver;
pub mod response_builder;
pub mod retry;
pub mod server;
pub mod streamer;

// Re-export commonly used types
pub use cache_backend::{CacheBackend, MemoryCacheBackend};
pub use cache_service::{CacheService, CacheStats};
pub use codec::ValueCodec;
pub use config::{ObjectStoreConfig, StreamConfig};
pub use error::{Result, StreamError};
pub use metadata_resolver::MetadataResolver;
pub use metrics::StreamMetrics;
pub use models::{ByteRange, ObjectMetadata, ObjectStat};
pub use object_store::{ByteStream, FsObjectStore, HttpObjectStore, MemoryObjectStore, ObjectStore};
pub use range_resolver::{RangePolicy, RangeResolver};
pub use response_builder::{ResponseBuilder, StreamDescriptor};
pub use retry::RetryPolicy;
pub use server::StreamServer;
pub use streamer::MediaStreamer;
