//! Media Stream Server
//!
//! Loads configuration, sets up logging and serves the streaming endpoint.

use anyhow::Context;
use media_stream::{MediaStreamer, StreamConfig, StreamMetrics, StreamServer};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Main entry point for the media stream server
///
/// # Usage
/// ```bash
/// # Start with default config (media_stream.yaml)
/// media-stream
///
/// # Start with custom config
/// media-stream /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "media_stream.yaml".to_string());

    let config = StreamConfig::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let level: tracing::Level = config
        .log_level
        .parse()
        .with_context(|| format!("invalid log level {}", config.log_level))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting media stream server");
    info!("Configuration loaded from {}", config_path);
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Object store: {:?}", config.object_store);
    info!("  - Metadata TTL: {} seconds", config.cache.metadata_ttl_secs);
    info!("  - Cache codec: {:?}", config.cache.codec);
    info!("  - Range policy: {:?}", config.stream.range_policy);

    let streamer =
        MediaStreamer::from_config(&config).context("failed to build streaming pipeline")?;
    let metrics = StreamMetrics::new().context("failed to register metrics")?;
    let server = Arc::new(StreamServer::new(Arc::new(streamer), Arc::new(metrics)));

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
