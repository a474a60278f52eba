//! Configuration management for the media streaming service
//!
//! Backends are picked here, from one explicit struct loaded at startup, and
//! handed to the components that use them.

use crate::cache_backend::{CacheBackend, MemoryCacheBackend};
use crate::cache_service::CacheService;
use crate::codec::ValueCodec;
use crate::error::{Result, StreamError};
use crate::metadata_resolver::DEFAULT_KEY_PREFIX;
use crate::object_store::{FsObjectStore, HttpObjectStore, MemoryObjectStore, ObjectStore};
use crate::range_resolver::RangePolicy;
use crate::response_builder::DEFAULT_CACHE_CONTROL;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Address the HTTP server binds to (default: 127.0.0.1:8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Log level: trace, debug, info, warn or error (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    #[serde(default)]
    pub stream: StreamSettings,
}

/// Cache-aside layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a write names none (default: 3600)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// TTL of cached object metadata (default: 1800)
    #[serde(default = "default_metadata_ttl_secs")]
    pub metadata_ttl_secs: u64,

    /// Prefix of metadata cache keys (default: "media:metadata")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub codec: ValueCodec,

    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Byte bound for the memory backend; unbounded when unset
    #[serde(default)]
    pub max_size_bytes: Option<usize>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Which cache backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
}

/// Which object store to read media from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectStoreConfig {
    #[default]
    Memory,
    Filesystem {
        root: PathBuf,
    },
    Http {
        endpoint: String,
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },
}

/// Response settings for the streaming endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// `Cache-Control` sent with media responses
    #[serde(default = "default_cache_control")]
    pub cache_control: String,

    #[serde(default)]
    pub range_policy: RangePolicy,
}

fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_metadata_ttl_secs() -> u64 {
    1800 // 30 minutes
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_cache_control() -> String {
    DEFAULT_CACHE_CONTROL.to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            listen_address: default_listen_address(),
            log_level: default_log_level(),
            cache: CacheConfig::default(),
            object_store: ObjectStoreConfig::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            default_ttl_secs: default_ttl_secs(),
            metadata_ttl_secs: default_metadata_ttl_secs(),
            key_prefix: default_key_prefix(),
            codec: ValueCodec::default(),
            backend: CacheBackendKind::default(),
            max_size_bytes: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            cache_control: default_cache_control(),
            range_policy: RangePolicy::default(),
        }
    }
}

impl StreamConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(StreamConfig)` if loading and validation succeed
    /// * `Err(StreamError::ConfigError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| StreamError::ConfigError(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: StreamConfig = serde_yaml::from_str(content)
            .map_err(|e| StreamError::ConfigError(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - listen_address must parse as a socket address
    /// - log_level must be one of trace, debug, info, warn, error
    /// - both cache TTLs must be > 0
    /// - key_prefix must contain something besides separators
    /// - retry delays must satisfy 0 < initial_delay_ms <= max_delay_ms
    /// - filesystem root and http endpoint must not be empty
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(StreamError::ConfigError(format!(
                "Invalid log_level '{}', must be one of {:?}",
                self.log_level, LOG_LEVELS
            )));
        }

        self.cache.validate()?;
        self.object_store.validate()?;

        if self.stream.cache_control.trim().is_empty() {
            return Err(StreamError::ConfigError(
                "stream.cache_control must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|e| {
            StreamError::ConfigError(format!(
                "Invalid listen_address '{}': {}",
                self.listen_address, e
            ))
        })
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_secs == 0 {
            return Err(StreamError::ConfigError(
                "cache.default_ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.metadata_ttl_secs == 0 {
            return Err(StreamError::ConfigError(
                "cache.metadata_ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.key_prefix.trim().trim_matches(':').is_empty() {
            return Err(StreamError::ConfigError(format!(
                "cache.key_prefix must not be empty, got '{}'",
                self.key_prefix
            )));
        }
        if self.max_size_bytes == Some(0) {
            return Err(StreamError::ConfigError(
                "cache.max_size_bytes must be greater than 0 when set".to_string(),
            ));
        }
        if self.retry.initial_delay_ms == 0 {
            return Err(StreamError::ConfigError(
                "cache.retry.initial_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(StreamError::ConfigError(format!(
                "cache.retry.initial_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    /// Construct the configured cache backend
    pub fn build_backend(&self) -> Arc<dyn CacheBackend> {
        match self.backend {
            CacheBackendKind::Memory => match self.max_size_bytes {
                Some(max) => Arc::new(MemoryCacheBackend::with_max_size(max)),
                None => Arc::new(MemoryCacheBackend::new()),
            },
        }
    }

    /// Construct the cache-aside service over the configured backend
    pub fn build_service(&self) -> CacheService {
        CacheService::new(self.build_backend(), self.default_ttl())
            .with_codec(self.codec)
            .with_retry_policy(self.retry.clone())
    }
}

impl ObjectStoreConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            ObjectStoreConfig::Memory => Ok(()),
            ObjectStoreConfig::Filesystem { root } => {
                if root.as_os_str().is_empty() {
                    return Err(StreamError::ConfigError(
                        "object_store.root must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            ObjectStoreConfig::Http {
                endpoint,
                timeout_secs,
            } => {
                if endpoint.trim().is_empty() {
                    return Err(StreamError::ConfigError(
                        "object_store.endpoint must not be empty".to_string(),
                    ));
                }
                if *timeout_secs == 0 {
                    return Err(StreamError::ConfigError(
                        "object_store.timeout_secs must be greater than 0".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Construct the configured object store
    pub fn build(&self) -> Result<Arc<dyn ObjectStore>> {
        let store: Arc<dyn ObjectStore> = match self {
            ObjectStoreConfig::Memory => Arc::new(MemoryObjectStore::new()),
            ObjectStoreConfig::Filesystem { root } => Arc::new(FsObjectStore::new(root.clone())),
            ObjectStoreConfig::Http {
                endpoint,
                timeout_secs,
            } => Arc::new(HttpObjectStore::new(endpoint, Duration::from_secs(*timeout_secs))?),
        };
        Ok(store)
    }
}
