//! Error types for the media streaming core

use thiserror::Error;

/// Result type alias for streaming operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Error types that can occur while resolving and streaming media objects
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Object not found: {bucket}/{object}")]
    NotFound { bucket: String, object: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Range not satisfiable: start {start} is beyond object size {size}")]
    RangeNotSatisfiable { start: u64, size: u64 },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::IoError(err.to_string())
    }
}

impl StreamError {
    /// Determine if this error should trigger a retry
    ///
    /// Only transient backend conditions are retried. A missing object, bad
    /// identifiers or an undecodable cache value will fail the same way again.
    pub fn should_retry(&self) -> bool {
        match self {
            StreamError::StorageUnavailable(_) => true,
            StreamError::CacheError(_) => true,
            StreamError::Timeout(_) => true,
            StreamError::IoError(_) => true,

            StreamError::NotFound { .. } => false,
            StreamError::InvalidInput(_) => false,
            StreamError::RangeNotSatisfiable { .. } => false,
            StreamError::SerializationError(_) => false,
            StreamError::ConfigError(_) => false,
        }
    }

    /// Convert error to the HTTP status code returned at the transport boundary
    pub fn to_http_status(&self) -> u16 {
        match self {
            StreamError::NotFound { .. } => 404,
            StreamError::InvalidInput(_) => 400,
            StreamError::RangeNotSatisfiable { .. } => 416,
            StreamError::Timeout(_) => 504,

            StreamError::StorageUnavailable(_) => 500,
            StreamError::CacheError(_) => 500,
            StreamError::SerializationError(_) => 500,
            StreamError::ConfigError(_) => 500,
            StreamError::IoError(_) => 500,
        }
    }

    /// Create a NotFound error for a bucket/object pair
    pub fn not_found(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        StreamError::NotFound {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    /// Classify an object-store HTTP status
    ///
    /// 404 becomes `NotFound`, every other failure is a storage outage from the
    /// point of view of this core (auth failures included).
    pub fn from_store_status(status: u16, bucket: &str, object: &str) -> Self {
        if status == 404 {
            StreamError::not_found(bucket, object)
        } else {
            StreamError::StorageUnavailable(format!(
                "object store returned HTTP {} for {}/{}",
                status, bucket, object
            ))
        }
    }

    /// Whether this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StreamError::NotFound { .. })
    }
}
