//! Core data models for media streaming

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};

/// An inclusive byte window of an object, as served in a 206 response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if `start <= end`
    /// * `Err(StreamError::InvalidInput)` otherwise
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(StreamError::InvalidInput(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ByteRange { start, end })
    }

    /// The whole object `[0, size - 1]`, or `None` for an empty object
    pub fn full(size: u64) -> Option<Self> {
        if size == 0 {
            None
        } else {
            Some(ByteRange {
                start: 0,
                end: size - 1,
            })
        }
    }

    /// Number of bytes covered, `end - start + 1`, or 0 if `start > end`
    pub fn size(&self) -> u64 {
        self.end.checked_sub(self.start).map_or(0, |span| span.saturating_add(1))
    }

    /// Whether this range lies within an object of `total_size` bytes
    pub fn fits_within(&self, total_size: u64) -> bool {
        self.start <= self.end && self.end < total_size
    }

    /// Format as a `Content-Range` value, e.g. `bytes 0-1023/10240`
    pub fn to_content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }

    /// Format as a `Range` request value, e.g. `bytes=0-1023`
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Raw metadata reported by an object store `STAT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

impl ObjectStat {
    pub fn new(size_bytes: u64) -> Self {
        ObjectStat {
            size_bytes,
            content_type: None,
            etag: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Resolved metadata for one object, as held in the metadata cache
///
/// Immutable for a given object version. The cache copy is only valid for its
/// TTL window and must be invalidated by whoever overwrites or deletes the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub object: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub etag: String,
}

impl ObjectMetadata {
    pub fn new(
        bucket: impl Into<String>,
        object: impl Into<String>,
        size_bytes: u64,
        content_type: impl Into<String>,
        etag: impl Into<String>,
    ) -> Self {
        ObjectMetadata {
            bucket: bucket.into(),
            object: object.into(),
            size_bytes,
            content_type: content_type.into(),
            etag: etag.into(),
        }
    }

    /// Final path segment of the object name, used for `Content-Disposition`
    pub fn file_name(&self) -> &str {
        self.object.rsplit('/').next().unwrap_or(&self.object)
    }
}
