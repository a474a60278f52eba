//! Object store abstraction and backends
//!
//! Three backends are provided:
//!
//! - [`MemoryObjectStore`]: objects held in process memory
//! - [`FsObjectStore`]: objects stored as files under `root/bucket/object`
//! - [`HttpObjectStore`]: an HTTP origin addressed as `endpoint/bucket/object`,
//!   using `HEAD` for stat and `GET` + `Range` for windowed reads
//!
//! Every read returns a [`ByteStream`] that owns its underlying handle (file,
//! HTTP connection). Dropping the stream, whether after completion, on error
//! or because the client went away, releases that handle.

use crate::error::{Result, StreamError};
use crate::models::ObjectStat;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Chunk size used when streaming from memory or disk
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A stream of object bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Object store client
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Size, content type and etag of an object
    ///
    /// Fails with `NotFound` if the object is absent and `StorageUnavailable`
    /// on transport or auth errors.
    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat>;

    /// Read `length` bytes starting at `offset`
    async fn get_object_range(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream>;

    /// Read the whole object
    async fn get_object(&self, bucket: &str, object: &str) -> Result<ByteStream>;

    /// Store an object of `size` bytes, replacing any previous version
    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: ByteStream,
        content_type: &str,
        size: u64,
    ) -> Result<()>;

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<()>;

    async fn object_exists(&self, bucket: &str, object: &str) -> Result<bool> {
        match self.stat_object(bucket, object).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Reject identifiers that are empty or could escape the bucket namespace
pub fn validate_object_path(bucket: &str, object: &str) -> Result<()> {
    if bucket.trim().is_empty() {
        return Err(StreamError::InvalidInput("bucket name must not be empty".to_string()));
    }
    if bucket.contains('/') || bucket == "." || bucket == ".." {
        return Err(StreamError::InvalidInput(format!("invalid bucket name: {}", bucket)));
    }
    if object.trim().is_empty() {
        return Err(StreamError::InvalidInput("object name must not be empty".to_string()));
    }
    if object.starts_with('/') || object.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return Err(StreamError::InvalidInput(format!("invalid object name: {}", object)));
    }
    Ok(())
}

/// Buffer a byte stream into a single `Bytes`
pub async fn collect_stream(mut data: ByteStream) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = data.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Wrap a single buffer as a chunked `ByteStream`
pub fn stream_from_bytes(data: Bytes) -> ByteStream {
    let chunks: Vec<Result<Bytes>> = (0..data.len())
        .step_by(STREAM_CHUNK_SIZE)
        .map(|start| Ok(data.slice(start..(start + STREAM_CHUNK_SIZE).min(data.len()))))
        .collect();
    Box::pin(stream::iter(chunks))
}

fn content_etag(data: &[u8]) -> String {
    format!("\"{:016x}\"", xxh3_64(data))
}

fn check_window(offset: u64, length: u64, size: u64) -> Result<()> {
    if length == 0 || offset.checked_add(length).map_or(true, |end| end > size) {
        return Err(StreamError::InvalidInput(format!(
            "window offset={} length={} is outside object of {} bytes",
            offset, length, size
        )));
    }
    Ok(())
}

/// Object stored in memory
#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    etag: String,
}

/// In-process object store
///
/// Counts stat and read calls, which makes it a convenient stand-in for a
/// real store when checking cache behavior.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    stat_calls: AtomicUsize,
    read_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing the stream-based `put_object`
    pub fn insert(&self, bucket: &str, object: &str, data: impl Into<Bytes>, content_type: &str) {
        let data = data.into();
        let stored = StoredObject {
            etag: content_etag(&data),
            data,
            content_type: content_type.to_string(),
        };
        if let Ok(mut objects) = self.objects.write() {
            objects.insert((bucket.to_string(), object.to_string()), stored);
        }
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, bucket: &str, object: &str) -> Result<StoredObject> {
        let objects = self
            .objects
            .read()
            .map_err(|_| {
                StreamError::StorageUnavailable("memory store lock poisoned".to_string())
            })?;
        objects
            .get(&(bucket.to_string(), object.to_string()))
            .cloned()
            .ok_or_else(|| StreamError::not_found(bucket, object))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        let stored = self.lookup(bucket, object)?;
        Ok(ObjectStat::new(stored.data.len() as u64)
            .with_content_type(stored.content_type)
            .with_etag(stored.etag))
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let stored = self.lookup(bucket, object)?;
        check_window(offset, length, stored.data.len() as u64)?;

        let start = offset as usize;
        let end = start + length as usize;
        Ok(stream_from_bytes(stored.data.slice(start..end)))
    }

    async fn get_object(&self, bucket: &str, object: &str) -> Result<ByteStream> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let stored = self.lookup(bucket, object)?;
        Ok(stream_from_bytes(stored.data))
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: ByteStream,
        content_type: &str,
        size: u64,
    ) -> Result<()> {
        validate_object_path(bucket, object)?;
        let data = collect_stream(data).await?;
        if data.len() as u64 != size {
            return Err(StreamError::InvalidInput(format!(
                "declared size {} does not match {} bytes received",
                size,
                data.len()
            )));
        }
        self.insert(bucket, object, data, content_type);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| {
                StreamError::StorageUnavailable("memory store lock poisoned".to_string())
            })?;
        objects
            .remove(&(bucket.to_string(), object.to_string()))
            .map(|_| ())
            .ok_or_else(|| StreamError::not_found(bucket, object))
    }
}

/// Filesystem-backed object store rooted at a directory
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsObjectStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, object: &str) -> Result<PathBuf> {
        validate_object_path(bucket, object)?;
        let path = self.root.join(bucket).join(object);
        // validate_object_path already rejects `..`; this guards odd platforms
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(StreamError::InvalidInput(format!("invalid object name: {}", object)));
        }
        Ok(path)
    }

    fn map_io(err: std::io::Error, bucket: &str, object: &str) -> StreamError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StreamError::not_found(bucket, object)
        } else {
            StreamError::StorageUnavailable(format!("{}/{}: {}", bucket, object, err))
        }
    }

    fn file_stream(file: fs::File, length: u64) -> ByteStream {
        Box::pin(stream::try_unfold((file, length), |(mut file, remaining)| async move {
            if remaining == 0 {
                return Ok(None);
            }
            let mut buf = vec![0u8; (remaining as usize).min(STREAM_CHUNK_SIZE)];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Err(StreamError::StorageUnavailable(format!(
                    "file ended with {} bytes still expected",
                    remaining
                )));
            }
            buf.truncate(n);
            Ok(Some((Bytes::from(buf), (file, remaining - n as u64))))
        }))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat> {
        let path = self.object_path(bucket, object)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Self::map_io(e, bucket, object))?;
        if !meta.is_file() {
            return Err(StreamError::not_found(bucket, object));
        }

        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(ObjectStat::new(meta.len()).with_etag(format!("\"{:x}-{:x}\"", modified, meta.len())))
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream> {
        let path = self.object_path(bucket, object)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Self::map_io(e, bucket, object))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| Self::map_io(e, bucket, object))?
            .len();
        check_window(offset, length, size)?;

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| Self::map_io(e, bucket, object))?;
        debug!("Opened {:?} at offset={} for {} bytes", path, offset, length);
        Ok(Self::file_stream(file, length))
    }

    async fn get_object(&self, bucket: &str, object: &str) -> Result<ByteStream> {
        let path = self.object_path(bucket, object)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| Self::map_io(e, bucket, object))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| Self::map_io(e, bucket, object))?
            .len();
        Ok(Self::file_stream(file, size))
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        mut data: ByteStream,
        _content_type: &str,
        size: u64,
    ) -> Result<()> {
        let path = self.object_path(bucket, object)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename so readers never see a partial file
        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".partial");
        let tmp_path = PathBuf::from(tmp_path);
        let mut file = fs::File::create(&tmp_path).await?;
        let mut written = 0u64;
        let copy = async {
            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<_, StreamError>(())
        };

        if let Err(e) = copy.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        if written != size {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StreamError::InvalidInput(format!(
                "declared size {} does not match {} bytes received",
                size, written
            )));
        }

        fs::rename(&tmp_path, &path).await?;
        info!("Stored object {}/{} ({} bytes)", bucket, object, written);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        let path = self.object_path(bucket, object)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::map_io(e, bucket, object))
    }
}

/// HTTP origin object store
pub struct HttpObjectStore {
    client: Client,
    endpoint: reqwest::Url,
}

impl HttpObjectStore {
    /// Create a store for `endpoint` (e.g. `http://origin:9000`) with a request timeout
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| {
                StreamError::ConfigError(format!("invalid object store endpoint: {}", e))
            })?;
        if endpoint.cannot_be_a_base() {
            return Err(StreamError::ConfigError(format!(
                "object store endpoint cannot be a base URL: {}",
                endpoint
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                StreamError::StorageUnavailable(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(HttpObjectStore { client, endpoint })
    }

    fn object_url(&self, bucket: &str, object: &str) -> Result<reqwest::Url> {
        validate_object_path(bucket, object)?;
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StreamError::ConfigError("endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .push(bucket)
            .extend(object.split('/'));
        Ok(url)
    }

    fn transport_error(err: reqwest::Error) -> StreamError {
        if err.is_timeout() {
            StreamError::Timeout(err.to_string())
        } else {
            StreamError::StorageUnavailable(err.to_string())
        }
    }

    /// Stream a response body, failing if it does not carry exactly `expected` bytes
    fn body_stream(response: reqwest::Response, expected: Option<u64>) -> ByteStream {
        let body = response
            .bytes_stream()
            .map_err(|e| StreamError::StorageUnavailable(format!("body read failed: {}", e)));
        let Some(expected) = expected else {
            return Box::pin(body);
        };

        Box::pin(stream::try_unfold(
            (Box::pin(body), expected),
            move |(mut body, remaining)| async move {
                match body.next().await {
                    Some(chunk) => {
                        let chunk = chunk?;
                        let n = chunk.len() as u64;
                        if n > remaining {
                            return Err(StreamError::StorageUnavailable(format!(
                                "origin sent more than the {} bytes expected",
                                expected
                            )));
                        }
                        Ok(Some((chunk, (body, remaining - n))))
                    }
                    None if remaining == 0 => Ok(None),
                    None => Err(StreamError::StorageUnavailable(format!(
                        "origin body ended with {} of {} bytes still expected",
                        remaining, expected
                    ))),
                }
            },
        ))
    }

    /// Check that a `Content-Range` header (`bytes start-end/total`) covers the requested window
    pub fn validate_content_range(content_range: &str, offset: u64, length: u64) -> Result<bool> {
        let content_range = content_range.trim();
        let range_part = content_range.strip_prefix("bytes ").ok_or_else(|| {
            StreamError::StorageUnavailable(format!(
                "Content-Range must start with 'bytes ', got: {}",
                content_range
            ))
        })?;

        let (span, _total) = range_part.split_once('/').ok_or_else(|| {
            StreamError::StorageUnavailable(format!("invalid Content-Range: {}", content_range))
        })?;
        let (start, end) = span.split_once('-').ok_or_else(|| {
            StreamError::StorageUnavailable(format!("invalid Content-Range: {}", content_range))
        })?;

        let start = start.trim().parse::<u64>().map_err(|e| {
            StreamError::StorageUnavailable(format!("invalid Content-Range start: {}", e))
        })?;
        let end = end.trim().parse::<u64>().map_err(|e| {
            StreamError::StorageUnavailable(format!("invalid Content-Range end: {}", e))
        })?;

        Ok(start == offset && end + 1 == offset + length)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat> {
        let url = self.object_url(bucket, object)?;
        debug!("HEAD {}", url);

        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!("Origin returned {} for HEAD {}", status, url);
            return Err(StreamError::from_store_status(status.as_u16(), bucket, object));
        }

        let headers = response.headers();
        let size_bytes = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                StreamError::StorageUnavailable(format!(
                    "Content-Length header missing or invalid for {}/{}",
                    bucket, object
                ))
            })?;

        let header_string = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        Ok(ObjectStat {
            size_bytes,
            content_type: header_string("content-type"),
            etag: header_string("etag"),
        })
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream> {
        if length == 0 {
            return Err(StreamError::InvalidInput("range length must be > 0".to_string()));
        }
        let url = self.object_url(bucket, object)?;
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        debug!("GET {} range={}", url, range);

        let response = self
            .client
            .get(url.clone())
            .header("Range", range)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if status.as_u16() != 206 {
            warn!("Expected 206 for ranged GET {}, got {}", url, status);
            return Err(if status.is_success() {
                StreamError::StorageUnavailable(format!(
                    "origin ignored range request for {}/{} (HTTP {})",
                    bucket, object, status
                ))
            } else {
                StreamError::from_store_status(status.as_u16(), bucket, object)
            });
        }

        let content_range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                StreamError::StorageUnavailable(
                    "missing Content-Range header in 206 response".to_string(),
                )
            })?;
        if !Self::validate_content_range(content_range, offset, length)? {
            return Err(StreamError::StorageUnavailable(format!(
                "Content-Range mismatch: expected {}-{}, got {}",
                offset,
                offset + length - 1,
                content_range
            )));
        }

        Ok(Self::body_stream(response, Some(length)))
    }

    async fn get_object(&self, bucket: &str, object: &str) -> Result<ByteStream> {
        let url = self.object_url(bucket, object)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::from_store_status(status.as_u16(), bucket, object));
        }
        let expected = response.content_length();
        Ok(Self::body_stream(response, expected))
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        data: ByteStream,
        content_type: &str,
        size: u64,
    ) -> Result<()> {
        let url = self.object_url(bucket, object)?;
        let body = collect_stream(data).await?;
        if body.len() as u64 != size {
            return Err(StreamError::InvalidInput(format!(
                "declared size {} does not match {} bytes received",
                size,
                body.len()
            )));
        }

        let response = self
            .client
            .put(url)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::from_store_status(status.as_u16(), bucket, object));
        }
        info!("Stored object {}/{} ({} bytes)", bucket, object, size);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        let url = self.object_url(bucket, object)?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::from_store_status(status.as_u16(), bucket, object));
        }
        Ok(())
    }
}
