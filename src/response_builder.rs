//! Streaming response builder
//!
//! Combines resolved metadata and a resolved byte window into a
//! [`StreamDescriptor`]: status, headers, content length and a byte source.
//! The byte source is lazy. No object store read is issued until the
//! transport polls the body, so a `HEAD` or an aborted request costs no I/O.

use crate::error::{Result, StreamError};
use crate::mime::DEFAULT_CONTENT_TYPE;
use crate::models::{ByteRange, ObjectMetadata};
use crate::object_store::{ByteStream, ObjectStore};
use bytes::Bytes;
use futures::stream::{self, TryStreamExt};
use http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
    ETAG,
};
use http::{HeaderMap, HeaderValue, StatusCode};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// RFC 5987 `attr-char`: everything else is percent-encoded in `filename*`
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Default `Cache-Control` for streamed media
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=3600";

/// Everything the transport needs to answer a streaming request
pub struct StreamDescriptor {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_length: u64,
    /// The served window, `None` for an empty object
    pub range: Option<ByteRange>,
    pub body: ByteStream,
}

impl fmt::Debug for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDescriptor")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

/// Builds partial-content responses backed by an object store
pub struct ResponseBuilder {
    store: Arc<dyn ObjectStore>,
    cache_control: HeaderValue,
}

impl ResponseBuilder {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        ResponseBuilder {
            store,
            cache_control: HeaderValue::from_static(DEFAULT_CACHE_CONTROL),
        }
    }

    /// Use a custom `Cache-Control` value
    pub fn with_cache_control(mut self, cache_control: &str) -> Result<Self> {
        self.cache_control = header_value(cache_control)?;
        Ok(self)
    }

    /// Build the response for `range` of the object described by `metadata`
    ///
    /// # Arguments
    /// * `metadata` - Resolved object metadata
    /// * `range` - Window to serve; `None` only for an empty object
    ///
    /// # Returns
    /// * `Ok(StreamDescriptor)` with status 206, or 200 with an empty body for
    ///   an empty object
    /// * `Err(StreamError::InvalidInput)` if the window does not fit the object
    pub fn build(
        &self,
        metadata: &ObjectMetadata,
        range: Option<ByteRange>,
    ) -> Result<StreamDescriptor> {
        let total_size = metadata.size_bytes;
        let mut headers = self.common_headers(metadata);

        let range = match range {
            Some(range) => range,
            None if total_size == 0 => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
                debug!("Empty object {}/{}, answering 200", metadata.bucket, metadata.object);
                return Ok(StreamDescriptor {
                    status: StatusCode::OK,
                    headers,
                    content_length: 0,
                    range: None,
                    body: Box::pin(stream::empty::<Result<Bytes>>()),
                });
            }
            None => {
                return Err(StreamError::InvalidInput(format!(
                    "no byte range given for non-empty object {}/{}",
                    metadata.bucket, metadata.object
                )))
            }
        };

        if !range.fits_within(total_size) {
            return Err(StreamError::InvalidInput(format!(
                "range {}-{} exceeds object size {}",
                range.start, range.end, total_size
            )));
        }

        let content_length = range.size();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        headers.insert(CONTENT_RANGE, header_value(&range.to_content_range(total_size))?);

        debug!(
            "Built 206 for {}/{}: range={}-{}, content_length={}",
            metadata.bucket, metadata.object, range.start, range.end, content_length
        );

        Ok(StreamDescriptor {
            status: StatusCode::PARTIAL_CONTENT,
            headers,
            content_length,
            range: Some(range),
            body: lazy_window(
                self.store.clone(),
                metadata.bucket.clone(),
                metadata.object.clone(),
                range.start,
                content_length,
            ),
        })
    }

    fn common_headers(&self, metadata: &ObjectMetadata) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let content_type = HeaderValue::from_str(&metadata.content_type).unwrap_or_else(|_| {
            warn!("Unusable content type '{}', using default", metadata.content_type);
            HeaderValue::from_static(DEFAULT_CONTENT_TYPE)
        });
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CACHE_CONTROL, self.cache_control.clone());

        if let Ok(disposition) = header_value(&content_disposition(metadata.file_name())) {
            headers.insert(CONTENT_DISPOSITION, disposition);
        }

        if !metadata.etag.is_empty() {
            match header_value(&quote_etag(&metadata.etag)) {
                Ok(etag) => {
                    headers.insert(ETAG, etag);
                }
                Err(e) => warn!("Skipping ETag for {}/{}: {}", metadata.bucket, metadata.object, e),
            }
        }

        headers
    }
}

/// A body that opens the store read on first poll
///
/// Dropping the stream before it is polled means the read never happens.
/// Dropping it mid-way drops the store stream and with it the file handle or
/// connection it owns.
fn lazy_window(
    store: Arc<dyn ObjectStore>,
    bucket: String,
    object: String,
    offset: u64,
    length: u64,
) -> ByteStream {
    Box::pin(
        stream::once(async move { store.get_object_range(&bucket, &object, offset, length).await })
            .try_flatten(),
    )
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| StreamError::InvalidInput(format!("Invalid header value '{}': {}", value, e)))
}

/// Wrap an etag in quotes unless it already is a quoted or weak etag
pub fn quote_etag(etag: &str) -> String {
    let etag = etag.trim();
    let strong = etag.len() >= 2 && etag.starts_with('"') && etag.ends_with('"');
    if strong || etag.starts_with("W/\"") {
        etag.to_string()
    } else {
        format!("\"{}\"", etag.trim_matches('"'))
    }
}

/// `inline; filename="..."`, with an RFC 5987 `filename*` for non-ASCII names
pub fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();

    if file_name.is_ascii() {
        return format!("inline; filename=\"{}\"", ascii);
    }

    let encoded = utf8_percent_encode(file_name, ATTR_CHAR);
    format!("inline; filename=\"{}\"; filename*=UTF-8''{}", ascii, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{collect_stream, MemoryObjectStore};

    fn metadata(size: u64) -> ObjectMetadata {
        ObjectMetadata::new("videos", "movies/video.mp4", size, "video/mp4", "abc123")
    }

    fn builder() -> (Arc<MemoryObjectStore>, ResponseBuilder) {
        let store = Arc::new(MemoryObjectStore::new());
        let builder = ResponseBuilder::new(store.clone());
        (store, builder)
    }

    #[test]
    fn test_build_partial_content_headers() {
        let (_store, builder) = builder();
        let range = ByteRange::new(500_000, 999_999).unwrap();
        let descriptor = builder.build(&metadata(1_000_000), Some(range)).unwrap();

        assert_eq!(descriptor.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(descriptor.content_length, 500_000);
        let h = &descriptor.headers;
        assert_eq!(h.get("content-length").unwrap(), "500000");
        assert_eq!(h.get("content-range").unwrap(), "bytes 500000-999999/1000000");
        assert_eq!(h.get("content-type").unwrap(), "video/mp4");
        assert_eq!(h.get("accept-ranges").unwrap(), "bytes");
        assert_eq!(h.get("etag").unwrap(), "\"abc123\"");
        assert_eq!(h.get("cache-control").unwrap(), DEFAULT_CACHE_CONTROL);
        assert_eq!(h.get("content-disposition").unwrap(), "inline; filename=\"video.mp4\"");
    }

    #[test]
    fn test_build_rejects_range_outside_object() {
        let (_store, builder) = builder();
        let range = ByteRange::new(0, 100).unwrap();
        assert!(matches!(
            builder.build(&metadata(100), Some(range)),
            Err(StreamError::InvalidInput(_))
        ));
        assert!(builder.build(&metadata(100), None).is_err());
    }

    #[tokio::test]
    async fn test_empty_object() {
        let (_store, builder) = builder();
        let descriptor = builder.build(&metadata(0), None).unwrap();
        assert_eq!(descriptor.status, StatusCode::OK);
        assert_eq!(descriptor.headers.get("content-length").unwrap(), "0");
        assert!(descriptor.headers.get("content-range").is_none());
        assert!(collect_stream(descriptor.body).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_body_is_lazy() {
        let (store, builder) = builder();
        store.insert("videos", "movies/video.mp4", (0u8..100).collect::<Vec<u8>>(), "video/mp4");

        let descriptor = builder
            .build(&metadata(100), Some(ByteRange::new(10, 19).unwrap()))
            .unwrap();
        assert_eq!(store.read_calls(), 0);

        let body = collect_stream(descriptor.body).await.unwrap();
        assert_eq!(store.read_calls(), 1);
        assert_eq!(&body[..], &(10u8..20).collect::<Vec<u8>>()[..]);
    }

    #[tokio::test]
    async fn test_dropped_body_never_reads() {
        let (store, builder) = builder();
        let descriptor = builder.build(&metadata(100), ByteRange::full(100)).unwrap();
        drop(descriptor);
        assert_eq!(store.read_calls(), 0);
    }

    #[tokio::test]
    async fn test_store_error_surfaces_in_body() {
        let (_store, builder) = builder();
        let descriptor = builder.build(&metadata(100), ByteRange::full(100)).unwrap();
        let err = collect_stream(descriptor.body).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_custom_cache_control() {
        let (store, _) = builder();
        let builder = ResponseBuilder::new(store).with_cache_control("no-store").unwrap();
        let descriptor = builder.build(&metadata(10), ByteRange::full(10)).unwrap();
        assert_eq!(descriptor.headers.get("cache-control").unwrap(), "no-store");
    }

    #[test]
    fn test_quote_etag() {
        assert_eq!(quote_etag("abc"), "\"abc\"");
        assert_eq!(quote_etag("\"abc\""), "\"abc\"");
        assert_eq!(quote_etag("W/\"abc\""), "W/\"abc\"");
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(content_disposition("a.mp4"), "inline; filename=\"a.mp4\"");
        assert_eq!(content_disposition("my \"clip\".mp4"), "inline; filename=\"my _clip_.mp4\"");
        assert_eq!(
            content_disposition("é.mp4"),
            "inline; filename=\"_.mp4\"; filename*=UTF-8''%C3%A9.mp4"
        );
    }
}
