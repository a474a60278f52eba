//! End-to-end tests: HTTP request in, streamed media out

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use media_stream::config::StreamConfig;
use media_stream::metrics::StreamMetrics;
use media_stream::object_store::{collect_stream, MemoryObjectStore};
use media_stream::range_resolver::RangePolicy;
use media_stream::server::{PurgeResponse, ResponseBody};
use media_stream::{MediaStreamer, StreamServer};
use std::sync::Arc;

const VIDEO_SIZE: usize = 1_000_000;

fn video_bytes() -> Vec<u8> {
    (0..VIDEO_SIZE).map(|i| (i % 253) as u8).collect()
}

fn store_with_video() -> Arc<MemoryObjectStore> {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert("videos", "video.mp4", video_bytes(), "video/mp4");
    store
}

fn server_with(config: &StreamConfig, store: Arc<MemoryObjectStore>) -> StreamServer {
    let streamer = MediaStreamer::with_store(config, store).unwrap();
    StreamServer::new(Arc::new(streamer), Arc::new(StreamMetrics::new().unwrap()))
}

fn request(method: Method, uri: &str, range: Option<&str>) -> Request<()> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(range) = range {
        builder = builder.header("range", range);
    }
    builder.body(()).unwrap()
}

async fn body_bytes(body: ResponseBody) -> Bytes {
    body.collect().await.unwrap().to_bytes()
}

fn header<'a>(response: &'a http::Response<ResponseBody>, name: &str) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn test_streamer_open_ended_range() {
    let streamer = MediaStreamer::with_store(&StreamConfig::default(), store_with_video()).unwrap();

    let descriptor = streamer
        .stream("videos", "video.mp4", Some("bytes=500000-"))
        .await
        .unwrap();

    assert_eq!(descriptor.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(descriptor.content_length, 500_000);
    assert_eq!(descriptor.headers.get("content-range").unwrap(), "bytes 500000-999999/1000000");
    assert_eq!(descriptor.headers.get("content-type").unwrap(), "video/mp4");

    let body = collect_stream(descriptor.body).await.unwrap();
    assert_eq!(&body[..], &video_bytes()[500_000..]);
}

#[tokio::test]
async fn test_streamer_without_range_serves_whole_object() {
    let streamer = MediaStreamer::with_store(&StreamConfig::default(), store_with_video()).unwrap();

    let descriptor = streamer.stream("videos", "video.mp4", None).await.unwrap();
    assert_eq!(descriptor.content_length, VIDEO_SIZE as u64);
    assert_eq!(descriptor.headers.get("content-range").unwrap(), "bytes 0-999999/1000000");
    assert_eq!(descriptor.headers.get("content-length").unwrap(), "1000000");
}

#[tokio::test]
async fn test_streamer_caches_metadata_between_requests() {
    let store = store_with_video();
    let streamer = MediaStreamer::with_store(&StreamConfig::default(), store.clone()).unwrap();

    streamer.stream("videos", "video.mp4", Some("bytes=0-99")).await.unwrap();
    streamer.stream("videos", "video.mp4", Some("bytes=100-199")).await.unwrap();

    assert_eq!(store.stat_calls(), 1);
    // Descriptors were dropped unread
    assert_eq!(store.read_calls(), 0);
    let stats = streamer.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_get_range_over_http() {
    let server = server_with(&StreamConfig::default(), store_with_video());

    let response = server
        .handle_request(request(Method::GET, "/stream/videos/video.mp4", Some("bytes=0-1023")))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-length"), "1024");
    assert_eq!(header(&response, "content-range"), "bytes 0-1023/1000000");
    assert_eq!(header(&response, "accept-ranges"), "bytes");
    assert_eq!(header(&response, "cache-control"), "public, max-age=3600");
    assert!(header(&response, "content-disposition").contains("video.mp4"));
    assert!(header(&response, "etag").starts_with('"'));

    let body = body_bytes(response.into_body()).await;
    assert_eq!(&body[..], &video_bytes()[..1024]);
}

#[tokio::test]
async fn test_percent_encoded_object_name() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert("videos", "2024/my clip.webm", vec![7u8; 10], "");
    let server = server_with(&StreamConfig::default(), store);

    let response = server
        .handle_request(request(Method::GET, "/stream/videos/2024/my%20clip.webm", None))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-type"), "video/webm");
    assert_eq!(body_bytes(response.into_body()).await.len(), 10);
}

#[tokio::test]
async fn test_whitespace_padded_name_is_a_different_object() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert("videos", "a.mp4", vec![1u8; 10], "video/mp4");
    store.insert("videos", " a.mp4", vec![2u8; 4], "video/mp4");
    let server = server_with(&StreamConfig::default(), store.clone());

    let response = server
        .handle_request(request(Method::GET, "/stream/videos/a.mp4", None))
        .await;
    assert_eq!(body_bytes(response.into_body()).await.to_vec(), vec![1u8; 10]);

    let response = server
        .handle_request(request(Method::GET, "/stream/videos/%20a.mp4", None))
        .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-range"), "bytes 0-3/4");
    assert_eq!(body_bytes(response.into_body()).await.to_vec(), vec![2u8; 4]);
    assert_eq!(store.stat_calls(), 2);
}

#[tokio::test]
async fn test_head_issues_no_store_read() {
    let store = store_with_video();
    let server = server_with(&StreamConfig::default(), store.clone());

    let response = server
        .handle_request(request(Method::HEAD, "/stream/videos/video.mp4", Some("bytes=10-19")))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-length"), "10");
    assert!(body_bytes(response.into_body()).await.is_empty());
    assert_eq!(store.read_calls(), 0);
}

#[tokio::test]
async fn test_empty_object_is_plain_ok() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert("videos", "empty.mp4", Vec::<u8>::new(), "video/mp4");
    let server = server_with(&StreamConfig::default(), store);

    let response = server
        .handle_request(request(Method::GET, "/stream/videos/empty.mp4", Some("bytes=0-")))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-length"), "0");
    assert!(response.headers().get("content-range").is_none());
    assert!(body_bytes(response.into_body()).await.is_empty());
}

#[tokio::test]
async fn test_missing_object_is_404() {
    let server = server_with(&StreamConfig::default(), store_with_video());

    let response = server
        .handle_request(request(Method::GET, "/stream/videos/missing.mp4", None))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(header(&response, "content-type"), "application/json");
}

#[tokio::test]
async fn test_invalid_path_is_400() {
    let server = server_with(&StreamConfig::default(), store_with_video());

    for uri in ["/stream/videos", "/stream/videos/../etc/passwd", "/stream/videos/%FF.mp4"] {
        let response = server.handle_request(request(Method::GET, uri, None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {}", uri);
    }
}

#[tokio::test]
async fn test_strict_policy_returns_416() {
    let mut config = StreamConfig::default();
    config.stream.range_policy = RangePolicy::Strict;
    let server = server_with(&config, store_with_video());

    let response = server
        .handle_request(request(Method::GET, "/stream/videos/video.mp4", Some("bytes=2000000-")))
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header(&response, "content-range"), "bytes */1000000");
}

#[tokio::test]
async fn test_permissive_policy_serves_whole_object_for_bad_start() {
    let server = server_with(&StreamConfig::default(), store_with_video());

    let response = server
        .handle_request(request(Method::GET, "/stream/videos/video.mp4", Some("bytes=2000000-")))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-range"), "bytes 0-999999/1000000");
}

#[tokio::test]
async fn test_purge_object_and_bucket() {
    let store = store_with_video();
    store.insert("videos", "other.mp4", vec![1u8; 5], "video/mp4");
    let server = server_with(&StreamConfig::default(), store.clone());

    for object in ["video.mp4", "other.mp4"] {
        let uri = format!("/stream/videos/{}", object);
        server.handle_request(request(Method::HEAD, &uri, None)).await;
    }
    assert_eq!(store.stat_calls(), 2);

    let purge_method = Method::from_bytes(b"PURGE").unwrap();
    let response = server
        .handle_request(request(purge_method.clone(), "/stream/videos/video.mp4", None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let purge: PurgeResponse =
        serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    assert!(purge.success);
    assert_eq!(purge.purged_count, 1);

    let response = server
        .handle_request(request(purge_method, "/stream/videos/*", None))
        .await;
    let purge: PurgeResponse =
        serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    assert_eq!(purge.purged_count, 1);

    // Both entries are gone, so both are fetched again
    server.handle_request(request(Method::HEAD, "/stream/videos/video.mp4", None)).await;
    server.handle_request(request(Method::HEAD, "/stream/videos/other.mp4", None)).await;
    assert_eq!(store.stat_calls(), 4);
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let server = server_with(&StreamConfig::default(), store_with_video());

    let response = server.handle_request(request(Method::GET, "/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value =
        serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    assert_eq!(health["status"], "healthy");

    server
        .handle_request(request(Method::GET, "/stream/videos/video.mp4", Some("bytes=0-99")))
        .await;

    let response = server.handle_request(request(Method::GET, "/metrics", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response.into_body()).await.to_vec()).unwrap();
    assert!(text.contains("media_stream_requests_total"));
    assert!(text.contains("media_stream_bytes_served_total 100"));
    assert!(text.contains("media_stream_metadata_cache_misses 1"));
}

#[tokio::test]
async fn test_unknown_route_and_method() {
    let server = server_with(&StreamConfig::default(), store_with_video());

    let response = server.handle_request(request(Method::GET, "/nope", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .handle_request(request(Method::DELETE, "/stream/videos/video.mp4", None))
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(header(&response, "allow"), "GET, HEAD, PURGE");

    let response = server.handle_request(request(Method::POST, "/health", None)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
