//! HTTP server exposing the streaming endpoint
//!
//! Routes:
//! - `GET /stream/{bucket}/{object}` - stream an object, honoring `Range`
//! - `HEAD /stream/{bucket}/{object}` - same headers, no body and no byte read
//! - `PURGE /stream/{bucket}/{object}` - drop cached metadata of one object
//! - `PURGE /stream/{bucket}/*` - drop cached metadata of a whole bucket
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus text exposition
//!
//! Object names may contain `/`; both path segments are percent-decoded.

use crate::error::{Result, StreamError};
use crate::metrics::StreamMetrics;
use crate::response_builder::StreamDescriptor;
use crate::streamer::MediaStreamer;
use bytes::Bytes;
use futures::TryStreamExt;
use http::header::{ALLOW, CACHE_CONTROL, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Response body type used by every route
pub type ResponseBody = UnsyncBoxBody<Bytes, StreamError>;

const STREAM_PREFIX: &str = "/stream/";

/// PURGE response body
#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub purged_count: u64,
    pub message: String,
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

/// The media streaming HTTP service
pub struct StreamServer {
    streamer: Arc<MediaStreamer>,
    metrics: Arc<StreamMetrics>,
}

impl StreamServer {
    pub fn new(streamer: Arc<MediaStreamer>, metrics: Arc<StreamMetrics>) -> Self {
        StreamServer { streamer, metrics }
    }

    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// Accept connections on `listener` until the task is dropped
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Media stream server listening on http://{}", addr);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle_request(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }

    /// Route one request
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<ResponseBody> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let range = req
            .headers()
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        drop(req);
        debug!("Handling {} {}", method, path);

        let response = match path.as_str() {
            "/health" if method == Method::GET => health_response(),
            "/metrics" if method == Method::GET => self.metrics_response(),
            p if p.starts_with(STREAM_PREFIX) => {
                self.handle_stream_path(&method, &p[STREAM_PREFIX.len()..], range.as_deref())
                    .await
            }
            "/health" | "/metrics" => method_not_allowed("GET"),
            _ => error_response(StatusCode::NOT_FOUND, "no such route"),
        };

        self.metrics.record_request(
            method.as_str(),
            response.status().as_u16(),
            started.elapsed().as_secs_f64(),
        );
        response
    }

    async fn handle_stream_path(
        &self,
        method: &Method,
        rest: &str,
        range: Option<&str>,
    ) -> Response<ResponseBody> {
        let (bucket, object) = match split_stream_path(rest) {
            Ok(parts) => parts,
            Err(e) => return stream_error_response(&e),
        };

        match method.as_str() {
            "GET" | "HEAD" => {
                match self.streamer.stream(&bucket, &object, range).await {
                    Ok(descriptor) => {
                        let head_only = *method == Method::HEAD;
                        if !head_only {
                            self.metrics.record_bytes_served(descriptor.content_length);
                        }
                        descriptor_response(descriptor, head_only)
                    }
                    Err(e) => {
                        if e.is_not_found() {
                            debug!("Not found: {}/{}", bucket, object);
                        } else {
                            warn!("Stream request failed for {}/{}: {}", bucket, object, e);
                        }
                        stream_error_response(&e)
                    }
                }
            }
            "PURGE" => self.handle_purge(&bucket, &object).await,
            _ => method_not_allowed("GET, HEAD, PURGE"),
        }
    }

    async fn handle_purge(&self, bucket: &str, object: &str) -> Response<ResponseBody> {
        let (scope, purged_count, message) = if object == "*" {
            let count = self.streamer.invalidate_bucket(bucket).await;
            ("bucket", count, format!("Purged {} metadata entries for bucket {}", count, bucket))
        } else {
            let removed = self.streamer.invalidate(bucket, object).await;
            let message = if removed {
                format!("Purged metadata for {}/{}", bucket, object)
            } else {
                format!("No cached metadata for {}/{}", bucket, object)
            };
            ("object", removed as u64, message)
        };

        info!("PURGE {}/{}: scope={}, purged={}", bucket, object, scope, purged_count);
        self.metrics.record_purge(scope, purged_count);

        json_response(
            StatusCode::OK,
            &PurgeResponse {
                success: true,
                purged_count,
                message,
            },
        )
    }

    fn metrics_response(&self) -> Response<ResponseBody> {
        self.metrics.observe_cache(&self.streamer.cache_stats());
        match self.metrics.encode_text() {
            Ok(text) => {
                let mut response = Response::new(full_body(text));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                );
                response
            }
            Err(e) => {
                error!("Failed to render metrics: {}", e);
                stream_error_response(&e)
            }
        }
    }
}

/// Split `bucket/object...` and percent-decode both parts
pub fn split_stream_path(rest: &str) -> Result<(String, String)> {
    let (bucket, object) = rest
        .split_once('/')
        .ok_or_else(|| {
            StreamError::InvalidInput(format!(
                "expected /stream/{{bucket}}/{{object}}, got {}",
                rest
            ))
        })?;

    let decode = |part: &str| {
        percent_decode_str(part)
            .decode_utf8()
            .map(|s| s.into_owned())
            .map_err(|e| StreamError::InvalidInput(format!("path is not valid UTF-8: {}", e)))
    };

    let bucket = decode(bucket)?;
    let object = decode(object)?;
    if bucket.is_empty() || object.is_empty() {
        return Err(StreamError::InvalidInput(
            "bucket and object must not be empty".to_string(),
        ));
    }
    Ok((bucket, object))
}

fn descriptor_response(descriptor: StreamDescriptor, head_only: bool) -> Response<ResponseBody> {
    let StreamDescriptor {
        status,
        headers,
        body,
        ..
    } = descriptor;

    let body = if head_only {
        // Dropping the lazy body here means no store read is issued
        drop(body);
        empty_body()
    } else {
        StreamBody::new(body.map_ok(Frame::data)).boxed_unsync()
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn full_body(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

fn empty_body() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<ResponseBody> {
    let json = match serde_json::to_vec(body) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            b"{}".to_vec()
        }
    };

    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store, must-revalidate"));
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<ResponseBody> {
    json_response(
        status,
        &ErrorResponse {
            error: message.to_string(),
            status: status.as_u16(),
        },
    )
}

/// Map a streaming error to its HTTP response
pub fn stream_error_response(err: &StreamError) -> Response<ResponseBody> {
    let status =
        StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = error_response(status, &err.to_string());

    if let StreamError::RangeNotSatisfiable { size, .. } = err {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
            response.headers_mut().insert(CONTENT_RANGE, value);
        }
    }
    response
}

fn health_response() -> Response<ResponseBody> {
    json_response(StatusCode::OK, &serde_json::json!({ "status": "healthy" }))
}

fn method_not_allowed(allow: &'static str) -> Response<ResponseBody> {
    let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    response.headers_mut().insert(ALLOW, HeaderValue::from_static(allow));
    response
}
