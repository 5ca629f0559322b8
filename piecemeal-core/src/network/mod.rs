//! HTTP wire abstraction for production and simulated range servers
//!
//! The download engine only needs to issue a GET with an optional `Range`
//! header, read a handful of response headers, and consume the body in
//! whichever way the client can deliver it. This module provides that
//! contract, a reqwest-backed production implementation, and a
//! deterministic simulation server for tests.

pub mod simulation;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use url::Url;

pub use simulation::{RecordedRequest, SimulationHttpClient};

use crate::transport::TransportError;

/// How an HTTP client can deliver response bodies.
///
/// Probed once at startup; the engine selects a matching
/// [`TransportStrategy`](crate::transport::TransportStrategy) and never
/// branches on capability again at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryCapability {
    /// Body chunks become available incrementally as they arrive.
    Streaming,
    /// The body arrives as one complete buffer per request.
    Buffered,
    /// No partial-body delivery at all; the engine must cover each range
    /// with a sequence of small individual requests.
    RangedOnly,
}

/// Response body in whichever form the client could produce it.
pub enum ReplyBody {
    /// Incrementally delivered chunks.
    Stream(BoxStream<'static, Result<Bytes, TransportError>>),
    /// One complete buffer.
    Complete(Bytes),
}

impl ReplyBody {
    /// Collapses the body into a single buffer, draining a stream if
    /// necessary.
    ///
    /// # Errors
    /// - `TransportError::Http` - If reading a streamed chunk fails
    pub async fn collect(self) -> Result<Bytes, TransportError> {
        match self {
            ReplyBody::Complete(bytes) => Ok(bytes),
            ReplyBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl std::fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyBody::Stream(_) => f.write_str("ReplyBody::Stream(..)"),
            ReplyBody::Complete(bytes) => {
                write!(f, "ReplyBody::Complete({} bytes)", bytes.len())
            }
        }
    }
}

/// The slice of an HTTP response the download engine consumes.
#[derive(Debug)]
pub struct HttpReply {
    /// HTTP status code (200, 206, 404, ...)
    pub status: u16,
    /// `Content-Type` header, if present
    pub content_type: Option<String>,
    /// `Content-Range` header, if present
    pub content_range: Option<String>,
    /// The response body
    pub body: ReplyBody,
}

impl HttpReply {
    /// Returns true if the status code indicates success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal HTTP client contract for ranged downloads.
///
/// Enables both the production reqwest client and deterministic simulated
/// servers to drive the same download engine.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Reports how this client delivers response bodies.
    fn capability(&self) -> DeliveryCapability;

    /// Performs a GET request with an optional `Range` header value.
    ///
    /// # Errors
    ///
    /// - `TransportError::Http` - If the request cannot be sent or the
    ///   response headers cannot be read
    async fn get(&self, url: &Url, range: Option<&str>) -> Result<HttpReply, TransportError>;
}

/// Production HTTP client using reqwest.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Creates a production client from network configuration.
    ///
    /// # Panics
    ///
    /// Panics if HTTP client creation fails due to invalid configuration.
    /// This should never happen with valid timeout and user agent values.
    pub fn new(config: &crate::config::NetworkConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .expect("HTTP client creation should not fail");

        Self { client }
    }

    fn describe_error(error: &reqwest::Error, url: &Url) -> String {
        if error.is_timeout() {
            format!("Request timed out: {url}")
        } else if error.is_connect() {
            format!("Failed to connect: {url}")
        } else if error.is_request() {
            format!("Invalid request: {url}")
        } else {
            format!("HTTP request failed: {error}")
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    fn capability(&self) -> DeliveryCapability {
        DeliveryCapability::Streaming
    }

    async fn get(&self, url: &Url, range: Option<&str>) -> Result<HttpReply, TransportError> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }

        let response = request.send().await.map_err(|e| TransportError::Http {
            reason: Self::describe_error(&e, url),
        })?;

        let status = response.status().as_u16();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let content_range = header(reqwest::header::CONTENT_RANGE);

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| TransportError::Http {
                    reason: format!("Failed to read response body: {e}"),
                })
            })
            .boxed();

        Ok(HttpReply {
            status,
            content_type,
            content_range,
            body: ReplyBody::Stream(stream),
        })
    }
}
