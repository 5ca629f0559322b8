//! Simulated HTTP range server for deterministic testing
//!
//! Serves byte ranges of an in-memory file the way a production server
//! would: single-range 206 responses with `Content-Range`, whole-file 200
//! responses, and `multipart/byteranges` bodies for multi-range requests.
//! Every request is recorded so tests can assert on coalescing and
//! padding behavior without real network calls.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use url::Url;

use super::{DeliveryCapability, HttpClient, HttpReply, ReplyBody};
use crate::transport::TransportError;

const BOUNDARY: &str = "piecemeal-sim-boundary";

/// One request observed by the simulated server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub range: Option<String>,
}

/// Deterministic in-process range server.
pub struct SimulationHttpClient {
    file: Bytes,
    capability: DeliveryCapability,
    stream_chunk_size: usize,
    status_override: Option<u16>,
    omit_content_range: bool,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl SimulationHttpClient {
    /// Creates a simulated server holding `file` as the remote content.
    pub fn new(file: impl Into<Bytes>) -> Self {
        Self {
            file: file.into(),
            capability: DeliveryCapability::Streaming,
            stream_chunk_size: 1024,
            status_override: None,
            omit_content_range: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Configures how response bodies are delivered.
    pub fn with_capability(mut self, capability: DeliveryCapability) -> Self {
        self.capability = capability;
        self
    }

    /// Chunk granularity for streamed bodies.
    pub fn with_stream_chunk_size(mut self, size: usize) -> Self {
        self.stream_chunk_size = size.max(1);
        self
    }

    /// Forces every response to the given status with an empty body.
    pub fn with_status_override(mut self, status: u16) -> Self {
        self.status_override = Some(status);
        self
    }

    /// Serves ranged responses without a `Content-Range` header, the way
    /// some misconfigured servers do.
    pub fn with_omitted_content_range(mut self) -> Self {
        self.omit_content_range = true;
        self
    }

    /// Every request observed so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests observed so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Parses a `bytes=a-b,c-` header into inclusive spans clamped to the
    /// file, dropping spans that start past the end. Returns `None` for
    /// anything unparseable, which the server treats the way real servers
    /// do: by ignoring the header.
    fn parse_ranges(&self, header: &str) -> Option<Vec<(u64, u64)>> {
        let total = self.file.len() as u64;
        let spec = header.trim().strip_prefix("bytes=")?;
        let mut spans = Vec::new();
        for part in spec.split(',') {
            let (start, end) = part.trim().split_once('-')?;
            let start: u64 = start.parse().ok()?;
            if start >= total {
                continue;
            }
            let end = if end.is_empty() {
                total - 1
            } else {
                end.parse::<u64>().ok()?.min(total - 1)
            };
            if end < start {
                return None;
            }
            spans.push((start, end));
        }
        Some(spans)
    }

    fn deliver(&self, body: Bytes) -> ReplyBody {
        match self.capability {
            DeliveryCapability::Streaming => {
                let chunk_size = self.stream_chunk_size;
                let chunks: Vec<_> = (0..body.len())
                    .step_by(chunk_size)
                    .map(|start| Ok(body.slice(start..(start + chunk_size).min(body.len()))))
                    .collect();
                ReplyBody::Stream(futures::stream::iter(chunks).boxed())
            }
            DeliveryCapability::Buffered | DeliveryCapability::RangedOnly => {
                ReplyBody::Complete(body)
            }
        }
    }

    fn whole_file_reply(&self) -> HttpReply {
        HttpReply {
            status: 200,
            content_type: Some("application/octet-stream".to_string()),
            content_range: None,
            body: self.deliver(self.file.clone()),
        }
    }

    fn single_range_reply(&self, start: u64, end: u64) -> HttpReply {
        let total = self.file.len() as u64;
        let content_range = (!self.omit_content_range)
            .then(|| format!("bytes {start}-{end}/{total}"));
        HttpReply {
            status: 206,
            content_type: Some("application/octet-stream".to_string()),
            content_range,
            body: self.deliver(self.file.slice(start as usize..(end + 1) as usize)),
        }
    }

    fn multipart_reply(&self, spans: &[(u64, u64)]) -> HttpReply {
        let total = self.file.len() as u64;
        let mut body = Vec::new();
        for &(start, end) in spans {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
            body.extend_from_slice(
                format!("Content-Range: bytes {start}-{end}/{total}\r\n").as_bytes(),
            );
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(&self.file[start as usize..(end + 1) as usize]);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        HttpReply {
            status: 206,
            content_type: Some(format!("multipart/byteranges; boundary={BOUNDARY}")),
            content_range: None,
            body: self.deliver(Bytes::from(body)),
        }
    }
}

#[async_trait]
impl HttpClient for SimulationHttpClient {
    fn capability(&self) -> DeliveryCapability {
        self.capability
    }

    async fn get(&self, url: &Url, range: Option<&str>) -> Result<HttpReply, TransportError> {
        self.requests.lock().push(RecordedRequest {
            url: url.to_string(),
            range: range.map(str::to_owned),
        });

        if let Some(status) = self.status_override {
            tracing::debug!(status, "simulation: returning forced status");
            return Ok(HttpReply {
                status,
                content_type: None,
                content_range: None,
                body: ReplyBody::Complete(Bytes::new()),
            });
        }

        let spans = range.and_then(|header| self.parse_ranges(header));
        match spans.as_deref() {
            None => Ok(self.whole_file_reply()),
            Some([]) => Ok(HttpReply {
                status: 416,
                content_type: None,
                content_range: Some(format!("bytes */{}", self.file.len())),
                body: ReplyBody::Complete(Bytes::new()),
            }),
            Some([(start, end)]) => Ok(self.single_range_reply(*start, *end)),
            Some(spans) => Ok(self.multipart_reply(spans)),
        }
    }
}
