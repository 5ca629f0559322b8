//! Download engine turning HTTP range responses into offset-tagged pieces
//!
//! One `RangeTransport` per in-flight download: it merges near-adjacent
//! requested ranges, builds the combined `Range` header, and drives a
//! delivery strategy that feeds the response body through the framing
//! decoders. Pieces reach the owner through a cancellation-aware sink.

mod framing;
pub mod strategy;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use url::Url;

pub use strategy::{
    BufferedStrategy, ChunkedStrategy, StreamedStrategy, TransportStrategy, strategy_for,
};

use crate::network::HttpClient;

/// Errors that abort an in-flight transfer.
///
/// Every protocol error is raised before or instead of further piece
/// delivery; a transfer never emits pieces past its first error.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server responded outside the 2xx success contract
    #[error("Server returned status {status}")]
    UnexpectedStatus {
        /// The offending status code
        status: u16,
    },

    /// A ranged response arrived without the `Content-Range` header the
    /// transfer depends on
    #[error("Server returned no Content-Range")]
    MissingContentRange,

    /// `Content-Range` header present but unparseable
    #[error("Unrecognized Content-Range: {value}")]
    InvalidContentRange {
        /// The header value as received
        value: String,
    },

    /// Multipart body violated `multipart/byteranges` framing
    #[error("Malformed multipart body: {reason}")]
    MultipartFraming {
        /// What the scanner choked on
        reason: String,
    },

    /// The underlying HTTP request failed
    #[error("HTTP request failed: {reason}")]
    Http {
        /// Description of the failure
        reason: String,
    },
}

/// One requested span of the remote file.
///
/// `length == None` means "from offset to end of file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl RequestRange {
    /// A bounded span.
    pub fn bounded(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    /// An open-ended span reaching the end of the file.
    pub fn unbounded(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// First offset past the span, or `None` when open-ended.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|length| self.offset + length)
    }
}

/// Merges sorted spans whose gap is below `max_gap`.
///
/// A second round trip costs more than a few hundred redundantly
/// transferred bytes, so near-adjacent spans become one. An open-ended
/// span swallows everything at or after its start.
pub(crate) fn merge_ranges(ranges: &[RequestRange], max_gap: u64) -> Vec<RequestRange> {
    let mut sorted: Vec<RequestRange> = ranges
        .iter()
        .copied()
        .filter(|range| range.length != Some(0))
        .collect();
    sorted.sort_by_key(|range| range.offset);

    let mut merged: Vec<RequestRange> = Vec::new();
    for range in sorted {
        let Some(last) = merged.last_mut() else {
            merged.push(range);
            continue;
        };
        match last.end() {
            // Previous span is open-ended: it already covers this one.
            None => {}
            Some(end) if range.offset <= end.saturating_add(max_gap) => {
                last.length = match range.end() {
                    None => None,
                    Some(range_end) => Some(range_end.max(end) - last.offset),
                };
            }
            Some(_) => merged.push(range),
        }
    }
    merged
}

/// Builds the combined `Range` header value, `bytes=o1-e1,o2-e2,...`,
/// with open-ended spans rendered as `o-`.
///
/// Returns `None` for a single open-ended span from offset 0: that is a
/// whole-file request and needs no header at all.
pub(crate) fn range_header_value(ranges: &[RequestRange]) -> Option<String> {
    if matches!(ranges, [range] if range.offset == 0 && range.length.is_none()) {
        return None;
    }
    let parts: Vec<String> = ranges
        .iter()
        .map(|range| match range.end() {
            Some(end) => format!("{}-{}", range.offset, end - 1),
            None => format!("{}-", range.offset),
        })
        .collect();
    Some(format!("bytes={}", parts.join(",")))
}

/// Delivery callbacks handed to a strategy, with the cancellation flag
/// cut in ahead of every call-out.
pub struct PieceSink {
    cancelled: Arc<AtomicBool>,
    on_piece: Box<dyn Fn(u64, Bytes) + Send + Sync>,
    on_total: Box<dyn Fn(u64) + Send + Sync>,
}

impl PieceSink {
    /// Delivers one piece. Returns false once the transfer is cancelled,
    /// telling the strategy to stop early.
    pub fn deliver(&self, offset: u64, bytes: Bytes) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        (self.on_piece)(offset, bytes);
        true
    }

    /// Reports the total file size once a response reveals it.
    pub fn report_total(&self, total: u64) {
        if !self.cancelled.load(Ordering::Acquire) {
            (self.on_total)(total);
        }
    }

    /// Whether the transfer has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn collector() -> (Self, Arc<parking_lot::Mutex<Vec<(u64, Bytes)>>>) {
        let pieces = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink_pieces = pieces.clone();
        let sink = Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            on_piece: Box::new(move |offset, bytes| {
                sink_pieces.lock().push((offset, bytes));
            }),
            on_total: Box::new(|_| {}),
        };
        (sink, pieces)
    }
}

/// One in-flight download of a set of byte ranges.
pub struct RangeTransport {
    url: Url,
    ranges: Vec<RequestRange>,
    client: Arc<dyn HttpClient>,
    strategy: Arc<dyn TransportStrategy>,
    cancelled: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl RangeTransport {
    /// Creates a transport for `ranges` of `url`, merging spans whose gap
    /// is below `merge_gap` before the request is built.
    pub fn new(
        url: Url,
        ranges: Vec<RequestRange>,
        client: Arc<dyn HttpClient>,
        strategy: Arc<dyn TransportStrategy>,
        merge_gap: u64,
    ) -> Self {
        Self {
            url,
            ranges: merge_ranges(&ranges, merge_gap),
            client,
            strategy,
            cancelled: Arc::new(AtomicBool::new(false)),
            driver: None,
        }
    }

    /// The spans this transport will request, after merging.
    pub fn requested(&self) -> &[RequestRange] {
        &self.ranges
    }

    /// Issues the request on a background task.
    ///
    /// `on_piece` fires for every `(absolute offset, bytes)` piece as it
    /// arrives, `on_total` once a response reveals the file size, and
    /// `on_done` exactly once with the transfer outcome — unless the
    /// transport is cancelled first, which suppresses all three.
    pub fn start<P, T, D>(&mut self, on_piece: P, on_total: T, on_done: D)
    where
        P: Fn(u64, Bytes) + Send + Sync + 'static,
        T: Fn(u64) + Send + Sync + 'static,
        D: FnOnce(Result<(), TransportError>) + Send + 'static,
    {
        let sink = PieceSink {
            cancelled: self.cancelled.clone(),
            on_piece: Box::new(on_piece),
            on_total: Box::new(on_total),
        };
        let client = self.client.clone();
        let strategy = self.strategy.clone();
        let url = self.url.clone();
        let ranges = self.ranges.clone();
        let cancelled = self.cancelled.clone();

        self.driver = Some(tokio::spawn(async move {
            debug!(url = %url, ranges = ranges.len(), "starting ranged download");
            let result = strategy.fetch(client.as_ref(), &url, &ranges, &sink).await;
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            if let Err(error) = &result {
                error!(url = %url, %error, "ranged download aborted");
            }
            on_done(result);
        }));
    }

    /// Terminates the transfer and suppresses any further piece or
    /// completion delivery.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_distant_ranges_apart() {
        let merged = merge_ranges(
            &[
                RequestRange::bounded(0, 100),
                RequestRange::bounded(10_000, 100),
            ],
            500,
        );
        assert_eq!(
            merged,
            vec![
                RequestRange::bounded(0, 100),
                RequestRange::bounded(10_000, 100),
            ]
        );
    }

    #[test]
    fn test_merge_bridges_small_gaps() {
        let merged = merge_ranges(
            &[
                RequestRange::bounded(0, 100),
                RequestRange::bounded(400, 100),
            ],
            500,
        );
        assert_eq!(merged, vec![RequestRange::bounded(0, 500)]);
    }

    #[test]
    fn test_merge_sorts_and_handles_overlap() {
        let merged = merge_ranges(
            &[
                RequestRange::bounded(200, 100),
                RequestRange::bounded(0, 250),
            ],
            0,
        );
        assert_eq!(merged, vec![RequestRange::bounded(0, 300)]);
    }

    #[test]
    fn test_merge_contained_range_does_not_shrink_result() {
        let merged = merge_ranges(
            &[
                RequestRange::bounded(0, 1000),
                RequestRange::bounded(100, 10),
            ],
            0,
        );
        assert_eq!(merged, vec![RequestRange::bounded(0, 1000)]);
    }

    #[test]
    fn test_merge_unbounded_swallows_later_ranges() {
        let merged = merge_ranges(
            &[
                RequestRange::bounded(0, 100),
                RequestRange::unbounded(300),
                RequestRange::bounded(5000, 100),
            ],
            500,
        );
        assert_eq!(
            merged,
            vec![RequestRange::bounded(0, 100), RequestRange::unbounded(300)]
        );
    }

    #[test]
    fn test_merge_into_unbounded_range() {
        let merged = merge_ranges(
            &[
                RequestRange::bounded(0, 100),
                RequestRange::unbounded(150),
            ],
            500,
        );
        assert_eq!(merged, vec![RequestRange::unbounded(0)]);
    }

    #[test]
    fn test_range_header_formatting() {
        assert_eq!(
            range_header_value(&[RequestRange::bounded(0, 100)]).as_deref(),
            Some("bytes=0-99")
        );
        assert_eq!(
            range_header_value(&[
                RequestRange::bounded(0, 10),
                RequestRange::bounded(500, 10),
            ])
            .as_deref(),
            Some("bytes=0-9,500-509")
        );
        assert_eq!(
            range_header_value(&[RequestRange::unbounded(100)]).as_deref(),
            Some("bytes=100-")
        );
    }

    #[test]
    fn test_whole_file_request_needs_no_header() {
        assert_eq!(range_header_value(&[RequestRange::unbounded(0)]), None);
    }
}
