//! Interchangeable delivery strategies behind one contract
//!
//! The HTTP client reports its delivery capability once, a matching
//! strategy is selected once, and nothing branches on capability again.
//! Every strategy upholds the same contract: 2xx-only, pieces emitted in
//! request order per response, first protocol error aborts the transfer.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;
use url::Url;

use super::framing::{classify, parse_content_range};
use super::{PieceSink, RequestRange, TransportError, range_header_value};
use crate::network::{DeliveryCapability, HttpClient, ReplyBody};

/// Drives one download against whatever delivery mode the client offers.
#[async_trait]
pub trait TransportStrategy: Send + Sync {
    /// Fetches `ranges` of `url`, emitting pieces into `sink`.
    ///
    /// Returns early with `Ok(())` when the sink reports cancellation.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`]: protocol violations abort the transfer
    /// before further pieces are emitted.
    async fn fetch(
        &self,
        client: &dyn HttpClient,
        url: &Url,
        ranges: &[RequestRange],
        sink: &PieceSink,
    ) -> Result<(), TransportError>;
}

/// Selects the strategy matching the client's capability.
///
/// Called once per cache manager; capability is never probed again at
/// call time. The least capable fallback is always available, so
/// capability never surfaces as an error.
pub fn strategy_for(
    capability: DeliveryCapability,
    manual_chunk_size: u64,
) -> Arc<dyn TransportStrategy> {
    match capability {
        DeliveryCapability::Streaming => Arc::new(StreamedStrategy),
        DeliveryCapability::Buffered => Arc::new(BufferedStrategy),
        DeliveryCapability::RangedOnly => Arc::new(ChunkedStrategy::new(manual_chunk_size)),
    }
}

/// One request; body chunks are decoded as they arrive.
pub struct StreamedStrategy;

#[async_trait]
impl TransportStrategy for StreamedStrategy {
    async fn fetch(
        &self,
        client: &dyn HttpClient,
        url: &Url,
        ranges: &[RequestRange],
        sink: &PieceSink,
    ) -> Result<(), TransportError> {
        let header = range_header_value(ranges);
        let reply = client.get(url, header.as_deref()).await?;
        let (mut decoder, total) = classify(&reply)?;
        if let Some(total) = total {
            sink.report_total(total);
        }
        match reply.body {
            ReplyBody::Stream(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    if !decoder.push(chunk?, sink)? {
                        return Ok(());
                    }
                }
            }
            ReplyBody::Complete(bytes) => {
                if !decoder.push(bytes, sink)? {
                    return Ok(());
                }
            }
        }
        decoder.finish()
    }
}

/// One request; the complete body is decoded in a single pass once it
/// has fully arrived.
pub struct BufferedStrategy;

#[async_trait]
impl TransportStrategy for BufferedStrategy {
    async fn fetch(
        &self,
        client: &dyn HttpClient,
        url: &Url,
        ranges: &[RequestRange],
        sink: &PieceSink,
    ) -> Result<(), TransportError> {
        let header = range_header_value(ranges);
        let reply = client.get(url, header.as_deref()).await?;
        let (mut decoder, total) = classify(&reply)?;
        if let Some(total) = total {
            sink.report_total(total);
        }
        let body = reply.body.collect().await?;
        if !decoder.push(body, sink)? {
            return Ok(());
        }
        decoder.finish()
    }
}

/// Fallback for clients with no partial-transfer capability at all:
/// covers each requested range with a sequence of small single-range
/// requests instead.
pub struct ChunkedStrategy {
    chunk_size: u64,
}

impl ChunkedStrategy {
    /// Creates the fallback strategy with the given per-request size.
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    async fn fetch_range(
        &self,
        client: &dyn HttpClient,
        url: &Url,
        range: RequestRange,
        sink: &PieceSink,
    ) -> Result<(), TransportError> {
        let mut offset = range.offset;
        let mut remaining = range.length;
        loop {
            if remaining == Some(0) || sink.is_cancelled() {
                return Ok(());
            }
            let want = remaining.map_or(self.chunk_size, |left| left.min(self.chunk_size));
            let header = format!("bytes={}-{}", offset, offset + want - 1);
            let reply = client.get(url, Some(header.as_str())).await?;
            if !reply.is_success() {
                return Err(TransportError::UnexpectedStatus {
                    status: reply.status,
                });
            }
            if remaining.is_none() {
                // An open-ended span has no progress target until some
                // response reveals the file size. A server that omits
                // Content-Range here fails the transfer outright rather
                // than leaving the read waiting forever.
                let value = reply
                    .content_range
                    .clone()
                    .ok_or(TransportError::MissingContentRange)?;
                let total = parse_content_range(&value)?
                    .total
                    .ok_or(TransportError::InvalidContentRange { value })?;
                sink.report_total(total);
                remaining = Some(total.saturating_sub(offset));
                if remaining == Some(0) {
                    return Ok(());
                }
            }
            let body = reply.body.collect().await?;
            let got = body.len() as u64;
            if got == 0 {
                return Ok(());
            }
            if !sink.deliver(offset, body) {
                return Ok(());
            }
            offset += got;
            remaining = remaining.map(|left| left.saturating_sub(got));
            // A short response means the server ran out of file.
            if remaining == Some(0) || got < want {
                return Ok(());
            }
        }
    }
}

impl Default for ChunkedStrategy {
    fn default() -> Self {
        Self::new(10 * 1024)
    }
}

#[async_trait]
impl TransportStrategy for ChunkedStrategy {
    async fn fetch(
        &self,
        client: &dyn HttpClient,
        url: &Url,
        ranges: &[RequestRange],
        sink: &PieceSink,
    ) -> Result<(), TransportError> {
        debug!(
            ranges = ranges.len(),
            chunk_size = self.chunk_size,
            "no partial-transfer capability, falling back to chunked requests"
        );
        for range in ranges {
            if sink.is_cancelled() {
                return Ok(());
            }
            self.fetch_range(client, url, *range, sink).await?;
        }
        Ok(())
    }
}
