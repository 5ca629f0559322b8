//! Cache manager: per-URL sparse byte cache with miss coalescing
//!
//! Owns the cached range set for one remote file, answers range reads
//! from cache where possible, and batches concurrent misses into as few
//! range requests as the coalescing window allows. Incoming pieces are
//! stored once and fanned out to every pending read they satisfy.

mod batch;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use self::batch::DownloadBatch;

use crate::config::{DownloadConfig, PiecemealConfig};
use crate::network::{HttpClient, ReqwestHttpClient};
use crate::ranges::{ByteRange, RangeSet};
use crate::transport::{
    RangeTransport, RequestRange, TransportError, TransportStrategy, strategy_for,
};

/// Errors surfaced to readers of the cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The requested span does not fit the file address space
    #[error("Invalid read range: offset {offset} + length {length} overflows")]
    InvalidRange {
        /// Requested start offset
        offset: u64,
        /// Requested length
        length: u64,
    },

    /// The transfer this read depended on aborted or ended short
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Human-readable description of the failure
        reason: String,
    },

    /// The cache manager was dropped while the read was pending
    #[error("Cache manager was dropped before the read completed")]
    Shutdown,
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// A read that could not be fully satisfied from cache.
///
/// The destination buffer fills incrementally as pieces arrive; the
/// missing set shrinks with every overlapping piece and the read resolves
/// the moment it empties.
struct PendingRead {
    offset: u64,
    buf: Vec<u8>,
    missing: RangeSet,
    tx: oneshot::Sender<CacheResult<Bytes>>,
}

/// An open-ended read waiting for its batch's transfer to finish, since
/// the file size — and therefore the read's extent — is still unknown.
struct CompletionWaiter {
    batch_id: u64,
    offset: u64,
    tx: oneshot::Sender<CacheResult<Bytes>>,
}

enum Waiter {
    Fill(PendingRead),
    Completion(CompletionWaiter),
}

struct Inner {
    cached: RangeSet,
    waiters: Vec<Waiter>,
    batch: Option<DownloadBatch>,
    transports: HashMap<u64, RangeTransport>,
    total_size: Option<u64>,
    next_batch_id: u64,
    next_transport_id: u64,
}

/// Sparse byte-range cache over one remote file.
///
/// Every byte ever fetched stays cached for the manager's lifetime, so
/// repeat reads are free and overlapping reads trigger only the missing
/// portions. Two managers for different URLs never interact.
pub struct CacheManager {
    url: Url,
    client: Arc<dyn HttpClient>,
    strategy: Arc<dyn TransportStrategy>,
    config: DownloadConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CacheManager {
    /// Creates a manager for `url` backed by the production HTTP client.
    pub fn new(url: Url, config: PiecemealConfig) -> Self {
        let client = Arc::new(ReqwestHttpClient::new(&config.network));
        Self::with_client(url, client, config.download)
    }

    /// Creates a manager over any [`HttpClient`] implementation.
    ///
    /// The client's delivery capability is probed exactly once here; the
    /// matching transport strategy serves every download afterwards.
    pub fn with_client(url: Url, client: Arc<dyn HttpClient>, config: DownloadConfig) -> Self {
        let strategy = strategy_for(client.capability(), config.manual_chunk_size);
        Self {
            url,
            client,
            strategy,
            config,
            inner: Arc::new(Mutex::new(Inner {
                cached: RangeSet::new(),
                waiters: Vec::new(),
                batch: None,
                transports: HashMap::new(),
                total_size: None,
                next_batch_id: 0,
                next_transport_id: 0,
            })),
        }
    }

    /// The URL this manager caches.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Total file size, once some response has revealed it.
    pub fn total_size(&self) -> Option<u64> {
        self.inner.lock().total_size
    }

    /// Snapshot of the cached ranges, for diagnostics.
    pub fn cached_ranges(&self) -> RangeSet {
        self.inner.lock().cached.clone()
    }

    /// Reads `length` bytes starting at `offset`, fetching whatever the
    /// cache is missing. `length == None` means the rest of the file.
    ///
    /// A fully cached read returns without suspending and without any
    /// network access; `length == Some(0)` returns an empty buffer
    /// immediately.
    ///
    /// # Errors
    ///
    /// - `CacheError::InvalidRange` - `offset + length` overflows
    /// - `CacheError::TransferFailed` - The transfer this read depended
    ///   on aborted, or ended without covering the requested span
    pub async fn get_bytes(&self, offset: u64, length: Option<u64>) -> CacheResult<Bytes> {
        let rx = {
            let mut inner = self.inner.lock();
            // A known file size turns an open-ended read into a bounded
            // one up front.
            let length = match length {
                Some(length) => Some(length),
                None => inner.total_size.map(|total| total.saturating_sub(offset)),
            };
            match length {
                Some(length) => {
                    match self.begin_bounded_read(&mut inner, offset, length)? {
                        ReadState::Cached(bytes) => return Ok(bytes),
                        ReadState::Pending(rx) => rx,
                    }
                }
                None => self.begin_open_ended_read(&mut inner, offset),
            }
        };
        rx.await.unwrap_or(Err(CacheError::Shutdown))
    }

    /// Stores a piece in the cache and notifies every pending read it
    /// satisfies. Cached data always wins overlap resolution.
    pub fn put_bytes(&self, offset: u64, bytes: Bytes) {
        Self::store_piece(&self.inner, offset, &bytes);
    }

    /// Drops a cached region, forcing the next read of it back to the
    /// network.
    pub fn clear_bytes(&self, offset: u64, length: Option<u64>) {
        self.inner.lock().cached.clear(&ByteRange::new(offset, length));
    }

    /// Cancels every active transfer and discards a not-yet-dispatched
    /// batch. Reads waiting on a cancelled transfer never resolve;
    /// callers needing cancellation semantics for reads layer a timeout.
    pub fn cancel_downloads(&self) {
        let mut inner = self.inner.lock();
        inner.batch = None;
        let mut transports = std::mem::take(&mut inner.transports);
        drop(inner);
        for transport in transports.values_mut() {
            transport.cancel();
        }
    }

    fn begin_bounded_read(
        &self,
        inner: &mut Inner,
        offset: u64,
        length: u64,
    ) -> CacheResult<ReadState> {
        let end = offset
            .checked_add(length)
            .ok_or(CacheError::InvalidRange { offset, length })?;
        if length == 0 {
            return Ok(ReadState::Cached(Bytes::new()));
        }

        let mut buf = vec![0u8; length as usize];
        let mut missing = RangeSet::new();
        missing.put(ByteRange::new(offset, Some(length)));
        let hits = inner.cached.slice(offset, end);
        for range in hits.ranges() {
            if let Some(bytes) = range.bytes() {
                let at = (range.offset() - offset) as usize;
                buf[at..at + bytes.len()].copy_from_slice(bytes);
                missing.clear(&ByteRange::new(range.offset(), range.length()));
            }
        }
        if missing.is_empty() {
            debug!(offset, length, "read served entirely from cache");
            return Ok(ReadState::Cached(Bytes::from(buf)));
        }

        let request: Vec<RequestRange> = missing
            .ranges()
            .iter()
            .map(|range| RequestRange {
                offset: range.offset(),
                length: range.length(),
            })
            .collect();
        debug!(
            offset,
            length,
            missing = request.len(),
            "read missed cache, queueing download"
        );
        let (tx, rx) = oneshot::channel();
        inner.waiters.push(Waiter::Fill(PendingRead {
            offset,
            buf,
            missing,
            tx,
        }));
        self.queue_for_download(inner, &request);
        Ok(ReadState::Pending(rx))
    }

    fn begin_open_ended_read(
        &self,
        inner: &mut Inner,
        offset: u64,
    ) -> oneshot::Receiver<CacheResult<Bytes>> {
        // Everything from the offset on, minus what the cache already
        // holds. The read resolves when its batch's transfer completes
        // and the file size is finally known.
        let mut missing = RangeSet::new();
        missing.put(ByteRange::new(offset, None));
        let from = inner
            .cached
            .find_index_for_offset(offset)
            .unwrap_or_else(|i| i);
        for range in &inner.cached.ranges()[from..] {
            missing.clear(&ByteRange::new(range.offset(), range.length()));
        }

        let request: Vec<RequestRange> = missing
            .ranges()
            .iter()
            .map(|range| RequestRange {
                offset: range.offset(),
                length: range.length(),
            })
            .collect();
        debug!(offset, "open-ended read with unknown file size, queueing download");
        let (tx, rx) = oneshot::channel();
        let batch_id = self.queue_for_download(inner, &request);
        inner.waiters.push(Waiter::Completion(CompletionWaiter {
            batch_id,
            offset,
            tx,
        }));
        rx
    }

    /// Adds missing spans to the pending batch, opening one (and its
    /// coalescing timer) when none is pending. Returns the batch id.
    fn queue_for_download(&self, inner: &mut Inner, ranges: &[RequestRange]) -> u64 {
        if let Some(batch) = inner.batch.as_mut() {
            for range in ranges {
                batch.add(*range);
            }
            return batch.id();
        }

        let id = inner.next_batch_id;
        inner.next_batch_id += 1;
        let mut batch = DownloadBatch::new(id);
        for range in ranges {
            batch.add(*range);
        }
        inner.batch = Some(batch);

        let weak = Arc::downgrade(&self.inner);
        let url = self.url.clone();
        let client = self.client.clone();
        let strategy = self.strategy.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            tokio::time::sleep(config.coalesce_delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            Self::dispatch_batch(&inner, &url, &client, &strategy, &config);
        });
        id
    }

    /// Takes the pending batch, pads it, and hands it to one transport.
    fn dispatch_batch(
        inner_arc: &Arc<Mutex<Inner>>,
        url: &Url,
        client: &Arc<dyn HttpClient>,
        strategy: &Arc<dyn TransportStrategy>,
        config: &DownloadConfig,
    ) {
        let (batch_id, ranges) = {
            let mut inner = inner_arc.lock();
            let Some(batch) = inner.batch.take() else {
                return;
            };
            (batch.id(), batch.padded_ranges(config.min_request_size))
        };
        if ranges.is_empty() {
            return;
        }
        debug!(batch_id, spans = ranges.len(), "dispatching coalesced batch");

        let mut transport = RangeTransport::new(
            url.clone(),
            ranges.clone(),
            client.clone(),
            strategy.clone(),
            config.merge_gap,
        );

        let piece_inner = Arc::downgrade(inner_arc);
        let on_piece = move |offset: u64, bytes: Bytes| {
            if let Some(inner) = piece_inner.upgrade() {
                Self::store_piece(&inner, offset, &bytes);
            }
        };
        let total_inner = Arc::downgrade(inner_arc);
        let on_total = move |total: u64| {
            if let Some(inner) = total_inner.upgrade() {
                inner.lock().total_size.get_or_insert(total);
            }
        };

        let mut inner = inner_arc.lock();
        let transport_id = inner.next_transport_id;
        inner.next_transport_id += 1;

        let done_inner = Arc::downgrade(inner_arc);
        let on_done = move |result: Result<(), TransportError>| {
            if let Some(inner) = done_inner.upgrade() {
                Self::finish_batch(&inner, batch_id, transport_id, &ranges, result);
            }
        };

        transport.start(on_piece, on_total, on_done);
        inner.transports.insert(transport_id, transport);
    }

    /// Inserts one piece and fans it out to every waiter it overlaps.
    ///
    /// Waiters are walked newest-first so satisfied ones can remove
    /// themselves mid-iteration; a single piece may resolve several
    /// overlapping reads at once.
    fn store_piece(inner: &Mutex<Inner>, offset: u64, bytes: &Bytes) {
        if bytes.is_empty() {
            return;
        }
        let mut guard = inner.lock();
        guard.cached.put(ByteRange::cached(offset, bytes.clone()));
        let end = offset + bytes.len() as u64;

        let mut i = guard.waiters.len();
        while i > 0 {
            i -= 1;
            let Waiter::Fill(read) = &mut guard.waiters[i] else {
                continue;
            };
            let read_end = read.offset + read.buf.len() as u64;
            if offset >= read_end || end <= read.offset {
                continue;
            }
            let from = offset.max(read.offset);
            let to = end.min(read_end);
            read.buf[(from - read.offset) as usize..(to - read.offset) as usize]
                .copy_from_slice(&bytes[(from - offset) as usize..(to - offset) as usize]);
            read.missing.clear(&ByteRange::new(from, Some(to - from)));
            if read.missing.is_empty() {
                if let Waiter::Fill(read) = guard.waiters.remove(i) {
                    let _ = read.tx.send(Ok(Bytes::from(read.buf)));
                }
            }
        }
    }

    /// Settles the waiters tied to a finished transfer.
    ///
    /// On success, open-ended waiters of this batch resolve with the
    /// contiguous cached run from their offset, and any bounded read
    /// still missing bytes this batch requested is failed explicitly —
    /// the transfer meant to deliver them has come and gone. On error,
    /// every read depending on the batch fails with the transport error.
    fn finish_batch(
        inner: &Mutex<Inner>,
        batch_id: u64,
        transport_id: u64,
        requested: &[RequestRange],
        result: Result<(), TransportError>,
    ) {
        let mut guard = inner.lock();
        guard.transports.remove(&transport_id);

        let failure = match &result {
            Ok(()) => {
                debug!(batch_id, "batch transfer complete");
                None
            }
            Err(error) => {
                warn!(batch_id, %error, "batch transfer failed");
                Some(error.to_string())
            }
        };

        // A finished open-ended transfer pins down the file size: the
        // cache now reaches the end of the file.
        if failure.is_none() && guard.total_size.is_none() {
            if let Some(open) = requested.iter().find(|range| range.length.is_none()) {
                if let Some(end) = guard.cached.contiguous_end(open.offset) {
                    guard.total_size = Some(end);
                }
            }
        }

        let mut i = guard.waiters.len();
        while i > 0 {
            i -= 1;
            let settle = match (&guard.waiters[i], &failure) {
                (Waiter::Completion(waiter), _) if waiter.batch_id == batch_id => true,
                (Waiter::Fill(read), _) => Self::intersects_any(&read.missing, requested),
                _ => false,
            };
            if !settle {
                continue;
            }
            match guard.waiters.remove(i) {
                Waiter::Completion(waiter) => {
                    let reply = match &failure {
                        None => Ok(Self::contiguous_from(&guard.cached, waiter.offset)),
                        Some(reason) => Err(CacheError::TransferFailed {
                            reason: reason.clone(),
                        }),
                    };
                    let _ = waiter.tx.send(reply);
                }
                Waiter::Fill(read) => {
                    let reason = failure.clone().unwrap_or_else(|| {
                        let first = read
                            .missing
                            .ranges()
                            .first()
                            .map(ByteRange::offset)
                            .unwrap_or(read.offset);
                        format!("transfer ended without bytes at offset {first}")
                    });
                    let _ = read.tx.send(Err(CacheError::TransferFailed { reason }));
                }
            }
        }
    }

    fn intersects_any(missing: &RangeSet, requested: &[RequestRange]) -> bool {
        requested.iter().any(|request| {
            let span = ByteRange::new(request.offset, request.length);
            missing.ranges().iter().any(|range| range.overlaps(&span))
        })
    }

    /// Assembles the contiguous cached run starting at `offset`.
    fn contiguous_from(cached: &RangeSet, offset: u64) -> Bytes {
        let Some(end) = cached.contiguous_end(offset) else {
            return Bytes::new();
        };
        let mut buf = Vec::with_capacity((end - offset) as usize);
        let run = cached.slice(offset, end);
        for range in run.ranges() {
            if let Some(bytes) = range.bytes() {
                buf.extend_from_slice(bytes);
            }
        }
        Bytes::from(buf)
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.cancel_downloads();
    }
}

enum ReadState {
    Cached(Bytes),
    Pending(oneshot::Receiver<CacheResult<Bytes>>),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::network::SimulationHttpClient;

    fn test_url() -> Url {
        Url::parse("http://files.example.com/disk.img").unwrap()
    }

    fn file_of(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    fn manager_over(client: SimulationHttpClient) -> (CacheManager, Arc<SimulationHttpClient>) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let client = Arc::new(client);
        let config = PiecemealConfig::for_testing();
        let manager = CacheManager::with_client(test_url(), client.clone(), config.download);
        (manager, client)
    }

    #[tokio::test]
    async fn test_zero_length_read_returns_immediately() {
        let (manager, client) = manager_over(SimulationHttpClient::new(file_of(100)));
        let bytes = manager.get_bytes(50, Some(0)).await.unwrap();
        assert!(bytes.is_empty());
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_overflowing_range_is_rejected_without_network() {
        let (manager, client) = manager_over(SimulationHttpClient::new(file_of(100)));
        let result = manager.get_bytes(u64::MAX, Some(2)).await;
        assert!(matches!(result, Err(CacheError::InvalidRange { .. })));
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_read_then_cached_reread() {
        let file = file_of(100_000);
        let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

        let bytes = manager.get_bytes(0, Some(100)).await.unwrap();
        assert_eq!(bytes.as_ref(), &file[..100]);
        assert_eq!(client.request_count(), 1);
        // Padded to the floor: the single request covers 16 KiB.
        assert_eq!(
            client.requests()[0].range.as_deref(),
            Some("bytes=0-16383")
        );

        // Overlapping re-read: zero additional network access.
        let bytes = manager.get_bytes(10, Some(20)).await.unwrap();
        assert_eq!(bytes.as_ref(), &file[10..30]);
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_identical_reread_returns_identical_bytes() {
        let file = file_of(50_000);
        let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

        let first = manager.get_bytes(1000, Some(500)).await.unwrap();
        let second = manager.get_bytes(1000, Some(500)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_near_misses_coalesce_into_one_request() {
        let file = file_of(100_000);
        let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

        let (a, b) = tokio::join!(
            manager.get_bytes(0, Some(100)),
            manager.get_bytes(400, Some(100)),
        );
        assert_eq!(a.unwrap().as_ref(), &file[..100]);
        assert_eq!(b.unwrap().as_ref(), &file[400..500]);

        // Both misses fall inside one coalescing window and their gap is
        // below the merge threshold: exactly one request, one span.
        assert_eq!(client.request_count(), 1);
        let range = client.requests()[0].range.clone().unwrap();
        assert!(!range.contains(','), "expected a single merged span: {range}");
    }

    #[tokio::test]
    async fn test_one_piece_satisfies_overlapping_reads() {
        let file = file_of(100_000);
        let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

        let (a, b, c) = tokio::join!(
            manager.get_bytes(100, Some(200)),
            manager.get_bytes(150, Some(200)),
            manager.get_bytes(0, Some(1000)),
        );
        assert_eq!(a.unwrap().as_ref(), &file[100..300]);
        assert_eq!(b.unwrap().as_ref(), &file[150..350]);
        assert_eq!(c.unwrap().as_ref(), &file[0..1000]);
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_put_bytes_primes_the_cache() {
        let (manager, client) = manager_over(SimulationHttpClient::new(file_of(100)));
        manager.put_bytes(10, Bytes::from_static(b"hello"));

        let bytes = manager.get_bytes(10, Some(5)).await.unwrap();
        assert_eq!(bytes.as_ref(), b"hello");
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_bytes_forces_refetch() {
        let file = file_of(100_000);
        let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

        manager.get_bytes(0, Some(1000)).await.unwrap();
        assert_eq!(client.request_count(), 1);

        manager.clear_bytes(0, Some(500));
        let bytes = manager.get_bytes(0, Some(1000)).await.unwrap();
        assert_eq!(bytes.as_ref(), &file[..1000]);
        assert_eq!(client.request_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_transfer_fails_the_read_explicitly() {
        let (manager, _client) =
            manager_over(SimulationHttpClient::new(file_of(100)).with_status_override(500));

        let result = manager.get_bytes(0, Some(10)).await;
        assert!(matches!(result, Err(CacheError::TransferFailed { .. })));
    }

    #[tokio::test]
    async fn test_read_past_end_of_file_fails_explicitly() {
        let (manager, _client) = manager_over(SimulationHttpClient::new(file_of(1000)));

        // Entirely past the end: the server has nothing to serve.
        let result = manager.get_bytes(5000, Some(10)).await;
        assert!(matches!(result, Err(CacheError::TransferFailed { .. })));
    }

    #[tokio::test]
    async fn test_read_straddling_end_of_file_fails_explicitly() {
        let (manager, _client) = manager_over(SimulationHttpClient::new(file_of(1000)));

        let result = manager.get_bytes(900, Some(200)).await;
        assert!(matches!(result, Err(CacheError::TransferFailed { .. })));
    }

    #[tokio::test]
    async fn test_open_ended_read_returns_rest_of_file() {
        let file = file_of(5000);
        let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

        let bytes = manager.get_bytes(100, None).await.unwrap();
        assert_eq!(bytes.as_ref(), &file[100..]);
        assert_eq!(client.requests()[0].range.as_deref(), Some("bytes=100-"));
        assert_eq!(manager.total_size(), Some(5000));
    }

    #[tokio::test]
    async fn test_open_ended_read_with_known_size_uses_cache() {
        let file = file_of(5000);
        let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

        manager.get_bytes(100, None).await.unwrap();
        assert_eq!(client.request_count(), 1);

        // The size is known and the tail is cached: no more requests.
        let bytes = manager.get_bytes(100, None).await.unwrap();
        assert_eq!(bytes.as_ref(), &file[100..]);
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_open_ended_read_at_end_of_known_file_is_empty() {
        let file = file_of(5000);
        let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

        manager.get_bytes(0, None).await.unwrap();
        let bytes = manager.get_bytes(5000, None).await.unwrap();
        assert!(bytes.is_empty());
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_downloads_leaves_reads_pending() {
        let file = file_of(100_000);
        let (manager, client) = manager_over(SimulationHttpClient::new(file));

        let read = manager.get_bytes(0, Some(100));
        tokio::pin!(read);
        // Let the read register, then cancel before the window fires.
        assert!(
            tokio::time::timeout(Duration::from_millis(1), &mut read)
                .await
                .is_err()
        );
        manager.cancel_downloads();

        let result = tokio::time::timeout(Duration::from_millis(50), &mut read).await;
        assert!(result.is_err(), "cancelled read must stay pending");
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_ranged_only_client_is_served_by_chunked_fallback() {
        let file = file_of(100_000);
        let (manager, client) = manager_over(
            SimulationHttpClient::new(file.clone())
                .with_capability(crate::network::DeliveryCapability::RangedOnly),
        );

        let bytes = manager.get_bytes(0, Some(20_000)).await.unwrap();
        assert_eq!(bytes.as_ref(), &file[..20_000]);
        // ceil(20000 / 10240) individual requests, no multi-range header.
        assert_eq!(client.request_count(), 2);
        assert!(client.requests().iter().all(|r| {
            r.range.as_deref().is_some_and(|range| !range.contains(','))
        }));
    }

    #[tokio::test]
    async fn test_buffered_client_round_trip() {
        let file = file_of(50_000);
        let (manager, client) = manager_over(
            SimulationHttpClient::new(file.clone())
                .with_capability(crate::network::DeliveryCapability::Buffered),
        );

        let bytes = manager.get_bytes(30_000, Some(1000)).await.unwrap();
        assert_eq!(bytes.as_ref(), &file[30_000..31_000]);
        assert_eq!(client.request_count(), 1);
    }
}
