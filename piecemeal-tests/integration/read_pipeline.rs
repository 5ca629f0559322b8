//! End-to-end read pipeline: cache misses, coalescing, padding, fan-out

use std::sync::Arc;

use bytes::Bytes;
use piecemeal_core::config::PiecemealConfig;
use piecemeal_core::manager::CacheManager;
use piecemeal_core::network::SimulationHttpClient;
use url::Url;

fn test_url() -> Url {
    Url::parse("http://files.example.com/disk.img").unwrap()
}

fn remote_file(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i * 7 % 251) as u8).collect::<Vec<u8>>())
}

fn manager_over(client: SimulationHttpClient) -> (CacheManager, Arc<SimulationHttpClient>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let client = Arc::new(client);
    let manager = CacheManager::with_client(
        test_url(),
        client.clone(),
        PiecemealConfig::for_testing().download,
    );
    (manager, client)
}

#[tokio::test]
async fn test_first_read_is_padded_and_second_is_free() {
    let file = remote_file(1_000_000);
    let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

    // Empty cache: one request, extended to the padding floor.
    let bytes = manager.get_bytes(0, Some(100)).await.unwrap();
    assert_eq!(bytes.as_ref(), &file[..100]);
    assert_eq!(client.request_count(), 1);
    assert_eq!(client.requests()[0].range.as_deref(), Some("bytes=0-16383"));

    // Inside the padded region: resolved with zero network access.
    let bytes = manager.get_bytes(10, Some(20)).await.unwrap();
    assert_eq!(bytes.as_ref(), &file[10..30]);
    assert_eq!(client.request_count(), 1);
}

#[tokio::test]
async fn test_repeat_reads_are_idempotent() {
    let file = remote_file(200_000);
    let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

    let mut previous: Option<Bytes> = None;
    for _ in 0..3 {
        let bytes = manager.get_bytes(5_000, Some(2_000)).await.unwrap();
        assert_eq!(bytes.as_ref(), &file[5_000..7_000]);
        if let Some(previous) = &previous {
            assert_eq!(previous, &bytes);
        }
        previous = Some(bytes);
    }
    assert_eq!(client.request_count(), 1);
}

#[tokio::test]
async fn test_concurrent_near_misses_produce_one_merged_request() {
    let file = remote_file(1_000_000);
    let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

    // Three disjoint-but-near reads inside one coalescing window; gaps
    // are below the merge threshold.
    let (a, b, c) = tokio::join!(
        manager.get_bytes(0, Some(100)),
        manager.get_bytes(300, Some(100)),
        manager.get_bytes(700, Some(100)),
    );
    assert_eq!(a.unwrap().as_ref(), &file[0..100]);
    assert_eq!(b.unwrap().as_ref(), &file[300..400]);
    assert_eq!(c.unwrap().as_ref(), &file[700..800]);

    assert_eq!(client.request_count(), 1);
    let range = client.requests()[0].range.clone().unwrap();
    assert!(
        !range.contains(','),
        "near misses must merge into one span, got {range}"
    );
}

#[tokio::test]
async fn test_far_apart_reads_fan_out_as_multipart() {
    let file = remote_file(1_000_000);
    let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

    // Each read is large enough that the batch needs no padding, and the
    // gap is far above the merge threshold: the request keeps two spans
    // and the response comes back as multipart/byteranges.
    let (a, b) = tokio::join!(
        manager.get_bytes(0, Some(10_000)),
        manager.get_bytes(500_000, Some(10_000)),
    );
    assert_eq!(a.unwrap().as_ref(), &file[..10_000]);
    assert_eq!(b.unwrap().as_ref(), &file[500_000..510_000]);

    assert_eq!(client.request_count(), 1);
    assert_eq!(
        client.requests()[0].range.as_deref(),
        Some("bytes=0-9999,500000-509999")
    );
}

#[tokio::test]
async fn test_sequential_reads_only_fetch_missing_portions() {
    let file = remote_file(1_000_000);
    let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

    manager.get_bytes(100_000, Some(20_000)).await.unwrap();
    assert_eq!(client.request_count(), 1);

    // Overlaps the cached region on the left; only the uncached left
    // part may be requested.
    let bytes = manager.get_bytes(80_000, Some(40_000)).await.unwrap();
    assert_eq!(bytes.as_ref(), &file[80_000..120_000]);
    assert_eq!(client.request_count(), 2);
    assert_eq!(
        client.requests()[1].range.as_deref(),
        Some("bytes=80000-99999")
    );
}

#[tokio::test]
async fn test_open_ended_read_learns_file_size() {
    let file = remote_file(50_000);
    let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

    assert_eq!(manager.total_size(), None);
    let bytes = manager.get_bytes(40_000, None).await.unwrap();
    assert_eq!(bytes.as_ref(), &file[40_000..]);
    assert_eq!(manager.total_size(), Some(50_000));

    // With the size known, a bounded tail read is served from cache.
    let bytes = manager.get_bytes(40_000, None).await.unwrap();
    assert_eq!(bytes.as_ref(), &file[40_000..]);
    assert_eq!(client.request_count(), 1);
}

#[tokio::test]
async fn test_whole_file_read_without_range_header() {
    let file = remote_file(30_000);
    let (manager, client) = manager_over(SimulationHttpClient::new(file.clone()));

    let bytes = manager.get_bytes(0, None).await.unwrap();
    assert_eq!(bytes.as_ref(), file.as_ref());
    // A whole-file request carries no Range header at all.
    assert_eq!(client.requests()[0].range, None);
    assert_eq!(manager.total_size(), Some(30_000));
}

#[tokio::test]
async fn test_put_bytes_fans_out_to_pending_readers() {
    let (manager, _client) = manager_over(SimulationHttpClient::new(remote_file(100)));

    // Reader first, data second: put_bytes satisfies the pending read
    // without waiting for any transfer.
    let pending = manager.get_bytes(10, Some(5));
    tokio::pin!(pending);
    assert!(
        tokio::time::timeout(std::time::Duration::from_millis(1), &mut pending)
            .await
            .is_err()
    );

    manager.put_bytes(0, Bytes::from_static(b"0123456789ABCDEF"));
    let bytes = pending.await.unwrap();
    assert_eq!(bytes.as_ref(), b"ABCDE");
}
