//! Failure propagation: protocol errors reach the reader, cancellation
//! stays silent

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use piecemeal_core::config::PiecemealConfig;
use piecemeal_core::manager::{CacheError, CacheManager};
use piecemeal_core::network::{DeliveryCapability, SimulationHttpClient};
use url::Url;

fn test_url() -> Url {
    Url::parse("http://files.example.com/disk.img").unwrap()
}

fn remote_file(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i * 3 % 251) as u8).collect::<Vec<u8>>())
}

fn manager_over(client: SimulationHttpClient) -> (CacheManager, Arc<SimulationHttpClient>) {
    let client = Arc::new(client);
    let manager = CacheManager::with_client(
        test_url(),
        client.clone(),
        PiecemealConfig::for_testing().download,
    );
    (manager, client)
}

#[tokio::test]
async fn test_server_error_fails_every_waiting_read() {
    let (manager, _client) =
        manager_over(SimulationHttpClient::new(remote_file(1000)).with_status_override(500));

    let (a, b) = tokio::join!(
        manager.get_bytes(0, Some(100)),
        manager.get_bytes(200, Some(100)),
    );
    for result in [a, b] {
        match result {
            Err(CacheError::TransferFailed { reason }) => {
                assert!(reason.contains("500"), "unhelpful reason: {reason}")
            }
            other => panic!("expected TransferFailed, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_failed_transfer_does_not_poison_the_cache() {
    let file = remote_file(100_000);
    let flaky = SimulationHttpClient::new(file.clone()).with_status_override(503);
    let (manager, _client) = manager_over(flaky);

    assert!(manager.get_bytes(0, Some(100)).await.is_err());

    // Same manager, data arriving through put_bytes: reads work again.
    manager.put_bytes(0, file.slice(0..200));
    let bytes = manager.get_bytes(0, Some(100)).await.unwrap();
    assert_eq!(bytes.as_ref(), &file[..100]);
}

#[tokio::test]
async fn test_open_ended_read_fails_when_transfer_fails() {
    let (manager, _client) =
        manager_over(SimulationHttpClient::new(remote_file(1000)).with_status_override(404));

    let result = manager.get_bytes(0, None).await;
    assert!(matches!(result, Err(CacheError::TransferFailed { .. })));
}

#[tokio::test]
async fn test_chunked_fallback_surfaces_missing_content_range() {
    // Open-ended read against a server that omits Content-Range: the
    // fallback cannot learn the file size and must fail the read rather
    // than leave it waiting forever.
    let (manager, _client) = manager_over(
        SimulationHttpClient::new(remote_file(50_000))
            .with_capability(DeliveryCapability::RangedOnly)
            .with_omitted_content_range(),
    );

    match manager.get_bytes(1000, None).await {
        Err(CacheError::TransferFailed { reason }) => {
            assert!(
                reason.contains("Content-Range"),
                "unhelpful reason: {reason}"
            );
        }
        other => panic!("expected TransferFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_read_past_end_of_file_fails_instead_of_hanging() {
    let (manager, _client) = manager_over(SimulationHttpClient::new(remote_file(1000)));

    let result = manager.get_bytes(900, Some(500)).await;
    match result {
        Err(CacheError::TransferFailed { .. }) => {}
        other => panic!("expected TransferFailed, got {other:?}"),
    }

    // The part of the file that does exist was cached along the way.
    let bytes = manager.get_bytes(900, Some(50)).await.unwrap();
    assert_eq!(bytes.len(), 50);
}

#[tokio::test]
async fn test_cancel_suppresses_delivery_and_leaves_reads_pending() {
    let (manager, client) = manager_over(SimulationHttpClient::new(remote_file(100_000)));

    let read = manager.get_bytes(0, Some(100));
    tokio::pin!(read);
    assert!(
        tokio::time::timeout(Duration::from_millis(1), &mut read)
            .await
            .is_err()
    );

    manager.cancel_downloads();

    // The read never resolves; callers wanting read cancellation layer a
    // timeout on top.
    assert!(
        tokio::time::timeout(Duration::from_millis(50), &mut read)
            .await
            .is_err()
    );
    assert_eq!(client.request_count(), 0);
    assert!(manager.cached_ranges().is_empty());
}

#[tokio::test]
async fn test_validation_errors_never_touch_the_network() {
    let (manager, client) = manager_over(SimulationHttpClient::new(remote_file(1000)));

    assert!(matches!(
        manager.get_bytes(u64::MAX, Some(1)).await,
        Err(CacheError::InvalidRange { .. })
    ));
    assert!(matches!(
        manager.get_bytes(u64::MAX - 10, Some(100)).await,
        Err(CacheError::InvalidRange { .. })
    ));
    assert_eq!(client.request_count(), 0);
}
