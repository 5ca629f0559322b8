//! The same reads served through every delivery capability
//!
//! Whatever the client can do — stream chunks, hand over one buffer, or
//! nothing but small individual requests — the bytes coming out of the
//! cache must be identical.

use std::sync::Arc;

use bytes::Bytes;
use piecemeal_core::config::PiecemealConfig;
use piecemeal_core::manager::CacheManager;
use piecemeal_core::network::{DeliveryCapability, SimulationHttpClient};
use url::Url;

fn test_url() -> Url {
    Url::parse("http://files.example.com/disk.img").unwrap()
}

fn remote_file(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i * 13 % 251) as u8).collect::<Vec<u8>>())
}

async fn read_with_capability(
    file: Bytes,
    capability: DeliveryCapability,
    offset: u64,
    length: u64,
) -> (Bytes, usize) {
    let client = Arc::new(SimulationHttpClient::new(file).with_capability(capability));
    let manager = CacheManager::with_client(
        test_url(),
        client.clone(),
        PiecemealConfig::for_testing().download,
    );
    let bytes = manager.get_bytes(offset, Some(length)).await.unwrap();
    (bytes, client.request_count())
}

#[tokio::test]
async fn test_all_capabilities_return_identical_bytes() {
    let file = remote_file(120_000);
    let expected = &file[30_000..75_000];

    let (streamed, _) =
        read_with_capability(file.clone(), DeliveryCapability::Streaming, 30_000, 45_000).await;
    let (buffered, _) =
        read_with_capability(file.clone(), DeliveryCapability::Buffered, 30_000, 45_000).await;
    let (chunked, _) =
        read_with_capability(file.clone(), DeliveryCapability::RangedOnly, 30_000, 45_000).await;

    assert_eq!(streamed.as_ref(), expected);
    assert_eq!(buffered, streamed);
    assert_eq!(chunked, streamed);
}

#[tokio::test]
async fn test_streaming_and_buffered_use_one_request() {
    let file = remote_file(120_000);
    let (_, streamed_requests) =
        read_with_capability(file.clone(), DeliveryCapability::Streaming, 0, 50_000).await;
    let (_, buffered_requests) =
        read_with_capability(file.clone(), DeliveryCapability::Buffered, 0, 50_000).await;

    assert_eq!(streamed_requests, 1);
    assert_eq!(buffered_requests, 1);
}

#[tokio::test]
async fn test_ranged_only_falls_back_to_small_sequential_requests() {
    let file = remote_file(120_000);
    let (_, requests) =
        read_with_capability(file.clone(), DeliveryCapability::RangedOnly, 0, 50_000).await;

    // ceil(50000 / 10240) sub-requests instead of one streamed transfer.
    assert_eq!(requests, 5);
}

#[tokio::test]
async fn test_ranged_only_open_ended_read() {
    let file = remote_file(25_000);
    let client = Arc::new(
        SimulationHttpClient::new(file.clone()).with_capability(DeliveryCapability::RangedOnly),
    );
    let manager = CacheManager::with_client(
        test_url(),
        client.clone(),
        PiecemealConfig::for_testing().download,
    );

    let bytes = manager.get_bytes(20_000, None).await.unwrap();
    assert_eq!(bytes.as_ref(), &file[20_000..]);
    assert_eq!(manager.total_size(), Some(25_000));
}

#[tokio::test]
async fn test_multipart_and_chunked_agree_on_scattered_reads() {
    let file = remote_file(1_000_000);
    let spans = [(0u64, 10_000u64), (500_000, 10_000)];

    let mut outputs: Vec<Vec<Bytes>> = Vec::new();
    for capability in [DeliveryCapability::Streaming, DeliveryCapability::RangedOnly] {
        let client =
            Arc::new(SimulationHttpClient::new(file.clone()).with_capability(capability));
        let manager = CacheManager::with_client(
            test_url(),
            client,
            PiecemealConfig::for_testing().download,
        );
        let (a, b) = tokio::join!(
            manager.get_bytes(spans[0].0, Some(spans[0].1)),
            manager.get_bytes(spans[1].0, Some(spans[1].1)),
        );
        outputs.push(vec![a.unwrap(), b.unwrap()]);
    }

    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0][0].as_ref(), &file[..10_000]);
    assert_eq!(outputs[0][1].as_ref(), &file[500_000..510_000]);
}
