use std::sync::{Arc, OnceLock};

use futures::StreamExt;
use futures::stream;
use http::StatusCode;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serial_test::serial;
use transfer_cache::cache::{
    CacheConfig, HttpEvent, MemoryStateStore, Platform, TransferCacheInterceptor, TransferRequest,
    TransferResponse, TransportStream,
};

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

fn counter(name: &str) -> u64 {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(value) => value,
            _ => 0,
        })
        .sum()
}

fn ok_transport(_request: TransferRequest) -> TransportStream {
    let response = TransferResponse::new(StatusCode::OK, None);
    stream::iter([Ok(HttpEvent::Response(response))]).boxed()
}

#[tokio::test]
#[serial]
async fn cache_paths_emit_expected_metric_keys() {
    snapshotter();
    let hits = counter("transfer_cache_hit_total");
    let misses = counter("transfer_cache_miss_total");
    let stored = counter("transfer_cache_snapshot_stored_total");

    let server = Arc::new(MemoryStateStore::new());
    let producer =
        TransferCacheInterceptor::new(Platform::Producer, &CacheConfig::default(), server.clone())
            .expect("producer starts");
    for url in ["/a", "/b"] {
        producer
            .send(TransferRequest::get(url), &ok_transport)
            .await
            .expect("producer response");
    }

    let client = Arc::new(MemoryStateStore::from_payload(&server.to_payload()).expect("payload"));
    let consumer =
        TransferCacheInterceptor::new(Platform::Consumer, &CacheConfig::default(), client)
            .expect("consumer starts");
    consumer
        .send(TransferRequest::get("/a"), &ok_transport)
        .await
        .expect("cached response");

    assert_eq!(counter("transfer_cache_miss_total") - misses, 2);
    assert_eq!(counter("transfer_cache_snapshot_stored_total") - stored, 2);
    assert_eq!(counter("transfer_cache_hit_total") - hits, 1);
}

#[tokio::test]
#[serial]
async fn inactive_paths_count_passthrough_and_collection() {
    snapshotter();
    let passthrough = counter("transfer_cache_passthrough_total");
    let removed = counter("transfer_cache_gc_removed_total");

    let server = Arc::new(MemoryStateStore::new());
    let producer =
        TransferCacheInterceptor::new(Platform::Producer, &CacheConfig::default(), server.clone())
            .expect("producer starts");
    producer
        .send(TransferRequest::get("/a"), &ok_transport)
        .await
        .expect("producer response");

    let client = Arc::new(MemoryStateStore::from_payload(&server.to_payload()).expect("payload"));
    let consumer =
        TransferCacheInterceptor::new(Platform::Consumer, &CacheConfig::default(), client)
            .expect("consumer starts");
    assert!(consumer.mark_stable());
    consumer
        .send(TransferRequest::get("/a"), &ok_transport)
        .await
        .expect("live response");

    assert_eq!(counter("transfer_cache_passthrough_total") - passthrough, 1);
    // last id, one snapshot, ledger, activation flag
    assert_eq!(counter("transfer_cache_gc_removed_total") - removed, 4);
}
