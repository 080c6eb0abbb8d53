//! Offline persistence and recovery tests

use std::sync::Arc;
use std::time::Duration;

use logship::{EventRecord, FileKvStore, KeyValueStore, Level, MemoryKvStore, Shipper};
use mockito::Server;

fn error_event(message: &str) -> EventRecord {
    EventRecord::builder()
        .level(Level::Error)
        .message(message)
        .build()
}

#[tokio::test]
async fn exhausted_retries_persist_and_a_restart_recovers() {
    let kv = Arc::new(MemoryKvStore::new());

    // Phase 1: the collector is down; the event burns its retry budget and
    // lands in the offline store.
    {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("POST", "/v1/events")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let shipper = Shipper::builder()
            .endpoint(format!("{}/v1/events", server.url()))
            .quick_send_limit_bytes(0)
            .flush_interval(Duration::from_secs(60))
            .retry_delay(Duration::from_millis(10))
            .max_retries(2)
            .enable_offline_storage(true)
            .offline_store(kv.clone())
            .build()
            .unwrap();

        shipper.write(error_event("precious"));
        shipper.flush().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        failing.assert_async().await;
        let metrics = shipper.metrics();
        assert_eq!(metrics.send_failures, 2);
        assert_eq!(metrics.persisted, 1);
        shipper.close().await;
    }

    // Phase 2: a new shipper (fresh endpoint, same store) recovers the
    // event on startup and delivers it without any explicit write.
    let mut server = Server::new_async().await;
    let recovered = server
        .mock("POST", "/v1/events")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let shipper = Shipper::builder()
        .endpoint(format!("{}/v1/events", server.url()))
        .quick_send_limit_bytes(0)
        .flush_interval(Duration::from_secs(60))
        .enable_offline_storage(true)
        .offline_store(kv.clone())
        .build()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    recovered.assert_async().await;
    let metrics = shipper.metrics();
    assert_eq!(metrics.recovered, 1);
    assert_eq!(metrics.delivered, 1);

    // The store was cleared by recovery.
    shipper.close().await;
    assert!(kv.get("logship:events").await.unwrap().is_none());
}

#[tokio::test]
async fn connectivity_loss_defers_and_restoration_delivers() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/events")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let shipper = Shipper::builder()
        .endpoint(format!("{}/v1/events", server.url()))
        .quick_send_limit_bytes(0)
        .flush_interval(Duration::from_secs(60))
        .build()
        .unwrap();

    shipper.connectivity_lost().await;
    shipper.write(error_event("written while offline"));
    shipper.flush().await;
    assert_eq!(shipper.metrics().delivered, 0);

    // Restoration flushes on its own; no explicit flush needed.
    shipper.connectivity_restored().await;

    mock.assert_async().await;
    assert_eq!(shipper.metrics().delivered, 1);
}

#[tokio::test]
async fn file_backed_store_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();

    // Phase 1: no retries allowed, so the first failure persists straight
    // to disk.
    {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("POST", "/v1/events")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let shipper = Shipper::builder()
            .endpoint(format!("{}/v1/events", server.url()))
            .quick_send_limit_bytes(0)
            .flush_interval(Duration::from_secs(60))
            .max_retries(0)
            .enable_offline_storage(true)
            .offline_store(Arc::new(FileKvStore::new(dir.path()).unwrap()))
            .build()
            .unwrap();

        shipper.write(error_event("survives restarts"));
        shipper.flush().await;

        failing.assert_async().await;
        assert_eq!(shipper.metrics().persisted, 1);
        shipper.close().await;
    }

    // Phase 2: a new shipper over the same directory picks the event up.
    let mut server = Server::new_async().await;
    let recovered = server
        .mock("POST", "/v1/events")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let shipper = Shipper::builder()
        .endpoint(format!("{}/v1/events", server.url()))
        .quick_send_limit_bytes(0)
        .flush_interval(Duration::from_secs(60))
        .enable_offline_storage(true)
        .offline_store(Arc::new(FileKvStore::new(dir.path()).unwrap()))
        .build()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    recovered.assert_async().await;
    assert_eq!(shipper.metrics().recovered, 1);
    assert_eq!(shipper.metrics().delivered, 1);
    shipper.close().await;
}
