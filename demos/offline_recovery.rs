//! Exercise the offline store: a dead collector makes events burn their
//! retry budget and land on disk, then a second shipper recovers them.
//!
//! Run once with no collector, then again with `LOGSHIP_ENDPOINT` pointing
//! at a live one to watch the recovered events drain.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use logship::{EventRecord, FileKvStore, Level, Shipper};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logship=debug".into()),
        )
        .init();

    let store_dir = std::env::temp_dir().join("logship-demo");
    let endpoint = std::env::var("LOGSHIP_ENDPOINT")
        // Port 9 is the discard port; deliveries fail fast.
        .unwrap_or_else(|_| "http://localhost:9/v1/events".to_string());

    println!("offline store at {}", store_dir.display());

    // Phase 1: short retry budget, failing endpoint.
    let shipper = Shipper::builder()
        .endpoint(endpoint.clone())
        .quick_send_limit_bytes(0)
        .retry_delay(Duration::from_millis(50))
        .max_retries(2)
        .enable_offline_storage(true)
        .offline_store(Arc::new(FileKvStore::new(&store_dir)?))
        .build()?;

    for i in 0..3 {
        shipper.write(
            EventRecord::builder()
                .level(Level::Error)
                .message(format!("must not be lost #{i}"))
                .build(),
        );
    }
    shipper.flush().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let metrics = shipper.metrics();
    println!(
        "phase 1: failures={} persisted={}",
        metrics.send_failures, metrics.persisted
    );
    shipper.close().await;

    // Phase 2: a fresh shipper recovers whatever phase 1 left behind.
    let shipper = Shipper::builder()
        .endpoint(endpoint)
        .quick_send_limit_bytes(0)
        .enable_offline_storage(true)
        .offline_store(Arc::new(FileKvStore::new(&store_dir)?))
        .build()?;

    tokio::time::sleep(Duration::from_secs(1)).await;

    let metrics = shipper.metrics();
    println!(
        "phase 2: recovered={} delivered={}",
        metrics.recovered, metrics.delivered
    );
    // Anything still undeliverable goes back to disk here.
    shipper.close().await;

    Ok(())
}
