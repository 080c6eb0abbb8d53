//! Ship a handful of structured events to a collector, then flush and close.
//!
//! Point `LOGSHIP_ENDPOINT` at a real collector to see the requests arrive;
//! without one the demo still runs and shows the retry diagnostics.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use logship::{EventRecord, Level, Shipper};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logship=debug".into()),
        )
        .init();

    let endpoint = std::env::var("LOGSHIP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:8080/v1/events".to_string());

    let shipper = Shipper::builder()
        .endpoint(endpoint)
        .max_batch_count(25)
        .flush_interval(Duration::from_secs(2))
        .user_id_provider(Arc::new(|| Some("demo-user".to_string())))
        .build()?;

    println!("shipping under session {}", shipper.session_id());

    for i in 0..10 {
        let mut context = serde_json::Map::new();
        context.insert("iteration".to_string(), json!(i));
        shipper.write(
            EventRecord::builder()
                .level(if i % 3 == 0 { Level::Warn } else { Level::Info })
                .message(format!("demo event {i}"))
                .component("demo")
                .context(context)
                .build(),
        );
    }

    shipper.flush().await;

    let metrics = shipper.metrics();
    println!(
        "delivered={} failures={} retries_scheduled={}",
        metrics.delivered, metrics.send_failures, metrics.retries_scheduled
    );

    shipper.close().await;
    Ok(())
}
