//! Reliable telemetry delivery for Rust applications
//!
//! `logship` buffers structured events in memory, packs them into size- and
//! count-bounded batches, and POSTs them to a collector endpoint with
//! exponential-backoff retries, client-side rate limiting and an optional
//! offline store that carries undeliverable events across restarts.
//!
//! Writing an event never blocks and never fails; everything slow or
//! fallible happens on a background worker task. Small batches can leave
//! through a fire-and-forget "quick" POST, everything else through a
//! confirmed POST whose status decides retry scheduling.
//!
//! # Quick start
//!
//! ```no_run
//! use logship::{EventRecord, Level, Shipper};
//!
//! # async fn run() -> logship::Result<()> {
//! let shipper = Shipper::builder()
//!     .endpoint("https://collector.example.com/v1/events")
//!     .auth_token("secret-token")
//!     .build()?;
//!
//! shipper.write(
//!     EventRecord::builder()
//!         .level(Level::Info)
//!         .message("checkout rendered")
//!         .build(),
//! );
//!
//! // Usually the flush timer handles this; force it when you must.
//! shipper.flush().await;
//!
//! // A final confirmed flush before the process exits.
//! shipper.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod event;
pub mod limiter;
pub mod queue;
pub mod redact;
pub mod retry;
pub mod sanitize;
pub mod store;
pub mod transport;

pub use engine::{DeliveryMetrics, DeliveryMetricsSnapshot, Shipper};
pub use envelope::{Envelope, UserIdProvider};
pub use error::{Error, Result};
pub use event::{EventRecord, Level};
pub use redact::SecretString;
pub use store::{FileKvStore, KeyValueStore, MemoryKvStore};
pub use transport::{HttpTransport, TokenProvider, Transport};
