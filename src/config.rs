//! Construction-time configuration
//!
//! Everything here is immutable once the engine is built. Configuration
//! problems (missing or unparsable endpoint, invalid custom header) are the
//! only errors raised at construction; every later failure is handled inside
//! the delivery path.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;

use crate::error::{Error, Result};
use crate::redact::SecretString;

/// Default maximum events per batch.
pub const DEFAULT_MAX_BATCH_COUNT: usize = 50;
/// Default auto-flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Default hard payload cap per batch (pre-headroom).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;
/// Default ceiling for the best-effort primitive; `0` disables it.
pub const DEFAULT_QUICK_SEND_LIMIT_BYTES: usize = 64 * 1024;
/// Default total transmission attempts per event.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base retry delay (doubles per attempt).
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Default events admitted per 60-second window.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 300;
/// Default bound on events buffered in memory ahead of the worker.
pub const DEFAULT_MAX_QUEUE_EVENTS: usize = 10_000;
/// Default bound on events held in the offline store.
pub const DEFAULT_MAX_OFFLINE_EVENTS: usize = 1_000;
/// Default offline-store key prefix.
pub const DEFAULT_OFFLINE_KEY_PREFIX: &str = "logship";

/// Immutable configuration for a [`Shipper`](crate::Shipper).
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Collector URL batches are POSTed to.
    pub endpoint: Url,
    /// Maximum number of events per batch.
    pub max_batch_count: usize,
    /// Period of the recurring flush timer.
    pub flush_interval: Duration,
    /// Hard payload cap; batches are packed against 90% of this and the
    /// queue early-flushes at 80%.
    pub max_payload_bytes: usize,
    /// Payloads at or under this size try the best-effort primitive first.
    /// `0` disables the quick path entirely.
    pub quick_send_limit_bytes: usize,
    /// Persist undeliverable events across restarts.
    pub enable_offline_storage: bool,
    /// Namespace prefix for offline-store keys.
    pub offline_storage_key_prefix: String,
    /// FIFO cap on the offline store.
    pub max_offline_events: usize,
    /// Transmission attempts before an event is persisted or dropped.
    pub max_retries: u32,
    /// Base backoff delay; attempt `n` waits `retry_delay * 2^(n-1)`.
    pub retry_delay: Duration,
    /// Add 0-25% random jitter to each backoff delay.
    pub retry_jitter: bool,
    /// Static bearer token attached as `Authorization`.
    pub auth_token: Option<SecretString>,
    /// Extra headers sent with every confirmable request.
    pub custom_headers: HeaderMap,
    /// Events admitted per 60-second window before drops start.
    pub rate_limit_per_minute: u32,
    /// Honor visibility/teardown/connectivity signals.
    pub enable_lifecycle_handling: bool,
    /// Bound on events buffered between `write` and the worker.
    pub max_queue_events: usize,
}

impl DeliveryConfig {
    /// Build a configuration with defaults for everything but the endpoint.
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            max_batch_count: DEFAULT_MAX_BATCH_COUNT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            quick_send_limit_bytes: DEFAULT_QUICK_SEND_LIMIT_BYTES,
            enable_offline_storage: false,
            offline_storage_key_prefix: DEFAULT_OFFLINE_KEY_PREFIX.to_string(),
            max_offline_events: DEFAULT_MAX_OFFLINE_EVENTS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_jitter: false,
            auth_token: None,
            custom_headers: HeaderMap::new(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            enable_lifecycle_handling: true,
            max_queue_events: DEFAULT_MAX_QUEUE_EVENTS,
        })
    }
}

/// Parse and validate the collector endpoint.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url> {
    if endpoint.trim().is_empty() {
        return Err(Error::Configuration("endpoint must not be empty".into()));
    }
    let url = Url::parse(endpoint)
        .map_err(|e| Error::Configuration(format!("invalid endpoint url `{endpoint}`: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Configuration(format!(
            "endpoint scheme must be http or https, got `{other}`"
        ))),
    }
}

/// Reject a static bearer token that cannot be sent as an `Authorization`
/// header, such as one with the trailing newline a token file often carries.
pub(crate) fn validate_auth_token(token: &SecretString) -> Result<()> {
    if HeaderValue::from_str(&format!("Bearer {}", token.expose_secret())).is_err() {
        return Err(Error::Configuration(
            "auth_token contains bytes not valid in an Authorization header".into(),
        ));
    }
    Ok(())
}

/// Validate user-supplied headers into a `HeaderMap`.
pub(crate) fn build_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|e| Error::Configuration(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|e| Error::Configuration(format!("invalid value for header `{name}`: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
