//! HTTP delivery
//!
//! Two paths out of the process: a fire-and-forget "quick" POST for
//! payloads small enough to hand off without waiting, and a confirmed POST
//! whose status code decides whether a batch counts as delivered.
//! [`Transmitter`] owns the choreography between the two and logs failures
//! with secrets redacted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;

use crate::error::{Error, Result};
use crate::redact::{Redactor, SecretString};

/// Default timeout for collector requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire-level transport port. Implementations stay policy-free: batching,
/// retries and offline handling all live above this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget delivery attempt. Returns `true` when the payload was
    /// handed off for sending; completion is never observed.
    fn send_quick(&self, url: &Url, headers: &HeaderMap, body: &[u8]) -> bool;

    /// Delivery attempt that waits for the collector's answer. Non-2xx
    /// responses come back as [`Error::Collector`].
    async fn send_confirmed(&self, url: &Url, headers: &HeaderMap, body: Vec<u8>) -> Result<()>;
}

/// Supplies the bearer token attached to outgoing requests. Implement this
/// to integrate rotating or lazily-fetched credentials.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `None` means send the request unauthenticated.
    async fn bearer_token(&self) -> Option<String>;
}

/// Fixed token captured at configuration time.
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Option<String> {
        if self.token.is_empty() {
            None
        } else {
            Some(self.token.expose_secret().to_string())
        }
    }
}

/// Transport backed by a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .user_agent(format!(
                "{}/{} (Rust)",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn send_quick(&self, url: &Url, headers: &HeaderMap, body: &[u8]) -> bool {
        let request = self
            .client
            .post(url.clone())
            .headers(headers.clone())
            .body(body.to_vec());
        // Completion is deliberately unobserved; the caller already gave up
        // the right to know.
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) => {
                    tracing::trace!(status = response.status().as_u16(), "quick send completed");
                }
                Err(err) => {
                    tracing::trace!(error = %err, "quick send failed");
                }
            }
        });
        true
    }

    async fn send_confirmed(&self, url: &Url, headers: &HeaderMap, body: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .post(url.clone())
            .headers(headers.clone())
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Collector {
            status: status.as_u16(),
            message: body.chars().take(512).collect(),
        })
    }
}

/// How a payload is allowed to leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Quick hand-off first when the payload qualifies, confirmed otherwise.
    PreferQuick,
    /// Confirmed delivery only; used when the result must be known.
    ConfirmedOnly,
}

/// Result of one delivery attempt, as seen by the batching loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The payload left the process; quick hand-offs count as delivered.
    Delivered,
    /// The collector rejected the payload or the network failed.
    Failed,
}

/// Sends serialized envelopes to the collector endpoint.
pub struct Transmitter {
    transport: Arc<dyn Transport>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    endpoint: Url,
    base_headers: HeaderMap,
    quick_send_limit_bytes: usize,
    redactor: Redactor,
    bad_token_warned: AtomicBool,
}

impl Transmitter {
    pub fn new(
        transport: Arc<dyn Transport>,
        token_provider: Option<Arc<dyn TokenProvider>>,
        endpoint: Url,
        custom_headers: HeaderMap,
        quick_send_limit_bytes: usize,
    ) -> Self {
        let mut base_headers = HeaderMap::new();
        base_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        base_headers.extend(custom_headers);
        Self {
            transport,
            token_provider,
            endpoint,
            base_headers,
            quick_send_limit_bytes,
            redactor: Redactor::new(),
            bad_token_warned: AtomicBool::new(false),
        }
    }

    /// Send one serialized envelope. In [`SendMode::PreferQuick`] a payload
    /// within the quick-send limit is handed to the fire-and-forget path and
    /// the hand-off itself counts as delivery; everything else goes through
    /// the confirmed path.
    pub async fn send(&self, body: Vec<u8>, mode: SendMode) -> DeliveryOutcome {
        let headers = self.request_headers().await;

        if mode == SendMode::PreferQuick
            && self.quick_send_limit_bytes > 0
            && body.len() <= self.quick_send_limit_bytes
            && self.transport.send_quick(&self.endpoint, &headers, &body)
        {
            tracing::debug!(bytes = body.len(), "batch handed to quick send");
            return DeliveryOutcome::Delivered;
        }

        match self
            .transport
            .send_confirmed(&self.endpoint, &headers, body)
            .await
        {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(err) => {
                if let Some(status) = err.status() {
                    tracing::warn!(status, "collector rejected batch");
                } else {
                    tracing::warn!(
                        error = %self.redactor.redact(&err.to_string()),
                        "batch delivery failed"
                    );
                }
                DeliveryOutcome::Failed
            }
        }
    }

    /// Assemble per-request headers. A token that cannot be encoded as a
    /// header value is dropped and the request goes out unauthenticated.
    async fn request_headers(&self) -> HeaderMap {
        let mut headers = self.base_headers.clone();
        if let Some(provider) = &self.token_provider {
            if let Some(token) = provider.bearer_token().await {
                match HeaderValue::from_str(&format!("Bearer {token}")) {
                    Ok(mut value) => {
                        value.set_sensitive(true);
                        headers.insert(AUTHORIZATION, value);
                    }
                    Err(_) => {
                        if !self.bad_token_warned.swap(true, Ordering::Relaxed) {
                            tracing::warn!(
                                "bearer token is not a valid header value, sending unauthenticated"
                            );
                        }
                    }
                }
            }
        }
        headers
    }
}
