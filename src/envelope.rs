//! Wire envelopes
//!
//! Each batch is wrapped fresh at send time into an [`Envelope`] carrying
//! session and environment metadata. The session id is generated once and
//! stays stable for the engine's lifetime.

use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::event::{EventRecord, QueuedEvent};
use crate::sanitize;

const AGENT_NAME: &str = env!("CARGO_PKG_NAME");
const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Supplies the current user id, when one is known.
///
/// Closures work directly: `Arc::new(|| Some("user-1".to_string()))`.
pub trait UserIdProvider: Send + Sync {
    fn user_id(&self) -> Option<String>;
}

impl<F> UserIdProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn user_id(&self) -> Option<String> {
        self()
    }
}

/// Wire wrapper around one batch of events.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub client_agent: String,
    pub timezone: String,
    pub created_at_millis: i64,
    pub events: Vec<Value>,
    pub event_count: usize,
    pub approx_size_bytes: usize,
}

/// Builds envelopes with the per-engine session and environment fields.
pub struct EnvelopeBuilder {
    session_id: String,
    client_agent: String,
    timezone: String,
    user_id_provider: Option<Arc<dyn UserIdProvider>>,
}

impl EnvelopeBuilder {
    pub fn new(user_id_provider: Option<Arc<dyn UserIdProvider>>) -> Self {
        Self {
            session_id: generate_session_id(),
            client_agent: format!("{}/{} (Rust)", AGENT_NAME, AGENT_VERSION),
            timezone: chrono::Local::now().format("%:z").to_string(),
            user_id_provider,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wrap a batch. An event that cannot be serialized is replaced in place
    /// by a minimal placeholder keeping level/message/timestamp/component;
    /// the batch is never dropped because of one bad event.
    pub fn build(&self, batch: &[QueuedEvent]) -> Envelope {
        Envelope {
            session_id: self.session_id.clone(),
            user_id: self.user_id_provider.as_ref().and_then(|p| p.user_id()),
            client_agent: self.client_agent.clone(),
            timezone: self.timezone.clone(),
            created_at_millis: chrono::Utc::now().timestamp_millis(),
            events: batch.iter().map(|q| wire_event(&q.event)).collect(),
            event_count: batch.len(),
            approx_size_bytes: batch.iter().map(|q| q.estimated_size_bytes).sum(),
        }
    }
}

fn wire_event(event: &EventRecord) -> Value {
    match serde_json::to_value(event) {
        Ok(value) => sanitize::bounded(&value),
        Err(err) => {
            tracing::warn!(error = %err, "event not serializable, substituting placeholder");
            placeholder(event)
        }
    }
}

fn placeholder(event: &EventRecord) -> Value {
    serde_json::json!({
        "level": event.level.to_string(),
        "message": event.message,
        "timestampMillis": event.timestamp_millis,
        "component": event.component,
        "placeholder": true,
    })
}

/// Session ids are `{epoch_millis}-{random base36 suffix}`.
pub(crate) fn generate_session_id() -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().timestamp_millis(),
        random_base36(10)
    )
}

fn random_base36(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}
