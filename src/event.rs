//! Event records and queue entries
//!
//! [`EventRecord`] is the immutable unit produced by the logging front end;
//! the engine only ever wraps it. [`QueuedEvent`] adds the retry metadata and
//! the size estimate the batcher packs against, and doubles as the offline
//! store record.

use std::fmt;

use bon::bon;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(name)
    }
}

/// Immutable structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub level: Level,
    pub message: String,
    pub timestamp_millis: i64,
    /// Structured context merged upstream (already redacted by the PII engine).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    /// Positional arguments captured at the call site.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default = "default_logger_name")]
    pub logger_name: String,
}

fn default_logger_name() -> String {
    String::from("root")
}

#[bon]
impl EventRecord {
    /// Build a record. The timestamp defaults to now.
    #[builder]
    pub fn new(
        level: Level,
        #[builder(into)] message: String,
        #[builder(default = chrono::Utc::now().timestamp_millis())] timestamp_millis: i64,
        #[builder(default = Map::new())] context: Map<String, Value>,
        #[builder(default = Vec::new())] args: Vec<Value>,
        #[builder(into)] component: Option<String>,
        #[builder(into, default = default_logger_name())] logger_name: String,
    ) -> Self {
        Self {
            level,
            message,
            timestamp_millis,
            context,
            args,
            component,
            logger_name,
        }
    }
}

/// Overhead added to the message length when an event cannot be serialized
/// and the size estimate has to be conservative.
const FALLBACK_SIZE_OVERHEAD: usize = 256;

/// A record waiting for delivery, with retry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    pub event: EventRecord,
    pub enqueued_at_millis: i64,
    /// Number of failed transmission attempts so far.
    pub retry_count: u32,
    /// Serialized size in bytes, used for batch packing.
    pub estimated_size_bytes: usize,
}

impl QueuedEvent {
    /// Wrap a record for queueing, computing its size estimate.
    pub fn new(event: EventRecord) -> Self {
        let estimated_size_bytes = match serde_json::to_vec(&event) {
            Ok(bytes) => bytes.len(),
            Err(err) => {
                tracing::debug!(error = %err, "falling back to conservative event size estimate");
                event.message.len() + FALLBACK_SIZE_OVERHEAD
            }
        };
        Self {
            event,
            enqueued_at_millis: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            estimated_size_bytes,
        }
    }
}
