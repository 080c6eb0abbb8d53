//! Error types for the delivery engine
//!
//! Nothing in the delivery path propagates errors to the log-producing call
//! site; these types surface only from construction, from the storage and
//! transport ports, and from test-facing helpers. Delivery failures are
//! downgraded to diagnostics and retry scheduling inside the engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid construction-time configuration (missing or unparsable
    /// endpoint, bad custom header). The only error a constructor returns.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("collector rejected batch (status {status}): {message}")]
    Collector { status: u16, message: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing key-value store failed in a way that is not an I/O error.
    /// Custom [`KeyValueStore`](crate::store::KeyValueStore) implementations
    /// report through this variant.
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures where the collector itself answered (as opposed to
    /// the request never completing).
    pub fn is_collector_rejection(&self) -> bool {
        matches!(self, Error::Collector { .. })
    }

    /// HTTP status carried by the error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Collector { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
